//! Configuration de la session d'émulation

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::video::Viewport;

/// Configuration principale de la session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    pub audio: AudioConfig,
    pub video: VideoConfig,
    pub emulation: EmulationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub enabled: bool,

    /// Respecter le commutateur de sourdine de l'appareil
    pub follow_mute_switch: bool,

    /// Tampons supplémentaires absorbant la gigue entre fréquences
    pub buffer_headroom: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub enabled: bool,

    /// Zone affichée `[x, y, largeur, hauteur]`, image entière si absente
    pub viewport: Option<[u32; 4]>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulationConfig {
    /// Vitesse de lecture (1.0 = temps réel)
    pub rate: f64,

    pub max_frames_to_skip: u32,

    /// Fréquence de rafraîchissement de l'écran en Hz
    pub screen_refresh_rate: f64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            follow_mute_switch: true,
            buffer_headroom: 10,
        }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            viewport: None,
        }
    }
}

impl Default for EmulationConfig {
    fn default() -> Self {
        Self {
            rate: 1.0,
            max_frames_to_skip: 5,
            screen_refresh_rate: 60.0,
        }
    }
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            video: VideoConfig::default(),
            emulation: EmulationConfig::default(),
        }
    }
}

impl VideoConfig {
    pub fn viewport(&self) -> Option<Viewport> {
        self.viewport
            .map(|[x, y, width, height]| Viewport::new(x, y, width, height))
    }
}

impl EmulationConfig {
    /// Période de rafraîchissement de l'écran en secondes
    pub fn screen_refresh_period(&self) -> f64 {
        if self.screen_refresh_rate > 0.0 {
            1.0 / self.screen_refresh_rate
        } else {
            crate::pump::SCREEN_REFRESH_PERIOD
        }
    }
}

impl EmulatorConfig {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("lecture de {}", path.display()))?;
        let config: EmulatorConfig = toml::from_str(&contents)
            .with_context(|| format!("configuration invalide: {}", path.display()))?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path.as_ref(), contents)?;
        Ok(())
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load_from_file(path).unwrap_or_default()
    }
}
