//! Registre des cœurs d'émulation disponibles
//!
//! Passé explicitement à qui en a besoin : aucun état global.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::audio::{AudioEnvironment, AudioFormat, AudioOutputDevice};
use crate::config::EmulatorConfig;
use crate::connector::EmulatorConnector;
use crate::error::{Error, Result};
use crate::pump::{Clock, FramePump};
use crate::video::VideoFormat;

/// Type de jeu pris en charge par un cœur (« gba », « nds »…)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GameType(pub String);

impl GameType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Description d'un cœur
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreDescriptor {
    /// Nom affiché
    pub name: String,

    /// Identifiant unique (ex. « com.example.core.gba »)
    pub identifier: String,

    pub game_type: GameType,

    /// Format audio natif annoncé
    pub audio_format: AudioFormat,

    /// Format vidéo annoncé
    pub video_format: VideoFormat,
}

/// Fabrique de connecteurs pour un type de jeu
pub trait EmulatorCore: Send + Sync {
    fn descriptor(&self) -> &CoreDescriptor;

    /// Nouveau connecteur pour une session
    fn make_connector(&self) -> Box<dyn EmulatorConnector>;
}

/// Cœurs enregistrés, indexés par type de jeu
#[derive(Default)]
pub struct CoreRegistry {
    cores: HashMap<GameType, Arc<dyn EmulatorCore>>,
}

impl CoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enregistre un cœur ; remplace celui du même type de jeu
    pub fn register(&mut self, core: Arc<dyn EmulatorCore>) {
        let descriptor = core.descriptor();
        let game_type = descriptor.game_type.clone();

        info!("Cœur enregistré: {} ({})", descriptor.name, game_type);
        if let Some(previous) = self.cores.insert(game_type, core) {
            warn!("Cœur remplacé: {}", previous.descriptor().identifier);
        }
    }

    /// Retire un cœur, seulement s'il est celui enregistré pour son type
    pub fn unregister(&mut self, core: &dyn EmulatorCore) -> bool {
        let descriptor = core.descriptor();
        let registered = self
            .cores
            .get(&descriptor.game_type)
            .is_some_and(|current| current.descriptor().identifier == descriptor.identifier);

        if registered {
            self.cores.remove(&descriptor.game_type);
            info!("Cœur retiré: {}", descriptor.name);
        }
        registered
    }

    pub fn core_for(&self, game_type: &GameType) -> Option<Arc<dyn EmulatorCore>> {
        self.cores.get(game_type).cloned()
    }

    /// Types de jeu pris en charge, triés
    pub fn game_types(&self) -> Vec<GameType> {
        let mut types: Vec<GameType> = self.cores.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.cores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cores.is_empty()
    }

    /// Construit une session d'émulation pour `game_type`
    pub fn session(
        &self,
        game_type: &GameType,
        device: Box<dyn AudioOutputDevice>,
        environment: Arc<dyn AudioEnvironment>,
        clock: Arc<dyn Clock>,
        config: &EmulatorConfig,
    ) -> Result<FramePump> {
        let core = self
            .core_for(game_type)
            .ok_or_else(|| Error::UnknownCore(game_type.to_string()))?;

        FramePump::new(core.make_connector(), device, environment, clock, config)
    }
}
