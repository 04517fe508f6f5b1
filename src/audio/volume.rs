//! Politique de volume et environnement audio de l'hôte

use serde::{Deserialize, Serialize};

/// Sortie audio active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputRoute {
    /// Haut-parleur intégré
    Speaker,

    /// Écouteur interne (combiné téléphonique)
    Receiver,

    /// Casque filaire
    Headphones,

    /// Casque Bluetooth
    Bluetooth,

    /// Sortie externe (AirPlay, HDMI, etc.)
    External,
}

impl OutputRoute {
    /// Casque branché ou connecté
    pub fn is_headset(self) -> bool {
        matches!(self, OutputRoute::Headphones | OutputRoute::Bluetooth)
    }

    /// Tout ce qui n'est ni le haut-parleur ni l'écouteur interne
    pub fn is_external(self) -> bool {
        !matches!(self, OutputRoute::Speaker | OutputRoute::Receiver)
    }
}

/// État de l'hôte consulté à chaque changement de route ou de sourdine
pub trait AudioEnvironment: Send + Sync {
    /// Une autre application joue-t-elle du son ?
    fn is_other_audio_playing(&self) -> bool {
        false
    }

    fn current_route(&self) -> OutputRoute {
        OutputRoute::Speaker
    }
}

/// Environnement de bureau : personne d'autre ne joue, sortie haut-parleur
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemEnvironment;

impl AudioEnvironment for SystemEnvironment {}

/// Entrées de la politique de volume
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeInputs {
    pub enabled: bool,
    pub other_audio_playing: bool,
    pub follow_mute_switch: bool,
    pub muted: bool,
    pub route: OutputRoute,
}

/// Calcule le volume de sortie (0 ou 1)
pub fn resolve_volume(inputs: &VolumeInputs) -> f32 {
    if !inputs.enabled || inputs.other_audio_playing {
        // Ne jamais couvrir le son d'une autre application
        return 0.0;
    }

    let respects_mute = inputs.route.is_headset() || !inputs.route.is_external();
    if inputs.follow_mute_switch && inputs.muted && respects_mute {
        0.0
    } else {
        1.0
    }
}
