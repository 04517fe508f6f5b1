//! Formats audio natifs et de sortie

use serde::{Deserialize, Serialize};

/// Format d'un échantillon PCM entrelacé
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleFormat {
    /// Entier signé 16 bits, petit-boutiste
    I16,

    /// Flottant 32 bits, petit-boutiste
    F32,
}

impl SampleFormat {
    /// Taille d'un échantillon en octets
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::I16 => 2,
            SampleFormat::F32 => 4,
        }
    }

    pub fn bit_depth(self) -> u16 {
        (self.bytes_per_sample() * 8) as u16
    }
}

/// Format audio PCM entrelacé (cœur émulé ou périphérique de sortie)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Fréquence d'échantillonnage en Hz
    pub sample_rate: u32,

    /// Nombre de canaux
    pub channels: u16,

    /// Format des échantillons
    pub sample_format: SampleFormat,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, channels: u16, sample_format: SampleFormat) -> Self {
        Self {
            sample_rate,
            channels,
            sample_format,
        }
    }

    /// Format 16 bits entrelacé, celui produit par la plupart des cœurs
    pub fn pcm_i16(sample_rate: u32, channels: u16) -> Self {
        Self::new(sample_rate, channels, SampleFormat::I16)
    }

    /// Format flottant utilisé côté périphérique de sortie
    pub fn pcm_f32(sample_rate: u32, channels: u16) -> Self {
        Self::new(sample_rate, channels, SampleFormat::F32)
    }

    /// Taille d'une trame (un échantillon par canal) en octets
    pub fn frame_size(&self) -> usize {
        self.channels as usize * self.sample_format.bytes_per_sample()
    }

    pub fn bit_depth(&self) -> u16 {
        self.sample_format.bit_depth()
    }

    /// Nombre de trames produites pendant `duration` secondes
    pub fn frames_for(&self, duration: f64) -> usize {
        (self.sample_rate as f64 * duration) as usize
    }
}
