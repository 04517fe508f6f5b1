//! Frontière avec le cœur émulé
//!
//! Un connecteur avance l'émulation d'une trame native à la fois et écrit
//! l'audio et la vidéo produits au travers de [`FrameOutput`].

use std::sync::Arc;

use crate::audio::{AudioFormat, RingBuffer};
use crate::error::{ConnectorError, VideoError};
use crate::video::{TextureHandle, VideoFormat, VideoPipeline};

/// Cœur émulé vu par la boucle d'émulation
///
/// Seul le thread de la boucle appelle ces méthodes.
pub trait EmulatorConnector: Send {
    /// Durée d'une trame native en secondes (peut varier en cours de partie)
    fn frame_duration(&self) -> f64;

    /// Format audio natif (peut varier en cours de partie)
    fn audio_format(&self) -> AudioFormat;

    /// Format vidéo, fixé au début de la session
    fn video_format(&self) -> VideoFormat;

    /// Avance d'une trame ; si `process_video`, soumet aussi l'image
    fn run_frame(&mut self, output: &mut FrameOutput<'_>, process_video: bool) -> Result<(), ConnectorError>;

    fn start(&mut self) {}

    fn stop(&mut self) {}

    fn pause(&mut self) {}

    fn resume(&mut self) {}
}

/// Destinations de l'audio et de la vidéo pour une trame
pub struct FrameOutput<'a> {
    ring: Arc<RingBuffer>,
    video: &'a VideoPipeline,
    audio_bytes: usize,
    video_submitted: bool,
}

impl<'a> FrameOutput<'a> {
    pub fn new(ring: Arc<RingBuffer>, video: &'a VideoPipeline) -> Self {
        Self {
            ring,
            video,
            audio_bytes: 0,
            video_submitted: false,
        }
    }

    /// Pousse des octets au format audio natif
    pub fn write_audio(&mut self, bytes: &[u8]) -> usize {
        let written = self.ring.write(bytes);
        self.audio_bytes += written;
        written
    }

    /// Pousse des échantillons 16 bits entrelacés
    pub fn write_samples_i16(&mut self, samples: &[i16]) -> usize {
        if cfg!(target_endian = "little") {
            self.write_audio(bytemuck::cast_slice(samples))
        } else {
            let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
            self.write_audio(&bytes)
        }
    }

    /// Pousse des échantillons flottants entrelacés
    pub fn write_samples_f32(&mut self, samples: &[f32]) -> usize {
        if cfg!(target_endian = "little") {
            self.write_audio(bytemuck::cast_slice(samples))
        } else {
            let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
            self.write_audio(&bytes)
        }
    }

    /// Soumet une image brute au format vidéo de la session
    pub fn submit_video(&mut self, pixels: &[u8]) -> Result<(), VideoError> {
        self.video.submit_frame(pixels)?;
        self.video_submitted = true;
        Ok(())
    }

    /// Signale la mise à jour de la texture partagée
    pub fn submit_texture(&mut self, handle: TextureHandle) -> Result<(), VideoError> {
        self.video.submit_texture(handle)?;
        self.video_submitted = true;
        Ok(())
    }

    /// Octets audio acceptés par le tampon pendant cette trame
    pub fn audio_bytes(&self) -> usize {
        self.audio_bytes
    }

    pub fn video_submitted(&self) -> bool {
        self.video_submitted
    }
}
