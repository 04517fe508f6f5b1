//! Pipeline audio : tampon circulaire, conversion et périphérique de sortie
//!
//! Le thread d'émulation pousse les échantillons natifs du cœur dans le
//! [`RingBuffer`]. Le callback du périphérique les en retire à son propre
//! rythme au travers du [`SampleRateConverter`]. Les deux côtés ne partagent
//! que les curseurs atomiques du tampon et quelques réglages atomiques.

pub mod converter;
mod format;
pub mod output;
pub mod ring_buffer;
pub mod stretch;
pub mod volume;

pub use converter::{Conversion, SampleRateConverter};
pub use format::{AudioFormat, SampleFormat};
pub use output::{AudioOutputDevice, CpalOutput, HeadlessHandle, HeadlessOutput, RenderCallback};
pub use ring_buffer::{RingBuffer, RingBufferStats};
pub use stretch::TimeStretcher;
pub use volume::{resolve_volume, AudioEnvironment, OutputRoute, SystemEnvironment, VolumeInputs};

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::atomic::AtomicCell;
use log::{debug, error, info, warn};
use parking_lot::Mutex;

use crate::config::AudioConfig;
use crate::error::AudioError;

/// Durée de trame supposée tant que le connecteur n'en a pas fourni
pub const DEFAULT_FRAME_DURATION: f64 = 1.0 / 60.0;

/// État du flux de sortie vu depuis le callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Pipeline désactivé ou arrêté : silence
    Disabled,

    /// En attente d'assez d'échantillons
    Priming,

    /// Tampons de sortie remplis normalement
    Streaming,
}

/// Réglages lus par le callback de sortie sans verrou
struct RenderControls {
    /// Volume (bits d'un f32)
    volume: AtomicU32,

    /// Vitesse de lecture (bits d'un f64)
    rate: AtomicU64,

    /// Incrémentée à chaque reconfiguration
    generation: AtomicU64,

    enabled: AtomicBool,
    state: AtomicCell<StreamState>,
}

impl RenderControls {
    fn new(enabled: bool) -> Self {
        Self {
            volume: AtomicU32::new(0.0f32.to_bits()),
            rate: AtomicU64::new(1.0f64.to_bits()),
            generation: AtomicU64::new(0),
            enabled: AtomicBool::new(enabled),
            state: AtomicCell::new(StreamState::Disabled),
        }
    }

    fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    fn rate(&self) -> f64 {
        f64::from_bits(self.rate.load(Ordering::Relaxed))
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

/// Côté consommateur, possédé par le callback du périphérique
struct RenderState {
    ring: Arc<RingBuffer>,
    converter: SampleRateConverter,
    controls: Arc<RenderControls>,

    /// Dernier tampon converti, partiellement consommé
    chunk: Vec<f32>,
    cursor: usize,
}

impl RenderState {
    fn new(ring: Arc<RingBuffer>, converter: SampleRateConverter, controls: Arc<RenderControls>) -> Self {
        let len = converter.output_len();
        Self {
            ring,
            converter,
            controls,
            chunk: vec![0.0; len],
            cursor: len,
        }
    }

    fn render(&mut self, data: &mut [f32]) {
        let mut filled = 0;

        while filled < data.len() {
            if self.cursor >= self.chunk.len() && !self.refill() {
                break;
            }

            let count = (data.len() - filled).min(self.chunk.len() - self.cursor);
            let gain = self.controls.volume();
            for (out, &sample) in data[filled..filled + count]
                .iter_mut()
                .zip(&self.chunk[self.cursor..self.cursor + count])
            {
                *out = sample * gain;
            }
            filled += count;
            self.cursor += count;
        }

        data[filled..].fill(0.0);
    }

    fn refill(&mut self) -> bool {
        let enabled = self.controls.enabled.load(Ordering::Acquire);
        let result = self.converter.convert(
            &self.ring,
            self.controls.generation(),
            self.controls.rate(),
            &mut self.chunk,
        );

        match result {
            Ok(Conversion::Converted { .. }) => {
                if enabled {
                    self.controls.state.store(StreamState::Streaming);
                }
                self.cursor = 0;
                true
            }
            Ok(Conversion::NoDataNow) => {
                if enabled {
                    self.controls.state.store(StreamState::Priming);
                }
                false
            }
            // Configuration périmée ou erreur du rééchantillonneur : silence
            Ok(Conversion::FormatMismatch) | Err(_) => false,
        }
    }
}

struct PipelineInner {
    device: Box<dyn AudioOutputDevice>,
    environment: Arc<dyn AudioEnvironment>,

    audio_format: AudioFormat,
    output_format: AudioFormat,
    frame_duration: f64,
    ring: Arc<RingBuffer>,

    headroom: usize,
    enabled: bool,
    running: bool,
    follow_mute_switch: bool,
    muted: bool,
}

/// Pipeline audio complet d'une session
pub struct AudioPipeline {
    inner: Mutex<PipelineInner>,
    controls: Arc<RenderControls>,
}

/// Taille du tampon circulaire pour un format et une durée de trame
pub fn ring_buffer_size(
    input: AudioFormat,
    output: AudioFormat,
    frame_duration: f64,
    headroom: usize,
) -> usize {
    let input_frames = input.frames_for(frame_duration);
    let ratio = (input.sample_rate as f64 / output.sample_rate.max(1) as f64).ceil() as usize;
    input_frames * input.frame_size() * (ratio + headroom)
}

impl AudioPipeline {
    /// Crée un pipeline pour `audio_format`, sans encore ouvrir de flux
    pub fn new(
        audio_format: AudioFormat,
        mut device: Box<dyn AudioOutputDevice>,
        environment: Arc<dyn AudioEnvironment>,
        config: &AudioConfig,
    ) -> Result<Self, AudioError> {
        let output_format = device.output_format()?;
        let ring = RingBuffer::new(ring_buffer_size(
            audio_format,
            output_format,
            DEFAULT_FRAME_DURATION,
            config.buffer_headroom,
        ))?;
        ring.set_enabled(config.enabled);

        let pipeline = Self {
            inner: Mutex::new(PipelineInner {
                device,
                environment,
                audio_format,
                output_format,
                frame_duration: DEFAULT_FRAME_DURATION,
                ring: Arc::new(ring),
                headroom: config.buffer_headroom,
                enabled: config.enabled,
                running: false,
                follow_mute_switch: config.follow_mute_switch,
                muted: false,
            }),
            controls: Arc::new(RenderControls::new(config.enabled)),
        };

        pipeline.update_volume(&pipeline.inner.lock());
        Ok(pipeline)
    }

    /// Ouvre le flux de sortie et commence à consommer le tampon
    pub fn start(&self) -> Result<(), AudioError> {
        let mut inner = self.inner.lock();
        if inner.running {
            return Ok(());
        }

        inner.running = true;
        if let Err(err) = self.reconfigure(&mut inner) {
            inner.running = false;
            return Err(err);
        }

        info!("Pipeline audio démarré");
        Ok(())
    }

    /// Ferme le flux ; aucun callback ne tourne plus au retour
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        if !inner.running {
            return;
        }

        inner.device.disconnect();
        inner.running = false;
        inner.ring.reset();
        self.controls.state.store(StreamState::Disabled);

        info!("Pipeline audio arrêté");
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().running
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.lock().enabled
    }

    /// Active (lecture, volume rétabli) ou désactive (pause, silence) la sortie
    ///
    /// Dans les deux cas le contenu du tampon est abandonné.
    pub fn set_enabled(&self, enabled: bool) {
        let mut inner = self.inner.lock();
        inner.enabled = enabled;
        inner.ring.set_enabled(enabled);
        self.controls.enabled.store(enabled, Ordering::Release);
        self.update_volume(&inner);

        if inner.running {
            let result = if enabled {
                inner.device.play()
            } else {
                inner.device.pause()
            };
            if let Err(err) = result {
                error!("Impossible de changer l'état de la sortie audio: {}", err);
            }
        }

        inner.ring.reset();
        self.controls.state.store(if enabled {
            StreamState::Priming
        } else {
            StreamState::Disabled
        });

        debug!("Audio {}", if enabled { "activé" } else { "désactivé" });
    }

    /// Répercute le format natif et la durée de trame courants du connecteur
    ///
    /// Retourne `true` si le pipeline a été reconfiguré.
    pub fn sync_format(&self, audio_format: AudioFormat, frame_duration: f64) -> Result<bool, AudioError> {
        let mut inner = self.inner.lock();
        if inner.audio_format == audio_format && inner.frame_duration == frame_duration {
            return Ok(false);
        }

        inner.audio_format = audio_format;
        inner.frame_duration = frame_duration;
        self.reconfigure(&mut inner)?;
        Ok(true)
    }

    pub fn set_audio_format(&self, audio_format: AudioFormat) -> Result<bool, AudioError> {
        let frame_duration = self.inner.lock().frame_duration;
        self.sync_format(audio_format, frame_duration)
    }

    pub fn set_frame_duration(&self, frame_duration: f64) -> Result<bool, AudioError> {
        let audio_format = self.inner.lock().audio_format;
        self.sync_format(audio_format, frame_duration)
    }

    /// Le périphérique ou la route de sortie a changé
    pub fn handle_route_change(&self) -> Result<(), AudioError> {
        let mut inner = self.inner.lock();
        info!("Route audio: {:?}", inner.environment.current_route());
        self.update_volume(&inner);
        self.reconfigure(&mut inner)
    }

    /// État du commutateur de sourdine de l'appareil
    pub fn set_muted(&self, muted: bool) {
        let mut inner = self.inner.lock();
        inner.muted = muted;
        self.update_volume(&inner);
    }

    pub fn set_follow_mute_switch(&self, follow: bool) {
        let mut inner = self.inner.lock();
        inner.follow_mute_switch = follow;
        self.update_volume(&inner);
    }

    /// Réévalue la politique de volume (autre application, sourdine, route)
    pub fn refresh_volume(&self) {
        self.update_volume(&self.inner.lock());
    }

    /// Vitesse de lecture du flux audio, indépendante de celle de la boucle
    pub fn set_rate(&self, rate: f64) {
        if !(rate.is_finite() && rate > 0.0) {
            warn!("Vitesse audio invalide ignorée: {}", rate);
            return;
        }
        self.controls.rate.store(rate.to_bits(), Ordering::Relaxed);
    }

    pub fn rate(&self) -> f64 {
        self.controls.rate()
    }

    pub fn volume(&self) -> f32 {
        self.controls.volume()
    }

    pub fn stream_state(&self) -> StreamState {
        self.controls.state.load()
    }

    /// Tampon courant dans lequel le connecteur écrit ses échantillons
    pub fn ring_buffer(&self) -> Arc<RingBuffer> {
        Arc::clone(&self.inner.lock().ring)
    }

    pub fn audio_format(&self) -> AudioFormat {
        self.inner.lock().audio_format
    }

    pub fn output_format(&self) -> AudioFormat {
        self.inner.lock().output_format
    }

    pub fn frame_duration(&self) -> f64 {
        self.inner.lock().frame_duration
    }

    fn update_volume(&self, inner: &PipelineInner) {
        let volume = resolve_volume(&VolumeInputs {
            enabled: inner.enabled,
            other_audio_playing: inner.environment.is_other_audio_playing(),
            follow_mute_switch: inner.follow_mute_switch,
            muted: inner.muted,
            route: inner.environment.current_route(),
        });
        self.controls.volume.store(volume.to_bits(), Ordering::Relaxed);
    }

    /// Reconstruit tampon, convertisseur et graphe de sortie
    fn reconfigure(&self, inner: &mut PipelineInner) -> Result<(), AudioError> {
        // Les callbacks encore en vol voient une génération périmée et se taisent
        let generation = self.controls.generation.fetch_add(1, Ordering::AcqRel) + 1;

        let output_format = inner.device.output_format()?;
        let size = ring_buffer_size(
            inner.audio_format,
            output_format,
            inner.frame_duration,
            inner.headroom,
        );
        let ring = Arc::new(RingBuffer::new(size)?);
        ring.set_enabled(inner.enabled);

        inner.ring = Arc::clone(&ring);
        inner.output_format = output_format;

        info!(
            "Pipeline audio reconfiguré: {} Hz x{} -> {} Hz x{}, tampon de {} octets",
            inner.audio_format.sample_rate,
            inner.audio_format.channels,
            output_format.sample_rate,
            output_format.channels,
            ring.capacity()
        );

        if !inner.running {
            return Ok(());
        }

        let output_frames = output_format.frames_for(inner.frame_duration).max(1);
        let converter =
            SampleRateConverter::new(inner.audio_format, output_format, output_frames, generation)?;
        let mut state = RenderState::new(ring, converter, Arc::clone(&self.controls));

        inner
            .device
            .connect(output_format, Box::new(move |data: &mut [f32]| state.render(data)))?;

        if inner.enabled {
            inner.device.play()?;
            self.controls.state.store(StreamState::Priming);
        } else {
            self.controls.state.store(StreamState::Disabled);
        }

        Ok(())
    }
}
