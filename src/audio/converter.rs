//! Conversion du format natif du cœur vers le format du périphérique
//!
//! Modèle « pull » : le convertisseur puise dans le tampon circulaire exactement
//! les trames nécessaires à un tampon de sortie de taille fixe. S'il n'y en a
//! pas assez, il ne bloque jamais et signale simplement l'absence de données.
//!
//! Hors temps réel, le rééchantillonneur garde le rapport des fréquences et un
//! [`TimeStretcher`] ajuste ensuite la durée sans changer la hauteur.

use log::debug;
use rubato::{FastFixedOut, PolynomialDegree, Resampler};

use super::format::{AudioFormat, SampleFormat};
use super::ring_buffer::RingBuffer;
use super::stretch::TimeStretcher;
use crate::error::AudioError;

/// Écart maximal de vitesse de lecture accepté
pub const MAX_RATE_RATIO: f64 = 8.0;

/// Résultat d'une tentative de conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    /// Un tampon de sortie complet a été produit
    Converted {
        input_frames: usize,
        output_frames: usize,
    },

    /// Pas assez de données pour l'instant (amorçage en cours)
    NoDataNow,

    /// Le pipeline a été reconfiguré depuis la création du convertisseur
    FormatMismatch,
}

/// Convertisseur de fréquence et de format d'échantillons
pub struct SampleRateConverter {
    input: AudioFormat,
    output: AudioFormat,

    /// Génération de configuration du pipeline à la création
    generation: u64,

    /// Trames produites par conversion
    output_frames: usize,

    resampler: FastFixedOut<f32>,

    /// Étirement temporel, utilisé seulement hors temps réel
    stretcher: TimeStretcher,

    /// Vitesse de lecture appliquée à l'étirement
    rate: f64,

    /// Trames d'entrée minimales pour un tampon de sortie, calculées au premier appel
    required_input_frames: Option<usize>,

    /// Multiplicateur du seuil d'amorçage : ceil(fréquence entrée / fréquence sortie)
    priming_factor: usize,

    primed: bool,

    /// Octets disponibles à la fin de l'appel précédent
    previous_available: Option<usize>,

    raw: Vec<u8>,
    planar_in: Vec<Vec<f32>>,
    planar_out: Vec<Vec<f32>>,

    /// Trames valides dans `planar_out` après le dernier bloc
    planar_out_frames: usize,

    /// Sortie rééchantillonnée, entrelacée, avant étirement
    resampled: Vec<f32>,
}

impl SampleRateConverter {
    /// Crée un convertisseur produisant `output_frames` trames par appel
    pub fn new(
        input: AudioFormat,
        output: AudioFormat,
        output_frames: usize,
        generation: u64,
    ) -> Result<Self, AudioError> {
        if input.channels == 0
            || output.channels == 0
            || input.sample_rate == 0
            || output.sample_rate == 0
            || output_frames == 0
        {
            return Err(AudioError::Resampler(format!(
                "formats invalides: {:?} -> {:?} ({} trames)",
                input, output, output_frames
            )));
        }

        let ratio = output.sample_rate as f64 / input.sample_rate as f64;
        let resampler = FastFixedOut::<f32>::new(
            ratio,
            1.0,
            PolynomialDegree::Cubic,
            output_frames,
            input.channels as usize,
        )
        .map_err(|err| AudioError::Resampler(err.to_string()))?;

        let channels = input.channels as usize;
        let planar_in = vec![Vec::with_capacity(resampler.input_frames_max()); channels];
        let planar_out = vec![vec![0.0; resampler.output_frames_max()]; channels];
        let priming_factor = (input.sample_rate as f64 / output.sample_rate as f64).ceil() as usize;

        Ok(Self {
            input,
            output,
            generation,
            output_frames,
            resampler,
            stretcher: TimeStretcher::new(output.sample_rate, output.channels),
            rate: 1.0,
            required_input_frames: None,
            priming_factor: priming_factor.max(1),
            primed: false,
            previous_available: None,
            raw: Vec::new(),
            planar_in,
            planar_out,
            planar_out_frames: 0,
            resampled: Vec::new(),
        })
    }

    pub fn input_format(&self) -> AudioFormat {
        self.input
    }

    pub fn output_format(&self) -> AudioFormat {
        self.output
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Trames produites par conversion réussie
    pub fn output_frames(&self) -> usize {
        self.output_frames
    }

    /// Taille en échantillons entrelacés d'un tampon de sortie
    pub fn output_len(&self) -> usize {
        self.output_frames * self.output.channels as usize
    }

    pub fn is_primed(&self) -> bool {
        self.primed
    }

    /// Trames d'entrée nécessaires pour un tampon de sortie
    pub fn required_input_frames(&mut self) -> usize {
        *self
            .required_input_frames
            .get_or_insert_with(|| self.resampler.input_frames_next())
    }

    /// Remet le convertisseur dans l'état « pas encore amorcé »
    pub fn reset(&mut self) {
        self.resampler.reset();
        self.stretcher.reset();
        self.required_input_frames = None;
        self.primed = false;
        self.previous_available = None;
    }

    /// Tente de remplir `out` (entrelacé, format de sortie) depuis `ring`
    ///
    /// `current_generation` est la génération courante du pipeline : un appel
    /// issu d'une configuration périmée est abandonné sans rien lire.
    pub fn convert(
        &mut self,
        ring: &RingBuffer,
        current_generation: u64,
        rate: f64,
        out: &mut [f32],
    ) -> Result<Conversion, AudioError> {
        if current_generation != self.generation {
            return Ok(Conversion::FormatMismatch);
        }

        self.apply_rate(rate);

        let frame_size = self.input.frame_size();
        let required_bytes = self.required_input_frames() * frame_size;
        let available = ring.available_for_reading();

        if !self.check_priming(available, required_bytes) {
            return Ok(Conversion::NoDataNow);
        }

        if self.rate == 1.0 {
            let Some(needed) = self.resample_chunk(ring)? else {
                return Ok(Conversion::NoDataNow);
            };
            let produced = self.planar_out_frames;
            self.interleave(produced, out);

            return Ok(Conversion::Converted {
                input_frames: needed,
                output_frames: produced,
            });
        }

        let mut input_frames = 0;
        while !self.stretcher.pull(out) {
            let Some(needed) = self.resample_chunk(ring)? else {
                return Ok(Conversion::NoDataNow);
            };
            input_frames += needed;

            let mut resampled = std::mem::take(&mut self.resampled);
            resampled.resize(self.planar_out_frames * self.output.channels as usize, 0.0);
            self.interleave(self.planar_out_frames, &mut resampled);
            self.stretcher.push(&resampled);
            self.resampled = resampled;
        }

        Ok(Conversion::Converted {
            input_frames,
            output_frames: self.output_frames,
        })
    }

    /// Lit et rééchantillonne un bloc ; `None` si le tampon n'en contient pas assez
    fn resample_chunk(&mut self, ring: &RingBuffer) -> Result<Option<usize>, AudioError> {
        let frame_size = self.input.frame_size();
        let available = ring.available_for_reading();

        let needed = self.resampler.input_frames_next();
        let bytes = needed * frame_size;
        if available < bytes {
            self.primed = false;
            self.previous_available = Some(available);
            return Ok(None);
        }

        self.raw.resize(bytes, 0);
        let read = ring.read(&mut self.raw[..bytes]);
        self.previous_available = Some(ring.available_for_reading());

        if read < bytes {
            self.primed = false;
            return Ok(None);
        }

        self.decode(needed);

        let (_, produced) = self
            .resampler
            .process_into_buffer(&self.planar_in, &mut self.planar_out, None)
            .map_err(|err| AudioError::Resampler(err.to_string()))?;
        self.planar_out_frames = produced;

        Ok(Some(needed))
    }

    fn check_priming(&mut self, available: usize, required_bytes: usize) -> bool {
        if !self.primed {
            // Assez d'avance pour éviter la distorsion au démarrage
            if available < required_bytes * self.priming_factor {
                self.previous_available = Some(available);
                return false;
            }
            self.primed = true;
        }

        if matches!(self.previous_available, Some(previous) if available < previous) {
            // Le tampon a été vidé entre-temps : on réamorce
            self.primed = false;
            self.previous_available = Some(available);
            return false;
        }

        if available < required_bytes {
            self.primed = false;
            self.previous_available = Some(available);
            return false;
        }

        true
    }

    fn apply_rate(&mut self, rate: f64) {
        let rate = rate.clamp(1.0 / MAX_RATE_RATIO, MAX_RATE_RATIO);
        if rate == self.rate {
            return;
        }

        // L'étirement en cours ne se raccorde pas à la nouvelle vitesse
        self.stretcher.reset();
        self.stretcher.set_rate(rate);

        debug!("Vitesse de lecture audio: {:.2}x", rate);
        self.rate = rate;
    }

    fn decode(&mut self, frames: usize) {
        let frame_size = self.input.frame_size();
        let sample_size = self.input.sample_format.bytes_per_sample();

        for channel in &mut self.planar_in {
            channel.clear();
        }

        for frame in self.raw[..frames * frame_size].chunks_exact(frame_size) {
            for (channel, sample) in self
                .planar_in
                .iter_mut()
                .zip(frame.chunks_exact(sample_size))
            {
                let value = match self.input.sample_format {
                    SampleFormat::I16 => i16::from_le_bytes([sample[0], sample[1]]) as f32 / 32768.0,
                    SampleFormat::F32 => {
                        f32::from_le_bytes([sample[0], sample[1], sample[2], sample[3]])
                    }
                };
                channel.push(value);
            }
        }
    }

    fn interleave(&self, produced: usize, out: &mut [f32]) {
        let out_channels = self.output.channels as usize;
        let in_channels = self.planar_out.len();
        let frames = produced.min(out.len() / out_channels);

        for (index, frame) in out.chunks_exact_mut(out_channels).enumerate() {
            if index >= frames {
                frame.fill(0.0);
                continue;
            }

            for (channel, sample) in frame.iter_mut().enumerate() {
                *sample = if out_channels == 1 && in_channels > 1 {
                    // Mixage vers le mono
                    self.planar_out.iter().map(|c| c[index]).sum::<f32>() / in_channels as f32
                } else if channel < in_channels {
                    self.planar_out[channel][index]
                } else if in_channels == 1 {
                    self.planar_out[0][index]
                } else {
                    0.0
                };
            }
        }
    }
}
