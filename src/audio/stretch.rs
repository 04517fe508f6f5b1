//! Étirement temporel à hauteur constante (WSOLA)
//!
//! Le signal, déjà à la fréquence de sortie, est découpé en fenêtres de Hann
//! recouvrantes à 50 %. Les fenêtres sont prélevées tous les `vitesse × pas`
//! en entrée et recollées tous les `pas` en sortie ; chaque prélèvement est
//! recalé, dans une petite tolérance, sur la position qui prolonge le mieux la
//! fenêtre précédente. La durée change, pas la hauteur.

use std::collections::VecDeque;
use std::f32::consts::PI;

/// Durée d'une fenêtre d'analyse
const WINDOW_SECONDS: f64 = 0.02;

/// Déplacement maximal autour de la position nominale
const TOLERANCE_SECONDS: f64 = 0.004;

/// Étireur temporel sur échantillons entrelacés
pub struct TimeStretcher {
    channels: usize,

    /// Fenêtre de Hann périodique de `window_frames` points
    window: Vec<f32>,
    window_frames: usize,

    /// Pas de synthèse, moitié de la fenêtre
    hop: usize,

    tolerance: usize,

    rate: f64,

    /// Entrée en attente, entrelacée
    input: Vec<f32>,

    /// Position nominale de la prochaine fenêtre, en trames depuis `input[0]`
    analysis_position: f64,

    /// Début du segment prolongeant naturellement la dernière fenêtre
    continuation: Option<usize>,

    /// Seconde moitié de la dernière fenêtre, à additionner à la suivante
    overlap: Vec<f32>,

    ready: VecDeque<f32>,
}

impl TimeStretcher {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        let channels = channels.max(1) as usize;
        let window_frames = ((sample_rate as f64 * WINDOW_SECONDS) as usize).max(16) & !1;
        let hop = window_frames / 2;
        let tolerance = ((sample_rate as f64 * TOLERANCE_SECONDS) as usize).clamp(1, hop);

        let window = (0..window_frames)
            .map(|n| 0.5 - 0.5 * (2.0 * PI * n as f32 / window_frames as f32).cos())
            .collect();

        Self {
            channels,
            window,
            window_frames,
            hop,
            tolerance,
            rate: 1.0,
            input: Vec::new(),
            analysis_position: 0.0,
            continuation: None,
            overlap: vec![0.0; hop * channels],
            ready: VecDeque::new(),
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Change le facteur de vitesse (durée de sortie = durée d'entrée / vitesse)
    pub fn set_rate(&mut self, rate: f64) {
        if rate.is_finite() && rate > 0.0 {
            self.rate = rate;
        }
    }

    /// Abandonne l'entrée et la sortie en attente
    pub fn reset(&mut self) {
        self.input.clear();
        self.analysis_position = 0.0;
        self.continuation = None;
        self.overlap.fill(0.0);
        self.ready.clear();
    }

    /// Trames d'entrée en attente de traitement
    pub fn pending_frames(&self) -> usize {
        self.input.len() / self.channels
    }

    /// Ajoute des échantillons entrelacés en entrée
    pub fn push(&mut self, samples: &[f32]) {
        self.input.extend_from_slice(samples);
    }

    /// Remplit entièrement `out` si assez de sortie peut être produite
    ///
    /// Sinon `out` n'est pas touché et l'état est conservé jusqu'au prochain
    /// `push`.
    pub fn pull(&mut self, out: &mut [f32]) -> bool {
        while self.ready.len() < out.len() && self.step() {}

        if self.ready.len() < out.len() {
            return false;
        }

        let len = out.len();
        for (sample, value) in out.iter_mut().zip(self.ready.drain(..len)) {
            *sample = value;
        }
        true
    }

    /// Recolle une fenêtre ; faux s'il manque de l'entrée
    fn step(&mut self) -> bool {
        let nominal = self.analysis_position.round() as usize;
        let frames = self.pending_frames();

        let start = match self.continuation {
            None => {
                if frames < nominal + self.window_frames {
                    return false;
                }
                nominal
            }
            Some(target) => {
                let low = nominal.saturating_sub(self.tolerance);
                let high = nominal + self.tolerance;
                if frames < high.max(target) + self.window_frames {
                    return false;
                }
                self.best_match(target, low, high)
            }
        };

        let channels = self.channels;
        for (index, &gain) in self.window.iter().enumerate() {
            let frame = (start + index) * channels;
            for channel in 0..channels {
                let value = self.input[frame + channel] * gain;
                if index < self.hop {
                    self.ready.push_back(self.overlap[index * channels + channel] + value);
                } else {
                    self.overlap[(index - self.hop) * channels + channel] = value;
                }
            }
        }

        self.continuation = Some(start + self.hop);
        self.analysis_position += self.rate * self.hop as f64;
        self.discard_consumed();
        true
    }

    /// Position dans `[low, high]` la plus corrélée au segment `target`
    fn best_match(&self, target: usize, low: usize, high: usize) -> usize {
        let channels = self.channels;
        let reference = &self.input[target * channels..(target + self.hop) * channels];

        let mut best = low;
        let mut best_score = f32::MIN;

        for candidate in low..=high {
            let segment = &self.input[candidate * channels..(candidate + self.hop) * channels];

            // Premier canal seulement
            let (correlation, energy) = segment
                .iter()
                .step_by(channels)
                .zip(reference.iter().step_by(channels))
                .fold((0.0f32, 0.0f32), |(correlation, energy), (&s, &r)| {
                    (correlation + s * r, energy + s * s)
                });

            let score = correlation / (energy + 1e-9).sqrt();
            if score > best_score {
                best_score = score;
                best = candidate;
            }
        }

        best
    }

    fn discard_consumed(&mut self) {
        let Some(continuation) = self.continuation else {
            return;
        };

        let lowest = (self.analysis_position.floor() as usize).saturating_sub(self.tolerance);
        let keep_from = lowest.min(continuation);
        if keep_from < self.window_frames {
            return;
        }

        self.input.drain(..keep_from * self.channels);
        self.analysis_position -= keep_from as f64;
        self.continuation = Some(continuation - keep_from);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Fréquence estimée par comptage des passages par zéro montants
    fn zero_crossing_frequency(samples: &[f32], sample_rate: f64) -> f64 {
        let rising = samples
            .windows(2)
            .filter(|pair| pair[0] < 0.0 && pair[1] >= 0.0)
            .count();
        rising as f64 * sample_rate / samples.len() as f64
    }

    fn sine(frequency: f64, sample_rate: f64, frames: usize) -> Vec<f32> {
        (0..frames)
            .map(|n| (2.0 * std::f64::consts::PI * frequency * n as f64 / sample_rate).sin() as f32 * 0.5)
            .collect()
    }

    fn stretch_all(stretcher: &mut TimeStretcher, input: &[f32], chunk: usize) -> Vec<f32> {
        stretcher.push(input);
        let mut output = Vec::new();
        let mut out = vec![0.0; chunk];
        while stretcher.pull(&mut out) {
            output.extend_from_slice(&out);
        }
        output
    }

    #[test]
    fn test_pitch_is_kept_when_speeding_up() {
        let mut stretcher = TimeStretcher::new(48000, 1);
        stretcher.set_rate(2.0);

        let input = sine(440.0, 48000.0, 96000);
        let output = stretch_all(&mut stretcher, &input, 480);

        // Deux fois plus court
        assert!((output.len() as f64 - 48000.0).abs() < 2500.0, "longueur: {}", output.len());

        let frequency = zero_crossing_frequency(&output[2000..], 48000.0);
        assert!((frequency - 440.0).abs() < 15.0, "fréquence: {}", frequency);
    }

    #[test]
    fn test_pitch_is_kept_when_slowing_down() {
        let mut stretcher = TimeStretcher::new(48000, 2);
        stretcher.set_rate(0.5);

        let mono = sine(440.0, 48000.0, 25000);
        let stereo: Vec<f32> = mono.iter().flat_map(|&s| [s, s]).collect();
        let output = stretch_all(&mut stretcher, &stereo, 960);

        let left: Vec<f32> = output.iter().step_by(2).copied().collect();
        assert!((left.len() as f64 - 48000.0).abs() < 2500.0, "longueur: {}", left.len());

        let frequency = zero_crossing_frequency(&left[2000..], 48000.0);
        assert!((frequency - 440.0).abs() < 15.0, "fréquence: {}", frequency);
    }

    #[test]
    fn test_unity_rate_preserves_signal() {
        let mut stretcher = TimeStretcher::new(48000, 1);
        let input = sine(300.0, 48000.0, 9600);
        let output = stretch_all(&mut stretcher, &input, 480);

        // Fenêtres de Hann à 50 % : somme unitaire après la première fenêtre
        let hop = 480;
        for (index, (&a, &b)) in output.iter().zip(&input).enumerate().skip(hop).take(4000) {
            assert!((a - b).abs() < 1e-3, "écart à {}: {} / {}", index, a, b);
        }
    }

    #[test]
    fn test_pull_waits_for_input() {
        let mut stretcher = TimeStretcher::new(48000, 1);
        stretcher.set_rate(2.0);
        stretcher.push(&[0.1; 100]);

        let mut out = [7.0f32; 480];
        assert!(!stretcher.pull(&mut out));
        assert_eq!(out, [7.0f32; 480]);

        stretcher.reset();
        assert_eq!(stretcher.pending_frames(), 0);
    }
}
