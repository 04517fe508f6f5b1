use pixel_emu_core::*;

use std::f32::consts::TAU;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{info, warn};

const SAMPLE_RATE: u32 = 32768;
const WIDTH: u32 = 240;
const HEIGHT: u32 = 160;

/// Connecteur synthétique : tonalité de 440 Hz et dégradé défilant
struct SyntheticConnector {
    phase: f32,
    offset: u32,
    pixels: Vec<u8>,
    samples: Vec<i16>,
}

impl SyntheticConnector {
    fn new() -> Self {
        Self {
            phase: 0.0,
            offset: 0,
            pixels: vec![0; (WIDTH * HEIGHT * 2) as usize],
            samples: Vec::new(),
        }
    }

    fn draw(&mut self) {
        for (index, pixel) in self.pixels.chunks_exact_mut(2).enumerate() {
            let x = index as u32 % WIDTH;
            let y = index as u32 / WIDTH;
            let r = ((x + self.offset) * 31 / WIDTH) as u16 & 0x1F;
            let g = (y * 63 / HEIGHT) as u16 & 0x3F;
            let b = (self.offset / 4) as u16 & 0x1F;
            pixel.copy_from_slice(&((r << 11) | (g << 5) | b).to_le_bytes());
        }
        self.offset = (self.offset + 1) % WIDTH;
    }
}

impl EmulatorConnector for SyntheticConnector {
    fn frame_duration(&self) -> f64 {
        // Cadence d'une console portable 16/32 bits
        1.0 / 59.7275
    }

    fn audio_format(&self) -> AudioFormat {
        AudioFormat::pcm_i16(SAMPLE_RATE, 2)
    }

    fn video_format(&self) -> VideoFormat {
        VideoFormat::new(PixelFormat::Rgb565, WIDTH, HEIGHT)
    }

    fn run_frame(&mut self, output: &mut FrameOutput<'_>, process_video: bool) -> Result<(), ConnectorError> {
        let frames = self.audio_format().frames_for(self.frame_duration());
        let step = TAU * 440.0 / SAMPLE_RATE as f32;

        self.samples.clear();
        for _ in 0..frames {
            let value = (self.phase.sin() * 8000.0) as i16;
            self.samples.extend_from_slice(&[value, value]);
            self.phase = (self.phase + step) % TAU;
        }
        output.write_samples_i16(&self.samples);

        if process_video {
            self.draw();
            output
                .submit_video(&self.pixels)
                .map_err(|err| ConnectorError::Fault(err.to_string()))?;
        }
        Ok(())
    }

    fn start(&mut self) {
        info!("Connecteur synthétique démarré");
    }

    fn stop(&mut self) {
        info!("Connecteur synthétique arrêté");
    }
}

/// Sortie d'affichage qui se contente de compter les images
#[derive(Default)]
struct CountingSink {
    frames: AtomicU64,
}

impl DisplaySink for CountingSink {
    fn display(&self, _frame: &Arc<VideoFrame>) {
        self.frames.fetch_add(1, Ordering::Relaxed);
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    println!("🎮 Pixel Emu Core v{}", VERSION);
    println!("================================");

    let config = match std::env::args().nth(1) {
        Some(path) => EmulatorConfig::load_from_file(&path)?,
        None => EmulatorConfig::default(),
    };
    let seconds: u64 = std::env::args()
        .nth(2)
        .and_then(|value| value.parse().ok())
        .unwrap_or(3);

    let device: Box<dyn AudioOutputDevice> = match CpalOutput::new() {
        Ok(output) => Box::new(output),
        Err(err) => {
            warn!("Sortie audio indisponible ({}), passage en mode sans son", err);
            let (output, _handle) = HeadlessOutput::new(AudioFormat::pcm_f32(48000, 2));
            Box::new(output)
        }
    };

    let pump = FramePump::new(
        Box::new(SyntheticConnector::new()),
        device,
        Arc::new(SystemEnvironment),
        Arc::new(MonotonicClock::new()),
        &config,
    )?;

    let sink = Arc::new(CountingSink::default());
    let sink_id = pump.video().add_sink(sink.clone());

    if !pump.start() {
        anyhow::bail!("Impossible de démarrer l'émulation");
    }

    for second in 1..=seconds {
        thread::sleep(Duration::from_secs(1));
        let stats = pump.audio().ring_buffer();
        println!(
            "  {}s: {} trames, {} images affichées, {:?}, sous-alimentations audio: {}",
            second,
            pump.frames_executed(),
            sink.frames.load(Ordering::Relaxed),
            pump.audio().stream_state(),
            stats.stats().underruns()
        );
    }

    pump.stop();
    pump.video().remove_sink(sink_id);

    if let Some(snapshot) = pump.video().snapshot() {
        println!("  Dernière image: {}x{}", snapshot.width(), snapshot.height());
    }

    for event in pump.events().try_iter() {
        info!("Événement: {:?}", event);
    }

    println!("✅ Session terminée");
    Ok(())
}
