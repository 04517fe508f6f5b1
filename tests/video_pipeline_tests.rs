//! Tests du pipeline vidéo : conversion, recadrage et publication

use pixel_emu_core::*;

use crossbeam::channel::{self, Receiver};
use parking_lot::Mutex;
use std::sync::Arc;

/// Sortie qui mémorise les numéros d'images reçues
#[derive(Default)]
struct RecordingSink {
    sequences: Mutex<Vec<u64>>,
}

impl DisplaySink for RecordingSink {
    fn display(&self, frame: &Arc<VideoFrame>) {
        self.sequences.lock().push(frame.sequence);
    }
}

/// Sortie qui bloque le thread de rendu jusqu'à autorisation
struct GatedSink {
    gate: Receiver<()>,
    displayed: Mutex<usize>,
}

impl DisplaySink for GatedSink {
    fn display(&self, _frame: &Arc<VideoFrame>) {
        let _ = self.gate.recv();
        *self.displayed.lock() += 1;
    }
}

fn split_screen_rgba() -> (VideoFormat, Vec<u8>) {
    let format = VideoFormat::new(PixelFormat::Rgba8, 256, 384);
    let mut pixels = Vec::with_capacity(format.buffer_size());
    for row in 0..384 {
        let color: [u8; 4] = if row < 192 {
            [255, 0, 0, 0]
        } else {
            [0, 0, 255, 0]
        };
        for _ in 0..256 {
            pixels.extend_from_slice(&color);
        }
    }
    (format, pixels)
}

/// Test du recadrage sur l'écran du haut d'une image 256x384
#[test]
fn test_viewport_crop_top_screen() {
    let viewport = Viewport::new(0, 0, 256, 192);
    assert_eq!(viewport.flipped(384).y, 384 - 192 - 0);

    let (format, pixels) = split_screen_rgba();
    let pipeline = VideoPipeline::new(format, &VideoConfig::default()).unwrap();
    pipeline.set_viewport(Some(viewport)).unwrap();
    pipeline.submit_frame(&pixels).unwrap();

    assert!(pipeline.render());
    pipeline.wait_for_render();

    let snapshot = pipeline.snapshot().unwrap();
    assert_eq!(snapshot.dimensions(), (256, 192));
    assert!(snapshot.pixels().all(|pixel| pixel.0 == [255, 0, 0, 255]));
}

/// Test du recadrage sur l'écran du bas
#[test]
fn test_viewport_crop_bottom_screen() {
    let (format, pixels) = split_screen_rgba();
    let config = VideoConfig {
        viewport: Some([0, 192, 256, 192]),
        ..VideoConfig::default()
    };
    let pipeline = VideoPipeline::new(format, &config).unwrap();
    pipeline.submit_frame(&pixels).unwrap();

    let frame = pipeline.process_frame().unwrap();
    assert_eq!((frame.width, frame.height), (256, 192));
    match &frame.content {
        FrameContent::Bgra(bgra) => {
            assert!(bgra.chunks_exact(4).all(|pixel| pixel == [255, 0, 0, 255]));
        }
        other => panic!("contenu inattendu: {:?}", other),
    }
}

/// Test de la conversion RGB565 et du canal alpha forcé
#[test]
fn test_rgb565_snapshot_is_opaque() {
    let format = VideoFormat::new(PixelFormat::Rgb565, 2, 1);
    let pipeline = VideoPipeline::new(format, &VideoConfig::default()).unwrap();
    let pixels: Vec<u8> = [0x07E0u16, 0xFFFF]
        .iter()
        .flat_map(|value| value.to_le_bytes())
        .collect();
    pipeline.submit_frame(&pixels).unwrap();

    assert!(pipeline.snapshot().is_none());
    assert!(pipeline.render());
    pipeline.wait_for_render();

    let snapshot = pipeline.snapshot().unwrap();
    assert_eq!(snapshot.get_pixel(0, 0).0, [0, 255, 0, 255]);
    assert_eq!(snapshot.get_pixel(1, 0).0, [255, 255, 255, 255]);
}

/// Test « dernière image gagnante » : rien n'est mis en file
#[test]
fn test_render_drops_frames_while_busy() {
    let format = VideoFormat::new(PixelFormat::Bgra8, 4, 4);
    let pipeline = VideoPipeline::new(format, &VideoConfig::default()).unwrap();
    let (open, gate) = channel::unbounded();
    let sink = Arc::new(GatedSink {
        gate,
        displayed: Mutex::new(0),
    });
    pipeline.add_sink(sink.clone());
    pipeline.submit_frame(&[0u8; 64]).unwrap();

    assert!(pipeline.render());
    // Le thread de rendu est bloqué dans la sortie
    assert!(!pipeline.render());
    assert!(!pipeline.render());

    open.send(()).unwrap();
    pipeline.wait_for_render();
    assert_eq!(*sink.displayed.lock(), 1);

    assert!(pipeline.render());
    open.send(()).unwrap();
    pipeline.wait_for_render();
    assert_eq!(*sink.displayed.lock(), 2);
}

/// Test d'inscription et de désinscription des sorties
#[test]
fn test_sink_registration() {
    let format = VideoFormat::new(PixelFormat::Bgra8, 1, 1);
    let pipeline = VideoPipeline::new(format, &VideoConfig::default()).unwrap();
    let first = Arc::new(RecordingSink::default());
    let second = Arc::new(RecordingSink::default());

    let first_id = pipeline.add_sink(first.clone());
    pipeline.add_sink(second.clone());
    pipeline.submit_frame(&[1, 2, 3, 4]).unwrap();

    assert!(pipeline.render());
    pipeline.wait_for_render();

    assert!(pipeline.remove_sink(first_id));
    assert!(pipeline.render());
    pipeline.wait_for_render();

    assert_eq!(first.sequences.lock().len(), 1);
    assert_eq!(second.sequences.lock().len(), 2);
    assert_eq!(pipeline.sink_count(), 1);
}

/// Test de la stratégie texture : pas de copie, pas de vignette
#[test]
fn test_texture_frames_have_no_snapshot() {
    let format = VideoFormat::new(PixelFormat::Texture, 400, 480);
    let pipeline = VideoPipeline::new(format, &VideoConfig::default()).unwrap();
    assert_eq!(pipeline.capabilities(), VideoCapabilities::GPU_TEXTURE);
    assert!(pipeline.submit_frame(&[0u8; 4]).is_err());

    pipeline.submit_texture(TextureHandle(42)).unwrap();
    assert!(pipeline.render());
    pipeline.wait_for_render();

    let displayed = pipeline.last_displayed().unwrap();
    assert!(matches!(
        displayed.content,
        FrameContent::Texture {
            handle: TextureHandle(42),
            ..
        }
    ));
    assert!(pipeline.snapshot().is_none());
}
