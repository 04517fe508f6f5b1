//! Pipeline vidéo : conversion des images du cœur et publication
//!
//! Le thread d'émulation soumet les pixels (ou la texture) puis appelle
//! [`VideoPipeline::render`]. La conversion se fait sur le thread appelant,
//! la remise aux sorties sur le thread de rendu. Si ce dernier est encore
//! occupé, la nouvelle image est abandonnée : jamais de file d'attente.

mod format;
pub mod processor;
pub mod render_thread;
pub mod sink;

pub use format::{PixelFormat, VideoFormat, Viewport};
pub use processor::{
    convert_to_bgra, FrameContent, TextureHandle, VideoCapabilities, VideoFrame, VideoProcessor,
};
pub use render_thread::RenderWorker;
pub use sink::{DisplaySink, SinkId, SinkRegistry};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use image::RgbaImage;
use log::{info, warn};
use parking_lot::Mutex;

use crate::config::VideoConfig;
use crate::error::VideoError;

struct VideoState {
    processor: VideoProcessor,

    /// Zone affichée, vide pour l'image entière
    viewport: Viewport,
}

/// Pipeline vidéo d'une session
pub struct VideoPipeline {
    state: Mutex<VideoState>,
    enabled: AtomicBool,
    sequence: AtomicU64,

    sinks: Arc<SinkRegistry>,

    /// Dernière image effectivement remise aux sorties
    displayed: Arc<Mutex<Option<Arc<VideoFrame>>>>,

    worker: RenderWorker,
}

impl VideoPipeline {
    pub fn new(format: VideoFormat, config: &VideoConfig) -> Result<Self, VideoError> {
        let viewport = match config.viewport() {
            Some(viewport) => {
                viewport.validate(&format)?;
                viewport
            }
            None => Viewport::default(),
        };

        let sinks = Arc::new(SinkRegistry::new());
        let displayed = Arc::new(Mutex::new(None));
        let worker = RenderWorker::spawn(Arc::clone(&sinks), Arc::clone(&displayed))?;

        info!(
            "Pipeline vidéo: {}x{} {:?}",
            format.width, format.height, format.pixel_format
        );

        Ok(Self {
            state: Mutex::new(VideoState {
                processor: VideoProcessor::new(format),
                viewport,
            }),
            enabled: AtomicBool::new(config.enabled),
            sequence: AtomicU64::new(0),
            sinks,
            displayed,
            worker,
        })
    }

    pub fn format(&self) -> VideoFormat {
        self.state.lock().processor.format()
    }

    pub fn capabilities(&self) -> VideoCapabilities {
        self.state.lock().processor.capabilities()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Désactivé, le pipeline ignore `process_frame` et `render`
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Copie une image brute dans le tampon de préparation
    pub fn submit_frame(&self, pixels: &[u8]) -> Result<(), VideoError> {
        self.state.lock().processor.submit_pixels(pixels)
    }

    /// Signale que le connecteur a mis à jour sa texture
    pub fn submit_texture(&self, handle: TextureHandle) -> Result<(), VideoError> {
        self.state.lock().processor.submit_texture(handle)
    }

    /// Convertit le contenu soumis en image affichable
    pub fn process_frame(&self) -> Option<Arc<VideoFrame>> {
        if !self.is_enabled() {
            return None;
        }

        let state = self.state.lock();
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        state
            .processor
            .process(state.viewport, sequence)
            .map(Arc::new)
    }

    /// Traite et publie la dernière image, sans jamais bloquer
    ///
    /// Retourne `false` si l'image a été abandonnée (thread de rendu occupé,
    /// pipeline désactivé ou rien à afficher).
    pub fn render(&self) -> bool {
        if !self.is_enabled() {
            return false;
        }

        let Some(slot) = self.worker.try_acquire() else {
            return false;
        };

        match self.process_frame() {
            Some(frame) => slot.publish(frame),
            None => false,
        }
    }

    /// Attend que le thread de rendu ait fini la publication en cours
    pub fn wait_for_render(&self) {
        self.worker.wait_idle();
    }

    pub fn add_sink(&self, sink: Arc<dyn DisplaySink>) -> SinkId {
        self.sinks.add(sink)
    }

    pub fn remove_sink(&self, id: SinkId) -> bool {
        self.sinks.remove(id)
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    pub fn viewport(&self) -> Option<Viewport> {
        let viewport = self.state.lock().viewport;
        (!viewport.is_empty()).then_some(viewport)
    }

    /// Change la zone affichée ; `None` revient à l'image entière
    pub fn set_viewport(&self, viewport: Option<Viewport>) -> Result<(), VideoError> {
        let mut state = self.state.lock();
        let viewport = viewport.unwrap_or_default();
        if !viewport.is_empty() {
            viewport.validate(&state.processor.format())?;
        }
        state.viewport = viewport;
        Ok(())
    }

    /// Remplace la stratégie de traitement pour un nouveau format
    pub fn reconfigure(&self, format: VideoFormat) {
        let mut state = self.state.lock();
        if state.processor.format() == format {
            return;
        }

        if !state.viewport.is_empty() && state.viewport.validate(&format).is_err() {
            warn!("Viewport {:?} abandonné: hors du nouveau format", state.viewport);
            state.viewport = Viewport::default();
        }

        state.processor = VideoProcessor::new(format);
        info!(
            "Pipeline vidéo reconfiguré: {}x{} {:?}",
            format.width, format.height, format.pixel_format
        );
    }

    /// Dernière image affichée
    pub fn last_displayed(&self) -> Option<Arc<VideoFrame>> {
        self.displayed.lock().clone()
    }

    /// Copie RGBA de la dernière image affichée, pour les vignettes
    ///
    /// `None` si rien n'a encore été affiché ou si l'image est une texture.
    pub fn snapshot(&self) -> Option<RgbaImage> {
        self.last_displayed()?.to_rgba_image()
    }
}
