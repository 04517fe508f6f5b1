//! Sorties d'affichage abonnées au pipeline vidéo

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::processor::VideoFrame;

/// Destinataire des images publiées
///
/// Appelé depuis le thread de rendu ; la présentation (vsync, etc.) reste à
/// la charge de la sortie.
pub trait DisplaySink: Send + Sync {
    fn display(&self, frame: &Arc<VideoFrame>);
}

/// Identifiant rendu à l'enregistrement, à présenter pour se désinscrire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkId(u64);

/// Ensemble des sorties enregistrées
#[derive(Default)]
pub struct SinkRegistry {
    next_id: AtomicU64,
    sinks: RwLock<Vec<(SinkId, Arc<dyn DisplaySink>)>>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, sink: Arc<dyn DisplaySink>) -> SinkId {
        let id = SinkId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.sinks.write().push((id, sink));
        id
    }

    /// Retire une sortie ; `false` si l'identifiant est inconnu
    pub fn remove(&self, id: SinkId) -> bool {
        let mut sinks = self.sinks.write();
        let before = sinks.len();
        sinks.retain(|(sink_id, _)| *sink_id != id);
        sinks.len() != before
    }

    pub fn len(&self) -> usize {
        self.sinks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn publish(&self, frame: &Arc<VideoFrame>) {
        for (_, sink) in self.sinks.read().iter() {
            sink.display(frame);
        }
    }
}
