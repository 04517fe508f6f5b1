//! Thread de rendu : publie la dernière image traitée aux sorties
//!
//! Un seul jeton « libre » circule entre le producteur et le thread. Sans
//! jeton, le thread est occupé et l'image est abandonnée.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender, TryRecvError};
use log::{debug, error};
use parking_lot::Mutex;

use super::processor::VideoFrame;
use super::sink::SinkRegistry;
use crate::error::VideoError;

pub struct RenderWorker {
    frames: Option<Sender<Arc<VideoFrame>>>,
    idle: Receiver<()>,
    idle_token: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl RenderWorker {
    /// Démarre le thread ; `displayed` reçoit chaque image publiée
    pub fn spawn(
        sinks: Arc<SinkRegistry>,
        displayed: Arc<Mutex<Option<Arc<VideoFrame>>>>,
    ) -> Result<Self, VideoError> {
        let (frames, inbox) = channel::bounded::<Arc<VideoFrame>>(1);
        let (idle_token, idle) = channel::bounded::<()>(1);

        idle_token
            .send(())
            .map_err(|err| VideoError::RenderThread(err.to_string()))?;

        let done = idle_token.clone();
        let thread = thread::Builder::new()
            .name("pixel-render".into())
            .spawn(move || {
                debug!("Thread de rendu démarré");
                for frame in inbox {
                    sinks.publish(&frame);
                    *displayed.lock() = Some(frame);
                    if done.send(()).is_err() {
                        break;
                    }
                }
                debug!("Thread de rendu terminé");
            })
            .map_err(|err| VideoError::RenderThread(err.to_string()))?;

        Ok(Self {
            frames: Some(frames),
            idle,
            idle_token,
            thread: Some(thread),
        })
    }

    /// Réserve le thread s'il est libre, sans attendre
    pub fn try_acquire(&self) -> Option<RenderSlot<'_>> {
        match self.idle.try_recv() {
            Ok(()) => Some(RenderSlot {
                worker: self,
                used: false,
            }),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Publie `frame` si le thread est libre ; sinon l'image est abandonnée
    pub fn try_publish(&self, frame: Arc<VideoFrame>) -> bool {
        match self.try_acquire() {
            Some(slot) => slot.publish(frame),
            None => false,
        }
    }

    /// Attend la fin de la publication en cours
    pub fn wait_idle(&self) {
        if self.idle.recv().is_ok() {
            let _ = self.idle_token.try_send(());
        }
    }

    pub fn is_busy(&self) -> bool {
        self.idle.is_empty()
    }
}

impl Drop for RenderWorker {
    fn drop(&mut self) {
        self.frames.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Le thread de rendu s'est arrêté en panique");
            }
        }
    }
}

/// Thread de rendu réservé ; rendu libre s'il n'est pas utilisé
pub struct RenderSlot<'a> {
    worker: &'a RenderWorker,
    used: bool,
}

impl RenderSlot<'_> {
    pub fn publish(mut self, frame: Arc<VideoFrame>) -> bool {
        let sent = match &self.worker.frames {
            Some(frames) => frames.send(frame).is_ok(),
            None => false,
        };
        self.used = sent;
        sent
    }
}

impl Drop for RenderSlot<'_> {
    fn drop(&mut self) {
        if !self.used {
            let _ = self.worker.idle_token.try_send(());
        }
    }
}
