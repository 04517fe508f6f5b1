//! Boucle d'émulation cadencée sur l'horloge murale
//!
//! Un thread dédié exécute une trame native par itération, décide du rendu
//! vidéo, rattrape le retard éventuel puis attend l'échéance suivante. Les
//! transitions d'état (`start`, `stop`, `pause`, `resume`) sont sérialisées
//! et attendent la fin de l'itération en cours avant de rendre la main.

pub mod clock;
pub mod timing;

pub use clock::{Clock, MonotonicClock};
pub use timing::{frames_to_skip, FrameTiming, MAX_FRAMES_TO_SKIP, SCREEN_REFRESH_PERIOD};

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::atomic::AtomicCell;
use crossbeam::channel::{self, Receiver, Sender};
use log::{debug, error, info, warn};
use parking_lot::Mutex;

use crate::audio::{AudioEnvironment, AudioOutputDevice, AudioPipeline};
use crate::config::{EmulationConfig, EmulatorConfig};
use crate::connector::{EmulatorConnector, FrameOutput};
use crate::error::{ConnectorError, Error, Result};
use crate::video::VideoPipeline;

/// État de la boucle d'émulation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PumpState {
    Stopped,
    Running,
    Paused,
}

/// Événements publiés sur le canal de la boucle
#[derive(Debug, Clone, PartialEq)]
pub enum PumpEvent {
    /// Transition d'état réussie
    StateChanged(PumpState),

    /// Le connecteur (ou le pipeline audio) a échoué ; la boucle est arrêtée
    Faulted(String),

    /// Le connecteur a demandé l'arrêt
    Quit,
}

/// Appelé après chaque trame exécutée avec le nombre total de trames
pub type FrameObserver = Box<dyn FnMut(u64) + Send>;

/// Réglages de cadence
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PumpSettings {
    pub refresh_period: f64,
    pub max_frames_to_skip: u32,
}

impl Default for PumpSettings {
    fn default() -> Self {
        Self {
            refresh_period: SCREEN_REFRESH_PERIOD,
            max_frames_to_skip: MAX_FRAMES_TO_SKIP,
        }
    }
}

impl From<&EmulationConfig> for PumpSettings {
    fn from(config: &EmulationConfig) -> Self {
        Self {
            refresh_period: config.screen_refresh_period(),
            max_frames_to_skip: config.max_frames_to_skip,
        }
    }
}

/// État partagé entre la boucle et les appelants
struct PumpShared {
    state: AtomicCell<PumpState>,
    rate: AtomicCell<f64>,
    connector: Mutex<Box<dyn EmulatorConnector>>,
    audio: Arc<AudioPipeline>,
    video: Arc<VideoPipeline>,
    clock: Arc<dyn Clock>,
    settings: PumpSettings,
    events: Sender<PumpEvent>,
    observer: Mutex<Option<FrameObserver>>,
    frames: AtomicU64,
}

/// Thread de la boucle et signal de fin d'itération
#[derive(Default)]
struct LoopHandle {
    thread: Option<JoinHandle<()>>,
    updates: Option<Receiver<()>>,
}

impl LoopHandle {
    /// Attend qu'une itération signale la prise en compte du nouvel état
    fn wait_for_update(&self) {
        if let Some(updates) = &self.updates {
            // Déconnecté si la boucle s'est déjà terminée
            let _ = updates.recv();
        }
    }

    fn join(&mut self) {
        self.updates = None;
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Le thread d'émulation s'est arrêté en panique");
            }
        }
    }
}

/// Boucle d'émulation d'une session
pub struct FramePump {
    shared: Arc<PumpShared>,

    /// Une seule transition à la fois
    transition: Mutex<LoopHandle>,

    events: Receiver<PumpEvent>,
}

impl FramePump {
    /// Construit la session : pipelines audio et vidéo dérivés du connecteur
    pub fn new(
        connector: Box<dyn EmulatorConnector>,
        device: Box<dyn AudioOutputDevice>,
        environment: Arc<dyn AudioEnvironment>,
        clock: Arc<dyn Clock>,
        config: &EmulatorConfig,
    ) -> Result<Self> {
        let audio = AudioPipeline::new(connector.audio_format(), device, environment, &config.audio)?;
        let video = VideoPipeline::new(connector.video_format(), &config.video)?;

        let pump = Self::with_pipelines(
            connector,
            Arc::new(audio),
            Arc::new(video),
            clock,
            PumpSettings::from(&config.emulation),
        );
        pump.set_rate(config.emulation.rate);
        Ok(pump)
    }

    /// Construit la boucle autour de pipelines existants
    pub fn with_pipelines(
        connector: Box<dyn EmulatorConnector>,
        audio: Arc<AudioPipeline>,
        video: Arc<VideoPipeline>,
        clock: Arc<dyn Clock>,
        settings: PumpSettings,
    ) -> Self {
        let (sender, events) = channel::unbounded();

        Self {
            shared: Arc::new(PumpShared {
                state: AtomicCell::new(PumpState::Stopped),
                rate: AtomicCell::new(1.0),
                connector: Mutex::new(connector),
                audio,
                video,
                clock,
                settings,
                events: sender,
                observer: Mutex::new(None),
                frames: AtomicU64::new(0),
            }),
            transition: Mutex::new(LoopHandle::default()),
            events,
        }
    }

    pub fn state(&self) -> PumpState {
        self.shared.state.load()
    }

    pub fn rate(&self) -> f64 {
        self.shared.rate.load()
    }

    /// Change la vitesse d'émulation ; la vitesse audio suit
    pub fn set_rate(&self, rate: f64) -> bool {
        if !(rate.is_finite() && rate > 0.0) {
            warn!("Vitesse d'émulation invalide ignorée: {}", rate);
            return false;
        }

        self.shared.rate.store(rate);
        self.shared.audio.set_rate(rate);
        true
    }

    pub fn audio(&self) -> &Arc<AudioPipeline> {
        &self.shared.audio
    }

    pub fn video(&self) -> &Arc<VideoPipeline> {
        &self.shared.video
    }

    /// Canal des événements de la session
    pub fn events(&self) -> Receiver<PumpEvent> {
        self.events.clone()
    }

    pub fn set_frame_observer(&self, observer: Option<FrameObserver>) {
        *self.shared.observer.lock() = observer;
    }

    /// Trames exécutées depuis la création, sautées comprises
    pub fn frames_executed(&self) -> u64 {
        self.shared.frames.load(Ordering::Relaxed)
    }

    pub fn start(&self) -> bool {
        let mut handle = self.transition.lock();
        if self.state() != PumpState::Stopped {
            return false;
        }

        // Reliquat d'une session interrompue par une défaillance
        handle.join();

        self.shared.state.store(PumpState::Running);

        if let Err(err) = self.shared.audio.start() {
            error!("Impossible de démarrer l'audio: {}", err);
            self.shared.state.store(PumpState::Stopped);
            return false;
        }
        self.shared.connector.lock().start();

        if !self.spawn_loop(&mut handle, PumpState::Stopped) {
            self.shared.audio.stop();
            self.shared.connector.lock().stop();
            return false;
        }
        handle.wait_for_update();

        // Première trame en échec : la session est déjà arrêtée
        if self.state() != PumpState::Running {
            return false;
        }

        self.notify(PumpState::Running);
        true
    }

    pub fn stop(&self) -> bool {
        let mut handle = self.transition.lock();
        let previous = self.state();
        if previous == PumpState::Stopped {
            return false;
        }

        self.shared.state.store(PumpState::Stopped);
        if previous == PumpState::Running {
            handle.wait_for_update();
        }
        handle.join();

        self.shared.audio.stop();
        self.shared.connector.lock().stop();

        self.notify(PumpState::Stopped);
        true
    }

    pub fn pause(&self) -> bool {
        let mut handle = self.transition.lock();
        if self.state() != PumpState::Running {
            return false;
        }

        self.shared.state.store(PumpState::Paused);
        handle.wait_for_update();
        handle.join();

        self.shared.audio.set_enabled(false);
        self.shared.connector.lock().pause();

        self.notify(PumpState::Paused);
        true
    }

    /// Reprend l'émulation avec l'audio réactivé
    pub fn resume(&self) -> bool {
        self.resume_with_audio(true)
    }

    /// Reprend l'émulation ; l'appelant décide si l'audio est réactivé
    pub fn resume_with_audio(&self, prefers_audio: bool) -> bool {
        let mut handle = self.transition.lock();
        if self.state() != PumpState::Paused {
            return false;
        }

        self.shared.state.store(PumpState::Running);
        self.shared.audio.set_enabled(prefers_audio);
        self.shared.connector.lock().resume();

        if !self.spawn_loop(&mut handle, PumpState::Paused) {
            self.shared.state.store(PumpState::Paused);
            return false;
        }
        handle.wait_for_update();

        // Première trame en échec : la session est déjà arrêtée
        if self.state() != PumpState::Running {
            return false;
        }

        self.notify(PumpState::Running);
        true
    }

    fn spawn_loop(&self, handle: &mut LoopHandle, previous: PumpState) -> bool {
        let (updates, receiver) = channel::bounded(1);
        let shared = Arc::clone(&self.shared);

        let spawned = thread::Builder::new()
            .name("pixel-emulation".into())
            .spawn(move || shared.run_loop(previous, updates));

        match spawned {
            Ok(thread) => {
                handle.thread = Some(thread);
                handle.updates = Some(receiver);
                true
            }
            Err(err) => {
                error!("Impossible de démarrer le thread d'émulation: {}", err);
                self.shared.state.store(PumpState::Stopped);
                false
            }
        }
    }

    fn notify(&self, state: PumpState) {
        info!("Émulation: {:?}", state);
        let _ = self.shared.events.send(PumpEvent::StateChanged(state));
    }
}

impl Drop for FramePump {
    fn drop(&mut self) {
        self.stop();
    }
}

impl PumpShared {
    fn run_loop(&self, mut previous: PumpState, updates: Sender<()>) {
        debug!("Boucle d'émulation démarrée");

        let mut timing = FrameTiming::new(self.settings.refresh_period, self.settings.max_frames_to_skip);
        timing.reset(self.clock.now());

        loop {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.tick(&mut timing)));
            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(err),
                Err(_) => Some(Error::Connector(ConnectorError::Fault(
                    "panique pendant l'exécution d'une trame".to_string(),
                ))),
            };

            if let Some(failure) = failure {
                self.fail(failure);
                let _ = updates.try_send(());
                break;
            }

            let state = self.state.load();
            if state != previous {
                let _ = updates.try_send(());
                previous = state;
            }

            if state != PumpState::Running {
                break;
            }

            self.clock.wait_until(timing.deadline());
        }

        debug!("Boucle d'émulation terminée");
    }

    fn tick(&self, timing: &mut FrameTiming) -> Result<()> {
        let mut connector = self.connector.lock();
        let rate = self.rate.load();

        let native_duration = connector.frame_duration();
        let frame_duration = native_duration / rate;
        if timing.update_frame_duration(frame_duration) {
            self.clock.set_period_hint(frame_duration);
        }

        self.audio.sync_format(connector.audio_format(), native_duration)?;

        let render = timing.should_render();
        self.run_frame(&mut **connector, render)?;
        timing.advance();

        let skipped = timing.catch_up(self.clock.now(), rate);
        for _ in 0..skipped {
            self.run_frame(&mut **connector, false)?;
        }

        Ok(())
    }

    fn run_frame(&self, connector: &mut dyn EmulatorConnector, render: bool) -> Result<()> {
        let mut output = FrameOutput::new(self.audio.ring_buffer(), &self.video);
        connector.run_frame(&mut output, render)?;

        if render {
            self.video.render();
        }

        let frames = self.frames.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(observer) = self.observer.lock().as_mut() {
            observer(frames);
        }
        Ok(())
    }

    /// Arrêt définitif de la session après une erreur de trame
    fn fail(&self, failure: Error) {
        let event = match &failure {
            Error::Connector(ConnectorError::Quit) => {
                info!("Le connecteur a quitté l'émulation");
                PumpEvent::Quit
            }
            other => {
                error!("Émulation interrompue: {}", other);
                PumpEvent::Faulted(other.to_string())
            }
        };

        // Une transition concurrente garde la main sur la suite
        if self
            .state
            .compare_exchange(PumpState::Running, PumpState::Stopped)
            .is_ok()
        {
            self.audio.stop();
            self.connector.lock().stop();
            let _ = self.events.send(PumpEvent::StateChanged(PumpState::Stopped));
        }

        let _ = self.events.send(event);
    }
}
