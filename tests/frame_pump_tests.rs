//! Tests de la boucle d'émulation avec une horloge simulée

use pixel_emu_core::*;

use crossbeam::channel::Receiver;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Horloge qui avance instantanément jusqu'à chaque échéance
///
/// Chaque attente est journalisée avec le nombre de trames exécutées à cet
/// instant, ce qui donne le nombre de trames par tour de boucle.
struct ManualClock {
    now: Mutex<f64>,
    hints: Mutex<Vec<f64>>,
    waits: Mutex<Vec<(f64, u64)>>,
    recorder: Arc<Recorder>,
}

impl ManualClock {
    fn new(recorder: Arc<Recorder>) -> Self {
        Self {
            now: Mutex::new(0.0),
            hints: Mutex::new(Vec::new()),
            waits: Mutex::new(Vec::new()),
            recorder,
        }
    }

    /// Fait sauter le temps d'un coup, comme après une suspension du processus
    fn jump(&self, seconds: f64) -> f64 {
        let mut now = self.now.lock();
        *now += seconds;
        *now
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        *self.now.lock()
    }

    fn wait_until(&self, deadline: f64) {
        {
            let mut now = self.now.lock();
            if deadline > *now {
                *now = deadline;
            }
        }
        let frames = self.recorder.frames.load(Ordering::SeqCst);
        self.waits.lock().push((deadline, frames));
        thread::sleep(Duration::from_millis(1));
    }

    fn set_period_hint(&self, period: f64) {
        self.hints.lock().push(period);
    }
}

/// Observations partagées avec le connecteur de test
#[derive(Default)]
struct Recorder {
    frames: AtomicU64,
    rendered: AtomicU64,
    skipped: AtomicU64,
    calls: Mutex<Vec<&'static str>>,
    fail_after: Mutex<Option<u64>>,
    quit: AtomicBool,
}

struct RecordingConnector {
    recorder: Arc<Recorder>,
}

impl EmulatorConnector for RecordingConnector {
    fn frame_duration(&self) -> f64 {
        1.0 / 60.0
    }

    fn audio_format(&self) -> AudioFormat {
        AudioFormat::pcm_i16(32768, 2)
    }

    fn video_format(&self) -> VideoFormat {
        VideoFormat::new(PixelFormat::Rgb565, 4, 4)
    }

    fn run_frame(&mut self, output: &mut FrameOutput<'_>, process_video: bool) -> Result<(), ConnectorError> {
        let frame = self.recorder.frames.fetch_add(1, Ordering::SeqCst) + 1;

        if self.recorder.quit.load(Ordering::SeqCst) {
            return Err(ConnectorError::Quit);
        }
        if matches!(*self.recorder.fail_after.lock(), Some(limit) if frame > limit) {
            return Err(ConnectorError::Fault("bus error".to_string()));
        }

        output.write_samples_i16(&[0; 1092]);
        if !process_video {
            self.recorder.skipped.fetch_add(1, Ordering::SeqCst);
        }
        if process_video {
            self.recorder.rendered.fetch_add(1, Ordering::SeqCst);
            output
                .submit_video(&[0xFF; 32])
                .map_err(|err| ConnectorError::Fault(err.to_string()))?;
        }
        Ok(())
    }

    fn start(&mut self) {
        self.recorder.calls.lock().push("start");
    }

    fn stop(&mut self) {
        self.recorder.calls.lock().push("stop");
    }

    fn pause(&mut self) {
        self.recorder.calls.lock().push("pause");
    }

    fn resume(&mut self) {
        self.recorder.calls.lock().push("resume");
    }
}

fn session() -> (FramePump, Arc<Recorder>, Arc<ManualClock>, HeadlessHandle) {
    let recorder = Arc::new(Recorder::default());
    let clock = Arc::new(ManualClock::new(recorder.clone()));
    let (device, handle) = HeadlessOutput::new(AudioFormat::pcm_f32(48000, 2));

    let pump = FramePump::new(
        Box::new(RecordingConnector {
            recorder: recorder.clone(),
        }),
        Box::new(device),
        Arc::new(SystemEnvironment),
        clock.clone(),
        &EmulatorConfig::default(),
    )
    .unwrap();

    (pump, recorder, clock, handle)
}

fn wait_for(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    false
}

/// Attend un événement précis, en ignorant les autres
fn wait_for_event(events: &Receiver<PumpEvent>, wanted: impl Fn(&PumpEvent) -> bool) -> Option<PumpEvent> {
    let deadline = Instant::now() + Duration::from_secs(5);
    while let Ok(event) = events.recv_deadline(deadline) {
        if wanted(&event) {
            return Some(event);
        }
    }
    None
}

/// Test de la reprise depuis l'état arrêté : refusée, sans effet
#[test]
fn test_resume_while_stopped_is_noop() {
    let (pump, recorder, _clock, handle) = session();

    assert!(!pump.resume());
    assert!(!pump.pause());
    assert!(!pump.stop());

    assert_eq!(pump.state(), PumpState::Stopped);
    assert!(recorder.calls.lock().is_empty());
    assert_eq!(recorder.frames.load(Ordering::SeqCst), 0);
    assert!(pump.events().try_recv().is_err());
    assert_eq!(handle.connections(), 0);
}

/// Test du double démarrage
#[test]
fn test_start_twice_returns_false() {
    let (pump, recorder, _clock, handle) = session();

    assert!(pump.start());
    assert!(!pump.start());
    assert_eq!(pump.state(), PumpState::Running);
    assert_eq!(*recorder.calls.lock(), vec!["start"]);
    assert!(handle.is_playing());
    assert!(recorder.frames.load(Ordering::SeqCst) >= 1);

    assert!(pump.stop());
}

/// Test du cycle complet des transitions et des effets associés
#[test]
fn test_state_machine_cycle() {
    let (pump, recorder, _clock, handle) = session();
    let events = pump.events();

    assert!(pump.start());
    assert!(wait_for(|| recorder.frames.load(Ordering::SeqCst) >= 3));

    assert!(pump.pause());
    assert_eq!(pump.state(), PumpState::Paused);
    assert!(!pump.audio().is_enabled());
    assert!(!handle.is_playing());

    // Aucune trame ne s'exécute en pause
    let paused_at = recorder.frames.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(20));
    assert_eq!(recorder.frames.load(Ordering::SeqCst), paused_at);

    assert!(pump.resume());
    assert!(pump.audio().is_enabled());
    assert!(wait_for(|| recorder.frames.load(Ordering::SeqCst) > paused_at));

    assert!(pump.stop());
    assert_eq!(pump.state(), PumpState::Stopped);
    assert!(!handle.is_connected());

    assert_eq!(*recorder.calls.lock(), vec!["start", "pause", "resume", "stop"]);

    let received: Vec<PumpEvent> = events.try_iter().collect();
    assert_eq!(
        received,
        vec![
            PumpEvent::StateChanged(PumpState::Running),
            PumpEvent::StateChanged(PumpState::Paused),
            PumpEvent::StateChanged(PumpState::Running),
            PumpEvent::StateChanged(PumpState::Stopped),
        ]
    );
}

/// Test de la reprise sans audio
#[test]
fn test_resume_without_audio() {
    let (pump, _recorder, _clock, _handle) = session();
    assert!(pump.start());
    assert!(pump.pause());

    assert!(pump.resume_with_audio(false));
    assert!(!pump.audio().is_enabled());
    assert_eq!(pump.audio().volume(), 0.0);

    assert!(pump.stop());
}

/// Test de l'arrêt depuis la pause
#[test]
fn test_stop_from_paused() {
    let (pump, recorder, _clock, _handle) = session();
    assert!(pump.start());
    assert!(pump.pause());
    assert!(pump.stop());
    assert!(!pump.resume());
    assert_eq!(*recorder.calls.lock(), vec!["start", "pause", "stop"]);
}

/// Test d'une défaillance du connecteur : arrêt définitif et événement
#[test]
fn test_connector_fault_stops_loop() {
    let (pump, recorder, _clock, handle) = session();
    let events = pump.events();

    assert!(pump.start());
    *recorder.fail_after.lock() = Some(recorder.frames.load(Ordering::SeqCst) + 3);
    let event = wait_for_event(&events, |event| matches!(event, PumpEvent::Faulted(_)));
    assert_eq!(
        event,
        Some(PumpEvent::Faulted("défaillance du connecteur: bus error".to_string()))
    );

    assert_eq!(pump.state(), PumpState::Stopped);
    assert!(!handle.is_connected());
    assert!(!pump.stop());
    assert_eq!(*recorder.calls.lock(), vec!["start", "stop"]);
}

/// Test de la demande d'arrêt émise par le connecteur
#[test]
fn test_connector_quit() {
    let (pump, recorder, _clock, _handle) = session();
    let events = pump.events();

    assert!(pump.start());
    recorder.quit.store(true, Ordering::SeqCst);
    assert_eq!(
        wait_for_event(&events, |event| *event == PumpEvent::Quit),
        Some(PumpEvent::Quit)
    );
    assert_eq!(pump.state(), PumpState::Stopped);

    // La session peut redémarrer
    recorder.quit.store(false, Ordering::SeqCst);
    assert!(pump.start());
    assert!(pump.stop());
}

/// Test du rendu vidéo à chaque trame à 60 Hz et de l'observateur
#[test]
fn test_render_cadence_and_observer() {
    let (pump, recorder, clock, _handle) = session();
    let observed = Arc::new(AtomicU64::new(0));
    let counter = observed.clone();
    pump.set_frame_observer(Some(Box::new(move |frames| {
        counter.store(frames, Ordering::SeqCst);
    })));

    assert!(pump.start());
    assert!(wait_for(|| recorder.frames.load(Ordering::SeqCst) >= 10));
    assert!(pump.stop());

    let frames = recorder.frames.load(Ordering::SeqCst);
    assert_eq!(recorder.rendered.load(Ordering::SeqCst), frames);
    assert_eq!(observed.load(Ordering::SeqCst), frames);
    assert_eq!(pump.frames_executed(), frames);
    assert_eq!(*clock.hints.lock(), vec![1.0 / 60.0]);
}

/// Test de la vitesse d'émulation
#[test]
fn test_rate_changes_frame_period() {
    let (pump, recorder, clock, _handle) = session();

    assert!(!pump.set_rate(0.0));
    assert!(!pump.set_rate(-1.0));
    assert!(pump.set_rate(2.0));
    assert_eq!(pump.audio().rate(), 2.0);

    assert!(pump.start());
    assert!(wait_for(|| recorder.frames.load(Ordering::SeqCst) >= 4));
    assert!(pump.stop());

    assert_eq!(*clock.hints.lock(), vec![1.0 / 120.0]);
    // À 120 Hz, une trame sur deux seulement est rendue
    let frames = recorder.frames.load(Ordering::SeqCst);
    let rendered = recorder.rendered.load(Ordering::SeqCst);
    assert_eq!(rendered, frames / 2);
}

/// Test de la borne du rattrapage après un saut d'une seconde
#[test]
fn test_catch_up_is_bounded() {
    assert_eq!(frames_to_skip(1.0, 0.0, 1.0 / 60.0, MAX_FRAMES_TO_SKIP), 5);

    let mut timing = FrameTiming::default();
    timing.update_frame_duration(1.0 / 60.0);
    timing.reset(0.0);
    timing.advance();
    assert_eq!(timing.catch_up(1.0, 1.0), 5);
    assert_eq!(timing.emulation_time(), 1.0);
}

/// Trames exécutées au tour de boucle qui s'est recalé sur `target`
fn frames_in_catch_up_turn(clock: &ManualClock, target: f64) -> u64 {
    let waits = clock.waits.lock();
    let turn = waits
        .iter()
        .position(|&(deadline, _)| deadline == target)
        .expect("aucune attente recalée sur le nouveau temps");
    assert!(turn > 0);
    waits[turn].1 - waits[turn - 1].1
}

/// Test du rattrapage dans la boucle après un saut d'horloge d'une seconde
#[test]
fn test_clock_jump_runs_bounded_catch_up() {
    let (pump, recorder, clock, _handle) = session();

    assert!(pump.start());
    assert!(wait_for(|| recorder.frames.load(Ordering::SeqCst) >= 3));
    assert_eq!(recorder.skipped.load(Ordering::SeqCst), 0);

    let target = clock.jump(1.0);
    assert!(wait_for(|| clock.waits.lock().iter().any(|&(deadline, _)| deadline >= target)));
    assert!(wait_for(|| recorder.frames.load(Ordering::SeqCst) >= 10));
    assert!(pump.stop());

    // Exactement cinq trames supplémentaires, sans rendu
    assert_eq!(recorder.skipped.load(Ordering::SeqCst), 5);
    assert_eq!(frames_in_catch_up_turn(&clock, target), 6);

    // Le temps virtuel repart du nouvel instant
    let waits = clock.waits.lock();
    assert!(waits.iter().all(|&(deadline, _)| deadline <= target || deadline > target + 1.0 / 120.0));
}

/// Test du saut d'horloge en accéléré : recalage sans trames de rattrapage
#[test]
fn test_clock_jump_at_double_rate_only_resyncs() {
    let (pump, recorder, clock, _handle) = session();
    assert!(pump.set_rate(2.0));

    assert!(pump.start());
    assert!(wait_for(|| recorder.frames.load(Ordering::SeqCst) >= 4));

    let target = clock.jump(1.0);
    assert!(wait_for(|| clock.waits.lock().iter().any(|&(deadline, _)| deadline >= target)));
    assert!(wait_for(|| clock.waits.lock().iter().any(|&(deadline, _)| deadline > target)));
    assert!(pump.stop());

    assert_eq!(frames_in_catch_up_turn(&clock, target), 1);

    // Aucun tour ne dépasse une trame
    let waits = clock.waits.lock();
    for pair in waits.windows(2) {
        assert_eq!(pair[1].1 - pair[0].1, 1);
    }
}
