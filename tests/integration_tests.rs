//! Tests d'intégration : configuration, registre des cœurs et session complète

use pixel_emu_core::*;

use std::sync::Arc;
use tempfile::tempdir;

struct SilentConnector;

impl EmulatorConnector for SilentConnector {
    fn frame_duration(&self) -> f64 {
        1.0 / 60.0
    }

    fn audio_format(&self) -> AudioFormat {
        AudioFormat::pcm_i16(32768, 2)
    }

    fn video_format(&self) -> VideoFormat {
        VideoFormat::new(PixelFormat::Rgb565, 240, 160)
    }

    fn run_frame(&mut self, output: &mut FrameOutput<'_>, process_video: bool) -> Result<(), ConnectorError> {
        output.write_samples_i16(&[0; 1092]);
        if process_video {
            output
                .submit_video(&vec![0; 240 * 160 * 2])
                .map_err(|err| ConnectorError::Fault(err.to_string()))?;
        }
        Ok(())
    }
}

struct TestCore {
    descriptor: CoreDescriptor,
}

impl TestCore {
    fn new(identifier: &str, game_type: &str) -> Arc<Self> {
        Arc::new(Self {
            descriptor: CoreDescriptor {
                name: format!("Cœur {}", game_type),
                identifier: identifier.to_string(),
                game_type: GameType::new(game_type),
                audio_format: AudioFormat::pcm_i16(32768, 2),
                video_format: VideoFormat::new(PixelFormat::Rgb565, 240, 160),
            },
        })
    }
}

impl EmulatorCore for TestCore {
    fn descriptor(&self) -> &CoreDescriptor {
        &self.descriptor
    }

    fn make_connector(&self) -> Box<dyn EmulatorConnector> {
        Box::new(SilentConnector)
    }
}

fn headless() -> Box<dyn AudioOutputDevice> {
    let (output, _handle) = HeadlessOutput::new(AudioFormat::pcm_f32(48000, 2));
    Box::new(output)
}

/// Test de sérialisation de configuration
#[test]
fn test_config_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("session.toml");

    let mut config = EmulatorConfig::default();
    config.audio.follow_mute_switch = false;
    config.video.viewport = Some([0, 0, 256, 192]);
    config.emulation.rate = 1.5;

    config.save_to_file(&path).unwrap();
    let loaded = EmulatorConfig::load_from_file(&path).unwrap();
    assert_eq!(loaded, config);
}

/// Test du repli sur la configuration par défaut
#[test]
fn test_config_load_or_default() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("absent.toml");
    assert_eq!(EmulatorConfig::load_or_default(&missing), EmulatorConfig::default());

    let broken = dir.path().join("broken.toml");
    std::fs::write(&broken, "audio = 3").unwrap();
    assert!(EmulatorConfig::load_from_file(&broken).is_err());
    assert_eq!(EmulatorConfig::load_or_default(&broken), EmulatorConfig::default());
}

/// Test d'enregistrement et de recherche des cœurs
#[test]
fn test_registry_lookup() {
    let mut registry = CoreRegistry::new();
    assert!(registry.is_empty());

    registry.register(TestCore::new("core.gba", "gba"));
    registry.register(TestCore::new("core.nds", "nds"));

    assert_eq!(registry.len(), 2);
    assert_eq!(
        registry.game_types(),
        vec![GameType::new("gba"), GameType::new("nds")]
    );

    let core = registry.core_for(&GameType::new("gba")).unwrap();
    assert_eq!(core.descriptor().identifier, "core.gba");
    assert!(registry.core_for(&GameType::new("3ds")).is_none());
}

/// Test du retrait : seulement le cœur effectivement enregistré
#[test]
fn test_registry_unregister_checks_identity() {
    let mut registry = CoreRegistry::new();
    registry.register(TestCore::new("core.gba", "gba"));

    let impostor = TestCore::new("other.gba", "gba");
    assert!(!registry.unregister(impostor.as_ref()));
    assert!(registry.core_for(&GameType::new("gba")).is_some());

    let registered = TestCore::new("core.gba", "gba");
    assert!(registry.unregister(registered.as_ref()));
    assert!(registry.is_empty());
}

/// Test de création d'une session pour un type inconnu
#[test]
fn test_session_for_unknown_core() {
    let registry = CoreRegistry::new();
    let result = registry.session(
        &GameType::new("gba"),
        headless(),
        Arc::new(SystemEnvironment),
        Arc::new(MonotonicClock::new()),
        &EmulatorConfig::default(),
    );
    assert!(matches!(result, Err(Error::UnknownCore(name)) if name == "gba"));
}

/// Test d'une session complète en temps réel
#[test]
fn test_session_runs_in_real_time() {
    let mut registry = CoreRegistry::new();
    registry.register(TestCore::new("core.gba", "gba"));

    let pump = registry
        .session(
            &GameType::new("gba"),
            headless(),
            Arc::new(SystemEnvironment),
            Arc::new(MonotonicClock::new()),
            &EmulatorConfig::default(),
        )
        .unwrap();

    assert!(pump.start());
    std::thread::sleep(std::time::Duration::from_millis(200));
    assert!(pump.stop());

    // Environ 12 trames en 200 ms à 60 Hz
    let frames = pump.frames_executed();
    assert!((4..=40).contains(&frames), "trames exécutées: {}", frames);

    pump.video().wait_for_render();
    let snapshot = pump.video().snapshot().unwrap();
    assert_eq!(snapshot.dimensions(), (240, 160));
}

/// Test d'une session refusant un viewport hors de l'image
#[test]
fn test_session_rejects_invalid_viewport() {
    let mut registry = CoreRegistry::new();
    registry.register(TestCore::new("core.gba", "gba"));

    let mut config = EmulatorConfig::default();
    config.video.viewport = Some([0, 0, 256, 192]);

    let result = registry.session(
        &GameType::new("gba"),
        headless(),
        Arc::new(SystemEnvironment),
        Arc::new(MonotonicClock::new()),
        &config,
    );
    assert!(matches!(
        result,
        Err(Error::Video(VideoError::InvalidViewport { .. }))
    ));
}
