//! Périphériques de sortie audio
//!
//! Le pipeline ne connaît qu'[`AudioOutputDevice`]. [`CpalOutput`] pilote la
//! carte son via cpal depuis un thread dédié (les flux cpal ne sont pas
//! transférables entre threads sur toutes les plateformes). [`HeadlessOutput`]
//! n'a pas de matériel : l'appelant tire lui-même les échantillons.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use crossbeam::channel::{self, Receiver, Sender};
use log::{debug, error, info};
use parking_lot::Mutex;

use super::format::AudioFormat;
use crate::error::AudioError;

/// Callback de rendu : remplit un tampon entrelacé au format de sortie
pub type RenderCallback = Box<dyn FnMut(&mut [f32]) + Send + 'static>;

/// Périphérique de sortie vu par le pipeline audio
pub trait AudioOutputDevice: Send {
    /// Format flottant natif de la sortie courante
    fn output_format(&mut self) -> Result<AudioFormat, AudioError>;

    /// Remplace le graphe de sortie par un nouveau callback
    ///
    /// L'ancien flux est arrêté et son dernier callback terminé avant le retour.
    fn connect(&mut self, format: AudioFormat, render: RenderCallback) -> Result<(), AudioError>;

    fn play(&mut self) -> Result<(), AudioError>;

    fn pause(&mut self) -> Result<(), AudioError>;

    /// Détruit le flux courant ; aucun callback ne tourne après le retour
    fn disconnect(&mut self);
}

enum Command {
    Query(Sender<Result<AudioFormat, AudioError>>),
    Connect {
        format: AudioFormat,
        render: RenderCallback,
        reply: Sender<Result<(), AudioError>>,
    },
    Play(Sender<Result<(), AudioError>>),
    Pause(Sender<Result<(), AudioError>>),
    Disconnect(Sender<()>),
}

/// Sortie sur le périphérique par défaut de l'hôte cpal
pub struct CpalOutput {
    commands: Option<Sender<Command>>,
    thread: Option<JoinHandle<()>>,
}

impl CpalOutput {
    pub fn new() -> Result<Self, AudioError> {
        let (commands, inbox) = channel::unbounded();

        let thread = thread::Builder::new()
            .name("pixel-audio-host".into())
            .spawn(move || HostThread::default().run(inbox))
            .map_err(|err| AudioError::Device(err.to_string()))?;

        let mut output = Self {
            commands: Some(commands),
            thread: Some(thread),
        };

        // Échoue tôt s'il n'y a aucune sortie disponible
        output.output_format()?;
        Ok(output)
    }

    fn request<T>(&self, make: impl FnOnce(Sender<T>) -> Command) -> Result<T, AudioError> {
        let (reply, response) = channel::bounded(1);
        let commands = self
            .commands
            .as_ref()
            .ok_or_else(|| AudioError::Device("thread audio arrêté".to_string()))?;

        commands
            .send(make(reply))
            .map_err(|_| AudioError::Device("thread audio arrêté".to_string()))?;
        response
            .recv()
            .map_err(|_| AudioError::Device("thread audio arrêté".to_string()))
    }
}

impl AudioOutputDevice for CpalOutput {
    fn output_format(&mut self) -> Result<AudioFormat, AudioError> {
        self.request(Command::Query)?
    }

    fn connect(&mut self, format: AudioFormat, render: RenderCallback) -> Result<(), AudioError> {
        self.request(|reply| Command::Connect {
            format,
            render,
            reply,
        })?
    }

    fn play(&mut self) -> Result<(), AudioError> {
        self.request(Command::Play)?
    }

    fn pause(&mut self) -> Result<(), AudioError> {
        self.request(Command::Pause)?
    }

    fn disconnect(&mut self) {
        if let Err(err) = self.request(Command::Disconnect) {
            debug!("Déconnexion audio ignorée: {}", err);
        }
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        // Fermer le canal termine la boucle du thread hôte
        self.commands.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Le thread audio s'est arrêté en panique");
            }
        }
    }
}

/// État possédé par le thread hôte cpal
#[derive(Default)]
struct HostThread {
    stream: Option<Stream>,
}

impl HostThread {
    fn run(mut self, inbox: Receiver<Command>) {
        debug!("Thread audio démarré");

        for command in inbox {
            match command {
                Command::Query(reply) => {
                    let _ = reply.send(default_format());
                }
                Command::Connect {
                    format,
                    render,
                    reply,
                } => {
                    // Le flux précédent est détruit avant d'en construire un autre
                    self.stream = None;
                    let result = build_stream(format, render).map(|stream| {
                        self.stream = Some(stream);
                    });
                    let _ = reply.send(result);
                }
                Command::Play(reply) => {
                    let result = match &self.stream {
                        Some(stream) => stream
                            .play()
                            .map_err(|err| AudioError::Device(err.to_string())),
                        None => Ok(()),
                    };
                    let _ = reply.send(result);
                }
                Command::Pause(reply) => {
                    let result = match &self.stream {
                        Some(stream) => stream
                            .pause()
                            .map_err(|err| AudioError::Device(err.to_string())),
                        None => Ok(()),
                    };
                    let _ = reply.send(result);
                }
                Command::Disconnect(reply) => {
                    self.stream = None;
                    let _ = reply.send(());
                }
            }
        }

        debug!("Thread audio terminé");
    }
}

fn default_device() -> Result<cpal::Device, AudioError> {
    cpal::default_host()
        .default_output_device()
        .ok_or_else(|| AudioError::Device("aucun périphérique audio disponible".to_string()))
}

fn default_format() -> Result<AudioFormat, AudioError> {
    let config = default_device()?
        .default_output_config()
        .map_err(|err| AudioError::Device(err.to_string()))?;

    Ok(AudioFormat::pcm_f32(config.sample_rate().0, config.channels()))
}

fn build_stream(format: AudioFormat, mut render: RenderCallback) -> Result<Stream, AudioError> {
    let device = default_device()?;
    let supported = device
        .default_output_config()
        .map_err(|err| AudioError::Device(err.to_string()))?;

    let config = StreamConfig {
        channels: format.channels,
        sample_rate: cpal::SampleRate(format.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    info!(
        "Sortie audio: {} Hz, {} canaux, {:?}",
        format.sample_rate,
        format.channels,
        supported.sample_format()
    );

    let on_error = |err: cpal::StreamError| error!("Erreur du flux audio: {}", err);

    let stream = match supported.sample_format() {
        cpal::SampleFormat::F32 => device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| render(data),
            on_error,
            None,
        ),
        cpal::SampleFormat::I16 => {
            let mut scratch: Vec<f32> = vec![0.0; 4096];
            device.build_output_stream(
                &config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    if scratch.len() < data.len() {
                        scratch.resize(data.len(), 0.0);
                    }
                    let scratch = &mut scratch[..data.len()];
                    render(scratch);
                    for (out, &sample) in data.iter_mut().zip(scratch.iter()) {
                        *out = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
                    }
                },
                on_error,
                None,
            )
        }
        cpal::SampleFormat::U16 => {
            let mut scratch: Vec<f32> = vec![0.0; 4096];
            device.build_output_stream(
                &config,
                move |data: &mut [u16], _: &cpal::OutputCallbackInfo| {
                    if scratch.len() < data.len() {
                        scratch.resize(data.len(), 0.0);
                    }
                    let scratch = &mut scratch[..data.len()];
                    render(scratch);
                    for (out, &sample) in data.iter_mut().zip(scratch.iter()) {
                        *out = (sample * 32767.0 + 32768.0).clamp(0.0, 65535.0) as u16;
                    }
                },
                on_error,
                None,
            )
        }
        other => return Err(AudioError::UnsupportedSampleFormat(format!("{:?}", other))),
    };

    stream.map_err(|err| AudioError::Device(err.to_string()))
}

/// Sortie sans matériel, tirée à la demande
///
/// Utile pour les sessions sans carte son (tests, benchmarks, intégration
/// continue). Le [`HeadlessHandle`] associé joue le rôle du callback système.
pub struct HeadlessOutput {
    format: AudioFormat,
    shared: Arc<Mutex<HeadlessState>>,
}

#[derive(Default)]
struct HeadlessState {
    render: Option<RenderCallback>,
    playing: bool,
    connections: usize,
}

/// Poignée permettant de tirer des échantillons d'une [`HeadlessOutput`]
#[derive(Clone)]
pub struct HeadlessHandle {
    format: AudioFormat,
    shared: Arc<Mutex<HeadlessState>>,
}

impl HeadlessOutput {
    pub fn new(format: AudioFormat) -> (Self, HeadlessHandle) {
        let shared = Arc::new(Mutex::new(HeadlessState::default()));
        let output = Self {
            format,
            shared: Arc::clone(&shared),
        };
        (output, HeadlessHandle { format, shared })
    }
}

impl AudioOutputDevice for HeadlessOutput {
    fn output_format(&mut self) -> Result<AudioFormat, AudioError> {
        Ok(self.format)
    }

    fn connect(&mut self, format: AudioFormat, render: RenderCallback) -> Result<(), AudioError> {
        let mut state = self.shared.lock();
        self.format = format;
        state.render = Some(render);
        state.playing = false;
        state.connections += 1;
        Ok(())
    }

    fn play(&mut self) -> Result<(), AudioError> {
        self.shared.lock().playing = true;
        Ok(())
    }

    fn pause(&mut self) -> Result<(), AudioError> {
        self.shared.lock().playing = false;
        Ok(())
    }

    fn disconnect(&mut self) {
        let mut state = self.shared.lock();
        state.render = None;
        state.playing = false;
    }
}

impl HeadlessHandle {
    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Tire `frames` trames ; silence si le flux est en pause ou déconnecté
    pub fn pull(&self, frames: usize) -> Vec<f32> {
        let mut data = vec![0.0; frames * self.format.channels as usize];
        let mut state = self.shared.lock();
        if state.playing {
            if let Some(render) = state.render.as_mut() {
                render(&mut data);
            }
        }
        data
    }

    pub fn is_playing(&self) -> bool {
        self.shared.lock().playing
    }

    pub fn is_connected(&self) -> bool {
        self.shared.lock().render.is_some()
    }

    /// Nombre de graphes construits depuis la création
    pub fn connections(&self) -> usize {
        self.shared.lock().connections
    }
}
