//! Pixel Emu Core - Boucle d'émulation temps réel et pipelines audio/vidéo
//!
//! Cette bibliothèque cadence un cœur émulé (le « connecteur ») sur l'horloge
//! murale, achemine son audio vers le périphérique de sortie au travers d'un
//! tampon circulaire et publie ses images aux sorties d'affichage.

pub mod audio;
pub mod config;
pub mod connector;
pub mod error;
pub mod pump;
pub mod registry;
pub mod video;

pub use audio::*;
pub use config::*;
pub use connector::*;
pub use error::{AudioError, ConnectorError, Error, VideoError};
pub use pump::*;
pub use registry::*;
pub use video::*;

/// Version de la bibliothèque
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
