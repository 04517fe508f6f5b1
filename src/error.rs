//! Types d'erreurs de la bibliothèque

use thiserror::Error;

/// Erreurs du pipeline audio
#[derive(Debug, Error)]
pub enum AudioError {
    /// Impossible de réserver la mémoire virtuelle du tampon circulaire
    #[error("allocation du tampon circulaire impossible ({requested} octets demandés)")]
    RingBufferAllocation { requested: usize },

    /// Construction ou exécution du rééchantillonneur échouée
    #[error("rééchantillonneur: {0}")]
    Resampler(String),

    /// Erreur du périphérique de sortie
    #[error("périphérique audio: {0}")]
    Device(String),

    /// Format d'échantillon non géré par le périphérique
    #[error("format d'échantillon non supporté: {0}")]
    UnsupportedSampleFormat(String),
}

/// Erreurs du pipeline vidéo
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VideoError {
    /// Viewport hors des dimensions de l'image
    #[error("viewport {x},{y} {width}x{height} hors de l'image {frame_width}x{frame_height}")]
    InvalidViewport {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        frame_width: u32,
        frame_height: u32,
    },

    /// Taille de tampon incohérente avec le format vidéo
    #[error("taille de tampon vidéo incorrecte: attendu {expected}, reçu {found}")]
    BufferSize { expected: usize, found: usize },

    /// Opération incompatible avec la stratégie de traitement active
    #[error("opération non supportée par la stratégie vidéo active: {0}")]
    UnsupportedOperation(&'static str),

    /// Thread de rendu impossible à démarrer
    #[error("thread de rendu: {0}")]
    RenderThread(String),
}

/// Erreurs remontées par un connecteur d'émulation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectorError {
    /// Défaillance fatale du cœur émulé
    #[error("défaillance du connecteur: {0}")]
    Fault(String),

    /// Le cœur a demandé l'arrêt de l'émulation
    #[error("le connecteur a quitté l'émulation")]
    Quit,
}

/// Erreur générale de la bibliothèque
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error(transparent)]
    Video(#[from] VideoError),

    #[error(transparent)]
    Connector(#[from] ConnectorError),

    /// Aucun cœur enregistré pour ce type de jeu
    #[error("aucun cœur enregistré pour le type de jeu {0}")]
    UnknownCore(String),
}

/// Résultat des opérations de session
pub type Result<T> = std::result::Result<T, Error>;
