//! Formats vidéo et zone d'affichage

use serde::{Deserialize, Serialize};

use crate::error::VideoError;

/// Format des pixels produits par le cœur
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 16 bits 5-6-5, petit-boutiste
    Rgb565,

    /// 32 bits B, G, R, A
    Bgra8,

    /// 32 bits R, G, B, A
    Rgba8,

    /// Texture GPU remplie directement par le connecteur
    Texture,
}

impl PixelFormat {
    /// Octets par pixel dans le tampon du cœur (0 pour une texture)
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb565 => 2,
            PixelFormat::Bgra8 | PixelFormat::Rgba8 => 4,
            PixelFormat::Texture => 0,
        }
    }

    pub fn is_texture(self) -> bool {
        self == PixelFormat::Texture
    }
}

/// Format vidéo exposé par le connecteur en début de session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VideoFormat {
    pub pixel_format: PixelFormat,
    pub width: u32,
    pub height: u32,
}

impl VideoFormat {
    pub fn new(pixel_format: PixelFormat, width: u32, height: u32) -> Self {
        Self {
            pixel_format,
            width,
            height,
        }
    }

    /// Taille en octets d'une image brute
    pub fn buffer_size(&self) -> usize {
        self.width as usize * self.height as usize * self.pixel_format.bytes_per_pixel()
    }

    pub fn full_frame(&self) -> Viewport {
        Viewport::new(0, 0, self.width, self.height)
    }
}

/// Rectangle en pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Une zone vide désigne l'image entière
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Vérifie que la zone tient dans l'image
    pub fn validate(&self, format: &VideoFormat) -> Result<(), VideoError> {
        let fits_x = self.x.checked_add(self.width).is_some_and(|right| right <= format.width);
        let fits_y = self.y.checked_add(self.height).is_some_and(|bottom| bottom <= format.height);

        if fits_x && fits_y {
            Ok(())
        } else {
            Err(VideoError::InvalidViewport {
                x: self.x,
                y: self.y,
                width: self.width,
                height: self.height,
                frame_width: format.width,
                frame_height: format.height,
            })
        }
    }

    /// Même zone exprimée avec l'origine en bas à gauche
    ///
    /// `y' = hauteur totale - hauteur de la zone - y`
    pub fn flipped(&self, frame_height: u32) -> Viewport {
        Viewport {
            y: frame_height.saturating_sub(self.height).saturating_sub(self.y),
            ..*self
        }
    }

    /// Première ligne en mémoire (de haut en bas) d'une zone exprimée
    /// avec l'origine en bas à gauche
    pub fn memory_row(&self, frame_height: u32) -> u32 {
        frame_height.saturating_sub(self.y).saturating_sub(self.height)
    }
}
