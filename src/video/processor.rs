//! Stratégies de traitement des images du cœur
//!
//! La stratégie est choisie une seule fois d'après le format vidéo : tampon
//! brut converti en BGRA, ou texture GPU simplement référencée.

use bitflags::bitflags;
use image::RgbaImage;
use rayon::prelude::*;

use super::format::{PixelFormat, VideoFormat, Viewport};
use crate::error::VideoError;

bitflags! {
    /// Capacités d'une stratégie de traitement
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct VideoCapabilities: u8 {
        const RAW_BUFFER  = 0b0000_0001;
        const GPU_TEXTURE = 0b0000_0010;
    }
}

/// Identifiant opaque d'une texture GPU possédée par le connecteur
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub u64);

/// Contenu d'une image prête à être affichée
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameContent {
    /// Pixels B, G, R, A opaques, lignes de haut en bas
    Bgra(Vec<u8>),

    /// Référence à une texture et zone à afficher (origine en bas à gauche)
    Texture {
        handle: TextureHandle,
        region: Viewport,
    },
}

/// Image traitée, publiée aux sorties d'affichage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,

    /// Numéro d'ordre attribué par le pipeline
    pub sequence: u64,

    pub content: FrameContent,
}

impl VideoFrame {
    /// Copie RGBA de l'image, `None` pour une texture
    pub fn to_rgba_image(&self) -> Option<RgbaImage> {
        match &self.content {
            FrameContent::Bgra(pixels) => {
                let mut rgba = pixels.clone();
                for pixel in rgba.chunks_exact_mut(4) {
                    pixel.swap(0, 2);
                    pixel[3] = 0xFF;
                }
                RgbaImage::from_raw(self.width, self.height, rgba)
            }
            FrameContent::Texture { .. } => None,
        }
    }
}

/// Stratégie tampon brut
#[derive(Debug)]
pub struct BitmapProcessor {
    format: VideoFormat,
    staging: Vec<u8>,
    has_frame: bool,
}

/// Stratégie texture GPU
#[derive(Debug)]
pub struct TextureProcessor {
    format: VideoFormat,
    handle: Option<TextureHandle>,
}

/// Stratégie active, choisie à la construction
#[derive(Debug)]
pub enum VideoProcessor {
    Bitmap(BitmapProcessor),
    Texture(TextureProcessor),
}

impl VideoProcessor {
    pub fn new(format: VideoFormat) -> Self {
        if format.pixel_format.is_texture() {
            VideoProcessor::Texture(TextureProcessor {
                format,
                handle: None,
            })
        } else {
            VideoProcessor::Bitmap(BitmapProcessor {
                format,
                staging: vec![0; format.buffer_size()],
                has_frame: false,
            })
        }
    }

    pub fn format(&self) -> VideoFormat {
        match self {
            VideoProcessor::Bitmap(bitmap) => bitmap.format,
            VideoProcessor::Texture(texture) => texture.format,
        }
    }

    pub fn capabilities(&self) -> VideoCapabilities {
        match self {
            VideoProcessor::Bitmap(_) => VideoCapabilities::RAW_BUFFER,
            VideoProcessor::Texture(_) => VideoCapabilities::GPU_TEXTURE,
        }
    }

    /// Remplace le contenu du tampon de préparation
    pub fn submit_pixels(&mut self, pixels: &[u8]) -> Result<(), VideoError> {
        match self {
            VideoProcessor::Bitmap(bitmap) => {
                if pixels.len() != bitmap.staging.len() {
                    return Err(VideoError::BufferSize {
                        expected: bitmap.staging.len(),
                        found: pixels.len(),
                    });
                }
                bitmap.staging.copy_from_slice(pixels);
                bitmap.has_frame = true;
                Ok(())
            }
            VideoProcessor::Texture(_) => Err(VideoError::UnsupportedOperation("submit_pixels")),
        }
    }

    /// Enregistre la texture mise à jour par le connecteur
    pub fn submit_texture(&mut self, handle: TextureHandle) -> Result<(), VideoError> {
        match self {
            VideoProcessor::Texture(texture) => {
                texture.handle = Some(handle);
                Ok(())
            }
            VideoProcessor::Bitmap(_) => Err(VideoError::UnsupportedOperation("submit_texture")),
        }
    }

    /// Produit l'image affichable pour la zone donnée (vide = image entière)
    ///
    /// `None` tant qu'aucune image n'a été soumise.
    pub fn process(&self, viewport: Viewport, sequence: u64) -> Option<VideoFrame> {
        let format = self.format();
        let region = if viewport.is_empty() {
            format.full_frame()
        } else {
            viewport
        };
        let flipped = region.flipped(format.height);

        match self {
            VideoProcessor::Bitmap(bitmap) => {
                if !bitmap.has_frame {
                    return None;
                }
                let crop = Viewport {
                    y: flipped.memory_row(format.height),
                    ..region
                };
                Some(VideoFrame {
                    width: crop.width,
                    height: crop.height,
                    sequence,
                    content: FrameContent::Bgra(convert_to_bgra(&bitmap.staging, format, crop)),
                })
            }
            VideoProcessor::Texture(texture) => texture.handle.map(|handle| VideoFrame {
                width: region.width,
                height: region.height,
                sequence,
                content: FrameContent::Texture {
                    handle,
                    region: flipped,
                },
            }),
        }
    }
}

/// Convertit la zone `crop` (lignes de haut en bas) en BGRA opaque
pub fn convert_to_bgra(source: &[u8], format: VideoFormat, crop: Viewport) -> Vec<u8> {
    let bpp = format.pixel_format.bytes_per_pixel();
    let stride = format.width as usize * bpp;
    let out_stride = crop.width as usize * 4;
    let mut output = vec![0u8; out_stride * crop.height as usize];

    if out_stride == 0 || bpp == 0 {
        return output;
    }

    output
        .par_chunks_mut(out_stride)
        .enumerate()
        .for_each(|(row, destination)| {
            let start = (crop.y as usize + row) * stride + crop.x as usize * bpp;
            let end = start + crop.width as usize * bpp;
            if let Some(line) = source.get(start..end) {
                convert_row(format.pixel_format, line, destination);
            }
        });

    output
}

fn convert_row(pixel_format: PixelFormat, source: &[u8], destination: &mut [u8]) {
    match pixel_format {
        PixelFormat::Rgb565 => {
            for (pixel, out) in source.chunks_exact(2).zip(destination.chunks_exact_mut(4)) {
                let value = u16::from_le_bytes([pixel[0], pixel[1]]);
                let r = ((value >> 11) & 0x1F) as u8;
                let g = ((value >> 5) & 0x3F) as u8;
                let b = (value & 0x1F) as u8;

                out[0] = (b << 3) | (b >> 2);
                out[1] = (g << 2) | (g >> 4);
                out[2] = (r << 3) | (r >> 2);
                out[3] = 0xFF;
            }
        }
        PixelFormat::Bgra8 => {
            for (pixel, out) in source.chunks_exact(4).zip(destination.chunks_exact_mut(4)) {
                out[..3].copy_from_slice(&pixel[..3]);
                out[3] = 0xFF;
            }
        }
        PixelFormat::Rgba8 => {
            for (pixel, out) in source.chunks_exact(4).zip(destination.chunks_exact_mut(4)) {
                out[0] = pixel[2];
                out[1] = pixel[1];
                out[2] = pixel[0];
                out[3] = 0xFF;
            }
        }
        PixelFormat::Texture => {}
    }
}
