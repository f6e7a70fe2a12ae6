//! Single-channel luminance buffers.
//!
//! Detection runs on `f32` luminance rather than on the RGBA pixels, so every
//! image and template is converted once with the perceptual weighting
//! `0.299*R + 0.587*G + 0.114*B`. Samples stay in `[0, 255]` space.

use image::RgbaImage;

use crate::error::{Error, Result};

/// Luminance weight of the red channel.
const RED_WEIGHT: f32 = 0.299;
/// Luminance weight of the green channel.
const GREEN_WEIGHT: f32 = 0.587;
/// Luminance weight of the blue channel.
const BLUE_WEIGHT: f32 = 0.114;

/// Luminance of one RGB pixel. Alpha does not participate.
#[inline]
#[must_use]
pub fn luminance(r: u8, g: u8, b: u8) -> f32 {
    RED_WEIGHT * f32::from(r) + GREEN_WEIGHT * f32::from(g) + BLUE_WEIGHT * f32::from(b)
}

/// Dense row-major luminance samples with their dimensions.
///
/// The length always equals `width * height`. Values are not clamped, so
/// resampled or inverted buffers may drift marginally outside `[0, 255]`.
#[derive(Debug, Clone, PartialEq)]
pub struct GrayBuffer {
    width: u32,
    height: u32,
    data: Vec<f32>,
}

impl GrayBuffer {
    /// Wrap existing samples.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BufferSize`] if `data.len() != width * height`.
    pub fn new(width: u32, height: u32, data: Vec<f32>) -> Result<Self> {
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(Error::BufferSize {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Samples whose length the caller has already established.
    pub(crate) fn from_samples(width: u32, height: u32, data: Vec<f32>) -> Self {
        debug_assert_eq!(data.len(), width as usize * height as usize);
        Self {
            width,
            height,
            data,
        }
    }

    /// A buffer with every sample set to `value`.
    #[must_use]
    pub fn filled(width: u32, height: u32, value: f32) -> Self {
        Self {
            width,
            height,
            data: vec![value; width as usize * height as usize],
        }
    }

    /// Convert an interleaved RGBA byte buffer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BufferSize`] if `rgba.len() != 4 * width * height`.
    pub fn from_rgba(rgba: &[u8], width: u32, height: u32) -> Result<Self> {
        let expected = 4 * width as usize * height as usize;
        if rgba.len() != expected {
            return Err(Error::BufferSize {
                expected,
                actual: rgba.len(),
            });
        }
        let data = rgba
            .chunks_exact(4)
            .map(|px| luminance(px[0], px[1], px[2]))
            .collect();
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Convert a decoded RGBA image.
    #[must_use]
    pub fn from_image(image: &RgbaImage) -> Self {
        let data = image
            .pixels()
            .map(|px| luminance(px[0], px[1], px[2]))
            .collect();
        Self {
            width: image.width(),
            height: image.height(),
            data,
        }
    }

    /// Brightness-inverted copy: every sample `s` becomes `255 - s`.
    #[must_use]
    pub fn inverted(&self) -> Self {
        Self {
            width: self.width,
            height: self.height,
            data: self.data.iter().map(|s| 255.0 - s).collect(),
        }
    }

    /// Width in samples.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in samples.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Row-major samples.
    #[must_use]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Sample at `(x, y)`.
    ///
    /// # Panics
    ///
    /// Panics if the coordinates are outside the buffer.
    #[inline]
    #[must_use]
    pub fn at(&self, x: u32, y: u32) -> f32 {
        self.data[y as usize * self.width as usize + x as usize]
    }

    /// Row `y` as a slice.
    #[inline]
    pub(crate) fn row(&self, y: u32) -> &[f32] {
        let w = self.width as usize;
        let start = y as usize * w;
        &self.data[start..start + w]
    }
}
