//! The watermark reference graphic and its on-demand resampling.

use std::path::Path;

use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbaImage};

use crate::error::{Error, Result};
use crate::grayscale::GrayBuffer;

/// How a template is brought to a candidate size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalePath {
    /// Re-rasterize the RGBA template at the target size, then convert.
    Raster,
    /// Nearest-neighbour resample of the grayscale array. Needs no raster.
    Array,
}

/// Watermark reference held at native resolution.
#[derive(Debug, Clone)]
pub struct Template {
    raster: Option<RgbaImage>,
    gray: GrayBuffer,
}

impl Template {
    /// Build a template from a decoded image, keeping its raster.
    #[must_use]
    pub fn from_image(image: &DynamicImage) -> Self {
        let raster = image.to_rgba8();
        let gray = GrayBuffer::from_image(&raster);
        Self {
            raster: Some(raster),
            gray,
        }
    }

    /// Build an array-only template from precomputed luminance.
    #[must_use]
    pub fn from_gray(gray: GrayBuffer) -> Self {
        Self { raster: None, gray }
    }

    /// Load and decode a template image file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TemplateDecode`] if the file cannot be read or decoded.
    pub fn open(path: &Path) -> Result<Self> {
        let image = image::open(path).map_err(Error::TemplateDecode)?;
        Ok(Self::from_image(&image))
    }

    /// Native width.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.gray.width()
    }

    /// Native height.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.gray.height()
    }

    /// Native-size luminance.
    #[must_use]
    pub fn gray(&self) -> &GrayBuffer {
        &self.gray
    }

    /// Whether the raster path is available.
    #[must_use]
    pub fn has_raster(&self) -> bool {
        self.raster.is_some()
    }

    /// The path resampling should take by default.
    #[must_use]
    pub fn preferred_path(&self) -> ScalePath {
        if self.has_raster() {
            ScalePath::Raster
        } else {
            ScalePath::Array
        }
    }

    /// Resample to `width x height` along `path`.
    ///
    /// A request for the native size returns the stored luminance unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RasterUnavailable`] for [`ScalePath::Raster`] when the
    /// template was built without a raster.
    pub fn resample(&self, width: u32, height: u32, path: ScalePath) -> Result<GrayBuffer> {
        if width == self.width() && height == self.height() {
            return Ok(self.gray.clone());
        }
        match path {
            ScalePath::Raster => {
                let raster = self.raster.as_ref().ok_or(Error::RasterUnavailable)?;
                let resized = imageops::resize(raster, width, height, FilterType::Triangle);
                Ok(GrayBuffer::from_image(&resized))
            }
            ScalePath::Array => Ok(resample_nearest(&self.gray, width, height)),
        }
    }
}

/// Target dimensions for a scale factor: rounded, never below one pixel.
#[must_use]
pub fn scaled_size(width: u32, height: u32, scale: f32) -> (u32, u32) {
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let dim = |v: u32| ((v as f32 * scale).round() as u32).max(1);
    (dim(width), dim(height))
}

/// Nearest-neighbour resample sampling source pixel centres.
#[must_use]
pub fn resample_nearest(src: &GrayBuffer, width: u32, height: u32) -> GrayBuffer {
    let (sw, sh) = (src.width(), src.height());
    if width == 0 || height == 0 || sw == 0 || sh == 0 {
        return GrayBuffer::filled(width, height, 0.0);
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let source_index = |d: u32, dst: u32, len: u32| -> u32 {
        let s = ((d as f32 + 0.5) * len as f32 / dst as f32) as u32;
        s.min(len - 1)
    };

    let xs: Vec<u32> = (0..width).map(|dx| source_index(dx, width, sw)).collect();
    let mut data = Vec::with_capacity(width as usize * height as usize);
    for dy in 0..height {
        let row = src.row(source_index(dy, height, sh));
        data.extend(xs.iter().map(|&sx| row[sx as usize]));
    }

    GrayBuffer::from_samples(width, height, data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    /// 64x64 template of 16 px blocks.
    fn block_image() -> DynamicImage {
        let img = RgbaImage::from_fn(64, 64, |x, y| {
            let v = if (x / 16 + y / 16) % 2 == 0 { 30 } else { 220 };
            Rgba([v, v, v, 255])
        });
        DynamicImage::ImageRgba8(img)
    }

    #[test]
    fn scaled_size_rounds_and_floors_at_one() {
        assert_eq!(scaled_size(40, 20, 0.5), (20, 10));
        assert_eq!(scaled_size(40, 20, 1.35), (54, 27));
        assert_eq!(scaled_size(3, 3, 0.1), (1, 1));
    }

    #[test]
    fn native_size_returns_stored_gray() {
        let tpl = Template::from_image(&block_image());
        let same = tpl.resample(64, 64, ScalePath::Array).unwrap();
        assert_eq!(&same, tpl.gray());
    }

    #[test]
    fn nearest_doubles_each_sample() {
        let src = GrayBuffer::new(2, 2, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let up = resample_nearest(&src, 4, 4);
        assert_eq!(
            up.data(),
            &[
                1.0, 1.0, 2.0, 2.0, //
                1.0, 1.0, 2.0, 2.0, //
                3.0, 3.0, 4.0, 4.0, //
                3.0, 3.0, 4.0, 4.0,
            ]
        );
    }

    #[test]
    fn array_path_tracks_raster_path() {
        let tpl = Template::from_image(&block_image());
        for (w, h) in [(32, 32), (40, 40), (96, 96)] {
            let raster = tpl.resample(w, h, ScalePath::Raster).unwrap();
            let array = tpl.resample(w, h, ScalePath::Array).unwrap();
            assert_eq!((array.width(), array.height()), (w, h));

            #[allow(clippy::cast_precision_loss)]
            let mean_diff = raster
                .data()
                .iter()
                .zip(array.data())
                .map(|(a, b)| (a - b).abs())
                .sum::<f32>()
                / raster.data().len() as f32;
            assert!(mean_diff < 25.0, "{w}x{h}: mean diff {mean_diff}");
        }
    }

    #[test]
    fn raster_path_needs_a_raster() {
        let tpl = Template::from_gray(GrayBuffer::filled(10, 10, 50.0));
        assert!(!tpl.has_raster());
        assert_eq!(tpl.preferred_path(), ScalePath::Array);
        assert!(matches!(
            tpl.resample(5, 5, ScalePath::Raster),
            Err(Error::RasterUnavailable)
        ));
        assert!(tpl.resample(5, 5, ScalePath::Array).is_ok());
    }
}
