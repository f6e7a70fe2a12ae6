//! Bounded-width working copies for the search.

use image::imageops::{self, FilterType};
use image::RgbaImage;
use log::debug;

use crate::grayscale::GrayBuffer;
use crate::search::Match;

/// Downscaled luminance of a full-resolution image.
///
/// Keeping the width bounded keeps the search cost roughly constant whatever
/// the input resolution. `scale_to_full` maps results back.
#[derive(Debug, Clone)]
pub struct WorkingCopy {
    /// Luminance of the working image.
    pub gray: GrayBuffer,
    /// Multiply working coordinates by this to get full-resolution ones.
    pub scale_to_full: f32,
    full_width: u32,
    full_height: u32,
}

impl WorkingCopy {
    /// Build the working copy of `full`, at most `max_width` wide.
    ///
    /// Images already within bounds are converted as-is with a factor of 1.
    #[must_use]
    pub fn new(full: &RgbaImage, max_width: u32) -> Self {
        let (full_width, full_height) = full.dimensions();
        let max_width = max_width.max(1);

        if full_width <= max_width {
            return Self {
                gray: GrayBuffer::from_image(full),
                scale_to_full: 1.0,
                full_width,
                full_height,
            };
        }

        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            clippy::cast_precision_loss
        )]
        let work_height =
            ((full_height as f32 * max_width as f32 / full_width as f32).round() as u32).max(1);
        let resized = imageops::resize(full, max_width, work_height, FilterType::Triangle);

        #[allow(clippy::cast_precision_loss)]
        let scale_to_full = full_width as f32 / max_width as f32;
        debug!(
            "working copy {max_width}x{work_height} of {full_width}x{full_height} (x{scale_to_full:.3})"
        );

        Self {
            gray: GrayBuffer::from_image(&resized),
            scale_to_full,
            full_width,
            full_height,
        }
    }

    /// Map a match found in this copy to full-resolution coordinates.
    #[must_use]
    pub fn to_full(&self, found: &Match) -> Match {
        found.scaled(self.scale_to_full, self.full_width, self.full_height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn small_images_are_kept_at_full_size() {
        let img = RgbaImage::from_pixel(300, 200, Rgba([1, 2, 3, 255]));
        let wc = WorkingCopy::new(&img, 1024);
        assert_eq!((wc.gray.width(), wc.gray.height()), (300, 200));
        assert!((wc.scale_to_full - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn wide_images_are_bounded() {
        let img = RgbaImage::from_pixel(2000, 1000, Rgba([90, 90, 90, 255]));
        let wc = WorkingCopy::new(&img, 500);
        assert_eq!((wc.gray.width(), wc.gray.height()), (500, 250));
        assert!((wc.scale_to_full - 4.0).abs() < f32::EPSILON);
    }

    #[test]
    fn matches_map_back_to_full_resolution() {
        let img = RgbaImage::new(2000, 1000);
        let wc = WorkingCopy::new(&img, 500);
        let found = Match {
            x: 100,
            y: 50,
            w: 20,
            h: 10,
            score: 0.93,
        };
        let full = wc.to_full(&found);
        assert_eq!((full.x, full.y, full.w, full.h), (400, 200, 80, 40));

        let edge = Match {
            x: 490,
            y: 245,
            w: 20,
            h: 10,
            score: 0.93,
        };
        let clamped = wc.to_full(&edge);
        assert_eq!((clamped.x + clamped.w, clamped.y + clamped.h), (2000, 1000));
    }
}
