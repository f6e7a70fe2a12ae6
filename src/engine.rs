//! File-level pipeline: load, detect, remove, save.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::{DynamicImage, ImageFormat, RgbaImage};
use log::info;
use serde::Serialize;

use crate::detection::{detect_in_image, DetectConfig};
use crate::error::{Error, Result};
use crate::inpaint::{inpaint_region, DonorSide, Rect};
use crate::search::{Match, NoYield};
use crate::template::Template;

/// Options controlling file processing.
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    /// Detection configuration.
    pub config: DetectConfig,
    /// Detect and report only; never write output.
    pub dry_run: bool,
}

/// Result of processing a single image file.
#[derive(Debug, Serialize)]
pub struct ProcessResult {
    /// Path of the processed file.
    pub path: PathBuf,
    /// Whether processing succeeded.
    pub success: bool,
    /// Whether the file was left alone (no watermark found, or dry run).
    pub skipped: bool,
    /// Score of the accepted match, 0 when none.
    pub score: f32,
    /// Located watermark in full-resolution coordinates.
    pub region: Option<Match>,
    /// Human-readable status message.
    pub message: String,
}

impl ProcessResult {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            success: false,
            skipped: false,
            score: 0.0,
            region: None,
            message: String::new(),
        }
    }
}

/// The watermark engine holding the template to search for.
///
/// Create once and reuse for multiple images.
pub struct WatermarkEngine {
    template: Arc<Template>,
}

impl WatermarkEngine {
    /// Create an engine for `template`.
    #[must_use]
    pub fn new(template: Template) -> Self {
        Self {
            template: Arc::new(template),
        }
    }

    /// Create an engine from a template image file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TemplateDecode`] if the template cannot be loaded.
    pub fn from_template_path(path: &Path) -> Result<Self> {
        Ok(Self::new(Template::open(path)?))
    }

    /// The template being searched for.
    #[must_use]
    pub fn template(&self) -> &Template {
        &self.template
    }

    /// A shared handle to the template, e.g. for a worker request.
    #[must_use]
    pub fn shared_template(&self) -> Arc<Template> {
        Arc::clone(&self.template)
    }

    /// Locate the watermark in a full-resolution image.
    ///
    /// Returns the match in full-resolution coordinates, or `None` when no
    /// candidate clears the acceptance threshold.
    ///
    /// # Errors
    ///
    /// Returns an error only if template resampling fails.
    pub fn detect(&self, image: &RgbaImage, config: &DetectConfig) -> Result<Option<Match>> {
        let detection = detect_in_image(image, &self.template, config, &mut NoYield)?;
        Ok(detection.full_resolution(image.width(), image.height()))
    }

    /// Paint out a located watermark in-place.
    #[allow(clippy::unused_self)] // method on `self` for API consistency
    pub fn remove(&self, image: &mut RgbaImage, region: &Match) -> Option<DonorSide> {
        inpaint_region(image, Rect::from(*region))
    }

    /// Process a single image file: load, detect, remove, save.
    #[must_use]
    pub fn process_file(
        &self,
        input: &Path,
        output: &Path,
        opts: &ProcessOptions,
    ) -> ProcessResult {
        self.process_file_with(input, output, opts, |image| {
            self.detect(image, &opts.config)
        })
    }

    /// Like [`WatermarkEngine::process_file`] with a caller-supplied detector,
    /// e.g. one that forwards to a background worker.
    ///
    /// `detect` receives the decoded full-resolution image and returns the
    /// match in the same coordinates. A failed detection leaves the image
    /// untouched and nothing is written.
    #[must_use]
    pub fn process_file_with<F>(
        &self,
        input: &Path,
        output: &Path,
        opts: &ProcessOptions,
        detect: F,
    ) -> ProcessResult
    where
        F: FnOnce(&RgbaImage) -> Result<Option<Match>>,
    {
        let mut result = ProcessResult::new(input);

        // Load image
        let mut rgba = match image::open(input) {
            Ok(img) => img.to_rgba8(),
            Err(e) => {
                result.message = format!("Failed to load: {e}");
                return result;
            }
        };

        let region = match detect(&rgba) {
            Ok(Some(region)) => region,
            Ok(None) => {
                result.skipped = true;
                result.success = true;
                result.message = "No watermark found".to_string();
                return result;
            }
            Err(e) => {
                result.message = format!("Detection failed: {e}");
                return result;
            }
        };
        result.score = region.score;
        result.region = Some(region);
        info!(
            "{}: watermark at {}x{}+{}+{} (score {:.3})",
            input.display(),
            region.w,
            region.h,
            region.x,
            region.y,
            region.score
        );

        if opts.dry_run {
            result.skipped = true;
            result.success = true;
            result.message = format!(
                "Found {}x{} at ({}, {}), dry run",
                region.w, region.h, region.x, region.y
            );
            return result;
        }

        let side = self.remove(&mut rgba, &region);

        // Save output
        if let Some(parent) = output.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    result.message = format!("Failed to create output directory: {e}");
                    return result;
                }
            }
        }

        match save_image(&rgba, output) {
            Ok(()) => {
                result.success = true;
                result.message = match side {
                    Some(DonorSide::Left) => "Watermark removed (filled from left)".to_string(),
                    Some(DonorSide::Right) => "Watermark removed (filled from right)".to_string(),
                    None => "Watermark region empty".to_string(),
                };
            }
            Err(e) => {
                result.message = format!("Failed to save: {e}");
            }
        }

        result
    }

    /// Process all supported images in a directory.
    ///
    /// Uses parallel iteration when the `cli` feature is enabled (via rayon);
    /// each file's search stays single-threaded.
    #[must_use]
    pub fn process_directory(
        &self,
        input_dir: &Path,
        output_dir: &Path,
        opts: &ProcessOptions,
    ) -> Vec<ProcessResult> {
        let entries: Vec<PathBuf> = match std::fs::read_dir(input_dir) {
            Ok(rd) => {
                let mut paths: Vec<PathBuf> = rd
                    .filter_map(std::result::Result::ok)
                    .filter(|e| e.file_type().map(|ft| ft.is_file()).unwrap_or(false))
                    .map(|e| e.path())
                    .filter(|p| is_supported_image(p))
                    .collect();
                paths.sort();
                paths
            }
            Err(e) => {
                let mut failed = ProcessResult::new(input_dir);
                failed.message = format!("Failed to read directory: {e}");
                return vec![failed];
            }
        };

        // Create output directory
        if !opts.dry_run && !output_dir.exists() {
            if let Err(e) = std::fs::create_dir_all(output_dir) {
                let mut failed = ProcessResult::new(output_dir);
                failed.message = format!("Failed to create output directory: {e}");
                return vec![failed];
            }
        }

        let process = |input_path: &PathBuf| {
            let output_path = match input_path.file_name() {
                Some(name) => output_dir.join(name),
                None => output_dir.to_path_buf(),
            };
            self.process_file(input_path, &output_path, opts)
        };

        #[cfg(feature = "cli")]
        {
            use rayon::prelude::*;
            entries.par_iter().map(process).collect()
        }

        #[cfg(not(feature = "cli"))]
        {
            entries.iter().map(process).collect()
        }
    }
}

/// Check if a file has a supported image extension.
#[must_use]
pub fn is_supported_image(path: &Path) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => matches!(
            ext.to_lowercase().as_str(),
            "jpg" | "jpeg" | "png" | "webp" | "bmp"
        ),
        None => false,
    }
}

/// Save an RGBA image with format-specific settings.
///
/// JPEG has no alpha channel, so it is written from the RGB planes at
/// quality 100.
///
/// # Errors
///
/// Returns an error if the format is unsupported or writing fails.
pub fn save_image(img: &RgbaImage, path: &Path) -> Result<()> {
    let format =
        ImageFormat::from_path(path).map_err(|e| Error::UnsupportedFormat(e.to_string()))?;

    match format {
        ImageFormat::Jpeg => {
            let rgb = DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(img.clone()).to_rgb8());
            let file = std::fs::File::create(path)?;
            let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(file, 100);
            encoder.encode_image(&rgb)?;
        }
        ImageFormat::Png | ImageFormat::WebP | ImageFormat::Bmp => {
            img.save_with_format(path, format)?;
        }
        _ => {
            return Err(Error::UnsupportedFormat(format!("{format:?}")));
        }
    }

    Ok(())
}

/// Generate a default output path from an input path.
///
/// Example: `"photo.jpg"` becomes `"photo_cleaned.jpg"`.
#[must_use]
pub fn default_output_path(input: &Path) -> PathBuf {
    let stem = input.file_stem().unwrap_or_default().to_string_lossy();
    let ext = input.extension().unwrap_or_default().to_string_lossy();
    let parent = input.parent().unwrap_or(Path::new("."));
    parent.join(format!("{stem}_cleaned.{ext}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{ring_mark, scene, to_rgba, BACKDROP};

    fn engine() -> WatermarkEngine {
        WatermarkEngine::new(Template::from_gray(ring_mark()))
    }

    #[test]
    fn detect_maps_to_full_resolution() {
        let mark = ring_mark();
        // 400 wide with a 200 px working width: everything halves.
        let big = crate::template::resample_nearest(&mark, 80, 80);
        let image = to_rgba(&scene(&big, 400, 300, 80, 80));
        let config = DetectConfig {
            max_working_width: 200,
            ..DetectConfig::default()
        };

        let found = engine().detect(&image, &config).unwrap().expect("match");
        assert!(found.x.abs_diff(80) <= 6 && found.y.abs_diff(80) <= 6);
        assert_eq!((found.w, found.h), (80, 80));
    }

    #[test]
    fn remove_paints_out_detected_region() {
        let mark = ring_mark();
        let mut image = to_rgba(&scene(&mark, 200, 150, 40, 40));
        let eng = engine();
        let found = eng
            .detect(&image, &DetectConfig::default())
            .unwrap()
            .expect("match");

        assert!(eng.remove(&mut image, &found).is_some());
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let backdrop = BACKDROP as u8;
        assert_eq!(image.get_pixel(60, 60)[0], backdrop);
        assert_eq!(eng.detect(&image, &DetectConfig::default()).unwrap(), None);
    }

    #[test]
    fn default_output_path_appends_cleaned_suffix() {
        let p = default_output_path(Path::new("/tmp/photo.jpg"));
        assert_eq!(p, PathBuf::from("/tmp/photo_cleaned.jpg"));

        let p = default_output_path(Path::new("image.png"));
        assert_eq!(
            p.file_name().unwrap().to_str().unwrap(),
            "image_cleaned.png"
        );
    }

    #[test]
    fn is_supported_image_accepts_common_formats() {
        assert!(is_supported_image(Path::new("photo.jpg")));
        assert!(is_supported_image(Path::new("photo.JPEG")));
        assert!(is_supported_image(Path::new("photo.png")));
        assert!(is_supported_image(Path::new("photo.webp")));
        assert!(is_supported_image(Path::new("photo.bmp")));
    }

    #[test]
    fn is_supported_image_rejects_unsupported_formats() {
        assert!(!is_supported_image(Path::new("photo.gif")));
        assert!(!is_supported_image(Path::new("photo.txt")));
        assert!(!is_supported_image(Path::new("photo")));
    }

    #[test]
    fn save_image_rejects_unknown_extension() {
        let img = RgbaImage::new(2, 2);
        assert!(matches!(
            save_image(&img, Path::new("out.xyz")),
            Err(Error::UnsupportedFormat(_))
        ));
    }
}
