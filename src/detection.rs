//! Detection entry point shared by the synchronous engine and the worker.
//!
//! Both callers go through [`run_detection`]; where it runs only changes the
//! [`SearchHook`] it is given.

use std::path::Path;
use std::sync::Arc;

use image::RgbaImage;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::grayscale::GrayBuffer;
use crate::search::{search, Match, SearchHook, SearchParams};
use crate::template::{ScalePath, Template};
use crate::working::WorkingCopy;

/// Default bound on the working-copy width.
pub const DEFAULT_MAX_WORKING_WIDTH: u32 = 1024;

/// Detection configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectConfig {
    /// Images wider than this are downscaled before searching.
    pub max_working_width: u32,
    /// Search tunables.
    pub search: SearchParams,
}

impl Default for DetectConfig {
    fn default() -> Self {
        Self {
            max_working_width: DEFAULT_MAX_WORKING_WIDTH,
            search: SearchParams::default(),
        }
    }
}

impl DetectConfig {
    /// Parse a JSON document; missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] on malformed JSON.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Io`] if the file cannot be read and
    /// [`crate::Error::Config`] if it does not parse.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }
}

/// Outcome of one detection request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    /// Best accepted match in search-buffer coordinates, if any.
    pub found: Option<Match>,
    /// Factor from search-buffer to full-resolution coordinates.
    pub scale_to_full: f32,
}

impl Detection {
    /// The match mapped to a `full_w x full_h` image.
    #[must_use]
    pub fn full_resolution(&self, full_w: u32, full_h: u32) -> Option<Match> {
        self.found
            .map(|m| m.scaled(self.scale_to_full, full_w, full_h))
    }
}

/// What a detection request carries.
#[derive(Debug, Clone)]
pub enum DetectPayload {
    /// A full-resolution image and the template, shared by reference.
    Raster {
        /// Image to search.
        image: Arc<RgbaImage>,
        /// Template to search for.
        template: Arc<Template>,
    },
    /// Precomputed luminance only; no rasterization is needed.
    Array {
        /// Search buffer, usually a working copy.
        source: GrayBuffer,
        /// Template luminance at native size.
        template: GrayBuffer,
        /// Factor from `source` to full-resolution coordinates.
        scale_to_full: f32,
    },
}

/// Run one detection request to completion.
///
/// # Errors
///
/// Returns an error only if template resampling fails.
pub fn run_detection(
    payload: DetectPayload,
    config: &DetectConfig,
    hook: &mut dyn SearchHook,
) -> Result<Detection> {
    match payload {
        DetectPayload::Raster { image, template } => {
            detect_in_image(&image, &template, config, hook)
        }
        DetectPayload::Array {
            source,
            template,
            scale_to_full,
        } => {
            let template = Template::from_gray(template);
            let found = search(
                &source,
                &template,
                ScalePath::Array,
                &config.search,
                hook,
            )?;
            Ok(Detection {
                found,
                scale_to_full,
            })
        }
    }
}

/// Build the working copy of `image` and search it.
///
/// Uses the raster resampling path when the template carries a raster and
/// falls back to the array path otherwise.
///
/// # Errors
///
/// Returns an error only if template resampling fails.
pub fn detect_in_image(
    image: &RgbaImage,
    template: &Template,
    config: &DetectConfig,
    hook: &mut dyn SearchHook,
) -> Result<Detection> {
    let working = WorkingCopy::new(image, config.max_working_width);
    let path = template.preferred_path();
    if path == ScalePath::Array {
        warn!("template has no raster, resampling the grayscale array instead");
    }

    let found = search(&working.gray, template, path, &config.search, hook)?;
    debug!("detection result: {found:?}");
    Ok(Detection {
        found,
        scale_to_full: working.scale_to_full,
    })
}
