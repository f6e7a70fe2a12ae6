//! Locate a watermark of unknown scale and polarity and paint it out.
//!
//! A small reference graphic (the template) is searched for in a photograph
//! at a range of scales, both as given and brightness-inverted, so marks
//! rendered dark-on-light or light-on-dark are found alike. The located
//! rectangle is then filled from the flatter of its two side neighbours and
//! the seam is blurred.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::path::Path;
//! use watermark_scrub::{ProcessOptions, WatermarkEngine};
//!
//! let engine = WatermarkEngine::from_template_path(Path::new("logo.png"))
//!     .expect("failed to load template");
//! let result = engine.process_file(
//!     Path::new("photo.jpg"),
//!     Path::new("photo_cleaned.jpg"),
//!     &ProcessOptions::default(),
//! );
//! println!("{}", result.message);
//! ```
//!
//! # Detection
//!
//! The search runs on a bounded-width grayscale working copy. A focused pass
//! scans the band where marks usually sit; a full-frame pass follows only
//! when the first found nothing convincing. Candidates are gated by a cheap
//! strided mean-absolute-difference and ranked by a blend of MAD and
//! normalized cross-correlation. Only scores above the acceptance threshold
//! are reported.
//!
//! ```no_run
//! use std::path::Path;
//! use watermark_scrub::{DetectConfig, WatermarkEngine};
//!
//! let engine = WatermarkEngine::from_template_path(Path::new("logo.png")).unwrap();
//! let img = image::open("photo.jpg").unwrap().to_rgba8();
//! match engine.detect(&img, &DetectConfig::default()).unwrap() {
//!     Some(m) => println!("{}x{} at ({}, {}), score {:.3}", m.w, m.h, m.x, m.y, m.score),
//!     None => println!("no watermark"),
//! }
//! ```
//!
//! # Background detection
//!
//! [`DetectClient`] runs the same search on a worker thread and correlates
//! answers by request id, with a per-request timeout.

#![deny(missing_docs)]

pub mod detection;
mod engine;
pub mod error;
pub mod grayscale;
pub mod inpaint;
pub mod scoring;
pub mod search;
pub mod template;
#[cfg(test)]
mod testutil;
pub mod worker;
pub mod working;

pub use detection::{run_detection, DetectConfig, DetectPayload, Detection};
pub use engine::{
    default_output_path, is_supported_image, save_image, ProcessOptions, ProcessResult,
    WatermarkEngine,
};
pub use error::{Error, Result};
pub use grayscale::GrayBuffer;
pub use inpaint::{inpaint_region, DonorSide, Rect};
pub use search::{search, Match, NoYield, SearchHook, SearchParams, ThreadYield, YieldPoint};
pub use template::{ScalePath, Template};
pub use worker::{DetectClient, DetectRequest, DetectResponse, RequestId, RequestState};
pub use working::WorkingCopy;
