//! Two-pass multi-scale template search.
//!
//! Pass 1 scans a focused band where the mark usually sits. Pass 2 scans the
//! whole frame on a coarser grid, and only runs when pass 1 found nothing
//! convincing. Both passes gate every grid position with a cheap strided MAD
//! (with early abort) and refine survivors with the composite MAD+NCC score,
//! against the template and its brightness inverse.

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::grayscale::GrayBuffer;
use crate::scoring::{mad_score, refine_score, RefineWeights};
use crate::template::{scaled_size, ScalePath, Template};

/// A located candidate rectangle and its similarity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Match {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Width.
    pub w: u32,
    /// Height.
    pub h: u32,
    /// Similarity in `[0, 1]`.
    pub score: f32,
}

impl Match {
    /// Map into another coordinate space by `factor`, clamped to
    /// `bound_w x bound_h`. The score is carried over unchanged.
    #[must_use]
    pub fn scaled(&self, factor: f32, bound_w: u32, bound_h: u32) -> Self {
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            clippy::cast_precision_loss
        )]
        let map = |v: u32| (v as f32 * factor).round().max(0.0) as u32;
        let x = map(self.x).min(bound_w);
        let y = map(self.y).min(bound_h);
        Self {
            x,
            y,
            w: map(self.w).min(bound_w - x),
            h: map(self.h).min(bound_h - y),
            score: self.score,
        }
    }
}

/// Where candidate top-left corners are taken from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScanRegion {
    /// A sub-band of the frame.
    Band {
        /// Leftmost corner, as a fraction of the width.
        left_frac: f32,
        /// Pixels kept clear between the window and the right edge.
        right_margin: u32,
        /// Topmost corner, as a fraction of the height.
        top_frac: f32,
        /// Lowest corner, as a fraction of the height.
        bottom_frac: f32,
    },
    /// Every position where the window fits.
    Full,
}

/// Inclusive range of candidate top-left corners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CornerRange {
    x0: u32,
    x1: u32,
    y0: u32,
    y1: u32,
}

impl ScanRegion {
    /// Corners for a `tw x th` window over a `w x h` frame, or `None` when
    /// no position qualifies. Assumes the window fits the frame.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn corners(&self, w: u32, h: u32, tw: u32, th: u32) -> Option<CornerRange> {
        let range = match *self {
            Self::Full => CornerRange {
                x0: 0,
                x1: w - tw,
                y0: 0,
                y1: h - th,
            },
            Self::Band {
                left_frac,
                right_margin,
                top_frac,
                bottom_frac,
            } => CornerRange {
                x0: (w as f32 * left_frac) as u32,
                x1: w.checked_sub(tw + right_margin)?,
                y0: (h as f32 * top_frac) as u32,
                y1: ((h as f32 * bottom_frac) as u32).min(h - th),
            },
        };
        (range.x0 <= range.x1 && range.y0 <= range.y1).then_some(range)
    }
}

/// Grid and thresholds of one pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PassParams {
    /// Candidate corners.
    pub region: ScanRegion,
    /// Grid spacing between candidate corners.
    pub stride: u32,
    /// Sampling stride of the gate MAD.
    pub gate_step: u32,
    /// Gate floor; positions where both polarities score lower are skipped.
    pub gate_min: f32,
    /// Refined scores below this are ignored.
    pub refine_min: f32,
}

impl PassParams {
    /// Pass 1 defaults: the upper-middle band, fine grid.
    #[must_use]
    pub fn focus() -> Self {
        Self {
            region: ScanRegion::Band {
                left_frac: 0.02,
                right_margin: 4,
                top_frac: 0.05,
                bottom_frac: 0.55,
            },
            stride: 3,
            gate_step: 3,
            gate_min: 0.84,
            refine_min: 0.0,
        }
    }

    /// Pass 2 defaults: the whole frame, coarser grid, relaxed gate.
    #[must_use]
    pub fn fallback() -> Self {
        Self {
            region: ScanRegion::Full,
            stride: 4,
            gate_step: 3,
            gate_min: 0.82,
            refine_min: 0.80,
        }
    }
}

/// Tunables of the multi-scale search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchParams {
    /// Template scale factors, ascending.
    pub scales: Vec<f32>,
    /// First pass.
    pub focus: PassParams,
    /// Full-frame pass.
    pub fallback: PassParams,
    /// Run the fallback pass when the focus best is below this.
    pub fallback_below: f32,
    /// A match is reported only when its score is strictly above this.
    pub accept_above: f32,
    /// Composite score used on gated positions.
    pub refine: RefineWeights,
    /// Scaled templates smaller than this on either side are skipped.
    pub min_template_side: u32,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            scales: vec![
                0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0, 1.1, 1.2, 1.35, 1.5, 1.65, 1.8,
            ],
            focus: PassParams::focus(),
            fallback: PassParams::fallback(),
            fallback_below: 0.88,
            accept_above: 0.87,
            refine: RefineWeights::default(),
            min_template_side: 2,
        }
    }
}

/// Which pass a yield point belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    /// The focused band.
    Focus,
    /// The full-frame fallback.
    Fallback,
}

/// A point where the search hands control back to its host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YieldPoint {
    /// One grid row of one scale has been scanned.
    Row {
        /// Current pass.
        pass: Pass,
        /// Index into [`SearchParams::scales`].
        scale_index: usize,
        /// Corner row just finished.
        y: u32,
    },
    /// One scale has been scanned (or skipped).
    Scale {
        /// Current pass.
        pass: Pass,
        /// Index into [`SearchParams::scales`].
        scale_index: usize,
    },
}

/// Cooperative scheduling hook called at every [`YieldPoint`].
///
/// Yielding affects responsiveness only, never the result.
pub trait SearchHook {
    /// Called after each row and each scale.
    fn on_yield(&mut self, point: YieldPoint);
}

/// Runs to completion without yielding.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoYield;

impl SearchHook for NoYield {
    fn on_yield(&mut self, _point: YieldPoint) {}
}

/// Yields the OS thread at every point; used on background workers.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadYield;

impl SearchHook for ThreadYield {
    fn on_yield(&mut self, _point: YieldPoint) {
        std::thread::yield_now();
    }
}

impl<F: FnMut(YieldPoint)> SearchHook for F {
    fn on_yield(&mut self, point: YieldPoint) {
        self(point);
    }
}

/// Search `src` for `template` at every configured scale.
///
/// Returns the best match when its score exceeds
/// [`SearchParams::accept_above`], otherwise `None`. The result depends only
/// on the inputs; ties keep the earliest candidate (pass order, ascending
/// scale, row-major position).
///
/// # Errors
///
/// Propagates [`crate::Error::RasterUnavailable`] when `path` is
/// [`ScalePath::Raster`] and the template has no raster.
pub fn search(
    src: &GrayBuffer,
    template: &Template,
    path: ScalePath,
    params: &SearchParams,
    hook: &mut dyn SearchHook,
) -> Result<Option<Match>> {
    let mut scan = Scan {
        src,
        template,
        path,
        params,
        hook,
        best: None,
    };

    scan.run(Pass::Focus, &params.focus)?;
    debug!("focus pass best: {:?}", scan.best);

    if scan.best.is_none_or(|m| m.score < params.fallback_below) {
        scan.run(Pass::Fallback, &params.fallback)?;
        debug!("fallback pass best: {:?}", scan.best);
    }

    Ok(scan.best.filter(|m| m.score > params.accept_above))
}

struct Scan<'a> {
    src: &'a GrayBuffer,
    template: &'a Template,
    path: ScalePath,
    params: &'a SearchParams,
    hook: &'a mut dyn SearchHook,
    best: Option<Match>,
}

impl Scan<'_> {
    fn run(&mut self, pass: Pass, pp: &PassParams) -> Result<()> {
        let (w, h) = (self.src.width(), self.src.height());
        let min_side = self.params.min_template_side;

        for (scale_index, &scale) in self.params.scales.iter().enumerate() {
            let (tw, th) = scaled_size(self.template.width(), self.template.height(), scale);
            let fits = tw >= min_side && th >= min_side && tw <= w && th <= h;
            if let Some(range) = fits.then(|| pp.region.corners(w, h, tw, th)).flatten() {
                let dark = self.template.resample(tw, th, self.path)?;
                let light = dark.inverted();
                let gated = self.scan_scale(pass, pp, scale_index, range, &dark, &light);
                trace!("{pass:?} scale {scale} ({tw}x{th}): {gated} positions past the gate");
            }
            self.hook.on_yield(YieldPoint::Scale { pass, scale_index });
        }
        Ok(())
    }

    /// Scan one scale; returns how many positions passed the gate.
    fn scan_scale(
        &mut self,
        pass: Pass,
        pp: &PassParams,
        scale_index: usize,
        range: CornerRange,
        dark: &GrayBuffer,
        light: &GrayBuffer,
    ) -> usize {
        let stride = pp.stride.max(1) as usize;
        let refine = &self.params.refine;
        let mut gated = 0;

        for y in (range.y0..=range.y1).step_by(stride) {
            for x in (range.x0..=range.x1).step_by(stride) {
                let gate = mad_score(self.src, x, y, dark, pp.gate_step, pp.gate_min)
                    .max(mad_score(self.src, x, y, light, pp.gate_step, pp.gate_min));
                if gate < pp.gate_min {
                    continue;
                }
                gated += 1;

                let score = refine_score(self.src, x, y, dark, refine)
                    .max(refine_score(self.src, x, y, light, refine));
                if score < pp.refine_min {
                    continue;
                }
                if self.best.is_none_or(|b| score > b.score) {
                    self.best = Some(Match {
                        x,
                        y,
                        w: dark.width(),
                        h: dark.height(),
                        score,
                    });
                }
            }
            self.hook.on_yield(YieldPoint::Row {
                pass,
                scale_index,
                y,
            });
        }
        gated
    }
}
