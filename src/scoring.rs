//! Window similarity metrics.
//!
//! Each scorer compares the template-sized window of `src` whose top-left
//! corner is `(x, y)` against `tpl`, visiting every `step`-th row and column.
//! Scores are similarities in `[0, 1]`, higher is better.
//!
//! The caller guarantees the window lies inside `src`.

use serde::{Deserialize, Serialize};

use crate::grayscale::GrayBuffer;

/// Variance floor for NCC, in squared luminance units.
const VARIANCE_EPSILON: f64 = 1e-6;

/// Mean-absolute-difference similarity, `1 - mean / 255`.
///
/// After each sampled row the running mean is checked against the worst
/// mean still compatible with `min_score`; once it is exceeded the partial
/// score is returned immediately. Pass `0.0` to always scan the full window.
#[must_use]
pub fn mad_score(
    src: &GrayBuffer,
    x: u32,
    y: u32,
    tpl: &GrayBuffer,
    step: u32,
    min_score: f32,
) -> f32 {
    debug_assert!(x + tpl.width() <= src.width() && y + tpl.height() <= src.height());
    let step = step.max(1) as usize;
    let max_mean = (1.0 - min_score) * 255.0;
    let (x, tw) = (x as usize, tpl.width() as usize);

    let mut sum = 0.0_f32;
    let mut count = 0_u32;
    for ty in (0..tpl.height()).step_by(step) {
        let src_row = &src.row(y + ty)[x..x + tw];
        let tpl_row = tpl.row(ty);
        for tx in (0..tw).step_by(step) {
            sum += (src_row[tx] - tpl_row[tx]).abs();
            count += 1;
        }
        #[allow(clippy::cast_precision_loss)]
        let mean = sum / count as f32;
        if mean > max_mean {
            return 1.0 - mean / 255.0;
        }
    }

    if count == 0 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let mean = sum / count as f32;
    1.0 - mean / 255.0
}

/// Normalized cross-correlation rescaled from `[-1, 1]` to `[0, 1]`.
///
/// Invariant to a constant brightness offset in either buffer. Flat windows
/// have their variance floored, which pulls the correlation towards 0.5.
#[must_use]
pub fn ncc_score(src: &GrayBuffer, x: u32, y: u32, tpl: &GrayBuffer, step: u32) -> f32 {
    debug_assert!(x + tpl.width() <= src.width() && y + tpl.height() <= src.height());
    let step = step.max(1) as usize;
    let (x, tw) = (x as usize, tpl.width() as usize);

    let mut n = 0.0_f64;
    let (mut sum_a, mut sum_b) = (0.0_f64, 0.0_f64);
    let (mut sum_aa, mut sum_bb, mut sum_ab) = (0.0_f64, 0.0_f64, 0.0_f64);
    for ty in (0..tpl.height()).step_by(step) {
        let src_row = &src.row(y + ty)[x..x + tw];
        let tpl_row = tpl.row(ty);
        for tx in (0..tw).step_by(step) {
            let a = f64::from(src_row[tx]);
            let b = f64::from(tpl_row[tx]);
            n += 1.0;
            sum_a += a;
            sum_b += b;
            sum_aa += a * a;
            sum_bb += b * b;
            sum_ab += a * b;
        }
    }
    if n < 1.0 {
        return 0.0;
    }

    let var_a = (sum_aa - sum_a * sum_a / n).max(VARIANCE_EPSILON);
    let var_b = (sum_bb - sum_b * sum_b / n).max(VARIANCE_EPSILON);
    let cov = sum_ab - sum_a * sum_b / n;
    let r = cov / (var_a * var_b).sqrt();

    #[allow(clippy::cast_possible_truncation)]
    let score = ((r + 1.0) * 0.5) as f32;
    score.clamp(0.0, 1.0)
}

/// Weights and sampling strides of the composite refine score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefineWeights {
    /// Weight of the MAD term.
    pub mad_weight: f32,
    /// Weight of the NCC term.
    pub ncc_weight: f32,
    /// Sampling stride of the MAD term.
    pub mad_step: u32,
    /// Sampling stride of the NCC term.
    pub ncc_step: u32,
}

impl Default for RefineWeights {
    fn default() -> Self {
        Self {
            mad_weight: 0.5,
            ncc_weight: 0.5,
            mad_step: 1,
            ncc_step: 2,
        }
    }
}

/// Composite score used to rank candidates that passed the cheap gate.
#[must_use]
pub fn refine_score(
    src: &GrayBuffer,
    x: u32,
    y: u32,
    tpl: &GrayBuffer,
    weights: &RefineWeights,
) -> f32 {
    weights.mad_weight * mad_score(src, x, y, tpl, weights.mad_step, 0.0)
        + weights.ncc_weight * ncc_score(src, x, y, tpl, weights.ncc_step)
}
