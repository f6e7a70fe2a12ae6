//! Rectangle fill by directional stripe copy.
//!
//! The rectangle is painted with the colour of the column just outside it on
//! the flatter side, then a one-pixel padded ring around it is smoothed with
//! a weighted 3x3 box blur so the seam is less visible.

use image::RgbaImage;

/// Width of the strips whose variance picks the donor side.
const DONOR_STRIP_WIDTH: u32 = 4;
/// Weight of the centre tap of the seam blur; the other eight taps weigh 1.
const BLUR_CENTER_WEIGHT: u32 = 2;
/// Sum of all blur weights.
const BLUR_NORM: u32 = BLUR_CENTER_WEIGHT + 8;

/// An axis-aligned pixel rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Width.
    pub w: u32,
    /// Height.
    pub h: u32,
}

impl Rect {
    /// Intersection with a `width x height` image.
    #[must_use]
    pub fn clipped(&self, width: u32, height: u32) -> Self {
        let x = self.x.min(width);
        let y = self.y.min(height);
        Self {
            x,
            y,
            w: self.w.min(width - x),
            h: self.h.min(height - y),
        }
    }

    /// Whether the rectangle covers no pixel.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.w == 0 || self.h == 0
    }
}

impl From<crate::search::Match> for Rect {
    fn from(m: crate::search::Match) -> Self {
        Self {
            x: m.x,
            y: m.y,
            w: m.w,
            h: m.h,
        }
    }
}

/// Side of the rectangle that supplied the fill colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DonorSide {
    /// The column just left of the rectangle.
    Left,
    /// The column just right of the rectangle.
    Right,
}

/// Sum of per-channel RGB variances over the pixels of columns
/// `[x0, x1)` and rows `[y0, y1)`. Empty regions are infinitely noisy.
fn color_variance(image: &RgbaImage, x0: u32, x1: u32, y0: u32, y1: u32) -> f64 {
    let mut n = 0.0_f64;
    let mut sum = [0.0_f64; 3];
    let mut sum_sq = [0.0_f64; 3];
    for y in y0..y1 {
        for x in x0..x1 {
            let px = image.get_pixel(x, y);
            for ch in 0..3 {
                let v = f64::from(px[ch]);
                sum[ch] += v;
                sum_sq[ch] += v * v;
            }
            n += 1.0;
        }
    }
    if n < 1.0 {
        return f64::INFINITY;
    }
    (0..3)
        .map(|ch| {
            let mean = sum[ch] / n;
            (sum_sq[ch] / n - mean * mean).max(0.0)
        })
        .sum()
}

/// Pick the donor side for an already clipped, non-empty rectangle.
fn choose_donor(image: &RgbaImage, rect: Rect) -> DonorSide {
    let (y0, y1) = (rect.y, rect.y + rect.h);
    let right_start = rect.x + rect.w;

    let left = color_variance(
        image,
        rect.x.saturating_sub(DONOR_STRIP_WIDTH),
        rect.x,
        y0,
        y1,
    );
    let right = color_variance(
        image,
        right_start,
        (right_start + DONOR_STRIP_WIDTH).min(image.width()),
        y0,
        y1,
    );

    if left <= right {
        DonorSide::Left
    } else {
        DonorSide::Right
    }
}

/// Paint `rect` over with a neighbouring column and blur the seam.
///
/// The rectangle is clipped to the image first; an empty rectangle is a
/// no-op and returns `None`. The fill copies RGB only and leaves alpha as
/// is. The blur covers `rect` grown by one pixel on every side (clipped),
/// reads from a snapshot taken after the fill, and includes alpha. Nothing
/// outside that padded region is written.
pub fn inpaint_region(image: &mut RgbaImage, rect: Rect) -> Option<DonorSide> {
    let (width, height) = image.dimensions();
    let rect = rect.clipped(width, height);
    if rect.is_empty() {
        return None;
    }

    let side = choose_donor(image, rect);
    let donor_x = match side {
        DonorSide::Left => rect.x.saturating_sub(1),
        DonorSide::Right => (rect.x + rect.w).min(width - 1),
    };

    for y in rect.y..rect.y + rect.h {
        let donor = *image.get_pixel(donor_x, y);
        for x in rect.x..rect.x + rect.w {
            let px = image.get_pixel_mut(x, y);
            px.0[..3].copy_from_slice(&donor.0[..3]);
        }
    }

    smooth_seam(image, rect);
    Some(side)
}

fn smooth_seam(image: &mut RgbaImage, rect: Rect) {
    let (width, height) = image.dimensions();
    let snapshot = image.clone();

    let x0 = rect.x.saturating_sub(1);
    let y0 = rect.y.saturating_sub(1);
    let x1 = (rect.x + rect.w).min(width - 1);
    let y1 = (rect.y + rect.h).min(height - 1);

    #[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
    let clamp = |v: i64, len: u32| v.clamp(0, i64::from(len) - 1) as u32;

    for y in y0..=y1 {
        for x in x0..=x1 {
            let mut acc = [0_u32; 4];
            for dy in -1_i64..=1 {
                for dx in -1_i64..=1 {
                    let sx = clamp(i64::from(x) + dx, width);
                    let sy = clamp(i64::from(y) + dy, height);
                    let weight = if dx == 0 && dy == 0 {
                        BLUR_CENTER_WEIGHT
                    } else {
                        1
                    };
                    let px = snapshot.get_pixel(sx, sy);
                    for (a, &c) in acc.iter_mut().zip(px.0.iter()) {
                        *a += weight * u32::from(c);
                    }
                }
            }
            let out = image.get_pixel_mut(x, y);
            for (o, a) in out.0.iter_mut().zip(acc) {
                #[allow(clippy::cast_possible_truncation)]
                {
                    *o = ((a + BLUR_NORM / 2) / BLUR_NORM) as u8;
                }
            }
        }
    }
}
