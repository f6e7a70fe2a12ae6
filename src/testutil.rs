//! Synthetic scenes shared by the unit tests.

use image::{Rgba, RgbaImage};

use crate::grayscale::GrayBuffer;

pub(crate) const MARK: f32 = 40.0;
pub(crate) const PAPER: f32 = 235.0;
pub(crate) const BACKDROP: f32 = 120.0;

/// 40x40 mark: a ring with a diagonal bar, dark on light.
pub(crate) fn ring_mark() -> GrayBuffer {
    let mut data = Vec::with_capacity(40 * 40);
    for y in 0..40_i32 {
        for x in 0..40_i32 {
            let (dx, dy) = (x - 20, y - 20);
            let r2 = dx * dx + dy * dy;
            let ring = (144..=289).contains(&r2);
            let bar = (x - y).abs() <= 2 && r2 < 144;
            data.push(if ring || bar { MARK } else { PAPER });
        }
    }
    GrayBuffer::new(40, 40, data).unwrap()
}

pub(crate) fn paste(dst: &mut [f32], dst_w: u32, tpl: &GrayBuffer, x: u32, y: u32) {
    for ty in 0..tpl.height() {
        for tx in 0..tpl.width() {
            dst[((y + ty) * dst_w + x + tx) as usize] = tpl.at(tx, ty);
        }
    }
}

/// `tpl` pasted opaquely at `(x, y)` on a flat `w x h` backdrop.
pub(crate) fn scene(tpl: &GrayBuffer, w: u32, h: u32, x: u32, y: u32) -> GrayBuffer {
    let mut data = vec![BACKDROP; (w * h) as usize];
    paste(&mut data, w, tpl, x, y);
    GrayBuffer::new(w, h, data).unwrap()
}

/// Deterministic uniform noise in `[0, 255]`.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn noise(w: u32, h: u32, seed: u32) -> Vec<f32> {
    let mut state = seed;
    (0..w * h)
        .map(|_| {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            f32::from((state >> 24) as u8)
        })
        .collect()
}

/// Opaque gray RGBA image with the given luminance samples.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub(crate) fn to_rgba(gray: &GrayBuffer) -> RgbaImage {
    RgbaImage::from_fn(gray.width(), gray.height(), |x, y| {
        let v = gray.at(x, y).round().clamp(0.0, 255.0) as u8;
        Rgba([v, v, v, 255])
    })
}
