//! Wrap-around bilinear sampling over a [`PixelBuffer`].
//!
//! ## Coordinate Mapping
//!
//! Normalized coordinates are scaled by `(width - 1, height - 1)`, so
//! `gx / (width - 1)` lands exactly on pixel column `gx`. The scaled value is
//! then wrapped into `[0, width)`: the image repeats every `width` pixels,
//! which is `width / (width - 1)` in normalized units.
//!
//! ## Rounding
//!
//! Blended channels are clamped to [0, 255] and truncated, so the midpoint of
//! a 0/255 pair of pixels in both axes gives 63 (63.75 truncated).

use crate::buffer::PixelBuffer;
use crate::image::Color;
use crate::transform::ReadableImage;


/// Sample `buffer` at normalized `(x, y)` with wrap addressing.
///
/// An empty buffer samples as transparent black.
pub fn sample(buffer: &PixelBuffer, x: f32, y: f32) -> Color {
    let (width, height) = (buffer.width(), buffer.height());
    if width == 0 || height == 0 {
        return Color::TRANSPARENT;
    }

    let x = wrap(scale(x, width), width);
    let y = wrap(scale(y, height), height);

    let x1 = (x.floor() as usize).min(width - 1);
    let y1 = (y.floor() as usize).min(height - 1);
    let fx = x - x1 as f32;
    let fy = y - y1 as f32;
    let x2 = if x1 + 1 >= width { 0 } else { x1 + 1 };
    let y2 = if y1 + 1 >= height { 0 } else { y1 + 1 };

    let p11 = buffer.pixel(x1, y1);
    let p21 = buffer.pixel(x2, y1);
    let p12 = buffer.pixel(x1, y2);
    let p22 = buffer.pixel(x2, y2);

    // c11(1-fx)(1-fy) + c21 fx(1-fy) + c12(1-fx)fy + c22 fx fy, in lerp form
    // so equal corners come back unchanged.
    let blend = |c11: u8, c21: u8, c12: u8, c22: u8| -> f32 {
        let top = lerp(c11 as f32, c21 as f32, fx);
        let bottom = lerp(c12 as f32, c22 as f32, fx);
        lerp(top, bottom, fy)
    };

    Color::from_argb_f32(
        blend(p11.a, p21.a, p12.a, p22.a),
        blend(p11.r, p21.r, p12.r, p22.r),
        blend(p11.g, p21.g, p12.g, p22.g),
        blend(p11.b, p21.b, p12.b, p22.b),
    )
}

#[inline]
fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Scale a normalized coordinate to pixel units, snapping to the nearest
/// pixel when within f32 rounding error of it.
///
/// `(g / (n - 1)) * (n - 1)` is off from `g` by at most `g * EPSILON`;
/// without snapping, a sample on a pixel would blend in its neighbour by one
/// ulp and truncate a channel to one below its stored value.
#[inline]
fn scale(value: f32, len: usize) -> f32 {
    let scaled = value * (len - 1) as f32;
    let nearest = scaled.round();
    let tolerance = len as f32 * f32::EPSILON * 2.0;
    if (scaled - nearest).abs() <= tolerance {
        nearest
    } else {
        scaled
    }
}

/// Wrap `value` into `[0, len)`. Non-finite values map to 0.
#[inline]
fn wrap(value: f32, len: usize) -> f32 {
    if !value.is_finite() {
        return 0.0;
    }
    let len = len as f32;
    let wrapped = value.rem_euclid(len);
    // rem_euclid can round a tiny negative input up to exactly `len`
    if wrapped >= len {
        0.0
    } else {
        wrapped
    }
}

impl ReadableImage for PixelBuffer {
    fn get(&self, x: f32, y: f32) -> Color {
        sample(self, x, y)
    }

    fn width(&self) -> usize {
        PixelBuffer::width(self)
    }

    fn height(&self) -> usize {
        PixelBuffer::height(self)
    }
}
