//! Image, pixel format, color and position types.
//!
//! ## Memory Layout
//!
//! An [`Image`] stores its pixels in an `Array3<u8>` of shape
//! (height, width, bytes_per_pixel). Within one pixel the bytes follow the
//! little-endian ARGB layout used by common bitmap APIs:
//!
//! | Format | Depth | Bytes | Layout |
//! |--------|-------|-------|--------|
//! | Gray8  | 8     | 1     | intensity |
//! | Rgb24  | 24    | 3     | B, G, R |
//! | Argb32 | 32    | 4     | B, G, R, A |
//!
//! Images may be declared with any depth so that a decoder can hand over
//! whatever it found; only the three depths above are accepted by the
//! compute core.

use std::ops::{Add, AddAssign, Mul, Sub};

use ndarray::{Array3, ArrayView3};

use crate::error::{Error, Result};

// ============================================================================
// Pixel Format
// ============================================================================

/// Supported pixel depths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Gray8,
    Rgb24,
    Argb32,
}

impl PixelFormat {
    /// Map a bits-per-pixel value to a supported format.
    pub fn from_depth(depth: u32) -> Result<Self> {
        match depth {
            8 => Ok(Self::Gray8),
            24 => Ok(Self::Rgb24),
            32 => Ok(Self::Argb32),
            _ => Err(Error::UnsupportedFormat { depth }),
        }
    }

    pub fn depth(self) -> u32 {
        match self {
            Self::Gray8 => 8,
            Self::Rgb24 => 24,
            Self::Argb32 => 32,
        }
    }

    pub fn bytes_per_pixel(self) -> usize {
        self.depth() as usize / 8
    }

    /// Read one pixel from its byte slice.
    ///
    /// `bytes` must hold at least `bytes_per_pixel()` bytes.
    #[inline]
    pub fn decode(self, bytes: &[u8]) -> Color {
        match self {
            Self::Argb32 => Color::from_argb(bytes[3], bytes[2], bytes[1], bytes[0]),
            Self::Rgb24 => Color::from_rgb(bytes[2], bytes[1], bytes[0]),
            Self::Gray8 => Color::from_rgb(bytes[0], bytes[0], bytes[0]),
        }
    }

    /// Write one pixel into its byte slice.
    ///
    /// Rgb24 drops alpha. Gray8 stores the blue channel as the intensity,
    /// not a luminance mix, so `decode(encode(c))` replicates `c.b`.
    #[inline]
    pub fn encode(self, color: Color, bytes: &mut [u8]) {
        match self {
            Self::Argb32 => {
                bytes[0] = color.b;
                bytes[1] = color.g;
                bytes[2] = color.r;
                bytes[3] = color.a;
            }
            Self::Rgb24 => {
                bytes[0] = color.b;
                bytes[1] = color.g;
                bytes[2] = color.r;
            }
            Self::Gray8 => {
                bytes[0] = color.b;
            }
        }
    }
}

// ============================================================================
// Color
// ============================================================================

/// 8-bit ARGB color.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Color {
    pub a: u8,
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const TRANSPARENT: Color = Color::from_argb(0, 0, 0, 0);
    pub const BLACK: Color = Color::from_rgb(0, 0, 0);
    pub const WHITE: Color = Color::from_rgb(255, 255, 255);

    pub const fn from_argb(a: u8, r: u8, g: u8, b: u8) -> Self {
        Self { a, r, g, b }
    }

    /// Fully opaque color.
    pub const fn from_rgb(r: u8, g: u8, b: u8) -> Self {
        Self { a: 255, r, g, b }
    }

    /// Build a color from float channels in 0-255 range.
    ///
    /// Each channel is clamped to [0, 255] and truncated toward zero.
    #[inline]
    pub fn from_argb_f32(a: f32, r: f32, g: f32, b: f32) -> Self {
        Self {
            a: channel_from_f32(a),
            r: channel_from_f32(r),
            g: channel_from_f32(g),
            b: channel_from_f32(b),
        }
    }

    /// Channels in (A, R, G, B) order.
    pub fn to_argb(self) -> [u8; 4] {
        [self.a, self.r, self.g, self.b]
    }
}

#[inline]
fn channel_from_f32(value: f32) -> u8 {
    // NaN clamps to NaN and `as u8` maps it to 0
    value.clamp(0.0, 255.0) as u8
}

// ============================================================================
// Position
// ============================================================================

/// Normalized image coordinate, (0, 0) top-left and (1, 1) bottom-right.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Normalized position of pixel `(ix, iy)` in a `width` x `height` image.
    ///
    /// A dimension of 1 (or 0) maps to component 0.
    pub fn of_pixel(ix: usize, iy: usize, width: usize, height: usize) -> Self {
        Self {
            x: normalize(ix, width),
            y: normalize(iy, height),
        }
    }
}

#[inline]
fn normalize(index: usize, len: usize) -> f32 {
    if len <= 1 {
        0.0
    } else {
        index as f32 / (len - 1) as f32
    }
}

impl Add for Position {
    type Output = Position;

    fn add(self, rhs: Position) -> Position {
        Position::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl AddAssign for Position {
    fn add_assign(&mut self, rhs: Position) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl Sub for Position {
    type Output = Position;

    fn sub(self, rhs: Position) -> Position {
        Position::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f32> for Position {
    type Output = Position;

    fn mul(self, rhs: f32) -> Position {
        Position::new(self.x * rhs, self.y * rhs)
    }
}

// ============================================================================
// Image
// ============================================================================

/// A caller-owned raster image.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    depth: u32,
    data: Array3<u8>,
}

impl Image {
    /// Blank (all zero) image in a supported format.
    pub fn new(width: usize, height: usize, format: PixelFormat) -> Self {
        Self::with_depth(width, height, format.depth())
    }

    /// Blank image declared with an arbitrary bit depth.
    ///
    /// Storage is rounded up to whole bytes per pixel.
    pub fn with_depth(width: usize, height: usize, depth: u32) -> Self {
        let bytes = (depth as usize).div_ceil(8).max(1);
        Self {
            depth,
            data: Array3::zeros((height, width, bytes)),
        }
    }

    /// Wrap raw pixel bytes of shape (height, width, bytes_per_pixel).
    pub fn from_array(data: Array3<u8>, depth: u32) -> Result<Self> {
        let expected = (depth as usize).div_ceil(8).max(1);
        let (_, _, bytes) = data.dim();
        if bytes != expected {
            return Err(Error::Config(format!(
                "{depth} bpp image needs {expected} bytes per pixel, array has {bytes}"
            )));
        }
        Ok(Self {
            depth,
            data: data.as_standard_layout().into_owned(),
        })
    }

    /// Build an image from a channel-ordered array (gray, RGB or RGBA).
    ///
    /// # Arguments
    /// * `channels` - Array of shape (height, width, 1 | 3 | 4)
    pub fn from_rgb_channels(channels: ArrayView3<u8>) -> Result<Self> {
        let (height, width, count) = channels.dim();
        let format = match count {
            1 => PixelFormat::Gray8,
            3 => PixelFormat::Rgb24,
            4 => PixelFormat::Argb32,
            other => {
                return Err(Error::UnsupportedFormat {
                    depth: other as u32 * 8,
                })
            }
        };

        let bpp = format.bytes_per_pixel();
        let mut pixels = vec![0u8; height * width * bpp];
        for (index, pixel) in pixels.chunks_exact_mut(bpp).enumerate() {
            let (y, x) = (index / width, index % width);
            let color = match count {
                1 => {
                    let v = channels[[y, x, 0]];
                    Color::from_rgb(v, v, v)
                }
                3 => Color::from_rgb(channels[[y, x, 0]], channels[[y, x, 1]], channels[[y, x, 2]]),
                _ => Color::from_argb(
                    channels[[y, x, 3]],
                    channels[[y, x, 0]],
                    channels[[y, x, 1]],
                    channels[[y, x, 2]],
                ),
            };
            format.encode(color, pixel);
        }

        let data = Array3::from_shape_vec((height, width, bpp), pixels)
            .map_err(|e| Error::Config(e.to_string()))?;
        Ok(Self {
            depth: format.depth(),
            data,
        })
    }

    /// Convert to a channel-ordered array (gray, RGB or RGBA).
    pub fn to_rgb_channels(&self) -> Result<Array3<u8>> {
        let format = self.format()?;
        let (height, width, _) = self.data.dim();
        let count = match format {
            PixelFormat::Gray8 => 1,
            PixelFormat::Rgb24 => 3,
            PixelFormat::Argb32 => 4,
        };

        let mut output = Array3::<u8>::zeros((height, width, count));
        for (index, pixel) in self.pixels().chunks_exact(format.bytes_per_pixel()).enumerate() {
            let (y, x) = (index / width, index % width);
            let color = format.decode(pixel);
            match format {
                PixelFormat::Gray8 => output[[y, x, 0]] = color.b,
                PixelFormat::Rgb24 | PixelFormat::Argb32 => {
                    output[[y, x, 0]] = color.r;
                    output[[y, x, 1]] = color.g;
                    output[[y, x, 2]] = color.b;
                    if count == 4 {
                        output[[y, x, 3]] = color.a;
                    }
                }
            }
        }
        Ok(output)
    }

    pub fn width(&self) -> usize {
        self.data.dim().1
    }

    pub fn height(&self) -> usize {
        self.data.dim().0
    }

    /// Declared bits per pixel.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn format(&self) -> Result<PixelFormat> {
        PixelFormat::from_depth(self.depth)
    }

    pub fn data(&self) -> ArrayView3<'_, u8> {
        self.data.view()
    }

    /// Row-major pixel bytes.
    pub fn pixels(&self) -> &[u8] {
        self.data
            .as_slice()
            .expect("image storage is always in standard layout")
    }

    pub(crate) fn pixels_mut(&mut self) -> &mut [u8] {
        self.data
            .as_slice_mut()
            .expect("image storage is always in standard layout")
    }

    pub fn into_array(self) -> Array3<u8> {
        self.data
    }
}
