//! Parallel per-pixel dispatch of a [`Transform`] over an image.
//!
//! The source is copied into a read-only [`PixelBuffer`] shared by every
//! worker. The destination buffer is split into one chunk per pixel with
//! rayon, so each unit of work owns the bytes it writes and nothing else.

use std::time::Instant;

use log::debug;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::buffer::ImageLock;
use crate::error::{Error, Result};
use crate::image::{Image, PixelFormat, Position};
use crate::transform::Transform;

/// Format of every image produced by a dispatch.
pub const OUTPUT_FORMAT: PixelFormat = PixelFormat::Argb32;

/// Maps a transform over every pixel of an image.
#[derive(Default)]
pub struct ComputeDispatcher {
    pool: Option<ThreadPool>,
}

impl ComputeDispatcher {
    /// Dispatcher running on rayon's global pool.
    pub fn new() -> Self {
        Self { pool: None }
    }

    /// Dispatcher with its own pool of `threads` workers (0 = global pool).
    pub fn with_threads(threads: usize) -> Result<Self> {
        if threads == 0 {
            return Ok(Self::new());
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("imageedit-compute-{i}"))
            .build()
            .map_err(|e| Error::ThreadPool(e.to_string()))?;
        Ok(Self { pool: Some(pool) })
    }

    /// Apply `transform` to every pixel of `source`.
    ///
    /// Without a transform the source is returned unchanged (as a copy).
    /// Blocks until every pixel is computed. If the transform fails for any
    /// pixel, no new pixels are started, the error is returned and the
    /// partial result is discarded.
    ///
    /// # Returns
    /// A new 32-bit ARGB image with the dimensions of `source`
    pub fn run(&self, transform: Option<&dyn Transform>, source: &Image) -> Result<Image> {
        let Some(transform) = transform else {
            return Ok(source.clone());
        };

        match &self.pool {
            Some(pool) => pool.install(|| compute(transform, source)),
            None => compute(transform, source),
        }
    }
}

fn compute(transform: &dyn Transform, source: &Image) -> Result<Image> {
    let started = Instant::now();

    let read = ImageLock::read(source)?;
    let input = read.buffer()?;
    let (width, height) = (input.width(), input.height());
    let bpp = OUTPUT_FORMAT.bytes_per_pixel();

    let mut destination = Image::new(width, height, OUTPUT_FORMAT);
    {
        let mut write = ImageLock::write(&mut destination)?;
        write
            .buffer_mut()?
            .pixels_mut()
            .par_chunks_exact_mut(bpp)
            .enumerate()
            .try_for_each(|(index, pixel)| -> Result<()> {
                let (ix, iy) = (index % width, index / width);
                let position = Position::of_pixel(ix, iy, width, height);
                let color = transform
                    .compute(position, input)
                    .map_err(|err| Error::TransformCompute {
                        transform: transform.name().to_string(),
                        x: ix,
                        y: iy,
                        message: err.message,
                    })?;
                OUTPUT_FORMAT.encode(color, pixel);
                Ok(())
            })?;
    }

    debug!(
        "'{}' computed {}x{} in {:?}",
        transform.name(),
        width,
        height,
        started.elapsed()
    );
    Ok(destination)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::PixelBuffer;
    use crate::error::TransformError;
    use crate::image::Color;
    use crate::transform::{FnTransform, ReadableImage};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn gradient(width: usize, height: usize, format: PixelFormat) -> Image {
        let mut image = Image::new(width, height, format);
        {
            let mut lock = ImageLock::write(&mut image).unwrap();
            for y in 0..height {
                for x in 0..width {
                    let color = Color::from_argb(
                        255u8.wrapping_sub((x * 7) as u8),
                        (x * 13 + y) as u8,
                        (y * 29) as u8,
                        (x * y) as u8,
                    );
                    lock.set_pixel(x, y, color).unwrap();
                }
            }
        }
        image
    }

    fn passthrough(position: Position, image: &dyn ReadableImage) -> Result<Color, TransformError> {
        Ok(image.get(position.x, position.y))
    }

    #[test]
    fn test_no_transform_returns_copy() {
        let source = gradient(6, 4, PixelFormat::Rgb24);
        let dispatcher = ComputeDispatcher::new();
        assert_eq!(dispatcher.run(None, &source).unwrap(), source);
    }

    #[test]
    fn test_passthrough_reproduces_source_pixels() {
        let source = gradient(9, 5, PixelFormat::Argb32);
        let transform = FnTransform::new("Passthrough", passthrough);
        let result = ComputeDispatcher::new().run(Some(&transform), &source).unwrap();

        assert_eq!(result.format().unwrap(), OUTPUT_FORMAT);
        assert_eq!(result, source);
    }

    #[test]
    fn test_rgb24_source_gives_opaque_argb_output() {
        let source = gradient(4, 3, PixelFormat::Rgb24);
        let transform = FnTransform::new("Passthrough", passthrough);
        let result = ComputeDispatcher::new().run(Some(&transform), &source).unwrap();

        let expected = PixelBuffer::acquire(&source).unwrap();
        let actual = PixelBuffer::acquire(&result).unwrap();
        for y in 0..3 {
            for x in 0..4 {
                let color = actual.get_pixel(x, y).unwrap();
                assert_eq!(color, expected.get_pixel(x, y).unwrap());
                assert_eq!(color.a, 255);
            }
        }
    }

    #[test]
    fn test_positions_are_normalized() {
        let source = Image::new(5, 3, PixelFormat::Gray8);
        let transform = FnTransform::new("Coordinates", |p: Position, _: &dyn ReadableImage| {
            Ok(Color::from_argb_f32(255.0, p.x * 255.0, p.y * 255.0, 0.0))
        });
        let result = ComputeDispatcher::new().run(Some(&transform), &source).unwrap();
        let buffer = PixelBuffer::acquire(&result).unwrap();

        assert_eq!(buffer.get_pixel(0, 0).unwrap(), Color::from_argb(255, 0, 0, 0));
        assert_eq!(buffer.get_pixel(4, 2).unwrap(), Color::from_argb(255, 255, 255, 0));
        assert_eq!(buffer.get_pixel(2, 1).unwrap().r, 127);
    }

    #[test]
    fn test_single_column_uses_zero_x() {
        let source = Image::new(1, 4, PixelFormat::Argb32);
        let transform = FnTransform::new("Coordinates", |p: Position, _: &dyn ReadableImage| {
            assert_eq!(p.x, 0.0);
            Ok(Color::from_argb_f32(255.0, 0.0, p.y * 255.0, 0.0))
        });
        let result = ComputeDispatcher::new().run(Some(&transform), &source).unwrap();
        assert_eq!(PixelBuffer::acquire(&result).unwrap().get_pixel(0, 3).unwrap().g, 255);
    }

    #[test]
    fn test_every_pixel_computed_once() {
        let calls = AtomicUsize::new(0);
        let source = gradient(31, 17, PixelFormat::Argb32);
        let transform = FnTransform::new("Counter", |p: Position, image: &dyn ReadableImage| {
            calls.fetch_add(1, Ordering::Relaxed);
            passthrough(p, image)
        });
        ComputeDispatcher::new().run(Some(&transform), &source).unwrap();
        assert_eq!(calls.load(Ordering::Relaxed), 31 * 17);
    }

    #[test]
    fn test_repeated_runs_are_identical() {
        let source = gradient(64, 48, PixelFormat::Rgb24);
        let transform = FnTransform::new("Shift", |p: Position, image: &dyn ReadableImage| {
            let a = image.get(p.x + 0.013, p.y - 0.021);
            let b = image.get(p.x - 0.37, p.y + 0.5);
            Ok(Color::from_argb(a.a, a.r / 2 + b.r / 2, a.g, b.b))
        });
        let dispatcher = ComputeDispatcher::with_threads(3).unwrap();

        let first = dispatcher.run(Some(&transform), &source).unwrap();
        let second = dispatcher.run(Some(&transform), &source).unwrap();
        assert_eq!(first.pixels(), second.pixels());
    }

    #[test]
    fn test_transform_error_is_surfaced() {
        let source = gradient(8, 6, PixelFormat::Argb32);
        let transform = FnTransform::new("Faulty", |p: Position, image: &dyn ReadableImage| {
            if p == Position::of_pixel(3, 2, 8, 6) {
                return Err(TransformError::new("bad pixel"));
            }
            passthrough(p, image)
        });

        let err = ComputeDispatcher::new().run(Some(&transform), &source).unwrap_err();
        match err {
            Error::TransformCompute {
                transform,
                x,
                y,
                message,
            } => {
                assert_eq!(transform, "Faulty");
                assert_eq!((x, y), (3, 2));
                assert_eq!(message, "bad pixel");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unsupported_source_depth() {
        let source = Image::with_depth(4, 4, 16);
        let transform = FnTransform::new("Passthrough", passthrough);
        assert!(matches!(
            ComputeDispatcher::new().run(Some(&transform), &source),
            Err(Error::UnsupportedFormat { depth: 16 })
        ));
    }

    #[test]
    fn test_empty_image() {
        let source = Image::new(0, 0, PixelFormat::Argb32);
        let transform = FnTransform::new("Passthrough", passthrough);
        let result = ComputeDispatcher::new().run(Some(&transform), &source).unwrap();
        assert_eq!((result.width(), result.height()), (0, 0));
    }
}
