//! Raw pixel access with a copy-in / copy-out lock lifecycle.
//!
//! A [`PixelBuffer`] is a private, flat copy of an image's pixel bytes. The
//! hot per-pixel loops work on that copy without touching the source image.
//! [`ImageLock`] ties a buffer to its image for a scope: the copy is taken
//! once on acquire and written back once on release (or on drop).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::trace;
use once_cell::sync::OnceCell;

use crate::error::{Error, Result};
use crate::image::{Color, Image, PixelFormat};

// ============================================================================
// Pixel Buffer
// ============================================================================

/// Row-major pixel bytes plus their format.
///
/// Invariant: `pixels.len() == width * height * format.bytes_per_pixel()`.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    width: usize,
    height: usize,
    format: PixelFormat,
    pixels: Vec<u8>,
}

impl PixelBuffer {
    /// Copy the pixels of `image` into a new buffer.
    ///
    /// Fails with `UnsupportedFormat` before copying anything if the image
    /// depth is not 8, 24 or 32 bpp.
    pub fn acquire(image: &Image) -> Result<Self> {
        let format = image.format()?;
        Ok(Self {
            width: image.width(),
            height: image.height(),
            format,
            pixels: image.pixels().to_vec(),
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    /// Byte offset of pixel `(x, y)`.
    fn offset(&self, x: usize, y: usize) -> Result<usize> {
        let bpp = self.format.bytes_per_pixel();
        let out_of_range = || Error::IndexOutOfRange {
            index: y.saturating_mul(self.width).saturating_add(x),
            len: self.width * self.height,
        };

        if x >= self.width || y >= self.height {
            return Err(out_of_range());
        }
        let offset = ((y * self.width) + x) * bpp;
        if offset + bpp > self.pixels.len() {
            return Err(out_of_range());
        }
        Ok(offset)
    }

    pub fn get_pixel(&self, x: usize, y: usize) -> Result<Color> {
        let i = self.offset(x, y)?;
        Ok(self.format.decode(&self.pixels[i..]))
    }

    pub fn set_pixel(&mut self, x: usize, y: usize, color: Color) -> Result<()> {
        let i = self.offset(x, y)?;
        self.format.encode(color, &mut self.pixels[i..]);
        Ok(())
    }

    /// Read a pixel whose coordinates the caller has already wrapped.
    #[inline]
    pub(crate) fn pixel(&self, x: usize, y: usize) -> Color {
        debug_assert!(x < self.width && y < self.height);
        let i = ((y * self.width) + x) * self.format.bytes_per_pixel();
        self.format.decode(&self.pixels[i..])
    }

    fn write_back(&self, image: &mut Image) {
        image.pixels_mut().copy_from_slice(&self.pixels);
    }
}

// ============================================================================
// Image Lock
// ============================================================================

enum Binding<'a> {
    Read(&'a Image),
    Write(Mutex<&'a mut Image>),
}

/// Scoped acquisition of an image's pixels.
///
/// Acquire happens on construction and is idempotent afterwards; concurrent
/// first callers block on the same cell so the copy is made exactly once.
/// Release writes the buffer back into a write-bound image exactly once and
/// always runs on drop.
pub struct ImageLock<'a> {
    binding: Binding<'a>,
    buffer: OnceCell<PixelBuffer>,
    released: AtomicBool,
}

impl<'a> ImageLock<'a> {
    /// Lock `image` for reading. Release does not copy anything back.
    pub fn read(image: &'a Image) -> Result<Self> {
        Self::bind(Binding::Read(image))
    }

    /// Lock `image` for reading and writing. Release copies the buffer back.
    pub fn write(image: &'a mut Image) -> Result<Self> {
        Self::bind(Binding::Write(Mutex::new(image)))
    }

    fn bind(binding: Binding<'a>) -> Result<Self> {
        let lock = Self {
            binding,
            buffer: OnceCell::new(),
            released: AtomicBool::new(false),
        };
        lock.acquire()?;
        Ok(lock)
    }

    /// Copy the image into the buffer if that has not happened yet.
    pub fn acquire(&self) -> Result<&PixelBuffer> {
        self.buffer.get_or_try_init(|| {
            let buffer = match &self.binding {
                Binding::Read(image) => PixelBuffer::acquire(image),
                Binding::Write(target) => PixelBuffer::acquire(&lock_target(target)),
            }?;
            trace!(
                "acquired {}x{} {:?} buffer",
                buffer.width,
                buffer.height,
                buffer.format
            );
            Ok(buffer)
        })
    }

    /// Copy the buffer back into a write-bound image. Later calls are no-ops.
    pub fn release(&self) {
        if self.released.load(Ordering::Acquire) {
            return;
        }

        match &self.binding {
            Binding::Read(_) => self.released.store(true, Ordering::Release),
            Binding::Write(target) => {
                let mut image = lock_target(target);
                if self.released.load(Ordering::Acquire) {
                    return;
                }
                if let Some(buffer) = self.buffer.get() {
                    buffer.write_back(&mut image);
                    trace!("released {}x{} buffer", buffer.width, buffer.height);
                }
                self.released.store(true, Ordering::Release);
            }
        }
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    pub fn buffer(&self) -> Result<&PixelBuffer> {
        self.acquire()
    }

    pub fn buffer_mut(&mut self) -> Result<&mut PixelBuffer> {
        self.acquire()?;
        Ok(self
            .buffer
            .get_mut()
            .expect("buffer is initialized by acquire"))
    }

    pub fn get_pixel(&self, x: usize, y: usize) -> Result<Color> {
        self.buffer()?.get_pixel(x, y)
    }

    pub fn set_pixel(&mut self, x: usize, y: usize, color: Color) -> Result<()> {
        self.buffer_mut()?.set_pixel(x, y, color)
    }
}

impl Drop for ImageLock<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

fn lock_target<'g, 'a>(target: &'g Mutex<&'a mut Image>) -> MutexGuard<'g, &'a mut Image> {
    target.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_color() -> Color {
        Color::from_argb(10, 200, 100, 50)
    }

    #[test]
    fn test_set_get_argb32_preserves_all_channels() {
        let image = Image::new(3, 2, PixelFormat::Argb32);
        let mut buffer = PixelBuffer::acquire(&image).unwrap();
        buffer.set_pixel(2, 1, sample_color()).unwrap();
        assert_eq!(buffer.get_pixel(2, 1).unwrap(), sample_color());
    }

    #[test]
    fn test_set_get_rgb24_drops_alpha() {
        let image = Image::new(3, 2, PixelFormat::Rgb24);
        let mut buffer = PixelBuffer::acquire(&image).unwrap();
        buffer.set_pixel(1, 1, sample_color()).unwrap();
        assert_eq!(buffer.get_pixel(1, 1).unwrap(), Color::from_rgb(200, 100, 50));
    }

    #[test]
    fn test_set_get_gray8_keeps_blue_only() {
        let image = Image::new(3, 2, PixelFormat::Gray8);
        let mut buffer = PixelBuffer::acquire(&image).unwrap();
        buffer.set_pixel(0, 1, sample_color()).unwrap();
        assert_eq!(buffer.get_pixel(0, 1).unwrap(), Color::from_rgb(50, 50, 50));
    }

    #[test]
    fn test_buffer_length_matches_format() {
        for format in [PixelFormat::Gray8, PixelFormat::Rgb24, PixelFormat::Argb32] {
            let buffer = PixelBuffer::acquire(&Image::new(5, 3, format)).unwrap();
            assert_eq!(buffer.pixels().len(), 5 * 3 * format.bytes_per_pixel());
        }
    }

    #[test]
    fn test_get_pixel_out_of_range() {
        let buffer = PixelBuffer::acquire(&Image::new(2, 2, PixelFormat::Rgb24)).unwrap();
        assert!(matches!(
            buffer.get_pixel(0, 2),
            Err(Error::IndexOutOfRange { index: 4, len: 4 })
        ));
        assert!(matches!(
            buffer.get_pixel(2, 0),
            Err(Error::IndexOutOfRange { .. })
        ));
    }

    #[test]
    fn test_acquire_rejects_16bpp() {
        let image = Image::with_depth(4, 4, 16);
        assert!(matches!(
            PixelBuffer::acquire(&image),
            Err(Error::UnsupportedFormat { depth: 16 })
        ));
    }

    #[test]
    fn test_write_lock_on_unsupported_image_leaves_it_untouched() {
        let mut image = Image::with_depth(2, 2, 16);
        let before = image.clone();
        assert!(matches!(
            ImageLock::write(&mut image),
            Err(Error::UnsupportedFormat { depth: 16 })
        ));
        assert_eq!(image, before);
    }

    #[test]
    fn test_write_lock_copies_back_on_drop() {
        let mut image = Image::new(2, 2, PixelFormat::Argb32);
        {
            let mut lock = ImageLock::write(&mut image).unwrap();
            lock.set_pixel(1, 0, sample_color()).unwrap();
        }
        let buffer = PixelBuffer::acquire(&image).unwrap();
        assert_eq!(buffer.get_pixel(1, 0).unwrap(), sample_color());
    }

    #[test]
    fn test_release_happens_once() {
        let mut image = Image::new(2, 1, PixelFormat::Argb32);
        {
            let mut lock = ImageLock::write(&mut image).unwrap();
            lock.set_pixel(0, 0, Color::WHITE).unwrap();
            lock.release();
            assert!(lock.is_released());

            // Ignored: the image was already written back.
            lock.set_pixel(1, 0, Color::WHITE).unwrap();
            lock.release();
        }
        let buffer = PixelBuffer::acquire(&image).unwrap();
        assert_eq!(buffer.get_pixel(0, 0).unwrap(), Color::WHITE);
        assert_eq!(buffer.get_pixel(1, 0).unwrap(), Color::TRANSPARENT);
    }

    #[test]
    fn test_concurrent_first_acquire_copies_once() {
        let image = Image::new(8, 8, PixelFormat::Rgb24);
        // Unacquired lock, so the threads race on the first acquire.
        let lock = ImageLock {
            binding: Binding::Read(&image),
            buffer: OnceCell::new(),
            released: AtomicBool::new(false),
        };
        let barrier = std::sync::Barrier::new(8);

        let addresses: Vec<usize> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        lock.acquire().unwrap() as *const PixelBuffer as usize
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(addresses.iter().all(|&a| a == addresses[0]));
        assert_eq!(lock.buffer().unwrap() as *const PixelBuffer as usize, addresses[0]);
    }
}
