//! The transform capability and the image view transforms read from.

use std::fmt;

use crate::error::TransformError;
use crate::image::{Color, Position};

/// Continuous, wrap-safe read access to an image.
///
/// `get` takes normalized coordinates; values outside [0, 1] wrap around.
pub trait ReadableImage {
    fn get(&self, x: f32, y: f32) -> Color;
    fn width(&self) -> usize;
    fn height(&self) -> usize;
}

/// A named per-pixel function.
///
/// `compute` is called concurrently from many threads for one image, so
/// implementations must be stateless or synchronize internally.
pub trait Transform: Send + Sync {
    fn name(&self) -> &str;

    fn compute(
        &self,
        position: Position,
        image: &dyn ReadableImage,
    ) -> Result<Color, TransformError>;
}

impl fmt::Debug for dyn Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transform").field("name", &self.name()).finish()
    }
}

/// A transform backed by a closure, for in-process transforms.
pub struct FnTransform<F> {
    name: String,
    compute: F,
}

impl<F> FnTransform<F>
where
    F: Fn(Position, &dyn ReadableImage) -> Result<Color, TransformError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, compute: F) -> Self {
        Self {
            name: name.into(),
            compute,
        }
    }
}

impl<F> Transform for FnTransform<F>
where
    F: Fn(Position, &dyn ReadableImage) -> Result<Color, TransformError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn compute(
        &self,
        position: Position,
        image: &dyn ReadableImage,
    ) -> Result<Color, TransformError> {
        (self.compute)(position, image)
    }
}
