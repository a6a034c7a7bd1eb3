//! Sample transforms for the imageedit host.
//!
//! Build with `cargo build -p imageedit-test-plugin` and copy the resulting
//! library into the host's plugin directory.

use imageedit::{Color, Plugin, Position, ReadableImage, Transform, TransformError};

// ============================================================================
// Grayscale
// ============================================================================

/// Luma from BT.601 weights, alpha preserved.
pub struct Grayscale;

impl Transform for Grayscale {
    fn name(&self) -> &str {
        "Grayscale"
    }

    fn compute(&self, p: Position, image: &dyn ReadableImage) -> Result<Color, TransformError> {
        let c = image.get(p.x, p.y);
        let luma = (c.r as f32 * 0.299 + c.g as f32 * 0.587 + c.b as f32 * 0.114) as u8;
        Ok(Color::from_argb(c.a, luma, luma, luma))
    }
}

impl Plugin for Grayscale {
    fn create() -> Result<Self, String> {
        Ok(Grayscale)
    }
}

// ============================================================================
// Sepia
// ============================================================================

/// Classic sepia tone matrix, rows for R, G, B.
const SEPIA: [[f32; 3]; 3] = [
    [0.393, 0.769, 0.189],
    [0.349, 0.686, 0.168],
    [0.272, 0.534, 0.131],
];

pub struct Sepia;

impl Transform for Sepia {
    fn name(&self) -> &str {
        "Sepia"
    }

    fn compute(&self, p: Position, image: &dyn ReadableImage) -> Result<Color, TransformError> {
        let c = image.get(p.x, p.y);
        let rgb = [c.r as f32 / 255.0, c.g as f32 / 255.0, c.b as f32 / 255.0];
        let tone = |row: [f32; 3]| {
            let v = row[0] * rgb[0] + row[1] * rgb[1] + row[2] * rgb[2];
            (v.clamp(0.0, 1.0) * 255.0) as u8
        };
        Ok(Color::from_argb(c.a, tone(SEPIA[0]), tone(SEPIA[1]), tone(SEPIA[2])))
    }
}

impl Plugin for Sepia {
    fn create() -> Result<Self, String> {
        Ok(Sepia)
    }
}

// ============================================================================
// Bloom
// ============================================================================

/// Brightens each pixel by the squared sum of an 8x6 pixel neighbourhood.
///
/// Alpha accumulates unscaled, so any visible neighbourhood saturates it.
pub struct Bloom;

impl Bloom {
    const WEIGHT: f32 = 0.0015;

    /// Bloom strength by the red level of the center pixel.
    fn strength(red: u8) -> f32 {
        let red = red as f32 / 255.0;
        if red < 0.3 {
            0.012
        } else if red < 0.5 {
            0.009
        } else {
            0.0075
        }
    }
}

impl Transform for Bloom {
    fn name(&self) -> &str {
        "Bloom"
    }

    fn compute(&self, p: Position, image: &dyn ReadableImage) -> Result<Color, TransformError> {
        let step_x = 1.0 / image.width().max(1) as f32;
        let step_y = 1.0 / image.height().max(1) as f32;

        // [a, r, g, b]
        let mut bloom = [0.0f32; 4];
        for dx in -4..4 {
            for dy in -3..3 {
                let c = image.get(p.x + dx as f32 * step_x, p.y + dy as f32 * step_y);
                bloom[0] += c.a as f32;
                bloom[1] += c.r as f32 * Self::WEIGHT;
                bloom[2] += c.g as f32 * Self::WEIGHT;
                bloom[3] += c.b as f32 * Self::WEIGHT;
            }
        }

        let center = image.get(p.x, p.y);
        let strength = Self::strength(center.r);
        let glow = bloom.map(|v| v * v * strength * 255.0);

        Ok(Color::from_argb_f32(
            center.a as f32 + glow[0],
            center.r as f32 + glow[1],
            center.g as f32 + glow[2],
            center.b as f32 + glow[3],
        ))
    }
}

impl Plugin for Bloom {
    fn create() -> Result<Self, String> {
        Ok(Bloom)
    }
}

imageedit::export_transforms!(Grayscale, Sepia, Bloom);
