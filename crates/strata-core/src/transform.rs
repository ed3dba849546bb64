//! Affine image transformer for smart object content
//!
//! Resizing, flipping or rotating a smart object never touches its embedded
//! content. Instead the transforms are accumulated here and applied when the
//! transformed image is next requested.

use crate::cache::CacheSlot;
use crate::pixel::PixelBuffer;
use crate::Result;
use glam::{DAffine2, DVec2};
use image::{GrayImage, Luma, Rgba};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Mirror axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlipDirection {
    /// Mirror left and right
    Horizontal,
    /// Mirror top and bottom
    Vertical,
}

/// Clockwise rotation by a multiple of 90 degrees
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuadrantAngle {
    /// 90 degrees clockwise
    Cw90,
    /// 180 degrees
    Cw180,
    /// 270 degrees clockwise (90 counter-clockwise)
    Cw270,
}

/// Transform scaling an image of `from` size to `to` size
pub fn resize_transform(from: (u32, u32), to: (u32, u32)) -> DAffine2 {
    let sx = to.0 as f64 / from.0.max(1) as f64;
    let sy = to.1 as f64 / from.1.max(1) as f64;
    DAffine2::from_scale(DVec2::new(sx, sy))
}

/// Transform mirroring an image of the given size in place
pub fn flip_transform(direction: FlipDirection, size: (u32, u32)) -> DAffine2 {
    let (w, h) = (size.0 as f64, size.1 as f64);
    match direction {
        FlipDirection::Horizontal => {
            DAffine2::from_translation(DVec2::new(w, 0.0))
                * DAffine2::from_scale(DVec2::new(-1.0, 1.0))
        }
        FlipDirection::Vertical => {
            DAffine2::from_translation(DVec2::new(0.0, h))
                * DAffine2::from_scale(DVec2::new(1.0, -1.0))
        }
    }
}

/// Transform rotating an image of the given size, plus the rotated size
pub fn rotate_transform(angle: QuadrantAngle, size: (u32, u32)) -> (DAffine2, (u32, u32)) {
    let (w, h) = (size.0 as f64, size.1 as f64);
    match angle {
        // (x, y) -> (h - y, x)
        QuadrantAngle::Cw90 => (
            DAffine2::from_cols(
                DVec2::new(0.0, 1.0),
                DVec2::new(-1.0, 0.0),
                DVec2::new(h, 0.0),
            ),
            (size.1, size.0),
        ),
        // (x, y) -> (w - x, h - y)
        QuadrantAngle::Cw180 => (
            DAffine2::from_cols(
                DVec2::new(-1.0, 0.0),
                DVec2::new(0.0, -1.0),
                DVec2::new(w, h),
            ),
            size,
        ),
        // (x, y) -> (y, w - x)
        QuadrantAngle::Cw270 => (
            DAffine2::from_cols(
                DVec2::new(0.0, -1.0),
                DVec2::new(1.0, 0.0),
                DVec2::new(0.0, w),
            ),
            (size.1, size.0),
        ),
    }
}

/// Accumulated affine transform with its own output cache
#[derive(Debug, Clone)]
pub struct ImageTransformer {
    transform: DAffine2,
    target_size: (u32, u32),
    cache: CacheSlot,
}

impl ImageTransformer {
    /// Create a transformer producing images of `target_size`
    pub fn new(transform: DAffine2, target_size: (u32, u32)) -> Self {
        Self {
            transform,
            target_size,
            cache: CacheSlot::new(),
        }
    }

    /// Identity transformer for content of the given size
    pub fn identity(size: (u32, u32)) -> Self {
        Self::new(DAffine2::IDENTITY, size)
    }

    /// Accumulated transform (content space to output space)
    pub fn transform(&self) -> DAffine2 {
        self.transform
    }

    /// Output size
    pub fn target_size(&self) -> (u32, u32) {
        self.target_size
    }

    /// Apply `next` after everything accumulated so far
    pub fn pre_concatenate(&mut self, next: DAffine2, target_size: (u32, u32)) {
        self.transform = next * self.transform;
        self.target_size = target_size;
        self.cache.invalidate();
    }

    /// Drop the cached output
    pub fn invalidate(&mut self) {
        self.cache.invalidate();
    }

    /// Cache state
    pub fn cache(&self) -> &CacheSlot {
        &self.cache
    }

    /// Transformed image, from cache when possible
    pub fn image(&mut self, source: &PixelBuffer) -> Result<PixelBuffer> {
        if let Some(image) = self.cache.get() {
            return Ok(image.clone());
        }
        let image = self.render(source)?;
        self.cache.store(image.clone());
        Ok(image)
    }

    /// Render `source` through the accumulated transform (bilinear, pixel centers)
    pub fn render(&self, source: &PixelBuffer) -> Result<PixelBuffer> {
        let (width, height) = self.target_size;
        let mut output = PixelBuffer::try_new(width, height)?;
        if self.transform.matrix2.determinant().abs() < f64::EPSILON {
            return Ok(output);
        }
        let inverse = self.transform.inverse();
        let src = source.image();
        let stride = width as usize * 4;
        if stride == 0 {
            return Ok(output);
        }

        output
            .make_mut()
            .par_chunks_exact_mut(stride)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, pixel) in row.chunks_exact_mut(4).enumerate() {
                    let center = DVec2::new(x as f64 + 0.5, y as f64 + 0.5);
                    let p = inverse.transform_point2(center) - DVec2::splat(0.5);
                    pixel.copy_from_slice(&sample_bilinear(src, p).0);
                }
            });
        Ok(output)
    }
}

/// Resample a grayscale image through `transform` into `target_size`.
///
/// Areas the source does not cover come out white.
pub fn transform_gray(source: &GrayImage, transform: DAffine2, target_size: (u32, u32)) -> GrayImage {
    let (width, height) = target_size;
    if transform.matrix2.determinant().abs() < f64::EPSILON {
        return GrayImage::from_pixel(width, height, Luma([255]));
    }
    let inverse = transform.inverse();
    GrayImage::from_fn(width, height, |x, y| {
        let center = DVec2::new(x as f64 + 0.5, y as f64 + 0.5);
        let p = inverse.transform_point2(center) - DVec2::splat(0.5);
        Luma([sample_gray(source, p)])
    })
}

fn sample_gray(src: &GrayImage, p: DVec2) -> u8 {
    let (w, h) = (src.width() as i64, src.height() as i64);
    if w == 0 || h == 0 || p.x < -0.5 || p.y < -0.5 || p.x > w as f64 - 0.5 || p.y > h as f64 - 0.5 {
        return 255;
    }
    let x0 = p.x.floor();
    let y0 = p.y.floor();
    let fx = p.x - x0;
    let fy = p.y - y0;
    let (x0, y0) = (x0 as i64, y0 as i64);

    // Inside the footprint edges are extended, not faded to white
    let fetch = |x: i64, y: i64| -> f64 {
        src.get_pixel(x.clamp(0, w - 1) as u32, y.clamp(0, h - 1) as u32)[0] as f64
    };
    let value = (1.0 - fx) * (1.0 - fy) * fetch(x0, y0)
        + fx * (1.0 - fy) * fetch(x0 + 1, y0)
        + (1.0 - fx) * fy * fetch(x0, y0 + 1)
        + fx * fy * fetch(x0 + 1, y0 + 1);
    value.round().clamp(0.0, 255.0) as u8
}

fn sample_bilinear(src: &image::RgbaImage, p: DVec2) -> Rgba<u8> {
    let (w, h) = (src.width() as i64, src.height() as i64);
    let x0 = p.x.floor();
    let y0 = p.y.floor();
    let fx = p.x - x0;
    let fy = p.y - y0;
    let (x0, y0) = (x0 as i64, y0 as i64);

    let fetch = |x: i64, y: i64| -> [f64; 4] {
        if x < 0 || y < 0 || x >= w || y >= h {
            return [0.0; 4];
        }
        let px = src.get_pixel(x as u32, y as u32);
        let a = px[3] as f64;
        // Premultiply so transparent neighbours don't bleed their color
        [px[0] as f64 * a, px[1] as f64 * a, px[2] as f64 * a, a]
    };

    let weights = [
        ((1.0 - fx) * (1.0 - fy), fetch(x0, y0)),
        (fx * (1.0 - fy), fetch(x0 + 1, y0)),
        ((1.0 - fx) * fy, fetch(x0, y0 + 1)),
        (fx * fy, fetch(x0 + 1, y0 + 1)),
    ];

    let mut acc = [0.0f64; 4];
    for (weight, sample) in weights {
        if weight == 0.0 {
            continue;
        }
        for c in 0..4 {
            acc[c] += weight * sample[c];
        }
    }
    let alpha = acc[3];
    if alpha <= 0.0 {
        return Rgba([0, 0, 0, 0]);
    }
    let channel = |v: f64| (v / alpha).round().clamp(0.0, 255.0) as u8;
    Rgba([
        channel(acc[0]),
        channel(acc[1]),
        channel(acc[2]),
        alpha.round().clamp(0.0, 255.0) as u8,
    ])
}
