//! Pixel buffers and canvas geometry
//!
//! A [`PixelBuffer`] is an 8-bit, non-premultiplied RGBA raster. Clones share
//! the same immutable storage; the first write through [`PixelBuffer::make_mut`]
//! copies it if anyone else still holds a reference. Cached images can
//! therefore be handed out freely without risking accidental mutation.

use crate::{CoreError, Result};
use image::{imageops, ImageBuffer, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Default upper bound for a single buffer (16k x 16k)
pub const DEFAULT_MAX_PIXELS: u64 = 16_384 * 16_384;

/// Allocate a zeroed sample vector of `channels` bytes per pixel, reporting
/// failure instead of aborting
pub(crate) fn allocate_samples(width: u32, height: u32, channels: usize) -> Result<Vec<u8>> {
    let exhausted = || CoreError::ResourceExhausted { width, height };
    let len = (width as usize)
        .checked_mul(height as usize)
        .and_then(|n| n.checked_mul(channels))
        .ok_or_else(exhausted)?;

    let mut samples = Vec::new();
    samples.try_reserve_exact(len).map_err(|_| exhausted())?;
    samples.resize(len, 0);
    Ok(samples)
}

/// Shared RGBA raster
#[derive(Clone)]
pub struct PixelBuffer {
    image: Arc<RgbaImage>,
}

impl PixelBuffer {
    /// Allocate a fully transparent buffer
    pub fn try_new(width: u32, height: u32) -> Result<Self> {
        let samples = allocate_samples(width, height, 4)?;
        let image = ImageBuffer::from_raw(width, height, samples)
            .ok_or(CoreError::ResourceExhausted { width, height })?;
        Ok(Self::from_image(image))
    }

    /// Allocate a buffer filled with one color
    pub fn filled(width: u32, height: u32, color: Rgba<u8>) -> Result<Self> {
        let mut buffer = Self::try_new(width, height)?;
        for pixel in buffer.make_mut().pixels_mut() {
            *pixel = color;
        }
        Ok(buffer)
    }

    /// Wrap an existing image without copying it
    pub fn from_image(image: RgbaImage) -> Self {
        Self {
            image: Arc::new(image),
        }
    }

    /// Width in pixels
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Height in pixels
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Read access to the underlying image
    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// Sample one pixel
    pub fn pixel(&self, x: u32, y: u32) -> Rgba<u8> {
        *self.image.get_pixel(x, y)
    }

    /// Write access; copies the storage first if it is shared
    pub fn make_mut(&mut self) -> &mut RgbaImage {
        Arc::make_mut(&mut self.image)
    }

    /// Deep copy into freshly allocated storage
    pub fn deep_copy(&self) -> Result<Self> {
        let (width, height) = self.dimensions();
        let mut samples = allocate_samples(width, height, 4)?;
        samples.copy_from_slice(self.image.as_raw());
        let image = ImageBuffer::from_raw(width, height, samples)
            .ok_or(CoreError::ResourceExhausted { width, height })?;
        Ok(Self::from_image(image))
    }

    /// Copy a rectangle out of this buffer, clipped to its bounds
    pub fn sub_region(&self, x: u32, y: u32, width: u32, height: u32) -> Self {
        let view = imageops::crop_imm(self.image(), x, y, width, height);
        Self::from_image(view.to_image())
    }

    /// True when both handles point at the very same storage
    pub fn same_instance(&self, other: &PixelBuffer) -> bool {
        Arc::ptr_eq(&self.image, &other.image)
    }

    /// Unwrap the image, copying only if the storage is shared
    pub fn into_image(self) -> RgbaImage {
        Arc::try_unwrap(self.image).unwrap_or_else(|shared| (*shared).clone())
    }
}

impl fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PixelBuffer({}x{})", self.width(), self.height())
    }
}

impl From<RgbaImage> for PixelBuffer {
    fn from(image: RgbaImage) -> Self {
        Self::from_image(image)
    }
}

/// Scaled-down copy for layer icons, keeping the aspect ratio
pub fn thumbnail(buffer: &PixelBuffer, max_side: u32) -> PixelBuffer {
    let (width, height) = buffer.dimensions();
    let longest = width.max(height).max(1);
    if longest <= max_side {
        return buffer.clone();
    }
    let scale = max_side as f64 / longest as f64;
    let new_width = ((width as f64 * scale).round() as u32).max(1);
    let new_height = ((height as f64 * scale).round() as u32).max(1);
    PixelBuffer::from_image(imageops::thumbnail(buffer.image(), new_width, new_height))
}

/// Size of a composition's drawing area
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Canvas {
    width: u32,
    height: u32,
    max_pixels: u64,
}

impl Canvas {
    /// Create a canvas with the default pixel budget
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            max_pixels: DEFAULT_MAX_PIXELS,
        }
    }

    /// Override the largest buffer this canvas will hand out
    pub fn with_max_pixels(mut self, max_pixels: u64) -> Self {
        self.max_pixels = max_pixels;
        self
    }

    /// Canvas width
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Canvas height
    pub fn height(&self) -> u32 {
        self.height
    }

    /// (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Check a buffer size against the pixel budget
    pub fn check_budget(&self, width: u32, height: u32) -> Result<()> {
        if width as u64 * height as u64 > self.max_pixels {
            return Err(CoreError::ResourceExhausted { width, height });
        }
        Ok(())
    }

    /// A transparent buffer covering the whole canvas
    pub fn try_blank(&self) -> Result<PixelBuffer> {
        self.check_budget(self.width, self.height)?;
        PixelBuffer::try_new(self.width, self.height)
    }
}
