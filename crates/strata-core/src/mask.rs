//! Layer masks
//!
//! A mask is a grayscale image with the canvas footprint. For compositing its
//! samples are read directly as alpha values ([`AlphaView`]); for on-screen
//! editing the same samples can be shown as a red overlay ([`RubylithView`]).
//! Neither view copies the samples.

use crate::pixel::allocate_samples;
use crate::transform::transform_gray;
use crate::{CoreError, Result};
use glam::DAffine2;
use image::{GrayImage, Luma, Rgba, RgbaImage};
use rayon::prelude::*;

/// How a new mask is filled
#[derive(Debug, Clone, PartialEq)]
pub enum MaskInit {
    /// White, the layer stays fully visible
    RevealAll,
    /// Black, the layer is hidden
    HideAll,
    /// Use the alpha channel of an image
    FromAlpha(RgbaImage),
    /// Use the luminance of an image
    FromLuminance(RgbaImage),
}

/// Grayscale mask attached to one layer
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    pixels: GrayImage,
    enabled: bool,
    linked: bool,
}

impl Mask {
    /// Create an enabled, linked mask of the given size
    pub fn new(width: u32, height: u32, init: MaskInit) -> Self {
        let mut pixels = GrayImage::new(width, height);
        fill(&mut pixels, init);
        Self::from_gray(pixels)
    }

    /// Like [`Mask::new`], but reports an allocation failure instead of aborting
    pub fn try_new(width: u32, height: u32, init: MaskInit) -> Result<Self> {
        let samples = allocate_samples(width, height, 1)?;
        let mut pixels = GrayImage::from_raw(width, height, samples)
            .ok_or(CoreError::ResourceExhausted { width, height })?;
        fill(&mut pixels, init);
        Ok(Self::from_gray(pixels))
    }

    /// Wrap existing grayscale samples
    pub fn from_gray(pixels: GrayImage) -> Self {
        Self {
            pixels,
            enabled: true,
            linked: true,
        }
    }

    /// Grayscale samples
    pub fn pixels(&self) -> &GrayImage {
        &self.pixels
    }

    /// Mutable grayscale samples
    pub fn pixels_mut(&mut self) -> &mut GrayImage {
        &mut self.pixels
    }

    /// Whether the mask takes part in compositing
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Enable or disable the mask without deleting it
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Whether the mask moves together with its layer
    pub fn is_linked(&self) -> bool {
        self.linked
    }

    /// Link or unlink the mask from its layer's position
    pub fn set_linked(&mut self, linked: bool) {
        self.linked = linked;
    }

    /// Samples reinterpreted as alpha
    pub fn alpha_view(&self) -> AlphaView<'_> {
        AlphaView {
            samples: self.pixels.as_raw(),
            width: self.pixels.width(),
            height: self.pixels.height(),
        }
    }

    /// Samples presented as a translucent red overlay
    pub fn rubylith_view(&self) -> RubylithView<'_> {
        RubylithView {
            alpha: self.alpha_view(),
        }
    }

    /// Multiply the target's alpha by the mask (destination-in).
    ///
    /// Pixels outside the mask's footprint become fully transparent.
    pub fn apply_to(&self, target: &mut RgbaImage) {
        self.alpha_view().apply_to(target);
    }

    /// Shift the mask contents; uncovered areas are revealed (white)
    pub fn translate(&mut self, dx: i64, dy: i64) {
        let (width, height) = self.pixels.dimensions();
        let source = &self.pixels;
        let shifted = GrayImage::from_fn(width, height, |x, y| {
            let sx = x as i64 - dx;
            let sy = y as i64 - dy;
            if sx >= 0 && sy >= 0 && sx < width as i64 && sy < height as i64 {
                *source.get_pixel(sx as u32, sy as u32)
            } else {
                Luma([255])
            }
        });
        self.pixels = shifted;
    }

    /// Resample the mask through `transform` into a new footprint; uncovered
    /// areas are revealed (white)
    pub fn transform(&mut self, transform: DAffine2, size: (u32, u32)) {
        self.pixels = transform_gray(&self.pixels, transform, size);
    }
}

/// Write the initial samples into a zeroed (fully hidden) mask
fn fill(pixels: &mut GrayImage, init: MaskInit) {
    match init {
        MaskInit::RevealAll => {
            for sample in pixels.pixels_mut() {
                *sample = Luma([255]);
            }
        }
        MaskInit::HideAll => {}
        MaskInit::FromAlpha(image) => {
            for (x, y, sample) in pixels.enumerate_pixels_mut() {
                if x < image.width() && y < image.height() {
                    *sample = Luma([image.get_pixel(x, y)[3]]);
                }
            }
        }
        MaskInit::FromLuminance(image) => {
            let gray = image::imageops::grayscale(&image);
            for (x, y, sample) in pixels.enumerate_pixels_mut() {
                if x < gray.width() && y < gray.height() {
                    *sample = *gray.get_pixel(x, y);
                }
            }
        }
    }
}

/// Borrowed view of mask samples as alpha values
#[derive(Debug, Clone, Copy)]
pub struct AlphaView<'a> {
    samples: &'a [u8],
    width: u32,
    height: u32,
}

impl<'a> AlphaView<'a> {
    /// View width
    pub fn width(&self) -> u32 {
        self.width
    }

    /// View height
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Alpha at a position; zero outside the view
    pub fn alpha(&self, x: u32, y: u32) -> u8 {
        if x >= self.width || y >= self.height {
            return 0;
        }
        self.samples[(y as usize) * self.width as usize + x as usize]
    }

    /// The raw sample slice backing this view
    pub fn as_slice(&self) -> &'a [u8] {
        self.samples
    }

    /// Destination-in: scale each target alpha by the matching sample
    pub fn apply_to(&self, target: &mut RgbaImage) {
        let stride = target.width() as usize * 4;
        if stride == 0 {
            return;
        }
        let view = *self;
        target
            .par_chunks_exact_mut(stride)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, pixel) in row.chunks_exact_mut(4).enumerate() {
                    let m = view.alpha(x as u32, y as u32) as u32;
                    pixel[3] = ((pixel[3] as u32 * m + 127) / 255) as u8;
                }
            });
    }
}

/// Borrowed view of mask samples as a red "rubylith" overlay
#[derive(Debug, Clone, Copy)]
pub struct RubylithView<'a> {
    alpha: AlphaView<'a>,
}

impl<'a> RubylithView<'a> {
    /// Overlay color at a position; hidden areas show as half-transparent red
    pub fn pixel(&self, x: u32, y: u32) -> Rgba<u8> {
        let hidden = 255 - self.alpha.alpha(x, y);
        Rgba([255, 0, 0, hidden / 2])
    }

    /// Render the overlay for display
    pub fn to_image(&self) -> RgbaImage {
        RgbaImage::from_fn(self.alpha.width(), self.alpha.height(), |x, y| {
            self.pixel(x, y)
        })
    }
}
