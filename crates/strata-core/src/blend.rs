//! Blend modes and the compositing operator
//!
//! Colors are separable and non-premultiplied. A [`Composite`] mixes the
//! blended color with the top pixel's alpha (times the layer opacity) and then
//! applies source-over alpha compositing.

use image::{Rgba, RgbaImage};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Opacity above which a layer counts as fully opaque
pub const OPAQUE_THRESHOLD: f32 = 0.999;

/// Blend mode for compositing layers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum BlendMode {
    /// Groups only: children paint straight into the parent
    PassThrough,
    /// Normal alpha blending (default)
    #[default]
    Normal,
    /// Add colors (lighten)
    Add,
    /// Subtract colors (darken)
    Subtract,
    /// Multiply colors (darken)
    Multiply,
    /// Screen colors (lighten)
    Screen,
    /// Overlay (combination of multiply and screen)
    Overlay,
    /// Soft light
    SoftLight,
    /// Hard light
    HardLight,
    /// Lighten only (max)
    Lighten,
    /// Darken only (min)
    Darken,
    /// Color dodge
    ColorDodge,
    /// Color burn
    ColorBurn,
    /// Difference
    Difference,
    /// Exclusion
    Exclusion,
}

impl BlendMode {
    /// Human readable name
    pub fn display_name(&self) -> &'static str {
        match self {
            BlendMode::PassThrough => "Pass Through",
            BlendMode::Normal => "Normal",
            BlendMode::Add => "Add",
            BlendMode::Subtract => "Subtract",
            BlendMode::Multiply => "Multiply",
            BlendMode::Screen => "Screen",
            BlendMode::Overlay => "Overlay",
            BlendMode::SoftLight => "Soft Light",
            BlendMode::HardLight => "Hard Light",
            BlendMode::Lighten => "Lighten",
            BlendMode::Darken => "Darken",
            BlendMode::ColorDodge => "Color Dodge",
            BlendMode::ColorBurn => "Color Burn",
            BlendMode::Difference => "Difference",
            BlendMode::Exclusion => "Exclusion",
        }
    }

    /// List all blend modes usable on any layer (pass-through excluded)
    pub fn all() -> &'static [BlendMode] {
        &[
            BlendMode::Normal,
            BlendMode::Add,
            BlendMode::Subtract,
            BlendMode::Multiply,
            BlendMode::Screen,
            BlendMode::Overlay,
            BlendMode::SoftLight,
            BlendMode::HardLight,
            BlendMode::Lighten,
            BlendMode::Darken,
            BlendMode::ColorDodge,
            BlendMode::ColorBurn,
            BlendMode::Difference,
            BlendMode::Exclusion,
        ]
    }

    /// Whether this is the group-only pass-through sentinel
    pub fn is_pass_through(&self) -> bool {
        matches!(self, BlendMode::PassThrough)
    }

    /// Blend one channel; `base` is the backdrop, `top` the source (both 0..=1)
    pub fn blend_channel(&self, base: f32, top: f32) -> f32 {
        match self {
            BlendMode::Normal | BlendMode::PassThrough => top,
            BlendMode::Add => (base + top).min(1.0),
            BlendMode::Subtract => (base - top).max(0.0),
            BlendMode::Multiply => base * top,
            BlendMode::Screen => 1.0 - (1.0 - base) * (1.0 - top),
            BlendMode::Overlay => overlay_channel(base, top),
            BlendMode::SoftLight => soft_light_channel(base, top),
            BlendMode::HardLight => overlay_channel(top, base),
            BlendMode::Lighten => base.max(top),
            BlendMode::Darken => base.min(top),
            BlendMode::ColorDodge => {
                if top >= 1.0 {
                    1.0
                } else {
                    (base / (1.0 - top)).min(1.0)
                }
            }
            BlendMode::ColorBurn => {
                if top <= 0.0 {
                    0.0
                } else {
                    (1.0 - (1.0 - base) / top).max(0.0)
                }
            }
            BlendMode::Difference => (base - top).abs(),
            BlendMode::Exclusion => base + top - 2.0 * base * top,
        }
    }
}

fn overlay_channel(base: f32, top: f32) -> f32 {
    if base < 0.5 {
        2.0 * base * top
    } else {
        1.0 - 2.0 * (1.0 - base) * (1.0 - top)
    }
}

/// W3C soft light
fn soft_light_channel(base: f32, top: f32) -> f32 {
    if top <= 0.5 {
        base - (1.0 - 2.0 * top) * base * (1.0 - base)
    } else {
        let d = if base <= 0.25 {
            ((16.0 * base - 12.0) * base + 4.0) * base
        } else {
            base.sqrt()
        };
        base + (2.0 * top - 1.0) * (d - base)
    }
}

#[inline]
fn to_unit(v: u8) -> f32 {
    v as f32 / 255.0
}

#[inline]
fn to_byte(v: f32) -> u8 {
    (v * 255.0 + 0.5).clamp(0.0, 255.0) as u8
}

/// Blend mode plus opacity, applied when drawing one image over another
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Composite {
    /// Color mixing rule
    pub mode: BlendMode,
    /// Extra alpha multiplier (0.0 - 1.0)
    pub opacity: f32,
}

impl Composite {
    /// Create a composite, clamping the opacity
    pub fn new(mode: BlendMode, opacity: f32) -> Self {
        Self {
            mode,
            opacity: opacity.clamp(0.0, 1.0),
        }
    }

    /// Plain source-over at the given opacity
    pub fn source_over(opacity: f32) -> Self {
        Self::new(BlendMode::Normal, opacity)
    }

    /// Composite a single pixel
    pub fn blend_pixel(&self, base: Rgba<u8>, top: Rgba<u8>) -> Rgba<u8> {
        if top[3] == 0 || self.opacity <= 0.0 {
            return base;
        }
        if self.mode == BlendMode::Normal && self.opacity >= 1.0 && top[3] == 255 {
            return top;
        }

        let base_a = to_unit(base[3]);
        let top_a = to_unit(top[3]) * self.opacity;
        let out_a = top_a + base_a * (1.0 - top_a);
        if out_a <= 0.0 {
            return Rgba([0, 0, 0, 0]);
        }

        let mut out = [0u8; 4];
        for c in 0..3 {
            let b = to_unit(base[c]);
            let t = to_unit(top[c]);
            // Over a transparent backdrop the blend degenerates to the source color
            let mixed = (1.0 - base_a) * t + base_a * self.mode.blend_channel(b, t);
            out[c] = to_byte((mixed * top_a + b * base_a * (1.0 - top_a)) / out_a);
        }
        out[3] = to_byte(out_a);
        Rgba(out)
    }

    /// Draw `src` onto `dst` with its top-left corner at `offset`, clipped to `dst`
    pub fn draw(&self, dst: &mut RgbaImage, src: &RgbaImage, offset: (i64, i64)) {
        if self.opacity <= 0.0 {
            return;
        }
        let (dst_w, dst_h) = (dst.width() as i64, dst.height() as i64);
        let (src_w, src_h) = (src.width() as i64, src.height() as i64);
        let x0 = offset.0.max(0);
        let y0 = offset.1.max(0);
        let x1 = (offset.0 + src_w).min(dst_w);
        let y1 = (offset.1 + src_h).min(dst_h);
        if x0 >= x1 || y0 >= y1 {
            return;
        }

        let dst_stride = dst_w as usize * 4;
        let src_stride = src_w as usize * 4;
        let composite = *self;
        let src_samples = src.as_raw();

        dst.par_chunks_exact_mut(dst_stride)
            .enumerate()
            .skip(y0 as usize)
            .take((y1 - y0) as usize)
            .for_each(|(y, row)| {
                let sy = (y as i64 - offset.1) as usize;
                let src_row = &src_samples[sy * src_stride..(sy + 1) * src_stride];
                for x in x0..x1 {
                    let sx = (x - offset.0) as usize;
                    let d = x as usize * 4;
                    let base = Rgba([row[d], row[d + 1], row[d + 2], row[d + 3]]);
                    let top = Rgba([
                        src_row[sx * 4],
                        src_row[sx * 4 + 1],
                        src_row[sx * 4 + 2],
                        src_row[sx * 4 + 3],
                    ]);
                    let out = composite.blend_pixel(base, top);
                    row[d..d + 4].copy_from_slice(&out.0);
                }
            });
    }
}
