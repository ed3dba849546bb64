//! Compositing engine
//!
//! Folds a holder's children, bottom to top, into one image. Each visible
//! child is drawn with its opacity, blend mode and mask; the very first
//! visible child of an isolated stack always uses plain source-over so that
//! blend modes never act against the transparent canvas.
//!
//! Pass-through groups are not drawn as a unit: their children are folded
//! straight into the parent's accumulator and share its "first visible" flag.

use crate::blend::{BlendMode, Composite};
use crate::composition::Composition;
use crate::filter::FilterRun;
use crate::layer::{ContentImage, LayerId, LayerKind, LayerProps};
use crate::pixel::{thumbnail, PixelBuffer};
use crate::{CoreError, Result};
use tracing::debug;

impl Composition {
    /// The flattened image, recomputed only when something changed
    pub fn composite_image(&mut self) -> Result<PixelBuffer> {
        if let Some(image) = self.cache.get() {
            return Ok(image.clone());
        }
        let blank = self.canvas.try_blank()?;
        let children = self.root.clone();
        let mut first_visible = true;
        let image = self.composite_children(&children, blank, &mut first_visible)?;

        debug!("Recomputed composite of '{}'", self.name);
        self.cache.store(image.clone());
        Ok(image)
    }

    /// Paint `children` over `current`
    pub(crate) fn composite_children(
        &mut self,
        children: &[LayerId],
        mut current: PixelBuffer,
        first_visible: &mut bool,
    ) -> Result<PixelBuffer> {
        for &id in children {
            if !self.layer(id)?.is_visible() {
                continue;
            }
            current = self.apply_layer(id, current, first_visible)?;
        }
        Ok(current)
    }

    /// Paint one visible layer over `current`
    pub(crate) fn apply_layer(
        &mut self,
        id: LayerId,
        mut current: PixelBuffer,
        first_visible: &mut bool,
    ) -> Result<PixelBuffer> {
        let layer = self.layer(id)?;
        match &layer.kind {
            LayerKind::Group(group) if layer.props.blend_mode.is_pass_through() => {
                let children = group.children.clone();
                return self.composite_children(&children, current, first_visible);
            }
            LayerKind::Adjustment(adjustment) => {
                if *first_visible {
                    // Nothing beneath to adjust
                    *first_visible = false;
                    return Ok(current);
                }
                let run = FilterRun {
                    composition: &self.name,
                    layer: layer.name(),
                    lenient: self.config.unattended,
                };
                let filtered = run.apply(adjustment.filter.as_ref(), &current)?;
                return blend_filtered(&layer.props, filtered, &current);
            }
            LayerKind::SmartFilter(_) => {
                return Err(CoreError::InvalidPlacement {
                    child: "smart filter",
                    holder: layer.props.holder.to_string(),
                });
            }
            _ => {}
        }

        let content = self.layer_content(id)?;
        let props = &self.layer(id)?.props;
        let composite = if *first_visible {
            Composite::source_over(props.opacity)
        } else {
            Composite::new(props.blend_mode, props.opacity)
        };
        *first_visible = false;

        match props.active_mask() {
            Some(mask) => {
                let mut scratch = self.canvas.try_blank()?;
                Composite::source_over(1.0).draw(
                    scratch.make_mut(),
                    content.pixels.image(),
                    content.offset,
                );
                mask.apply_to(scratch.make_mut());
                composite.draw(current.make_mut(), scratch.image(), (0, 0));
            }
            None => {
                composite.draw(current.make_mut(), content.pixels.image(), content.offset);
            }
        }
        Ok(current)
    }

    /// Pixels a layer contributes when drawn as a unit
    fn layer_content(&mut self, id: LayerId) -> Result<ContentImage> {
        let layer = self.layer(id)?;
        if let Some(content) = layer.kind.as_content() {
            return content.content(&self.canvas);
        }
        let pixels = match &layer.kind {
            LayerKind::Group(_) => self.group_image(id)?,
            LayerKind::SmartObject(_) => self.smart_object_image(id)?,
            _ => {
                return Err(CoreError::WrongLayerKind {
                    id,
                    expected: "layer with content",
                })
            }
        };
        Ok(ContentImage {
            pixels,
            offset: (0, 0),
        })
    }

    /// Current image of a single layer, or `None` for adjustment layers.
    ///
    /// Smart filters return the chain output up to and including themselves;
    /// pass-through groups return their children flattened on their own.
    pub fn layer_image(&mut self, id: LayerId) -> Result<Option<PixelBuffer>> {
        let layer = self.layer(id)?;
        let image = match &layer.kind {
            LayerKind::Adjustment(_) => None,
            LayerKind::SmartFilter(_) => Some(self.smart_filter_image(id)?),
            LayerKind::Group(group) if layer.props.blend_mode.is_pass_through() => {
                let children = group.children.clone();
                let blank = self.canvas.try_blank()?;
                let mut first_visible = true;
                Some(self.composite_children(&children, blank, &mut first_visible)?)
            }
            _ => Some(self.layer_content(id)?.pixels),
        };
        Ok(image)
    }

    /// Scaled-down layer image for layer panels
    pub fn layer_thumbnail(&mut self, id: LayerId) -> Result<Option<PixelBuffer>> {
        let size = self.config.thumbnail_size;
        Ok(self.layer_image(id)?.map(|image| thumbnail(&image, size)))
    }
}

/// Draw a filter's output over the image it was computed from, honoring the
/// layer's mask, opacity and blend mode.
///
/// `filtered` is never modified in place, so it can be a cached raw output.
pub(crate) fn blend_filtered(
    props: &LayerProps,
    filtered: PixelBuffer,
    below: &PixelBuffer,
) -> Result<PixelBuffer> {
    if props.is_plain() {
        return Ok(filtered);
    }
    let top = match props.active_mask() {
        Some(mask) => {
            let mut masked = filtered.deep_copy()?;
            mask.apply_to(masked.make_mut());
            masked
        }
        None => filtered,
    };
    let mut out = below.deep_copy()?;
    let mode = match props.blend_mode {
        BlendMode::PassThrough => BlendMode::Normal,
        mode => mode,
    };
    Composite::new(mode, props.opacity).draw(out.make_mut(), top.image(), (0, 0));
    Ok(out)
}
