//! Layer system for non-destructive compositing
//!
//! Every layer shares a common set of properties ([`LayerProps`]) and carries
//! one variant of [`LayerKind`]. Behavior that only some variants have is
//! expressed through capability traits:
//!
//! - [`HasContent`]: paints pixels of its own (image, fill, gradient)
//! - [`IsHolder`]: owns an ordered child list (group, smart object)
//! - [`IsAdjustment`]: rewrites the pixels below it through a filter
//!   (adjustment layer, smart filter)
//!
//! Layers live in a [`LayerStore`] owned by their composition and refer to
//! each other only through [`LayerId`] handles.

mod id;
mod store;

pub use id::{HolderRef, LayerId};
pub use store::LayerStore;

use crate::blend::{BlendMode, OPAQUE_THRESHOLD};
use crate::cache::CacheSlot;
use crate::composition::Composition;
use crate::filter::Filter;
use crate::linked::LinkedContent;
use crate::mask::Mask;
use crate::pixel::{Canvas, PixelBuffer};
use crate::transform::ImageTransformer;
use crate::Result;
use glam::DVec2;
use image::Rgba;
use rayon::prelude::*;

/// Pixels produced by a content layer, positioned on the canvas
#[derive(Debug, Clone)]
pub struct ContentImage {
    /// The pixels
    pub pixels: PixelBuffer,
    /// Top-left corner in canvas coordinates
    pub offset: (i64, i64),
}

/// Layers that paint pixels of their own
pub trait HasContent {
    /// Render the layer's pixels for a canvas
    fn content(&self, canvas: &Canvas) -> Result<ContentImage>;
}

/// Layers that own an ordered list of children (index 0 is the bottom)
pub trait IsHolder {
    /// Children, bottom to top
    fn children(&self) -> &[LayerId];
    /// Mutable child list
    fn children_mut(&mut self) -> &mut Vec<LayerId>;
    /// Whether a layer of this kind may be placed inside
    fn accepts(&self, kind: &LayerKind) -> bool;
}

/// Layers that transform the image beneath them
pub trait IsAdjustment {
    /// The filter doing the work
    fn filter(&self) -> &dyn Filter;
    /// Replace the filter
    fn set_filter(&mut self, filter: Box<dyn Filter>);
}

/// Properties shared by every layer
#[derive(Debug, Clone)]
pub struct LayerProps {
    pub(crate) name: String,
    pub(crate) visible: bool,
    pub(crate) opacity: f32,
    pub(crate) blend_mode: BlendMode,
    pub(crate) mask: Option<Mask>,
    pub(crate) holder: HolderRef,
}

impl LayerProps {
    fn new(name: impl Into<String>, blend_mode: BlendMode) -> Self {
        Self {
            name: name.into(),
            visible: true,
            opacity: 1.0,
            blend_mode,
            mask: None,
            holder: HolderRef::Root,
        }
    }

    /// The mask, if present and enabled
    pub fn active_mask(&self) -> Option<&Mask> {
        self.mask.as_ref().filter(|m| m.is_enabled())
    }

    /// Normal blending at full opacity without an active mask
    pub fn is_plain(&self) -> bool {
        self.active_mask().is_none()
            && self.blend_mode == BlendMode::Normal
            && self.opacity > OPAQUE_THRESHOLD
    }
}

/// Pixel layer with an integer position
#[derive(Debug, Clone)]
pub struct ImageLayer {
    pub(crate) pixels: PixelBuffer,
    pub(crate) offset: (i64, i64),
}

impl ImageLayer {
    /// The layer's pixels
    pub fn pixels(&self) -> &PixelBuffer {
        &self.pixels
    }

    /// Position of the top-left corner
    pub fn offset(&self) -> (i64, i64) {
        self.offset
    }
}

impl HasContent for ImageLayer {
    fn content(&self, _canvas: &Canvas) -> Result<ContentImage> {
        Ok(ContentImage {
            pixels: self.pixels.clone(),
            offset: self.offset,
        })
    }
}

/// Solid color covering the canvas
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FillLayer {
    /// Fill color
    pub color: Rgba<u8>,
}

impl HasContent for FillLayer {
    fn content(&self, canvas: &Canvas) -> Result<ContentImage> {
        canvas.check_budget(canvas.width(), canvas.height())?;
        Ok(ContentImage {
            pixels: PixelBuffer::filled(canvas.width(), canvas.height(), self.color)?,
            offset: (0, 0),
        })
    }
}

/// Linear two-stop gradient covering the canvas
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradientLayer {
    /// Point where `start_color` is reached
    pub start: DVec2,
    /// Point where `end_color` is reached
    pub end: DVec2,
    /// Color at and before `start`
    pub start_color: Rgba<u8>,
    /// Color at and after `end`
    pub end_color: Rgba<u8>,
}

impl GradientLayer {
    /// Color at a canvas position
    pub fn color_at(&self, p: DVec2) -> Rgba<u8> {
        let axis = self.end - self.start;
        let len2 = axis.length_squared();
        let t = if len2 <= f64::EPSILON {
            1.0
        } else {
            ((p - self.start).dot(axis) / len2).clamp(0.0, 1.0)
        };
        let mut out = [0u8; 4];
        for (c, slot) in out.iter_mut().enumerate() {
            let a = self.start_color[c] as f64;
            let b = self.end_color[c] as f64;
            *slot = (a + (b - a) * t).round() as u8;
        }
        Rgba(out)
    }
}

impl HasContent for GradientLayer {
    fn content(&self, canvas: &Canvas) -> Result<ContentImage> {
        let mut pixels = canvas.try_blank()?;
        let stride = canvas.width() as usize * 4;
        if stride > 0 {
            let gradient = *self;
            pixels
                .make_mut()
                .par_chunks_exact_mut(stride)
                .enumerate()
                .for_each(|(y, row)| {
                    for (x, px) in row.chunks_exact_mut(4).enumerate() {
                        let p = DVec2::new(x as f64 + 0.5, y as f64 + 0.5);
                        px.copy_from_slice(&gradient.color_at(p).0);
                    }
                });
        }
        Ok(ContentImage {
            pixels,
            offset: (0, 0),
        })
    }
}

/// Filter applied to everything below the layer
#[derive(Debug, Clone)]
pub struct AdjustmentLayer {
    pub(crate) filter: Box<dyn Filter>,
}

impl IsAdjustment for AdjustmentLayer {
    fn filter(&self) -> &dyn Filter {
        self.filter.as_ref()
    }

    fn set_filter(&mut self, filter: Box<dyn Filter>) {
        self.filter = filter;
    }
}

/// Container layer; pass-through when its blend mode is [`BlendMode::PassThrough`]
#[derive(Debug, Clone, Default)]
pub struct LayerGroup {
    pub(crate) children: Vec<LayerId>,
    pub(crate) cache: CacheSlot,
}

impl LayerGroup {
    /// Cache of the isolated composite
    pub fn cache(&self) -> &CacheSlot {
        &self.cache
    }
}

impl IsHolder for LayerGroup {
    fn children(&self) -> &[LayerId] {
        &self.children
    }

    fn children_mut(&mut self) -> &mut Vec<LayerId> {
        &mut self.children
    }

    fn accepts(&self, kind: &LayerKind) -> bool {
        !matches!(kind, LayerKind::SmartFilter(_))
    }
}

/// Where a smart object's filter chain starts
#[derive(Debug, Clone)]
pub enum BaseSource {
    /// The embedded content's composite, untransformed
    Content,
    /// The embedded content through an accumulated affine transform
    Transformed(ImageTransformer),
}

/// Upstream of a smart filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterSource {
    /// The owning smart object's base source
    Base,
    /// The previous filter in the chain
    Filter(LayerId),
}

/// Layer wrapping an embedded composition and a chain of smart filters
#[derive(Debug)]
pub struct SmartObject {
    pub(crate) content: Box<Composition>,
    pub(crate) content_revision: u64,
    pub(crate) base: BaseSource,
    pub(crate) filters: Vec<LayerId>,
    pub(crate) cache: CacheSlot,
    pub(crate) link: Option<LinkedContent>,
}

impl SmartObject {
    pub(crate) fn new(content: Composition) -> Self {
        let content_revision = content.revision();
        Self {
            content: Box::new(content),
            content_revision,
            base: BaseSource::Content,
            filters: Vec::new(),
            cache: CacheSlot::new(),
            link: None,
        }
    }

    /// The embedded composition
    pub fn content(&self) -> &Composition {
        &self.content
    }

    /// Base source of the filter chain
    pub fn base(&self) -> &BaseSource {
        &self.base
    }

    /// Smart filters, first applied first
    pub fn filters(&self) -> &[LayerId] {
        &self.filters
    }

    /// Cache of the chain output
    pub fn cache(&self) -> &CacheSlot {
        &self.cache
    }

    /// External file this smart object is linked to
    pub fn link(&self) -> Option<&LinkedContent> {
        self.link.as_ref()
    }

    /// Size of the image entering the filter chain
    pub fn output_size(&self) -> (u32, u32) {
        match &self.base {
            BaseSource::Content => self.content.canvas().dimensions(),
            BaseSource::Transformed(transformer) => transformer.target_size(),
        }
    }

    /// Base source image, re-rendering the content or transform only when stale
    pub(crate) fn base_image(&mut self) -> Result<PixelBuffer> {
        let content = self.content.composite_image()?;
        match &mut self.base {
            BaseSource::Content => Ok(content),
            BaseSource::Transformed(transformer) => transformer.image(&content),
        }
    }
}

impl IsHolder for SmartObject {
    fn children(&self) -> &[LayerId] {
        &self.filters
    }

    fn children_mut(&mut self) -> &mut Vec<LayerId> {
        &mut self.filters
    }

    fn accepts(&self, kind: &LayerKind) -> bool {
        matches!(kind, LayerKind::SmartFilter(_))
    }
}

/// One node of a smart object's filter chain
#[derive(Debug, Clone)]
pub struct SmartFilter {
    pub(crate) filter: Box<dyn Filter>,
    pub(crate) source: FilterSource,
    pub(crate) next: Option<LayerId>,
    pub(crate) cache: CacheSlot,
}

impl SmartFilter {
    /// Upstream image source
    pub fn source(&self) -> FilterSource {
        self.source
    }

    /// Downstream filter
    pub fn next(&self) -> Option<LayerId> {
        self.next
    }

    /// Cache of the raw filter output (no mask, opacity or blending)
    pub fn cache(&self) -> &CacheSlot {
        &self.cache
    }
}

impl IsAdjustment for SmartFilter {
    fn filter(&self) -> &dyn Filter {
        self.filter.as_ref()
    }

    fn set_filter(&mut self, filter: Box<dyn Filter>) {
        self.filter = filter;
    }
}

/// Closed set of layer variants
#[derive(Debug)]
pub enum LayerKind {
    /// Pixels
    Image(ImageLayer),
    /// Solid color
    Fill(FillLayer),
    /// Linear gradient
    Gradient(GradientLayer),
    /// Filter over the layers below
    Adjustment(AdjustmentLayer),
    /// Group of layers
    Group(LayerGroup),
    /// Embedded composition with a filter chain
    SmartObject(SmartObject),
    /// Node of a smart object's filter chain
    SmartFilter(SmartFilter),
}

impl LayerKind {
    /// Short lowercase name of the variant
    pub fn name(&self) -> &'static str {
        match self {
            LayerKind::Image(_) => "image",
            LayerKind::Fill(_) => "fill",
            LayerKind::Gradient(_) => "gradient",
            LayerKind::Adjustment(_) => "adjustment",
            LayerKind::Group(_) => "group",
            LayerKind::SmartObject(_) => "smart object",
            LayerKind::SmartFilter(_) => "smart filter",
        }
    }

    /// Content capability
    pub fn as_content(&self) -> Option<&dyn HasContent> {
        match self {
            LayerKind::Image(l) => Some(l),
            LayerKind::Fill(l) => Some(l),
            LayerKind::Gradient(l) => Some(l),
            _ => None,
        }
    }

    /// Holder capability
    pub fn as_holder(&self) -> Option<&dyn IsHolder> {
        match self {
            LayerKind::Group(g) => Some(g),
            LayerKind::SmartObject(so) => Some(so),
            _ => None,
        }
    }

    /// Mutable holder capability
    pub fn as_holder_mut(&mut self) -> Option<&mut dyn IsHolder> {
        match self {
            LayerKind::Group(g) => Some(g),
            LayerKind::SmartObject(so) => Some(so),
            _ => None,
        }
    }

    /// Adjustment capability
    pub fn as_adjustment(&self) -> Option<&dyn IsAdjustment> {
        match self {
            LayerKind::Adjustment(a) => Some(a),
            LayerKind::SmartFilter(f) => Some(f),
            _ => None,
        }
    }

    /// Mutable adjustment capability
    pub fn as_adjustment_mut(&mut self) -> Option<&mut dyn IsAdjustment> {
        match self {
            LayerKind::Adjustment(a) => Some(a),
            LayerKind::SmartFilter(f) => Some(f),
            _ => None,
        }
    }
}

/// A single layer: shared properties plus its variant
#[derive(Debug)]
pub struct Layer {
    pub(crate) props: LayerProps,
    pub(crate) kind: LayerKind,
}

impl Layer {
    fn with_kind(name: impl Into<String>, kind: LayerKind) -> Self {
        let blend_mode = match kind {
            LayerKind::Group(_) => BlendMode::PassThrough,
            _ => BlendMode::Normal,
        };
        Self {
            props: LayerProps::new(name, blend_mode),
            kind,
        }
    }

    /// Pixel layer at the canvas origin
    pub fn image(name: impl Into<String>, pixels: PixelBuffer) -> Self {
        Self::with_kind(
            name,
            LayerKind::Image(ImageLayer {
                pixels,
                offset: (0, 0),
            }),
        )
    }

    /// Solid color layer
    pub fn fill(name: impl Into<String>, color: Rgba<u8>) -> Self {
        Self::with_kind(name, LayerKind::Fill(FillLayer { color }))
    }

    /// Gradient layer
    pub fn gradient(name: impl Into<String>, gradient: GradientLayer) -> Self {
        Self::with_kind(name, LayerKind::Gradient(gradient))
    }

    /// Adjustment layer
    pub fn adjustment(name: impl Into<String>, filter: Box<dyn Filter>) -> Self {
        Self::with_kind(name, LayerKind::Adjustment(AdjustmentLayer { filter }))
    }

    /// Empty pass-through group
    pub fn group(name: impl Into<String>) -> Self {
        Self::with_kind(name, LayerKind::Group(LayerGroup::default()))
    }

    /// Smart object embedding `content`
    pub fn smart_object(name: impl Into<String>, content: Composition) -> Self {
        Self::with_kind(name, LayerKind::SmartObject(SmartObject::new(content)))
    }

    /// Smart filter node (only valid inside a smart object)
    pub fn smart_filter(name: impl Into<String>, filter: Box<dyn Filter>) -> Self {
        Self::with_kind(
            name,
            LayerKind::SmartFilter(SmartFilter {
                filter,
                source: FilterSource::Base,
                next: None,
                cache: CacheSlot::new(),
            }),
        )
    }

    /// Set opacity
    pub fn with_opacity(mut self, opacity: f32) -> Self {
        self.props.opacity = opacity.clamp(0.0, 1.0);
        self
    }

    /// Set blend mode
    pub fn with_blend_mode(mut self, blend_mode: BlendMode) -> Self {
        self.props.blend_mode = blend_mode;
        self
    }

    /// Set visibility
    pub fn with_visibility(mut self, visible: bool) -> Self {
        self.props.visible = visible;
        self
    }

    /// Attach a mask
    pub fn with_mask(mut self, mask: Mask) -> Self {
        self.props.mask = Some(mask);
        self
    }

    /// Position an image layer (ignored by other kinds)
    pub fn with_offset(mut self, offset: (i64, i64)) -> Self {
        if let LayerKind::Image(image) = &mut self.kind {
            image.offset = offset;
        }
        self
    }

    /// Shared properties
    pub fn props(&self) -> &LayerProps {
        &self.props
    }

    /// Variant
    pub fn kind(&self) -> &LayerKind {
        &self.kind
    }

    /// Display name
    pub fn name(&self) -> &str {
        &self.props.name
    }

    /// Visibility
    pub fn is_visible(&self) -> bool {
        self.props.visible
    }

    /// Opacity (0.0 - 1.0)
    pub fn opacity(&self) -> f32 {
        self.props.opacity
    }

    /// Blend mode
    pub fn blend_mode(&self) -> BlendMode {
        self.props.blend_mode
    }

    /// Mask, whether enabled or not
    pub fn mask(&self) -> Option<&Mask> {
        self.props.mask.as_ref()
    }

    /// Owning holder
    pub fn holder(&self) -> HolderRef {
        self.props.holder
    }

    /// Whether this is a group drawn as its own flattened image
    pub fn is_isolated_group(&self) -> bool {
        matches!(self.kind, LayerKind::Group(_)) && !self.props.blend_mode.is_pass_through()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Invert;

    #[test]
    fn test_layer_creation() {
        let layer = Layer::fill("Paper", Rgba([255, 255, 255, 255]))
            .with_blend_mode(BlendMode::Multiply)
            .with_opacity(1.5);

        assert_eq!(layer.name(), "Paper");
        assert_eq!(layer.blend_mode(), BlendMode::Multiply);
        assert_eq!(layer.opacity(), 1.0);
        assert!(layer.is_visible());
        assert_eq!(layer.holder(), HolderRef::Root);
    }

    #[test]
    fn test_groups_default_to_pass_through() {
        let group = Layer::group("Group 1");
        assert_eq!(group.blend_mode(), BlendMode::PassThrough);
        assert!(!group.is_isolated_group());

        let isolated = Layer::group("Group 2").with_blend_mode(BlendMode::Normal);
        assert!(isolated.is_isolated_group());
    }

    #[test]
    fn test_capabilities() {
        let adjustment = Layer::adjustment("Invert", Box::new(Invert));
        assert!(adjustment.kind().as_adjustment().is_some());
        assert!(adjustment.kind().as_content().is_none());
        assert!(adjustment.kind().as_holder().is_none());

        let group = Layer::group("g");
        let holder = group.kind().as_holder().unwrap();
        assert!(holder.accepts(&Layer::fill("f", Rgba([0, 0, 0, 255])).kind));
        assert!(!holder.accepts(&Layer::smart_filter("sf", Box::new(Invert)).kind));
    }

    #[test]
    fn test_gradient_endpoints() {
        let gradient = GradientLayer {
            start: DVec2::new(0.0, 0.0),
            end: DVec2::new(10.0, 0.0),
            start_color: Rgba([0, 0, 0, 255]),
            end_color: Rgba([255, 255, 255, 255]),
        };
        assert_eq!(gradient.color_at(DVec2::new(-5.0, 3.0)), Rgba([0, 0, 0, 255]));
        assert_eq!(gradient.color_at(DVec2::new(20.0, 0.0)), Rgba([255, 255, 255, 255]));
        assert_eq!(gradient.color_at(DVec2::new(5.0, 0.0))[0], 128);
    }

    #[test]
    fn test_plain_props() {
        let layer = Layer::image("img", PixelBuffer::try_new(1, 1).unwrap());
        assert!(layer.props().is_plain());
        let masked = Layer::image("img", PixelBuffer::try_new(1, 1).unwrap())
            .with_mask(Mask::new(1, 1, crate::mask::MaskInit::RevealAll));
        assert!(!masked.props().is_plain());
    }
}
