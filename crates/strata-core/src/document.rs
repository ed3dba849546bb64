//! Serializable snapshot of a composition
//!
//! [`Document`] is a plain tree of values: it holds no handles and no caches,
//! so it can be shared across threads, kept in history stacks and written to
//! disk by `strata-io`. Filters are stored as [`FilterDescriptor`]s and rebuilt
//! through a [`FilterRegistry`] on load.

use crate::blend::BlendMode;
use crate::composition::Composition;
use crate::config::EngineConfig;
use crate::filter::{FilterDescriptor, FilterRegistry};
use crate::layer::{
    BaseSource, GradientLayer, HolderRef, Layer, LayerId, LayerKind, LayerProps,
};
use crate::linked::{open_linked_content, LinkedContent};
use crate::mask::Mask;
use crate::pixel::PixelBuffer;
use crate::transform::ImageTransformer;
use crate::{CoreError, Result};
use glam::{DAffine2, DVec2};
use image::{GrayImage, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

/// A whole composition as data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Composition name
    pub name: String,
    /// Canvas width
    pub width: u32,
    /// Canvas height
    pub height: u32,
    /// Root layers, bottom to top
    #[serde(default)]
    pub layers: Vec<LayerDoc>,
}

impl Document {
    /// Document without layers
    pub fn empty(name: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            layers: Vec::new(),
        }
    }

    /// Number of layers, including nested ones and smart filters
    pub fn layer_count(&self) -> usize {
        fn count(layers: &[LayerDoc]) -> usize {
            layers
                .iter()
                .map(|layer| {
                    1 + match &layer.kind {
                        LayerKindDoc::Group { children } => count(children),
                        LayerKindDoc::SmartObject { filters, .. } => count(filters),
                        _ => 0,
                    }
                })
                .sum()
        }
        count(&self.layers)
    }
}

/// One layer as data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerDoc {
    /// Display name
    pub name: String,
    /// Visibility
    #[serde(default = "default_true")]
    pub visible: bool,
    /// Opacity (0.0 - 1.0)
    #[serde(default = "default_opacity")]
    pub opacity: f32,
    /// Blend mode
    #[serde(default)]
    pub blend_mode: BlendMode,
    /// Mask, if any
    #[serde(default)]
    pub mask: Option<MaskDoc>,
    /// Variant data
    pub kind: LayerKindDoc,
}

fn default_true() -> bool {
    true
}

fn default_opacity() -> f32 {
    1.0
}

/// Mask samples and flags
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskDoc {
    /// Mask width
    pub width: u32,
    /// Mask height
    pub height: u32,
    /// Applied during compositing
    pub enabled: bool,
    /// Moves with the layer
    pub linked: bool,
    /// Row-major grayscale samples
    pub samples: Vec<u8>,
}

/// Accumulated smart object transform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformDoc {
    /// Column-major 2x3 affine matrix
    pub matrix: [f64; 6],
    /// Output size
    pub target_size: (u32, u32),
}

/// Variant-specific layer data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LayerKindDoc {
    /// Pixel layer
    Image {
        /// Pixel width
        width: u32,
        /// Pixel height
        height: u32,
        /// Position of the top-left corner
        #[serde(default)]
        offset: (i64, i64),
        /// Row-major RGBA samples
        rgba: Vec<u8>,
    },
    /// Solid color
    Fill {
        /// RGBA color
        color: [u8; 4],
    },
    /// Linear gradient
    Gradient {
        /// Start point
        start: [f64; 2],
        /// End point
        end: [f64; 2],
        /// Color at the start
        start_color: [u8; 4],
        /// Color at the end
        end_color: [u8; 4],
    },
    /// Adjustment layer
    Adjustment {
        /// Filter name and parameters
        filter: FilterDescriptor,
    },
    /// Group of layers
    Group {
        /// Children, bottom to top
        #[serde(default)]
        children: Vec<LayerDoc>,
    },
    /// Smart object
    SmartObject {
        /// Embedded content; `None` when the content is linked
        #[serde(default)]
        content: Option<Box<Document>>,
        /// Size of the content canvas (used for missing linked files)
        content_size: (u32, u32),
        /// External file the content comes from
        #[serde(default)]
        link: Option<LinkedContent>,
        /// Accumulated resize/flip/rotate
        #[serde(default)]
        transform: Option<TransformDoc>,
        /// Smart filters, first applied first
        #[serde(default)]
        filters: Vec<LayerDoc>,
    },
    /// Smart filter node
    SmartFilter {
        /// Filter name and parameters
        filter: FilterDescriptor,
    },
}

/// What a load needs besides the document itself
#[derive(Debug, Default)]
pub struct LoadOptions {
    /// Rebuilds filters from descriptors
    pub registry: FilterRegistry,
    /// Directory relative link paths are resolved against
    pub base_dir: Option<PathBuf>,
    /// Settings for the loaded compositions
    pub config: EngineConfig,
}

fn color_array(color: Rgba<u8>) -> [u8; 4] {
    color.0
}

impl Composition {
    /// Snapshot the layer tree as data
    pub fn to_document(&self) -> Result<Document> {
        let (width, height) = self.canvas.dimensions();
        Ok(Document {
            name: self.name.clone(),
            width,
            height,
            layers: self.layer_docs(&self.root)?,
        })
    }

    fn layer_docs(&self, ids: &[LayerId]) -> Result<Vec<LayerDoc>> {
        ids.iter().map(|&id| self.layer_doc(id)).collect()
    }

    fn layer_doc(&self, id: LayerId) -> Result<LayerDoc> {
        let layer = self.layer(id)?;
        let kind = match &layer.kind {
            LayerKind::Image(image) => LayerKindDoc::Image {
                width: image.pixels.width(),
                height: image.pixels.height(),
                offset: image.offset,
                rgba: image.pixels.image().as_raw().clone(),
            },
            LayerKind::Fill(fill) => LayerKindDoc::Fill {
                color: color_array(fill.color),
            },
            LayerKind::Gradient(gradient) => LayerKindDoc::Gradient {
                start: gradient.start.to_array(),
                end: gradient.end.to_array(),
                start_color: color_array(gradient.start_color),
                end_color: color_array(gradient.end_color),
            },
            LayerKind::Adjustment(adjustment) => LayerKindDoc::Adjustment {
                filter: adjustment.filter.descriptor(),
            },
            LayerKind::Group(group) => LayerKindDoc::Group {
                children: self.layer_docs(&group.children)?,
            },
            LayerKind::SmartObject(so) => LayerKindDoc::SmartObject {
                content: match so.link {
                    Some(_) => None,
                    None => Some(Box::new(so.content.to_document()?)),
                },
                content_size: so.content.canvas().dimensions(),
                link: so.link.clone(),
                transform: match &so.base {
                    BaseSource::Content => None,
                    BaseSource::Transformed(transformer) => Some(TransformDoc {
                        matrix: transformer.transform().to_cols_array(),
                        target_size: transformer.target_size(),
                    }),
                },
                filters: self.layer_docs(&so.filters)?,
            },
            LayerKind::SmartFilter(sf) => LayerKindDoc::SmartFilter {
                filter: sf.filter.descriptor(),
            },
        };
        Ok(LayerDoc {
            name: layer.props.name.clone(),
            visible: layer.props.visible,
            opacity: layer.props.opacity,
            blend_mode: layer.props.blend_mode,
            mask: layer.props.mask.as_ref().map(|mask| MaskDoc {
                width: mask.pixels().width(),
                height: mask.pixels().height(),
                enabled: mask.is_enabled(),
                linked: mask.is_linked(),
                samples: mask.pixels().as_raw().clone(),
            }),
            kind,
        })
    }

    /// Build a composition from data
    pub fn from_document(doc: &Document, options: &LoadOptions) -> Result<Self> {
        let mut comp = Composition::with_config(
            doc.name.clone(),
            doc.width,
            doc.height,
            options.config.clone(),
        );
        for layer in &doc.layers {
            comp.load_layer(HolderRef::Root, layer, options)?;
        }
        info!(
            "Loaded composition '{}' ({} layers)",
            comp.name,
            comp.layer_count()
        );
        Ok(comp)
    }

    /// Replace the whole layer tree with a document's, keeping subscribers,
    /// the history sink and the last applied filter. Existing handles become stale.
    pub fn restore(&mut self, doc: &Document, options: &LoadOptions) -> Result<()> {
        let mut fresh = Composition::from_document(doc, options)?;
        fresh.events = std::mem::take(&mut self.events);
        fresh.history = self.history.take();
        fresh.last_filter = self.last_filter.take();
        fresh.revision = self.revision;
        *self = fresh;
        self.mark_changed();
        Ok(())
    }

    fn load_layer(
        &mut self,
        holder: HolderRef,
        doc: &LayerDoc,
        options: &LoadOptions,
    ) -> Result<LayerId> {
        let mut missing = None;
        let mut layer = match &doc.kind {
            LayerKindDoc::Image {
                width,
                height,
                offset,
                rgba,
            } => {
                let image = RgbaImage::from_raw(*width, *height, rgba.clone()).ok_or_else(|| {
                    CoreError::InvalidDocument(format!(
                        "layer '{}': pixel data does not match {}x{}",
                        doc.name, width, height
                    ))
                })?;
                Layer::image(doc.name.clone(), PixelBuffer::from_image(image)).with_offset(*offset)
            }
            LayerKindDoc::Fill { color } => Layer::fill(doc.name.clone(), Rgba(*color)),
            LayerKindDoc::Gradient {
                start,
                end,
                start_color,
                end_color,
            } => Layer::gradient(
                doc.name.clone(),
                GradientLayer {
                    start: DVec2::from_array(*start),
                    end: DVec2::from_array(*end),
                    start_color: Rgba(*start_color),
                    end_color: Rgba(*end_color),
                },
            ),
            LayerKindDoc::Adjustment { filter } => {
                Layer::adjustment(doc.name.clone(), options.registry.build(filter)?)
            }
            LayerKindDoc::Group { .. } => Layer::group(doc.name.clone()),
            LayerKindDoc::SmartObject {
                content,
                content_size,
                link,
                transform,
                ..
            } => {
                let mut layer = match (content, link) {
                    (_, Some(link)) => {
                        let opened = open_linked_content(&doc.name, link, *content_size, options)?;
                        missing = opened.missing;
                        let mut layer = Layer::smart_object(doc.name.clone(), opened.composition);
                        if let LayerKind::SmartObject(so) = &mut layer.kind {
                            so.link = Some(opened.link);
                        }
                        layer
                    }
                    (Some(content), None) => Layer::smart_object(
                        doc.name.clone(),
                        Composition::from_document(content, options)?,
                    ),
                    (None, None) => {
                        return Err(CoreError::InvalidDocument(format!(
                            "smart object '{}' has neither content nor link",
                            doc.name
                        )))
                    }
                };
                if let (Some(transform), LayerKind::SmartObject(so)) = (transform, &mut layer.kind)
                {
                    so.base = BaseSource::Transformed(ImageTransformer::new(
                        DAffine2::from_cols_array(&transform.matrix),
                        transform.target_size,
                    ));
                }
                layer
            }
            LayerKindDoc::SmartFilter { filter } => {
                Layer::smart_filter(doc.name.clone(), options.registry.build(filter)?)
            }
        };

        layer.props = LayerProps {
            name: doc.name.clone(),
            visible: doc.visible,
            opacity: doc.opacity.clamp(0.0, 1.0),
            blend_mode: doc.blend_mode,
            mask: doc.mask.as_ref().map(|m| load_mask(&doc.name, m)).transpose()?,
            holder,
        };
        let id = self.add_layer(holder, layer)?;

        if let Some(path) = missing {
            self.link_missing(id, path);
        }

        match &doc.kind {
            LayerKindDoc::Group { children } => {
                for child in children {
                    self.load_layer(HolderRef::Layer(id), child, options)?;
                }
            }
            LayerKindDoc::SmartObject { filters, .. } => {
                for filter in filters {
                    self.load_layer(HolderRef::Layer(id), filter, options)?;
                }
            }
            _ => {}
        }
        Ok(id)
    }
}

fn load_mask(layer: &str, doc: &MaskDoc) -> Result<Mask> {
    let pixels = GrayImage::from_raw(doc.width, doc.height, doc.samples.clone()).ok_or_else(|| {
        CoreError::InvalidDocument(format!(
            "layer '{}': mask data does not match {}x{}",
            layer, doc.width, doc.height
        ))
    })?;
    let mut mask = Mask::from_gray(pixels);
    mask.set_enabled(doc.enabled);
    mask.set_linked(doc.linked);
    Ok(mask)
}
