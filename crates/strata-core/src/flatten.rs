//! Destructive merging: merge down and flatten
//!
//! Both operations bake the current look of some layers into plain pixels and
//! throw the originals away. Each call is recorded as a single edit.

use crate::blend::Composite;
use crate::composition::Composition;
use crate::events::CompositionEvent;
use crate::layer::{HolderRef, Layer, LayerId, LayerKind};
use crate::{CoreError, Result};
use tracing::info;

impl Composition {
    /// Draw a layer onto the image layer directly below it and delete it.
    ///
    /// Returns false (and changes nothing) when the layer is at the bottom of
    /// its holder or when either layer is hidden. The layer below must be an
    /// image layer; it keeps its own properties and ends up canvas-sized at
    /// offset (0, 0). An adjustment layer's result replaces the pixels below.
    pub fn merge_down(&mut self, id: LayerId) -> Result<bool> {
        let layer = self.layer(id)?;
        if matches!(layer.kind, LayerKind::SmartFilter(_)) {
            return Err(CoreError::WrongLayerKind {
                id,
                expected: "layer outside a filter chain",
            });
        }
        let visible = layer.is_visible();
        let (holder, index) = self.position_of(id)?;
        if index == 0 {
            return Ok(false);
        }
        let below = self.children(holder)?[index - 1];
        let below_layer = self.layer(below)?;
        if !visible || !below_layer.is_visible() {
            return Ok(false);
        }
        if !matches!(below_layer.kind, LayerKind::Image(_)) {
            return Err(CoreError::WrongLayerKind {
                id: below,
                expected: "image layer",
            });
        }

        self.recorded("Merge Down", |comp| comp.merge_into(id, below))?;
        Ok(true)
    }

    fn merge_into(&mut self, id: LayerId, below: LayerId) -> Result<()> {
        let LayerKind::Image(image) = &self.layer(below)?.kind else {
            return Err(CoreError::WrongLayerKind {
                id: below,
                expected: "image layer",
            });
        };
        let covers_canvas =
            image.offset == (0, 0) && image.pixels.dimensions() == self.canvas.dimensions();
        let base = if covers_canvas {
            image.pixels.clone()
        } else {
            let pixels = image.pixels.clone();
            let offset = image.offset;
            let mut base = self.canvas.try_blank()?;
            Composite::source_over(1.0).draw(base.make_mut(), pixels.image(), offset);
            base
        };

        info!(
            "Merging '{}' into '{}'",
            self.layer(id)?.name(),
            self.layer(below)?.name()
        );
        let mut first_visible = false;
        let merged = self.apply_layer(id, base, &mut first_visible)?;

        if let LayerKind::Image(image) = &mut self.layer_mut(below)?.kind {
            image.pixels = merged;
            image.offset = (0, 0);
        }
        self.content_changed(below)?;
        self.remove_layer(id)
    }

    /// Replace every layer with a single image layer holding the composite.
    ///
    /// Returns false for an empty composition. Pending links of removed
    /// smart objects are dropped.
    pub fn flatten_image(&mut self) -> Result<bool> {
        if self.root.is_empty() {
            return Ok(false);
        }
        self.recorded("Flatten Image", |comp| comp.flatten_root())?;
        Ok(true)
    }

    fn flatten_root(&mut self) -> Result<LayerId> {
        let image = self.composite_image()?;
        info!("Flattening {} layers of '{}'", self.store.len(), self.name);

        for id in std::mem::take(&mut self.root) {
            self.destroy_subtree(id);
            self.publish(CompositionEvent::LayerRemoved { layer: id });
        }
        self.pending_links.clear();
        self.add_layer(HolderRef::Root, Layer::image("Flattened", image))
    }
}
