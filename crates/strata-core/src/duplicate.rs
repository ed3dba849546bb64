//! Layer and composition duplication
//!
//! A copy is first built as a detached tree and then inserted through the
//! regular structural path. Every copied node therefore gets a fresh arena
//! handle, smart filter chains are relinked in their new owner and all caches
//! start out empty. Pixel buffers are shared copy-on-write.

use crate::cache::CacheSlot;
use crate::composition::Composition;
use crate::layer::{
    BaseSource, FilterSource, HolderRef, Layer, LayerGroup, LayerId, LayerKind, SmartFilter,
    SmartObject,
};
use crate::Result;
use std::path::PathBuf;
use tracing::info;

/// A copied layer with copies of its children, owned by no store
struct DetachedLayer {
    layer: Layer,
    children: Vec<DetachedLayer>,
    missing_link: Option<PathBuf>,
}

impl Composition {
    /// Deep copy of the whole layer tree into a new composition with the same
    /// name, canvas and settings. Subscribers and the history sink stay with
    /// the original.
    pub fn duplicate(&self) -> Result<Composition> {
        let (width, height) = self.canvas.dimensions();
        let mut copy = Composition::with_config(self.name.clone(), width, height, self.config.clone());
        for (index, &id) in self.root.iter().enumerate() {
            let tree = self.detach_copy(id)?;
            copy.attach_copy(HolderRef::Root, index, tree)?;
        }
        copy.last_filter = self.last_filter.clone();
        Ok(copy)
    }

    /// Copy a layer and everything inside it; the copy lands right above the
    /// original in the same holder (or chain). Recorded as one edit.
    pub fn duplicate_layer(&mut self, id: LayerId) -> Result<LayerId> {
        self.recorded("Duplicate Layer", |comp| {
            let (holder, index) = comp.position_of(id)?;
            let mut tree = comp.detach_copy(id)?;
            info!("Duplicating layer '{}'", tree.layer.name());
            tree.layer.props.name = format!("{} (copy)", tree.layer.props.name);
            comp.attach_copy(holder, index + 1, tree)
        })
    }

    fn detach_copy(&self, id: LayerId) -> Result<DetachedLayer> {
        let layer = self.layer(id)?;
        let kind = match &layer.kind {
            LayerKind::Image(image) => LayerKind::Image(image.clone()),
            LayerKind::Fill(fill) => LayerKind::Fill(*fill),
            LayerKind::Gradient(gradient) => LayerKind::Gradient(*gradient),
            LayerKind::Adjustment(adjustment) => LayerKind::Adjustment(adjustment.clone()),
            // Children are re-attached one by one
            LayerKind::Group(_) => LayerKind::Group(LayerGroup::default()),
            LayerKind::SmartObject(so) => {
                let mut object = SmartObject::new(so.content.duplicate()?);
                object.base = so.base.clone();
                if let BaseSource::Transformed(transformer) = &mut object.base {
                    transformer.invalidate();
                }
                object.link = so.link.clone();
                LayerKind::SmartObject(object)
            }
            LayerKind::SmartFilter(sf) => LayerKind::SmartFilter(SmartFilter {
                filter: sf.filter.clone(),
                source: FilterSource::Base,
                next: None,
                cache: CacheSlot::new(),
            }),
        };

        let mut children = Vec::new();
        if let Some(holder) = layer.kind.as_holder() {
            for &child in holder.children() {
                children.push(self.detach_copy(child)?);
            }
        }
        let missing_link = self
            .pending_links
            .iter()
            .find(|pending| pending.layer == id)
            .map(|pending| pending.path.clone());

        Ok(DetachedLayer {
            layer: Layer {
                props: layer.props.clone(),
                kind,
            },
            children,
            missing_link,
        })
    }

    fn attach_copy(&mut self, holder: HolderRef, index: usize, tree: DetachedLayer) -> Result<LayerId> {
        let DetachedLayer {
            layer,
            children,
            missing_link,
        } = tree;
        let id = self.insert_layer(holder, index, layer)?;
        for (child_index, child) in children.into_iter().enumerate() {
            self.attach_copy(HolderRef::Layer(id), child_index, child)?;
        }
        if let Some(path) = missing_link {
            self.link_missing(id, path);
        }
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Invert;
    use image::Rgba;

    #[test]
    fn test_duplicate_composition_is_independent() {
        let mut comp = Composition::new("doc", 2, 2);
        let fill = comp
            .add_layer(HolderRef::Root, Layer::fill("red", Rgba([255, 0, 0, 255])))
            .unwrap();
        comp.add_layer(HolderRef::Root, Layer::adjustment("inv", Box::new(Invert)))
            .unwrap();

        let mut copy = comp.duplicate().unwrap();
        assert_eq!(copy.name(), "doc");
        assert_eq!(copy.layer_count(), 2);
        assert_eq!(
            copy.composite_image().unwrap().image().as_raw(),
            comp.composite_image().unwrap().image().as_raw()
        );

        comp.set_fill_color(fill, Rgba([0, 0, 255, 255])).unwrap();
        assert_eq!(copy.composite_image().unwrap().pixel(0, 0), Rgba([0, 255, 255, 255]));
    }
}
