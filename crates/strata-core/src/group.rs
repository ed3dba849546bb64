//! Layer groups
//!
//! A group in [`BlendMode::PassThrough`] mode is only an organizational
//! container: its children are composited straight into the parent. Any other
//! blend mode isolates the group, which is then flattened on its own (from a
//! transparent canvas) and drawn into the parent like a single layer, with
//! the group's opacity, blend mode and mask.

use crate::blend::BlendMode;
use crate::composition::Composition;
use crate::events::CompositionEvent;
use crate::layer::{HolderRef, Layer, LayerId, LayerKind};
use crate::pixel::PixelBuffer;
use crate::{CoreError, Result};
use tracing::{debug, info};

impl Composition {
    fn group_children(&self, id: LayerId) -> Result<&[LayerId]> {
        match &self.layer(id)?.kind {
            LayerKind::Group(group) => Ok(&group.children),
            _ => Err(CoreError::WrongLayerKind {
                id,
                expected: "group",
            }),
        }
    }

    /// Flattened image of an isolated group, from its cache when valid
    pub(crate) fn group_image(&mut self, id: LayerId) -> Result<PixelBuffer> {
        let layer = self.layer(id)?;
        let LayerKind::Group(group) = &layer.kind else {
            return Err(CoreError::WrongLayerKind {
                id,
                expected: "group",
            });
        };
        if let Some(image) = group.cache.get() {
            return Ok(image.clone());
        }
        let children = group.children.clone();
        let blank = self.canvas.try_blank()?;
        let mut first_visible = true;
        let image = self.composite_children(&children, blank, &mut first_visible)?;

        let layer = self.layer_mut(id)?;
        debug!("Recomputed isolated group '{}'", layer.name());
        if let LayerKind::Group(group) = &mut layer.kind {
            group.cache.store(image.clone());
        }
        Ok(image)
    }

    /// Whether a group is drawn as a flattened unit
    pub fn is_isolated(&self, id: LayerId) -> Result<bool> {
        self.group_children(id)?;
        Ok(self.layer(id)?.is_isolated_group())
    }

    /// Switch a group between pass-through and isolated (Normal) compositing
    pub fn set_isolated(&mut self, id: LayerId, isolated: bool) -> Result<()> {
        self.group_children(id)?;
        let mode = if isolated {
            BlendMode::Normal
        } else {
            BlendMode::PassThrough
        };
        self.set_blend_mode(id, mode)
    }

    pub(crate) fn isolation_changed(&mut self, id: LayerId) -> Result<()> {
        if let LayerKind::Group(group) = &mut self.layer_mut(id)?.kind {
            group.cache.invalidate();
        }
        self.publish(CompositionEvent::IconStale(id));
        Ok(())
    }

    /// Insert an empty pass-through group
    pub fn create_group(
        &mut self,
        holder: HolderRef,
        index: usize,
        name: impl Into<String>,
    ) -> Result<LayerId> {
        self.insert_layer(holder, index, Layer::group(name))
    }

    /// Wrap sibling layers in a new group placed where the topmost of them was.
    ///
    /// The layers keep their relative order; unselected layers between them
    /// end up below the group. An empty selection creates an empty group on
    /// top of the root.
    pub fn group_layers(&mut self, ids: &[LayerId], name: impl Into<String>) -> Result<LayerId> {
        let Some(&first) = ids.first() else {
            return self.add_layer(HolderRef::Root, Layer::group(name));
        };
        let (holder, _) = self.position_of(first)?;
        let mut positioned = Vec::with_capacity(ids.len());
        for &id in ids {
            let (other, index) = self.position_of(id)?;
            if other != holder {
                return Err(CoreError::DifferentHolders(first, id));
            }
            positioned.push((index, id));
        }
        positioned.sort_unstable();
        positioned.dedup();
        if let HolderRef::Layer(so) = holder {
            if matches!(self.layer(so)?.kind, LayerKind::SmartObject(_)) {
                return Err(CoreError::InvalidPlacement {
                    child: "group",
                    holder: holder.to_string(),
                });
            }
        }

        let name = name.into();
        info!("Grouping {} layers into '{}'", positioned.len(), name);
        let top = positioned.last().map_or(0, |&(index, _)| index);
        // Above the topmost layer; it slides down as the selection moves out
        let group = self.insert_layer(holder, top + 1, Layer::group(name))?;
        for (target, (_, id)) in positioned.into_iter().enumerate() {
            self.reparent_layer(id, HolderRef::Layer(group), target)?;
        }
        Ok(group)
    }

    /// Replace a group by its children, in order, and delete it
    pub fn ungroup(&mut self, id: LayerId) -> Result<Vec<LayerId>> {
        let children = self.group_children(id)?.to_vec();
        let (holder, index) = self.position_of(id)?;
        info!("Ungrouping '{}'", self.layer(id)?.name());

        for (offset, &child) in children.iter().enumerate() {
            self.reparent_layer(child, holder, index + offset)?;
        }
        self.remove_layer(id)?;
        Ok(children)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);

    #[test]
    fn test_group_and_ungroup_keep_order() {
        let mut comp = Composition::new("doc", 2, 2);
        let a = comp.add_layer(HolderRef::Root, Layer::fill("a", RED)).unwrap();
        let b = comp.add_layer(HolderRef::Root, Layer::fill("b", RED)).unwrap();
        let c = comp.add_layer(HolderRef::Root, Layer::fill("c", RED)).unwrap();

        let group = comp.group_layers(&[c, b], "g").unwrap();
        assert_eq!(comp.root_layers(), &[a, group]);
        assert_eq!(comp.children(HolderRef::Layer(group)).unwrap(), &[b, c]);
        assert_eq!(comp.layer(b).unwrap().holder(), HolderRef::Layer(group));

        let released = comp.ungroup(group).unwrap();
        assert_eq!(released, vec![b, c]);
        assert_eq!(comp.root_layers(), &[a, b, c]);
        assert!(!comp.contains(group));
    }

    #[test]
    fn test_group_takes_topmost_slot() {
        let mut comp = Composition::new("doc", 2, 2);
        let a = comp.add_layer(HolderRef::Root, Layer::fill("a", RED)).unwrap();
        let b = comp.add_layer(HolderRef::Root, Layer::fill("b", RED)).unwrap();
        let c = comp.add_layer(HolderRef::Root, Layer::fill("c", RED)).unwrap();
        let d = comp.add_layer(HolderRef::Root, Layer::fill("d", RED)).unwrap();

        let group = comp.group_layers(&[a, c], "g").unwrap();
        assert_eq!(comp.root_layers(), &[b, group, d]);
        assert_eq!(comp.children(HolderRef::Layer(group)).unwrap(), &[a, c]);
    }

    #[test]
    fn test_group_layers_requires_siblings() {
        let mut comp = Composition::new("doc", 2, 2);
        let group = comp.add_layer(HolderRef::Root, Layer::group("g")).unwrap();
        let inner = comp
            .add_layer(HolderRef::Layer(group), Layer::fill("inner", RED))
            .unwrap();
        let outer = comp.add_layer(HolderRef::Root, Layer::fill("outer", RED)).unwrap();

        let result = comp.group_layers(&[inner, outer], "x");
        assert!(matches!(result, Err(CoreError::DifferentHolders(_, _))));
    }

    #[test]
    fn test_isolation_toggle() {
        let mut comp = Composition::new("doc", 2, 2);
        let group = comp.add_layer(HolderRef::Root, Layer::group("g")).unwrap();
        comp.add_layer(HolderRef::Layer(group), Layer::fill("a", RED))
            .unwrap();
        assert!(!comp.is_isolated(group).unwrap());

        comp.set_isolated(group, true).unwrap();
        assert!(comp.is_isolated(group).unwrap());
        comp.composite_image().unwrap();
        let stats = comp.layer_cache_stats(group).unwrap().unwrap();
        assert!(stats.valid);

        let (_, rx) = comp.subscribe();
        comp.set_isolated(group, false).unwrap();
        let stats = comp.layer_cache_stats(group).unwrap().unwrap();
        assert!(!stats.valid);
        assert!(rx
            .try_iter()
            .any(|e| e == CompositionEvent::IconStale(group)));
    }

    #[test]
    fn test_is_isolated_rejects_non_groups() {
        let mut comp = Composition::new("doc", 2, 2);
        let fill = comp.add_layer(HolderRef::Root, Layer::fill("a", RED)).unwrap();
        assert!(matches!(
            comp.is_isolated(fill),
            Err(CoreError::WrongLayerKind { .. })
        ));
    }
}
