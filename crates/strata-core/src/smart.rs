//! Smart objects and their filter chains
//!
//! A smart object renders its embedded composition (optionally through an
//! accumulated affine transform) and pipes the result through an ordered
//! chain of smart filters. Each filter node caches its *raw* output, before
//! mask, opacity and blend mode are applied, so that changing only how a node
//! is blended never reruns its filter.
//!
//! The chain is a linked list inside the arena: every node knows its
//! upstream `source` and its downstream `next`. Invalidation only ever walks
//! downstream:
//!
//! | change                        | raw caches dropped        |
//! |-------------------------------|---------------------------|
//! | filter settings of node k     | k and everything after k  |
//! | opacity/blend/mask/visibility | everything after k        |
//! | insert/delete/move            | from the lowest moved slot|
//! | content, resize, flip, rotate | the whole chain           |

use crate::compositing::blend_filtered;
use crate::composition::Composition;
use crate::events::CompositionEvent;
use crate::filter::{Filter, FilterRun};
use crate::layer::{
    BaseSource, FilterSource, HolderRef, Layer, LayerId, LayerKind, SmartFilter, SmartObject,
};
use crate::pixel::PixelBuffer;
use crate::transform::{
    flip_transform, resize_transform, rotate_transform, FlipDirection, ImageTransformer,
    QuadrantAngle,
};
use crate::{CoreError, Result};
use glam::DAffine2;
use tracing::{debug, info};

impl Composition {
    // -- Lookup --

    /// Smart object behind a handle
    pub fn smart_object(&self, id: LayerId) -> Result<&SmartObject> {
        match &self.layer(id)?.kind {
            LayerKind::SmartObject(so) => Ok(so),
            _ => Err(CoreError::WrongLayerKind {
                id,
                expected: "smart object",
            }),
        }
    }

    pub(crate) fn smart_object_mut(&mut self, id: LayerId) -> Result<&mut SmartObject> {
        match &mut self.layer_mut(id)?.kind {
            LayerKind::SmartObject(so) => Ok(so),
            _ => Err(CoreError::WrongLayerKind {
                id,
                expected: "smart object",
            }),
        }
    }

    /// Smart filter behind a handle
    pub fn smart_filter(&self, id: LayerId) -> Result<&SmartFilter> {
        match &self.layer(id)?.kind {
            LayerKind::SmartFilter(sf) => Ok(sf),
            _ => Err(CoreError::WrongLayerKind {
                id,
                expected: "smart filter",
            }),
        }
    }

    fn smart_filter_mut(&mut self, id: LayerId) -> Result<&mut SmartFilter> {
        match &mut self.layer_mut(id)?.kind {
            LayerKind::SmartFilter(sf) => Ok(sf),
            _ => Err(CoreError::WrongLayerKind {
                id,
                expected: "smart filter",
            }),
        }
    }

    /// Smart object owning a filter node
    pub fn owner_of(&self, filter: LayerId) -> Result<LayerId> {
        self.smart_filter(filter)?;
        match self.layer(filter)?.props.holder {
            HolderRef::Layer(so) => Ok(so),
            HolderRef::Root => Err(CoreError::InvalidPlacement {
                child: "smart filter",
                holder: HolderRef::Root.to_string(),
            }),
        }
    }

    // -- Rendering --

    /// Drop every cache of a smart object whose embedded content changed
    fn sync_content_revision(&mut self, so: LayerId) -> Result<()> {
        let object = self.smart_object_mut(so)?;
        let revision = object.content.revision();
        if object.content_revision == revision {
            return Ok(());
        }
        object.content_revision = revision;
        object.cache.invalidate();
        if let BaseSource::Transformed(transformer) = &mut object.base {
            transformer.invalidate();
        }
        if let Some(&first) = object.filters.first() {
            self.invalidate_chain(first)?;
        }
        Ok(())
    }

    /// Output of a smart object's whole chain, from its cache when valid
    pub(crate) fn smart_object_image(&mut self, so: LayerId) -> Result<PixelBuffer> {
        self.sync_content_revision(so)?;
        let object = self.smart_object(so)?;
        if let Some(image) = object.cache.get() {
            return Ok(image.clone());
        }
        let filters = object.filters.clone();
        let mut current = self.smart_object_mut(so)?.base_image()?;
        for filter in filters {
            current = self.smart_filter_output(filter, current)?;
        }

        debug!("Recomputed smart object '{}'", self.layer(so)?.name());
        self.smart_object_mut(so)?.cache.store(current.clone());
        Ok(current)
    }

    /// A node's contribution: `input` passed through, or the raw output
    /// blended over `input`
    fn smart_filter_output(&mut self, id: LayerId, input: PixelBuffer) -> Result<PixelBuffer> {
        if !self.layer(id)?.is_visible() {
            return Ok(input);
        }
        let raw = self.smart_filter_raw(id, &input)?;
        blend_filtered(&self.layer(id)?.props, raw, &input)
    }

    fn smart_filter_raw(&mut self, id: LayerId, input: &PixelBuffer) -> Result<PixelBuffer> {
        let node = self.smart_filter(id)?;
        if let Some(raw) = node.cache.get() {
            return Ok(raw.clone());
        }
        let layer = self.layer(id)?;
        let run = FilterRun {
            composition: &self.name,
            layer: layer.name(),
            lenient: self.config.unattended,
        };
        let raw = run.apply(node.filter.as_ref(), input)?;
        debug!("Ran smart filter '{}'", layer.name());
        self.smart_filter_mut(id)?.cache.store(raw.clone());
        Ok(raw)
    }

    /// Nodes upstream of `id`, first applied first, found by following `source` links
    fn chain_upstream(&self, id: LayerId) -> Result<Vec<LayerId>> {
        let mut upstream = Vec::new();
        let mut source = self.smart_filter(id)?.source;
        while let FilterSource::Filter(prev) = source {
            upstream.push(prev);
            source = self.smart_filter(prev)?.source;
        }
        upstream.reverse();
        Ok(upstream)
    }

    /// Image entering a filter node
    pub fn smart_filter_input(&mut self, id: LayerId) -> Result<PixelBuffer> {
        let so = self.owner_of(id)?;
        self.sync_content_revision(so)?;
        let upstream = self.chain_upstream(id)?;
        let mut current = self.smart_object_mut(so)?.base_image()?;
        for prev in upstream {
            current = self.smart_filter_output(prev, current)?;
        }
        Ok(current)
    }

    /// Chain output up to and including a filter node
    pub fn smart_filter_image(&mut self, id: LayerId) -> Result<PixelBuffer> {
        let input = self.smart_filter_input(id)?;
        self.smart_filter_output(id, input)
    }

    // -- Invalidation --

    /// Drop a node's own raw cache
    pub fn invalidate_cache(&mut self, id: LayerId) -> Result<()> {
        self.smart_filter_mut(id)?.cache.invalidate();
        Ok(())
    }

    /// Drop the raw caches of a node and every node after it
    pub fn invalidate_chain(&mut self, id: LayerId) -> Result<()> {
        let mut current = Some(id);
        while let Some(node) = current {
            let filter = self.smart_filter_mut(node)?;
            filter.cache.invalidate();
            current = filter.next;
        }
        Ok(())
    }

    /// Opacity, blend mode, mask or visibility of a node changed: only what
    /// comes after it is stale, its own raw output is still good
    pub(crate) fn smart_filter_layer_level_changed(&mut self, id: LayerId) -> Result<()> {
        let so = self.owner_of(id)?;
        if let Some(next) = self.smart_filter(id)?.next {
            self.invalidate_chain(next)?;
        }
        self.invalidate_holder_chain(HolderRef::Layer(so));
        self.publish(CompositionEvent::PropertiesChanged(id));
        self.publish(CompositionEvent::IconStale(so));
        Ok(())
    }

    /// A node's filter parameters changed
    pub fn filter_settings_changed(&mut self, id: LayerId) -> Result<()> {
        let so = self.owner_of(id)?;
        self.invalidate_chain(id)?;
        self.invalidate_holder_chain(HolderRef::Layer(so));
        self.publish(CompositionEvent::IconStale(so));
        Ok(())
    }

    /// Everything of a smart object is stale
    pub(crate) fn smart_object_rebased(&mut self, so: LayerId) -> Result<()> {
        if let Some(&first) = self.smart_object(so)?.filters.first() {
            self.invalidate_chain(first)?;
        }
        self.invalidate_holder_chain(HolderRef::Layer(so));
        self.publish(CompositionEvent::IconStale(so));
        Ok(())
    }

    // -- Chain structure --

    /// Rewrite `source`/`next` of every node from the child order
    fn relink_chain(&mut self, so: LayerId) -> Result<()> {
        let filters = self.smart_object(so)?.filters.clone();
        for (index, &id) in filters.iter().enumerate() {
            let source = match index {
                0 => FilterSource::Base,
                _ => FilterSource::Filter(filters[index - 1]),
            };
            let next = filters.get(index + 1).copied();
            let node = self.smart_filter_mut(id)?;
            node.source = source;
            node.next = next;
        }
        Ok(())
    }

    /// Stale-mark the chain from position `index` on after a structural edit
    fn chain_changed_from(&mut self, so: LayerId, index: usize) -> Result<()> {
        if let Some(&from) = self.smart_object(so)?.filters.get(index) {
            self.invalidate_chain(from)?;
        }
        self.invalidate_holder_chain(HolderRef::Layer(so));
        self.publish(CompositionEvent::IconStale(so));
        self.check_structure();
        Ok(())
    }

    /// Append a filter to the end of a smart object's chain
    pub fn add_smart_filter(
        &mut self,
        so: LayerId,
        name: impl Into<String>,
        filter: Box<dyn Filter>,
    ) -> Result<LayerId> {
        let len = self.smart_object(so)?.filters.len();
        self.insert_smart_filter(so, len, Layer::smart_filter(name, filter))
    }

    /// Insert a filter node at `index` of a smart object's chain
    pub fn insert_smart_filter(
        &mut self,
        so: LayerId,
        index: usize,
        mut layer: Layer,
    ) -> Result<LayerId> {
        let len = self.smart_object(so)?.filters.len();
        if !matches!(layer.kind, LayerKind::SmartFilter(_)) {
            return Err(CoreError::InvalidPlacement {
                child: layer.kind.name(),
                holder: HolderRef::Layer(so).to_string(),
            });
        }
        if layer.props.blend_mode.is_pass_through() {
            return Err(CoreError::PassThroughNotAllowed(layer.name().to_string()));
        }
        if index > len {
            return Err(CoreError::IndexOutOfBounds { index, len });
        }

        let footprint = self.smart_object(so)?.output_size();
        if let Some(mask) = layer.props.mask.as_mut() {
            let size = mask.pixels().dimensions();
            if size != footprint {
                mask.transform(resize_transform(size, footprint), footprint);
            }
        }

        layer.props.holder = HolderRef::Layer(so);
        info!("Adding smart filter '{}'", layer.name());
        let id = self.store.insert(layer);
        self.smart_object_mut(so)?.filters.insert(index, id);
        self.relink_chain(so)?;

        self.publish(CompositionEvent::LayerAdded {
            layer: id,
            holder: HolderRef::Layer(so),
        });
        self.chain_changed_from(so, index)?;
        Ok(id)
    }

    /// Remove a filter node, connecting its neighbours
    pub fn delete_smart_filter(&mut self, id: LayerId) -> Result<()> {
        let so = self.owner_of(id)?;
        let filters = &mut self.smart_object_mut(so)?.filters;
        let index = filters
            .iter()
            .position(|&f| f == id)
            .ok_or(CoreError::LayerNotFound(id))?;
        filters.remove(index);
        if let Some(layer) = self.store.remove(id) {
            info!("Deleting smart filter '{}'", layer.name());
        }
        self.relink_chain(so)?;

        self.publish(CompositionEvent::LayerRemoved { layer: id });
        self.chain_changed_from(so, index)
    }

    /// Move a filter node to `new_index` of its chain
    pub fn move_smart_filter(&mut self, id: LayerId, new_index: usize) -> Result<()> {
        let so = self.owner_of(id)?;
        let filters = &mut self.smart_object_mut(so)?.filters;
        let len = filters.len();
        if new_index >= len {
            return Err(CoreError::IndexOutOfBounds {
                index: new_index,
                len,
            });
        }
        let old_index = filters
            .iter()
            .position(|&f| f == id)
            .ok_or(CoreError::LayerNotFound(id))?;
        if old_index == new_index {
            return Ok(());
        }
        let moved = filters.remove(old_index);
        filters.insert(new_index, moved);
        self.relink_chain(so)?;

        self.publish(CompositionEvent::LayerMoved { layer: id });
        self.chain_changed_from(so, old_index.min(new_index))
    }

    /// Move a filter one step later in the chain. Returns false if it is already last.
    pub fn move_smart_filter_up(&mut self, id: LayerId) -> Result<bool> {
        let (_, index) = self.position_of(id)?;
        if self.smart_filter(id)?.next.is_none() {
            return Ok(false);
        }
        self.move_smart_filter(id, index + 1)?;
        Ok(true)
    }

    /// Move a filter one step earlier in the chain. Returns false if it is already first.
    pub fn move_smart_filter_down(&mut self, id: LayerId) -> Result<bool> {
        let (_, index) = self.position_of(id)?;
        if index == 0 {
            return Ok(false);
        }
        self.move_smart_filter(id, index - 1)?;
        Ok(true)
    }

    /// Swap two nodes of the same chain
    pub fn swap_smart_filters(&mut self, a: LayerId, b: LayerId) -> Result<()> {
        let so = self.owner_of(a)?;
        if self.owner_of(b)? != so {
            return Err(CoreError::DifferentHolders(a, b));
        }
        let filters = &mut self.smart_object_mut(so)?.filters;
        let index_a = filters.iter().position(|&f| f == a);
        let index_b = filters.iter().position(|&f| f == b);
        let (Some(index_a), Some(index_b)) = (index_a, index_b) else {
            return Err(CoreError::DifferentHolders(a, b));
        };
        filters.swap(index_a, index_b);
        self.relink_chain(so)?;

        self.publish(CompositionEvent::LayerMoved { layer: a });
        self.publish(CompositionEvent::LayerMoved { layer: b });
        self.chain_changed_from(so, index_a.min(index_b))
    }

    // -- Content & transforms --

    /// Edit the embedded composition; every cache of the smart object is
    /// dropped if the content changed
    pub fn edit_smart_object_content<R>(
        &mut self,
        so: LayerId,
        edit: impl FnOnce(&mut Composition) -> Result<R>,
    ) -> Result<R> {
        let result = edit(&mut self.smart_object_mut(so)?.content);
        let object = self.smart_object(so)?;
        if object.content.revision() != object.content_revision {
            self.sync_content_revision(so)?;
            self.invalidate_holder_chain(HolderRef::Layer(so));
            self.publish(CompositionEvent::IconStale(so));
        }
        result
    }

    /// Apply an affine transform after everything accumulated so far
    pub fn transform_smart_object(
        &mut self,
        so: LayerId,
        transform: DAffine2,
        target_size: (u32, u32),
    ) -> Result<()> {
        self.canvas.check_budget(target_size.0, target_size.1)?;
        let object = self.smart_object_mut(so)?;
        if matches!(object.base, BaseSource::Content) {
            let size = object.content.canvas().dimensions();
            object.base = BaseSource::Transformed(ImageTransformer::identity(size));
        }
        if let BaseSource::Transformed(transformer) = &mut object.base {
            transformer.pre_concatenate(transform, target_size);
        }
        // Filter masks live in output space and follow the transform
        let filters = object.filters.clone();
        for filter in filters {
            if let Some(mask) = self.layer_mut(filter)?.props.mask.as_mut() {
                mask.transform(transform, target_size);
            }
        }
        self.smart_object_rebased(so)
    }

    /// Scale the smart object's output to `size`
    pub fn resize_smart_object(&mut self, so: LayerId, size: (u32, u32)) -> Result<()> {
        let from = self.smart_object(so)?.output_size();
        self.transform_smart_object(so, resize_transform(from, size), size)
    }

    /// Mirror the smart object's output
    pub fn flip_smart_object(&mut self, so: LayerId, direction: FlipDirection) -> Result<()> {
        let size = self.smart_object(so)?.output_size();
        self.transform_smart_object(so, flip_transform(direction, size), size)
    }

    /// Rotate the smart object's output by a multiple of 90 degrees
    pub fn rotate_smart_object(&mut self, so: LayerId, angle: QuadrantAngle) -> Result<()> {
        let size = self.smart_object(so)?.output_size();
        let (transform, rotated) = rotate_transform(angle, size);
        self.transform_smart_object(so, transform, rotated)
    }
}
