//! Compositions: the root holder of a layer tree
//!
//! A [`Composition`] owns its layers (in a [`LayerStore`]), the root child
//! list, the flattened image cache, an event bus and an optional history sink.
//! All structural edits and property changes go through it so that cache
//! invalidation always follows the same paths:
//!
//! - a layer changes: every group and smart object containing it drops its
//!   cache, then the composition cache is dropped
//! - a smart filter changes: see [`crate::smart`]

use crate::blend::BlendMode;
use crate::cache::{CacheSlot, CacheStats};
use crate::config::EngineConfig;
use crate::events::{CompositionEvent, EventBus, SubscriptionId};
use crate::filter::{Filter, FilterRun};
use crate::history::{Edit, HistorySink};
use crate::integrity::{check_integrity, Issue, IssueSeverity};
use crate::layer::{HolderRef, Layer, LayerId, LayerKind, LayerStore};
use crate::linked::PendingLink;
use crate::mask::{Mask, MaskInit};
use crate::pixel::{Canvas, PixelBuffer};
use crate::{CoreError, Result};
use crossbeam_channel::Receiver;
use image::Rgba;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info};

/// A layered image
pub struct Composition {
    pub(crate) name: String,
    pub(crate) canvas: Canvas,
    pub(crate) config: EngineConfig,
    pub(crate) store: LayerStore,
    pub(crate) root: Vec<LayerId>,
    pub(crate) cache: CacheSlot,
    pub(crate) revision: u64,
    pub(crate) events: EventBus,
    pub(crate) history: Option<Box<dyn HistorySink>>,
    pub(crate) last_filter: Option<Box<dyn Filter>>,
    pub(crate) pending_links: Vec<PendingLink>,
}

impl Composition {
    /// Create an empty composition with the default configuration
    pub fn new(name: impl Into<String>, width: u32, height: u32) -> Self {
        Self::with_config(name, width, height, EngineConfig::default())
    }

    /// Create an empty composition
    pub fn with_config(
        name: impl Into<String>,
        width: u32,
        height: u32,
        config: EngineConfig,
    ) -> Self {
        let canvas = Canvas::new(width, height).with_max_pixels(config.max_buffer_pixels);
        Self {
            name: name.into(),
            canvas,
            config,
            store: LayerStore::new(),
            root: Vec::new(),
            cache: CacheSlot::new(),
            revision: 0,
            events: EventBus::new(),
            history: None,
            last_filter: None,
            pending_links: Vec::new(),
        }
    }

    // -- Accessors --

    /// Composition name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rename the composition
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Drawing area
    pub fn canvas(&self) -> &Canvas {
        &self.canvas
    }

    /// Engine settings
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Counter bumped on every change that affects the composite
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Top-level layers, bottom to top
    pub fn root_layers(&self) -> &[LayerId] {
        &self.root
    }

    /// Number of live layers, including nested ones
    pub fn layer_count(&self) -> usize {
        self.store.len()
    }

    /// Look up a layer
    pub fn layer(&self, id: LayerId) -> Result<&Layer> {
        self.store.get(id).ok_or(CoreError::LayerNotFound(id))
    }

    pub(crate) fn layer_mut(&mut self, id: LayerId) -> Result<&mut Layer> {
        self.store.get_mut(id).ok_or(CoreError::LayerNotFound(id))
    }

    /// Whether a handle refers to a live layer
    pub fn contains(&self, id: LayerId) -> bool {
        self.store.is_alive(id)
    }

    /// First layer with the given name, searching depth-first from the root
    pub fn find_layer(&self, name: &str) -> Option<LayerId> {
        fn search(comp: &Composition, ids: &[LayerId], name: &str) -> Option<LayerId> {
            for &id in ids {
                let layer = comp.store.get(id)?;
                if layer.name() == name {
                    return Some(id);
                }
                if let Some(holder) = layer.kind.as_holder() {
                    if let Some(found) = search(comp, holder.children(), name) {
                        return Some(found);
                    }
                }
            }
            None
        }
        search(self, &self.root, name)
    }

    /// Children of a holder, bottom to top
    pub fn children(&self, holder: HolderRef) -> Result<&[LayerId]> {
        match holder {
            HolderRef::Root => Ok(&self.root),
            HolderRef::Layer(id) => self
                .layer(id)?
                .kind
                .as_holder()
                .map(|h| h.children())
                .ok_or(CoreError::WrongLayerKind {
                    id,
                    expected: "layer holder",
                }),
        }
    }

    pub(crate) fn children_mut(&mut self, holder: HolderRef) -> Result<&mut Vec<LayerId>> {
        match holder {
            HolderRef::Root => Ok(&mut self.root),
            HolderRef::Layer(id) => self
                .layer_mut(id)?
                .kind
                .as_holder_mut()
                .map(|h| h.children_mut())
                .ok_or(CoreError::WrongLayerKind {
                    id,
                    expected: "layer holder",
                }),
        }
    }

    /// Holder and index of a layer
    pub fn position_of(&self, id: LayerId) -> Result<(HolderRef, usize)> {
        let holder = self.layer(id)?.props.holder;
        let index = self
            .children(holder)?
            .iter()
            .position(|&c| c == id)
            .ok_or(CoreError::LayerNotFound(id))?;
        Ok((holder, index))
    }

    /// Check if `layer_a` is a descendant of `layer_b` (b -> ... -> a)
    pub fn is_descendant(&self, layer_a: LayerId, layer_b: LayerId) -> bool {
        let mut current = self.store.get(layer_a).map(|l| l.props.holder);
        while let Some(HolderRef::Layer(parent)) = current {
            if parent == layer_b {
                return true;
            }
            current = self.store.get(parent).map(|l| l.props.holder);
        }
        false
    }

    /// Cache state of the flattened image
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Cache state of a group, smart object or smart filter
    pub fn layer_cache_stats(&self, id: LayerId) -> Result<Option<CacheStats>> {
        Ok(match &self.layer(id)?.kind {
            LayerKind::Group(g) => Some(g.cache.stats()),
            LayerKind::SmartObject(so) => Some(so.cache.stats()),
            LayerKind::SmartFilter(sf) => Some(sf.cache.stats()),
            _ => None,
        })
    }

    // -- Events & history --

    /// Subscribe to this composition's events
    pub fn subscribe(&mut self) -> (SubscriptionId, Receiver<CompositionEvent>) {
        self.events.subscribe()
    }

    /// Cancel a subscription
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    pub(crate) fn publish(&mut self, event: CompositionEvent) {
        self.events.publish(event);
    }

    /// Install the receiver of recorded edits
    pub fn set_history_sink(&mut self, sink: Box<dyn HistorySink>) {
        self.history = Some(sink);
    }

    /// Remove the history sink
    pub fn take_history_sink(&mut self) -> Option<Box<dyn HistorySink>> {
        self.history.take()
    }

    /// Run `op` and, if it succeeds, hand an [`Edit`] with before/after
    /// snapshots to the history sink. Failed operations record nothing.
    pub fn recorded<T>(
        &mut self,
        name: &str,
        op: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        if self.history.is_none() {
            return op(self);
        }
        let before = Arc::new(self.to_document()?);
        let value = op(self)?;
        let after = Arc::new(self.to_document()?);
        if let Some(sink) = self.history.as_mut() {
            sink.record(Edit {
                name: name.to_string(),
                before,
                after,
            });
        }
        Ok(value)
    }

    // -- Invalidation --

    /// Drop the flattened image and tell observers
    pub(crate) fn mark_changed(&mut self) {
        self.cache.invalidate();
        self.revision += 1;
        self.events.publish(CompositionEvent::ImageChanged);
    }

    /// Invalidate every container from `holder` up to the root
    pub(crate) fn invalidate_holder_chain(&mut self, holder: HolderRef) {
        let mut current = holder;
        while let HolderRef::Layer(id) = current {
            let Some(layer) = self.store.get_mut(id) else {
                break;
            };
            match &mut layer.kind {
                LayerKind::Group(group) => group.cache.invalidate(),
                LayerKind::SmartObject(so) => so.cache.invalidate(),
                _ => {}
            }
            current = layer.props.holder;
        }
        self.mark_changed();
    }

    /// Invalidate everything that contains `id`
    pub(crate) fn invalidate_containers(&mut self, id: LayerId) -> Result<()> {
        let holder = self.layer(id)?.props.holder;
        self.invalidate_holder_chain(holder);
        Ok(())
    }

    /// A property that only affects how a layer is drawn into its holder changed
    pub fn layer_level_property_changed(&mut self, id: LayerId) -> Result<()> {
        if matches!(self.layer(id)?.kind, LayerKind::SmartFilter(_)) {
            return self.smart_filter_layer_level_changed(id);
        }
        self.invalidate_containers(id)?;
        self.publish(CompositionEvent::PropertiesChanged(id));
        Ok(())
    }

    /// The pixels of a layer changed
    pub(crate) fn content_changed(&mut self, id: LayerId) -> Result<()> {
        self.invalidate_containers(id)?;
        self.publish(CompositionEvent::IconStale(id));
        Ok(())
    }

    /// Consistency check run after every structural edit. Errors are logged
    /// in all builds; debug builds also panic on them.
    pub(crate) fn check_structure(&self) -> Vec<Issue> {
        let issues = check_integrity(self);
        let errors: Vec<&str> = issues
            .iter()
            .filter(|issue| issue.severity == IssueSeverity::Error)
            .map(|issue| issue.message.as_str())
            .collect();
        for message in &errors {
            error!("Layer tree of '{}' is inconsistent: {}", self.name, message);
        }
        debug_assert!(
            errors.is_empty(),
            "Layer tree of '{}' is inconsistent:\n{}",
            self.name,
            errors.join("\n")
        );
        issues
    }

    // -- Structure --

    fn check_placement(&self, holder: HolderRef, layer: &Layer) -> Result<()> {
        if layer.props.blend_mode.is_pass_through() && !matches!(layer.kind, LayerKind::Group(_))
        {
            return Err(CoreError::PassThroughNotAllowed(layer.name().to_string()));
        }
        let accepted = match holder {
            HolderRef::Root => !matches!(layer.kind, LayerKind::SmartFilter(_)),
            HolderRef::Layer(id) => self
                .layer(id)?
                .kind
                .as_holder()
                .map(|h| h.accepts(&layer.kind))
                .unwrap_or(false),
        };
        if accepted {
            Ok(())
        } else {
            Err(CoreError::InvalidPlacement {
                child: layer.kind.name(),
                holder: holder.to_string(),
            })
        }
    }

    /// Append a layer on top of a holder
    pub fn add_layer(&mut self, holder: HolderRef, layer: Layer) -> Result<LayerId> {
        let index = self.children(holder)?.len();
        self.insert_layer(holder, index, layer)
    }

    /// Insert a layer at `index` (0 = bottom) of a holder
    pub fn insert_layer(
        &mut self,
        holder: HolderRef,
        index: usize,
        mut layer: Layer,
    ) -> Result<LayerId> {
        if let (HolderRef::Layer(so), LayerKind::SmartFilter(_)) = (holder, &layer.kind) {
            return self.insert_smart_filter(so, index, layer);
        }
        self.check_placement(holder, &layer)?;
        let len = self.children(holder)?.len();
        if index > len {
            return Err(CoreError::IndexOutOfBounds { index, len });
        }

        layer.props.holder = holder;
        info!("Adding {} layer '{}' to {}", layer.kind.name(), layer.name(), holder);
        let id = self.store.insert(layer);
        self.children_mut(holder)?.insert(index, id);

        self.publish(CompositionEvent::LayerAdded { layer: id, holder });
        self.invalidate_holder_chain(holder);
        self.check_structure();
        Ok(id)
    }

    /// Delete a layer and everything inside it
    pub fn remove_layer(&mut self, id: LayerId) -> Result<()> {
        let layer = self.layer(id)?;
        if matches!(layer.kind, LayerKind::SmartFilter(_)) {
            return self.delete_smart_filter(id);
        }
        let holder = layer.props.holder;
        info!("Removing layer '{}'", layer.name());

        self.children_mut(holder)?.retain(|&c| c != id);
        self.destroy_subtree(id);
        let store = &self.store;
        self.pending_links.retain(|p| store.is_alive(p.layer));

        self.publish(CompositionEvent::LayerRemoved { layer: id });
        self.invalidate_holder_chain(holder);
        self.check_structure();
        Ok(())
    }

    pub(crate) fn destroy_subtree(&mut self, id: LayerId) {
        if let Some(layer) = self.store.remove(id) {
            if let Some(holder) = layer.kind.as_holder() {
                for &child in holder.children() {
                    self.destroy_subtree(child);
                }
            }
        }
    }

    /// Move a layer to `new_index` within its holder
    pub fn move_layer(&mut self, id: LayerId, new_index: usize) -> Result<()> {
        if matches!(self.layer(id)?.kind, LayerKind::SmartFilter(_)) {
            return self.move_smart_filter(id, new_index);
        }
        let (holder, old_index) = self.position_of(id)?;
        let children = self.children_mut(holder)?;
        if new_index >= children.len() {
            return Err(CoreError::IndexOutOfBounds {
                index: new_index,
                len: children.len(),
            });
        }
        if new_index == old_index {
            return Ok(());
        }
        let moved = children.remove(old_index);
        children.insert(new_index, moved);

        self.publish(CompositionEvent::LayerMoved { layer: id });
        self.invalidate_holder_chain(holder);
        self.check_structure();
        Ok(())
    }

    /// Move a layer one step towards the top. Returns false if already on top.
    pub fn move_layer_up(&mut self, id: LayerId) -> Result<bool> {
        let (holder, index) = self.position_of(id)?;
        if index + 1 >= self.children(holder)?.len() {
            return Ok(false);
        }
        self.move_layer(id, index + 1)?;
        Ok(true)
    }

    /// Move a layer one step towards the bottom. Returns false if already at the bottom.
    pub fn move_layer_down(&mut self, id: LayerId) -> Result<bool> {
        let (_, index) = self.position_of(id)?;
        if index == 0 {
            return Ok(false);
        }
        self.move_layer(id, index - 1)?;
        Ok(true)
    }

    /// Swap two layers of the same holder
    pub fn swap_layers(&mut self, a: LayerId, b: LayerId) -> Result<()> {
        let (holder_a, index_a) = self.position_of(a)?;
        let (holder_b, index_b) = self.position_of(b)?;
        if holder_a != holder_b {
            return Err(CoreError::DifferentHolders(a, b));
        }
        if matches!(self.layer(a)?.kind, LayerKind::SmartFilter(_)) {
            return self.swap_smart_filters(a, b);
        }
        self.children_mut(holder_a)?.swap(index_a, index_b);

        self.publish(CompositionEvent::LayerMoved { layer: a });
        self.publish(CompositionEvent::LayerMoved { layer: b });
        self.invalidate_holder_chain(holder_a);
        self.check_structure();
        Ok(())
    }

    /// Move a layer into another holder at `index`
    pub fn reparent_layer(&mut self, id: LayerId, new_holder: HolderRef, index: usize) -> Result<()> {
        if let HolderRef::Layer(target) = new_holder {
            // Cannot parent to self or to a descendant
            if target == id || self.is_descendant(target, id) {
                return Err(CoreError::CycleDetected(id));
            }
        }
        let (old_holder, old_index) = self.position_of(id)?;
        if matches!(self.layer(id)?.kind, LayerKind::SmartFilter(_)) {
            return Err(CoreError::InvalidPlacement {
                child: "smart filter",
                holder: new_holder.to_string(),
            });
        }
        self.check_placement(new_holder, self.layer(id)?)?;
        let len = self.children(new_holder)?.len();
        let limit = if new_holder == old_holder { len - 1 } else { len };
        if index > limit {
            return Err(CoreError::IndexOutOfBounds { index, len });
        }

        self.children_mut(old_holder)?.remove(old_index);
        self.children_mut(new_holder)?.insert(index, id);
        self.layer_mut(id)?.props.holder = new_holder;

        self.publish(CompositionEvent::LayerMoved { layer: id });
        self.invalidate_holder_chain(old_holder);
        self.invalidate_holder_chain(new_holder);
        self.check_structure();
        Ok(())
    }

    // -- Layer-level properties --

    /// Rename a layer
    pub fn rename_layer(&mut self, id: LayerId, name: impl Into<String>) -> Result<()> {
        self.layer_mut(id)?.props.name = name.into();
        self.publish(CompositionEvent::PropertiesChanged(id));
        Ok(())
    }

    /// Show or hide a layer
    pub fn set_visible(&mut self, id: LayerId, visible: bool) -> Result<()> {
        let layer = self.layer_mut(id)?;
        if layer.props.visible == visible {
            return Ok(());
        }
        layer.props.visible = visible;
        self.layer_level_property_changed(id)
    }

    /// Set opacity (clamped to 0.0 - 1.0)
    pub fn set_opacity(&mut self, id: LayerId, opacity: f32) -> Result<()> {
        let opacity = opacity.clamp(0.0, 1.0);
        let layer = self.layer_mut(id)?;
        if layer.props.opacity == opacity {
            return Ok(());
        }
        layer.props.opacity = opacity;
        self.layer_level_property_changed(id)
    }

    /// Set blend mode. Toggling a group between pass-through and isolated
    /// drops its cached composite.
    pub fn set_blend_mode(&mut self, id: LayerId, mode: BlendMode) -> Result<()> {
        let layer = self.layer_mut(id)?;
        let old = layer.props.blend_mode;
        if old == mode {
            return Ok(());
        }
        let is_group = matches!(layer.kind, LayerKind::Group(_));
        if mode.is_pass_through() && !is_group {
            return Err(CoreError::PassThroughNotAllowed(layer.name().to_string()));
        }
        layer.props.blend_mode = mode;
        if is_group && old.is_pass_through() != mode.is_pass_through() {
            self.isolation_changed(id)?;
        }
        self.layer_level_property_changed(id)
    }

    /// Footprint of a layer's mask: the owning smart object's output for a
    /// smart filter, the canvas for everything else
    pub fn mask_size(&self, id: LayerId) -> Result<(u32, u32)> {
        if matches!(self.layer(id)?.kind, LayerKind::SmartFilter(_)) {
            let so = self.owner_of(id)?;
            return Ok(self.smart_object(so)?.output_size());
        }
        Ok(self.canvas.dimensions())
    }

    /// Give a layer a mask covering its footprint (see [`Self::mask_size`]).
    ///
    /// Fails with [`CoreError::ResourceExhausted`] and leaves the layer as it
    /// was if the mask cannot be allocated.
    pub fn add_mask(&mut self, id: LayerId, init: MaskInit) -> Result<()> {
        let (width, height) = self.mask_size(id)?;
        self.canvas.check_budget(width, height)?;
        let mask = Mask::try_new(width, height, init)?;
        self.layer_mut(id)?.props.mask = Some(mask);
        self.layer_level_property_changed(id)
    }

    /// Delete a layer's mask, returning it
    pub fn delete_mask(&mut self, id: LayerId) -> Result<Option<Mask>> {
        let mask = self.layer_mut(id)?.props.mask.take();
        if mask.is_some() {
            self.layer_level_property_changed(id)?;
        }
        Ok(mask)
    }

    /// Enable or disable a mask without deleting it
    pub fn set_mask_enabled(&mut self, id: LayerId, enabled: bool) -> Result<()> {
        let layer = self.layer_mut(id)?;
        let Some(mask) = layer.props.mask.as_mut() else {
            return Ok(());
        };
        if mask.is_enabled() == enabled {
            return Ok(());
        }
        mask.set_enabled(enabled);
        self.layer_level_property_changed(id)
    }

    /// Link or unlink a mask from its layer's position
    pub fn set_mask_linked(&mut self, id: LayerId, linked: bool) -> Result<()> {
        if let Some(mask) = self.layer_mut(id)?.props.mask.as_mut() {
            mask.set_linked(linked);
        }
        self.publish(CompositionEvent::PropertiesChanged(id));
        Ok(())
    }

    /// Edit a layer's mask in place. Returns `None` if the layer has no mask.
    pub fn edit_mask<R>(&mut self, id: LayerId, edit: impl FnOnce(&mut Mask) -> R) -> Result<Option<R>> {
        let Some(mask) = self.layer_mut(id)?.props.mask.as_mut() else {
            return Ok(None);
        };
        let result = edit(mask);
        self.layer_level_property_changed(id)?;
        Ok(Some(result))
    }

    // -- Content --

    /// Replace an image layer's pixels
    pub fn set_image_pixels(&mut self, id: LayerId, pixels: PixelBuffer) -> Result<()> {
        match &mut self.layer_mut(id)?.kind {
            LayerKind::Image(image) => image.pixels = pixels,
            _ => {
                return Err(CoreError::WrongLayerKind {
                    id,
                    expected: "image layer",
                })
            }
        }
        self.content_changed(id)
    }

    /// Move an image layer; a linked mask moves along
    pub fn translate_layer(&mut self, id: LayerId, dx: i64, dy: i64) -> Result<()> {
        let layer = self.layer_mut(id)?;
        match &mut layer.kind {
            LayerKind::Image(image) => {
                image.offset = (image.offset.0 + dx, image.offset.1 + dy);
            }
            _ => {
                return Err(CoreError::WrongLayerKind {
                    id,
                    expected: "image layer",
                })
            }
        }
        if let Some(mask) = layer.props.mask.as_mut().filter(|m| m.is_linked()) {
            mask.translate(dx, dy);
        }
        self.content_changed(id)
    }

    /// Change a fill layer's color
    pub fn set_fill_color(&mut self, id: LayerId, color: Rgba<u8>) -> Result<()> {
        match &mut self.layer_mut(id)?.kind {
            LayerKind::Fill(fill) => fill.color = color,
            _ => {
                return Err(CoreError::WrongLayerKind {
                    id,
                    expected: "fill layer",
                })
            }
        }
        self.content_changed(id)
    }

    /// Replace the filter of an adjustment layer or smart filter
    pub fn set_filter(&mut self, id: LayerId, filter: Box<dyn Filter>) -> Result<()> {
        let layer = self.layer_mut(id)?;
        let is_smart = matches!(layer.kind, LayerKind::SmartFilter(_));
        let adjustment = layer
            .kind
            .as_adjustment_mut()
            .ok_or(CoreError::WrongLayerKind {
                id,
                expected: "adjustment layer or smart filter",
            })?;
        adjustment.set_filter(filter);

        self.publish(CompositionEvent::FilterChanged(id));
        if is_smart {
            self.filter_settings_changed(id)
        } else {
            self.invalidate_containers(id)
        }
    }

    /// Run a filter destructively on an image layer and remember it for repeating
    pub fn apply_filter(&mut self, id: LayerId, filter: Box<dyn Filter>) -> Result<()> {
        let lenient = self.config.unattended;
        self.apply_filter_with(id, filter.as_ref(), lenient)?;
        self.last_filter = Some(filter);
        Ok(())
    }

    /// Run the last applied filter again on an image layer
    pub fn repeat_last_filter(&mut self, id: LayerId) -> Result<bool> {
        let Some(filter) = self.last_filter.take() else {
            return Ok(false);
        };
        let result = self.apply_filter_with(id, filter.as_ref(), true);
        self.last_filter = Some(filter);
        result.map(|_| true)
    }

    fn apply_filter_with(&mut self, id: LayerId, filter: &dyn Filter, lenient: bool) -> Result<()> {
        let layer = self.layer(id)?;
        let LayerKind::Image(image) = &layer.kind else {
            return Err(CoreError::WrongLayerKind {
                id,
                expected: "image layer",
            });
        };
        let run = FilterRun {
            composition: &self.name,
            layer: layer.name(),
            lenient,
        };
        let output = run.apply(filter, &image.pixels)?;
        debug!("Applied '{}' to '{}'", filter.name(), layer.name());
        self.set_image_pixels(id, output)
    }

    /// Name of the filter `repeat_last_filter` would run
    pub fn last_filter_name(&self) -> Option<&str> {
        self.last_filter.as_deref().map(|f| f.name())
    }

    /// Linked smart objects whose files were missing at load time
    pub fn pending_links(&self) -> &[PendingLink] {
        &self.pending_links
    }
}

impl fmt::Debug for Composition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Composition")
            .field("name", &self.name)
            .field("canvas", &self.canvas)
            .field("layers", &self.store.len())
            .field("revision", &self.revision)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{Invert, NoOp};

    fn red() -> Rgba<u8> {
        Rgba([255, 0, 0, 255])
    }

    #[test]
    fn test_add_and_remove() {
        let mut comp = Composition::new("doc", 4, 4);
        let a = comp.add_layer(HolderRef::Root, Layer::fill("a", red())).unwrap();
        let b = comp.add_layer(HolderRef::Root, Layer::fill("b", red())).unwrap();
        assert_eq!(comp.root_layers(), &[a, b]);

        comp.remove_layer(a).unwrap();
        assert_eq!(comp.root_layers(), &[b]);
        assert!(!comp.contains(a));
        assert!(matches!(comp.layer(a), Err(CoreError::LayerNotFound(_))));
    }

    #[test]
    fn test_reorder() {
        let mut comp = Composition::new("doc", 4, 4);
        let a = comp.add_layer(HolderRef::Root, Layer::fill("1", red())).unwrap();
        let b = comp.add_layer(HolderRef::Root, Layer::fill("2", red())).unwrap();
        let c = comp.add_layer(HolderRef::Root, Layer::fill("3", red())).unwrap();

        assert!(comp.move_layer_up(a).unwrap());
        assert_eq!(comp.root_layers(), &[b, a, c]);

        assert!(comp.move_layer_down(c).unwrap());
        assert!(comp.move_layer_down(c).unwrap());
        assert!(!comp.move_layer_down(c).unwrap());
        assert_eq!(comp.root_layers(), &[c, b, a]);

        comp.swap_layers(c, a).unwrap();
        assert_eq!(comp.root_layers(), &[a, b, c]);
    }

    #[test]
    fn test_insert_out_of_bounds() {
        let mut comp = Composition::new("doc", 4, 4);
        let result = comp.insert_layer(HolderRef::Root, 3, Layer::fill("a", red()));
        assert!(matches!(
            result,
            Err(CoreError::IndexOutOfBounds { index: 3, len: 0 })
        ));
        assert_eq!(comp.layer_count(), 0);
    }

    #[test]
    fn test_smart_filter_rejected_at_root() {
        let mut comp = Composition::new("doc", 4, 4);
        let result = comp.add_layer(HolderRef::Root, Layer::smart_filter("sf", Box::new(Invert)));
        assert!(matches!(result, Err(CoreError::InvalidPlacement { .. })));
    }

    #[test]
    fn test_pass_through_only_on_groups() {
        let mut comp = Composition::new("doc", 4, 4);
        let fill = comp.add_layer(HolderRef::Root, Layer::fill("a", red())).unwrap();
        let result = comp.set_blend_mode(fill, BlendMode::PassThrough);
        assert!(matches!(result, Err(CoreError::PassThroughNotAllowed(_))));
        assert_eq!(comp.layer(fill).unwrap().blend_mode(), BlendMode::Normal);
    }

    #[test]
    fn test_reparent_prevents_cycles() {
        let mut comp = Composition::new("doc", 4, 4);
        let outer = comp.add_layer(HolderRef::Root, Layer::group("outer")).unwrap();
        let inner = comp
            .add_layer(HolderRef::Layer(outer), Layer::group("inner"))
            .unwrap();

        assert!(comp.is_descendant(inner, outer));
        let result = comp.reparent_layer(outer, HolderRef::Layer(inner), 0);
        assert!(matches!(result, Err(CoreError::CycleDetected(_))));
        let result = comp.reparent_layer(outer, HolderRef::Layer(outer), 0);
        assert!(matches!(result, Err(CoreError::CycleDetected(_))));

        comp.reparent_layer(inner, HolderRef::Root, 0).unwrap();
        assert_eq!(comp.root_layers(), &[inner, outer]);
        assert_eq!(comp.layer(inner).unwrap().holder(), HolderRef::Root);
    }

    #[test]
    fn test_remove_group_destroys_subtree() {
        let mut comp = Composition::new("doc", 4, 4);
        let group = comp.add_layer(HolderRef::Root, Layer::group("g")).unwrap();
        let child = comp
            .add_layer(HolderRef::Layer(group), Layer::fill("c", red()))
            .unwrap();
        comp.remove_layer(group).unwrap();
        assert!(!comp.contains(child));
        assert_eq!(comp.layer_count(), 0);
    }

    #[test]
    fn test_events_published() {
        let mut comp = Composition::new("doc", 4, 4);
        let (_, rx) = comp.subscribe();
        let id = comp.add_layer(HolderRef::Root, Layer::fill("a", red())).unwrap();
        comp.set_opacity(id, 0.5).unwrap();

        let events: Vec<CompositionEvent> = rx.try_iter().collect();
        assert!(events.contains(&CompositionEvent::LayerAdded {
            layer: id,
            holder: HolderRef::Root
        }));
        assert!(events.contains(&CompositionEvent::PropertiesChanged(id)));
        assert!(events.contains(&CompositionEvent::ImageChanged));
    }

    #[test]
    fn test_apply_and_repeat_filter() {
        let mut comp = Composition::new("doc", 2, 2);
        let pixels = PixelBuffer::filled(2, 2, Rgba([10, 20, 30, 255])).unwrap();
        let id = comp.add_layer(HolderRef::Root, Layer::image("img", pixels)).unwrap();

        comp.apply_filter(id, Box::new(Invert)).unwrap();
        assert_eq!(comp.last_filter_name(), Some("Invert"));
        assert!(comp.repeat_last_filter(id).unwrap());

        let LayerKind::Image(image) = comp.layer(id).unwrap().kind() else {
            panic!("not an image layer");
        };
        assert_eq!(image.pixels().pixel(0, 0), Rgba([10, 20, 30, 255]));
    }

    #[test]
    fn test_identity_filter_rejected_unless_repeated() {
        let mut comp = Composition::new("doc", 2, 2);
        let pixels = PixelBuffer::try_new(2, 2).unwrap();
        let id = comp.add_layer(HolderRef::Root, Layer::image("img", pixels)).unwrap();

        let result = comp.apply_filter(id, Box::new(NoOp));
        assert!(matches!(
            result,
            Err(CoreError::FilterContractViolation { .. })
        ));
        assert!(comp.last_filter_name().is_none());

        comp.last_filter = Some(Box::new(NoOp));
        assert!(comp.repeat_last_filter(id).unwrap());
    }

    #[test]
    fn test_add_mask_over_budget_leaves_layer_alone() {
        let config = EngineConfig {
            max_buffer_pixels: 16,
            ..Default::default()
        };
        let mut comp = Composition::with_config("doc", 8, 8, config);
        let id = comp.add_layer(HolderRef::Root, Layer::fill("a", red())).unwrap();
        let revision = comp.revision();

        let result = comp.add_mask(id, MaskInit::RevealAll);
        assert!(matches!(
            result,
            Err(CoreError::ResourceExhausted {
                width: 8,
                height: 8
            })
        ));
        assert!(comp.layer(id).unwrap().mask().is_none());
        assert_eq!(comp.revision(), revision);
    }

    #[test]
    fn test_check_structure_reports_issues() {
        let mut comp = Composition::new("doc", 4, 4);
        let group = comp.add_layer(HolderRef::Root, Layer::group("g")).unwrap();
        let issues = comp.check_structure();
        assert!(issues
            .iter()
            .any(|issue| issue.severity == IssueSeverity::Info && issue.layer == Some(group)));
        assert!(issues.iter().all(|issue| issue.severity != IssueSeverity::Error));
    }
}
