//! Generational arena holding every layer of one composition.

use super::id::LayerId;
use super::Layer;

#[derive(Debug)]
struct Slot {
    generation: u32,
    layer: Option<Layer>,
}

/// Arena storage for all layers.
///
/// Layers are addressed by [`LayerId`] handles. Destroyed layers are recycled
/// via a free list, and generation counters prevent stale handle access.
#[derive(Debug, Default)]
pub struct LayerStore {
    slots: Vec<Slot>,
    free_list: Vec<u32>,
    len: usize,
}

impl LayerStore {
    /// Creates an empty layer store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a layer and returns its handle.
    pub fn insert(&mut self, layer: Layer) -> LayerId {
        self.len += 1;
        if let Some(idx) = self.free_list.pop() {
            // Reuse a freed slot.
            let slot = &mut self.slots[idx as usize];
            slot.generation += 1;
            slot.layer = Some(layer);
            return LayerId {
                idx,
                generation: slot.generation,
            };
        }
        let idx = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            layer: Some(layer),
        });
        LayerId { idx, generation: 0 }
    }

    /// Removes a layer, freeing its slot for reuse.
    pub fn remove(&mut self, id: LayerId) -> Option<Layer> {
        let slot = self.slots.get_mut(id.idx as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let layer = slot.layer.take()?;
        self.free_list.push(id.idx);
        self.len -= 1;
        Some(layer)
    }

    /// Returns `true` if the handle refers to a live layer.
    pub fn is_alive(&self, id: LayerId) -> bool {
        self.get(id).is_some()
    }

    /// Shared access to a live layer.
    pub fn get(&self, id: LayerId) -> Option<&Layer> {
        let slot = self.slots.get(id.idx as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.layer.as_ref()
    }

    /// Mutable access to a live layer.
    pub fn get_mut(&mut self, id: LayerId) -> Option<&mut Layer> {
        let slot = self.slots.get_mut(id.idx as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.layer.as_mut()
    }

    /// Number of live layers.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if no layers are alive.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterates over all live layers in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (LayerId, &Layer)> {
        self.slots.iter().enumerate().filter_map(|(idx, slot)| {
            slot.layer.as_ref().map(|layer| {
                (
                    LayerId {
                        idx: idx as u32,
                        generation: slot.generation,
                    },
                    layer,
                )
            })
        })
    }
}
