//! Per-composition event bus
//!
//! Every [`Composition`](crate::Composition) owns one bus. Observers (layer
//! panels, icon renderers, history views) subscribe to it and receive events
//! over a channel; dropping the receiver is enough to stop listening.

use crate::layer::{HolderRef, LayerId};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::path::PathBuf;

/// Something observable happened to a composition
#[derive(Debug, Clone, PartialEq)]
pub enum CompositionEvent {
    /// A layer was inserted
    LayerAdded {
        /// New layer
        layer: LayerId,
        /// Where it was inserted
        holder: HolderRef,
    },
    /// A layer (and its subtree) was deleted
    LayerRemoved {
        /// Deleted layer
        layer: LayerId,
    },
    /// A layer changed position or holder
    LayerMoved {
        /// Moved layer
        layer: LayerId,
    },
    /// Visibility, opacity, blend mode, mask or name changed
    PropertiesChanged(LayerId),
    /// Filter parameters changed
    FilterChanged(LayerId),
    /// The layer's icon no longer matches its pixels
    IconStale(LayerId),
    /// The composite image is out of date
    ImageChanged,
    /// A linked smart object's file could not be found
    LinkedContentMissing {
        /// Smart object
        layer: LayerId,
        /// Path that failed to load
        path: PathBuf,
    },
    /// A pending link was resolved
    LinkedContentResolved {
        /// Smart object
        layer: LayerId,
        /// New path, or `None` if the placeholder was kept
        path: Option<PathBuf>,
    },
    /// A linked file changed on disk and was reloaded
    LinkedContentReloaded(LayerId),
}

/// Handle returned by [`EventBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Fan-out of composition events to subscribers
#[derive(Debug, Default)]
pub struct EventBus {
    next_id: u64,
    subscribers: Vec<(SubscriptionId, Sender<CompositionEvent>)>,
}

impl EventBus {
    /// Create a bus without subscribers
    pub fn new() -> Self {
        Self::default()
    }

    /// Start receiving events
    pub fn subscribe(&mut self) -> (SubscriptionId, Receiver<CompositionEvent>) {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        let (tx, rx) = unbounded();
        self.subscribers.push((id, tx));
        (id, rx)
    }

    /// Stop delivering events to a subscriber
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sub, _)| *sub != id);
        self.subscribers.len() != before
    }

    /// Deliver an event; subscribers whose receiver is gone are dropped
    pub fn publish(&mut self, event: CompositionEvent) {
        if self.subscribers.is_empty() {
            return;
        }
        self.subscribers
            .retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_reaches_all_subscribers() {
        let mut bus = EventBus::new();
        let (_, rx1) = bus.subscribe();
        let (_, rx2) = bus.subscribe();

        bus.publish(CompositionEvent::ImageChanged);

        assert_eq!(rx1.try_recv().unwrap(), CompositionEvent::ImageChanged);
        assert_eq!(rx2.try_recv().unwrap(), CompositionEvent::ImageChanged);
    }

    #[test]
    fn test_unsubscribe() {
        let mut bus = EventBus::new();
        let (id, rx) = bus.subscribe();
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));

        bus.publish(CompositionEvent::ImageChanged);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dropped_receiver_is_pruned() {
        let mut bus = EventBus::new();
        let (_, rx) = bus.subscribe();
        drop(rx);
        bus.publish(CompositionEvent::ImageChanged);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
