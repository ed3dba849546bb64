//! Strata Core - Layer Model and Compositing Engine
//!
//! This crate contains the non-destructive compositing core of Strata, including:
//! - Layer/holder data model stored in a generational arena
//! - Blend, opacity and mask compositing
//! - Pass-through and isolated layer groups
//! - Duplicate, merge down and flatten
//! - Smart objects with cached filter chains
//! - Per-composition events, history hand-off and preview workers

#![warn(missing_docs)]

use std::path::PathBuf;
use thiserror::Error;

pub mod blend;
pub mod cache;
pub mod composition;
pub mod compositing;
pub mod config;
pub mod document;
pub mod duplicate;
pub mod events;
pub mod filter;
pub mod flatten;
pub mod group;
pub mod history;
pub mod integrity;
pub mod layer;
pub mod linked;
pub mod logging;
pub mod mask;
pub mod pixel;
pub mod smart;
pub mod transform;
pub mod worker;

// --- Re-exports grouped by category ---

// Pixels & Blending
pub use blend::{BlendMode, Composite};
pub use mask::{AlphaView, Mask, MaskInit, RubylithView};
pub use pixel::{thumbnail, Canvas, PixelBuffer};
pub use transform::{FlipDirection, ImageTransformer, QuadrantAngle};

// Layer Model
pub use cache::{CacheSlot, CacheStats};
pub use composition::Composition;
pub use layer::{
    AdjustmentLayer, BaseSource, ContentImage, FillLayer, FilterSource, GradientLayer, HasContent, HolderRef,
    ImageLayer, IsAdjustment, IsHolder, Layer, LayerGroup, LayerId, LayerKind, LayerProps,
    LayerStore, SmartFilter, SmartObject,
};

// Filters
pub use filter::{Filter, FilterDescriptor, FilterParams, FilterRegistry, FilterRun};

// Events, History & Workers
pub use events::{CompositionEvent, EventBus, SubscriptionId};
pub use history::{Edit, History, HistorySink};
pub use worker::{PreviewResult, PreviewWorker, WorkerStats};

// Persistence Model & Linked Content
pub use document::{Document, LayerDoc, LayerKindDoc, LoadOptions, MaskDoc, TransformDoc};
pub use linked::{search_linked_file, LinkResolution, LinkedContent, PendingLink};

// Configuration, Logging & Diagnostics
pub use config::EngineConfig;
pub use integrity::{check_integrity, Issue, IssueSeverity};
pub use logging::LogConfig;

/// Core error types
#[derive(Error, Debug)]
pub enum CoreError {
    /// The handle does not refer to a live layer
    #[error("Layer not found: {0}")]
    LayerNotFound(LayerId),

    /// The layer exists but is of a different kind than the operation needs
    #[error("Layer {id} is not a {expected}")]
    WrongLayerKind {
        /// Offending layer
        id: LayerId,
        /// Kind the operation expected
        expected: &'static str,
    },

    /// A layer of this kind cannot live inside the requested holder
    #[error("A {child} layer cannot be placed in {holder}")]
    InvalidPlacement {
        /// Kind of the layer being placed
        child: &'static str,
        /// Description of the target holder
        holder: String,
    },

    /// Child index outside the holder's child list
    #[error("Index {index} out of bounds (holder has {len} children)")]
    IndexOutOfBounds {
        /// Requested index
        index: usize,
        /// Number of children
        len: usize,
    },

    /// The move would place a layer inside its own subtree
    #[error("Moving layer {0} there would create a cycle")]
    CycleDetected(LayerId),

    /// Two layers that must share a holder do not
    #[error("Layers {0} and {1} do not share a holder")]
    DifferentHolders(LayerId, LayerId),

    /// Pass-through was requested for a layer that is not a group
    #[error("Pass-through blending is only valid on groups (layer '{0}')")]
    PassThroughNotAllowed(String),

    /// A pixel buffer could not be allocated
    #[error("Not enough memory for a {width}x{height} pixel buffer")]
    ResourceExhausted {
        /// Requested width
        width: u32,
        /// Requested height
        height: u32,
    },

    /// A filter handed back its own input buffer
    #[error("Filter '{filter}' returned its input buffer (composition '{composition}', layer '{layer}')")]
    FilterContractViolation {
        /// Filter name
        filter: String,
        /// Composition name
        composition: String,
        /// Layer name
        layer: String,
    },

    /// A filter reported a failure of its own
    #[error("Filter '{filter}' failed: {reason}")]
    FilterFailed {
        /// Filter name
        filter: String,
        /// Failure description
        reason: String,
    },

    /// No filter with this name is registered
    #[error("Unknown filter: {0}")]
    UnknownFilter(String),

    /// The linked file of a smart object could not be read
    #[error("Linked content missing: {0}")]
    MissingLinkedContent(PathBuf),

    /// No unresolved link is pending for the layer
    #[error("No pending link for layer {0}")]
    NoPendingLink(LayerId),

    /// Malformed persisted data
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// Configuration could not be parsed or written
    #[error("Config error: {0}")]
    Config(String),

    /// Image decoding or encoding failed
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::ResourceExhausted {
            width: 640,
            height: 480,
        };
        assert_eq!(
            err.to_string(),
            "Not enough memory for a 640x480 pixel buffer"
        );

        let err = CoreError::FilterContractViolation {
            filter: "Invert".to_string(),
            composition: "poster".to_string(),
            layer: "sky".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("Invert"));
        assert!(msg.contains("poster"));
        assert!(msg.contains("sky"));
    }
}
