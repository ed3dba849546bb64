//! Filters used by adjustment layers and smart filters
//!
//! A filter is a pure function from one image to a new image. Filters never
//! mutate their input, and they must hand back a freshly allocated buffer.
//! Returning the input itself breaks the smart filter caches, so the engine
//! checks for it on every run (see [`FilterRun::apply`]).

mod builtin;

pub use builtin::{Brightness, GaussianBlur, Grayscale, Invert, NoOp, Posterize, Threshold, Tint};

use crate::pixel::PixelBuffer;
use crate::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::warn;

/// Named numeric filter parameters
pub type FilterParams = BTreeMap<String, f64>;

/// Image-to-image operation
pub trait Filter: Send + Sync + fmt::Debug {
    /// Name used in logs, errors and persisted documents
    fn name(&self) -> &str;

    /// Produce a new image from `src`
    fn apply(&self, src: &PixelBuffer) -> Result<PixelBuffer>;

    /// Current parameters
    fn params(&self) -> FilterParams {
        FilterParams::new()
    }

    /// Boxed copy of this filter
    fn clone_box(&self) -> Box<dyn Filter>;

    /// Name and parameters, for persistence
    fn descriptor(&self) -> FilterDescriptor {
        FilterDescriptor {
            name: self.name().to_string(),
            params: self.params(),
        }
    }
}

impl Clone for Box<dyn Filter> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Serializable description of a filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterDescriptor {
    /// Registered filter name
    pub name: String,
    /// Parameter values
    #[serde(default)]
    pub params: FilterParams,
}

impl FilterDescriptor {
    /// Create a descriptor without parameters
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: FilterParams::new(),
        }
    }

    /// Add a parameter
    pub fn with_param(mut self, key: impl Into<String>, value: f64) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Look up a parameter, falling back to `default`
    pub fn param(&self, key: &str, default: f64) -> f64 {
        self.params.get(key).copied().unwrap_or(default)
    }
}

type Constructor = fn(&FilterDescriptor) -> Result<Box<dyn Filter>>;

/// Rebuilds filters from their descriptors
pub struct FilterRegistry {
    constructors: HashMap<String, Constructor>,
}

impl FilterRegistry {
    /// Registry without any filters
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Registry pre-populated with the built-in filters
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register(Invert::NAME, |_| Ok(Box::new(Invert)));
        registry.register(Grayscale::NAME, |_| Ok(Box::new(Grayscale)));
        registry.register(NoOp::NAME, |_| Ok(Box::new(NoOp)));
        registry.register(Brightness::NAME, |d| {
            Ok(Box::new(Brightness::new(d.param("amount", 0.0) as f32)))
        });
        registry.register(Posterize::NAME, |d| {
            Ok(Box::new(Posterize::new(d.param("levels", 4.0) as u8)))
        });
        registry.register(Threshold::NAME, |d| {
            Ok(Box::new(Threshold::new(d.param("level", 128.0) as u8)))
        });
        registry.register(Tint::NAME, |d| Ok(Box::new(Tint::from_descriptor(d))));
        registry.register(GaussianBlur::NAME, |d| {
            Ok(Box::new(GaussianBlur::new(d.param("sigma", 1.0) as f32)))
        });
        registry
    }

    /// Register (or replace) a constructor
    pub fn register(&mut self, name: &str, constructor: Constructor) {
        self.constructors.insert(name.to_string(), constructor);
    }

    /// Whether a filter name is known
    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Build a filter from its descriptor
    pub fn build(&self, descriptor: &FilterDescriptor) -> Result<Box<dyn Filter>> {
        let constructor = self
            .constructors
            .get(&descriptor.name)
            .ok_or_else(|| CoreError::UnknownFilter(descriptor.name.clone()))?;
        constructor(descriptor)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterRegistry")
            .field("filters", &self.names())
            .finish()
    }
}

/// Context of one filter invocation, used for the contract check
#[derive(Debug, Clone, Copy)]
pub struct FilterRun<'a> {
    /// Composition name, for error reports
    pub composition: &'a str,
    /// Layer name, for error reports
    pub layer: &'a str,
    /// Repeat-last-filter or unattended batch run: identity results are tolerated
    pub lenient: bool,
}

impl<'a> FilterRun<'a> {
    /// Run `filter` on `src`, enforcing the distinct-output contract
    pub fn apply(&self, filter: &dyn Filter, src: &PixelBuffer) -> Result<PixelBuffer> {
        let output = filter.apply(src)?;
        if !output.same_instance(src) {
            return Ok(output);
        }
        if self.lenient {
            warn!(
                "Filter '{}' returned its input on layer '{}' in '{}', treating it as a no-op",
                filter.name(),
                self.layer,
                self.composition
            );
            return output.deep_copy();
        }
        Err(CoreError::FilterContractViolation {
            filter: filter.name().to_string(),
            composition: self.composition.to_string(),
            layer: self.layer.to_string(),
        })
    }
}
