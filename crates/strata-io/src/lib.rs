//! Strata I/O - Project Files and Image Exchange
//!
//! This crate moves compositions between memory and disk:
//! - Project files (RON or JSON) wrapping a [`strata_core::Document`]
//! - PNG export of the flattened image or single layers
//! - Importing image files as new compositions

#![warn(missing_docs)]

pub mod error;
pub mod export;
pub mod project;
pub mod project_format;

pub use error::{IoError, Result};
pub use export::{export_layer_png, export_png, import_image};
pub use project::{load_project, save_project};
pub use project_format::{ProjectFile, ProjectMetadata, MAX_PROJECT_FILE_SIZE, PROJECT_FILE_VERSION};
