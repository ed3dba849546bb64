//! Project I/O - High-level API
//!
//! Saving snapshots a [`Composition`] into a [`ProjectFile`]; loading checks
//! the format version and rebuilds the composition. Relative paths of linked
//! smart objects are resolved against the project's directory unless the
//! caller picks another base.

use crate::error::{IoError, Result};
use crate::project_format::{ProjectFile, PROJECT_FILE_VERSION};
use std::path::Path;
use strata_core::{Composition, LoadOptions};
use tracing::{info, warn};

/// Saves a composition to a project file.
pub fn save_project(composition: &Composition, path: &Path) -> Result<()> {
    let mut project_file = ProjectFile::new(composition.to_document()?);
    project_file.save(path)?;
    info!("Saved '{}' to {}", composition.name(), path.display());
    Ok(())
}

/// Loads a composition from a project file.
///
/// Missing linked files do not fail the load; they show up in
/// [`Composition::pending_links`].
pub fn load_project(path: &Path, mut options: LoadOptions) -> Result<Composition> {
    let project_file = ProjectFile::load(path)?;

    if project_file.version != PROJECT_FILE_VERSION {
        return Err(IoError::VersionMismatch {
            expected: PROJECT_FILE_VERSION.to_string(),
            found: project_file.version,
        });
    }

    if options.base_dir.is_none() {
        options.base_dir = path.parent().map(Path::to_path_buf);
    }
    let composition = Composition::from_document(&project_file.document, &options)?;
    for pending in composition.pending_links() {
        warn!(
            "Project {} references missing file {}",
            path.display(),
            pending.path.display()
        );
    }
    info!(
        "Loaded '{}' ({} layers) from {}",
        composition.name(),
        composition.layer_count(),
        path.display()
    );
    Ok(composition)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use strata_core::{HolderRef, Layer};
    use tempfile::TempDir;

    fn composition() -> Composition {
        let mut comp = Composition::new("poster", 4, 4);
        comp.add_layer(HolderRef::Root, Layer::fill("bg", Rgba([10, 20, 30, 255])))
            .unwrap();
        comp
    }

    #[test]
    fn project_ron_roundtrip() {
        let original = composition();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("poster.ron");

        save_project(&original, &path).unwrap();
        let loaded = load_project(&path, LoadOptions::default()).unwrap();

        assert_eq!(
            original.to_document().unwrap(),
            loaded.to_document().unwrap()
        );
    }

    #[test]
    fn project_json_roundtrip() {
        let original = composition();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("poster.json");

        save_project(&original, &path).unwrap();
        let loaded = load_project(&path, LoadOptions::default()).unwrap();
        assert_eq!(loaded.layer_count(), 1);
    }

    #[test]
    fn test_version_mismatch() {
        let mut project_file = ProjectFile::new(composition().to_document().unwrap());
        project_file.version = "0.1.0".to_string();

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("old.ron");
        project_file.save(&path).unwrap();

        match load_project(&path, LoadOptions::default()) {
            Err(IoError::VersionMismatch { expected, found }) => {
                assert_eq!(expected, PROJECT_FILE_VERSION);
                assert_eq!(found, "0.1.0");
            }
            other => panic!("expected VersionMismatch, got {:?}", other),
        }
    }
}
