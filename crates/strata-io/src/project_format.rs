//! Defines the on-disk project file format for Strata.
//!
//! A project file wraps a [`Document`] with a format version and timestamps
//! and is serialized as RON (`.ron`, `.strata`) or JSON (`.json`).

use crate::error::{IoError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use strata_core::Document;
use tracing::debug;

/// The current version of the project file format.
///
/// Bump it whenever `ProjectFile` or the document model changes in a way
/// older readers cannot handle.
pub const PROJECT_FILE_VERSION: &str = "1.0.0";

/// Maximum allowed project file size (50 MB).
///
/// Pixel data is embedded in the document, but anything beyond this is
/// refused before it is read into memory.
pub const MAX_PROJECT_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// On-disk formats, picked by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Ron,
    Json,
}

fn format_of(path: &Path) -> Result<Format> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("ron");
    match extension {
        "json" => Ok(Format::Json),
        "ron" | "strata" => Ok(Format::Ron),
        other => Err(IoError::UnsupportedFormat(other.to_string())),
    }
}

/// Top-level structure of a saved Strata project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectFile {
    /// The version of the project file format.
    pub version: String,
    /// Metadata about the project.
    pub metadata: ProjectMetadata,
    /// The layer tree.
    pub document: Document,
}

impl ProjectFile {
    /// Wraps a document, setting creation and modification times to now.
    pub fn new(document: Document) -> Self {
        let now = Utc::now();
        Self {
            version: PROJECT_FILE_VERSION.to_string(),
            metadata: ProjectMetadata {
                created_at: now,
                modified_at: now,
            },
            document,
        }
    }

    /// Loads a `ProjectFile` from the given path.
    pub fn load(path: &Path) -> Result<Self> {
        Self::load_with_limit(path, MAX_PROJECT_FILE_SIZE)
    }

    /// Loads a `ProjectFile` with a specific file size limit.
    pub(crate) fn load_with_limit(path: &Path, limit: u64) -> Result<Self> {
        let size = fs::metadata(path)?.len();
        if size > limit {
            return Err(IoError::FileTooLarge { size, limit });
        }
        let format = format_of(path)?;

        let content = fs::read_to_string(path)?;
        let file = match format {
            Format::Json => serde_json::from_str(&content)?,
            Format::Ron => ron::from_str(&content)?,
        };
        debug!("Read project file {} ({} bytes)", path.display(), size);
        Ok(file)
    }

    /// Saves the `ProjectFile` to the given path, updating `modified_at`.
    pub fn save(&mut self, path: &Path) -> Result<()> {
        let format = format_of(path)?;
        self.metadata.modified_at = Utc::now();

        match format {
            Format::Json => {
                let file = File::create(path)?;
                serde_json::to_writer_pretty(file, self)?;
            }
            Format::Ron => {
                let config = ron::ser::PrettyConfig::default();
                let s = ron::ser::to_string_pretty(self, config)?;
                let mut file = File::create(path)?;
                file.write_all(s.as_bytes())?;
            }
        }
        Ok(())
    }
}

/// Metadata associated with a project file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectMetadata {
    /// Timestamp of when the project was first created.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the last modification.
    pub modified_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn document() -> Document {
        Document::empty("poster", 32, 16)
    }

    #[test]
    fn project_file_ron_roundtrip() {
        let mut project_file = ProjectFile::new(document());
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("poster.strata");

        project_file.save(&path).unwrap();
        let loaded = ProjectFile::load(&path).unwrap();

        assert_eq!(project_file.version, loaded.version);
        assert_eq!(project_file.document, loaded.document);
        assert_eq!(
            project_file.metadata.created_at,
            loaded.metadata.created_at
        );
    }

    #[test]
    fn project_file_json_roundtrip() {
        let mut project_file = ProjectFile::new(document());
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("poster.json");

        project_file.save(&path).unwrap();
        let loaded = ProjectFile::load(&path).unwrap();
        assert_eq!(project_file, loaded);
    }

    #[test]
    fn test_modified_at_updates_on_save() {
        let mut project_file = ProjectFile::new(document());
        let first_modified_at = project_file.metadata.modified_at;

        std::thread::sleep(std::time::Duration::from_millis(10));

        let dir = TempDir::new().unwrap();
        project_file.save(&dir.path().join("p.ron")).unwrap();
        assert!(project_file.metadata.modified_at > first_modified_at);
    }

    #[test]
    fn test_load_file_too_large() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("big.ron");
        fs::write(&path, vec![b' '; 1024]).unwrap();

        let result = ProjectFile::load_with_limit(&path, 500);
        match result {
            Err(IoError::FileTooLarge { size, limit }) => {
                assert_eq!(size, 1024);
                assert_eq!(limit, 500);
            }
            other => panic!("expected FileTooLarge, got {:?}", other),
        }
    }

    #[test]
    fn test_unsupported_extension() {
        let dir = TempDir::new().unwrap();
        let mut project_file = ProjectFile::new(document());
        let result = project_file.save(&dir.path().join("poster.txt"));
        assert!(matches!(result, Err(IoError::UnsupportedFormat(ext)) if ext == "txt"));
    }
}
