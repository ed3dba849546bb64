//! Error types for project and image I/O.

use strata_core::CoreError;

/// Result type alias for I/O operations.
pub type Result<T> = std::result::Result<T, IoError>;

/// Error type for project and image I/O.
#[derive(Debug, thiserror::Error)]
pub enum IoError {
    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// RON text could not be parsed
    #[error("RON parse error: {0}")]
    RonParse(#[from] ron::error::SpannedError),

    /// RON text could not be written
    #[error("RON error: {0}")]
    Ron(#[from] ron::Error),

    /// JSON could not be parsed or written
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The document could not be turned into a composition, or back
    #[error("Document error: {0}")]
    Core(#[from] CoreError),

    /// Image decoding or encoding failed
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// The file exceeds the load limit
    #[error("File too large: {size} bytes (limit {limit} bytes)")]
    FileTooLarge {
        /// Size of the file
        size: u64,
        /// Largest accepted size
        limit: u64,
    },

    /// The file extension maps to no known format
    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    /// The project was written by an incompatible format version
    #[error("Project version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Version this build reads
        expected: String,
        /// Version stored in the file
        found: String,
    },
}
