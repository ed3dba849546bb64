//! Engine configuration
//!
//! Loaded from TOML; every field has a default so partial files are fine.

use crate::logging::LogConfig;
use crate::pixel::DEFAULT_MAX_PIXELS;
use crate::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Settings shared by every composition of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Unattended batch mode: filters returning their input are logged and
    /// treated as no-ops instead of failing
    pub unattended: bool,
    /// Largest pixel buffer (width x height) a canvas may allocate
    pub max_buffer_pixels: u64,
    /// Threads used by the preview worker
    pub preview_threads: usize,
    /// Longest side of layer thumbnails
    pub thumbnail_size: u32,
    /// Directory depth searched when looking for moved linked files
    pub link_search_depth: usize,
    /// Logging settings
    pub log: LogConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            unattended: false,
            max_buffer_pixels: DEFAULT_MAX_PIXELS,
            preview_threads: 2,
            thumbnail_size: 64,
            link_search_depth: 4,
            log: LogConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| CoreError::Config(e.to_string()))
    }

    /// Serialize to TOML text
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| CoreError::Config(e.to_string()))
    }

    /// Load from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Load from a TOML file, or use defaults if it does not exist
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = EngineConfig::from_toml_str("unattended = true\n[log]\nlevel = \"debug\"\n")
            .unwrap();
        assert!(config.unattended);
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.thumbnail_size, 64);
        assert!(config.log.console_output);
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = EngineConfig {
            preview_threads: 8,
            ..Default::default()
        };
        let text = config.to_toml_string().unwrap();
        assert_eq!(EngineConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_invalid_toml() {
        let result = EngineConfig::from_toml_str("unattended = \"maybe\"");
        assert!(matches!(result, Err(CoreError::Config(_))));
    }
}
