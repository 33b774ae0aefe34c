//! Repository configuration.

use crate::error::{GraftError, Result};
use crate::object_store::DEFAULT_COMPRESSION_LEVEL;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Configuration stored in `.graft/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    /// Storage-related configuration.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Defaults for `fsck`.
    #[serde(default)]
    pub fsck: FsckConfig,
}

impl Config {
    /// Load configuration from a file.
    ///
    /// A missing file yields the defaults.
    pub fn load(graft_root: &Path) -> Result<Self> {
        let path = graft_root.join("config.toml");
        if path.exists() {
            let content = fs::read_to_string(&path)
                .map_err(|e| GraftError::ConfigError(format!("failed to read config: {}", e)))?;
            toml::from_str(&content)
                .map_err(|e| GraftError::ConfigError(format!("failed to parse config: {}", e)))
        } else {
            Ok(Config::default())
        }
    }

    /// Save configuration to a file.
    pub fn save(&self, graft_root: &Path) -> Result<()> {
        let path = graft_root.join("config.toml");
        let content = toml::to_string_pretty(self)
            .map_err(|e| GraftError::ConfigError(format!("failed to serialize config: {}", e)))?;
        fs::write(&path, content)
            .map_err(|e| GraftError::ConfigError(format!("failed to write config: {}", e)))?;
        Ok(())
    }
}

/// Storage-related configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StorageConfig {
    /// Compression level for zstd (1-22, default: 3).
    pub compression_level: i32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

/// Checks `fsck` runs even without the matching flags.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct FsckConfig {
    /// Always verify manifest hashes (default: false).
    pub check_manifests: bool,

    /// Always verify file hashes (default: false).
    pub check_files: bool,
}
