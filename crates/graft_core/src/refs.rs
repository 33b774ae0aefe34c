//! Named references to target commits.

use crate::error::{GraftError, Result};
use crate::node_id::NodeId;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Manages references to commits.
///
/// References live under `root/refs/` as single-line text files holding a
/// hex-encoded NodeId. Names may contain slashes (`heads/main`). All writes
/// are atomic using temp file + rename.
pub struct Refs {
    root: PathBuf,
}

impl Refs {
    /// Creates a new Refs manager rooted at the given directory.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn ref_path(&self, name: &str) -> PathBuf {
        self.root.join("refs").join(name)
    }

    /// Reads a named reference (e.g., "heads/main").
    ///
    /// # Errors
    ///
    /// Returns `RefNotFound` if the ref doesn't exist.
    /// Returns `InvalidRef` if the content is malformed.
    pub fn read_ref(&self, name: &str) -> Result<NodeId> {
        let path = self.ref_path(name);
        if !path.is_file() {
            return Err(GraftError::RefNotFound(name.to_string()));
        }
        self.read_ref_file(&path)
    }

    /// Reads a named reference, returning `None` if it doesn't exist.
    pub fn try_read_ref(&self, name: &str) -> Result<Option<NodeId>> {
        match self.read_ref(name) {
            Ok(id) => Ok(Some(id)),
            Err(GraftError::RefNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Writes a named reference atomically.
    ///
    /// Creates parent directories as needed.
    pub fn write_ref(&self, name: &str, id: NodeId) -> Result<()> {
        let path = self.ref_path(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        self.write_ref_file(&path, id)
    }

    fn read_ref_file(&self, path: &Path) -> Result<NodeId> {
        let content = fs::read_to_string(path)?;
        let trimmed = content.trim();

        if trimmed.len() != NodeId::HEX_LEN {
            return Err(GraftError::InvalidRef {
                path: path.to_path_buf(),
                reason: format!("expected {} hex chars, got {}", NodeId::HEX_LEN, trimmed.len()),
            });
        }

        NodeId::from_hex(trimmed).map_err(|_| GraftError::InvalidRef {
            path: path.to_path_buf(),
            reason: "invalid hex string".to_string(),
        })
    }

    /// Uses temp file + fsync + rename for crash safety.
    fn write_ref_file(&self, path: &Path, id: NodeId) -> Result<()> {
        let tmp_path = path.with_extension("tmp");
        {
            let mut file = File::create(&tmp_path)?;
            writeln!(file, "{}", id.as_hex())?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, path)?;

        #[cfg(unix)]
        {
            if let Some(parent) = path.parent() {
                if let Ok(dir_file) = File::open(parent) {
                    let _ = dir_file.sync_all();
                }
            }
        }

        Ok(())
    }
}
