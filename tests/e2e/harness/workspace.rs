use anyhow::{Context, Result};
use graft_core::{Config, GraftRepo, MappingStore, GRAFT_DIR};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Manages isolated test environments with tempfile
pub struct TestWorkspace {
    dir: TempDir,
}

impl TestWorkspace {
    /// Create an empty workspace
    pub fn empty() -> Result<Self> {
        let dir = TempDir::new().context("Failed to create temp directory")?;
        Ok(Self { dir })
    }

    /// Get workspace path
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Initialize graft repository in workspace
    pub fn init_graft(&self) -> Result<GraftRepo> {
        Ok(GraftRepo::init(self.path())?)
    }

    /// Open existing graft repository
    pub fn open_graft(&self) -> Result<GraftRepo> {
        Ok(GraftRepo::open(self.path())?)
    }

    /// Write the repository configuration
    pub fn write_config(&self, config: &Config) -> Result<()> {
        config
            .save(&self.path().join(GRAFT_DIR))
            .context("Failed to write config")
    }

    /// Replace the metadata with an empty store stamped with `version`
    pub fn recreate_metadata(&self, repo: &GraftRepo, version: u32) -> Result<MappingStore> {
        MappingStore::create_at_version(repo.metadata_path(), version)
            .with_context(|| format!("Failed to create metadata at version {}", version))
    }

    /// Path of a file under the repository directory
    pub fn graft_file(&self, name: &str) -> PathBuf {
        self.path().join(GRAFT_DIR).join(name)
    }
}
