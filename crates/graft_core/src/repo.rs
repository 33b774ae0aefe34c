//! Repository handle tying the target store, metadata and configuration together.

use crate::config::Config;
use crate::error::{GraftError, Result};
use crate::mapping::MappingStore;
use crate::target::TargetRepo;
use crate::verify::{run_fsck, VerifyConfig, VerifyProgressCallback, VerifyReport};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Name of the repository directory.
pub const GRAFT_DIR: &str = ".graft";

const METADATA_FILE: &str = "metadata.redb";

/// Graft repository handle.
///
/// Layout under `<root>/.graft/`: `objects/` and `refs/` for the target
/// store, `metadata.redb` for the bridge metadata, `config.toml` and a
/// `LOCK` file while a writer is active.
pub struct GraftRepo {
    /// Directory containing `.graft`.
    root: PathBuf,
    /// Target objects and refs.
    target: TargetRepo,
    /// Loaded configuration.
    config: Config,
}

impl GraftRepo {
    /// Initializes a new repository with empty metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if `.graft` already exists or can't be created.
    ///
    /// # Examples
    ///
    /// ```
    /// use graft_core::GraftRepo;
    /// use tempfile::TempDir;
    ///
    /// let tmp = TempDir::new().unwrap();
    /// GraftRepo::init(tmp.path()).unwrap();
    /// assert!(GraftRepo::init(tmp.path()).is_err());
    /// assert!(GraftRepo::open(tmp.path()).is_ok());
    /// ```
    pub fn init(path: impl AsRef<Path>) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        let graft_dir = root.join(GRAFT_DIR);

        if graft_dir.exists() {
            return Err(GraftError::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "graft repository already exists in this directory",
            )));
        }

        fs::create_dir_all(graft_dir.join("objects"))?;
        fs::create_dir_all(graft_dir.join("refs"))?;

        let config = Config::default();
        config.save(&graft_dir)?;
        MappingStore::create(graft_dir.join(METADATA_FILE))?.close()?;
        debug!(root = %root.display(), "initialized repository");

        Self::open(root)
    }

    /// Opens an existing repository.
    ///
    /// # Errors
    ///
    /// Returns an error if `.graft` doesn't exist or the config is invalid.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        let graft_dir = root.join(GRAFT_DIR);

        if !graft_dir.is_dir() {
            return Err(GraftError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("not a graft repository: {}", root.display()),
            )));
        }

        let config = Config::load(&graft_dir)?;
        let target =
            TargetRepo::new(&graft_dir).with_compression_level(config.storage.compression_level);

        Ok(Self {
            root,
            target,
            config,
        })
    }

    /// The `.graft` directory.
    pub fn graft_dir(&self) -> PathBuf {
        self.root.join(GRAFT_DIR)
    }

    /// Path of the metadata database.
    pub fn metadata_path(&self) -> PathBuf {
        self.graft_dir().join(METADATA_FILE)
    }

    /// Target objects and refs.
    pub fn target(&self) -> &TargetRepo {
        &self.target
    }

    /// Mutable access to the target, for importers.
    pub fn target_mut(&mut self) -> &mut TargetRepo {
        &mut self.target
    }

    /// Loaded configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Checks bridge consistency and commits repairs.
    ///
    /// Flags in `config` are combined with the configured defaults. Holds the
    /// repository lock for the whole run.
    pub fn fsck(&mut self, config: &VerifyConfig) -> Result<VerifyReport> {
        self.fsck_inner(config, None)
    }

    /// Same as [`GraftRepo::fsck`], with progress reporting.
    pub fn fsck_with_progress(
        &mut self,
        config: &VerifyConfig,
        progress: VerifyProgressCallback<'_>,
    ) -> Result<VerifyReport> {
        self.fsck_inner(config, Some(progress))
    }

    fn fsck_inner(
        &mut self,
        config: &VerifyConfig,
        progress: Option<VerifyProgressCallback<'_>>,
    ) -> Result<VerifyReport> {
        let _lock = self.acquire_lock()?;

        let mut config = config.clone();
        config.check_manifests |= self.config.fsck.check_manifests;
        config.check_files |= self.config.fsck.check_files;

        let metadata_path = self.metadata_path();
        run_fsck(&metadata_path, &mut self.target, &config, progress)
    }

    /// Acquires the exclusive repository lock.
    ///
    /// The lock file holds the PID of its owner. A lock left behind by a dead
    /// process is removed.
    fn acquire_lock(&self) -> Result<LockGuard> {
        let lock_path = self.graft_dir().join("LOCK");
        acquire_lock_with_retry(&lock_path, 0)
    }
}

fn acquire_lock_with_retry(lock_path: &Path, retry_count: u32) -> Result<LockGuard> {
    // A stale lock is cleaned up at most a couple of times before giving up
    if retry_count > 2 {
        return Err(GraftError::RepositoryLocked);
    }

    // Exclusive create fails if another process already holds the lock
    match OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(lock_path)
    {
        Ok(mut file) => {
            // Record our PID so a later run can tell whether we are still alive
            writeln!(file, "{}", std::process::id())?;
            file.flush()?;

            // Advisory lock on top of the exclusive create
            file.try_lock_exclusive()
                .map_err(|_| GraftError::RepositoryLocked)?;

            Ok(LockGuard {
                file: Some(file),
                path: lock_path.to_path_buf(),
            })
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            // Someone holds the lock, or held it and died
            handle_existing_lock(lock_path, retry_count)
        }
        Err(e) => Err(GraftError::Io(e)),
    }
}

/// Decides what to do about a LOCK file that is already present.
fn handle_existing_lock(lock_path: &Path, retry_count: u32) -> Result<LockGuard> {
    match fs::read_to_string(lock_path) {
        Ok(content) => {
            if let Ok(pid) = content.trim().parse::<u32>() {
                if is_process_alive(pid) {
                    // Owner is running, the lock is legitimate
                    return Err(GraftError::LockHeld { pid });
                }

                // Owner is gone, so the lock is stale
                warn!(pid, "removing stale lock left by a dead process");
                if let Err(e) = fs::remove_file(lock_path) {
                    // NotFound means another process cleaned it up first
                    if e.kind() != std::io::ErrorKind::NotFound {
                        return Err(GraftError::Io(e));
                    }
                }
                return acquire_lock_with_retry(lock_path, retry_count + 1);
            }

            // Half-written or garbage PID; treat the lock as abandoned
            warn!("lock file has invalid content, removing it");
            let _ = fs::remove_file(lock_path);
            acquire_lock_with_retry(lock_path, retry_count + 1)
        }
        // Removed between our open and read.
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            acquire_lock_with_retry(lock_path, retry_count + 1)
        }
        // Unreadable lock file, assume it is held
        Err(_) => Err(GraftError::RepositoryLocked),
    }
}

/// Exclusive lock on the repository's LOCK file, released on drop.
struct LockGuard {
    file: Option<File>,
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            drop(file);
        }
        let _ = fs::remove_file(&self.path);
    }
}

/// Zombies keep a /proc entry, so look at `stat` instead.
#[cfg(target_os = "linux")]
fn is_process_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{}/stat", pid)).exists()
}

#[cfg(all(unix, not(target_os = "linux")))]
fn is_process_alive(pid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(true)
}

/// Stale locks are never cleaned up here.
#[cfg(not(unix))]
fn is_process_alive(_pid: u32) -> bool {
    true
}
