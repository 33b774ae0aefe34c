//! Loose object storage with integrity verification.

use crate::error::{GraftError, Result};
use crate::node_id::NodeId;
use crate::objects::{object_hash, ObjectKind};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Default zstd compression level for object storage.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Loose object storage.
///
/// Each object is stored as a zstd-compressed file holding
/// `"<kind> <len>\0" ‖ data`, at `root/<shard>/<hex id>`. The id is the
/// SHA-1 of the uncompressed bytes and is verified on every read.
///
/// # Examples
///
/// ```
/// use graft_core::{ObjectKind, ObjectStore};
/// use tempfile::TempDir;
///
/// let tmp = TempDir::new().unwrap();
/// let store = ObjectStore::new(tmp.path().join("objects"));
///
/// let id = store.put(ObjectKind::Blob, b"hello\n").unwrap();
/// assert_eq!(id.as_hex(), "ce013625030ba8dba906f756967f9e9ca394464a");
/// assert_eq!(store.get(ObjectKind::Blob, id).unwrap(), b"hello\n");
/// ```
pub struct ObjectStore {
    root: PathBuf,
    compression_level: i32,
}

impl ObjectStore {
    /// Creates a new ObjectStore at the given root directory.
    ///
    /// The directory is created on first write.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }

    /// Sets the zstd level used for new objects.
    pub fn with_compression_level(mut self, level: i32) -> Self {
        self.compression_level = level;
        self
    }

    /// Stores an object and returns its id.
    ///
    /// Storing content that already exists is a no-op.
    pub fn put(&self, kind: ObjectKind, data: &[u8]) -> Result<NodeId> {
        let id = object_hash(kind, data);
        if self.exists(id) {
            return Ok(id);
        }

        let mut raw = Vec::with_capacity(data.len() + 32);
        raw.extend_from_slice(format!("{} {}\0", kind.as_str(), data.len()).as_bytes());
        raw.extend_from_slice(data);
        self.write_raw(id, &raw)?;
        Ok(id)
    }

    /// Reads an object of the given kind.
    ///
    /// # Errors
    ///
    /// Returns `ObjectNotFound` if the object doesn't exist, and
    /// `CorruptedObject` if it has another kind or fails verification.
    pub fn get(&self, kind: ObjectKind, id: NodeId) -> Result<Vec<u8>> {
        let (found, data) = self.get_any(id)?;
        if found != kind {
            return Err(GraftError::CorruptedObject {
                path: self.object_path(id),
                reason: format!("expected {}, got {}", kind, found),
            });
        }
        Ok(data)
    }

    /// Reads an object of any kind.
    pub fn get_any(&self, id: NodeId) -> Result<(ObjectKind, Vec<u8>)> {
        let path = self.object_path(id);
        if !path.exists() {
            return Err(GraftError::ObjectNotFound(id.as_hex()));
        }

        let compressed = fs::read(&path)?;
        let raw = zstd::decode_all(compressed.as_slice())
            .map_err(|e| GraftError::Compression(e.to_string()))?;

        let corrupted = |reason: String| GraftError::CorruptedObject {
            path: path.clone(),
            reason,
        };

        let nul = raw
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| corrupted("missing header".to_string()))?;
        let header = std::str::from_utf8(&raw[..nul])
            .map_err(|_| corrupted("header is not UTF-8".to_string()))?;
        let (kind_str, len_str) = header
            .split_once(' ')
            .ok_or_else(|| corrupted(format!("invalid header {:?}", header)))?;
        let kind = ObjectKind::parse(kind_str)
            .ok_or_else(|| corrupted(format!("unknown kind: {}", kind_str)))?;
        let len: usize = len_str
            .parse()
            .map_err(|_| corrupted(format!("invalid length: {}", len_str)))?;

        let data = &raw[nul + 1..];
        if data.len() != len {
            return Err(corrupted(format!(
                "length mismatch: header says {}, got {}",
                len,
                data.len()
            )));
        }

        let actual = object_hash(kind, data);
        if actual != id {
            return Err(corrupted(format!("hash mismatch: content hashes to {}", actual)));
        }

        Ok((kind, data.to_vec()))
    }

    /// Checks if an object exists in the store.
    pub fn exists(&self, id: NodeId) -> bool {
        self.object_path(id).exists()
    }

    /// Computes the filesystem path for an object.
    fn object_path(&self, id: NodeId) -> PathBuf {
        self.root.join(id.shard()).join(id.as_hex())
    }

    /// Writes compressed bytes to disk atomically.
    fn write_raw(&self, id: NodeId, raw: &[u8]) -> Result<()> {
        let path = self.object_path(id);
        let dir = self.root.join(id.shard());

        fs::create_dir_all(&dir)?;

        let compressed = zstd::encode_all(raw, self.compression_level)
            .map_err(|e| GraftError::Compression(e.to_string()))?;

        // Atomic write: temp file + fsync + rename
        let tmp_path = path.with_extension("tmp");
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&compressed)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &path)?;

        #[cfg(unix)]
        {
            if let Ok(dir_file) = File::open(&dir) {
                let _ = dir_file.sync_all();
            }
        }

        Ok(())
    }
}
