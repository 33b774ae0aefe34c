//! Error types for graft_core operations.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for graft_core operations.
#[derive(Error, Debug)]
pub enum GraftError {
    /// Object with the given ID was not found in the store.
    #[error("object not found: {0}")]
    ObjectNotFound(String),

    /// The object file is corrupted or has invalid format.
    #[error("corrupted object at {}: {}", path.display(), reason)]
    CorruptedObject {
        /// Path to the corrupted object
        path: PathBuf,
        /// Description of the corruption
        reason: String,
    },

    /// Object content could not be parsed (tree, commit or signature).
    #[error("malformed {kind} {id}: {reason}")]
    MalformedObject {
        /// Object kind being parsed
        kind: &'static str,
        /// Hex id of the object, or "-" when unknown
        id: String,
        /// What went wrong
        reason: String,
    },

    /// A delta instruction stream is truncated or does not fit its base.
    #[error("malformed delta: {0}")]
    MalformedDelta(String),

    /// An input is too large for the 32-bit offsets of the delta format.
    #[error("delta input too large: {0} bytes")]
    DeltaTooLarge(usize),

    /// Invalid hex string for NodeId parsing.
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    /// Serialization error during typed value operations.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error during typed value operations.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Compression or decompression failed.
    #[error("compression error: {0}")]
    Compression(String),

    /// Reference not found.
    #[error("ref not found: {0}")]
    RefNotFound(String),

    /// Invalid ref file content or format.
    #[error("invalid ref at {}: {}", path.display(), reason)]
    InvalidRef {
        /// Path to the invalid ref file
        path: PathBuf,
        /// Description of what's invalid
        reason: String,
    },

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error (loading, parsing, invalid values).
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// The metadata database could not be opened or read.
    #[error("metadata database error: {0}")]
    Database(String),

    /// Metadata uses an older format that can be migrated in place.
    #[error("metadata format {found} needs upgrade to {expected}")]
    UpgradeRequired {
        /// Version found on disk
        found: u32,
        /// Version this build writes
        expected: u32,
    },

    /// Metadata uses a format too old to migrate.
    #[error(
        "metadata format {} is no longer supported",
        found.map(|v| v.to_string()).unwrap_or_else(|| "unknown".to_string())
    )]
    LegacyFormatUnsupported {
        /// Version found on disk, if any was recorded
        found: Option<u32>,
    },

    /// A node was inserted into a graph in a way that contradicts an earlier insert.
    #[error("graph conflict at {node}: {reason}")]
    GraphConflict {
        /// Hex id of the node
        node: String,
        /// Description of the conflict
        reason: String,
    },

    /// Staged metadata changes could not be committed. Nothing was applied.
    #[error("metadata store corrupt: {0}")]
    StoreCorrupt(String),

    /// A revision given on the command line is neither a commit nor a changeset.
    #[error("unknown commit or changeset: {0}")]
    UnknownRevision(String),

    /// The requested combination of options cannot be honored.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// Repository is locked by another process.
    #[error("repository locked by another process")]
    RepositoryLocked,

    /// Repository lock is held by a live process.
    #[error("repository lock held by another process (PID: {pid})")]
    LockHeld {
        /// Process ID holding the lock
        pid: u32,
    },
}

impl GraftError {
    /// Returns a user-friendly recovery suggestion for the error, if available.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            Self::CorruptedObject { .. } | Self::ObjectNotFound(_) => {
                Some("The object store might be damaged. Run 'graft fsck --files' to check.")
            }
            Self::UpgradeRequired { .. } => {
                Some(
                    "Run 'graft fsck' without revisions, --manifests or --files to upgrade \
                     the metadata.",
                )
            }
            Self::LegacyFormatUnsupported { .. } | Self::StoreCorrupt(_) => {
                Some("Re-create the bridge from scratch. Local branches are not affected.")
            }
            Self::GraphConflict { .. } => {
                Some(
                    "The metadata describes the same node twice. Re-create the bridge \
                     from scratch.",
                )
            }
            Self::RepositoryLocked | Self::LockHeld { .. } => {
                Some(
                    "Wait for the other process to finish, or manually remove .graft/LOCK if the \
                     process is dead.",
                )
            }
            Self::UnknownRevision(_) => {
                Some("Pass a full 40-character commit or changeset id, or a ref name.")
            }
            _ => None,
        }
    }
}

/// Convenience Result type for graft_core operations.
pub type Result<T> = std::result::Result<T, GraftError>;
