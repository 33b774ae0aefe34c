//! Graft Core Library
//!
//! Keeps a bridge between two content-addressed version control graphs
//! honest:
//! - Source (changeset, manifest, file) and target (commit, tree, blob) object models
//! - A persistent source to target mapping with staged, atomic updates
//! - A consistency checker that reports corruption and repairs stale bookkeeping
//! - A deterministic line-based binary delta codec
//!
//! # Quick Start
//!
//! ```
//! use graft_core::{GraftRepo, VerifyConfig, CheckStatus};
//! use tempfile::TempDir;
//!
//! let tmp = TempDir::new().unwrap();
//! let mut repo = GraftRepo::init(tmp.path()).unwrap();
//!
//! let report = repo.fsck(&VerifyConfig::default()).unwrap();
//! assert_eq!(report.status(), CheckStatus::Clean);
//! assert_eq!(report.status().exit_code(), 0);
//! ```
//!
//! # Features
//!
//! ## Hash Spaces
//!
//! Target objects hash their kind and length along with the content. Source
//! nodes hash their sorted parents along with the text:
//!
//! ```
//! use graft_core::{object_hash, source_hash, ObjectKind, EMPTY_TREE, HG_EMPTY_FILE};
//!
//! assert_eq!(object_hash(ObjectKind::Tree, b""), EMPTY_TREE);
//! assert_eq!(source_hash(&[], b""), HG_EMPTY_FILE);
//! ```
//!
//! ## Deltas
//!
//! ```
//! use graft_core::delta;
//!
//! let old = b"a\nb\nc\n";
//! let new = b"a\nB\nc\nd\n";
//! let patch = delta::encode(old, new).unwrap();
//! assert_eq!(delta::apply(old, &patch).unwrap(), new);
//! assert!(delta::encode(old, old).unwrap().is_empty());
//! ```

mod access;
mod config;
mod dag;
pub mod delta;
mod error;
mod manifest;
mod mapping;
mod node_id;
mod object_store;
mod objects;
mod refs;
mod repo;
mod revision;
mod target;
mod verify;

pub use access::{CommitEntry, CommitQuery, CommitStream, ObjectAccess, WalkOrder};
pub use config::{Config, FsckConfig, StorageConfig};
pub use dag::Dag;
pub use error::{GraftError, Result};
pub use manifest::{
    manifest_changes, manifest_git_tree, read_manifest, FileAttr, FileRecord, Manifest,
    ManifestEntry, GIT_TREE_ENTRY,
};
pub use mapping::{
    MappingKind, MappingStore, MappingTarget, METADATA_VERSION, MIN_UPGRADABLE_VERSION,
};
pub use node_id::NodeId;
pub use object_store::{ObjectStore, DEFAULT_COMPRESSION_LEVEL};
pub use objects::{
    encode_tree, object_hash, parse_tree, EntryMode, ObjectKind, RawCommit, TreeEntry, EMPTY_TREE,
};
pub use refs::Refs;
pub use repo::{GraftRepo, GRAFT_DIR};
pub use revision::{
    changeset_text, copy_metadata, encode_extra, file_text, source_hash, split_file_metadata,
    AuthorInfo, ChangesetData, DEFAULT_BRANCH, HG_EMPTY_FILE, METADATA_MARKER,
};
pub use target::TargetRepo;
pub use verify::{
    run_fsck, upgrade_files_metadata, verify, CheckStatus, Finding, Fix, VerifyConfig,
    VerifyProgressCallback, VerifyReport,
};
