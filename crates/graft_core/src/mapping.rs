//! Persistent bridge metadata: source to target mapping, notes and heads.
//!
//! Everything lives in one redb database. Mutations are staged in memory,
//! are visible to reads through the same handle, and reach disk in a single
//! write transaction on [`MappingStore::close`].

use crate::error::{GraftError, Result};
use crate::node_id::NodeId;
use crate::revision::ChangesetData;
use redb::{Database, ReadOnlyTable, ReadTransaction, ReadableTable, TableDefinition, TableError};
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Format version written by this build.
pub const METADATA_VERSION: u32 = 3;

/// Oldest format that can be upgraded in place.
///
/// Version 2 keeps file copy metadata inline in file blobs.
pub const MIN_UPGRADABLE_VERSION: u32 = 2;

const METADATA_TABLE: TableDefinition<&str, u32> = TableDefinition::new("metadata");
const MAPPING_TABLE: TableDefinition<&[u8; 20], &[u8]> = TableDefinition::new("mapping");
const NOTES_TABLE: TableDefinition<&[u8; 20], &[u8]> = TableDefinition::new("notes");
const FILES_META_TABLE: TableDefinition<&[u8; 20], &[u8]> = TableDefinition::new("files_meta");
const BRANCH_HEADS_TABLE: TableDefinition<&[u8; 20], &str> = TableDefinition::new("branch_heads");
const MANIFEST_HEADS_TABLE: TableDefinition<&[u8; 20], ()> = TableDefinition::new("manifest_heads");

/// What a source id maps to.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
pub enum MappingKind {
    /// Changesets and manifests map to commits.
    Commit = 1,
    /// File revisions map to blobs.
    Blob = 2,
}

impl fmt::Display for MappingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Commit => "commit",
            Self::Blob => "blob",
        })
    }
}

/// Value of a mapping entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingTarget {
    /// Target object id.
    pub id: NodeId,
    /// Target object kind.
    pub kind: MappingKind,
}

#[derive(Default)]
struct Pending {
    /// `None` removes the entry.
    mapping: HashMap<NodeId, Option<MappingTarget>>,
    notes: HashMap<NodeId, Option<ChangesetData>>,
    files_meta: HashMap<NodeId, Option<Vec<u8>>>,
    branch_heads: HashMap<NodeId, Option<String>>,
    manifest_heads: Option<BTreeSet<NodeId>>,
}

impl Pending {
    fn len(&self) -> usize {
        self.mapping.len()
            + self.notes.len()
            + self.files_meta.len()
            + self.branch_heads.len()
            + usize::from(self.manifest_heads.is_some())
    }
}

fn db_err<E: fmt::Display>(context: &'static str) -> impl FnOnce(E) -> GraftError {
    move |e| GraftError::Database(format!("{}: {}", context, e))
}

fn commit_err<E: fmt::Display>(context: &'static str) -> impl FnOnce(E) -> GraftError {
    move |e| GraftError::StoreCorrupt(format!("{}: {}", context, e))
}

fn open_read<K: redb::Key + 'static, V: redb::Value + 'static>(
    txn: &ReadTransaction,
    table: TableDefinition<'_, K, V>,
) -> Result<Option<ReadOnlyTable<K, V>>> {
    match txn.open_table(table) {
        Ok(t) => Ok(Some(t)),
        Err(TableError::TableDoesNotExist(_)) => Ok(None),
        Err(e) => Err(GraftError::Database(format!("failed to open table: {}", e))),
    }
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    postcard::from_bytes(bytes).map_err(|e| GraftError::Deserialization(e.to_string()))
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    postcard::to_allocvec(value).map_err(|e| GraftError::Serialization(e.to_string()))
}

/// Encodes a staged value inside `close`, where every failure means nothing was committed.
fn encode_staged<T: Serialize>(value: &T, context: &'static str) -> Result<Vec<u8>> {
    encode(value).map_err(commit_err(context))
}

/// Bridge metadata store.
///
/// # Examples
///
/// ```
/// use graft_core::{MappingKind, MappingStore, NodeId};
/// use tempfile::TempDir;
///
/// let tmp = TempDir::new().unwrap();
/// let path = tmp.path().join("metadata.redb");
///
/// let mut store = MappingStore::create(&path).unwrap();
/// let source = NodeId::from_bytes([1; 20]);
/// let target = NodeId::from_bytes([2; 20]);
/// store.set_mapping(source, target, MappingKind::Commit);
/// store.close().unwrap();
///
/// let store = MappingStore::open(&path).unwrap();
/// assert_eq!(store.lookup(source).unwrap().unwrap().id, target);
/// ```
pub struct MappingStore {
    db: Database,
    path: PathBuf,
    pending: Pending,
    /// Version to stamp on close, when upgrading.
    stamp_version: bool,
}

impl MappingStore {
    /// Creates a new, empty store at the current format version.
    ///
    /// Overwrites any existing database at the path.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Self::create_at_version(path, METADATA_VERSION)
    }

    /// Creates a new, empty store stamped with an arbitrary format version.
    ///
    /// The returned handle skips version checks. Used to produce stores in
    /// older formats for migration tests.
    pub fn create_at_version(path: impl AsRef<Path>, version: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if path.exists() {
            std::fs::remove_file(&path)?;
        }

        let db = Database::create(&path).map_err(db_err("failed to create metadata"))?;
        let write_txn = db.begin_write().map_err(db_err("failed to begin write transaction"))?;
        {
            let mut meta = write_txn
                .open_table(METADATA_TABLE)
                .map_err(db_err("failed to open metadata table"))?;
            meta.insert("version", version)
                .map_err(db_err("failed to write version"))?;
            write_txn.open_table(MAPPING_TABLE).map_err(db_err("failed to create mapping table"))?;
            write_txn.open_table(NOTES_TABLE).map_err(db_err("failed to create notes table"))?;
            write_txn
                .open_table(FILES_META_TABLE)
                .map_err(db_err("failed to create files_meta table"))?;
            write_txn
                .open_table(BRANCH_HEADS_TABLE)
                .map_err(db_err("failed to create branch_heads table"))?;
            write_txn
                .open_table(MANIFEST_HEADS_TABLE)
                .map_err(db_err("failed to create manifest_heads table"))?;
        }
        write_txn.commit().map_err(db_err("failed to commit new metadata"))?;

        debug!(path = %path.display(), version, "created metadata store");
        Ok(Self {
            db,
            path,
            pending: Pending::default(),
            stamp_version: false,
        })
    }

    /// Opens a store at the current format version.
    ///
    /// # Errors
    ///
    /// `UpgradeRequired` for an older but upgradable format, and
    /// `LegacyFormatUnsupported` for anything older.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let (db, path, version) = Self::open_db(path)?;
        match version {
            Some(METADATA_VERSION) => Ok(Self {
                db,
                path,
                pending: Pending::default(),
                stamp_version: false,
            }),
            Some(v) if (MIN_UPGRADABLE_VERSION..METADATA_VERSION).contains(&v) => {
                Err(GraftError::UpgradeRequired {
                    found: v,
                    expected: METADATA_VERSION,
                })
            }
            other => Err(Self::unsupported(other)),
        }
    }

    /// Opens a store at the current or an upgradable format version.
    ///
    /// A successful `close` stamps the current version.
    pub fn open_for_upgrade(path: impl AsRef<Path>) -> Result<Self> {
        let (db, path, version) = Self::open_db(path)?;
        match version {
            Some(v) if (MIN_UPGRADABLE_VERSION..=METADATA_VERSION).contains(&v) => Ok(Self {
                db,
                path,
                pending: Pending::default(),
                stamp_version: v != METADATA_VERSION,
            }),
            other => Err(Self::unsupported(other)),
        }
    }

    fn unsupported(version: Option<u32>) -> GraftError {
        match version {
            Some(v) if v > METADATA_VERSION => GraftError::Database(format!(
                "metadata format {} is newer than supported {}",
                v, METADATA_VERSION
            )),
            found => GraftError::LegacyFormatUnsupported { found },
        }
    }

    fn open_db(path: impl AsRef<Path>) -> Result<(Database, PathBuf, Option<u32>)> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(GraftError::Database(format!(
                "no metadata at {}",
                path.display()
            )));
        }

        let db = Database::open(&path).map_err(db_err("failed to open metadata"))?;
        let version = {
            let read_txn = db.begin_read().map_err(db_err("failed to begin read transaction"))?;
            match open_read(&read_txn, METADATA_TABLE)? {
                Some(table) => table
                    .get("version")
                    .map_err(db_err("failed to read version"))?
                    .map(|v| v.value()),
                None => None,
            }
        };
        Ok((db, path, version))
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn begin_read(&self) -> Result<ReadTransaction> {
        self.db
            .begin_read()
            .map_err(db_err("failed to begin read transaction"))
    }

    fn get_bytes(
        &self,
        table: TableDefinition<'_, &[u8; 20], &[u8]>,
        id: NodeId,
    ) -> Result<Option<Vec<u8>>> {
        let read_txn = self.begin_read()?;
        let Some(table) = open_read(&read_txn, table)? else {
            return Ok(None);
        };
        let value = table
            .get(id.as_bytes())
            .map_err(db_err("failed to read entry"))?;
        Ok(value.map(|v| v.value().to_vec()))
    }

    fn all_bytes(
        &self,
        table: TableDefinition<'_, &[u8; 20], &[u8]>,
    ) -> Result<BTreeMap<NodeId, Vec<u8>>> {
        let read_txn = self.begin_read()?;
        let mut out = BTreeMap::new();
        let Some(table) = open_read(&read_txn, table)? else {
            return Ok(out);
        };
        for entry in table.iter().map_err(db_err("failed to iterate table"))? {
            let (key, value) = entry.map_err(db_err("failed to read entry"))?;
            out.insert(NodeId::from_bytes(*key.value()), value.value().to_vec());
        }
        Ok(out)
    }

    /// Looks up the target of a source id.
    pub fn lookup(&self, source: NodeId) -> Result<Option<MappingTarget>> {
        if let Some(staged) = self.pending.mapping.get(&source) {
            return Ok(*staged);
        }
        self.get_bytes(MAPPING_TABLE, source)?
            .map(|b| decode(&b))
            .transpose()
    }

    /// Returns the changeset metadata attached to a target commit.
    pub fn resolve_changeset(&self, commit: NodeId) -> Result<Option<ChangesetData>> {
        if let Some(staged) = self.pending.notes.get(&commit) {
            return Ok(staged.clone());
        }
        self.get_bytes(NOTES_TABLE, commit)?
            .map(|b| decode(&b))
            .transpose()
    }

    /// Returns copy metadata of a file revision.
    pub fn file_metadata(&self, file: NodeId) -> Result<Option<Vec<u8>>> {
        if let Some(staged) = self.pending.files_meta.get(&file) {
            return Ok(staged.clone());
        }
        self.get_bytes(FILES_META_TABLE, file)
    }

    /// All mapping entries, sorted by source id.
    pub fn mapping_entries(&self) -> Result<Vec<(NodeId, MappingTarget)>> {
        let mut entries: BTreeMap<NodeId, MappingTarget> = BTreeMap::new();
        for (id, bytes) in self.all_bytes(MAPPING_TABLE)? {
            entries.insert(id, decode(&bytes)?);
        }
        for (id, staged) in &self.pending.mapping {
            match staged {
                Some(target) => entries.insert(*id, *target),
                None => entries.remove(id),
            };
        }
        Ok(entries.into_iter().collect())
    }

    /// Ids of all commits carrying a note.
    pub fn note_ids(&self) -> Result<BTreeSet<NodeId>> {
        let mut ids: BTreeSet<NodeId> = self.all_bytes(NOTES_TABLE)?.into_keys().collect();
        for (id, staged) in &self.pending.notes {
            if staged.is_some() {
                ids.insert(*id);
            } else {
                ids.remove(id);
            }
        }
        Ok(ids)
    }

    /// Stored changeset heads with their branch.
    pub fn branch_heads(&self) -> Result<BTreeMap<NodeId, String>> {
        let mut heads = BTreeMap::new();
        {
            let read_txn = self.begin_read()?;
            if let Some(table) = open_read(&read_txn, BRANCH_HEADS_TABLE)? {
                for entry in table.iter().map_err(db_err("failed to iterate heads"))? {
                    let (key, value) = entry.map_err(db_err("failed to read head"))?;
                    heads.insert(NodeId::from_bytes(*key.value()), value.value().to_string());
                }
            }
        }
        for (id, staged) in &self.pending.branch_heads {
            match staged {
                Some(branch) => heads.insert(*id, branch.clone()),
                None => heads.remove(id),
            };
        }
        Ok(heads)
    }

    /// Stored changeset heads on any of the given branches.
    pub fn heads(&self, branches: &BTreeSet<String>) -> Result<BTreeSet<NodeId>> {
        Ok(self
            .branch_heads()?
            .into_iter()
            .filter(|(_, branch)| branches.contains(branch))
            .map(|(id, _)| id)
            .collect())
    }

    /// Stored manifest heads (manifest commit ids).
    pub fn manifest_heads(&self) -> Result<BTreeSet<NodeId>> {
        if let Some(staged) = &self.pending.manifest_heads {
            return Ok(staged.clone());
        }
        let read_txn = self.begin_read()?;
        let mut heads = BTreeSet::new();
        if let Some(table) = open_read(&read_txn, MANIFEST_HEADS_TABLE)? {
            for entry in table.iter().map_err(db_err("failed to iterate manifest heads"))? {
                let (key, _) = entry.map_err(db_err("failed to read manifest head"))?;
                heads.insert(NodeId::from_bytes(*key.value()));
            }
        }
        Ok(heads)
    }

    /// Maps a source id to a target object.
    pub fn set_mapping(&mut self, source: NodeId, target: NodeId, kind: MappingKind) {
        self.pending
            .mapping
            .insert(source, Some(MappingTarget { id: target, kind }));
    }

    /// Attaches changeset metadata to a target commit.
    pub fn set_note(&mut self, commit: NodeId, data: ChangesetData) {
        self.pending.notes.insert(commit, Some(data));
    }

    /// Records copy metadata for a file revision.
    pub fn set_file_metadata(&mut self, file: NodeId, metadata: Vec<u8>) {
        self.pending.files_meta.insert(file, Some(metadata));
    }

    /// Records a changeset head on a branch.
    pub fn add_head(&mut self, changeset: NodeId, branch: &str) {
        self.pending
            .branch_heads
            .insert(changeset, Some(branch.to_string()));
    }

    /// Forgets a changeset head.
    pub fn remove_head(&mut self, changeset: NodeId) {
        self.pending.branch_heads.insert(changeset, None);
    }

    /// Replaces the set of manifest heads.
    pub fn set_manifest_heads(&mut self, heads: BTreeSet<NodeId>) {
        self.pending.manifest_heads = Some(heads);
    }

    /// Removes a mapping entry along with any file metadata for it.
    pub fn tombstone(&mut self, source: NodeId) {
        self.pending.mapping.insert(source, None);
        self.pending.files_meta.insert(source, None);
    }

    /// Removes the note attached to a target commit.
    pub fn tombstone_note(&mut self, commit: NodeId) {
        self.pending.notes.insert(commit, None);
    }

    /// Returns true if changes are staged.
    pub fn has_pending(&self) -> bool {
        self.pending.len() > 0 || self.stamp_version
    }

    /// Commits staged changes in a single transaction.
    ///
    /// Closing with nothing staged does nothing.
    ///
    /// # Errors
    ///
    /// Returns `StoreCorrupt` if anything fails. No change is applied then.
    pub fn close(mut self) -> Result<()> {
        if !self.has_pending() {
            return Ok(());
        }

        let pending = std::mem::take(&mut self.pending);
        let changes = pending.len();
        let write_txn = self
            .db
            .begin_write()
            .map_err(commit_err("failed to begin write transaction"))?;
        {
            let mut mapping = write_txn
                .open_table(MAPPING_TABLE)
                .map_err(commit_err("failed to open mapping table"))?;
            for (id, staged) in &pending.mapping {
                match staged {
                    Some(target) => {
                        let bytes = encode_staged(target, "failed to encode mapping")?;
                        mapping
                            .insert(id.as_bytes(), bytes.as_slice())
                            .map_err(commit_err("failed to write mapping"))?;
                    }
                    None => {
                        mapping
                            .remove(id.as_bytes())
                            .map_err(commit_err("failed to remove mapping"))?;
                    }
                }
            }

            let mut notes = write_txn
                .open_table(NOTES_TABLE)
                .map_err(commit_err("failed to open notes table"))?;
            for (id, staged) in &pending.notes {
                match staged {
                    Some(data) => {
                        let bytes = encode_staged(data, "failed to encode note")?;
                        notes
                            .insert(id.as_bytes(), bytes.as_slice())
                            .map_err(commit_err("failed to write note"))?;
                    }
                    None => {
                        notes
                            .remove(id.as_bytes())
                            .map_err(commit_err("failed to remove note"))?;
                    }
                }
            }

            let mut files_meta = write_txn
                .open_table(FILES_META_TABLE)
                .map_err(commit_err("failed to open files_meta table"))?;
            for (id, staged) in &pending.files_meta {
                match staged {
                    Some(meta) => {
                        files_meta
                            .insert(id.as_bytes(), meta.as_slice())
                            .map_err(commit_err("failed to write file metadata"))?;
                    }
                    None => {
                        files_meta
                            .remove(id.as_bytes())
                            .map_err(commit_err("failed to remove file metadata"))?;
                    }
                }
            }

            let mut branch_heads = write_txn
                .open_table(BRANCH_HEADS_TABLE)
                .map_err(commit_err("failed to open branch_heads table"))?;
            for (id, staged) in &pending.branch_heads {
                match staged {
                    Some(branch) => {
                        branch_heads
                            .insert(id.as_bytes(), branch.as_str())
                            .map_err(commit_err("failed to write head"))?;
                    }
                    None => {
                        branch_heads
                            .remove(id.as_bytes())
                            .map_err(commit_err("failed to remove head"))?;
                    }
                }
            }

            if let Some(heads) = &pending.manifest_heads {
                let mut table = write_txn
                    .open_table(MANIFEST_HEADS_TABLE)
                    .map_err(commit_err("failed to open manifest_heads table"))?;
                table
                    .retain(|_, _| false)
                    .map_err(commit_err("failed to clear manifest heads"))?;
                for id in heads {
                    table
                        .insert(id.as_bytes(), ())
                        .map_err(commit_err("failed to write manifest head"))?;
                }
            }

            if self.stamp_version {
                let mut meta = write_txn
                    .open_table(METADATA_TABLE)
                    .map_err(commit_err("failed to open metadata table"))?;
                meta.insert("version", METADATA_VERSION)
                    .map_err(commit_err("failed to write version"))?;
            }
        }
        write_txn
            .commit()
            .map_err(commit_err("failed to commit metadata"))?;

        debug!(changes, upgraded = self.stamp_version, "metadata committed");
        self.stamp_version = false;
        Ok(())
    }
}

impl Drop for MappingStore {
    fn drop(&mut self) {
        let changes = self.pending.len();
        if changes > 0 {
            warn!(
                path = %self.path.display(),
                changes,
                "discarding staged metadata changes"
            );
        }
    }
}
