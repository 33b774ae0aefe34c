//! Manifests stored as target commits.
//!
//! A manifest commit's root tree has a `git` entry pointing at the tree of
//! the matching changeset commit. Every other entry is prefixed with `_` and
//! mirrors the manifest: directories are subtrees, file entries carry the
//! source file node as id and the manifest attribute as mode.

use crate::access::ObjectAccess;
use crate::error::{GraftError, Result};
use crate::node_id::NodeId;
use crate::objects::{encode_tree, EntryMode, ObjectKind, TreeEntry};
use crate::revision::source_hash;
use std::collections::{BTreeMap, BTreeSet};

/// Name of the root entry holding the changeset tree.
pub const GIT_TREE_ENTRY: &str = "git";

const ENTRY_PREFIX: char = '_';

/// Manifest attribute of a file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum FileAttr {
    /// Plain file.
    #[default]
    Regular,
    /// Executable file, `x`.
    Executable,
    /// Symbolic link, `l`.
    Symlink,
}

impl FileAttr {
    /// Flag as written in the manifest text.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Regular => "",
            Self::Executable => "x",
            Self::Symlink => "l",
        }
    }

    /// Tree entry mode carrying this attribute.
    pub const fn mode(&self) -> EntryMode {
        match self {
            Self::Regular => EntryMode::Regular,
            Self::Executable => EntryMode::Executable,
            Self::Symlink => EntryMode::Symlink,
        }
    }

    fn from_mode(mode: EntryMode) -> Option<Self> {
        match mode {
            EntryMode::Regular => Some(Self::Regular),
            EntryMode::Executable => Some(Self::Executable),
            EntryMode::Symlink => Some(Self::Symlink),
            EntryMode::Tree | EntryMode::Gitlink => None,
        }
    }
}

/// One file of a manifest.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Source file node.
    pub node: NodeId,
    /// File attribute.
    pub attr: FileAttr,
}

/// A full manifest: path to file node and attribute.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Manifest {
    /// Files, sorted by path.
    pub files: BTreeMap<String, ManifestEntry>,
}

impl Manifest {
    /// Creates an empty manifest.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a file.
    pub fn insert(&mut self, path: impl Into<String>, node: NodeId, attr: FileAttr) {
        self.files.insert(path.into(), ManifestEntry { node, attr });
    }

    /// Node of `path`, if present.
    pub fn node(&self, path: &str) -> Option<NodeId> {
        self.files.get(path).map(|e| e.node)
    }

    /// Text the manifest node is computed from: `path\0hex[attr]\n` per file.
    pub fn text(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.files.len() * 64);
        for (path, entry) in &self.files {
            out.extend_from_slice(path.as_bytes());
            out.push(0);
            out.extend_from_slice(entry.node.as_hex().as_bytes());
            out.extend_from_slice(entry.attr.as_str().as_bytes());
            out.push(b'\n');
        }
        out
    }

    /// Manifest node given its parent manifest nodes.
    pub fn node_id(&self, parents: &[NodeId]) -> NodeId {
        source_hash(parents, &self.text())
    }

    /// Stores the manifest tree with `git_tree` as the `git` entry and returns its id.
    pub fn write_tree<A: ObjectAccess + ?Sized>(
        &self,
        access: &mut A,
        git_tree: NodeId,
    ) -> Result<NodeId> {
        let mut root = DirBuilder::default();
        for (path, entry) in &self.files {
            root.insert(path.split('/').collect::<Vec<_>>().as_slice(), *entry);
        }
        root.write(access, Some(git_tree))
    }
}

#[derive(Default)]
struct DirBuilder {
    files: Vec<(String, ManifestEntry)>,
    dirs: BTreeMap<String, DirBuilder>,
}

impl DirBuilder {
    fn insert(&mut self, components: &[&str], entry: ManifestEntry) {
        match components {
            [] => {}
            [name] => self.files.push((name.to_string(), entry)),
            [dir, rest @ ..] => self.dirs.entry(dir.to_string()).or_default().insert(rest, entry),
        }
    }

    fn write<A: ObjectAccess + ?Sized>(
        &self,
        access: &mut A,
        git_tree: Option<NodeId>,
    ) -> Result<NodeId> {
        let mut entries = Vec::with_capacity(self.files.len() + self.dirs.len() + 1);
        if let Some(tree) = git_tree {
            entries.push(TreeEntry::new(EntryMode::Tree, GIT_TREE_ENTRY, tree));
        }
        for (name, entry) in &self.files {
            entries.push(TreeEntry::new(
                entry.attr.mode(),
                format!("{}{}", ENTRY_PREFIX, name),
                entry.node,
            ));
        }
        for (name, dir) in &self.dirs {
            let id = dir.write(access, None)?;
            entries.push(TreeEntry::new(EntryMode::Tree, format!("{}{}", ENTRY_PREFIX, name), id));
        }
        access.write_object(ObjectKind::Tree, &encode_tree(&entries))
    }
}

/// Returns the `git` entry of a manifest commit, if it has one.
pub fn manifest_git_tree<A: ObjectAccess + ?Sized>(
    access: &A,
    manifest_commit: NodeId,
) -> Result<Option<NodeId>> {
    Ok(access
        .list_tree(manifest_commit)?
        .into_iter()
        .find(|e| e.name == GIT_TREE_ENTRY && e.mode.is_tree())
        .map(|e| e.id))
}

/// Reads the manifest recorded in a manifest commit.
pub fn read_manifest<A: ObjectAccess + ?Sized>(
    access: &A,
    manifest_commit: NodeId,
) -> Result<Manifest> {
    let mut manifest = Manifest::new();
    let entries = access.list_tree(manifest_commit)?;
    collect(access, manifest_commit, entries, "", &mut manifest)?;
    Ok(manifest)
}

fn collect<A: ObjectAccess + ?Sized>(
    access: &A,
    manifest_commit: NodeId,
    entries: Vec<TreeEntry>,
    prefix: &str,
    manifest: &mut Manifest,
) -> Result<()> {
    for entry in entries {
        if prefix.is_empty() && entry.name == GIT_TREE_ENTRY {
            continue;
        }
        let Some(name) = entry.name.strip_prefix(ENTRY_PREFIX) else {
            return Err(GraftError::MalformedObject {
                kind: "manifest",
                id: manifest_commit.as_hex(),
                reason: format!("unexpected entry {}{}", prefix, entry.name),
            });
        };
        let path = format!("{}{}", prefix, name);

        if entry.mode.is_tree() {
            let children = access.list_tree(entry.id)?;
            collect(access, manifest_commit, children, &format!("{}/", path), manifest)?;
        } else {
            let attr = FileAttr::from_mode(entry.mode).ok_or_else(|| GraftError::MalformedObject {
                kind: "manifest",
                id: manifest_commit.as_hex(),
                reason: format!("unsupported mode {} for {}", entry.mode.as_str(), path),
            })?;
            manifest.insert(path, entry.id, attr);
        }
    }
    Ok(())
}

/// A path whose file node changed relative to the parent manifests.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileRecord {
    /// File path.
    pub path: String,
    /// New file node, null for a removal.
    pub node: NodeId,
    /// Nodes of the same path in the parent manifests, without nulls or duplicates.
    pub parents: Vec<NodeId>,
}

/// Lists paths whose node differs from the node in every parent manifest.
///
/// With no parents every file is listed. Removals show up with a null node.
pub fn manifest_changes(manifest: &Manifest, parents: &[Manifest]) -> Vec<FileRecord> {
    let mut paths: BTreeSet<&str> = manifest.files.keys().map(String::as_str).collect();
    for parent in parents {
        paths.extend(parent.files.keys().map(String::as_str));
    }

    let mut out = Vec::new();
    for path in paths {
        let node = manifest.node(path).unwrap_or(NodeId::NULL);
        let parent_nodes: Vec<NodeId> = parents
            .iter()
            .map(|p| p.node(path).unwrap_or(NodeId::NULL))
            .collect();

        let changed = if parent_nodes.is_empty() {
            !node.is_null()
        } else {
            parent_nodes.iter().all(|p| *p != node)
        };
        if !changed {
            continue;
        }

        let mut file_parents = Vec::with_capacity(2);
        for p in parent_nodes {
            if !p.is_null() && !file_parents.contains(&p) {
                file_parents.push(p);
            }
        }
        out.push(FileRecord {
            path: path.to_string(),
            node,
            parents: file_parents,
        });
    }
    out
}
