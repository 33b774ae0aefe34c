//! File-backed target repository.

use crate::access::{CommitEntry, CommitQuery, CommitStream, ObjectAccess, WalkOrder};
use crate::error::{GraftError, Result};
use crate::node_id::NodeId;
use crate::object_store::ObjectStore;
use crate::objects::{parse_tree, ObjectKind, RawCommit, TreeEntry, EMPTY_TREE};
use crate::refs::Refs;
use std::collections::{HashSet, VecDeque};
use std::path::Path;

/// Target objects and refs stored under one directory.
///
/// Layout: `root/objects/<shard>/<hex>` and `root/refs/<name>`.
pub struct TargetRepo {
    objects: ObjectStore,
    refs: Refs,
}

impl TargetRepo {
    /// Opens (or prepares) a target repository at `root`.
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            objects: ObjectStore::new(root.join("objects")),
            refs: Refs::new(root),
        }
    }

    /// Sets the zstd level used for new objects.
    pub fn with_compression_level(mut self, level: i32) -> Self {
        self.objects = self.objects.with_compression_level(level);
        self
    }

    /// Ref storage.
    pub fn refs(&self) -> &Refs {
        &self.refs
    }

    fn commit_entry(&self, id: NodeId) -> Result<CommitEntry> {
        let commit = self.read_commit(id)?;
        Ok(CommitEntry {
            id,
            tree: commit.tree,
            parents: commit.parents,
        })
    }

    fn ancestors(&self, starts: &[NodeId]) -> Result<HashSet<NodeId>> {
        let mut seen = HashSet::new();
        let mut queue: VecDeque<NodeId> = starts.iter().copied().collect();
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            for parent in self.read_commit(id)?.parents {
                if !seen.contains(&parent) {
                    queue.push_back(parent);
                }
            }
        }
        Ok(seen)
    }
}

impl ObjectAccess for TargetRepo {
    fn read_object(&self, kind: ObjectKind, id: NodeId) -> Result<Vec<u8>> {
        if kind == ObjectKind::Tree && id == EMPTY_TREE && !self.objects.exists(id) {
            return Ok(Vec::new());
        }
        self.objects.get(kind, id)
    }

    fn write_object(&mut self, kind: ObjectKind, data: &[u8]) -> Result<NodeId> {
        self.objects.put(kind, data)
    }

    fn list_tree(&self, id: NodeId) -> Result<Vec<TreeEntry>> {
        if id == EMPTY_TREE {
            return Ok(Vec::new());
        }
        let (kind, data) = self.objects.get_any(id)?;
        match kind {
            ObjectKind::Tree => parse_tree(&data),
            ObjectKind::Commit => {
                let tree = RawCommit::parse(&data)?.tree;
                let content = self.read_object(ObjectKind::Tree, tree)?;
                parse_tree(&content)
            }
            ObjectKind::Blob => Err(GraftError::MalformedObject {
                kind: "tree",
                id: id.as_hex(),
                reason: "object is a blob".to_string(),
            }),
        }
    }

    fn enumerate_commits(&self, query: &CommitQuery) -> Result<CommitStream<'_>> {
        match query.walk {
            WalkOrder::Listed => {
                let ids = query.include.clone();
                Ok(Box::new(ids.into_iter().map(move |id| self.commit_entry(id))))
            }
            WalkOrder::ParentsFirst => {
                let excluded = self.ancestors(&query.exclude)?;
                let stack = query.include.iter().rev().map(|id| Frame::Visit(*id)).collect();
                Ok(Box::new(AncestorWalk {
                    repo: self,
                    stack,
                    visited: excluded,
                }))
            }
        }
    }

    fn resolve_ref(&self, name: &str) -> Result<Option<NodeId>> {
        let name = name.strip_prefix("refs/").unwrap_or(name);
        if name.is_empty() || name.split('/').any(|c| c.is_empty() || c == "." || c == "..") {
            return Ok(None);
        }
        self.refs.try_read_ref(name)
    }
}

enum Frame {
    Visit(NodeId),
    Emit(CommitEntry),
}

/// Depth-first post-order walk, so every commit comes after its parents.
struct AncestorWalk<'a> {
    repo: &'a TargetRepo,
    stack: Vec<Frame>,
    visited: HashSet<NodeId>,
}

impl Iterator for AncestorWalk<'_> {
    type Item = Result<CommitEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(frame) = self.stack.pop() {
            match frame {
                Frame::Emit(entry) => return Some(Ok(entry)),
                Frame::Visit(id) => {
                    if !self.visited.insert(id) {
                        continue;
                    }
                    let entry = match self.repo.commit_entry(id) {
                        Ok(entry) => entry,
                        Err(e) => {
                            self.stack.clear();
                            return Some(Err(e));
                        }
                    };
                    let parents: Vec<NodeId> = entry
                        .parents
                        .iter()
                        .rev()
                        .filter(|p| !self.visited.contains(p))
                        .copied()
                        .collect();
                    self.stack.push(Frame::Emit(entry));
                    self.stack.extend(parents.into_iter().map(Frame::Visit));
                }
            }
        }
        None
    }
}
