//! Accessor contract for the target object store.

use crate::error::Result;
use crate::node_id::NodeId;
use crate::objects::{ObjectKind, RawCommit, TreeEntry};

/// A commit as produced by a history walk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitEntry {
    /// Commit id.
    pub id: NodeId,
    /// Root tree.
    pub tree: NodeId,
    /// Parents, in header order.
    pub parents: Vec<NodeId>,
}

/// How `enumerate_commits` treats its inputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WalkOrder {
    /// Yield exactly the included commits, in the given order.
    Listed,
    /// Yield ancestors of the included commits that are not ancestors of an
    /// excluded one, every commit after all of its parents.
    ParentsFirst,
}

/// A history query.
#[derive(Clone, Debug)]
pub struct CommitQuery {
    /// Starting points.
    pub include: Vec<NodeId>,
    /// Commits whose ancestry is left out.
    pub exclude: Vec<NodeId>,
    /// Walk mode.
    pub walk: WalkOrder,
}

impl CommitQuery {
    /// Query for the given commits only.
    pub fn listed(ids: impl IntoIterator<Item = NodeId>) -> Self {
        Self {
            include: ids.into_iter().collect(),
            exclude: Vec::new(),
            walk: WalkOrder::Listed,
        }
    }

    /// Query for `include` and its ancestry, minus the ancestry of `exclude`.
    pub fn ancestors(
        include: impl IntoIterator<Item = NodeId>,
        exclude: impl IntoIterator<Item = NodeId>,
    ) -> Self {
        Self {
            include: include.into_iter().collect(),
            exclude: exclude.into_iter().collect(),
            walk: WalkOrder::ParentsFirst,
        }
    }
}

/// Lazily produced commits. Errors are yielded in place.
pub type CommitStream<'a> = Box<dyn Iterator<Item = Result<CommitEntry>> + 'a>;

/// Read and write access to target objects.
pub trait ObjectAccess {
    /// Reads an object, failing if it is missing or has another kind.
    fn read_object(&self, kind: ObjectKind, id: NodeId) -> Result<Vec<u8>>;

    /// Stores an object and returns its id.
    fn write_object(&mut self, kind: ObjectKind, data: &[u8]) -> Result<NodeId>;

    /// Lists one level of a tree. A commit id lists its root tree.
    fn list_tree(&self, id: NodeId) -> Result<Vec<TreeEntry>>;

    /// Walks history.
    fn enumerate_commits(&self, query: &CommitQuery) -> Result<CommitStream<'_>>;

    /// Resolves a ref name. Returns `None` when it doesn't exist.
    fn resolve_ref(&self, name: &str) -> Result<Option<NodeId>>;

    /// Reads and decodes a commit.
    fn read_commit(&self, id: NodeId) -> Result<RawCommit> {
        RawCommit::parse(&self.read_object(ObjectKind::Commit, id)?)
    }
}
