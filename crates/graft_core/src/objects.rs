//! Target-side object model: kinds, hashing, tree and commit codecs.

use crate::error::{GraftError, Result};
use crate::node_id::NodeId;
use serde_repr::{Deserialize_repr, Serialize_repr};
use sha1::{Digest, Sha1};
use std::fmt;

/// Id of the tree with no entries.
pub const EMPTY_TREE: NodeId = NodeId::from_bytes([
    0x4b, 0x82, 0x5d, 0xc6, 0x42, 0xcb, 0x6e, 0xb9, 0xa0, 0x60, 0xe5, 0x4b, 0xf8, 0xd6, 0x92, 0x88,
    0xfb, 0xee, 0x49, 0x04,
]);

/// Kind of a target object.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
pub enum ObjectKind {
    /// File content.
    Blob = 1,
    /// Directory listing.
    Tree = 2,
    /// Snapshot with parents and signatures.
    Commit = 3,
}

impl ObjectKind {
    /// Header name used when hashing.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Blob => "blob",
            Self::Tree => "tree",
            Self::Commit => "commit",
        }
    }

    /// Parses a header name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "blob" => Some(Self::Blob),
            "tree" => Some(Self::Tree),
            "commit" => Some(Self::Commit),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Computes the id of an object: `sha1("<kind> <len>\0" ‖ data)`.
///
/// # Examples
///
/// ```
/// use graft_core::{object_hash, ObjectKind, EMPTY_TREE};
///
/// assert_eq!(object_hash(ObjectKind::Tree, b""), EMPTY_TREE);
/// ```
pub fn object_hash(kind: ObjectKind, data: &[u8]) -> NodeId {
    let header = format!("{} {}\0", kind.as_str(), data.len());
    let mut hasher = Sha1::new();
    hasher.update(header.as_bytes());
    hasher.update(data);
    NodeId::from_bytes(hasher.finalize().into())
}

/// File mode of a tree entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntryMode {
    /// `100644`
    Regular,
    /// `100755`
    Executable,
    /// `120000`
    Symlink,
    /// `40000`
    Tree,
    /// `160000`, a commit in another repository.
    Gitlink,
}

impl EntryMode {
    /// Octal representation as written in tree objects.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Regular => "100644",
            Self::Executable => "100755",
            Self::Symlink => "120000",
            Self::Tree => "40000",
            Self::Gitlink => "160000",
        }
    }

    /// Parses an octal mode. `100664` is accepted as regular, as old trees carry it.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "100644" | "100664" => Some(Self::Regular),
            "100755" => Some(Self::Executable),
            "120000" => Some(Self::Symlink),
            "40000" | "040000" => Some(Self::Tree),
            "160000" => Some(Self::Gitlink),
            _ => None,
        }
    }

    /// Returns true for subdirectories.
    pub fn is_tree(&self) -> bool {
        matches!(self, Self::Tree)
    }
}

/// One entry of a tree object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeEntry {
    /// Entry mode.
    pub mode: EntryMode,
    /// Entry name, without any slash.
    pub name: String,
    /// Id of the entry's object.
    pub id: NodeId,
}

impl TreeEntry {
    /// Creates a tree entry.
    pub fn new(mode: EntryMode, name: impl Into<String>, id: NodeId) -> Self {
        Self {
            mode,
            name: name.into(),
            id,
        }
    }

    // Trees sort as if their name ended with '/'.
    fn sort_key(&self) -> Vec<u8> {
        let mut key = self.name.as_bytes().to_vec();
        if self.mode.is_tree() {
            key.push(b'/');
        }
        key
    }
}

fn malformed(kind: &'static str, reason: impl Into<String>) -> GraftError {
    GraftError::MalformedObject {
        kind,
        id: "-".to_string(),
        reason: reason.into(),
    }
}

/// Parses tree content: a sequence of `<mode> <name>\0<20-byte id>`.
pub fn parse_tree(content: &[u8]) -> Result<Vec<TreeEntry>> {
    let mut entries = Vec::new();
    let mut pos = 0;

    while pos < content.len() {
        let space_pos = content[pos..]
            .iter()
            .position(|&b| b == b' ')
            .ok_or_else(|| malformed("tree", "missing space after mode"))?;
        let mode_str = std::str::from_utf8(&content[pos..pos + space_pos])
            .map_err(|_| malformed("tree", "non-ascii mode"))?;
        let mode = EntryMode::parse(mode_str)
            .ok_or_else(|| malformed("tree", format!("unknown mode {}", mode_str)))?;
        pos += space_pos + 1;

        let nul_pos = content[pos..]
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| malformed("tree", "missing NUL after name"))?;
        let name = String::from_utf8(content[pos..pos + nul_pos].to_vec())
            .map_err(|_| malformed("tree", "entry name is not UTF-8"))?;
        pos += nul_pos + 1;

        if pos + NodeId::LEN > content.len() {
            return Err(malformed("tree", "truncated entry id"));
        }
        let id = NodeId::from_slice(&content[pos..pos + NodeId::LEN])?;
        pos += NodeId::LEN;

        entries.push(TreeEntry { mode, name, id });
    }

    Ok(entries)
}

/// Encodes tree entries in canonical order.
pub fn encode_tree(entries: &[TreeEntry]) -> Vec<u8> {
    let mut sorted: Vec<&TreeEntry> = entries.iter().collect();
    sorted.sort_by_cached_key(|e| e.sort_key());

    let mut out = Vec::with_capacity(entries.len() * 48);
    for entry in sorted {
        out.extend_from_slice(entry.mode.as_str().as_bytes());
        out.push(b' ');
        out.extend_from_slice(entry.name.as_bytes());
        out.push(0);
        out.extend_from_slice(entry.id.as_bytes());
    }
    out
}

/// A decoded commit object.
///
/// Only the headers the bridge relies on are kept. `author` and `committer`
/// hold the full signature, e.g. `Jane <jane@example.com> 1700000000 +0100`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawCommit {
    /// Root tree.
    pub tree: NodeId,
    /// Parent commits, in header order.
    pub parents: Vec<NodeId>,
    /// Author signature.
    pub author: String,
    /// Committer signature.
    pub committer: String,
    /// Everything after the blank line separating headers and body.
    pub message: Vec<u8>,
}

impl RawCommit {
    /// Parses commit content.
    ///
    /// Unknown headers and continuation lines (e.g. `gpgsig`) are ignored.
    pub fn parse(content: &[u8]) -> Result<Self> {
        let (header, message) = match content.windows(2).position(|w| w == b"\n\n") {
            Some(pos) => (&content[..pos], &content[pos + 2..]),
            None => (content, &[][..]),
        };
        let header =
            std::str::from_utf8(header).map_err(|_| malformed("commit", "header is not UTF-8"))?;

        let mut tree = None;
        let mut parents = Vec::new();
        let mut author = None;
        let mut committer = None;

        for line in header.lines() {
            if line.starts_with(' ') {
                continue;
            }
            let (key, value) = line.split_once(' ').unwrap_or((line, ""));
            match key {
                "tree" => tree = Some(NodeId::from_hex(value)?),
                "parent" => parents.push(NodeId::from_hex(value)?),
                "author" => author = Some(value.to_string()),
                "committer" => committer = Some(value.to_string()),
                _ => {}
            }
        }

        Ok(Self {
            tree: tree.ok_or_else(|| malformed("commit", "missing tree header"))?,
            parents,
            author: author.ok_or_else(|| malformed("commit", "missing author header"))?,
            committer: committer.ok_or_else(|| malformed("commit", "missing committer header"))?,
            message: message.to_vec(),
        })
    }

    /// Encodes the commit in canonical header order.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256 + self.message.len());
        out.extend_from_slice(format!("tree {}\n", self.tree).as_bytes());
        for parent in &self.parents {
            out.extend_from_slice(format!("parent {}\n", parent).as_bytes());
        }
        out.extend_from_slice(format!("author {}\n", self.author).as_bytes());
        out.extend_from_slice(format!("committer {}\n", self.committer).as_bytes());
        out.push(b'\n');
        out.extend_from_slice(&self.message);
        out
    }
}
