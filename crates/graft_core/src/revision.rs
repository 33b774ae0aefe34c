//! Source-side revision model: node hashing and the texts it covers.
//!
//! A source node is `sha1(min(p1, p2) ‖ max(p1, p2) ‖ text)` where missing
//! parents are the null node. Changesets, manifests and file revisions only
//! differ in how their text is laid out.

use crate::error::{GraftError, Result};
use crate::node_id::NodeId;
use crate::objects::RawCommit;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;
use std::fmt;

/// Node of the empty file revision without parents.
pub const HG_EMPTY_FILE: NodeId = NodeId::from_bytes([
    0xb8, 0x0d, 0xe5, 0xd1, 0x38, 0x75, 0x85, 0x41, 0xc5, 0xf0, 0x52, 0x65, 0xad, 0x14, 0x4a, 0xb9,
    0xfa, 0x86, 0xd1, 0xdb,
]);

/// Branch of changesets without a `branch` extra.
pub const DEFAULT_BRANCH: &str = "default";

/// Marker delimiting file copy metadata at the start of a file text.
pub const METADATA_MARKER: &[u8] = b"\x01\n";

/// Computes a source node from up to two parents and a text.
///
/// # Examples
///
/// ```
/// use graft_core::{source_hash, HG_EMPTY_FILE};
///
/// assert_eq!(source_hash(&[], b""), HG_EMPTY_FILE);
/// ```
pub fn source_hash(parents: &[NodeId], text: &[u8]) -> NodeId {
    let p1 = parents.first().copied().unwrap_or(NodeId::NULL);
    let p2 = parents.get(1).copied().unwrap_or(NodeId::NULL);
    let (lo, hi) = if p1 <= p2 { (p1, p2) } else { (p2, p1) };

    let mut hasher = Sha1::new();
    hasher.update(lo.as_bytes());
    hasher.update(hi.as_bytes());
    hasher.update(text);
    NodeId::from_bytes(hasher.finalize().into())
}

/// Changeset metadata attached to a target commit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangesetData {
    /// Source changeset node.
    pub changeset: NodeId,
    /// Source manifest node.
    pub manifest: NodeId,
    /// Parent changesets, without null entries.
    pub parents: Vec<NodeId>,
    /// Author as recorded in the source, when it can't be derived from the commit.
    pub author: Option<String>,
    /// Extra key/values. `Some` of an empty map is distinct from `None`.
    pub extra: Option<BTreeMap<String, String>>,
    /// Files changed by the changeset, sorted.
    pub files: Vec<String>,
}

impl ChangesetData {
    /// Branch of the changeset.
    pub fn branch(&self) -> &str {
        self.extra
            .as_ref()
            .and_then(|extra| extra.get("branch"))
            .map(String::as_str)
            .unwrap_or(DEFAULT_BRANCH)
    }
}

/// Identity and date of a signature, in source conventions.
///
/// `utc_offset` is in seconds west of UTC, so `+0100` becomes `-3600`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthorInfo {
    /// `Name <email>`
    pub who: String,
    /// Seconds since the epoch.
    pub timestamp: i64,
    /// Seconds west of UTC.
    pub utc_offset: i32,
}

impl AuthorInfo {
    /// Parses a target signature such as `Jane <jane@example.com> 1700000000 +0100`.
    pub fn parse(signature: &str) -> Result<Self> {
        let bad = |reason: &str| GraftError::MalformedObject {
            kind: "signature",
            id: "-".to_string(),
            reason: format!("{}: {:?}", reason, signature),
        };

        let mut parts = signature.rsplitn(3, ' ');
        let (Some(tz), Some(ts), Some(who)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(bad("expected `who timestamp tz`"));
        };

        let timestamp: i64 = ts.parse().map_err(|_| bad("invalid timestamp"))?;

        let (sign, digits) = match tz.as_bytes().first() {
            Some(b'+') => (1, &tz[1..]),
            Some(b'-') => (-1, &tz[1..]),
            _ => return Err(bad("invalid timezone")),
        };
        if digits.len() != 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(bad("invalid timezone"));
        }
        let hours: i32 = digits[..2].parse().map_err(|_| bad("invalid timezone"))?;
        let minutes: i32 = digits[2..].parse().map_err(|_| bad("invalid timezone"))?;

        Ok(Self {
            who: who.to_string(),
            timestamp,
            utc_offset: -sign * (hours * 3600 + minutes * 60),
        })
    }

    /// Formats the date part: `timestamp offset`.
    pub fn date(&self) -> String {
        format!("{} {}", self.timestamp, self.utc_offset)
    }
}

impl fmt::Display for AuthorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.who, self.timestamp, self.utc_offset)
    }
}

fn escape_extra(s: &str, out: &mut String) {
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\0' => out.push_str("\\0"),
            c => out.push(c),
        }
    }
}

/// Encodes extra key/values: sorted `key:value` pairs, escaped, joined by NUL.
pub fn encode_extra(extra: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    for (i, (key, value)) in extra.iter().enumerate() {
        if i > 0 {
            out.push('\0');
        }
        escape_extra(key, &mut out);
        out.push(':');
        escape_extra(value, &mut out);
    }
    out
}

/// Rebuilds the text a changeset node is computed from.
///
/// Layout, joined by newlines: manifest hex, author, date with optional
/// extra, changed files, an empty line, then the description.
pub fn changeset_text(commit: &RawCommit, data: &ChangesetData) -> Result<Vec<u8>> {
    let author = AuthorInfo::parse(&commit.author)?;

    let mut text = Vec::with_capacity(128 + commit.message.len());
    text.extend_from_slice(data.manifest.as_hex().as_bytes());
    text.push(b'\n');
    text.extend_from_slice(data.author.as_deref().unwrap_or(&author.who).as_bytes());
    text.push(b'\n');
    text.extend_from_slice(author.date().as_bytes());
    if let Some(extra) = data.extra.as_ref().filter(|e| !e.is_empty()) {
        text.push(b' ');
        text.extend_from_slice(encode_extra(extra).as_bytes());
    }
    text.push(b'\n');

    let mut files: Vec<&String> = data.files.iter().collect();
    files.sort();
    for file in files {
        text.extend_from_slice(file.as_bytes());
        text.push(b'\n');
    }
    text.push(b'\n');
    text.extend_from_slice(&commit.message);
    Ok(text)
}

/// Rebuilds the text a file node is computed from.
///
/// Copy metadata is wrapped in markers. Content that itself starts with the
/// marker gets an empty metadata block so it stays unambiguous.
pub fn file_text(metadata: Option<&[u8]>, content: &[u8]) -> Vec<u8> {
    match metadata {
        None if !content.starts_with(METADATA_MARKER) => content.to_vec(),
        metadata => {
            let metadata = metadata.unwrap_or_default();
            let mut text = Vec::with_capacity(4 + metadata.len() + content.len());
            text.extend_from_slice(METADATA_MARKER);
            text.extend_from_slice(metadata);
            text.extend_from_slice(METADATA_MARKER);
            text.extend_from_slice(content);
            text
        }
    }
}

/// Splits a file text into its metadata and content.
///
/// Returns `None` when the text carries no metadata block.
pub fn split_file_metadata(text: &[u8]) -> Option<(&[u8], &[u8])> {
    let rest = text.strip_prefix(METADATA_MARKER)?;
    let end = rest
        .windows(METADATA_MARKER.len())
        .position(|w| w == METADATA_MARKER)?;
    Some((&rest[..end], &rest[end + METADATA_MARKER.len()..]))
}

/// Builds copy metadata recording that a file was copied from `source` at `rev`.
pub fn copy_metadata(source: &str, rev: NodeId) -> Vec<u8> {
    format!("copy: {}\ncopyrev: {}\n", source, rev).into_bytes()
}
