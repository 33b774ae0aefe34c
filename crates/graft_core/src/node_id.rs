//! Node identification shared by both object graphs.

use crate::error::{GraftError, Result};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// A 20-byte SHA-1 digest identifying an object in either graph.
///
/// The all-zero value is the null node, used as "no parent".
///
/// # Examples
///
/// ```
/// use graft_core::NodeId;
///
/// let id = NodeId::from_bytes([0xab; 20]);
/// assert_eq!(id.as_hex().len(), 40);
/// assert_eq!(id.shard(), "ab");
/// assert!(NodeId::NULL.is_null());
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct NodeId([u8; 20]);

impl NodeId {
    /// The length of a NodeId in bytes.
    pub const LEN: usize = 20;

    /// The length of a NodeId as a hex string.
    pub const HEX_LEN: usize = 40;

    /// The null node.
    pub const NULL: NodeId = NodeId([0; 20]);

    /// Creates a NodeId from raw bytes.
    #[inline]
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Returns a reference to the underlying digest.
    #[inline]
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Returns this NodeId as a 40-character lowercase hex string.
    pub fn as_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Returns true for the all-zero sentinel.
    #[inline]
    pub fn is_null(&self) -> bool {
        self.0 == [0; 20]
    }

    /// Returns the shard prefix (first 2 hex characters).
    ///
    /// Used for directory sharding in the object store:
    /// `.graft/objects/{shard}/{full_hex}`
    pub fn shard(&self) -> String {
        hex::encode(&self.0[..1])
    }

    /// Parses a NodeId from a hex string.
    ///
    /// # Errors
    ///
    /// Returns `GraftError::InvalidHex` if the string is not valid hex
    /// or is not exactly 40 characters long.
    ///
    /// # Examples
    ///
    /// ```
    /// use graft_core::NodeId;
    ///
    /// let hex = "a".repeat(40);
    /// let id = NodeId::from_hex(&hex).unwrap();
    /// assert_eq!(id.as_hex(), hex);
    /// ```
    pub fn from_hex(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.len() != Self::HEX_LEN {
            return Err(GraftError::InvalidHex(format!(
                "expected {} hex chars, got {}",
                Self::HEX_LEN,
                s.len()
            )));
        }

        let mut arr = [0u8; 20];
        hex::decode_to_slice(s, &mut arr).map_err(|e| GraftError::InvalidHex(e.to_string()))?;
        Ok(Self(arr))
    }

    /// Builds a NodeId from a 20-byte slice.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 20] = bytes
            .try_into()
            .map_err(|_| {
                GraftError::InvalidHex(format!("expected 20 bytes, got {}", bytes.len()))
            })?;
        Ok(Self(arr))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_hex())
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({}...)", &self.as_hex()[..12])
    }
}

// Hex in JSON reports, raw bytes in postcard values.
impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.as_hex())
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            struct HexVisitor;

            impl<'de> Visitor<'de> for HexVisitor {
                type Value = NodeId;

                fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str("a 40-character hex node id")
                }

                fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<NodeId, E> {
                    NodeId::from_hex(v).map_err(E::custom)
                }
            }

            deserializer.deserialize_str(HexVisitor)
        } else {
            <[u8; 20]>::deserialize(deserializer).map(NodeId)
        }
    }
}
