//! Labelled parent graph with head computation.

use crate::error::{GraftError, Result};
use crate::node_id::NodeId;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Node {
    /// Non-null parents first, padded with NULL.
    parents: [NodeId; 2],
    label: u32,
}

/// Directed acyclic graph of nodes with up to two parents and a label.
///
/// Parents need not be inserted themselves. Heads are derived from the set
/// of inserted nodes only, so the result does not depend on insertion order.
///
/// # Examples
///
/// ```
/// use graft_core::{Dag, NodeId};
///
/// let a = NodeId::from_bytes([1; 20]);
/// let b = NodeId::from_bytes([2; 20]);
///
/// let mut dag = Dag::new();
/// dag.add(a, &[], "default").unwrap();
/// dag.add(b, &[a], "default").unwrap();
///
/// assert_eq!(dag.heads(None).into_iter().collect::<Vec<_>>(), vec![b]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Dag {
    nodes: HashMap<NodeId, Node>,
    children: HashMap<NodeId, Vec<NodeId>>,
    labels: Vec<String>,
    label_ids: HashMap<String, u32>,
}

impl Dag {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    fn intern(&mut self, label: &str) -> u32 {
        if let Some(&id) = self.label_ids.get(label) {
            return id;
        }
        let id = self.labels.len() as u32;
        self.labels.push(label.to_string());
        self.label_ids.insert(label.to_string(), id);
        id
    }

    fn conflict(node: NodeId, reason: impl Into<String>) -> GraftError {
        GraftError::GraphConflict {
            node: node.as_hex(),
            reason: reason.into(),
        }
    }

    /// Inserts `node` with its parents and label.
    ///
    /// Null parents are ignored and duplicates collapsed. Inserting the same
    /// node again with the same parents and label does nothing.
    ///
    /// # Errors
    ///
    /// Returns `GraphConflict` for a self-parent, more than two parents, or a
    /// re-insert that disagrees with the first one.
    pub fn add(&mut self, node: NodeId, parents: &[NodeId], label: &str) -> Result<()> {
        let mut unique: Vec<NodeId> = Vec::with_capacity(2);
        for parent in parents.iter().filter(|p| !p.is_null()) {
            if *parent == node {
                return Err(Self::conflict(node, "node is its own parent"));
            }
            if !unique.contains(parent) {
                unique.push(*parent);
            }
        }
        if unique.len() > 2 {
            return Err(Self::conflict(
                node,
                format!("{} parents, at most 2 allowed", unique.len()),
            ));
        }

        let mut padded = [NodeId::NULL; 2];
        padded[..unique.len()].copy_from_slice(&unique);

        if let Some(existing) = self.nodes.get(&node) {
            let mut old: Vec<NodeId> = existing
                .parents
                .iter()
                .filter(|p| !p.is_null())
                .copied()
                .collect();
            let mut new = unique.clone();
            old.sort();
            new.sort();
            if old != new {
                return Err(Self::conflict(node, "re-inserted with different parents"));
            }
            let old_label = &self.labels[existing.label as usize];
            if old_label != label {
                return Err(Self::conflict(
                    node,
                    format!("re-inserted with label {:?}, was {:?}", label, old_label),
                ));
            }
            return Ok(());
        }

        let label = self.intern(label);
        self.nodes.insert(
            node,
            Node {
                parents: padded,
                label,
            },
        );
        for parent in unique {
            self.children.entry(parent).or_default().push(node);
        }
        Ok(())
    }

    /// Returns true if `node` was inserted.
    pub fn contains(&self, node: &NodeId) -> bool {
        self.nodes.contains_key(node)
    }

    /// Number of inserted nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true when nothing was inserted.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All labels in use, sorted.
    pub fn labels(&self) -> BTreeSet<String> {
        self.labels.iter().cloned().collect()
    }

    /// Computes heads.
    ///
    /// With `None`, a head is a node without any child. With a label, a head
    /// is a node of that label without any child of that label.
    pub fn heads(&self, label: Option<&str>) -> BTreeSet<NodeId> {
        match label {
            None => self
                .nodes
                .keys()
                .filter(|id| !self.children.contains_key(id))
                .copied()
                .collect(),
            Some(label) => {
                let Some(&wanted) = self.label_ids.get(label) else {
                    return BTreeSet::new();
                };
                self.nodes
                    .iter()
                    .filter(|(_, n)| n.label == wanted)
                    .filter(|(id, _)| !self.has_child_with_label(id, wanted))
                    .map(|(id, _)| *id)
                    .collect()
            }
        }
    }

    fn has_child_with_label(&self, node: &NodeId, label: u32) -> bool {
        self.children.get(node).is_some_and(|children| {
            children
                .iter()
                .any(|c| self.nodes.get(c).is_some_and(|n| n.label == label))
        })
    }

    /// Heads of every label, as sorted `(label, head)` pairs.
    pub fn all_heads(&self) -> Vec<(String, NodeId)> {
        let mut out = Vec::new();
        for label in self.labels() {
            for head in self.heads(Some(&label)) {
                out.push((label.clone(), head));
            }
        }
        out
    }
}
