//! Unique-node diffs emitted by group matrix mutations

use serde::{Deserialize, Serialize};
use vaultmesh_protocol::NodeId;

/// Snapshot of the matrix's unique-node set across one mutation
///
/// Captured atomically: both sides are taken under the owning table's lock,
/// so a consumer never sees a half-applied write. Responsibility
/// re-computation diffs the two sides to decide which accounts to pick up or
/// surrender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixChange {
    /// Unique node IDs before the mutation
    pub old_unique_ids: Vec<NodeId>,

    /// Unique node IDs after the mutation
    pub new_unique_ids: Vec<NodeId>,
}

impl MatrixChange {
    /// Create a change record from before/after snapshots
    pub fn new(old_unique_ids: Vec<NodeId>, new_unique_ids: Vec<NodeId>) -> Self {
        MatrixChange {
            old_unique_ids,
            new_unique_ids,
        }
    }

    /// Nodes present after the mutation but not before
    pub fn gained_nodes(&self) -> Vec<NodeId> {
        self.new_unique_ids
            .iter()
            .filter(|id| !self.old_unique_ids.contains(id))
            .copied()
            .collect()
    }

    /// Nodes present before the mutation but not after
    pub fn lost_nodes(&self) -> Vec<NodeId> {
        self.old_unique_ids
            .iter()
            .filter(|id| !self.new_unique_ids.contains(id))
            .copied()
            .collect()
    }

    /// Symmetric difference of the two snapshots
    pub fn churn(&self) -> Vec<NodeId> {
        let mut nodes = self.lost_nodes();
        nodes.extend(self.gained_nodes());
        nodes
    }

    /// True when the mutation left the unique-node set untouched
    pub fn is_unchanged(&self) -> bool {
        self.old_unique_ids.len() == self.new_unique_ids.len()
            && self
                .old_unique_ids
                .iter()
                .all(|id| self.new_unique_ids.contains(id))
    }
}
