//! Second-order view of the overlay around this node
//!
//! Each directly connected peer owns one row: the row head is the peer
//! itself and the remaining cells are that peer's reported close group. The
//! deduplicated union of all cells, sorted by XOR distance from the owner,
//! lets a vault reason about roughly `closest_nodes_size²` nodes without
//! holding connections to them.

use crate::matrix_change::MatrixChange;
use crate::node_info::NodeInfo;
use crate::parameters::Parameters;
use tracing::{debug, info, warn};
use vaultmesh_protocol::{ConnectionId, NodeId};

/// Aggregated close groups of every directly connected peer
#[derive(Debug, Clone)]
pub struct GroupMatrix {
    node_id: NodeId,
    client_mode: bool,
    params: Parameters,
    matrix: Vec<Vec<NodeInfo>>,
    unique_nodes: Vec<NodeInfo>,
}

impl GroupMatrix {
    /// Create an empty matrix for the node with the given identity
    pub fn new(node_id: NodeId, client_mode: bool, params: Parameters) -> Self {
        GroupMatrix {
            node_id,
            client_mode,
            params,
            matrix: Vec::new(),
            unique_nodes: Vec::new(),
        }
    }

    /// Insert a new row for a directly connected peer
    ///
    /// Idempotent: a peer that already owns a row is left untouched.
    pub fn add_connected_peer(&mut self, node_info: &NodeInfo) {
        debug!(peer = %node_info.node_id, "add connected peer to matrix");
        if self
            .matrix
            .iter()
            .any(|row| row[0].node_id == node_info.node_id)
        {
            warn!(peer = %node_info.node_id, "peer already has a matrix row");
            return;
        }
        self.matrix.push(vec![node_info.clone()]);
        self.update_unique_node_list();
    }

    /// Remove the row keyed by a directly connected peer
    ///
    /// Returns the unique-node diff captured across the removal and the
    /// subsequent prune.
    pub fn remove_connected_peer(&mut self, node_id: &NodeId) -> MatrixChange {
        let old_unique_ids = self.unique_node_ids();
        self.matrix.retain(|row| row[0].node_id != *node_id);
        self.prune();
        self.update_unique_node_list();
        MatrixChange::new(old_unique_ids, self.unique_node_ids())
    }

    /// Replace a connected peer's reported close group
    ///
    /// A peer without a row is not authoritative for any row, so the update
    /// is dropped with a warning.
    pub fn update_from_connected_peer(&mut self, peer: &NodeId, close_group: &[NodeInfo]) {
        debug_assert!(close_group.len() < self.params.max_routing_table_size);
        if peer.is_zero() {
            debug_assert!(false, "invalid peer node id");
            return;
        }
        let Some(row) = self.matrix.iter_mut().find(|row| row[0].node_id == *peer) else {
            warn!(peer = %peer, "group update from a peer with no matrix row");
            return;
        };
        row.truncate(1);
        row.extend(close_group.iter().cloned());
        self.prune();
        self.update_unique_node_list();
    }

    /// The directly connected peers (first column of the matrix)
    pub fn connected_peers(&self) -> Vec<NodeInfo> {
        self.matrix
            .iter()
            .map(|row| &row[0])
            .filter(|head| head.node_id != self.node_id)
            .cloned()
            .collect()
    }

    /// The first connected peer whose row contains the target anywhere
    pub fn connected_peer_for(&self, target: &NodeId) -> Option<NodeInfo> {
        self.matrix
            .iter()
            .find(|row| row.iter().any(|cell| cell.node_id == *target))
            .map(|row| row[0].clone())
    }

    /// Every connected peer whose row contains the target anywhere
    pub fn all_connected_peers_for(&self, target: &NodeId) -> Vec<NodeInfo> {
        self.matrix
            .iter()
            .filter(|row| row.iter().any(|cell| cell.node_id == *target))
            .map(|row| row[0].clone())
            .collect()
    }

    /// Find a connected peer whose row holds a cell strictly closer to the
    /// target than the current closest candidate
    ///
    /// Scans every cell; whenever one beats the best distance seen so far,
    /// the owning row's head becomes the recommended relay. Cells matching
    /// the owner, the exclude list, or (optionally) the target itself are
    /// skipped.
    pub fn better_node_for_sending_message(
        &self,
        target: &NodeId,
        exclude: &[NodeId],
        ignore_exact_match: bool,
        current_closest: &NodeInfo,
    ) -> NodeInfo {
        let mut closest_id = current_closest.node_id;
        let mut best = current_closest.clone();

        for row in &self.matrix {
            if ignore_exact_match && row[0].node_id == *target {
                continue;
            }
            if exclude.contains(&row[0].node_id) {
                continue;
            }
            for cell in row {
                if cell.node_id == self.node_id {
                    continue;
                }
                if ignore_exact_match && cell.node_id == *target {
                    continue;
                }
                if exclude.contains(&cell.node_id) {
                    continue;
                }
                if NodeId::closer_to_target(&cell.node_id, &closest_id, target) {
                    closest_id = cell.node_id;
                    best = row[0].clone();
                }
            }
        }
        debug!(
            target_id = %target,
            found = %closest_id,
            send_to = %best.node_id,
            "better node for sending message"
        );
        best
    }

    /// Id-only variant of [`better_node_for_sending_message`]
    ///
    /// [`better_node_for_sending_message`]: GroupMatrix::better_node_for_sending_message
    pub fn better_node_id_for_sending_message(
        &self,
        target: &NodeId,
        ignore_exact_match: bool,
        current_closest_id: &NodeId,
    ) -> NodeId {
        let mut closest_id = *current_closest_id;
        let mut best = *current_closest_id;

        for row in &self.matrix {
            if ignore_exact_match && row[0].node_id == *target {
                continue;
            }
            for cell in row {
                if ignore_exact_match && cell.node_id == *target {
                    continue;
                }
                if NodeId::closer_to_target(&cell.node_id, &closest_id, target) {
                    closest_id = cell.node_id;
                    best = row[0].node_id;
                }
            }
        }
        best
    }

    /// Whether this node is the unique node closest to the target
    ///
    /// Returns the leadership verdict and, when some other node leads, a
    /// forwarding hint towards it. Clients hold no group responsibility and
    /// are never leaders.
    pub fn is_this_node_group_leader(&self, target: &NodeId) -> (bool, Option<NodeId>) {
        debug_assert!(!self.client_mode, "clients hold no group responsibility");
        if self.client_mode {
            return (false, None);
        }
        debug!(target_id = %target, own = %self.node_id, "group leader check");
        if self.unique_nodes.is_empty() {
            return (true, None);
        }

        let mut is_leader = true;
        for node in &self.unique_nodes {
            if node.node_id == *target {
                continue;
            }
            if NodeId::closer_to_target(&node.node_id, &self.node_id, target) {
                debug!(candidate = %node.node_id, "another node could be leader");
                is_leader = false;
                break;
            }
        }
        if is_leader {
            return (true, None);
        }

        let better = self.better_node_id_for_sending_message(target, true, &self.node_id);
        debug_assert_ne!(better, *target);
        (false, Some(better))
    }

    /// Whether this node precedes every unique node in the target's order
    ///
    /// When the nearest unique node is the target itself, the comparison
    /// moves to the next one.
    pub fn closest_to_id(&self, target: &NodeId) -> bool {
        if self.unique_nodes.is_empty() {
            return true;
        }

        let mut ids: Vec<NodeId> = self.unique_nodes.iter().map(|n| n.node_id).collect();
        ids.sort_by_key(|id| id.distance(target));

        if ids[0] == self.node_id {
            return true;
        }
        if ids[0] == *target {
            return match ids.get(1) {
                None => true,
                Some(second) if *second == self.node_id => true,
                Some(second) => NodeId::closer_to_target(&self.node_id, second, target),
            };
        }
        NodeId::closer_to_target(&self.node_id, &ids[0], target)
    }

    /// Whether the target falls inside this node's group radius
    ///
    /// The radius is the XOR distance to the `node_group_size`-th closest
    /// unique node; with fewer unique nodes than a full group, everything is
    /// in range.
    pub fn is_node_id_in_group_range(&self, target: &NodeId) -> bool {
        if self.unique_nodes.len() < self.params.node_group_size {
            return true;
        }

        let mut ids: Vec<NodeId> = self.unique_nodes.iter().map(|n| n.node_id).collect();
        ids.sort_by_key(|id| id.distance(&self.node_id));
        let furthest_group_node = ids[self.params.node_group_size - 1];
        !NodeId::closer_to_target(&furthest_group_node, target, &self.node_id)
    }

    /// The `size` unique nodes nearest to this node
    pub fn closest_nodes(&self, size: usize) -> Vec<NodeInfo> {
        let mut nodes = self.unique_nodes.clone();
        nodes.sort_by_key(|n| n.node_id.distance(&self.node_id));
        nodes.truncate(size.min(nodes.len()));
        nodes
    }

    /// The reported close group of a connected peer (row without its head)
    pub fn get_row(&self, row_id: &NodeId) -> Option<Vec<NodeInfo>> {
        if row_id.is_zero() {
            debug_assert!(false, "invalid row id");
            return None;
        }
        self.matrix
            .iter()
            .find(|row| row[0].node_id == *row_id)
            .map(|row| row[1..].to_vec())
    }

    /// Whether a connected peer has reported no close group yet
    pub fn is_row_empty(&self, node_id: &NodeId) -> bool {
        match self.matrix.iter().find(|row| row[0].node_id == *node_id) {
            Some(row) => row.len() < 2,
            None => {
                debug_assert!(false, "row queried for a peer with no matrix row");
                true
            }
        }
    }

    /// All unique nodes, sorted ascending by XOR distance from this node
    pub fn unique_nodes(&self) -> Vec<NodeInfo> {
        self.unique_nodes.clone()
    }

    /// IDs of all unique nodes, sorted ascending by XOR distance from this node
    pub fn unique_node_ids(&self) -> Vec<NodeId> {
        self.unique_nodes.iter().map(|n| n.node_id).collect()
    }

    /// Whether the ID appears anywhere in the unique-node list
    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.unique_nodes.iter().any(|n| n.node_id == *node_id)
    }

    /// Number of rows currently held
    pub fn row_count(&self) -> usize {
        self.matrix.len()
    }

    /// Drop rows this node has no business keeping
    ///
    /// Keeps the `closest_nodes_size` rows nearest to this node. A row
    /// beyond that prefix survives only in vault mode, with a reported group
    /// of depth at least `closest_nodes_size`, whose composition shows this
    /// node still inside the row peer's own close group.
    pub fn prune(&mut self) {
        let keep = self.params.closest_nodes_size;
        if self.matrix.len() <= keep {
            return;
        }
        debug_assert!(self.row_keys_are_unique(), "matrix rows must be uniquely keyed");

        self.matrix
            .sort_by_key(|row| row[0].node_id.distance(&self.node_id));

        let mut peers_to_remove: Vec<NodeId> = Vec::new();
        for row in self.matrix.iter().skip(keep) {
            let peer = row[0].node_id;
            if self.client_mode {
                peers_to_remove.push(peer);
                continue;
            }
            if row.len() < keep + 1 {
                peers_to_remove.push(peer);
                continue;
            }
            let mut tail: Vec<&NodeInfo> = row[1..].iter().collect();
            tail.sort_by_key(|cell| cell.node_id.distance(&peer));
            if NodeId::closer_to_target(&tail[keep - 1].node_id, &self.node_id, &peer) {
                peers_to_remove.push(peer);
            }
        }

        for peer in &peers_to_remove {
            info!(own = %self.node_id, peer = %peer, "matrix prune removes row");
        }
        self.matrix
            .retain(|row| !peers_to_remove.contains(&row[0].node_id));
    }

    /// Rebuild the unique-node list from the current rows
    pub(crate) fn update_unique_node_list(&mut self) {
        let mut nodes: Vec<NodeInfo> = Vec::new();
        if !self.client_mode {
            nodes.push(NodeInfo::new(
                self.node_id,
                ConnectionId::from_node_id(self.node_id),
            ));
        }
        for row in &self.matrix {
            nodes.extend(row.iter().cloned());
        }
        nodes.sort_by_key(|n| n.node_id.distance(&self.node_id));
        nodes.dedup_by(|a, b| a.node_id == b.node_id);
        self.unique_nodes = nodes;
    }

    fn row_keys_are_unique(&self) -> bool {
        self.matrix.iter().enumerate().all(|(i, row)| {
            self.matrix[i + 1..]
                .iter()
                .all(|other| other[0].node_id != row[0].node_id)
        })
    }
}
