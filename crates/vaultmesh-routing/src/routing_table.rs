//! Vault routing table with k-bucket style admission
//!
//! The table holds the node's directly connected neighbourhood, organised by
//! XOR distance from the owner. Every write that changes membership updates
//! the enclosed group matrix and the shared network statistics under one
//! exclusive lock, then reports the change through the observer functors
//! after the lock is released.

use crate::error::{Result, RoutingError};
use crate::group_matrix::GroupMatrix;
use crate::matrix_change::MatrixChange;
use crate::network_statistics::NetworkStatistics;
use crate::node_info::{NodeInfo, INVALID_BUCKET};
use crate::parameters::Parameters;
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};
use vaultmesh_protocol::types::NODE_ID_SIZE;
use vaultmesh_protocol::NodeId;

/// Fired when the close-neighbourhood composition changes: `(added, removed)`
pub type CloseNodeReplacedFunctor = Arc<dyn Fn(Vec<NodeInfo>, Vec<NodeInfo>) + Send + Sync>;

/// Fired with a health percentage on every write
pub type NetworkStatusFunctor = Arc<dyn Fn(i32) + Send + Sync>;

/// Fired with the unique-node diff of every matrix mutation
pub type MatrixChangedFunctor = Arc<dyn Fn(MatrixChange) + Send + Sync>;

/// Outcome of an admission attempt
#[derive(Debug, Clone, PartialEq)]
pub enum AddResult {
    /// The peer was admitted
    Added,
    /// Admission was refused; the caller decides whether to keep the
    /// connection alive
    Rejected,
    /// The peer was admitted and displaced an incumbent
    Replaced(NodeInfo),
}

#[derive(Clone, Default)]
struct Functors {
    close_node_replaced: Option<CloseNodeReplacedFunctor>,
    network_status: Option<NetworkStatusFunctor>,
    matrix_changed: Option<MatrixChangedFunctor>,
}

struct TableInner {
    nodes: Vec<NodeInfo>,
    group_matrix: GroupMatrix,
}

struct WriteEvents {
    status: i32,
    close_added: Vec<NodeInfo>,
    close_removed: Vec<NodeInfo>,
    matrix_change: MatrixChange,
}

/// The vault's own neighbourhood of directly connected peers
pub struct RoutingTable {
    client_mode: bool,
    node_id: NodeId,
    params: Parameters,
    network_statistics: Arc<NetworkStatistics>,
    inner: Mutex<TableInner>,
    functors: Mutex<Functors>,
}

impl RoutingTable {
    /// Create an empty table for the node with the given identity
    ///
    /// A client-mode table runs with the reduced peer cap and keeps itself
    /// out of the derived unique-node view.
    pub fn new(
        client_mode: bool,
        node_id: NodeId,
        params: Parameters,
        network_statistics: Arc<NetworkStatistics>,
    ) -> Self {
        let group_matrix = GroupMatrix::new(node_id, client_mode, params.clone());
        RoutingTable {
            client_mode,
            node_id,
            params,
            network_statistics,
            inner: Mutex::new(TableInner {
                nodes: Vec::new(),
                group_matrix,
            }),
            functors: Mutex::new(Functors::default()),
        }
    }

    /// The owning node's identity
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Whether this table belongs to a client node
    pub fn client_mode(&self) -> bool {
        self.client_mode
    }

    /// The configuration this table was built with
    pub fn parameters(&self) -> &Parameters {
        &self.params
    }

    /// Install the observer fired when the close neighbourhood changes
    pub fn set_close_node_replaced_functor(&self, functor: CloseNodeReplacedFunctor) {
        self.lock_functors().close_node_replaced = Some(functor);
    }

    /// Install the observer fired with a health percentage on every write
    pub fn set_network_status_functor(&self, functor: NetworkStatusFunctor) {
        self.lock_functors().network_status = Some(functor);
    }

    /// Install the observer fired with every matrix diff
    pub fn set_matrix_changed_functor(&self, functor: MatrixChangedFunctor) {
        self.lock_functors().matrix_changed = Some(functor);
    }

    /// Attempt to admit a directly connected peer
    ///
    /// The pipeline validates parameters, assigns the bucket, and applies the
    /// range rules: room in the target bucket, strict membership of the close
    /// neighbourhood, or improvement of the furthest slot of the peer's own
    /// bucket. On a full table an expendable incumbent is displaced and
    /// returned as `Replaced`.
    pub fn add_node(&self, peer: NodeInfo) -> Result<AddResult> {
        let mut peer = peer;
        if peer.node_id.is_zero() {
            return Err(RoutingError::InvalidParameter(
                "zero-valued peer id".to_string(),
            ));
        }
        if peer.node_id == self.node_id {
            return Err(RoutingError::InvalidParameter(
                "own id offered as peer".to_string(),
            ));
        }
        peer.bucket = self.bucket_index(&peer.node_id);

        let mut replaced = None;
        let events = {
            let mut inner = self.lock_inner();
            self.check_valid_parameters(&inner.nodes, &peer)?;

            if !self.check_range_for_node_to_be_added(&inner.nodes, &peer) {
                debug!(peer = %peer.node_id, "admission refused by range check");
                return Ok(AddResult::Rejected);
            }

            let old_unique = inner.group_matrix.unique_node_ids();
            let old_close = self.close_nodes_snapshot(&inner.nodes);

            if inner.nodes.len() >= self.max_size() {
                let Some(victim_index) = self.find_eviction_candidate(&inner.nodes) else {
                    debug!(peer = %peer.node_id, "table full and no incumbent is expendable");
                    return Ok(AddResult::Rejected);
                };
                let victim = inner.nodes.remove(victim_index);
                info!(peer = %victim.node_id, "displaced by a better-placed peer");
                inner.group_matrix.remove_connected_peer(&victim.node_id);
                replaced = Some(victim);
            }

            info!(peer = %peer.node_id, bucket = peer.bucket, "added to routing table");
            inner.nodes.push(peer.clone());
            inner.group_matrix.add_connected_peer(&peer);

            self.network_statistics.update_network_average_distance(
                &NodeId::from_bytes(self.node_id.distance(&peer.node_id)),
            );
            self.network_statistics.update_local_average_distance(
                &inner.group_matrix.unique_node_ids(),
                self.params.node_group_size,
            );

            self.write_events(&inner, old_close, old_unique)
        };

        self.fire_write_events(events);
        Ok(match replaced {
            Some(old) => AddResult::Replaced(old),
            None => AddResult::Added,
        })
    }

    /// Admission predicate without mutation
    pub fn check_node(&self, node: &NodeInfo) -> bool {
        if node.node_id.is_zero() || node.node_id == self.node_id {
            return false;
        }
        let mut candidate = node.clone();
        candidate.bucket = self.bucket_index(&candidate.node_id);
        let inner = self.lock_inner();
        self.check_valid_parameters(&inner.nodes, &candidate).is_ok()
            && self.check_range_for_node_to_be_added(&inner.nodes, &candidate)
    }

    /// Remove a peer by identity
    pub fn drop_node(&self, node_id: &NodeId) -> Result<NodeInfo> {
        let (node, events) = {
            let mut inner = self.lock_inner();
            let position = inner
                .nodes
                .iter()
                .position(|entry| entry.node_id == *node_id)
                .ok_or_else(|| {
                    RoutingError::NotFound(format!("no routing entry for {node_id}"))
                })?;

            let old_unique = inner.group_matrix.unique_node_ids();
            let old_close = self.close_nodes_snapshot(&inner.nodes);

            let node = inner.nodes.remove(position);
            inner.group_matrix.remove_connected_peer(node_id);
            self.network_statistics.update_local_average_distance(
                &inner.group_matrix.unique_node_ids(),
                self.params.node_group_size,
            );

            (node, self.write_events(&inner, old_close, old_unique))
        };

        info!(peer = %node.node_id, "dropped from routing table");
        self.fire_write_events(events);
        Ok(node)
    }

    /// Replace a connected peer's reported close group in the matrix
    pub fn update_group_from_connected_peer(&self, peer: &NodeId, close_group: &[NodeInfo]) {
        let events = {
            let mut inner = self.lock_inner();
            let old_unique = inner.group_matrix.unique_node_ids();
            let old_close = self.close_nodes_snapshot(&inner.nodes);

            inner.group_matrix.update_from_connected_peer(peer, close_group);
            self.network_statistics.update_local_average_distance(
                &inner.group_matrix.unique_node_ids(),
                self.params.node_group_size,
            );

            self.write_events(&inner, old_close, old_unique)
        };
        self.fire_write_events(events);
    }

    /// The `count` entries nearest to the target, sorted ascending by
    /// `id ⊕ target`
    pub fn closest_nodes(&self, target: &NodeId, count: usize) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = {
            let inner = self.lock_inner();
            inner.nodes.iter().map(|entry| entry.node_id).collect()
        };
        ids.sort_by_key(|id| id.distance(target));
        ids.truncate(count.min(ids.len()));
        ids
    }

    /// The `node_group_size − 1` entries nearest to this node
    ///
    /// Together with the owner itself these form the node's close group.
    pub fn our_close_group(&self) -> Vec<NodeInfo> {
        let mut nodes = { self.lock_inner().nodes.clone() };
        nodes.sort_by_key(|entry| entry.node_id.distance(&self.node_id));
        nodes.truncate(self.params.node_group_size.saturating_sub(1));
        nodes
    }

    /// The furthest member of the close neighbourhood
    ///
    /// Clients are admitted only while they sit strictly inside this radius.
    pub fn furthest_close_node(&self) -> Option<NodeInfo> {
        let mut nodes = { self.lock_inner().nodes.clone() };
        if nodes.is_empty() {
            return None;
        }
        nodes.sort_by_key(|entry| entry.node_id.distance(&self.node_id));
        let index = self.params.closest_nodes_size.min(nodes.len()) - 1;
        Some(nodes[index].clone())
    }

    /// Whether this node is among the first `range` nodes when the table plus
    /// the owner is ordered by proximity to the target
    pub fn is_this_node_in_range(&self, target: &NodeId, range: usize) -> bool {
        if range == 0 {
            return false;
        }
        let mut ids: Vec<NodeId> = {
            let inner = self.lock_inner();
            inner.nodes.iter().map(|entry| entry.node_id).collect()
        };
        if ids.len() < range {
            return true;
        }
        ids.sort_by_key(|id| id.distance(target));
        NodeId::closer_to_target(&self.node_id, &ids[range - 1], target)
    }

    /// In-range check against the slackened neighbourhood radius
    pub fn is_within_proximity_range(&self, target: &NodeId) -> bool {
        self.is_this_node_in_range(
            target,
            self.params.closest_nodes_size * self.params.proximity_factor,
        )
    }

    /// Whether a direct entry exists for the identity
    pub fn has_node(&self, node_id: &NodeId) -> bool {
        self.lock_inner()
            .nodes
            .iter()
            .any(|entry| entry.node_id == *node_id)
    }

    /// Whether the identity is reachable: a direct entry, or known through a
    /// connected peer's reported close group
    pub fn is_connected(&self, node_id: &NodeId) -> bool {
        let inner = self.lock_inner();
        inner.nodes.iter().any(|entry| entry.node_id == *node_id)
            || inner.group_matrix.contains(node_id)
    }

    /// The stored record for a directly connected peer
    pub fn get_node_info(&self, node_id: &NodeId) -> Option<NodeInfo> {
        self.lock_inner()
            .nodes
            .iter()
            .find(|entry| entry.node_id == *node_id)
            .cloned()
    }

    /// A uniformly chosen directly connected peer
    pub fn random_connected_node(&self) -> Option<NodeInfo> {
        let inner = self.lock_inner();
        if inner.nodes.is_empty() {
            return None;
        }
        let index = rand::thread_rng().gen_range(0..inner.nodes.len());
        Some(inner.nodes[index].clone())
    }

    /// Number of directly connected peers
    pub fn size(&self) -> usize {
        self.lock_inner().nodes.len()
    }

    /// Whether no peer is connected
    pub fn is_empty(&self) -> bool {
        self.lock_inner().nodes.is_empty()
    }

    /// Health percentage: table occupancy against the configured cap
    pub fn network_status(&self) -> i32 {
        let size = self.lock_inner().nodes.len();
        self.health_percentage(size)
    }

    /// Whether the target falls inside this node's group radius
    pub fn is_node_id_in_group_range(&self, target: &NodeId) -> bool {
        self.lock_inner().group_matrix.is_node_id_in_group_range(target)
    }

    /// Whether this node precedes every known unique node in the target's
    /// proximity order
    pub fn closest_to_id(&self, target: &NodeId) -> bool {
        self.lock_inner().group_matrix.closest_to_id(target)
    }

    /// Whether this node leads the target's group, with a forwarding hint
    /// when it does not
    pub fn is_this_node_group_leader(&self, target: &NodeId) -> (bool, Option<NodeId>) {
        self.lock_inner().group_matrix.is_this_node_group_leader(target)
    }

    /// The first connected peer whose reported group contains the target
    pub fn connected_peer_for(&self, target: &NodeId) -> Option<NodeInfo> {
        self.lock_inner().group_matrix.connected_peer_for(target)
    }

    /// IDs of every node in the derived second-order view
    pub fn group_matrix_unique_ids(&self) -> Vec<NodeId> {
        self.lock_inner().group_matrix.unique_node_ids()
    }

    /// A connected peer's reported close group
    pub fn group_matrix_row(&self, row_id: &NodeId) -> Option<Vec<NodeInfo>> {
        self.lock_inner().group_matrix.get_row(row_id)
    }

    fn max_size(&self) -> usize {
        if self.client_mode {
            self.params.max_routing_table_size_for_client
        } else {
            self.params.max_routing_table_size
        }
    }

    // Index of the most significant bit at which the IDs differ.
    fn bucket_index(&self, node_id: &NodeId) -> i32 {
        (8 * NODE_ID_SIZE as u32 - 1 - self.node_id.common_leading_bits(node_id)) as i32
    }

    fn check_valid_parameters(&self, nodes: &[NodeInfo], peer: &NodeInfo) -> Result<()> {
        debug_assert_ne!(peer.bucket, INVALID_BUCKET);
        if nodes.iter().any(|entry| entry.node_id == peer.node_id) {
            return Err(RoutingError::InvalidParameter(
                "node id already present".to_string(),
            ));
        }
        if nodes
            .iter()
            .any(|entry| entry.connection_id == peer.connection_id)
        {
            return Err(RoutingError::InvalidParameter(
                "connection id already present".to_string(),
            ));
        }
        if self.params.reject_duplicate_public_keys {
            if let Some(key) = &peer.public_key {
                if nodes.iter().any(|entry| {
                    entry.public_key.as_ref() == Some(key) && entry.node_id != peer.node_id
                }) {
                    return Err(RoutingError::InvalidParameter(
                        "public key already held under a different node id".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    fn check_range_for_node_to_be_added(&self, nodes: &[NodeInfo], peer: &NodeInfo) -> bool {
        if nodes.is_empty() {
            return true;
        }
        let bucket_occupancy = nodes
            .iter()
            .filter(|entry| entry.bucket == peer.bucket)
            .count();
        if bucket_occupancy < self.params.bucket_target_size {
            return true;
        }
        if self.is_within_closest(nodes, &peer.node_id) {
            return true;
        }
        nodes
            .iter()
            .filter(|entry| entry.bucket == peer.bucket)
            .any(|entry| NodeId::closer_to_target(&peer.node_id, &entry.node_id, &self.node_id))
    }

    fn is_within_closest(&self, nodes: &[NodeInfo], candidate: &NodeId) -> bool {
        if nodes.len() < self.params.closest_nodes_size {
            return true;
        }
        let mut distances: Vec<[u8; NODE_ID_SIZE]> = nodes
            .iter()
            .map(|entry| entry.node_id.distance(&self.node_id))
            .collect();
        distances.sort();
        candidate.distance(&self.node_id) < distances[self.params.closest_nodes_size - 1]
    }

    // Most-expendable incumbent: fullest bucket, slot furthest from the
    // owner, close neighbourhood exempt.
    fn find_eviction_candidate(&self, nodes: &[NodeInfo]) -> Option<usize> {
        let mut order: Vec<usize> = (0..nodes.len()).collect();
        order.sort_by_key(|&index| nodes[index].node_id.distance(&self.node_id));
        let protected: Vec<usize> = order
            .iter()
            .take(self.params.closest_nodes_size)
            .copied()
            .collect();

        let mut occupancy: HashMap<i32, usize> = HashMap::new();
        for node in nodes {
            *occupancy.entry(node.bucket).or_insert(0) += 1;
        }

        nodes
            .iter()
            .enumerate()
            .filter(|(index, _)| !protected.contains(index))
            .max_by_key(|(_, node)| (occupancy[&node.bucket], node.node_id.distance(&self.node_id)))
            .map(|(index, _)| index)
    }

    fn close_nodes_snapshot(&self, nodes: &[NodeInfo]) -> Vec<NodeInfo> {
        let mut sorted = nodes.to_vec();
        sorted.sort_by_key(|entry| entry.node_id.distance(&self.node_id));
        sorted.truncate(self.params.closest_nodes_size);
        sorted
    }

    fn write_events(
        &self,
        inner: &TableInner,
        old_close: Vec<NodeInfo>,
        old_unique: Vec<NodeId>,
    ) -> WriteEvents {
        let new_close = self.close_nodes_snapshot(&inner.nodes);
        let (close_added, close_removed) = diff_by_node_id(&old_close, &new_close);
        WriteEvents {
            status: self.health_percentage(inner.nodes.len()),
            close_added,
            close_removed,
            matrix_change: MatrixChange::new(old_unique, inner.group_matrix.unique_node_ids()),
        }
    }

    // Observers run outside the table lock; a re-entrant call back into the
    // core is permitted but discouraged.
    fn fire_write_events(&self, events: WriteEvents) {
        let functors = self.lock_functors().clone();
        if let Some(functor) = functors.network_status {
            functor(events.status);
        }
        if !events.close_added.is_empty() || !events.close_removed.is_empty() {
            if let Some(functor) = functors.close_node_replaced {
                functor(events.close_added, events.close_removed);
            }
        }
        if !events.matrix_change.is_unchanged() {
            if let Some(functor) = functors.matrix_changed {
                functor(events.matrix_change);
            }
        }
    }

    fn health_percentage(&self, size: usize) -> i32 {
        ((size * 100 / self.max_size()).min(100)) as i32
    }

    fn lock_inner(&self) -> MutexGuard<'_, TableInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_functors(&self) -> MutexGuard<'_, Functors> {
        self.functors.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn diff_by_node_id(old: &[NodeInfo], new: &[NodeInfo]) -> (Vec<NodeInfo>, Vec<NodeInfo>) {
    let added = new
        .iter()
        .filter(|entry| !old.iter().any(|other| other.node_id == entry.node_id))
        .cloned()
        .collect();
    let removed = old
        .iter()
        .filter(|entry| !new.iter().any(|other| other.node_id == entry.node_id))
        .cloned()
        .collect();
    (added, removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use vaultmesh_protocol::ConnectionId;

    fn id_with_msb(msb: u8) -> NodeId {
        let mut bytes = [0u8; NODE_ID_SIZE];
        bytes[0] = msb;
        NodeId::from_bytes(bytes)
    }

    fn node(node_id: NodeId) -> NodeInfo {
        NodeInfo::new(node_id, ConnectionId::random())
    }

    fn vault(own: NodeId, params: Parameters) -> RoutingTable {
        let statistics = Arc::new(NetworkStatistics::new(own));
        RoutingTable::new(false, own, params, statistics)
    }

    fn default_vault() -> RoutingTable {
        vault(NodeId::ZERO, Parameters::default())
    }

    #[test]
    fn test_bucket_assignment() {
        let table = default_vault();

        table.add_node(node(id_with_msb(0x80))).unwrap();
        table.add_node(node(id_with_msb(0x40))).unwrap();

        assert_eq!(table.get_node_info(&id_with_msb(0x80)).unwrap().bucket, 255);
        assert_eq!(table.get_node_info(&id_with_msb(0x40)).unwrap().bucket, 254);

        let closest = table.closest_nodes(&id_with_msb(0x80), 1);
        assert_eq!(closest, vec![id_with_msb(0x80)]);
    }

    #[test]
    fn test_reject_self_and_zero_id() {
        let table = default_vault();

        assert!(matches!(
            table.add_node(node(NodeId::ZERO)),
            Err(RoutingError::InvalidParameter(_))
        ));

        let table = vault(id_with_msb(0x11), Parameters::default());
        assert!(matches!(
            table.add_node(node(id_with_msb(0x11))),
            Err(RoutingError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_reject_duplicate_identifiers() {
        let table = default_vault();
        let first = node(id_with_msb(0x01));
        table.add_node(first.clone()).unwrap();

        // Same node id, fresh connection
        assert!(matches!(
            table.add_node(node(id_with_msb(0x01))),
            Err(RoutingError::InvalidParameter(_))
        ));

        // Fresh node id, same connection
        let mut second = node(id_with_msb(0x02));
        second.connection_id = first.connection_id;
        assert!(matches!(
            table.add_node(second),
            Err(RoutingError::InvalidParameter(_))
        ));

        assert_eq!(table.size(), 1);
    }

    #[test]
    fn test_duplicate_public_key_flag() {
        let key = SigningKey::generate(&mut rand::rngs::OsRng).verifying_key();

        let mut first = node(id_with_msb(0x01));
        first.public_key = Some(key);
        let mut second = node(id_with_msb(0x02));
        second.public_key = Some(key);

        let table = default_vault();
        table.add_node(first.clone()).unwrap();
        assert_eq!(table.add_node(second.clone()).unwrap(), AddResult::Added);

        let mut params = Parameters::default();
        params.reject_duplicate_public_keys = true;
        let strict = vault(NodeId::ZERO, params);
        strict.add_node(first).unwrap();
        assert!(matches!(
            strict.add_node(second),
            Err(RoutingError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_bucket_target_rejection_and_improvement() {
        let mut params = Parameters::default();
        params.closest_nodes_size = 1;
        params.bucket_target_size = 1;
        let table = vault(NodeId::ZERO, params);

        assert_eq!(table.add_node(node(id_with_msb(0x81))).unwrap(), AddResult::Added);

        // A different bucket always has room
        assert_eq!(table.add_node(node(id_with_msb(0x40))).unwrap(), AddResult::Added);

        // Same bucket as 0x81, further out, not in the close neighbourhood
        assert_eq!(
            table.add_node(node(id_with_msb(0x82))).unwrap(),
            AddResult::Rejected
        );

        // Same bucket, still outside the neighbourhood (0x40 is nearer), but
        // improves the bucket's furthest slot
        assert_eq!(table.add_node(node(id_with_msb(0x80))).unwrap(), AddResult::Added);
    }

    #[test]
    fn test_eviction_when_full() {
        let mut params = Parameters::default();
        params.max_routing_table_size = 4;
        params.closest_nodes_size = 2;
        params.node_group_size = 2;
        let table = vault(NodeId::ZERO, params);

        for msb in [0x80u8, 0x40, 0x20, 0x10] {
            assert_eq!(table.add_node(node(id_with_msb(msb))).unwrap(), AddResult::Added);
        }
        assert_eq!(table.size(), 4);

        // New bucket, closer than the furthest incumbent
        let result = table.add_node(node(id_with_msb(0x08))).unwrap();
        match result {
            AddResult::Replaced(old) => assert_eq!(old.node_id, id_with_msb(0x80)),
            other => panic!("expected replacement, got {other:?}"),
        }
        assert_eq!(table.size(), 4);
        assert!(table.has_node(&id_with_msb(0x08)));
        assert!(!table.has_node(&id_with_msb(0x80)));
    }

    #[test]
    fn test_full_table_with_no_expendable_incumbent() {
        let mut params = Parameters::default();
        params.max_routing_table_size = 2;
        params.closest_nodes_size = 2;
        let table = vault(NodeId::ZERO, params);

        table.add_node(node(id_with_msb(0x10))).unwrap();
        table.add_node(node(id_with_msb(0x20))).unwrap();

        // Admissible by range, but both incumbents are close-neighbourhood
        assert_eq!(
            table.add_node(node(id_with_msb(0x08))).unwrap(),
            AddResult::Rejected
        );
        assert_eq!(table.size(), 2);
    }

    #[test]
    fn test_check_node_does_not_mutate() {
        let table = default_vault();
        assert!(table.check_node(&node(id_with_msb(0x01))));
        assert_eq!(table.size(), 0);

        table.add_node(node(id_with_msb(0x01))).unwrap();
        assert!(!table.check_node(&node(id_with_msb(0x01))));
    }

    #[test]
    fn test_drop_node() {
        let table = default_vault();
        table.add_node(node(id_with_msb(0x01))).unwrap();

        let dropped = table.drop_node(&id_with_msb(0x01)).unwrap();
        assert_eq!(dropped.node_id, id_with_msb(0x01));
        assert!(table.is_empty());

        assert!(matches!(
            table.drop_node(&id_with_msb(0x01)),
            Err(RoutingError::NotFound(_))
        ));
    }

    #[test]
    fn test_closest_nodes_sorted_and_clamped() {
        let table = default_vault();
        for _ in 0..20 {
            let _ = table.add_node(node(NodeId::random()));
        }
        let population = table.size();
        let target = NodeId::random();

        let closest = table.closest_nodes(&target, 8);
        assert_eq!(closest.len(), 8.min(population));
        for pair in closest.windows(2) {
            assert!(pair[0].distance(&target) <= pair[1].distance(&target));
        }
        for id in &closest {
            assert!(table.has_node(id));
        }

        // Clamped to the population when asked for more
        assert_eq!(table.closest_nodes(&target, 1000).len(), population);
    }

    #[test]
    fn test_our_close_group() {
        let table = default_vault();
        for msb in 1..=8u8 {
            table.add_node(node(id_with_msb(msb))).unwrap();
        }

        let group = table.our_close_group();
        // node_group_size - 1 entries, nearest first
        assert_eq!(group.len(), 3);
        assert_eq!(group[0].node_id, id_with_msb(0x01));
        assert_eq!(group[2].node_id, id_with_msb(0x03));
    }

    #[test]
    fn test_furthest_close_node() {
        let table = default_vault();
        assert!(table.furthest_close_node().is_none());

        for msb in 1..=10u8 {
            let _ = table.add_node(node(id_with_msb(msb)));
        }
        // Eight admitted entries closest to zero start at 0x01
        let furthest = table.furthest_close_node().unwrap();
        assert_eq!(furthest.node_id, id_with_msb(0x08));
    }

    #[test]
    fn test_is_this_node_in_range() {
        let table = default_vault();
        for msb in [0x10u8, 0x20, 0x30, 0x40] {
            table.add_node(node(id_with_msb(msb))).unwrap();
        }

        // Sparse table: everything is in range
        assert!(table.is_this_node_in_range(&id_with_msb(0x70), 8));

        // Own id (zero) is nearer to 0x08 than all but none of the entries
        assert!(table.is_this_node_in_range(&id_with_msb(0x08), 2));
        // For a target sitting amid the entries we are last
        assert!(!table.is_this_node_in_range(&id_with_msb(0x30), 2));
        assert!(!table.is_this_node_in_range(&id_with_msb(0x30), 0));
    }

    #[test]
    fn test_is_connected_sees_second_order_nodes() {
        let table = default_vault();
        let peer = id_with_msb(0x01);
        table.add_node(node(peer)).unwrap();
        table.update_group_from_connected_peer(&peer, &[node(id_with_msb(0x77))]);

        assert!(table.has_node(&peer));
        assert!(!table.has_node(&id_with_msb(0x77)));
        assert!(table.is_connected(&peer));
        assert!(table.is_connected(&id_with_msb(0x77)));
        assert!(!table.is_connected(&id_with_msb(0x66)));
    }

    #[test]
    fn test_random_connected_node() {
        let table = default_vault();
        assert!(table.random_connected_node().is_none());

        table.add_node(node(id_with_msb(0x01))).unwrap();
        table.add_node(node(id_with_msb(0x02))).unwrap();
        let picked = table.random_connected_node().unwrap();
        assert!(table.has_node(&picked.node_id));
    }

    #[test]
    fn test_network_status_percentage() {
        let mut params = Parameters::default();
        params.max_routing_table_size = 4;
        let table = vault(NodeId::ZERO, params);

        assert_eq!(table.network_status(), 0);
        table.add_node(node(id_with_msb(0x80))).unwrap();
        assert_eq!(table.network_status(), 25);
        table.add_node(node(id_with_msb(0x40))).unwrap();
        assert_eq!(table.network_status(), 50);
    }

    #[test]
    fn test_functors_observe_write() {
        use std::sync::Mutex as StdMutex;

        let table = default_vault();

        let statuses: Arc<StdMutex<Vec<i32>>> = Arc::new(StdMutex::new(Vec::new()));
        let changes: Arc<StdMutex<Vec<MatrixChange>>> = Arc::new(StdMutex::new(Vec::new()));
        let close_events: Arc<StdMutex<Vec<(usize, usize)>>> = Arc::new(StdMutex::new(Vec::new()));

        let captured = statuses.clone();
        table.set_network_status_functor(Arc::new(move |health| {
            captured.lock().unwrap().push(health);
        }));
        let captured = changes.clone();
        table.set_matrix_changed_functor(Arc::new(move |change| {
            captured.lock().unwrap().push(change);
        }));
        let captured = close_events.clone();
        table.set_close_node_replaced_functor(Arc::new(move |added, removed| {
            captured.lock().unwrap().push((added.len(), removed.len()));
        }));

        table.add_node(node(id_with_msb(0x01))).unwrap();
        table.drop_node(&id_with_msb(0x01)).unwrap();

        let statuses = statuses.lock().unwrap();
        assert_eq!(*statuses, vec![1, 0]);

        let changes = changes.lock().unwrap();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].gained_nodes(), vec![id_with_msb(0x01)]);
        assert_eq!(changes[1].lost_nodes(), vec![id_with_msb(0x01)]);

        let close_events = close_events.lock().unwrap();
        assert_eq!(*close_events, vec![(1, 0), (0, 1)]);
    }

    #[test]
    fn test_client_mode_uses_reduced_cap() {
        let mut params = Parameters::default();
        params.max_routing_table_size_for_client = 2;
        params.closest_nodes_size = 2;
        let statistics = Arc::new(NetworkStatistics::new(NodeId::ZERO));
        let table = RoutingTable::new(true, NodeId::ZERO, params, statistics);

        table.add_node(node(id_with_msb(0x10))).unwrap();
        table.add_node(node(id_with_msb(0x20))).unwrap();
        assert_eq!(
            table.add_node(node(id_with_msb(0x08))).unwrap(),
            AddResult::Rejected
        );
        assert_eq!(table.size(), 2);

        // A client never appears in its own derived view
        assert!(!table.group_matrix_unique_ids().contains(&NodeId::ZERO));
    }

    #[test]
    fn test_add_updates_network_statistics() {
        let statistics = Arc::new(NetworkStatistics::new(NodeId::ZERO));
        let table = RoutingTable::new(false, NodeId::ZERO, Parameters::default(), statistics.clone());

        table.add_node(node(id_with_msb(0x80))).unwrap();

        let data = statistics.network_distance_data();
        assert_eq!(data.contributors_count, 1);
        assert!(statistics.estimate_in_group(&id_with_msb(0x80), &NodeId::ZERO));
    }
}
