//! Vault-side index of attached client nodes
//!
//! Clients consume routing but accept no routing duties: they never relay,
//! belong to no group, and must fall inside the vault's close group to stay
//! attached. They are kept apart from the vault's own peers because the
//! bucket and admission invariants of the main table do not apply to them.

use crate::error::{Result, RoutingError};
use crate::node_info::{NodeInfo, INVALID_BUCKET};
use crate::parameters::Parameters;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};
use vaultmesh_protocol::{ConnectionId, NodeId};

/// Index of clients attached to this vault
///
/// Several entries may share one `node_id` (a user identity running on
/// several devices); connection handles are always unique.
pub struct ClientRoutingTable {
    node_id: NodeId,
    params: Parameters,
    nodes: Mutex<Vec<NodeInfo>>,
}

impl ClientRoutingTable {
    /// Create an empty client table for the vault with the given identity
    pub fn new(node_id: NodeId, params: Parameters) -> Self {
        ClientRoutingTable {
            node_id,
            params,
            nodes: Mutex::new(Vec::new()),
        }
    }

    /// The owning vault's identity
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Admit a client that lies within this vault's close group
    ///
    /// `furthest_close_node_id` is the current furthest member of the vault's
    /// close group; the client must sit strictly inside that radius.
    pub fn add_node(&self, node: NodeInfo, furthest_close_node_id: &NodeId) -> Result<()> {
        if node.node_id == self.node_id {
            return Err(RoutingError::InvalidParameter(
                "own node id offered as client".to_string(),
            ));
        }
        let mut nodes = self.lock();
        if nodes.len() >= self.params.max_client_routing_table_size {
            return Err(RoutingError::CapacityExceeded {
                size: nodes.len(),
                max: self.params.max_client_routing_table_size,
            });
        }
        check_valid_parameters(&nodes, &node, self.params.reject_duplicate_public_keys)?;
        if !self.is_within_close_range(&node.node_id, furthest_close_node_id) {
            return Err(RoutingError::OutOfRange);
        }

        info!(client = %node.node_id, connection = %node.connection_id, "added to client routing table");
        nodes.push(node);
        Ok(())
    }

    /// Admission predicate without mutation
    ///
    /// Checks capacity and range only; uniqueness of the connection handle is
    /// validated at admission time.
    pub fn check_node(&self, node: &NodeInfo, furthest_close_node_id: &NodeId) -> bool {
        if node.node_id == self.node_id {
            return false;
        }
        let nodes = self.lock();
        nodes.len() < self.params.max_client_routing_table_size
            && self.is_within_close_range(&node.node_id, furthest_close_node_id)
    }

    /// Remove and return every entry carrying the given identity
    pub fn drop_nodes(&self, node_to_drop: &NodeId) -> Vec<NodeInfo> {
        let mut nodes = self.lock();
        let mut dropped = Vec::new();
        nodes.retain(|entry| {
            if entry.node_id == *node_to_drop {
                dropped.push(entry.clone());
                false
            } else {
                true
            }
        });
        dropped
    }

    /// Remove the single entry attached over the given connection
    pub fn drop_connection(&self, connection_to_drop: &ConnectionId) -> Option<NodeInfo> {
        let mut nodes = self.lock();
        let position = nodes
            .iter()
            .position(|entry| entry.connection_id == *connection_to_drop)?;
        Some(nodes.remove(position))
    }

    /// All entries carrying the given identity
    pub fn get_nodes_info(&self, node_id: &NodeId) -> Vec<NodeInfo> {
        self.lock()
            .iter()
            .filter(|entry| entry.node_id == *node_id)
            .cloned()
            .collect()
    }

    /// Whether any entry carries the given identity
    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.lock().iter().any(|entry| entry.node_id == *node_id)
    }

    /// Alias of [`contains`] for upstream symmetry with the vault table
    ///
    /// [`contains`]: ClientRoutingTable::contains
    pub fn is_connected(&self, node_id: &NodeId) -> bool {
        self.contains(node_id)
    }

    /// Number of attached clients
    pub fn size(&self) -> usize {
        self.lock().len()
    }

    /// Whether no client is attached
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // Strict inequality: a client exactly on the close-group boundary is out.
    fn is_within_close_range(&self, node_id: &NodeId, furthest_close_node_id: &NodeId) -> bool {
        if furthest_close_node_id == node_id {
            debug!(client = %node_id, "client id equals the close-group boundary");
            return false;
        }
        furthest_close_node_id.distance(&self.node_id) > node_id.distance(&self.node_id)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<NodeInfo>> {
        self.nodes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn check_valid_parameters(
    nodes: &[NodeInfo],
    node: &NodeInfo,
    reject_duplicate_public_keys: bool,
) -> Result<()> {
    // Bucket indices belong to the vault table only
    if node.bucket != INVALID_BUCKET {
        return Err(RoutingError::InvalidParameter(
            "client entries carry no bucket index".to_string(),
        ));
    }
    if nodes
        .iter()
        .any(|entry| entry.connection_id == node.connection_id)
    {
        return Err(RoutingError::InvalidParameter(
            "connection id already present".to_string(),
        ));
    }
    if reject_duplicate_public_keys {
        if let Some(key) = &node.public_key {
            if nodes
                .iter()
                .any(|entry| entry.public_key.as_ref() == Some(key) && entry.node_id != node.node_id)
            {
                return Err(RoutingError::InvalidParameter(
                    "public key already held under a different node id".to_string(),
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use vaultmesh_protocol::types::NODE_ID_SIZE;

    fn id_with_msb(msb: u8) -> NodeId {
        let mut bytes = [0u8; NODE_ID_SIZE];
        bytes[0] = msb;
        NodeId::from_bytes(bytes)
    }

    fn client(msb: u8) -> NodeInfo {
        NodeInfo::new(id_with_msb(msb), ConnectionId::random())
    }

    fn vault_table() -> ClientRoutingTable {
        ClientRoutingTable::new(id_with_msb(0x00), Parameters::default())
    }

    #[test]
    fn test_add_client_inside_close_group() {
        let table = vault_table();
        let furthest = id_with_msb(0x10);

        assert!(table.add_node(client(0x01), &furthest).is_ok());
        assert_eq!(table.size(), 1);
        assert!(table.contains(&id_with_msb(0x01)));
        assert!(table.is_connected(&id_with_msb(0x01)));
    }

    #[test]
    fn test_reject_client_outside_close_group() {
        let table = vault_table();
        let furthest = id_with_msb(0x10);

        assert_eq!(
            table.add_node(client(0x20), &furthest),
            Err(RoutingError::OutOfRange)
        );
        assert!(table.is_empty());
    }

    #[test]
    fn test_reject_client_on_boundary() {
        // Equal distance to the boundary means equal id; strictness demands
        // rejection rather than admission.
        let table = vault_table();
        let furthest = id_with_msb(0x10);

        assert_eq!(
            table.add_node(client(0x10), &furthest),
            Err(RoutingError::OutOfRange)
        );
    }

    #[test]
    fn test_reject_own_id() {
        let table = vault_table();
        assert!(matches!(
            table.add_node(client(0x00), &id_with_msb(0x10)),
            Err(RoutingError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_reject_duplicate_connection_id() {
        let table = vault_table();
        let furthest = id_with_msb(0x10);
        let first = client(0x01);
        let mut second = client(0x02);
        second.connection_id = first.connection_id;

        table.add_node(first, &furthest).unwrap();
        assert!(matches!(
            table.add_node(second, &furthest),
            Err(RoutingError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_reject_assigned_bucket() {
        let table = vault_table();
        let mut node = client(0x01);
        node.bucket = 42;

        assert!(matches!(
            table.add_node(node, &id_with_msb(0x10)),
            Err(RoutingError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_capacity_limit() {
        let mut params = Parameters::default();
        params.max_client_routing_table_size = 2;
        let table = ClientRoutingTable::new(id_with_msb(0x00), params);
        let furthest = id_with_msb(0x10);

        table.add_node(client(0x01), &furthest).unwrap();
        table.add_node(client(0x02), &furthest).unwrap();
        assert_eq!(
            table.add_node(client(0x03), &furthest),
            Err(RoutingError::CapacityExceeded { size: 2, max: 2 })
        );
    }

    #[test]
    fn test_check_node_does_not_mutate() {
        let table = vault_table();
        let furthest = id_with_msb(0x10);

        assert!(table.check_node(&client(0x01), &furthest));
        assert!(!table.check_node(&client(0x20), &furthest));
        assert_eq!(table.size(), 0);
    }

    #[test]
    fn test_shared_identity_on_two_connections() {
        let table = vault_table();
        let furthest = id_with_msb(0x10);
        let node_id = id_with_msb(0x01);

        table
            .add_node(NodeInfo::new(node_id, ConnectionId::random()), &furthest)
            .unwrap();
        table
            .add_node(NodeInfo::new(node_id, ConnectionId::random()), &furthest)
            .unwrap();

        assert_eq!(table.size(), 2);
        assert_eq!(table.get_nodes_info(&node_id).len(), 2);
    }

    #[test]
    fn test_drop_nodes_removes_every_device() {
        let table = vault_table();
        let furthest = id_with_msb(0x10);
        let node_id = id_with_msb(0x01);

        table
            .add_node(NodeInfo::new(node_id, ConnectionId::random()), &furthest)
            .unwrap();
        table
            .add_node(NodeInfo::new(node_id, ConnectionId::random()), &furthest)
            .unwrap();
        table.add_node(client(0x02), &furthest).unwrap();

        let dropped = table.drop_nodes(&node_id);
        assert_eq!(dropped.len(), 2);
        assert_eq!(table.size(), 1);
        assert!(!table.contains(&node_id));
    }

    #[test]
    fn test_drop_connection_removes_single_device() {
        let table = vault_table();
        let furthest = id_with_msb(0x10);
        let node_id = id_with_msb(0x01);
        let first_connection = ConnectionId::random();

        table
            .add_node(NodeInfo::new(node_id, first_connection), &furthest)
            .unwrap();
        table
            .add_node(NodeInfo::new(node_id, ConnectionId::random()), &furthest)
            .unwrap();

        let dropped = table.drop_connection(&first_connection).unwrap();
        assert_eq!(dropped.connection_id, first_connection);
        assert_eq!(table.size(), 1);
        assert!(table.contains(&node_id));

        assert!(table.drop_connection(&first_connection).is_none());
    }

    #[test]
    fn test_duplicate_public_key_flag() {
        let furthest = id_with_msb(0x10);
        let key = SigningKey::generate(&mut rand::rngs::OsRng).verifying_key();

        let mut first = client(0x01);
        first.public_key = Some(key);
        let mut second = client(0x02);
        second.public_key = Some(key);

        // Default policy admits the shared key
        let table = vault_table();
        table.add_node(first.clone(), &furthest).unwrap();
        table.add_node(second.clone(), &furthest).unwrap();

        // Strict policy rejects it
        let mut params = Parameters::default();
        params.reject_duplicate_public_keys = true;
        let strict = ClientRoutingTable::new(id_with_msb(0x00), params);
        strict.add_node(first, &furthest).unwrap();
        assert!(matches!(
            strict.add_node(second, &furthest),
            Err(RoutingError::InvalidParameter(_))
        ));
    }
}
