//! Peer records held by the routing tables

use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use vaultmesh_protocol::types::NODE_ID_SIZE;
use vaultmesh_protocol::{ConnectionId, NatType, NodeId};

/// Bucket value for entries that have not been assigned one
///
/// Client-table entries keep this value permanently; vault-table entries are
/// assigned a real bucket during admission.
pub const INVALID_BUCKET: i32 = -1;

/// Information about a directly connected peer
///
/// Two records describe the same peer iff their `node_id` matches. The
/// `connection_id` is an opaque transport handle: the core stores it for
/// correlation but never owns or closes the connection it names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Node identifier (32 bytes)
    pub node_id: NodeId,

    /// Handle of the transport connection to this peer
    pub connection_id: ConnectionId,

    /// Public key, when the identity layer has supplied one
    pub public_key: Option<VerifyingKey>,

    /// Index of the most significant bit at which this peer's ID differs
    /// from the owner's, or `INVALID_BUCKET` before assignment
    pub bucket: i32,

    /// NAT classification reported by the transport
    pub nat_type: NatType,
}

impl NodeInfo {
    /// Create a new peer record with no bucket assigned
    pub fn new(node_id: NodeId, connection_id: ConnectionId) -> Self {
        NodeInfo {
            node_id,
            connection_id,
            public_key: None,
            bucket: INVALID_BUCKET,
            nat_type: NatType::Unknown,
        }
    }

    /// Calculate XOR distance to another node
    pub fn distance_to(&self, other: &NodeId) -> [u8; NODE_ID_SIZE] {
        self.node_id.distance(other)
    }
}
