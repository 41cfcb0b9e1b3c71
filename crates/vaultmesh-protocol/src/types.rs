//! Core identity types

use crate::error::{ProtocolError, Result};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Size of a node ID in bytes (32 bytes / 256 bits)
pub const NODE_ID_SIZE: usize = 32;

/// A unique identifier for a node in the VaultMesh overlay
///
/// Identifiers are opaque fixed-width big-endian integers. All proximity
/// reasoning in the overlay is based on the XOR metric: the distance between
/// two nodes is the bitwise XOR of their identifiers interpreted as an
/// unsigned integer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct NodeId([u8; NODE_ID_SIZE]);

impl NodeId {
    /// The all-zero sentinel; never a valid peer identity
    pub const ZERO: NodeId = NodeId([0u8; NODE_ID_SIZE]);

    /// Create a NodeId from a byte array
    pub fn from_bytes(bytes: [u8; NODE_ID_SIZE]) -> Self {
        NodeId(bytes)
    }

    /// Get the bytes of this NodeId
    pub fn as_bytes(&self) -> &[u8; NODE_ID_SIZE] {
        &self.0
    }

    /// Generate a uniformly random NodeId
    pub fn random() -> Self {
        let mut bytes = [0u8; NODE_ID_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        NodeId(bytes)
    }

    /// Check whether this is the zero sentinel
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&byte| byte == 0)
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| ProtocolError::InvalidHex(e.to_string()))?;

        if bytes.len() != NODE_ID_SIZE {
            return Err(ProtocolError::InvalidLength {
                expected: NODE_ID_SIZE,
                got: bytes.len(),
            });
        }

        let mut arr = [0u8; NODE_ID_SIZE];
        arr.copy_from_slice(&bytes);
        Ok(NodeId(arr))
    }

    /// Calculate XOR distance to another node ID
    pub fn distance(&self, other: &NodeId) -> [u8; NODE_ID_SIZE] {
        let mut result = [0u8; NODE_ID_SIZE];
        for (i, item) in result.iter_mut().enumerate() {
            *item = self.0[i] ^ other.0[i];
        }
        result
    }

    /// Strict XOR-metric order with respect to a pivot
    ///
    /// Returns true iff `(lhs ^ target) < (rhs ^ target)`. Distinct
    /// identifiers always have distinct distances to the same target, but the
    /// order is kept total by falling back to raw byte order when the
    /// distances compare equal.
    pub fn closer_to_target(lhs: &NodeId, rhs: &NodeId, target: &NodeId) -> bool {
        for i in 0..NODE_ID_SIZE {
            let lhs_dist = lhs.0[i] ^ target.0[i];
            let rhs_dist = rhs.0[i] ^ target.0[i];
            if lhs_dist != rhs_dist {
                return lhs_dist < rhs_dist;
            }
        }
        lhs.0 < rhs.0
    }

    /// Number of leading bits this ID shares with another
    ///
    /// Equal identifiers share all `8 * NODE_ID_SIZE` bits. The k-bucket index
    /// of a peer is `(8 * NODE_ID_SIZE - 1) - common_leading_bits`, so peers
    /// differing in the most significant bit land in the highest bucket.
    pub fn common_leading_bits(&self, other: &NodeId) -> u32 {
        for (byte_idx, (lhs, rhs)) in self.0.iter().zip(other.0.iter()).enumerate() {
            let diff = lhs ^ rhs;
            if diff != 0 {
                return byte_idx as u32 * 8 + diff.leading_zeros();
            }
        }
        NODE_ID_SIZE as u32 * 8
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.to_hex())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

/// Opaque handle naming a transport-managed connection
///
/// The transport names every established connection with its own 256-bit
/// identifier. The overlay core stores the handle for correlation but never
/// owns or closes the underlying connection.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(NodeId);

impl ConnectionId {
    /// Create from an identifier issued by the transport
    pub fn from_node_id(id: NodeId) -> Self {
        ConnectionId(id)
    }

    /// Generate a random connection handle
    pub fn random() -> Self {
        ConnectionId(NodeId::random())
    }

    /// The underlying identifier
    pub fn as_node_id(&self) -> &NodeId {
        &self.0
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionId({})", self.0.to_hex())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// NAT classification reported by the transport for a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum NatType {
    /// Publicly reachable, no translation
    Direct = 0x01,
    /// Full-cone NAT
    FullCone = 0x02,
    /// Address/port restricted NAT
    Restricted = 0x03,
    /// Symmetric NAT
    Symmetric = 0x04,
    /// Not yet determined
    Unknown = 0xFF,
}

impl NatType {
    /// Create NAT type from u8
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x01 => NatType::Direct,
            0x02 => NatType::FullCone,
            0x03 => NatType::Restricted,
            0x04 => NatType::Symmetric,
            _ => NatType::Unknown,
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            NatType::Direct => "Direct",
            NatType::FullCone => "Full-cone NAT",
            NatType::Restricted => "Restricted NAT",
            NatType::Symmetric => "Symmetric NAT",
            NatType::Unknown => "Unknown",
        }
    }
}

impl Default for NatType {
    fn default() -> Self {
        NatType::Unknown
    }
}
