//! Configuration constants for the routing core
//!
//! All capacity and group-size constants are carried as an immutable value
//! handed to each table at construction time. Tests construct tables with
//! overridden values instead of mutating shared state.

use serde::{Deserialize, Serialize};

/// Tuning constants shared by the routing tables and the group matrix
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameters {
    /// Maximum directly connected peers for a vault
    pub max_routing_table_size: usize,

    /// Maximum directly connected peers for a client node
    pub max_routing_table_size_for_client: usize,

    /// Maximum attached clients a vault will index
    pub max_client_routing_table_size: usize,

    /// Soft cap on entries per k-bucket
    pub bucket_target_size: usize,

    /// Size of the close neighbourhood (nearest directly connected peers)
    pub closest_nodes_size: usize,

    /// Replication group size
    pub node_group_size: usize,

    /// Slack multiplier applied to the close-neighbourhood size when deciding
    /// whether this node still sits in the extended range of a target
    pub proximity_factor: usize,

    /// Reject a public key already held under a different node ID
    ///
    /// Off by default: the network has historically admitted a key appearing
    /// under several identities (one user keying several nodes). Turning this
    /// on restores the strict one-key-one-identity rule for both the vault
    /// table and the client table.
    pub reject_duplicate_public_keys: bool,
}

impl Default for Parameters {
    fn default() -> Self {
        Parameters {
            max_routing_table_size: 64,
            max_routing_table_size_for_client: 8,
            max_client_routing_table_size: 8,
            bucket_target_size: 1,
            closest_nodes_size: 8,
            node_group_size: 4,
            proximity_factor: 2,
            reject_duplicate_public_keys: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let params = Parameters::default();
        assert_eq!(params.max_routing_table_size, 64);
        assert_eq!(params.max_routing_table_size_for_client, 8);
        assert_eq!(params.max_client_routing_table_size, 8);
        assert_eq!(params.bucket_target_size, 1);
        assert_eq!(params.closest_nodes_size, 8);
        assert_eq!(params.node_group_size, 4);
        assert_eq!(params.proximity_factor, 2);
        assert!(!params.reject_duplicate_public_keys);
    }

    #[test]
    fn test_group_fits_in_neighbourhood() {
        let params = Parameters::default();
        assert!(params.node_group_size <= params.closest_nodes_size);
        assert!(params.closest_nodes_size <= params.max_routing_table_size);
    }
}
