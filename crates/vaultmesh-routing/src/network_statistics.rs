//! Running estimates of the overlay's distance geometry
//!
//! XOR distances span the full 256-bit range, so the running totals use
//! 512-bit arithmetic: 2^64 contributions of less than 2^256 each cannot
//! overflow a `U512` accumulator.

use primitive_types::{U256, U512};
use std::sync::{Mutex, MutexGuard, PoisonError};
use vaultmesh_protocol::NodeId;

/// Accumulated distance observations across the whole network
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkDistanceData {
    /// Number of distance observations folded into the total
    pub contributors_count: u64,

    /// Sum of all observed distances
    pub total_distance: U512,

    /// `total_distance / contributors_count`
    pub average_distance: U256,
}

struct StatisticsInner {
    /// XOR distance to the `node_group_size`-th closest unique node
    distance: U256,
    network_distance_data: NetworkDistanceData,
}

/// Thread-safe distance statistics shared with the routing table
pub struct NetworkStatistics {
    node_id: NodeId,
    inner: Mutex<StatisticsInner>,
}

impl NetworkStatistics {
    /// Create statistics for the node with the given identity
    pub fn new(node_id: NodeId) -> Self {
        NetworkStatistics {
            node_id,
            inner: Mutex::new(StatisticsInner {
                distance: U256::zero(),
                network_distance_data: NetworkDistanceData::default(),
            }),
        }
    }

    /// Fold one observed XOR distance into the running network average
    pub fn update_network_average_distance(&self, distance: &NodeId) {
        let mut inner = self.lock();
        let observed = U256::from_big_endian(distance.as_bytes());
        let data = &mut inner.network_distance_data;
        data.total_distance += U512::from(observed);
        data.contributors_count += 1;
        let average = data.total_distance / U512::from(data.contributors_count);
        data.average_distance = U256::try_from(average).unwrap_or(U256::MAX);
    }

    /// Recompute the local group radius from the current unique-node set
    ///
    /// The radius is the distance to the `node_group_size`-th closest unique
    /// node, or to the furthest known node while the set is smaller than a
    /// full group. An empty set leaves the previous radius in place.
    pub fn update_local_average_distance(&self, unique_ids: &[NodeId], node_group_size: usize) {
        if unique_ids.is_empty() || node_group_size == 0 {
            return;
        }
        let mut sorted = unique_ids.to_vec();
        sorted.sort_by_key(|id| id.distance(&self.node_id));
        let index = node_group_size.min(sorted.len()) - 1;
        let radius = self.node_id.distance(&sorted[index]);

        let mut inner = self.lock();
        inner.distance = U256::from_big_endian(&radius);
    }

    /// Estimate whether a node sits in the replication group of a target
    ///
    /// True iff the XOR distance between the two does not exceed the current
    /// group radius.
    pub fn estimate_in_group(&self, node_id: &NodeId, target: &NodeId) -> bool {
        let separation = U256::from_big_endian(&node_id.distance(target));
        separation <= self.lock().distance
    }

    /// Current group radius
    pub fn distance(&self) -> U256 {
        self.lock().distance
    }

    /// Snapshot of the accumulated network distance data
    pub fn network_distance_data(&self) -> NetworkDistanceData {
        self.lock().network_distance_data.clone()
    }

    fn lock(&self) -> MutexGuard<'_, StatisticsInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
