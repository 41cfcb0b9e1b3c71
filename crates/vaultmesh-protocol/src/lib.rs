//! VaultMesh Protocol Module
//!
//! This module defines the identity primitives shared by every layer of the
//! VaultMesh overlay network: node identifiers with XOR-metric algebra,
//! transport connection handles, and NAT classification.

pub mod error;
pub mod types;

pub use error::{ProtocolError, Result};
pub use types::{ConnectionId, NatType, NodeId};
