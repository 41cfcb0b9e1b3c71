//! Routing core error types

use thiserror::Error;

/// Routing-specific errors
///
/// Nothing in the core panics across its boundary: admission and drop
/// operations surface these as values, and queries return options or empty
/// collections on absence.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RoutingError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Capacity exceeded: {size} entries (max {max})")]
    CapacityExceeded { size: usize, max: usize },

    #[error("Node lies outside the close-group range")]
    OutOfRange,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal invariant violated: {0}")]
    Unreachable(&'static str),
}

/// Result type for routing operations
pub type Result<T> = std::result::Result<T, RoutingError>;
