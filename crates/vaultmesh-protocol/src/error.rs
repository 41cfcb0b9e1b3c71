//! Error types for protocol operations

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Invalid hex encoding: {0}")]
    InvalidHex(String),

    #[error("Invalid ID length: expected {expected}, got {got}")]
    InvalidLength { expected: usize, got: usize },
}
