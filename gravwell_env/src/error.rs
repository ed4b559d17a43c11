//! Error types for the Gravwell environment abstraction.

use thiserror::Error;

/// Errors that can occur in the environment abstraction layer.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Network send failed (buffer full, connection closed, etc.)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Target node is unreachable (simulated partition)
    #[error("Node unreachable: {0}")]
    NodeUnreachable(String),

    /// Packet serialization/deserialization failed
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// The transport was shut down
    #[error("Transport disconnected")]
    Disconnected,
}

impl EnvError {
    /// Creates a network error.
    pub fn network(msg: impl Into<String>) -> Self {
        Self::NetworkError(msg.into())
    }

    /// Creates an unreachable error.
    pub fn unreachable(node: impl std::fmt::Display) -> Self {
        Self::NodeUnreachable(node.to_string())
    }

    /// Creates a serialization error.
    pub fn serialization(msg: impl std::fmt::Display) -> Self {
        Self::SerializationError(msg.to_string())
    }
}
