//! Common types for the Gravwell environment abstraction.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a node on the transport (a peer or the authority).
///
/// Uses UUID v4 for global uniqueness without coordination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    /// Creates a new random NodeId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a NodeId from a UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Creates a deterministic NodeId from a seed (for simulation).
    pub fn from_seed(seed: u64) -> Self {
        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&seed.to_le_bytes());
        bytes[8..16].copy_from_slice(&seed.wrapping_mul(0x517cc1b727220a95).to_le_bytes());
        Self(Uuid::from_bytes(bytes))
    }

    /// Returns the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // First 8 chars are enough to tell nodes apart in logs
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Envelope for packets transmitted between nodes.
///
/// The transport never looks inside `payload`; the session layer encodes
/// and decodes protocol messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacketEnvelope {
    /// Encoded protocol message
    pub payload: Vec<u8>,

    /// Timestamp when the packet was created (sender's clock)
    pub timestamp_ms: u64,

    /// Sequence number assigned by the sender
    pub sequence: u64,
}

impl PacketEnvelope {
    /// Creates a new envelope from payload bytes.
    pub fn new(payload: Vec<u8>, timestamp_ms: u64) -> Self {
        Self {
            payload,
            timestamp_ms,
            sequence: 0,
        }
    }

    /// Sets the sender-side sequence number.
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// Returns the payload size in bytes.
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_from_seed_is_stable() {
        assert_eq!(NodeId::from_seed(7), NodeId::from_seed(7));
        assert_ne!(NodeId::from_seed(7), NodeId::from_seed(8));
    }

    #[test]
    fn test_envelope_size() {
        let envelope = PacketEnvelope::new(vec![1, 2, 3], 10).with_sequence(4);
        assert_eq!(envelope.size(), 3);
        assert_eq!(envelope.sequence, 4);
    }
}
