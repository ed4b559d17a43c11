//! Network transport abstraction for Gravwell nodes.

use async_trait::async_trait;
use crate::error::EnvError;
use crate::types::{NodeId, PacketEnvelope};

/// Abstraction for network I/O between a peer and the authority.
///
/// # Implementations
///
/// - **Production**: Wraps a WebSocket or UDP session
/// - **Simulation**: Channel-based with configurable latency/jitter/loss
///
/// # Packet Flow
///
/// ```text
/// Peer A                     Network                  Authority
///   |                           |                          |
///   |-- send(auth, packet) ---->|                          |
///   |                           |-- [latency/jitter] ----->|
///   |                           |                          |-- try_recv() -> packet
/// ```
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends a packet to a target node.
    ///
    /// # Returns
    /// * `Ok(())` - Packet queued for delivery
    /// * `Err(EnvError::NetworkError)` - Immediate send failure
    ///
    /// Success does not guarantee delivery.
    async fn send(&self, target: NodeId, packet: PacketEnvelope) -> Result<(), EnvError>;

    /// Receives the next packet addressed to this node.
    ///
    /// Blocks until a packet arrives; `None` once the transport is closed.
    async fn recv(&self) -> Option<(NodeId, PacketEnvelope)>;

    /// Returns the next already-delivered packet without waiting.
    ///
    /// Event loops drain the inbox with this once per frame.
    fn try_recv(&self) -> Option<(NodeId, PacketEnvelope)>;

    /// Broadcasts a packet to all connected nodes.
    ///
    /// Returns the number of nodes the packet was sent to.
    async fn broadcast(&self, packet: PacketEnvelope) -> usize;

    /// Returns this node's ID.
    fn local_id(&self) -> NodeId;
}

/// Fault injection interface for simulated links.
pub trait NetworkController: Send + Sync {
    /// Creates a network partition between two node sets.
    fn partition(&self, group_a: &[NodeId], group_b: &[NodeId]);

    /// Heals all partitions.
    fn heal_all(&self);

    /// Sets base latency for a specific link.
    fn set_link_latency(&self, from: NodeId, to: NodeId, latency_ms: u64);

    /// Sets latency jitter (standard deviation) for a specific link.
    fn set_link_jitter(&self, from: NodeId, to: NodeId, jitter_ms: f64);

    /// Sets packet loss probability for a link (0.0 - 1.0).
    fn set_link_loss(&self, from: NodeId, to: NodeId, loss_rate: f64);
}
