//! Simulated network transport with fault injection.
//!
//! Every [`SimNetwork`] hands its packets to one shared [`SimRouter`]. The
//! router decides each packet's fate when it is sent (partition, loss,
//! latency plus normally distributed jitter) and parks it in a delivery
//! queue keyed by virtual arrival time. The world calls
//! [`SimRouter::deliver_due`] once per tick to move arrived packets into the
//! receivers' inboxes, so jitter reorders packets exactly as a real link would.

use crate::context::SimContext;
use async_trait::async_trait;
use gravwell_env::{EnvError, NetworkController, NodeId, PacketEnvelope, Transport};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::Serialize;
use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BinaryHeap};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::trace;

/// Delay and loss characteristics of one directed link.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LinkProfile {
    pub latency_ms: u64,

    /// Standard deviation of the per-packet delay
    pub jitter_ms: f64,

    /// Probability that a packet is dropped (0.0 - 1.0)
    pub loss_rate: f64,
}

impl Default for LinkProfile {
    fn default() -> Self {
        Self {
            latency_ms: 40,
            jitter_ms: 5.0,
            loss_rate: 0.0,
        }
    }
}

impl LinkProfile {
    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn with_jitter(mut self, jitter_ms: f64) -> Self {
        self.jitter_ms = jitter_ms.max(0.0);
        self
    }

    pub fn with_loss(mut self, loss_rate: f64) -> Self {
        self.loss_rate = loss_rate.clamp(0.0, 1.0);
        self
    }
}

/// Network controller for fault injection.
pub struct SimNetworkController {
    /// Profile of every link without an override
    default_link: Mutex<LinkProfile>,

    /// Per-link overrides
    links: Mutex<BTreeMap<(NodeId, NodeId), LinkProfile>>,

    /// Active partitions (nodes that cannot communicate)
    partitions: Mutex<Vec<(Vec<NodeId>, Vec<NodeId>)>>,
}

impl SimNetworkController {
    pub fn new(default_link: LinkProfile) -> Self {
        Self {
            default_link: Mutex::new(default_link),
            links: Mutex::new(BTreeMap::new()),
            partitions: Mutex::new(Vec::new()),
        }
    }

    /// Replaces the profile of every link and drops all overrides.
    pub fn set_all_links(&self, profile: LinkProfile) {
        *self.default_link.lock().unwrap_or_else(PoisonError::into_inner) = profile;
        self.links.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub fn link(&self, from: NodeId, to: NodeId) -> LinkProfile {
        let links = self.links.lock().unwrap_or_else(PoisonError::into_inner);
        links
            .get(&(from, to))
            .copied()
            .unwrap_or_else(|| *self.default_link.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Checks if two nodes can communicate (not partitioned).
    pub fn can_communicate(&self, from: NodeId, to: NodeId) -> bool {
        let partitions = self.partitions.lock().unwrap_or_else(PoisonError::into_inner);
        !partitions.iter().any(|(a, b)| {
            (a.contains(&from) && b.contains(&to)) || (b.contains(&from) && a.contains(&to))
        })
    }

    fn update_link(&self, from: NodeId, to: NodeId, update: impl FnOnce(LinkProfile) -> LinkProfile) {
        let profile = update(self.link(from, to));
        self.links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((from, to), profile);
    }
}

impl Default for SimNetworkController {
    fn default() -> Self {
        Self::new(LinkProfile::default())
    }
}

impl NetworkController for SimNetworkController {
    fn partition(&self, group_a: &[NodeId], group_b: &[NodeId]) {
        self.partitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((group_a.to_vec(), group_b.to_vec()));
    }

    fn heal_all(&self) {
        self.partitions.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    fn set_link_latency(&self, from: NodeId, to: NodeId, latency_ms: u64) {
        self.update_link(from, to, |link| link.with_latency(latency_ms));
    }

    fn set_link_jitter(&self, from: NodeId, to: NodeId, jitter_ms: f64) {
        self.update_link(from, to, |link| link.with_jitter(jitter_ms));
    }

    fn set_link_loss(&self, from: NodeId, to: NodeId, loss_rate: f64) {
        self.update_link(from, to, |link| link.with_loss(loss_rate));
    }
}

/// Packet counters of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NetworkStats {
    pub sent: u64,
    pub delivered: u64,
    pub dropped_loss: u64,
    pub dropped_partition: u64,

    /// Packets that arrived before a packet sent earlier on the same link
    pub reordered: u64,
    pub max_delay_ms: u64,
}

struct InFlight {
    deliver_at: u64,
    sequence: u64,
    from: NodeId,
    to: NodeId,
    packet: PacketEnvelope,
}

impl InFlight {
    fn key(&self) -> (u64, u64) {
        (self.deliver_at, self.sequence)
    }
}

impl PartialEq for InFlight {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for InFlight {}

impl PartialOrd for InFlight {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for InFlight {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

type Inbox = mpsc::UnboundedSender<(NodeId, PacketEnvelope)>;

struct RouterState {
    rng: ChaCha8Rng,
    sequence: u64,
    in_flight: BinaryHeap<Reverse<InFlight>>,
    inboxes: BTreeMap<NodeId, Inbox>,

    /// Highest sequence delivered per link, for reorder accounting
    last_delivered: BTreeMap<(NodeId, NodeId), u64>,
    stats: NetworkStats,
}

/// Central packet router shared by every simulated node.
pub struct SimRouter {
    clock: SimContext,
    controller: Arc<SimNetworkController>,
    state: Mutex<RouterState>,
}

impl SimRouter {
    pub fn new(clock: SimContext, controller: Arc<SimNetworkController>, seed: u64) -> Self {
        Self {
            clock,
            controller,
            state: Mutex::new(RouterState {
                rng: ChaCha8Rng::seed_from_u64(seed),
                sequence: 0,
                in_flight: BinaryHeap::new(),
                inboxes: BTreeMap::new(),
                last_delivered: BTreeMap::new(),
                stats: NetworkStats::default(),
            }),
        }
    }

    pub fn shared(clock: SimContext, controller: Arc<SimNetworkController>, seed: u64) -> Arc<Self> {
        Arc::new(Self::new(clock, controller, seed))
    }

    pub fn controller(&self) -> &Arc<SimNetworkController> {
        &self.controller
    }

    /// Attaches a node and returns its transport.
    pub fn connect(self: &Arc<Self>, id: NodeId) -> SimNetwork {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().inboxes.insert(id, tx);
        SimNetwork {
            local_id: id,
            router: Arc::clone(self),
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    /// Detaches a node; packets still in flight to it are discarded.
    pub fn disconnect(&self, id: &NodeId) {
        self.lock().inboxes.remove(id);
    }

    pub fn nodes(&self) -> Vec<NodeId> {
        self.lock().inboxes.keys().copied().collect()
    }

    pub fn stats(&self) -> NetworkStats {
        self.lock().stats.clone()
    }

    pub fn in_flight(&self) -> usize {
        self.lock().in_flight.len()
    }

    /// Decides the fate of one packet at send time.
    pub fn route(&self, from: NodeId, to: NodeId, packet: PacketEnvelope) -> Result<(), EnvError> {
        let now = self.clock.virtual_millis();
        let link = self.controller.link(from, to);
        let open = self.controller.can_communicate(from, to);
        let mut state = self.lock();
        if !state.inboxes.contains_key(&to) {
            return Err(EnvError::unreachable(to));
        }
        state.stats.sent += 1;

        if !open {
            state.stats.dropped_partition += 1;
            trace!("Partition dropped {} -> {}", from, to);
            return Ok(());
        }
        if link.loss_rate > 0.0 && state.rng.gen_bool(link.loss_rate.min(1.0)) {
            state.stats.dropped_loss += 1;
            return Ok(());
        }

        let jitter = match Normal::new(0.0, link.jitter_ms) {
            Ok(normal) if link.jitter_ms > 0.0 => normal.sample(&mut state.rng),
            _ => 0.0,
        };
        let delay = (link.latency_ms as f64 + jitter).max(0.0).round() as u64;
        state.stats.max_delay_ms = state.stats.max_delay_ms.max(delay);

        state.sequence += 1;
        let sequence = state.sequence;
        state.in_flight.push(Reverse(InFlight {
            deliver_at: now + delay,
            sequence,
            from,
            to,
            packet,
        }));
        Ok(())
    }

    /// Moves every packet whose arrival time has come into its inbox.
    /// Returns how many were delivered.
    pub fn deliver_due(&self) -> usize {
        let now = self.clock.virtual_millis();
        let mut guard = self.lock();
        let state = &mut *guard;
        let mut delivered = 0;

        while state
            .in_flight
            .peek()
            .is_some_and(|Reverse(packet)| packet.deliver_at <= now)
        {
            let Some(Reverse(packet)) = state.in_flight.pop() else {
                break;
            };
            let link = (packet.from, packet.to);
            let newest = state.last_delivered.entry(link).or_insert(0);
            if packet.sequence < *newest {
                state.stats.reordered += 1;
            } else {
                *newest = packet.sequence;
            }

            let Some(inbox) = state.inboxes.get(&packet.to) else {
                continue;
            };
            if inbox.send((packet.from, packet.packet)).is_ok() {
                state.stats.delivered += 1;
                delivered += 1;
            }
        }
        delivered
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RouterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Simulated network interface of one node.
pub struct SimNetwork {
    local_id: NodeId,
    router: Arc<SimRouter>,

    /// Receiver for delivered packets (behind tokio mutex for async)
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<(NodeId, PacketEnvelope)>>,
}

#[async_trait]
impl Transport for SimNetwork {
    async fn send(&self, target: NodeId, packet: PacketEnvelope) -> Result<(), EnvError> {
        self.router.route(self.local_id, target, packet)
    }

    async fn recv(&self) -> Option<(NodeId, PacketEnvelope)> {
        let mut rx = self.rx.lock().await;
        rx.recv().await
    }

    fn try_recv(&self) -> Option<(NodeId, PacketEnvelope)> {
        self.rx.try_lock().ok()?.try_recv().ok()
    }

    async fn broadcast(&self, packet: PacketEnvelope) -> usize {
        let mut sent = 0;
        for target in self.router.nodes() {
            if target != self.local_id && self.router.route(self.local_id, target, packet.clone()).is_ok() {
                sent += 1;
            }
        }
        sent
    }

    fn local_id(&self) -> NodeId {
        self.local_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn router(link: LinkProfile) -> (SimContext, Arc<SimRouter>) {
        let clock = SimContext::new(9);
        let controller = Arc::new(SimNetworkController::new(link));
        let router = SimRouter::shared(clock.clone(), controller, 9);
        (clock, router)
    }

    fn packet(sequence: u64) -> PacketEnvelope {
        PacketEnvelope::new(vec![sequence as u8], 0).with_sequence(sequence)
    }

    #[test]
    fn test_network_controller_partition() {
        let controller = SimNetworkController::default();

        let a = NodeId::from_seed(1);
        let b = NodeId::from_seed(2);
        let c = NodeId::from_seed(3);

        // Initially all can communicate
        assert!(controller.can_communicate(a, b));
        assert!(controller.can_communicate(b, c));

        // Partition: {a} vs {b, c}
        controller.partition(&[a], &[b, c]);
        assert!(!controller.can_communicate(a, b));
        assert!(!controller.can_communicate(c, a));
        assert!(controller.can_communicate(b, c));

        controller.heal_all();
        assert!(controller.can_communicate(a, b));
    }

    #[test]
    fn test_link_overrides_are_directed() {
        let controller = SimNetworkController::default();
        let a = NodeId::from_seed(1);
        let b = NodeId::from_seed(2);

        controller.set_link_latency(a, b, 100);
        controller.set_link_loss(a, b, 3.0);

        assert_eq!(controller.link(a, b).latency_ms, 100);
        assert_eq!(controller.link(a, b).loss_rate, 1.0);
        assert_eq!(controller.link(b, a), LinkProfile::default());

        controller.set_all_links(LinkProfile::default().with_latency(7));
        assert_eq!(controller.link(a, b).latency_ms, 7);
    }

    #[tokio::test]
    async fn test_packets_arrive_after_latency() {
        let (clock, router) = router(LinkProfile::default().with_latency(30).with_jitter(0.0));
        let a = router.connect(NodeId::from_seed(1));
        let b = router.connect(NodeId::from_seed(2));

        a.send(b.local_id(), packet(1)).await.unwrap();
        assert_eq!(router.deliver_due(), 0);
        assert!(b.try_recv().is_none());

        clock.advance_time(Duration::from_millis(30));
        assert_eq!(router.deliver_due(), 1);
        let (from, received) = b.try_recv().unwrap();
        assert_eq!(from, a.local_id());
        assert_eq!(received.sequence, 1);
    }

    #[tokio::test]
    async fn test_unknown_target_is_unreachable() {
        let (_, router) = router(LinkProfile::default());
        let a = router.connect(NodeId::from_seed(1));

        let result = a.send(NodeId::from_seed(99), packet(1)).await;
        assert!(matches!(result, Err(EnvError::NodeUnreachable(_))));
    }

    #[tokio::test]
    async fn test_total_loss_and_partition_drop_everything() {
        let (clock, router) = router(LinkProfile::default().with_loss(1.0));
        let a = router.connect(NodeId::from_seed(1));
        let b = router.connect(NodeId::from_seed(2));

        for sequence in 0..10 {
            a.send(b.local_id(), packet(sequence)).await.unwrap();
        }
        router.controller().set_all_links(LinkProfile::default());
        router.controller().partition(&[a.local_id()], &[b.local_id()]);
        a.send(b.local_id(), packet(10)).await.unwrap();

        clock.advance_time(Duration::from_secs(1));
        router.deliver_due();

        let stats = router.stats();
        assert_eq!(stats.sent, 11);
        assert_eq!(stats.dropped_loss, 10);
        assert_eq!(stats.dropped_partition, 1);
        assert!(b.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_jitter_reorders_deterministically() {
        let run = || async {
            let (clock, router) = router(LinkProfile::default().with_latency(50).with_jitter(40.0));
            let a = router.connect(NodeId::from_seed(1));
            let b = router.connect(NodeId::from_seed(2));
            for sequence in 0..200 {
                a.send(b.local_id(), packet(sequence)).await.unwrap();
                clock.advance_time(Duration::from_millis(5));
                router.deliver_due();
            }
            clock.advance_time(Duration::from_secs(1));
            router.deliver_due();

            let mut order = Vec::new();
            while let Some((_, received)) = b.try_recv() {
                order.push(received.sequence);
            }
            (order, router.stats())
        };

        let (first, stats) = run().await;
        let (second, _) = run().await;

        assert_eq!(first.len(), 200);
        assert_eq!(first, second);
        assert!(stats.reordered > 0);
    }
}
