//! SimWorld - The simulation harness container.

use crate::agent::{BotProfile, SimulatedPeer};
use crate::context::SimContext;
use crate::error::SimError;
use crate::network::{LinkProfile, SimNetwork, SimNetworkController, SimRouter};
use crate::oracle::{ConvergenceReport, Oracle};

use gravwell_core::{
    Authority, AuthorityConfig, AuthorityRuntime, LedgerConfig, PeerRuntime, PeerSession, PhysicsConfig,
    PhysicsIntegrator, SessionConfig, World,
};
use gravwell_env::{GameContext, NetworkController, NodeId, Transport};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Configuration for a simulation run.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Number of bot-driven peers
    pub num_peers: usize,

    /// Virtual time per world tick; peers render once per tick
    pub tick_ms: u64,

    /// Profile of every link while the scenario runs
    pub link: LinkProfile,

    /// Peers' local clocks run ahead of virtual time by up to this much
    pub max_clock_skew_ms: u64,

    pub bot: BotProfile,
    pub physics: PhysicsConfig,
    pub ledger: LedgerConfig,

    /// Quiet time after the run before peers ask for a fresh snapshot
    pub drain_ms: u64,

    /// Time given to that snapshot to land before checking convergence
    pub settle_ms: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            num_peers: 4,
            tick_ms: 20,
            link: LinkProfile::default(),
            max_clock_skew_ms: 0,
            bot: BotProfile::default(),
            physics: PhysicsConfig::default(),
            ledger: LedgerConfig::default(),
            drain_ms: 1_000,
            settle_ms: 1_500,
        }
    }
}

/// The SimWorld - one authority and its peers on a simulated network.
pub struct SimWorld {
    config: SimConfig,

    /// Shared virtual clock, unskewed
    context: Arc<SimContext>,
    router: Arc<SimRouter>,
    controller: Arc<SimNetworkController>,
    authority: AuthorityRuntime<SimContext, SimNetwork>,
    peers: Vec<SimulatedPeer>,
    tick_count: u64,
}

impl SimWorld {
    /// Builds the authority and admits every peer at virtual time 0.
    pub async fn new(config: SimConfig) -> Result<Self, SimError> {
        // Derive separate seeds for different subsystems
        let context = SimContext::shared(config.seed);
        let network_seed = config.seed.wrapping_mul(0x9e3779b97f4a7c15);
        let mut rng = ChaCha8Rng::seed_from_u64(context.derive_seed(0));

        let controller = Arc::new(SimNetworkController::new(config.link));
        let router = SimRouter::shared((*context).clone(), controller.clone(), network_seed);
        let physics = Arc::new(PhysicsIntegrator::new(World::standard(), config.physics.clone()));

        let authority_net = Arc::new(router.connect(NodeId::from_seed(0)));
        let authority_id = authority_net.local_id();
        let mut authority = AuthorityRuntime::new(
            context.clone(),
            authority_net,
            Authority::new(
                physics.clone(),
                config.ledger.clone(),
                AuthorityConfig::default().with_seed(context.derive_seed(1)),
            ),
        );

        let mut peers = Vec::with_capacity(config.num_peers);
        for index in 0..config.num_peers as u64 {
            let node = NodeId::from_seed(index + 1);
            let token = Uuid::from_u128(rng.gen());
            let skew = if config.max_clock_skew_ms > 0 {
                rng.gen_range(0..=config.max_clock_skew_ms)
            } else {
                0
            };

            let network = Arc::new(router.connect(node));
            let (entity, _) = authority.admit(node, &token).await;
            let session = PeerSession::new(
                entity,
                physics.clone(),
                config.ledger.clone(),
                SessionConfig::default().with_seed(context.derive_seed(100 + index)),
            );
            let runtime = PeerRuntime::new(
                Arc::new(context.skewed(skew)),
                network,
                authority_id,
                session,
            );
            debug!("Peer {} is entity {} with clock skew {}ms", node, entity, skew);
            peers.push(SimulatedPeer::new(runtime, config.bot, context.derive_seed(200 + index)));
        }
        info!("SimWorld ready: {} peers, seed={}", peers.len(), config.seed);

        Ok(Self {
            config,
            context,
            router,
            controller,
            authority,
            peers,
            tick_count: 0,
        })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn context(&self) -> &Arc<SimContext> {
        &self.context
    }

    pub fn router(&self) -> &Arc<SimRouter> {
        &self.router
    }

    pub fn controller(&self) -> &Arc<SimNetworkController> {
        &self.controller
    }

    pub fn authority(&self) -> &AuthorityRuntime<SimContext, SimNetwork> {
        &self.authority
    }

    pub fn peers(&self) -> &[SimulatedPeer] {
        &self.peers
    }

    pub fn peers_mut(&mut self) -> &mut [SimulatedPeer] {
        &mut self.peers
    }

    /// Returns the current virtual time in milliseconds.
    pub fn time_ms(&self) -> u64 {
        self.context.virtual_millis()
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Advances virtual time by one tick: deliver, let the authority step,
    /// then run every peer's frame.
    pub async fn tick(&mut self) -> Result<(), SimError> {
        self.context.advance_time(Duration::from_millis(self.config.tick_ms));
        self.router.deliver_due();
        self.authority.step().await;
        for peer in &mut self.peers {
            peer.tick().await?;
        }
        self.tick_count += 1;
        Ok(())
    }

    pub async fn run_for(&mut self, duration_ms: u64) -> Result<(), SimError> {
        for _ in 0..duration_ms / self.config.tick_ms.max(1) {
            self.tick().await?;
        }
        Ok(())
    }

    /// Cuts a peer off from the authority and puts its session offline.
    pub fn isolate(&mut self, index: usize) {
        let authority = self.authority.node_id();
        if let Some(peer) = self.peers.get_mut(index) {
            info!("Isolating peer {}", peer.node_id());
            self.controller.partition(&[peer.node_id()], &[authority]);
            peer.session_mut().disconnect();
        }
    }

    /// Heals every partition and brings offline sessions back.
    pub fn rejoin_all(&mut self) {
        self.controller.heal_all();
        for peer in &mut self.peers {
            peer.session_mut().reconnect();
        }
    }

    /// Stops the bots, calms the network and waits for every peer to pick up
    /// a fresh snapshot, then compares them with the authority.
    pub async fn settle(&mut self) -> Result<ConvergenceReport, SimError> {
        for peer in &mut self.peers {
            peer.set_profile(BotProfile::idle());
        }
        self.rejoin_all();
        self.controller
            .set_all_links(LinkProfile::default().with_latency(self.config.link.latency_ms).with_jitter(0.0));

        self.run_for(self.config.drain_ms).await?;
        for peer in &mut self.peers {
            peer.request_state();
        }
        self.run_for(self.config.settle_ms).await?;

        let report = self.check();
        info!(
            "Settled at t={}ms: {} entities, {} divergences",
            report.checked_at,
            report.entities,
            report.divergences.len()
        );
        Ok(report)
    }

    pub fn check(&self) -> ConvergenceReport {
        Oracle::check(self.authority.authority(), self.peers.iter().map(SimulatedPeer::session))
    }
}
