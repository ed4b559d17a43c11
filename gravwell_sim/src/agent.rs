//! SimulatedPeer - a scripted player driving a PeerRuntime in simulation.
//!
//! The bot steers and thrusts at random, now and then buys a booster, fires
//! when something is on its heading, and claims loot it drifts over. All decisions come from its own
//! seeded RNG so a run is reproducible from the master seed.

use crate::context::SimContext;
use crate::network::SimNetwork;

use gravwell_core::{Change, EntityId, LootId, PeerRuntime, PeerSession, RenderSample};
use gravwell_env::{EnvError, GameContext, NodeId};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::collections::BTreeSet;

/// How eagerly a bot plays.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BotProfile {
    /// Chance per frame of issuing a steering or thrust input
    pub input_rate: f64,

    /// Chance per frame of buying a booster
    pub buy_rate: f64,

    /// Chance per frame of pulling the trigger
    pub fire_rate: f64,

    /// Whether the bot picks up loot it is close to
    pub collects_loot: bool,
}

impl Default for BotProfile {
    fn default() -> Self {
        Self {
            input_rate: 0.05,
            buy_rate: 0.005,
            fire_rate: 0.02,
            collects_loot: true,
        }
    }
}

impl BotProfile {
    /// A bot that never touches the controls.
    pub fn idle() -> Self {
        Self {
            input_rate: 0.0,
            buy_rate: 0.0,
            fire_rate: 0.0,
            collects_loot: false,
        }
    }

    pub fn aggressive() -> Self {
        Self {
            input_rate: 0.08,
            buy_rate: 0.01,
            fire_rate: 0.25,
            collects_loot: true,
        }
    }
}

/// Player inputs a bot chooses from.
const INPUTS: [Change; 5] = [
    Change::RotCw,
    Change::RotCcw,
    Change::RotStop,
    Change::PropOn,
    Change::PropOff,
];

/// Counters of what a bot did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BotStats {
    pub inputs: u64,
    pub purchases: u64,
    pub shots: u64,
    pub claims: u64,
    pub frames: u64,
}

/// A simulated player running in the deterministic environment.
pub struct SimulatedPeer {
    runtime: PeerRuntime<SimContext, SimNetwork>,
    rng: ChaCha8Rng,
    profile: BotProfile,
    claimed: BTreeSet<LootId>,
    last_samples: Vec<(EntityId, RenderSample)>,
    stats: BotStats,
}

impl SimulatedPeer {
    pub fn new(runtime: PeerRuntime<SimContext, SimNetwork>, profile: BotProfile, seed: u64) -> Self {
        Self {
            runtime,
            rng: ChaCha8Rng::seed_from_u64(seed),
            profile,
            claimed: BTreeSet::new(),
            last_samples: Vec::new(),
            stats: BotStats::default(),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.runtime.node_id()
    }

    pub fn entity_id(&self) -> EntityId {
        self.runtime.session().own_id()
    }

    pub fn session(&self) -> &PeerSession {
        self.runtime.session()
    }

    pub fn session_mut(&mut self) -> &mut PeerSession {
        self.runtime.session_mut()
    }

    pub fn profile(&self) -> BotProfile {
        self.profile
    }

    pub fn set_profile(&mut self, profile: BotProfile) {
        self.profile = profile;
    }

    pub fn stats(&self) -> &BotStats {
        &self.stats
    }

    /// This node's local clock, skew included.
    pub fn local_now(&self) -> u64 {
        self.runtime.context().now_millis()
    }

    /// What the peer drew on its last frame.
    pub fn last_samples(&self) -> &[(EntityId, RenderSample)] {
        &self.last_samples
    }

    pub fn request_state(&mut self) {
        let now = self.local_now();
        self.runtime.session_mut().request_state(now);
    }

    /// One frame: decide, act, then let the runtime render and ship.
    pub async fn tick(&mut self) -> Result<(), EnvError> {
        // Drain first so decisions see the freshest state
        self.runtime.pump();
        if self.session().is_connected() && self.session().is_alive() {
            self.act().await?;
        }
        let frame = self.runtime.frame().await?;
        self.last_samples = frame.samples;
        self.stats.frames += 1;
        Ok(())
    }

    async fn act(&mut self) -> Result<(), EnvError> {
        if self.rng.gen_bool(self.profile.input_rate) {
            let change = INPUTS[self.rng.gen_range(0..INPUTS.len())];
            if self.runtime.input(change).await?.is_some() {
                self.stats.inputs += 1;
            }
        }
        if self.rng.gen_bool(self.profile.buy_rate) {
            // Refused locally once the account runs dry.
            if self.runtime.input(Change::AddBoost).await?.is_some() {
                self.stats.purchases += 1;
            }
        }
        if self.rng.gen_bool(self.profile.fire_rate) {
            if self.runtime.fire().await?.is_some() {
                self.stats.shots += 1;
            }
        }
        if self.profile.collects_loot {
            self.collect_loot().await?;
        }
        Ok(())
    }

    async fn collect_loot(&mut self) -> Result<(), EnvError> {
        let session = self.runtime.session();
        let Some(own) = session.registry().get(&session.own_id()) else {
            return Ok(());
        };
        let position = own.state().position;
        let nearby: Vec<_> = session
            .loot()
            .values()
            .filter(|drop| !self.claimed.contains(&drop.id))
            .filter(|drop| (drop.position - position).norm() < 50.0)
            .map(|drop| drop.id)
            .collect();

        for loot_id in nearby {
            if self.runtime.session_mut().claim_loot(loot_id) {
                self.claimed.insert(loot_id);
                self.stats.claims += 1;
            }
        }
        self.runtime.flush().await?;
        Ok(())
    }
}
