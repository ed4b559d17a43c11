//! Peer-side session: turns authority messages and local input into ledger
//! operations, and ledgers into render samples.
//!
//! ```text
//!   ServerMessage ──handle──▶ Registry ◀──input/fire── local player
//!                                │
//!                   render(now)  │ advance + lerp per entity
//!                                ▼
//!                  Frame { samples, outgoing: Vec<ClientMessage> }
//! ```
//!
//! The session is I/O free. A runtime feeds it decoded messages and ships
//! whatever it queues in `outgoing`.

use crate::account::{Account, EconomyConfig};
use crate::clock::{ClockConfig, ClockSync};
use crate::error::{InvalidState, LedgerError};
use crate::interpolation::RenderSample;
use crate::ledger::LedgerConfig;
use crate::physics::PhysicsIntegrator;
use crate::protocol::{ClientMessage, LootDrop, LootId, ServerMessage, ShootInfo, Victim};
use crate::registry::{EntityId, Registry};
use crate::state::{Change, ChangeEvent};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Configuration for a [`PeerSession`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub clock: ClockConfig,

    /// Minimum gap between two correction requests for one entity
    /// (default: 1000 ms)
    pub correction_cooldown_ms: u64,

    /// How long an entity may hold unresolved out-of-order events before a
    /// correction is requested (default: 300 ms)
    pub orphan_patience_ms: u64,

    /// Interval of full `StateQuery` resyncs (default: 30000 ms)
    pub resync_interval_ms: u64,

    /// Starting balances and prices; must match the authority's
    #[serde(default)]
    pub economy: EconomyConfig,

    /// Seed for ping jitter
    pub seed: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            clock: ClockConfig::default(),
            correction_cooldown_ms: 1_000,
            orphan_patience_ms: 300,
            resync_interval_ms: 30_000,
            economy: EconomyConfig::default(),
            seed: 0,
        }
    }
}

impl SessionConfig {
    pub fn with_clock(mut self, clock: ClockConfig) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_resync_interval(mut self, resync_interval_ms: u64) -> Self {
        self.resync_interval_ms = resync_interval_ms;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// Counters for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub updates_accepted: u64,
    pub updates_rejected: u64,
    pub corrections_requested: u64,
    pub corrections_applied: u64,
    pub shots_fired: u64,
    pub deaths: u64,
}

/// Output of one render tick.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    /// Authority time the own entity was rendered at
    pub time: u64,
    pub samples: Vec<(EntityId, RenderSample)>,
    pub outgoing: Vec<ClientMessage>,
}

pub struct PeerSession {
    own: EntityId,
    config: SessionConfig,
    registry: Registry,
    clock: ClockSync,
    loot: BTreeMap<LootId, LootDrop>,
    /// Local mirror of the own balances; the authority's copy is binding
    account: Account,
    outgoing: Vec<ClientMessage>,
    last_correction: BTreeMap<EntityId, u64>,
    stalled_since: BTreeMap<EntityId, u64>,
    awaiting_spawn: bool,
    next_resync_at: u64,
    connected: bool,
    stats: SessionStats,
}

impl PeerSession {
    pub fn new(
        own: EntityId,
        physics: Arc<PhysicsIntegrator>,
        ledger_config: LedgerConfig,
        config: SessionConfig,
    ) -> Self {
        let clock = ClockSync::new(config.clock.clone(), config.seed);
        Self {
            own,
            registry: Registry::new(physics, ledger_config),
            clock,
            account: Account::new(&config.economy),
            config,
            loot: BTreeMap::new(),
            outgoing: Vec::new(),
            last_correction: BTreeMap::new(),
            stalled_since: BTreeMap::new(),
            awaiting_spawn: false,
            next_resync_at: 0,
            connected: true,
            stats: SessionStats::default(),
        }
    }

    pub fn own_id(&self) -> EntityId {
        self.own
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn clock(&self) -> &ClockSync {
        &self.clock
    }

    pub fn loot(&self) -> &BTreeMap<LootId, LootDrop> {
        &self.loot
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// True while the own entity exists and has health left.
    pub fn is_alive(&self) -> bool {
        self.registry.get(&self.own).is_some_and(|ledger| !ledger.is_terminal())
    }

    /// Messages queued since the last call.
    pub fn take_outgoing(&mut self) -> Vec<ClientMessage> {
        std::mem::take(&mut self.outgoing)
    }

    // ========================================================================
    // Connection
    // ========================================================================

    /// Halts input and outgoing traffic; rendering continues from the last
    /// materialized state.
    pub fn disconnect(&mut self) {
        if self.connected {
            warn!("Peer {} disconnected", self.own);
        }
        self.connected = false;
        self.outgoing.clear();
    }

    pub fn reconnect(&mut self) {
        if !self.connected {
            info!("Peer {} reconnected", self.own);
            self.connected = true;
            self.clock.ping_now();
            self.queue(ClientMessage::StateQuery);
        }
    }

    /// Asks the authority for a full snapshot right away.
    pub fn request_state(&mut self, local_now: u64) {
        if self.connected {
            self.next_resync_at = local_now + self.config.resync_interval_ms;
            self.queue(ClientMessage::StateQuery);
        }
    }

    // ========================================================================
    // Inbound
    // ========================================================================

    /// Applies one authority message.
    pub fn handle(&mut self, message: ServerMessage, local_now: u64) {
        match message {
            ServerMessage::Pong { sent_at, time } => {
                if self.clock.on_pong(local_now, sent_at, time) {
                    debug!("Peer {} synced, rtt={:?}", self.own, self.clock.rtt());
                    self.next_resync_at = local_now + self.config.resync_interval_ms;
                    self.queue(ClientMessage::StateQuery);
                }
            }
            ServerMessage::PlayerJoin(player) => {
                if player.id == self.own {
                    self.awaiting_spawn = false;
                }
                self.forget(&player.id);
                self.registry.spawn(player.id, player.trajectory);
            }
            ServerMessage::PlayerLeave(id) => {
                self.registry.remove(&id);
                self.forget(&id);
            }
            ServerMessage::GameState { players, loot, account } => {
                self.registry
                    .rebuild(players.into_iter().map(|player| (player.id, player.trajectory)));
                self.loot = loot.into_iter().map(|drop| (drop.id, drop)).collect();
                if let Some(account) = account {
                    self.account = account;
                }
                self.stalled_since.clear();
                if !self.registry.contains(&self.own) {
                    // A lost Spawn must not block respawning forever.
                    self.awaiting_spawn = false;
                    self.request_spawn();
                }
            }
            ServerMessage::TrajectoryUpdate {
                change,
                at,
                time,
                from,
            } => {
                if from == self.own {
                    return;
                }
                let Some(ledger) = self.registry.get_mut(&from) else {
                    debug!("Update for unknown entity {}", from);
                    return;
                };
                match ledger.insert_update(change, at, time) {
                    Ok(()) => {
                        self.stats.updates_accepted += 1;
                        if ledger.orphan_count() == 0 {
                            self.stalled_since.remove(&from);
                        }
                    }
                    Err(e) => {
                        debug!("Update from {} not placed yet: {}", from, e);
                        self.stats.updates_rejected += 1;
                        self.stalled_since.entry(from).or_insert(local_now);
                    }
                }
            }
            ServerMessage::Shoot { shooter, hit, .. } => {
                let Some(hit) = hit else {
                    return;
                };
                debug!("{} hit {} at t={}", shooter, hit.victim, hit.time);
                self.apply_authoritative(hit.victim, Change::Bullet { damage: hit.damage }, hit.time, local_now);
            }
            ServerMessage::PlayerDeath { from, loot } => {
                if let Some(drop) = loot {
                    self.loot.insert(drop.id, drop);
                }
                self.stats.deaths += 1;
                if from == self.own {
                    info!("Peer {} died", self.own);
                    // Any Spawn sent before the authority saw the death was refused.
                    self.awaiting_spawn = false;
                    self.request_spawn();
                } else {
                    self.registry.remove(&from);
                    self.forget(&from);
                }
            }
            ServerMessage::LootCollected {
                loot_id,
                collector,
                content,
                time,
            } => {
                self.loot.remove(&loot_id);
                if collector == self.own {
                    self.account.credit(&content);
                }
                if let Some(change) = content.change() {
                    self.apply_authoritative(collector, change, time, local_now);
                }
            }
            ServerMessage::Correct { id, trajectory } => {
                let result = match self.registry.get_mut(&id) {
                    Some(ledger) => ledger.correct(trajectory),
                    None => {
                        self.registry.spawn(id, trajectory);
                        Ok(())
                    }
                };
                match result {
                    Ok(()) => {
                        warn!("Applied correction for {}", id);
                        self.stats.corrections_applied += 1;
                        self.stalled_since.remove(&id);
                    }
                    Err(e) => debug!("Ignoring correction for {}: {}", id, e),
                }
            }
            ServerMessage::LootReject(loot_id) => {
                debug!("Loot claim {} rejected", loot_id);
            }
        }
    }

    // ========================================================================
    // Local input
    // ========================================================================

    /// Applies a player input to the own ledger and queues the update.
    ///
    /// Boosters are bought here; an input the account cannot pay for is
    /// dropped.
    pub fn input(&mut self, change: Change, local_now: u64) -> Option<ChangeEvent> {
        if !self.connected || !self.clock.is_synced() || !self.account.can_afford(change, &self.config.economy) {
            return None;
        }
        if !self.advance_own(local_now) {
            return None;
        }
        let ledger = self.registry.get_mut(&self.own)?;
        let event = ledger.apply_change(change);
        self.account.charge(change, &self.config.economy);
        if let Some(at) = event.predecessor {
            self.queue(ClientMessage::TrajectoryUpdate {
                change,
                at,
                time: event.time,
            });
        }
        Some(event)
    }

    /// Fires the weapon at whatever is closest along the own heading.
    pub fn fire(&mut self, local_now: u64) -> Option<ShootInfo> {
        if !self.connected || !self.clock.is_synced() || self.account.ammo == 0 {
            return None;
        }
        if !self.advance_own(local_now) {
            return None;
        }
        let shooter = self.registry.get(&self.own)?;
        let victim = self
            .registry
            .iter()
            .filter(|(id, _)| **id != self.own)
            .filter_map(|(id, ledger)| shooter.hits(ledger).map(|distance| (distance, *id, ledger)))
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, id, ledger)| Victim {
                id,
                at: ledger.fingerprint(),
                time: ledger.time(),
            });

        let info = ShootInfo {
            at: shooter.fingerprint(),
            time: shooter.time(),
            victim,
        };
        self.account.take_round();
        self.stats.shots_fired += 1;
        self.queue(ClientMessage::Shoot(info));
        Some(info)
    }

    pub fn claim_loot(&mut self, loot_id: LootId) -> bool {
        if !self.connected || !self.loot.contains_key(&loot_id) || !self.is_alive() {
            return false;
        }
        self.queue(ClientMessage::ClaimLoot { loot_id });
        true
    }

    // ========================================================================
    // Render
    // ========================================================================

    /// Advances every ledger to its query time and samples it.
    pub fn render(&mut self, local_now: u64) -> Frame {
        if self.connected {
            if let Some(sent_at) = self.clock.poll_ping(local_now) {
                self.queue(ClientMessage::Ping { sent_at });
            }
        }
        if !self.clock.is_synced() {
            return Frame {
                time: 0,
                samples: Vec::new(),
                outgoing: self.take_outgoing(),
            };
        }
        if self.connected && local_now >= self.next_resync_at {
            self.next_resync_at = local_now + self.config.resync_interval_ms;
            self.queue(ClientMessage::StateQuery);
        }

        let own_time = self.clock.own_query_time(local_now);
        let remote_time = self.clock.remote_query_time(local_now);
        let mut samples = Vec::with_capacity(self.registry.len());
        let ids: Vec<EntityId> = self.registry.ids().collect();

        for id in ids {
            let is_own = id == self.own;
            let query = if is_own { own_time } else { remote_time };
            let Some(ledger) = self.registry.get_mut(&id) else {
                continue;
            };

            let outcome = if self.connected {
                ledger.advance(query, true)
            } else {
                Ok(())
            };
            let orphans = ledger.orphan_count();
            if !ledger.is_terminal() {
                if let Some(sample) = ledger.lerp(query) {
                    samples.push((id, sample));
                }
            }

            if !self.connected {
                continue;
            }
            match outcome {
                Err(LedgerError::InvalidMaterializedState {
                    reason: InvalidState::Terminal,
                    ..
                }) if is_own => self.request_spawn(),
                Err(LedgerError::InvalidMaterializedState {
                    reason: InvalidState::MissingEvent { .. },
                    ..
                }) if !is_own => self.request_correction(id, local_now),
                _ => {}
            }

            if orphans == 0 {
                self.stalled_since.remove(&id);
            } else if let Some(since) = self.stalled_since.get(&id).copied() {
                if local_now.saturating_sub(since) >= self.config.orphan_patience_ms {
                    self.request_correction(id, local_now);
                }
            }
        }

        Frame {
            time: own_time,
            samples,
            outgoing: self.take_outgoing(),
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Brings the own ledger up to the present. False when there is no
    /// living own entity to act with; a death found on the way asks for a
    /// respawn.
    fn advance_own(&mut self, local_now: u64) -> bool {
        let query = self.clock.own_query_time(local_now);
        let Some(ledger) = self.registry.get_mut(&self.own) else {
            return false;
        };
        if ledger.is_terminal() {
            return false;
        }
        match ledger.advance(query, true) {
            Err(e) if e.is_terminal() => {
                info!("Peer {} died before acting at t={}", self.own, query);
                self.request_spawn();
                false
            }
            Err(e) => {
                debug!("Own ledger advanced provisionally: {}", e);
                true
            }
            Ok(()) => true,
        }
    }

    fn apply_authoritative(&mut self, id: EntityId, change: Change, time: u64, local_now: u64) {
        let Some(ledger) = self.registry.get_mut(&id) else {
            return;
        };
        if let Err(e) = ledger.insert_authoritative(change, time) {
            debug!("Authoritative {:?} for {} not applicable: {}", change, id, e);
            self.request_correction(id, local_now);
        }
    }

    fn request_correction(&mut self, id: EntityId, local_now: u64) {
        if !self.connected {
            return;
        }
        if let Some(last) = self.last_correction.get(&id) {
            if local_now < last + self.config.correction_cooldown_ms {
                return;
            }
        }
        debug!("Peer {} requests correction for {}", self.own, id);
        self.last_correction.insert(id, local_now);
        self.stats.corrections_requested += 1;
        self.queue(ClientMessage::Correct(id));
    }

    fn request_spawn(&mut self) {
        if !self.awaiting_spawn {
            self.awaiting_spawn = true;
            self.queue(ClientMessage::Spawn);
        }
    }

    fn forget(&mut self, id: &EntityId) {
        self.stalled_since.remove(id);
        self.last_correction.remove(id);
    }

    fn queue(&mut self, message: ClientMessage) {
        if self.connected {
            self.outgoing.push(message);
        }
    }
}
