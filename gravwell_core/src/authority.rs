//! Authoritative host.
//!
//! Runs the same ledgers as every peer and is the only party allowed to
//! stamp damage and healing. Boosters are bought with cash. Player updates
//! are accepted only when their predecessor fingerprint matches the
//! authority's own history; the sender is corrected otherwise.
//!
//! ```text
//!   ClientMessage ─▶ price check ─▶ window check ─▶ advance ─▶ insert_update
//!                                                              │
//!                                       Ok  ─▶ broadcast TrajectoryUpdate
//!                                       Err ─▶ Correct to sender
//! ```

use crate::account::{Account, EconomyConfig};
use crate::error::LedgerError;
use crate::fingerprint::Fingerprint;
use crate::ledger::{LedgerConfig, TrajectoryLedger};
use crate::physics::PhysicsIntegrator;
use crate::protocol::{
    ClientMessage, Hit, LootContent, LootDrop, LootId, PlayerSnapshot, ServerMessage, ShootInfo,
};
use crate::registry::{EntityId, Registry};
use crate::state::{Change, TrajectoryState};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Configuration for an [`Authority`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorityConfig {
    /// Oldest accepted update, relative to authority time (default: 2000 ms)
    pub max_time_before_ms: u64,

    /// Furthest accepted update into the future (default: 400 ms)
    pub max_time_ahead_ms: u64,

    /// Strongest gravity pull tolerated at a spawn point (default: 2.0)
    pub spawn_pull_max: f32,

    /// Spawn point draws before falling back to the origin (default: 1000)
    pub spawn_attempts: usize,

    /// Maximum distance for claiming loot (default: 60)
    pub loot_radius: f32,

    /// Health restored by a health drop (default: 30)
    pub loot_health: u32,

    /// Rounds in an ammo drop (default: 15)
    pub loot_ammo: u32,

    /// Starting balances and prices
    #[serde(default)]
    pub economy: EconomyConfig,

    /// Seed for spawn points and loot
    pub seed: u64,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            max_time_before_ms: 2_000,
            max_time_ahead_ms: 400,
            spawn_pull_max: 2.0,
            spawn_attempts: 1_000,
            loot_radius: 60.0,
            loot_health: 30,
            loot_ammo: 15,
            economy: EconomyConfig::default(),
            seed: 0,
        }
    }
}

impl AuthorityConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_window(mut self, before_ms: u64, ahead_ms: u64) -> Self {
        self.max_time_before_ms = before_ms;
        self.max_time_ahead_ms = ahead_ms;
        self
    }
}

/// Who an outbound message is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    All,
    Only(EntityId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub to: Recipient,
    pub message: ServerMessage,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityStats {
    pub updates_accepted: u64,
    pub updates_rejected: u64,
    pub corrections_sent: u64,
    pub shots: u64,
    pub hits: u64,
    pub deaths: u64,
    pub loot_collected: u64,
    pub boosters_sold: u64,
}

pub struct Authority {
    config: AuthorityConfig,
    registry: Registry,
    accounts: BTreeMap<EntityId, Account>,
    /// Dead entities whose death has been broadcast
    fallen: BTreeSet<EntityId>,
    loot: BTreeMap<LootId, LootDrop>,
    rng: ChaCha8Rng,
    outbox: Vec<Outbound>,
    stats: AuthorityStats,
}

impl Authority {
    pub fn new(physics: Arc<PhysicsIntegrator>, ledger_config: LedgerConfig, config: AuthorityConfig) -> Self {
        // A rejected update is answered with a correction and never retried.
        // History must reach back as far as the oldest update still accepted.
        let ledger_config = LedgerConfig {
            max_orphans: 0,
            retention_ms: ledger_config
                .retention_ms
                .max(config.max_time_before_ms + config.max_time_ahead_ms),
            ..ledger_config
        };
        Self {
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            registry: Registry::new(physics, ledger_config),
            config,
            accounts: BTreeMap::new(),
            fallen: BTreeSet::new(),
            loot: BTreeMap::new(),
            outbox: Vec::new(),
            stats: AuthorityStats::default(),
        }
    }

    pub fn config(&self) -> &AuthorityConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn players(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.accounts.keys().copied()
    }

    pub fn account(&self, id: &EntityId) -> Option<&Account> {
        self.accounts.get(id)
    }

    pub fn loot(&self) -> &BTreeMap<LootId, LootDrop> {
        &self.loot
    }

    pub fn stats(&self) -> &AuthorityStats {
        &self.stats
    }

    pub fn take_outbound(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.outbox)
    }

    // ========================================================================
    // Membership
    // ========================================================================

    /// Admits a player with a fresh account and spawns its entity.
    pub fn join(&mut self, id: EntityId, now: u64) -> TrajectoryState {
        info!("Player {} joined", id);
        self.accounts.insert(id, Account::new(&self.config.economy));
        self.spawn(id, now)
    }

    pub fn leave(&mut self, id: EntityId) {
        if self.accounts.remove(&id).is_some() {
            info!("Player {} left", id);
            self.registry.remove(&id);
            self.fallen.remove(&id);
            self.broadcast(ServerMessage::PlayerLeave(id));
        }
    }

    /// Places a new entity for `id`. A respawn keeps the player's account.
    fn spawn(&mut self, id: EntityId, now: u64) -> TrajectoryState {
        let physics = self.registry.physics().clone();
        let config = physics.config();
        let position = physics.world().spawn_point(
            &mut self.rng,
            config.gravity_constant,
            self.config.spawn_pull_max,
            config.entity_radius,
            self.config.spawn_attempts,
        );
        let state = TrajectoryState::spawned(position, now, config.max_health);
        self.registry.spawn(id, state.clone());
        self.fallen.remove(&id);
        self.broadcast(ServerMessage::PlayerJoin(PlayerSnapshot {
            id,
            trajectory: state.clone(),
        }));
        state
    }

    // ========================================================================
    // Messages
    // ========================================================================

    /// Handles one message from `from` at authority time `now`.
    pub fn handle(&mut self, from: EntityId, message: ClientMessage, now: u64) {
        if !self.accounts.contains_key(&from) {
            debug!("Dropping {} from unknown player {}", message.kind(), from);
            return;
        }
        // Liveness is judged at `now`: a sender that has since crashed is
        // reported dead before its message is looked at.
        self.catch_up(from, now);
        self.announce_deaths();

        let alive = self.registry.get(&from).is_some_and(|ledger| !ledger.is_terminal());
        let allowed = match message {
            ClientMessage::Ping { .. } | ClientMessage::StateQuery | ClientMessage::Correct(_) => true,
            ClientMessage::Spawn => !alive,
            _ => alive,
        };
        if !allowed {
            debug!("Rejected {} from {}", message.kind(), from);
            return;
        }

        match message {
            ClientMessage::Ping { sent_at } => {
                self.send(from, ServerMessage::Pong { sent_at, time: now });
            }
            ClientMessage::Spawn => {
                self.spawn(from, now);
            }
            ClientMessage::TrajectoryUpdate { change, at, time } => {
                let Some(price) = self.price_for(from, change) else {
                    debug!("{} cannot pay for {:?}", from, change);
                    self.stats.updates_rejected += 1;
                    self.correct_sender(from, from, now);
                    return;
                };
                match self.accept_update(from, change, at, time, now) {
                    Ok(()) => {
                        if price > 0 {
                            if let Some(account) = self.accounts.get_mut(&from) {
                                account.charge(change, &self.config.economy);
                            }
                            self.stats.boosters_sold += 1;
                        }
                        self.stats.updates_accepted += 1;
                        self.broadcast(ServerMessage::TrajectoryUpdate {
                            change,
                            at,
                            time,
                            from,
                        });
                    }
                    Err(e) => {
                        debug!("Update from {} rejected: {}", from, e);
                        self.stats.updates_rejected += 1;
                        self.correct_sender(from, from, now);
                    }
                }
            }
            ClientMessage::Shoot(info) => self.shoot(from, info, now),
            ClientMessage::ClaimLoot { loot_id } => self.claim_loot(from, loot_id, now),
            ClientMessage::StateQuery => {
                self.tick(now);
                let players = self
                    .registry
                    .iter()
                    .filter(|(_, ledger)| !ledger.is_terminal())
                    .map(|(id, ledger)| PlayerSnapshot {
                        id: *id,
                        trajectory: ledger.snapshot(),
                    })
                    .collect();
                let loot = self.loot.values().cloned().collect();
                let account = self.accounts.get(&from).copied();
                self.send(from, ServerMessage::GameState { players, loot, account });
            }
            ClientMessage::Correct(id) => {
                if self.registry.contains(&id) {
                    self.correct_sender(from, id, now);
                } else {
                    debug!("{} requested correction for unknown {}", from, id);
                }
            }
        }
    }

    /// Advances every ledger to `now` and reports deaths by collision.
    pub fn tick(&mut self, now: u64) {
        let ids: Vec<EntityId> = self.registry.ids().collect();
        for id in ids {
            self.catch_up(id, now);
        }
        self.announce_deaths();
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Advances `id` to `target`. A death on the way is left to
    /// [`Self::announce_deaths`].
    fn catch_up(&mut self, id: EntityId, target: u64) {
        let Some(ledger) = self.registry.get_mut(&id) else {
            return;
        };
        if let Err(e) = ledger.advance(target, false) {
            if !e.is_terminal() {
                debug!("{} stopped short of t={}: {}", id, target, e);
            }
        }
    }

    /// Broadcasts every death not yet reported, once per life.
    fn announce_deaths(&mut self) {
        let fallen: Vec<EntityId> = self
            .registry
            .iter()
            .filter(|(id, ledger)| ledger.is_terminal() && !self.fallen.contains(*id))
            .map(|(id, _)| *id)
            .collect();
        for id in fallen {
            info!("{} is down", id);
            self.death(id);
        }
    }

    /// The price `from` pays for authoring `change`, if it may and can.
    fn price_for(&self, from: EntityId, change: Change) -> Option<u32> {
        let price = Account::price(change, &self.config.economy)?;
        (price <= self.accounts.get(&from)?.cash).then_some(price)
    }

    fn accept_update(
        &mut self,
        from: EntityId,
        change: Change,
        at: Fingerprint,
        time: u64,
        now: u64,
    ) -> Result<(), LedgerError> {
        if time + self.config.max_time_before_ms < now || time > now + self.config.max_time_ahead_ms {
            return Err(LedgerError::OutsideWindow { time, now });
        }
        self.catch_up(from, time);
        let ledger = self
            .registry
            .get_mut(&from)
            .ok_or(LedgerError::CausalityViolation { predecessor: at, time })?;
        if time > ledger.time() {
            // Off the step grid: no history point can exist at this time.
            return Err(LedgerError::CausalityViolation { predecessor: at, time });
        }
        ledger.insert_update(change, at, time)
    }

    fn shoot(&mut self, shooter: EntityId, info: ShootInfo, now: u64) {
        let loaded = self.accounts.get_mut(&shooter).is_some_and(Account::take_round);
        if !loaded {
            debug!("{} fired with an empty magazine", shooter);
            return;
        }
        self.stats.shots += 1;
        let hit = self.confirm_hit(shooter, &info, now);
        if let Some(hit) = hit {
            self.stats.hits += 1;
            if let Some(victim) = self.registry.get_mut(&hit.victim) {
                if let Err(e) = victim.insert_authoritative(Change::Bullet { damage: hit.damage }, hit.time) {
                    warn!("Hit on {} could not be applied: {}", hit.victim, e);
                }
                if victim.is_terminal() {
                    info!("{} was shot down by {}", hit.victim, shooter);
                }
            }
        }
        self.broadcast(ServerMessage::Shoot { shooter, info, hit });
        self.announce_deaths();
    }

    /// Replays shooter and victim to the states the shooter claims to have
    /// seen and checks the hit on those.
    ///
    /// The damage lands at the victim's present, not at the claimed time,
    /// so history the victim already played out is never rewritten.
    fn confirm_hit(&mut self, shooter: EntityId, info: &ShootInfo, now: u64) -> Option<Hit> {
        let claim = info.victim?;
        if claim.id == shooter {
            return None;
        }
        let physics = self.registry.physics().clone();

        self.catch_up(shooter, info.time);
        let shooter_ledger = self.registry.get(&shooter)?;
        let Some(shooter_state) = shooter_ledger.state_matching(info.at, info.time) else {
            debug!("Shot from {} does not match its history at t={}", shooter, info.time);
            return None;
        };

        if self.registry.get(&claim.id)?.is_terminal() {
            return None;
        }
        self.catch_up(claim.id, claim.time);
        let victim = self.registry.get(&claim.id)?;
        let Some(victim_state) = victim.state_matching(claim.at, claim.time) else {
            debug!("Victim {} was not at the claimed state t={}", claim.id, claim.time);
            return None;
        };

        TrajectoryLedger::shot_between(&physics, &shooter_state, &victim_state)?;
        self.catch_up(claim.id, now);
        let victim = self.registry.get(&claim.id)?;
        if victim.is_terminal() {
            return None;
        }
        Some(Hit {
            victim: claim.id,
            damage: physics.config().weapon_damage,
            time: victim.time(),
        })
    }

    fn death(&mut self, id: EntityId) {
        self.stats.deaths += 1;
        self.fallen.insert(id);
        let position = self.registry.get(&id).map(|ledger| ledger.state().position);
        let loot = position.map(|position| {
            let content = self.roll_loot(id);
            LootDrop {
                id: LootId(Uuid::from_u128(self.rng.gen())),
                position,
                content,
            }
        });
        if let Some(drop) = &loot {
            self.loot.insert(drop.id, drop.clone());
        }
        self.broadcast(ServerMessage::PlayerDeath { from: id, loot });
    }

    /// Picks what a dead player drops. A cash drop is half the victim's cash,
    /// which the victim keeps.
    fn roll_loot(&mut self, victim: EntityId) -> LootContent {
        match self.rng.gen_range(0..101) {
            0..=25 => LootContent::Cash(self.accounts.get(&victim).map_or(0, |account| account.cash / 2)),
            26..=50 => LootContent::PistolAmmo(self.config.loot_ammo),
            51..=75 => LootContent::Health(self.config.loot_health),
            _ => LootContent::SpeedBoost,
        }
    }

    fn claim_loot(&mut self, collector: EntityId, loot_id: LootId, now: u64) {
        let Some(drop) = self.loot.get(&loot_id).cloned() else {
            debug!("{} claimed unknown loot {}", collector, loot_id);
            self.send(collector, ServerMessage::LootReject(loot_id));
            return;
        };
        self.catch_up(collector, now);
        let Some(ledger) = self.registry.get_mut(&collector) else {
            return;
        };

        let distance = (ledger.state().position - drop.position).norm();
        if distance > self.config.loot_radius {
            debug!("{} too far from loot {} ({:.1})", collector, loot_id, distance);
            self.send(collector, ServerMessage::LootReject(loot_id));
            return;
        }

        let time = ledger.time();
        if let Some(change) = drop.content.change() {
            if let Err(e) = ledger.insert_authoritative(change, time) {
                warn!("Loot {} could not be applied to {}: {}", loot_id, collector, e);
                self.send(collector, ServerMessage::LootReject(loot_id));
                return;
            }
        }
        if let Some(account) = self.accounts.get_mut(&collector) {
            account.credit(&drop.content);
        }
        self.loot.remove(&loot_id);
        self.stats.loot_collected += 1;
        self.broadcast(ServerMessage::LootCollected {
            loot_id,
            collector,
            content: drop.content,
            time,
        });
    }

    fn correct_sender(&mut self, to: EntityId, id: EntityId, now: u64) {
        self.catch_up(id, now);
        let Some(ledger) = self.registry.get(&id) else {
            return;
        };
        let trajectory = ledger.snapshot();
        self.stats.corrections_sent += 1;
        self.send(to, ServerMessage::Correct { id, trajectory });
    }

    fn send(&mut self, to: EntityId, message: ServerMessage) {
        self.outbox.push(Outbound {
            to: Recipient::Only(to),
            message,
        });
    }

    fn broadcast(&mut self, message: ServerMessage) {
        self.outbox.push(Outbound {
            to: Recipient::All,
            message,
        });
    }
}
