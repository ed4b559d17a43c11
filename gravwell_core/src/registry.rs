//! Entity registry: the single owner of every trajectory ledger.

use crate::ledger::{LedgerConfig, TrajectoryLedger};
use crate::physics::PhysicsIntegrator;
use crate::state::TrajectoryState;
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;
use xxhash_rust::xxh3::xxh3_64;

/// Public identifier of an entity.
///
/// Derived from the player's private token so the token itself never has to
/// be broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u64);

impl EntityId {
    pub fn from_token(token: &Uuid) -> Self {
        Self(xxh3_64(token.as_bytes()))
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Maps entity ids to their exclusively owned ledgers.
///
/// Iteration order is by id so every observer walks entities identically.
#[derive(Debug, Clone)]
pub struct Registry {
    physics: Arc<PhysicsIntegrator>,
    config: LedgerConfig,
    ledgers: BTreeMap<EntityId, TrajectoryLedger>,
}

impl Registry {
    pub fn new(physics: Arc<PhysicsIntegrator>, config: LedgerConfig) -> Self {
        Self {
            physics,
            config,
            ledgers: BTreeMap::new(),
        }
    }

    pub fn physics(&self) -> &Arc<PhysicsIntegrator> {
        &self.physics
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Creates a fresh ledger for `id`, replacing any previous one.
    pub fn spawn(&mut self, id: EntityId, initial: TrajectoryState) -> &mut TrajectoryLedger {
        let ledger = TrajectoryLedger::new(self.physics.clone(), self.config.clone(), initial);
        match self.ledgers.entry(id) {
            Entry::Occupied(mut slot) => {
                slot.insert(ledger);
                slot.into_mut()
            }
            Entry::Vacant(slot) => slot.insert(ledger),
        }
    }

    pub fn remove(&mut self, id: &EntityId) -> Option<TrajectoryLedger> {
        self.ledgers.remove(id)
    }

    pub fn get(&self, id: &EntityId) -> Option<&TrajectoryLedger> {
        self.ledgers.get(id)
    }

    pub fn get_mut(&mut self, id: &EntityId) -> Option<&mut TrajectoryLedger> {
        self.ledgers.get_mut(id)
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.ledgers.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.ledgers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ledgers.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.ledgers.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&EntityId, &TrajectoryLedger)> {
        self.ledgers.iter()
    }

    /// Rebuilds the registry from a full snapshot.
    ///
    /// Entities missing from the snapshot are dropped. Existing ledgers are
    /// corrected in place so events stamped after the snapshot survive; a
    /// snapshot older than a ledger's own authoritative baseline leaves that
    /// ledger alone.
    pub fn rebuild<I>(&mut self, players: I)
    where
        I: IntoIterator<Item = (EntityId, TrajectoryState)>,
    {
        let mut previous = std::mem::take(&mut self.ledgers);
        for (id, state) in players {
            match previous.remove(&id) {
                Some(mut ledger) => {
                    if let Err(e) = ledger.correct(state) {
                        debug!("Snapshot of {} not applied: {}", id, e);
                    }
                    self.ledgers.insert(id, ledger);
                }
                None => {
                    self.spawn(id, state);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::PhysicsConfig;
    use crate::world::World;
    use nalgebra::Vector2;

    fn registry() -> Registry {
        let physics = Arc::new(PhysicsIntegrator::new(World::empty(6000.0), PhysicsConfig::default()));
        Registry::new(physics, LedgerConfig::default())
    }

    #[test]
    fn test_entity_id_from_token_is_stable() {
        let token = Uuid::from_u128(0x1234);
        assert_eq!(EntityId::from_token(&token), EntityId::from_token(&token));
        assert_ne!(EntityId::from_token(&token), EntityId::from_token(&Uuid::from_u128(0x1235)));
        assert_eq!(EntityId(0xab).to_string(), "00000000000000ab");
    }

    #[test]
    fn test_spawn_replaces_ledger() {
        let mut registry = registry();
        let id = EntityId(1);

        registry.spawn(id, TrajectoryState::spawned(Vector2::zeros(), 0, 255));
        registry.get_mut(&id).unwrap().advance(500, false).unwrap();
        registry.spawn(id, TrajectoryState::spawned(Vector2::new(10.0, 0.0), 900, 255));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&id).unwrap().time(), 900);
    }

    #[test]
    fn test_rebuild_orders_by_id() {
        let mut registry = registry();
        registry.spawn(EntityId(99), TrajectoryState::spawned(Vector2::zeros(), 0, 255));

        registry.rebuild(vec![
            (EntityId(3), TrajectoryState::spawned(Vector2::zeros(), 100, 255)),
            (EntityId(1), TrajectoryState::spawned(Vector2::zeros(), 100, 255)),
        ]);

        assert_eq!(registry.ids().collect::<Vec<_>>(), vec![EntityId(1), EntityId(3)]);
        assert!(registry.remove(&EntityId(3)).is_some());
        assert!(!registry.contains(&EntityId(3)));
    }

    #[test]
    fn test_rebuild_keeps_events_after_snapshot() {
        let mut registry = registry();
        let id = EntityId(5);
        let ledger = registry.spawn(id, TrajectoryState::spawned(Vector2::zeros(), 0, 255));
        ledger.advance(600, false).unwrap();
        ledger.apply_change(crate::state::Change::PropOn);
        ledger.advance(700, false).unwrap();

        registry.rebuild(vec![(id, TrajectoryState::spawned(Vector2::zeros(), 500, 255))]);
        let ledger = registry.get_mut(&id).unwrap();
        assert_eq!(ledger.time(), 500);
        assert_eq!(ledger.events().count(), 1);

        ledger.advance(700, false).unwrap();
        assert!(ledger.state().propelling);
    }
}
