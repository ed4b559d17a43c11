//! Convergence oracle for simulation.
//!
//! The authority's registry is the ground truth. After a run settles, every
//! peer must hold a ledger for each living entity that replays to the same
//! fingerprint as the authority's at a common time, and must agree on the
//! loot lying in the world.

use gravwell_core::{Authority, EntityId, Fingerprint, PeerSession, TrajectoryLedger};
use serde::Serialize;
use std::collections::BTreeSet;

/// One entity on which a peer disagrees with the authority.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Divergence {
    pub peer: EntityId,
    pub entity: EntityId,
    pub expected: Option<Fingerprint>,
    pub found: Option<Fingerprint>,

    /// Distance between the two replayed positions, when both exist
    pub position_error: Option<f32>,
}

/// Outcome of comparing every peer against the authority.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConvergenceReport {
    /// Logical time both sides were replayed to
    pub checked_at: u64,

    /// Living entities on the authority
    pub entities: usize,

    /// Peers compared
    pub peers: usize,
    pub divergences: Vec<Divergence>,

    /// Peers whose loot set differs from the authority's
    pub loot_mismatches: usize,
}

impl ConvergenceReport {
    pub fn converged(&self) -> bool {
        self.divergences.is_empty() && self.loot_mismatches == 0
    }

    pub fn max_position_error(&self) -> f32 {
        self.divergences
            .iter()
            .filter_map(|d| d.position_error)
            .fold(0.0, f32::max)
    }

    /// One line describing the first problem, for failure messages.
    pub fn summary(&self) -> String {
        match self.divergences.first() {
            Some(d) => format!(
                "{} divergent ledgers (first: peer {} sees {} as {:?}, authority {:?})",
                self.divergences.len(),
                d.peer,
                d.entity,
                d.found,
                d.expected
            ),
            None if self.loot_mismatches > 0 => format!("{} peers disagree on loot", self.loot_mismatches),
            None => "converged".to_string(),
        }
    }
}

/// Compares peer sessions against the authority.
pub struct Oracle;

impl Oracle {
    /// Replays every ledger to the newest time all of them have reached and
    /// compares fingerprints.
    pub fn check<'a>(authority: &Authority, peers: impl IntoIterator<Item = &'a PeerSession>) -> ConvergenceReport {
        let peers: Vec<&PeerSession> = peers.into_iter().collect();
        let living: Vec<(EntityId, &TrajectoryLedger)> = authority
            .registry()
            .iter()
            .filter(|(_, ledger)| !ledger.is_terminal())
            .map(|(id, ledger)| (*id, ledger))
            .collect();

        let checked_at = living
            .iter()
            .map(|(_, ledger)| ledger.time())
            .chain(peers.iter().flat_map(|peer| {
                living
                    .iter()
                    .filter_map(move |(id, _)| peer.registry().get(id).map(TrajectoryLedger::time))
            }))
            .min()
            .unwrap_or(0);

        let truth_loot: BTreeSet<_> = authority.loot().keys().copied().collect();
        let mut report = ConvergenceReport {
            checked_at,
            entities: living.len(),
            peers: peers.len(),
            ..ConvergenceReport::default()
        };

        for peer in &peers {
            for (id, truth) in &living {
                let expected = truth.state_at(checked_at);
                let found = peer.registry().get(id).and_then(|ledger| ledger.state_at(checked_at));
                let expected_fp = expected.as_ref().map(|state| state.fingerprint());
                let found_fp = found.as_ref().map(|state| state.fingerprint());
                if expected_fp != found_fp {
                    report.divergences.push(Divergence {
                        peer: peer.own_id(),
                        entity: *id,
                        expected: expected_fp,
                        found: found_fp,
                        position_error: expected
                            .zip(found)
                            .map(|(a, b)| (a.position - b.position).norm()),
                    });
                }
            }
            let peer_loot: BTreeSet<_> = peer.loot().keys().copied().collect();
            if peer_loot != truth_loot {
                report.loot_mismatches += 1;
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gravwell_core::protocol::{PlayerSnapshot, ServerMessage};
    use gravwell_core::{
        AuthorityConfig, LedgerConfig, PhysicsConfig, PhysicsIntegrator, SessionConfig, World,
    };
    use std::sync::Arc;

    fn physics() -> Arc<PhysicsIntegrator> {
        Arc::new(PhysicsIntegrator::new(World::empty(6000.0), PhysicsConfig::default()))
    }

    /// A peer that received the authority's full state.
    fn mirror(authority: &Authority, own: EntityId) -> PeerSession {
        let mut session = PeerSession::new(own, physics(), LedgerConfig::default(), SessionConfig::default());
        session.handle(
            ServerMessage::GameState {
                players: authority
                    .registry()
                    .iter()
                    .map(|(id, ledger)| PlayerSnapshot {
                        id: *id,
                        trajectory: ledger.snapshot(),
                    })
                    .collect(),
                loot: authority.loot().values().cloned().collect(),
                account: authority.account(&own).copied(),
            },
            0,
        );
        session
    }

    #[test]
    fn test_mirrored_peer_converges() {
        let mut authority = Authority::new(physics(), LedgerConfig::default(), AuthorityConfig::default());
        authority.join(EntityId(1), 0);
        authority.join(EntityId(2), 0);
        let peer = mirror(&authority, EntityId(1));

        let report = Oracle::check(&authority, [&peer]);

        assert!(report.converged(), "{}", report.summary());
        assert_eq!(report.entities, 2);
        assert_eq!(report.peers, 1);
    }

    #[test]
    fn test_missing_ledger_is_a_divergence() {
        let mut authority = Authority::new(physics(), LedgerConfig::default(), AuthorityConfig::default());
        authority.join(EntityId(1), 0);
        let peer = mirror(&authority, EntityId(1));
        authority.join(EntityId(2), 0);

        let report = Oracle::check(&authority, [&peer]);

        assert!(!report.converged());
        assert_eq!(report.divergences.len(), 1);
        assert_eq!(report.divergences[0].entity, EntityId(2));
        assert_eq!(report.divergences[0].found, None);
    }
}
