//! Trajectory Ledger - ordered change history plus materialized cache.
//!
//! A ledger owns one entity's trajectory. Local input is appended at the
//! newest time; remote input is spliced into history at the point whose
//! fingerprint it was authored against, and everything after it is replayed.
//!
//! ```text
//!  baseline ──step──step──[A]──step──[B]──step──step──▶ cache
//!                 ▲                    ▲
//!                 │                    └─ remote C (pred = fp after B) lands here
//!                 └─ history points are checked after every step and event
//! ```
//!
//! Entries authored beyond the cache are held as *pending* and verified when
//! `advance` reaches them. Entries at an identical time are chained by
//! fingerprint first (the one authored against the current state goes
//! first) and by arrival order after that.

use crate::error::{InvalidState, LedgerError};
use crate::fingerprint::Fingerprint;
use crate::hitscan;
use crate::interpolation::{InterpolationConfig, Interpolator, RenderSample, Sample};
use crate::physics::PhysicsIntegrator;
use crate::state::{Change, ChangeEvent, TrajectoryState};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

/// Configuration for a [`TrajectoryLedger`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// How far back late updates are still accepted (default: 2000 ms)
    pub retention_ms: u64,

    /// How far ahead of the authority clock an update may be stamped
    /// (default: 400 ms)
    pub max_lead_ms: u64,

    /// Render samples kept for interpolation (default: 64)
    pub max_samples: usize,

    /// Out-of-order events parked while waiting for their predecessor
    /// (default: 16, 0 disables parking)
    pub max_orphans: usize,

    /// Extrapolation horizon for `lerp` (default: 500 ms)
    pub max_extrapolation_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            retention_ms: 2000,
            max_lead_ms: 400,
            max_samples: 64,
            max_orphans: 16,
            max_extrapolation_ms: 500,
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    event: ChangeEvent,

    /// Accepted into history. Pending remote events stay unverified until
    /// their predecessor fingerprint has been checked.
    verified: bool,
}

/// One entity's event log and materialized state.
#[derive(Debug, Clone)]
pub struct TrajectoryLedger {
    physics: Arc<PhysicsIntegrator>,
    config: LedgerConfig,
    interpolator: Interpolator,

    /// State every replay starts from
    baseline: TrajectoryState,

    /// Time of the last authoritative snapshot this ledger was built from
    authority_time: u64,

    entries: Vec<Entry>,

    /// Entries before this index have been folded into `cache`
    cursor: usize,

    cache: TrajectoryState,
    samples: VecDeque<Sample>,
    orphans: Vec<ChangeEvent>,
    provisional: bool,
}

impl TrajectoryLedger {
    /// Creates a ledger whose history starts at `initial`.
    pub fn new(physics: Arc<PhysicsIntegrator>, config: LedgerConfig, initial: TrajectoryState) -> Self {
        let interpolator = Interpolator::new(InterpolationConfig {
            max_extrapolation_ms: config.max_extrapolation_ms,
            rotation_speed: physics.config().rotation_speed,
        });
        let mut samples = VecDeque::with_capacity(config.max_samples);
        samples.push_back(Sample::from(&initial));

        Self {
            physics,
            config,
            interpolator,
            authority_time: initial.time,
            baseline: initial.clone(),
            entries: Vec::new(),
            cursor: 0,
            cache: initial,
            samples,
            orphans: Vec::new(),
            provisional: false,
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// The materialized cache.
    pub fn state(&self) -> &TrajectoryState {
        &self.cache
    }

    pub fn time(&self) -> u64 {
        self.cache.time
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.cache.fingerprint()
    }

    pub fn is_terminal(&self) -> bool {
        self.cache.is_terminal()
    }

    /// True while the cache was advanced past an event it could not verify.
    pub fn is_provisional(&self) -> bool {
        self.provisional
    }

    pub fn baseline(&self) -> &TrajectoryState {
        &self.baseline
    }

    pub fn authority_time(&self) -> u64 {
        self.authority_time
    }

    /// Retained events in causal order, pending ones included.
    pub fn events(&self) -> impl Iterator<Item = &ChangeEvent> + '_ {
        self.entries.iter().map(|entry| &entry.event)
    }

    /// Events received but not yet verified against history.
    pub fn pending_count(&self) -> usize {
        self.entries.iter().filter(|entry| !entry.verified).count()
    }

    /// Events parked because their predecessor has not arrived yet.
    pub fn orphan_count(&self) -> usize {
        self.orphans.len()
    }

    pub fn samples(&self) -> &VecDeque<Sample> {
        &self.samples
    }

    pub fn physics(&self) -> &Arc<PhysicsIntegrator> {
        &self.physics
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Copy of the cache, suitable for shipping as a correction.
    pub fn snapshot(&self) -> TrajectoryState {
        self.cache.clone()
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    /// Appends a locally authored change at the current materialized time.
    ///
    /// Returns the stamped event; its `predecessor` is the fingerprint the
    /// change was authored against and is what peers must match.
    pub fn apply_change(&mut self, change: Change) -> ChangeEvent {
        let event = ChangeEvent::new(change, self.cache.time, Some(self.cache.fingerprint()));
        self.entries.insert(self.cursor, Entry { event, verified: true });
        self.cursor += 1;
        self.cache.apply(change, self.physics.config().max_health);
        self.record_sample();
        event
    }

    /// Splices a remote change into history.
    ///
    /// Events at or before the cache must land on a history point with
    /// fingerprint `predecessor` at exactly `event_time`; when none exists
    /// the ledger is left untouched and `CausalityViolation` is returned.
    /// The rejected event is parked and retried after later inserts, so an
    /// event that overtook its predecessor heals once the predecessor lands.
    ///
    /// Events beyond the cache are queued and verified by [`advance`](Self::advance).
    pub fn insert_update(
        &mut self,
        change: Change,
        predecessor: Fingerprint,
        event_time: u64,
    ) -> Result<(), LedgerError> {
        let event = ChangeEvent::new(change, event_time, Some(predecessor));
        self.insert_event(event, true)
    }

    /// Inserts an authority-stamped change (damage, loot) purely by time.
    pub fn insert_authoritative(&mut self, change: Change, time: u64) -> Result<(), LedgerError> {
        if time < self.baseline.time {
            return Err(LedgerError::OutsideWindow {
                time,
                now: self.cache.time,
            });
        }
        let event = ChangeEvent::new(change, time, None);
        let at = self.position_for(time, 0);
        self.entries.insert(at, Entry { event, verified: true });

        if time <= self.cache.time {
            self.rematerialize();
            self.retry_orphans();
        }
        Ok(())
    }

    /// Steps the cache forward to `target`, applying pending events at the
    /// step they were authored on.
    ///
    /// Fails with `InvalidMaterializedState` when health reaches zero or a
    /// pending event does not match the state it claims to follow. A
    /// non-speculative advance stops in front of such an event; a
    /// speculative one skips it, keeps going and marks the cache
    /// provisional until a correction or a clean replay arrives.
    pub fn advance(&mut self, target: u64, speculative: bool) -> Result<(), LedgerError> {
        let failure = self.roll_forward(target, !speculative);
        if let Some(LedgerError::InvalidMaterializedState {
            reason: InvalidState::MissingEvent { .. },
            ..
        }) = &failure
        {
            if speculative {
                self.provisional = true;
            }
        }
        self.prune();
        failure.map_or(Ok(()), Err)
    }

    /// Replaces the ledger with an authoritative snapshot.
    ///
    /// Received events stamped after the snapshot are kept and re-verified
    /// against the corrected timeline; everything else is discarded.
    pub fn correct(&mut self, snapshot: TrajectoryState) -> Result<(), LedgerError> {
        if snapshot.time < self.authority_time {
            return Err(LedgerError::StaleCorrection {
                correction_time: snapshot.time,
                baseline_time: self.authority_time,
            });
        }

        let cut = snapshot.time;
        self.entries = std::mem::take(&mut self.entries)
            .into_iter()
            .filter(|entry| entry.event.time > cut)
            .map(|mut entry| {
                entry.verified = entry.event.predecessor.is_none();
                entry
            })
            .collect();
        self.cursor = 0;
        self.authority_time = cut;
        self.baseline = snapshot.clone();
        self.cache = snapshot;
        self.samples.clear();
        self.samples.push_back(Sample::from(&self.cache));
        self.orphans.clear();
        self.provisional = false;
        Ok(())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Distance at which this entity's shot would hit `other`, if it would.
    pub fn hits(&self, other: &TrajectoryLedger) -> Option<f32> {
        Self::shot_between(&self.physics, &self.cache, &other.cache)
    }

    /// Hit test between two arbitrary states, used for lag-compensated
    /// shots replayed to their declared times.
    pub fn shot_between(
        physics: &PhysicsIntegrator,
        shooter: &TrajectoryState,
        target: &TrajectoryState,
    ) -> Option<f32> {
        if shooter.is_terminal() || target.is_terminal() {
            return None;
        }
        let config = physics.config();
        hitscan::ray_circle(
            &shooter.position,
            shooter.spin,
            &target.position,
            config.entity_radius,
            config.weapon_range,
        )
    }

    /// Smooth render sample at `time`.
    pub fn lerp(&self, time: u64) -> Option<RenderSample> {
        self.interpolator.lerp(&self.samples, time)
    }

    /// Replays accepted history up to `time`.
    ///
    /// `None` when `time` predates the retained history.
    pub fn state_at(&self, time: u64) -> Option<TrajectoryState> {
        if time < self.baseline.time {
            return None;
        }
        let (state, _) = self.fold_accepted(time);
        Some(state)
    }

    /// The retained history point at `time` with the given fingerprint.
    ///
    /// Used to check claims about past states, such as where a shooter and
    /// its victim were when the shot was fired.
    pub fn state_matching(&self, fingerprint: Fingerprint, time: u64) -> Option<TrajectoryState> {
        if time < self.baseline.time || time > self.cache.time {
            return None;
        }
        self.locate(fingerprint, time).map(|(_, state)| state)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn insert_event(&mut self, event: ChangeEvent, park_on_failure: bool) -> Result<(), LedgerError> {
        if self.entries.iter().any(|entry| entry.event == event) {
            return Ok(());
        }
        let Some(predecessor) = event.predecessor else {
            return self.insert_authoritative(event.change, event.time);
        };

        if event.time > self.cache.time {
            let at = self.position_for(event.time, self.cursor);
            self.entries.insert(at, Entry { event, verified: false });
            return Ok(());
        }

        let rejection = LedgerError::CausalityViolation {
            predecessor,
            time: event.time,
        };
        if event.time < self.baseline.time {
            return Err(rejection);
        }

        match self.locate(predecessor, event.time) {
            Some((at, _)) => {
                self.entries.insert(at, Entry { event, verified: true });
                self.rematerialize();
                if park_on_failure {
                    self.retry_orphans();
                }
                Ok(())
            }
            None => {
                debug!(
                    "No history point {} at t={} (cache t={})",
                    predecessor, event.time, self.cache.time
                );
                if park_on_failure {
                    self.park(event);
                }
                Err(rejection)
            }
        }
    }

    /// Index after the last entry stamped at or before `time`, never
    /// before `floor`.
    fn position_for(&self, time: u64, floor: usize) -> usize {
        let mut at = self.entries.len();
        while at > floor && self.entries[at - 1].event.time > time {
            at -= 1;
        }
        at
    }

    /// Finds the history point at `time` whose fingerprint is `predecessor`,
    /// returning the entry index an event authored there belongs at and the
    /// state at that point. The latest matching point wins.
    fn locate(&self, predecessor: Fingerprint, time: u64) -> Option<(usize, TrajectoryState)> {
        let max_health = self.physics.config().max_health;
        let dt = self.physics.timestep_ms();
        let mut state = self.baseline.clone();
        let mut idx = 0;
        let mut found = None;

        loop {
            if state.time == time && state.fingerprint() == predecessor {
                found = Some((idx, state.clone()));
            }
            while idx < self.entries.len() && self.entries[idx].event.time <= state.time {
                if self.entries[idx].verified {
                    state.apply(self.entries[idx].event.change, max_health);
                }
                idx += 1;
                if state.time == time && state.fingerprint() == predecessor {
                    found = Some((idx, state.clone()));
                }
            }
            if state.time >= time || state.time + dt > self.cache.time || !self.physics.step(&mut state) {
                break;
            }
        }
        found
    }

    /// Rebuilds the cache from the baseline up to its previous time.
    fn rematerialize(&mut self) {
        let target = self.cache.time;
        self.cache = self.baseline.clone();
        self.cursor = 0;
        self.samples.clear();
        self.samples.push_back(Sample::from(&self.cache));

        let failure = self.roll_forward(target, false);
        self.provisional = matches!(
            failure,
            Some(LedgerError::InvalidMaterializedState {
                reason: InvalidState::MissingEvent { .. },
                ..
            })
        );
    }

    /// Folds entries and fixed steps into the cache until `target`.
    fn roll_forward(&mut self, target: u64, halt_on_gap: bool) -> Option<LedgerError> {
        let max_health = self.physics.config().max_health;
        let dt = self.physics.timestep_ms();
        let mut gap = None;

        loop {
            while self.cursor < self.entries.len()
                && self.entries[self.cursor].event.time <= self.cache.time
            {
                if !self.entries[self.cursor].verified {
                    let found = self.cache.fingerprint();
                    match self.verify_at_cursor(found) {
                        Ok(()) => self.entries[self.cursor].verified = true,
                        Err(expected) => {
                            debug!(
                                "Pending event at t={} expected {} but state is {}",
                                self.cache.time, expected, found
                            );
                            gap.get_or_insert(LedgerError::InvalidMaterializedState {
                                time: self.cache.time,
                                reason: InvalidState::MissingEvent { expected, found },
                            });
                            if halt_on_gap {
                                return gap;
                            }
                            self.cursor += 1;
                            continue;
                        }
                    }
                }
                self.cache.apply(self.entries[self.cursor].event.change, max_health);
                self.cursor += 1;
                self.record_sample();
            }

            if self.cache.is_terminal() {
                let steps = self.physics.steps_between(self.cache.time, target);
                if steps > 0 {
                    self.cache.time += steps * dt;
                    self.record_sample();
                }
                return Some(LedgerError::InvalidMaterializedState {
                    time: self.cache.time,
                    reason: InvalidState::Terminal,
                });
            }
            if self.cache.time + dt > target {
                return gap;
            }
            self.physics.step(&mut self.cache);
            self.record_sample();
        }
    }

    /// Makes sure the entry at the cursor was authored against `found`,
    /// pulling forward a same-time pending entry that was. Returns the
    /// expected fingerprint on mismatch.
    fn verify_at_cursor(&mut self, found: Fingerprint) -> Result<(), Fingerprint> {
        let follows = |entry: &Entry| entry.event.predecessor.map_or(true, |p| p == found);
        let head = &self.entries[self.cursor];
        if follows(head) {
            return Ok(());
        }
        let time = head.event.time;
        let expected = head.event.predecessor.unwrap_or(found);

        let mut candidate = self.cursor + 1;
        while candidate < self.entries.len() && self.entries[candidate].event.time == time {
            if !self.entries[candidate].verified && follows(&self.entries[candidate]) {
                let entry = self.entries.remove(candidate);
                self.entries.insert(self.cursor, entry);
                return Ok(());
            }
            candidate += 1;
        }
        Err(expected)
    }

    /// Replays verified entries from the baseline without touching the cache.
    /// Returns the state and the number of entries consumed.
    fn fold_accepted(&self, time: u64) -> (TrajectoryState, usize) {
        let max_health = self.physics.config().max_health;
        let dt = self.physics.timestep_ms();
        let mut state = self.baseline.clone();
        let mut idx = 0;

        loop {
            while idx < self.entries.len() && self.entries[idx].event.time <= state.time {
                if self.entries[idx].verified {
                    state.apply(self.entries[idx].event.change, max_health);
                }
                idx += 1;
            }
            if state.is_terminal() {
                state.time += self.physics.steps_between(state.time, time) * dt;
                return (state, idx);
            }
            if state.time + dt > time {
                return (state, idx);
            }
            self.physics.step(&mut state);
        }
    }

    /// Moves the baseline forward once history spans twice the retention
    /// window.
    fn prune(&mut self) {
        let retention = self.config.retention_ms;
        let mut cutoff = self.cache.time.saturating_sub(retention);
        if cutoff < self.baseline.time + retention {
            return;
        }
        // A skipped event keeps a full window behind it for its predecessor.
        if let Some(skipped) = self.entries[..self.cursor].iter().find(|entry| !entry.verified) {
            cutoff = cutoff.min(skipped.event.time.saturating_sub(retention));
            if cutoff <= self.baseline.time {
                return;
            }
        }

        let (baseline, consumed) = self.fold_accepted(cutoff);
        let consumed = consumed.min(self.cursor);
        self.entries.drain(..consumed);
        self.cursor -= consumed;
        self.baseline = baseline;

        let horizon = self.baseline.time;
        while self.samples.len() > 1 && self.samples.front().is_some_and(|s| s.time < horizon) {
            self.samples.pop_front();
        }
        self.orphans.retain(|orphan| orphan.time >= horizon);
    }

    fn park(&mut self, event: ChangeEvent) {
        if self.config.max_orphans == 0 || self.orphans.contains(&event) {
            return;
        }
        if self.orphans.len() >= self.config.max_orphans {
            self.orphans.remove(0);
        }
        self.orphans.push(event);
    }

    fn retry_orphans(&mut self) {
        loop {
            let mut progressed = false;
            for orphan in std::mem::take(&mut self.orphans) {
                match self.insert_event(orphan, false) {
                    Ok(()) => progressed = true,
                    Err(_) if orphan.time >= self.baseline.time => self.orphans.push(orphan),
                    Err(_) => {}
                }
            }
            if !progressed || self.orphans.is_empty() {
                return;
            }
        }
    }

    fn record_sample(&mut self) {
        let sample = Sample::from(&self.cache);
        match self.samples.back_mut() {
            Some(last) if last.time == sample.time => *last = sample,
            _ => self.samples.push_back(sample),
        }
        while self.samples.len() > self.config.max_samples {
            self.samples.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::PhysicsConfig;
    use crate::world::{GravityBody, World};
    use approx::assert_relative_eq;
    use nalgebra::Vector2;

    fn physics() -> Arc<PhysicsIntegrator> {
        let world = World::new(vec![GravityBody::new(0, 2000.0, 0.0, 80.0)], 6000.0);
        Arc::new(PhysicsIntegrator::new(world, PhysicsConfig::default()))
    }

    fn ledger() -> TrajectoryLedger {
        let initial = TrajectoryState::spawned(Vector2::new(-500.0, 300.0), 0, 255)
            .with_velocity(Vector2::new(20.0, -5.0));
        TrajectoryLedger::new(physics(), LedgerConfig::default(), initial)
    }

    /// Owner ledger that authored `A` at t=100 and `B` at t=300.
    fn authored() -> (TrajectoryLedger, ChangeEvent, ChangeEvent) {
        let mut owner = ledger();
        owner.advance(100, false).unwrap();
        let a = owner.apply_change(Change::RotCw);
        owner.advance(300, false).unwrap();
        let b = owner.apply_change(Change::PropOn);
        (owner, a, b)
    }

    fn feed(ledger: &mut TrajectoryLedger, event: &ChangeEvent) -> Result<(), LedgerError> {
        ledger.insert_update(event.change, event.predecessor.unwrap(), event.time)
    }

    #[test]
    fn test_scenario_a_gravity_single_step() {
        let world = World::new(vec![GravityBody::new(0, 1000.0, 0.0, 50.0)], 6000.0);
        let physics = Arc::new(PhysicsIntegrator::new(world, PhysicsConfig::default()));
        let mut ledger = TrajectoryLedger::new(
            physics,
            LedgerConfig::default(),
            TrajectoryState::spawned(Vector2::zeros(), 0, 255),
        );

        ledger.advance(100, false).unwrap();

        assert!(ledger.state().velocity.x > 0.0);
    }

    #[test]
    fn test_apply_change_stamps_predecessor() {
        let mut ledger = ledger();
        ledger.advance(200, false).unwrap();
        let before = ledger.fingerprint();

        let event = ledger.apply_change(Change::PropOn);

        assert_eq!(event.time, 200);
        assert_eq!(event.predecessor, Some(before));
        assert!(ledger.state().propelling);
        assert_ne!(ledger.fingerprint(), before);
    }

    #[test]
    fn test_scenario_b_out_of_order_past() {
        let (mut owner, a, b) = authored();
        owner.advance(600, false).unwrap();

        let mut observer = ledger();
        observer.advance(600, false).unwrap();

        assert!(matches!(feed(&mut observer, &b), Err(LedgerError::CausalityViolation { .. })));
        assert_eq!(observer.orphan_count(), 1);
        feed(&mut observer, &a).unwrap();

        assert_eq!(observer.orphan_count(), 0);
        assert_eq!(observer.fingerprint(), owner.fingerprint());
        assert_eq!(observer.state(), owner.state());
    }

    #[test]
    fn test_scenario_b_out_of_order_pending() {
        let (mut owner, a, b) = authored();
        owner.advance(600, false).unwrap();

        let mut observer = ledger();
        feed(&mut observer, &b).unwrap();
        feed(&mut observer, &a).unwrap();
        assert_eq!(observer.pending_count(), 2);

        observer.advance(600, false).unwrap();

        assert_eq!(observer.pending_count(), 0);
        assert_eq!(observer.fingerprint(), owner.fingerprint());
    }

    #[test]
    fn test_same_time_events_chain_by_fingerprint() {
        let mut owner = ledger();
        owner.advance(100, false).unwrap();
        let a = owner.apply_change(Change::RotCw);
        let b = owner.apply_change(Change::PropOn);
        owner.advance(500, false).unwrap();

        let mut pending = ledger();
        feed(&mut pending, &b).unwrap();
        feed(&mut pending, &a).unwrap();
        pending.advance(500, false).unwrap();
        assert_eq!(pending.fingerprint(), owner.fingerprint());

        let mut late = ledger();
        late.advance(500, false).unwrap();
        assert!(feed(&mut late, &b).is_err());
        feed(&mut late, &a).unwrap();
        assert_eq!(late.fingerprint(), owner.fingerprint());
    }

    #[test]
    fn test_insert_matches_local_append() {
        let (mut owner, a, _) = authored();
        owner.advance(300, false).unwrap();

        let mut observer = ledger();
        observer.advance(300, false).unwrap();
        feed(&mut observer, &a).unwrap();

        let mut expected = ledger();
        expected.advance(100, false).unwrap();
        expected.apply_change(Change::RotCw);
        expected.advance(300, false).unwrap();

        assert_eq!(observer.state(), expected.state());
        assert_eq!(observer.time(), 300);
    }

    #[test]
    fn test_insert_rejection_leaves_ledger_untouched() {
        let mut ledger = ledger();
        ledger.advance(400, false).unwrap();
        ledger.apply_change(Change::RotCcw);
        ledger.advance(700, false).unwrap();

        let events_before: Vec<ChangeEvent> = ledger.events().copied().collect();
        let state_before = ledger.state().clone();

        let result = ledger.insert_update(Change::PropOn, Fingerprint(0xdead_beef), 500);

        assert!(matches!(result, Err(LedgerError::CausalityViolation { .. })));
        assert_eq!(ledger.events().copied().collect::<Vec<_>>(), events_before);
        assert_eq!(ledger.state(), &state_before);
    }

    #[test]
    fn test_redelivery_is_idempotent() {
        let (_, a, _) = authored();
        let mut observer = ledger();
        observer.advance(300, false).unwrap();

        feed(&mut observer, &a).unwrap();
        let once = observer.fingerprint();
        feed(&mut observer, &a).unwrap();

        assert_eq!(observer.fingerprint(), once);
        assert_eq!(observer.events().count(), 1);
    }

    #[test]
    fn test_missing_predecessor_halts_non_speculative_advance() {
        let (_, _, b) = authored();
        let mut observer = ledger();
        feed(&mut observer, &b).unwrap();

        let result = observer.advance(600, false);

        assert!(matches!(
            result,
            Err(LedgerError::InvalidMaterializedState {
                reason: InvalidState::MissingEvent { .. },
                ..
            })
        ));
        assert_eq!(observer.time(), 300);
        assert!(!observer.is_provisional());
    }

    #[test]
    fn test_speculative_advance_continues_provisionally() {
        let (_, a, b) = authored();
        let mut observer = ledger();
        feed(&mut observer, &b).unwrap();

        assert!(observer.advance(600, true).is_err());
        assert_eq!(observer.time(), 600);
        assert!(observer.is_provisional());

        // The missing event lands late and the skipped one now verifies
        feed(&mut observer, &a).unwrap();
        assert!(!observer.is_provisional());
        assert!(observer.state().propelling);
        assert_eq!(observer.pending_count(), 0);
    }

    #[test]
    fn test_scenario_c_lethal_bullet() {
        let mut ledger = ledger();
        ledger.advance(100, false).unwrap();
        ledger.cache.health = 1;

        ledger.apply_change(Change::Bullet { damage: 25 });

        assert_eq!(ledger.state().health, 0);
        assert!(ledger.is_terminal());
        let result = ledger.advance(500, false);
        assert!(result.unwrap_err().is_terminal());
    }

    #[test]
    fn test_dead_ledger_stays_dead() {
        let mut ledger = ledger();
        ledger.cache.health = 10;
        ledger.apply_change(Change::Bullet { damage: 25 });
        ledger.insert_authoritative(Change::Health { delta: 30 }, 500).unwrap();

        assert!(ledger.advance(1_000, false).unwrap_err().is_terminal());
        assert!(ledger.advance(1_100, false).unwrap_err().is_terminal());

        assert!(ledger.is_terminal());
        assert_eq!(ledger.state().health, 0);
        assert_eq!(ledger.time(), 1_100);
    }

    #[test]
    fn test_skipped_event_survives_pruning() {
        let (mut owner, a, b) = authored();
        owner.advance(5_000, false).unwrap();

        let mut observer = ledger();
        feed(&mut observer, &b).unwrap();
        assert!(observer.advance(5_000, true).is_err());
        assert!(observer.is_provisional());
        assert_eq!(observer.pending_count(), 1);
        assert_eq!(observer.baseline().time, 0);

        feed(&mut observer, &a).unwrap();

        assert!(!observer.is_provisional());
        assert_eq!(observer.pending_count(), 0);
        assert_eq!(observer.fingerprint(), owner.fingerprint());
    }

    #[test]
    fn test_time_is_monotonic_after_death() {
        let mut ledger = ledger();
        ledger.advance(200, false).unwrap();
        ledger.apply_change(Change::Health { delta: -255 });

        let _ = ledger.advance(900, false);
        assert_eq!(ledger.time(), 900);
        let position = ledger.state().position;

        let _ = ledger.advance(400, false);
        assert_eq!(ledger.time(), 900);
        assert_eq!(ledger.state().position, position);
    }

    #[test]
    fn test_authoritative_insert_in_past() {
        let mut ledger = ledger();
        ledger.advance(800, false).unwrap();

        ledger.insert_authoritative(Change::Bullet { damage: 25 }, 300).unwrap();

        assert_eq!(ledger.state().health, 230);
        assert_eq!(ledger.time(), 800);
        assert_eq!(ledger.state_at(200).unwrap().health, 255);
        assert_eq!(ledger.state_at(300).unwrap().health, 230);
    }

    #[test]
    fn test_step_composability() {
        let mut once = ledger();
        once.advance(1_700, false).unwrap();

        let mut twice = ledger();
        twice.advance(600, false).unwrap();
        twice.advance(1_700, false).unwrap();

        assert_eq!(once.fingerprint(), twice.fingerprint());
    }

    #[test]
    fn test_state_matching_finds_point_between_events() {
        let mut owner = ledger();
        owner.advance(200, false).unwrap();
        let before = owner.fingerprint();
        let first = owner.apply_change(Change::RotCw);
        let second = owner.apply_change(Change::PropOn);
        owner.advance(600, false).unwrap();

        let at_second = owner.state_matching(second.predecessor.unwrap(), 200).unwrap();
        assert_eq!(first.predecessor, Some(before));
        assert_eq!(at_second.spin_direction, crate::state::SpinDirection::Cw);
        assert!(!at_second.propelling);
        assert!(owner.state_matching(before, 300).is_none());
        assert!(owner.state_matching(before, 700).is_none());
    }

    #[test]
    fn test_state_at_matches_cache() {
        let (mut owner, _, _) = authored();
        owner.advance(900, false).unwrap();
        assert_eq!(owner.state_at(900).unwrap(), *owner.state());
    }

    #[test]
    fn test_correction_replaces_cache() {
        let mut ledger = ledger();
        ledger.advance(500, false).unwrap();

        let snapshot = TrajectoryState::spawned(Vector2::new(100.0, 100.0), 400, 200);
        ledger.correct(snapshot.clone()).unwrap();

        assert_eq!(ledger.state(), &snapshot);
        assert_eq!(ledger.authority_time(), 400);

        let stale = TrajectoryState::spawned(Vector2::zeros(), 300, 255);
        assert!(matches!(ledger.correct(stale), Err(LedgerError::StaleCorrection { .. })));
    }

    #[test]
    fn test_correction_keeps_later_pending_events() {
        let (_, a, b) = authored();
        let mut observer = ledger();
        feed(&mut observer, &a).unwrap();
        feed(&mut observer, &b).unwrap();

        let mut owner = ledger();
        owner.advance(100, false).unwrap();
        owner.apply_change(Change::RotCw);
        owner.advance(200, false).unwrap();

        observer.correct(owner.snapshot()).unwrap();
        assert_eq!(observer.pending_count(), 1);
        observer.advance(600, false).unwrap();
        assert!(observer.state().propelling);
    }

    #[test]
    fn test_history_is_pruned() {
        let mut ledger = ledger();
        for t in (100..=6_000).step_by(100) {
            ledger.advance(t, false).unwrap();
            if t % 500 == 0 {
                ledger.apply_change(Change::RotCw);
            }
        }

        assert!(ledger.baseline().time >= 6_000 - 2 * 2_000);
        assert!(ledger.events().all(|event| event.time >= ledger.baseline().time));
        assert!(ledger.state_at(1_000).is_none());
    }

    #[test]
    fn test_hits_uses_heading() {
        let physics = Arc::new(PhysicsIntegrator::new(World::empty(6000.0), PhysicsConfig::default()));
        let shooter = TrajectoryLedger::new(
            physics.clone(),
            LedgerConfig::default(),
            TrajectoryState::spawned(Vector2::zeros(), 0, 255),
        );
        let target = TrajectoryLedger::new(
            physics,
            LedgerConfig::default(),
            TrajectoryState::spawned(Vector2::new(0.0, -300.0), 0, 255),
        );

        assert_relative_eq!(shooter.hits(&target).unwrap(), 275.0, epsilon = 1e-2);
        assert!(target.hits(&shooter).is_none());
    }

    #[test]
    fn test_lerp_reads_history() {
        let mut ledger = ledger();
        ledger.advance(300, false).unwrap();

        let exact = ledger.lerp(200).unwrap();
        let sample = ledger.samples().iter().find(|s| s.time == 200).unwrap();
        assert_eq!(exact.position, sample.position);
        assert_eq!(exact.spin, sample.spin);
    }
}

#[cfg(test)]
mod properties {
    use super::*;
    use crate::physics::PhysicsConfig;
    use crate::world::World;
    use nalgebra::Vector2;
    use proptest::prelude::*;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    const HORIZON: u64 = 3_500;

    fn open_space() -> Arc<PhysicsIntegrator> {
        Arc::new(PhysicsIntegrator::new(World::empty(6000.0), PhysicsConfig::default()))
    }

    fn change_strategy() -> impl Strategy<Value = Change> {
        prop_oneof![
            Just(Change::RotCw),
            Just(Change::RotCcw),
            Just(Change::RotStop),
            Just(Change::PropOn),
            Just(Change::PropOff),
        ]
    }

    fn initial_strategy() -> impl Strategy<Value = TrajectoryState> {
        (-1000.0f32..1000.0, -1000.0f32..1000.0, -50.0f32..50.0, -50.0f32..50.0).prop_map(
            |(x, y, vx, vy)| {
                TrajectoryState::spawned(Vector2::new(x, y), 0, 255).with_velocity(Vector2::new(vx, vy))
            },
        )
    }

    /// One change per distinct step, at most twelve of them.
    fn script_strategy() -> impl Strategy<Value = Vec<(u64, Change)>> {
        (
            prop::collection::btree_set(1u64..30, 1..12),
            prop::collection::vec(change_strategy(), 12),
        )
            .prop_map(|(steps, changes)| {
                steps.into_iter().map(|step| step * 100).zip(changes).collect()
            })
    }

    fn author(initial: &TrajectoryState, script: &[(u64, Change)]) -> (TrajectoryLedger, Vec<ChangeEvent>) {
        let mut owner = TrajectoryLedger::new(open_space(), LedgerConfig::default(), initial.clone());
        let events = script
            .iter()
            .map(|&(time, change)| {
                owner.advance(time, false).unwrap();
                owner.apply_change(change)
            })
            .collect();
        owner.advance(HORIZON, false).unwrap();
        (owner, events)
    }

    fn shuffled(events: &[ChangeEvent], seed: u64) -> Vec<ChangeEvent> {
        let mut events = events.to_vec();
        events.shuffle(&mut ChaCha8Rng::seed_from_u64(seed));
        events
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

        #[test]
        fn replay_is_deterministic(initial in initial_strategy(), script in script_strategy()) {
            let (first, _) = author(&initial, &script);
            let (second, _) = author(&initial, &script);
            prop_assert_eq!(first.fingerprint(), second.fingerprint());
        }

        #[test]
        fn advancing_in_pieces_matches_one_advance(
            initial in initial_strategy(),
            split in 0u64..HORIZON,
        ) {
            let mut whole = TrajectoryLedger::new(open_space(), LedgerConfig::default(), initial.clone());
            whole.advance(HORIZON, false).unwrap();

            let mut pieces = TrajectoryLedger::new(open_space(), LedgerConfig::default(), initial);
            pieces.advance(split, false).unwrap();
            pieces.advance(HORIZON, false).unwrap();

            prop_assert_eq!(whole.state(), pieces.state());
        }

        #[test]
        fn past_events_in_any_order_converge(
            initial in initial_strategy(),
            script in script_strategy(),
            seed in any::<u64>(),
        ) {
            let (owner, events) = author(&initial, &script);
            let mut observer = TrajectoryLedger::new(open_space(), LedgerConfig::default(), initial);
            observer.advance(HORIZON, false).unwrap();

            for event in shuffled(&events, seed) {
                let _ = observer.insert_update(event.change, event.predecessor.unwrap(), event.time);
            }

            prop_assert_eq!(observer.orphan_count(), 0);
            prop_assert_eq!(observer.fingerprint(), owner.fingerprint());
        }

        #[test]
        fn pending_events_in_any_order_converge(
            initial in initial_strategy(),
            script in script_strategy(),
            seed in any::<u64>(),
        ) {
            let (owner, events) = author(&initial, &script);
            let mut observer = TrajectoryLedger::new(open_space(), LedgerConfig::default(), initial);

            for event in shuffled(&events, seed) {
                observer.insert_update(event.change, event.predecessor.unwrap(), event.time).unwrap();
            }
            observer.advance(HORIZON, false).unwrap();

            prop_assert_eq!(observer.pending_count(), 0);
            prop_assert_eq!(observer.fingerprint(), owner.fingerprint());
        }

        #[test]
        fn unknown_predecessor_leaves_ledger_untouched(
            initial in initial_strategy(),
            bogus in any::<u64>(),
            step in 0u64..30,
        ) {
            let mut ledger = TrajectoryLedger::new(open_space(), LedgerConfig::default(), initial);
            ledger.advance(HORIZON, false).unwrap();
            let time = step * 100;
            let genuine = ledger.state_at(time).unwrap().fingerprint();
            prop_assume!(genuine != Fingerprint(bogus));
            let before = ledger.fingerprint();

            let result = ledger.insert_update(Change::PropOn, Fingerprint(bogus), time);

            let rejected = matches!(result, Err(LedgerError::CausalityViolation { .. }));
            prop_assert!(rejected);
            prop_assert_eq!(ledger.fingerprint(), before);
        }
    }
}
