//! Clock synchronisation against the authority's logical timeline.
//!
//! ```text
//!   peer                        authority
//!    │ Ping{sent_at = l0}  ──▶     │
//!    │                        ◀──  Pong{sent_at = l0, time = a}
//!    │ l1 = now
//!    │ rtt    = l1 - l0
//!    │ offset = l1 - a - round(rtt / 2)
//!    │ authority_now = local - offset
//! ```
//!
//! The own entity is rendered at `authority_now`, every other entity
//! `fixed_delay + rtt` behind it so late and reordered updates still land in
//! the future of what is on screen.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Configuration for [`ClockSync`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClockConfig {
    /// Extra render delay for remote entities (default: 50 ms)
    pub fixed_delay_ms: u64,

    /// Lower bound of the ping interval (default: 5000 ms)
    pub ping_interval_min_ms: u64,

    /// Upper bound of the ping interval (default: 10000 ms)
    pub ping_interval_max_ms: u64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            fixed_delay_ms: 50,
            ping_interval_min_ms: 5_000,
            ping_interval_max_ms: 10_000,
        }
    }
}

impl ClockConfig {
    pub fn with_fixed_delay(mut self, fixed_delay_ms: u64) -> Self {
        self.fixed_delay_ms = fixed_delay_ms;
        self
    }

    pub fn with_ping_interval(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.ping_interval_min_ms = min_ms;
        self.ping_interval_max_ms = max_ms.max(min_ms);
        self
    }
}

/// Round-trip and offset estimate, refreshed on every pong.
#[derive(Debug, Clone)]
pub struct ClockSync {
    config: ClockConfig,
    rng: ChaCha8Rng,
    offset_ms: i64,
    rtt_ms: Option<u64>,
    next_ping_at: u64,
}

impl ClockSync {
    pub fn new(config: ClockConfig, seed: u64) -> Self {
        Self {
            config,
            rng: ChaCha8Rng::seed_from_u64(seed),
            offset_ms: 0,
            rtt_ms: None,
            next_ping_at: 0,
        }
    }

    pub fn config(&self) -> &ClockConfig {
        &self.config
    }

    /// True once the first pong has been processed.
    pub fn is_synced(&self) -> bool {
        self.rtt_ms.is_some()
    }

    pub fn rtt(&self) -> Option<u64> {
        self.rtt_ms
    }

    /// Local minus authority time, in milliseconds.
    pub fn offset(&self) -> i64 {
        self.offset_ms
    }

    /// Returns the send time for a ping when one is due and schedules the
    /// next one with jitter.
    pub fn poll_ping(&mut self, local_now: u64) -> Option<u64> {
        if local_now < self.next_ping_at {
            return None;
        }
        let interval = if self.config.ping_interval_max_ms > self.config.ping_interval_min_ms {
            self.rng
                .gen_range(self.config.ping_interval_min_ms..self.config.ping_interval_max_ms)
        } else {
            self.config.ping_interval_min_ms
        };
        self.next_ping_at = local_now + interval;
        Some(local_now)
    }

    /// Forces the next `poll_ping` to fire.
    pub fn ping_now(&mut self) {
        self.next_ping_at = 0;
    }

    /// Feeds a pong. Returns true when this was the first sample.
    pub fn on_pong(&mut self, local_now: u64, sent_at: u64, authority_time: u64) -> bool {
        let first = !self.is_synced();
        let rtt = local_now.saturating_sub(sent_at);
        let half = ((rtt + 1) / 2) as i64;
        self.offset_ms = local_now as i64 - authority_time as i64 - half;
        self.rtt_ms = Some(rtt);
        first
    }

    /// The authority's logical time right now.
    pub fn authority_now(&self, local_now: u64) -> u64 {
        (local_now as i64 - self.offset_ms).max(0) as u64
    }

    /// Query time for the local player's own ledger.
    pub fn own_query_time(&self, local_now: u64) -> u64 {
        self.authority_now(local_now)
    }

    /// Query time for every other entity's ledger.
    pub fn remote_query_time(&self, local_now: u64) -> u64 {
        let lag = self.config.fixed_delay_ms + self.rtt_ms.unwrap_or(0);
        self.authority_now(local_now).saturating_sub(lag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_from_pong() {
        let mut clock = ClockSync::new(ClockConfig::default(), 1);
        assert!(!clock.is_synced());

        // Local clock runs 1000 ms ahead; 80 ms round trip.
        let first = clock.on_pong(11_080, 11_000, 10_040);

        assert!(first);
        assert_eq!(clock.rtt(), Some(80));
        assert_eq!(clock.offset(), 1_000);
        assert_eq!(clock.authority_now(12_000), 11_000);
    }

    #[test]
    fn test_offset_rounds_half_rtt_up() {
        let mut clock = ClockSync::new(ClockConfig::default(), 1);
        clock.on_pong(1_101, 1_000, 1_000);
        // rtt 101, round(50.5) = 51
        assert_eq!(clock.offset(), 50);
    }

    #[test]
    fn test_query_times() {
        let mut clock = ClockSync::new(ClockConfig::default(), 1);
        clock.on_pong(5_100, 5_000, 5_050);

        assert_eq!(clock.own_query_time(6_000), 6_000);
        assert_eq!(clock.remote_query_time(6_000), 6_000 - 50 - 100);
        assert!(!clock.on_pong(7_060, 7_000, 7_030));
    }

    #[test]
    fn test_ping_cadence() {
        let mut clock = ClockSync::new(ClockConfig::default(), 7);

        assert_eq!(clock.poll_ping(0), Some(0));
        assert_eq!(clock.poll_ping(4_999), None);

        let mut now = 0;
        let mut last = 0;
        while now < 60_000 {
            now += 100;
            if let Some(sent) = clock.poll_ping(now) {
                let gap = sent - last;
                assert!((5_000..10_100).contains(&gap), "gap {}", gap);
                last = sent;
            }
        }
    }

    #[test]
    fn test_authority_now_saturates() {
        let mut clock = ClockSync::new(ClockConfig::default(), 1);
        clock.on_pong(10_000, 10_000, 0);
        assert_eq!(clock.authority_now(500), 0);
    }
}
