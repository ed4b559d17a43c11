//! Simulation context implementing GameContext for deterministic testing.

use async_trait::async_trait;
use gravwell_env::GameContext;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Simulation context backed by a shared virtual clock.
///
/// Every node of a run holds a clone sharing one clock; a node's view can be
/// shifted by a fixed skew to model a badly set local clock.
pub struct SimContext {
    /// Master seed for this simulation
    seed: u64,

    /// Current virtual time (nanoseconds since simulation start)
    virtual_time_ns: Arc<Mutex<u64>>,

    /// Offset of this node's local clock from virtual time
    skew_ms: u64,

    /// Epoch offset (virtual time 0 maps to this wall-clock time)
    epoch: SystemTime,
}

impl SimContext {
    /// Creates a new SimContext with the given seed.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            virtual_time_ns: Arc::new(Mutex::new(0)),
            skew_ms: 0,
            epoch: UNIX_EPOCH + Duration::from_secs(1704067200), // 2024-01-01 00:00:00 UTC
        }
    }

    /// Creates an Arc-wrapped context for sharing.
    pub fn shared(seed: u64) -> Arc<Self> {
        Arc::new(Self::new(seed))
    }

    /// A view of the same virtual clock whose local time runs `skew_ms` ahead.
    pub fn skewed(&self, skew_ms: u64) -> Self {
        Self {
            skew_ms,
            ..self.clone()
        }
    }

    pub fn skew_ms(&self) -> u64 {
        self.skew_ms
    }

    /// Advances virtual time by the given duration.
    pub fn advance_time(&self, duration: Duration) {
        let mut time = self.virtual_time_ns.lock().unwrap_or_else(PoisonError::into_inner);
        *time += duration.as_nanos() as u64;
    }

    /// Returns the current virtual time in nanoseconds.
    pub fn time_ns(&self) -> u64 {
        *self.virtual_time_ns.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Unskewed virtual time in milliseconds, the router's notion of "now".
    pub fn virtual_millis(&self) -> u64 {
        self.time_ns() / 1_000_000
    }
}

impl Clone for SimContext {
    fn clone(&self) -> Self {
        Self {
            seed: self.seed,
            virtual_time_ns: Arc::clone(&self.virtual_time_ns),
            skew_ms: self.skew_ms,
            epoch: self.epoch,
        }
    }
}

#[async_trait]
impl GameContext for SimContext {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.time_ns()) + Duration::from_millis(self.skew_ms)
    }

    fn system_time(&self) -> SystemTime {
        self.epoch + self.now()
    }

    async fn sleep(&self, duration: Duration) {
        // Nothing else runs while a node sleeps, so sleeping is advancing
        self.advance_time(duration);
    }

    fn spawn<F>(&self, _name: &str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(future);
    }

    fn derive_seed(&self, seed_extension: u64) -> u64 {
        self.seed.wrapping_mul(0x517cc1b727220a95) ^ seed_extension
    }

    fn seed(&self) -> u64 {
        self.seed
    }
}
