//! Core environment context trait for Gravwell peers and authorities.

use async_trait::async_trait;
use std::future::Future;
use std::time::{Duration, SystemTime};

/// The central interface for Environment Interaction.
///
/// This trait abstracts the "real world" so that the same session code can
/// run in production (tokio) and in the deterministic simulator.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time`, OS entropy
/// - **Simulation**: `SimContext` - virtual clock, `ChaCha8Rng(seed)`
///
/// # Determinism
///
/// For DST, all methods that would normally introduce non-determinism
/// (time, randomness) are controlled by the implementation.
#[async_trait]
pub trait GameContext: Send + Sync + 'static {
    /// Returns the current monotonic time since context creation.
    ///
    /// In simulation, this is the virtual clock time (plus any per-node skew).
    fn now(&self) -> Duration;

    /// Returns the current time in whole milliseconds.
    ///
    /// This is the "local clock" fed to `ClockSync` and used to stamp pings.
    fn now_millis(&self) -> u64 {
        self.now().as_millis() as u64
    }

    /// Returns the wall-clock time for packet timestamps.
    ///
    /// In simulation, this is derived from virtual clock + epoch offset.
    fn system_time(&self) -> SystemTime;

    /// Suspends execution for the given duration.
    ///
    /// In production: wraps `tokio::time::sleep`
    /// In simulation: advances virtual clock
    async fn sleep(&self, duration: Duration);

    /// Spawns a background task.
    fn spawn<F>(&self, name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static;

    /// Derives a reproducible sub-seed from the context seed.
    ///
    /// Used to seed spawn-point and loot generators without sharing one RNG
    /// stream between subsystems.
    ///
    /// # Arguments
    /// * `seed_extension` - A value to combine with the global seed
    fn derive_seed(&self, seed_extension: u64) -> u64;

    /// Returns the context's seed (for logging/debugging).
    ///
    /// In production, returns 0 (not seeded).
    fn seed(&self) -> u64;
}
