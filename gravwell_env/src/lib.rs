//! Gravwell Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" abstraction allowing the Gravwell
//! engine to run in both **Production** (tokio) and **Simulation** (virtual
//! clock + channel router) environments.
//!
//! # Core Concept: The Reactor Pattern
//!
//! For Deterministic Simulation Testing (DST), we intercept all I/O:
//! - Time (`now()`, `sleep()`)
//! - Network (`send()`, `recv()`, `try_recv()`)
//! - Randomness (`derive_seed()`)
//!
//! By deriving all entropy from a single 64-bit seed, any desync becomes
//! reproducible via its seed number.
//!
//! # Example
//!
//! ```ignore
//! use gravwell_env::{GameContext, Transport};
//!
//! async fn peer_loop<Ctx: GameContext, Net: Transport>(ctx: &Ctx, net: &Net) {
//!     loop {
//!         tokio::select! {
//!             packet = net.recv() => handle_packet(packet),
//!             _ = ctx.sleep(Duration::from_millis(16)) => render(),
//!         }
//!     }
//! }
//! ```

mod context;
mod network;
mod types;
mod error;
mod tokio_impl;

pub use context::GameContext;
pub use network::{Transport, NetworkController};
pub use types::{NodeId, PacketEnvelope};
pub use error::EnvError;
pub use tokio_impl::TokioContext;
