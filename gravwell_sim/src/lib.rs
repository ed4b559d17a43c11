//! Gravwell Deterministic Simulation Testing (DST) Harness
//!
//! Runs an authority and a handful of bot-driven peers over a simulated
//! network where every source of non-determinism is controlled:
//! - **Time**: one virtual clock advanced tick by tick, with optional per-peer skew
//! - **Network**: a packet router with latency, jitter, loss and partitions
//! - **Randomness**: all entropy derived from a single 64-bit seed
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         SimWorld                            │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │ SimContext (virtual clock) + SimRouter (in flight)   │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! │       │                        │                            │
//! │  ┌────▼────┐              ┌────▼────┐                       │
//! │  │Authority│◄────────────►│  Peer   │     ...               │
//! │  │         │   Packets    │  (bot)  │                       │
//! │  └─────────┘              └─────────┘                       │
//! │       ▲                        ▲                            │
//! │  ┌────┴────────────────────────┴────┐                       │
//! │  │    Oracle (convergence check)    │                       │
//! │  └──────────────────────────────────┘                       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use gravwell_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42, 4).run(ScenarioId::Reorder);
//! assert!(result.passed);
//! ```

mod agent;
mod context;
mod error;
mod exporter;
mod network;
mod oracle;
mod runner;
pub mod scenarios;
mod world;

pub use agent::{BotProfile, BotStats, SimulatedPeer};
pub use context::SimContext;
pub use error::SimError;
pub use exporter::{EntityPosition, PeerFrame, SimExport, SimFrame};
pub use network::{LinkProfile, NetworkStats, SimNetwork, SimNetworkController, SimRouter};
pub use oracle::{ConvergenceReport, Divergence, Oracle};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use world::{SimConfig, SimWorld};
