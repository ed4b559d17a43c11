//! Gravwell Core - Deterministic Trajectory Reconciliation
//!
//! Keeps an authority and any number of peers on a lossy, jittery link in
//! agreement about every entity's kinematic state:
//! 1. **Causal ordering**: late and reordered events are spliced into history
//!    at the state they were authored against, identified by fingerprint
//! 2. **Deterministic replay**: a fixed-step integrator every observer runs
//!    bit-for-bit identically
//! 3. **Dual rate**: coarse 10 Hz physics, smooth interpolation at render rate
//! 4. **Lag compensation**: hit-scan shots verified against the states the
//!    shooter actually saw

pub mod account;
pub mod authority;
pub mod clock;
pub mod error;
pub mod fingerprint;
pub mod hitscan;
pub mod interpolation;
pub mod ledger;
pub mod physics;
pub mod protocol;
pub mod registry;
pub mod runtime;
pub mod session;
pub mod state;
pub mod world;

// Re-export key types for convenience
pub use account::{Account, EconomyConfig};
pub use authority::{Authority, AuthorityConfig, Outbound, Recipient};
pub use clock::{ClockConfig, ClockSync};
pub use error::{InvalidState, LedgerError, ProtocolError};
pub use fingerprint::Fingerprint;
pub use interpolation::{InterpolationConfig, Interpolator, RenderSample, Sample};
pub use ledger::{LedgerConfig, TrajectoryLedger};
pub use physics::{PhysicsConfig, PhysicsIntegrator};
pub use protocol::{ClientMessage, LootContent, LootDrop, LootId, ServerMessage, ShootInfo, Victim};
pub use registry::{EntityId, Registry};
pub use runtime::{AuthorityRuntime, PeerRuntime};
pub use session::{Frame, PeerSession, SessionConfig};
pub use state::{Change, ChangeEvent, SpinDirection, TrajectoryState};
pub use world::{DomeBoundary, GravityBody, World};
