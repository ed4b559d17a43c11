//! Error taxonomy of the reconciliation engine.
//!
//! None of these are fatal: every variant is resolved by requesting or
//! accepting authoritative state.

use crate::fingerprint::Fingerprint;
use thiserror::Error;

/// Why a materialized state can no longer be trusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidState {
    /// Health reached zero; the ledger's lifecycle is over.
    Terminal,

    /// A pending event was authored against a state this ledger never reached.
    MissingEvent {
        expected: Fingerprint,
        found: Fingerprint,
    },
}

impl std::fmt::Display for InvalidState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidState::Terminal => write!(f, "entity is dead"),
            InvalidState::MissingEvent { expected, found } => {
                write!(f, "expected predecessor {} but materialized {}", expected, found)
            }
        }
    }
}

/// Errors produced by [`TrajectoryLedger`](crate::ledger::TrajectoryLedger).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// No point in the retained history matches the declared predecessor.
    #[error("causality violation: no history point {predecessor} at t={time}")]
    CausalityViolation { predecessor: Fingerprint, time: u64 },

    /// The cache hit a state that must be repaired by the authority.
    #[error("invalid materialized state at t={time}: {reason}")]
    InvalidMaterializedState { time: u64, reason: InvalidState },

    /// A correction older than the ledger's authoritative baseline.
    #[error("stale correction at t={correction_time} (baseline t={baseline_time})")]
    StaleCorrection { correction_time: u64, baseline_time: u64 },

    /// An update outside the tolerated lateness/lead window.
    #[error("update at t={time} outside window around t={now}")]
    OutsideWindow { time: u64, now: u64 },
}

impl LedgerError {
    /// Returns true when the error means the entity died.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LedgerError::InvalidMaterializedState { reason: InvalidState::Terminal, .. }
        )
    }
}

/// Wire encoding failures.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    #[error("decode failed: {0}")]
    Decode(serde_json::Error),
}
