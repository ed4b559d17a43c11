//! Error types for the simulation harness.

use gravwell_env::EnvError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    /// A node could not talk to the simulated transport
    #[error("Environment error: {0}")]
    Env(#[from] EnvError),

    /// Writing an export failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The async runtime backing the simulation could not start
    #[error("Runtime error: {0}")]
    Runtime(String),
}
