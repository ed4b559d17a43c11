//! JSON exporter for offline inspection of a run.
//!
//! Each frame records the authority's materialized entities next to what
//! every peer rendered, so drift and corrections can be plotted afterwards.

use crate::error::SimError;
use crate::oracle::ConvergenceReport;
use crate::world::SimWorld;
use gravwell_core::{EntityId, RenderSample, TrajectoryState};
use serde::Serialize;
use std::fs::File;
use std::io::Write;

/// A single frame of simulation data.
#[derive(Debug, Clone, Serialize)]
pub struct SimFrame {
    /// Virtual time in milliseconds
    pub time_ms: u64,

    /// Authority ledgers
    pub authority: Vec<EntityPosition>,

    /// What each peer drew
    pub peers: Vec<PeerFrame>,
}

impl SimFrame {
    pub fn capture(world: &SimWorld) -> Self {
        let authority = world
            .authority()
            .authority()
            .registry()
            .iter()
            .map(|(id, ledger)| EntityPosition::from_state(*id, ledger.state()))
            .collect();

        let peers = world
            .peers()
            .iter()
            .map(|peer| PeerFrame {
                peer: peer.entity_id().to_string(),
                rtt_ms: peer.session().clock().rtt(),
                connected: peer.session().is_connected(),
                entities: peer
                    .last_samples()
                    .iter()
                    .map(|(id, sample)| EntityPosition::from_sample(*id, sample))
                    .collect(),
            })
            .collect();

        Self {
            time_ms: world.time_ms(),
            authority,
            peers,
        }
    }
}

/// Position of an entity.
#[derive(Debug, Clone, Serialize)]
pub struct EntityPosition {
    pub id: String,
    pub x: f32,
    pub y: f32,
    pub spin: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<u32>,
}

impl EntityPosition {
    pub fn from_state(id: EntityId, state: &TrajectoryState) -> Self {
        Self {
            id: id.to_string(),
            x: state.position.x,
            y: state.position.y,
            spin: state.spin,
            health: Some(state.health),
        }
    }

    pub fn from_sample(id: EntityId, sample: &RenderSample) -> Self {
        Self {
            id: id.to_string(),
            x: sample.position.x,
            y: sample.position.y,
            spin: sample.spin,
            health: None,
        }
    }
}

/// Peer frame data.
#[derive(Debug, Clone, Serialize)]
pub struct PeerFrame {
    pub peer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rtt_ms: Option<u64>,
    pub connected: bool,
    pub entities: Vec<EntityPosition>,
}

/// Complete simulation export.
#[derive(Debug, Clone, Serialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Duration in milliseconds
    pub duration_ms: u64,

    /// All frames
    pub frames: Vec<SimFrame>,

    /// Final results
    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub convergence: Option<ConvergenceReport>,
}

impl SimExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            duration_ms: 0,
            frames: Vec::new(),
            passed: false,
            convergence: None,
        }
    }

    /// Adds a frame.
    pub fn add_frame(&mut self, frame: SimFrame) {
        self.duration_ms = frame.time_ms;
        self.frames.push(frame);
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, passed: bool, convergence: ConvergenceReport) {
        self.passed = passed;
        self.convergence = Some(convergence);
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: &str) -> Result<(), SimError> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
