//! Scenario runner - executes chaos engineering test scenarios.

use crate::error::SimError;
use crate::exporter::{SimExport, SimFrame};
use crate::network::NetworkStats;
use crate::oracle::ConvergenceReport;
use crate::scenarios::ScenarioId;
use crate::world::{SimConfig, SimWorld};

use gravwell_core::{EntityId, Fingerprint};
use serde::Serialize;
use tracing::{debug, error, info};

/// Results from running a scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether every peer converged with the authority
    pub passed: bool,

    /// Total ticks executed, settle phase included
    pub total_ticks: u64,

    /// Final simulation time in seconds
    pub final_time_secs: f64,

    /// Living entities on the authority at the end
    pub final_entity_count: usize,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,

    /// Authority fingerprints at the convergence check, for seed replay
    pub fingerprints: Vec<(EntityId, Option<Fingerprint>)>,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScenarioMetrics {
    pub network: NetworkStats,

    /// Trajectory updates the authority accepted
    pub updates_accepted: u64,
    pub updates_rejected: u64,
    pub corrections_sent: u64,

    /// Corrections peers applied, snapshots included
    pub corrections_applied: u64,
    pub shots: u64,
    pub hits: u64,
    pub deaths: u64,
    pub loot_collected: u64,
    pub boosters_sold: u64,
    pub divergences: usize,
    pub max_position_error: f32,
}

/// Runs chaos scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Number of peers
    num_peers: usize,

    /// Run length before the settle phase, in seconds
    max_duration_secs: f64,

    /// Frames exported per exported second
    export_every_ticks: u64,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64, num_peers: usize) -> Self {
        Self {
            seed,
            num_peers,
            max_duration_secs: 10.0,
            export_every_ticks: 5,
        }
    }

    /// Sets the maximum duration.
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.max_duration_secs = secs.max(0.0);
        self
    }

    pub fn with_export_interval(mut self, ticks: u64) -> Self {
        self.export_every_ticks = ticks.max(1);
        self
    }

    /// Runs a scenario and returns the result.
    ///
    /// Harness failures are reported as a failed result rather than an error.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        match self.block_on(scenario, None) {
            Ok(result) => result,
            Err(e) => {
                error!("{} (seed={}) aborted: {}", scenario, self.seed, e);
                self.aborted(scenario, e)
            }
        }
    }

    /// Runs a scenario and writes every few frames to `path`.
    pub fn run_with_export(&self, scenario: ScenarioId, path: &str) -> Result<ScenarioResult, SimError> {
        let mut export = SimExport::new(scenario.name(), self.seed);
        let result = self.block_on(scenario, Some(&mut export))?;
        export.write_to_file(path)?;
        info!("Exported {} frames to {}", export.frames.len(), path);
        Ok(result)
    }

    fn block_on(&self, scenario: ScenarioId, export: Option<&mut SimExport>) -> Result<ScenarioResult, SimError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .map_err(|e| SimError::Runtime(e.to_string()))?;
        runtime.block_on(self.execute(scenario, export))
    }

    async fn execute(
        &self,
        scenario: ScenarioId,
        mut export: Option<&mut SimExport>,
    ) -> Result<ScenarioResult, SimError> {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);
        debug!("  {}", scenario.description());

        let config = scenario.configure(SimConfig {
            seed: self.seed,
            num_peers: self.num_peers,
            ..SimConfig::default()
        });
        let tick_ms = config.tick_ms.max(1);
        let duration_ms = (self.max_duration_secs * scenario.duration_factor() * 1_000.0) as u64;
        let ticks = duration_ms / tick_ms;
        let window = scenario
            .isolation_window()
            .map(|(from, to)| ((ticks as f64 * from) as u64, (ticks as f64 * to) as u64));

        let mut world = SimWorld::new(config).await?;
        for tick in 0..ticks {
            if let Some((from, to)) = window {
                if tick == from {
                    world.isolate(0);
                }
                if tick == to {
                    world.rejoin_all();
                }
            }
            world.tick().await?;

            if let Some(export) = export.as_deref_mut() {
                if tick % self.export_every_ticks == 0 {
                    export.add_frame(SimFrame::capture(&world));
                }
            }
            if tick % 50 == 0 {
                debug!(
                    "  t={}ms | in flight={} | accepted={}",
                    world.time_ms(),
                    world.router().in_flight(),
                    world.authority().authority().stats().updates_accepted
                );
            }
        }

        let report = world.settle().await?;
        if let Some(export) = export.as_deref_mut() {
            export.add_frame(SimFrame::capture(&world));
        }
        let result = self.summarize(scenario, &world, report.clone());
        if let Some(export) = export {
            export.finalize(result.passed, report);
        }

        if result.passed {
            info!(
                "✓ {} complete: {} updates accepted, {} corrections, {} packets reordered",
                scenario.name(),
                result.metrics.updates_accepted,
                result.metrics.corrections_applied,
                result.metrics.network.reordered
            );
        }
        Ok(result)
    }

    fn summarize(&self, scenario: ScenarioId, world: &SimWorld, report: ConvergenceReport) -> ScenarioResult {
        let authority = world.authority().authority();
        let stats = authority.stats();
        let metrics = ScenarioMetrics {
            network: world.router().stats(),
            updates_accepted: stats.updates_accepted,
            updates_rejected: stats.updates_rejected,
            corrections_sent: stats.corrections_sent,
            corrections_applied: world
                .peers()
                .iter()
                .map(|peer| peer.session().stats().corrections_applied)
                .sum(),
            shots: stats.shots,
            hits: stats.hits,
            deaths: stats.deaths,
            loot_collected: stats.loot_collected,
            boosters_sold: stats.boosters_sold,
            divergences: report.divergences.len(),
            max_position_error: report.max_position_error(),
        };
        let fingerprints = authority
            .registry()
            .iter()
            .map(|(id, ledger)| (*id, ledger.state_at(report.checked_at).map(|state| state.fingerprint())))
            .collect();

        let passed = report.converged();
        ScenarioResult {
            scenario,
            seed: self.seed,
            passed,
            total_ticks: world.tick_count(),
            final_time_secs: world.time_ms() as f64 / 1_000.0,
            final_entity_count: report.entities,
            failure_reason: (!passed).then(|| report.summary()),
            metrics,
            fingerprints,
        }
    }

    fn aborted(&self, scenario: ScenarioId, e: SimError) -> ScenarioResult {
        ScenarioResult {
            scenario,
            seed: self.seed,
            passed: false,
            total_ticks: 0,
            final_time_secs: 0.0,
            final_entity_count: 0,
            failure_reason: Some(e.to_string()),
            metrics: ScenarioMetrics::default(),
            fingerprints: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calm_scenario_converges() {
        let runner = ScenarioRunner::new(42, 3).with_duration(3.0);

        let result = runner.run(ScenarioId::Calm);

        assert!(result.passed, "{:?}", result.failure_reason);
        assert!(result.final_entity_count <= 3);
        assert!(result.total_ticks > 150);
        assert!(result.metrics.network.delivered > 0);
    }

    #[test]
    fn test_export_collects_frames() {
        let path = std::env::temp_dir().join("gravwell_sim_export_test.json");
        let path = path.to_string_lossy().to_string();
        let runner = ScenarioRunner::new(5, 2).with_duration(1.0).with_export_interval(10);

        let result = runner.run_with_export(ScenarioId::Calm, &path).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(result.scenario, ScenarioId::Calm);
        let json: serde_json::Value = serde_json::from_str(&written).unwrap();
        assert_eq!(json["scenario"], "calm");
        // 50 ticks every 10 plus the settled frame
        assert_eq!(json["frames"].as_array().unwrap().len(), 6);
    }
}
