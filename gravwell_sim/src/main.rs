//! Gravwell DST Simulator CLI
//!
//! Run deterministic simulation tests with chaos engineering scenarios.

use clap::Parser;
use gravwell_sim::scenarios::ScenarioId;
use gravwell_sim::{ScenarioResult, ScenarioRunner};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "gravwell-sim")]
#[command(about = "Deterministic Simulation Testing for Gravwell trajectory reconciliation")]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Number of peers besides the authority
    #[arg(short, long, default_value = "4")]
    peers: usize,

    /// Scenario to run (calm, reorder, packet_loss, clock_skew, dogfight, partition, long_haul, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Number of consecutive seeds to test (for CI mode)
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Simulation duration in seconds before settling
    #[arg(short, long, default_value = "10")]
    duration: f64,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export per-frame positions of a single scenario to a JSON file
    #[arg(long)]
    export: Option<String>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    if !args.json {
        info!("Gravwell DST Simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        match args.scenario.parse() {
            Ok(scenario) => vec![scenario],
            Err(e) => {
                eprintln!("Error: {}", e);
                eprintln!("Available scenarios: calm, reorder, packet_loss, clock_skew, dogfight, partition, long_haul, all");
                return ExitCode::FAILURE;
            }
        }
    };

    let base_seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(42)
    } else {
        args.seed
    };

    if let Some(export_path) = &args.export {
        if scenarios.len() > 1 {
            eprintln!("Error: --export only supports a single scenario, not 'all'");
            return ExitCode::FAILURE;
        }
        let scenario = scenarios[0];
        info!("Running with export to: {}", export_path);

        let runner = ScenarioRunner::new(base_seed, args.peers).with_duration(args.duration);
        return match runner.run_with_export(scenario, export_path) {
            Ok(result) if result.passed => {
                info!("✓ {} (seed={}) PASSED - exported to {}", scenario.name(), base_seed, export_path);
                ExitCode::SUCCESS
            }
            Ok(result) => {
                error!(
                    "✗ {} FAILED: {}",
                    scenario.name(),
                    result.failure_reason.as_deref().unwrap_or("unknown")
                );
                ExitCode::FAILURE
            }
            Err(e) => {
                error!("✗ {} aborted: {}", scenario.name(), e);
                ExitCode::FAILURE
            }
        };
    }

    let mut all_results: Vec<ScenarioResult> = Vec::new();
    for seed_offset in 0..args.seeds {
        let seed = base_seed.wrapping_add(seed_offset as u64);
        let runner = ScenarioRunner::new(seed, args.peers).with_duration(args.duration);

        for scenario in &scenarios {
            let result = runner.run(*scenario);
            if !args.json {
                if result.passed {
                    info!("✓ {} (seed={}) PASSED", scenario.name(), seed);
                } else {
                    error!(
                        "✗ {} (seed={}) FAILED: {}",
                        scenario.name(),
                        seed,
                        result.failure_reason.as_deref().unwrap_or("unknown")
                    );
                }
            }
            all_results.push(result);
        }
    }

    let total = all_results.len();
    let failed = all_results.iter().filter(|r| !r.passed).count();

    if args.json {
        let summary = serde_json::json!({
            "total": total,
            "passed": total - failed,
            "failed": failed,
            "results": all_results.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario.name(),
                    "seed": r.seed,
                    "passed": r.passed,
                    "ticks": r.total_ticks,
                    "time_secs": r.final_time_secs,
                    "entities": r.final_entity_count,
                    "metrics": r.metrics,
                    "failure_reason": r.failure_reason,
                })
            }).collect::<Vec<_>>(),
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Failed to encode summary: {}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        info!("");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        if failed == 0 {
            info!("✅ All {} scenario runs passed!", total);
        } else {
            error!("❌ {}/{} scenario runs failed!", failed, total);
            for result in all_results.iter().filter(|r| !r.passed) {
                error!(
                    "  - {} seed={}: {}",
                    result.scenario.name(),
                    result.seed,
                    result.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
        }
    }

    if failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
