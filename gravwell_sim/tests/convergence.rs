//! Every peer agrees with the authority once the network calms down.

use gravwell_sim::scenarios::ScenarioId;
use gravwell_sim::ScenarioRunner;

fn assert_converges(scenario: ScenarioId, seed: u64) {
    let result = ScenarioRunner::new(seed, 3).with_duration(3.0).run(scenario);
    assert!(
        result.passed,
        "{} seed={} failed: {}",
        scenario,
        seed,
        result.failure_reason.unwrap_or_default()
    );
    assert_eq!(result.metrics.divergences, 0);
}

#[test]
fn test_calm_converges() {
    assert_converges(ScenarioId::Calm, 42);
}

#[test]
fn test_reordering_converges() {
    assert_converges(ScenarioId::Reorder, 42);
}

#[test]
fn test_packet_loss_converges() {
    let result = ScenarioRunner::new(11, 3).with_duration(3.0).run(ScenarioId::PacketLoss);

    assert!(result.metrics.network.dropped_loss > 0);
    assert!(result.passed, "{:?}", result.failure_reason);
}

#[test]
fn test_partition_heals() {
    let result = ScenarioRunner::new(3, 3).with_duration(3.0).run(ScenarioId::Partition);

    assert!(result.metrics.network.dropped_partition > 0);
    assert!(result.passed, "{:?}", result.failure_reason);
}
