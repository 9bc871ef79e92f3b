//! Same seed, same run.
//!
//! The simulation is only useful for debugging if a failing seed can be
//! replayed exactly.

use favo_bft::BftConfig;
use favo_simulation::{NetworkConfig, SimulationRunner};
use favo_types::Transaction;
use std::time::Duration;
use tracing_test::traced_test;

fn test_network_config() -> NetworkConfig {
    NetworkConfig {
        num_nodes: 4,
        latency: Duration::from_millis(10),
        jitter_fraction: 0.3,
        packet_loss_rate: 0.05,
    }
}

fn run(seed: u64, until: Duration) -> SimulationRunner {
    let config = BftConfig::default()
        .with_period_size(2)
        .with_epoch_size(4)
        .with_block_interval(Duration::from_millis(50))
        .with_round_timeout(Duration::from_millis(500));
    let mut runner = SimulationRunner::new(test_network_config(), config, seed).unwrap();
    for i in 0..10u8 {
        runner.submit_transaction(Transaction(vec![i]));
    }
    runner.start();
    runner.run_until(until);
    runner
}

#[test]
fn test_runner_creation() {
    let runner = SimulationRunner::new(test_network_config(), BftConfig::default(), 42).unwrap();
    assert_eq!(runner.num_nodes(), 4);
    assert!(runner.node_state(3).is_some());
    assert!(runner.node_state(4).is_none());
    assert_eq!(runner.genesis_set().len(), 4);
}

#[test]
fn test_invalid_config_rejected() {
    let config = BftConfig::default().with_period_size(4).with_epoch_size(6);
    assert!(SimulationRunner::new(test_network_config(), config, 42).is_err());
}

#[traced_test]
#[test]
fn test_same_seed_same_chain() {
    let seed = 12345;
    let a = run(seed, Duration::from_secs(10));
    let b = run(seed, Duration::from_secs(10));

    assert_eq!(a.stats().events_processed, b.stats().events_processed);
    assert_eq!(a.stats().messages_sent, b.stats().messages_sent);
    assert_eq!(a.stats().messages_dropped_loss, b.stats().messages_dropped_loss);
    for node in 0..4 {
        assert_eq!(a.finalized_hashes(node), b.finalized_hashes(node));
        assert_eq!(a.node_status(node), b.node_status(node));
    }
    assert!((0..4).any(|node| !a.finalized_hashes(node).is_empty()));
}

#[test]
fn test_split_runs_match_single_run() {
    let single = run(7, Duration::from_secs(6));

    let config = BftConfig::default()
        .with_period_size(2)
        .with_epoch_size(4)
        .with_block_interval(Duration::from_millis(50))
        .with_round_timeout(Duration::from_millis(500));
    let mut split = SimulationRunner::new(test_network_config(), config, 7).unwrap();
    for i in 0..10u8 {
        split.submit_transaction(Transaction(vec![i]));
    }
    split.start();
    for step in 1..=6 {
        split.run_until(Duration::from_secs(step));
    }

    assert_eq!(single.stats().events_processed, split.stats().events_processed);
    assert_eq!(single.finalized_hashes(0), split.finalized_hashes(0));
}
