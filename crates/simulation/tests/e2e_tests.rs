//! End-to-end consensus tests on simulated time.
//!
//! These run a full validator network in a single thread:
//! - Simulated time - `run_until()` advances the simulation clock
//! - Deterministic - same seed always produces same results
//! - Inline delegation - signatures and execution complete instantly

use favo_bft::{verify_committed_seals, BftConfig, ChainStore};
use favo_simulation::{NetworkConfig, NodeIndex, SimulationRunner};
use favo_types::{Address, Transaction};
use std::time::Duration;
use tracing_test::traced_test;

fn test_network_config() -> NetworkConfig {
    NetworkConfig {
        num_nodes: 4,
        latency: Duration::from_millis(10),
        jitter_fraction: 0.1,
        ..Default::default()
    }
}

fn test_bft_config() -> BftConfig {
    BftConfig::default()
        .with_period_size(4)
        .with_epoch_size(32)
        .with_block_interval(Duration::from_millis(100))
        .with_round_timeout(Duration::from_secs(1))
}

fn node_of(runner: &SimulationRunner, address: Address) -> NodeIndex {
    (0..runner.num_nodes() as NodeIndex)
        .find(|&i| runner.node_status(i).map(|s| s.address) == Some(address))
        .expect("address belongs to a node")
}

/// No two nodes finalized different blocks at the same height.
fn assert_agreement(runner: &SimulationRunner) {
    let reference = (0..runner.num_nodes() as NodeIndex)
        .map(|i| runner.finalized_hashes(i))
        .max_by_key(|h| h.len())
        .unwrap_or(&[]);
    for node in 0..runner.num_nodes() as NodeIndex {
        let hashes = runner.finalized_hashes(node);
        assert_eq!(
            hashes,
            &reference[..hashes.len()],
            "node {node} diverged from the longest finalized chain"
        );
    }
}

#[traced_test]
#[test]
fn test_four_validators_finalize_in_round_zero() {
    let mut runner = SimulationRunner::new(test_network_config(), test_bft_config(), 42).unwrap();
    for i in 0..20u8 {
        runner.submit_transaction(Transaction(vec![i; 8]));
    }
    runner.start();

    assert!(
        runner.run_until_height(5, Duration::from_millis(100), Duration::from_secs(30)),
        "network should finalize 5 blocks"
    );
    assert_agreement(&runner);

    for node in 0..4 {
        let state = runner.node_state(node).unwrap();
        assert_eq!(state.stats().round_changes, 0, "no faults, no round changes");
        assert_eq!(state.stats().equivocations, 0);
        assert!(!state.is_halted());
        assert_eq!(runner.executor_mut(node).unwrap().pending(), 0);
    }
}

#[test]
fn test_stored_blocks_carry_valid_seals() {
    let mut runner = SimulationRunner::new(test_network_config(), test_bft_config(), 7).unwrap();
    runner.start();
    assert!(runner.run_until_height(4, Duration::from_millis(100), Duration::from_secs(30)));

    let store = runner.node_store(0).unwrap();
    let head = store.head().unwrap().number();
    let set = runner.genesis_set().clone();
    for number in 1..=head {
        let block = store.block_by_number(number).unwrap();
        let extra = block.header.extra().unwrap();
        assert_eq!(block.header.compute_hash().unwrap(), block.hash());
        verify_committed_seals(&block.header, &extra, &set).unwrap();
        assert_eq!(block.header.parent_hash, store.block_by_number(number - 1).unwrap().hash());
    }
}

#[traced_test]
#[test]
fn test_crashed_proposer_triggers_round_change() {
    let mut runner = SimulationRunner::new(test_network_config(), test_bft_config(), 42).unwrap();
    let proposer = runner.node_state(0).unwrap().proposer_for(1, 0).unwrap();
    let crashed = node_of(&runner, proposer);
    runner.crash_node(crashed);
    runner.start();

    assert!(
        runner.run_until_height(3, Duration::from_millis(100), Duration::from_secs(60)),
        "three of four validators keep finalizing"
    );
    assert_agreement(&runner);

    let live = (0..4).find(|&i| i != crashed).unwrap();
    let state = runner.node_state(live).unwrap();
    assert!(state.stats().round_changes >= 1);
    assert!(runner.finalized_hashes(crashed).is_empty());
    assert!(runner.stats().events_dropped_crashed > 0);
}

#[test]
fn test_failed_execution_moves_to_next_proposer() {
    let mut runner = SimulationRunner::new(test_network_config(), test_bft_config(), 3).unwrap();
    let proposer = runner.node_state(0).unwrap().proposer_for(1, 0).unwrap();
    let failing = node_of(&runner, proposer);
    runner.executor_mut(failing).unwrap().set_failing(true);
    runner.start();

    runner.run_until(Duration::from_secs(20));
    let status = runner.node_status(0).unwrap();
    assert!(status.head_number >= 1);
    // Height 1 could only finalize after leaving round 0.
    let block1 = runner.node_store(0).unwrap().block_by_number(1).unwrap();
    assert!(block1.header.extra().unwrap().round >= 1);
    assert_ne!(block1.header.proposer, proposer);
}

#[traced_test]
#[test]
fn test_partition_stalls_then_heals() {
    let mut runner = SimulationRunner::new(test_network_config(), test_bft_config(), 99).unwrap();
    runner.network_mut().partition_groups(&[0, 1], &[2, 3]);
    runner.start();

    runner.run_until(Duration::from_secs(5));
    assert_eq!(runner.min_live_head(), 0, "no side holds a quorum");
    for node in 0..4 {
        assert!(runner.finalized_hashes(node).is_empty());
    }

    runner.network_mut().heal_all();
    assert!(
        runner.run_until_height(2, Duration::from_millis(250), Duration::from_secs(120)),
        "progress resumes after the partition heals"
    );
    assert_agreement(&runner);
}

#[test]
fn test_lossy_network_stays_safe() {
    let config = NetworkConfig {
        packet_loss_rate: 0.1,
        ..test_network_config()
    };
    let mut runner = SimulationRunner::new(config, test_bft_config(), 1234).unwrap();
    runner.start();
    runner.run_until(Duration::from_secs(60));

    assert!(runner.stats().messages_dropped_loss > 0);
    assert!((0..4).any(|i| runner.node_status(i).unwrap().head_number >= 1));
    assert_agreement(&runner);
}
