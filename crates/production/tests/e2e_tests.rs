//! End-to-end tests for the tokio runner.
//!
//! These start real validator tasks on the tokio runtime, connected by the
//! in-process network, and wait on wall-clock time.

use favo_bft::{
    verify_committed_seals, ChainStore, InMemorySnapshotStore, MemoryChainStore,
    ValidatorSetManager,
};
use favo_production::{
    devnet_keypair, Devnet, LocalNetwork, NodeConfig, ProductionRunner, RunnerError,
};
use favo_types::{
    transactions_root, Block, Extra, Hash, Header, Transaction, ValidatorInfo, ValidatorSet,
    ValidatorSetDelta,
};
use std::sync::Arc;
use std::time::Duration;
use tracing_test::traced_test;

fn fast_config(validators: usize) -> NodeConfig {
    let mut config = NodeConfig::default();
    config.consensus.period_size = 2;
    config.consensus.epoch_size = 4;
    config.consensus.block_interval_ms = 20;
    config.consensus.round_timeout_ms = 1000;
    config.devnet.validators = validators;
    config.devnet.seed = 11;
    config
}

fn assert_same_chain(devnet: &Devnet, up_to: u64) {
    let reference = devnet.store(0).unwrap();
    for index in 1..devnet.len() {
        let store = devnet.store(index).unwrap();
        for number in 0..=up_to {
            assert_eq!(
                store.block_by_number(number).map(|b| b.hash()),
                reference.block_by_number(number).map(|b| b.hash()),
                "validator {index} disagrees at block {number}"
            );
        }
    }
}

#[traced_test]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_devnet_finalizes_blocks() {
    let mut config = fast_config(4);
    config.devnet.transactions = 50;
    let devnet = Devnet::start(&config).unwrap();

    devnet
        .wait_for_height(6, Duration::from_secs(30))
        .await
        .unwrap();
    assert_same_chain(&devnet, 6);

    // Scheduled epoch boundaries every 4 blocks.
    for report in devnet.reports() {
        assert!(report.head_number >= 6);
        assert!(report.epoch >= 1);
        assert_eq!(report.validators.len(), 4);
    }

    let store = devnet.store(0).unwrap();
    let set = ValidatorSet::new(
        (0..4)
            .map(|i| ValidatorInfo::new(devnet_keypair(11, i).public_key(), 1))
            .collect(),
    );
    let block1 = store.block_by_number(1).unwrap();
    verify_committed_seals(&block1.header, &block1.header.extra().unwrap(), &set).unwrap();

    let included: usize = (1..=6)
        .map(|n| store.block_by_number(n).unwrap().transactions.len())
        .sum();
    assert_eq!(included, 50, "pooled transactions land in the first blocks");

    devnet.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_validator_devnet() {
    let devnet = Devnet::start(&fast_config(1)).unwrap();
    devnet
        .wait_for_height(3, Duration::from_secs(20))
        .await
        .unwrap();
    devnet.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_validator_joins_through_period_end() {
    let config = fast_config(4);
    let devnet = Devnet::start(&config).unwrap();
    devnet
        .wait_for_height(1, Duration::from_secs(20))
        .await
        .unwrap();

    let joiner = devnet_keypair(99, 0);
    devnet
        .request_validator_change(ValidatorSetDelta {
            added: vec![ValidatorInfo::new(joiner.public_key(), 1)],
            removed: vec![],
        })
        .await
        .unwrap();

    // The joiner has no node, so quorum needs 4 of 5; the chain continues.
    devnet
        .wait_for_height(8, Duration::from_secs(60))
        .await
        .unwrap();
    for report in devnet.reports() {
        assert_eq!(report.validators.len(), 5);
        assert!(report.validators.contains(&joiner.address()));
    }
    assert_same_chain(&devnet, 8);
    devnet.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_invalid_config_rejected_before_start() {
    let mut config = fast_config(4);
    config.consensus.epoch_size = 5;
    assert!(Devnet::start(&config).is_err());
}

#[tokio::test]
async fn test_builder_requires_fields() {
    let err = ProductionRunner::builder()
        .signing_key(devnet_keypair(0, 0))
        .build()
        .unwrap_err();
    assert!(matches!(err, RunnerError::MissingField("bft_config")));
}

#[tokio::test]
async fn test_shutdown_handle_stops_runner() {
    let key = devnet_keypair(5, 0);
    let genesis = Block::genesis(0, &Extra::default());
    // Single validator that is not this node: the runner only follows.
    let set = ValidatorSet::new(vec![ValidatorInfo::new(devnet_keypair(5, 1).public_key(), 1)]);
    let validators = Arc::new(ValidatorSetManager::new(
        set,
        genesis.hash(),
        Arc::new(InMemorySnapshotStore::new()),
    ));
    let network = LocalNetwork::new();

    let mut runner = ProductionRunner::builder()
        .signing_key(key)
        .bft_config(fast_config(1).bft_config().unwrap())
        .store(Arc::new(MemoryChainStore::with_genesis(genesis)))
        .validators(validators)
        .network(network.clone())
        .build()
        .unwrap();
    assert_eq!(network.peer_count(), 1);

    let handle = runner.shutdown_handle().unwrap();
    assert!(runner.shutdown_handle().is_none());
    let task = tokio::spawn(runner.run());

    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.shutdown();
    let result = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("runner should stop")
        .unwrap();
    assert!(result.is_ok());
    assert_eq!(network.peer_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_finalized_subscription() {
    let config = fast_config(1);
    let key = devnet_keypair(config.devnet.seed, 0);
    let genesis = Block::genesis(0, &Extra::default());
    let set = ValidatorSet::new(vec![ValidatorInfo::new(key.public_key(), 1)]);
    let validators = Arc::new(ValidatorSetManager::new(
        set,
        genesis.hash(),
        Arc::new(InMemorySnapshotStore::new()),
    ));

    let mut runner = ProductionRunner::builder()
        .signing_key(key)
        .bft_config(config.bft_config().unwrap())
        .store(Arc::new(MemoryChainStore::with_genesis(genesis.clone())))
        .validators(validators)
        .network(LocalNetwork::new())
        .build()
        .unwrap();
    runner.mempool().submit(Transaction(b"hello".to_vec()));
    let mut finalized = runner.subscribe_finalized();
    let _handle = runner.shutdown_handle();
    tokio::spawn(runner.run());

    let block = tokio::time::timeout(Duration::from_secs(10), finalized.recv())
        .await
        .expect("a block within the timeout")
        .unwrap();
    assert_eq!(block.number(), 1);
    assert_eq!(block.header.parent_hash, genesis.hash());
    assert_eq!(block.transactions, vec![Transaction(b"hello".to_vec())]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_append_stops_runner() {
    let config = fast_config(1);
    let key = devnet_keypair(config.devnet.seed, 0);
    let genesis = Block::genesis(0, &Extra::default());
    let set = ValidatorSet::new(vec![ValidatorInfo::new(key.public_key(), 1)]);
    let validators = Arc::new(ValidatorSetManager::new(
        set,
        genesis.hash(),
        Arc::new(InMemorySnapshotStore::new()),
    ));
    let store = Arc::new(MemoryChainStore::with_genesis(genesis.clone()));

    let mut runner = ProductionRunner::builder()
        .signing_key(key.clone())
        .bft_config(config.bft_config().unwrap())
        .store(Arc::clone(&store))
        .validators(validators)
        .network(LocalNetwork::new())
        .build()
        .unwrap();
    let mut finalized = runner.subscribe_finalized();
    let _handle = runner.shutdown_handle();

    // Someone else wrote block 1 behind the runner's back.
    let foreign = Block {
        header: Header::new(
            1,
            genesis.hash(),
            key.address(),
            Hash::from_bytes(b"foreign-state"),
            transactions_root(&[]),
            0,
            &Extra::default(),
        ),
        transactions: vec![],
    };
    store.append(foreign.clone()).unwrap();

    let result = tokio::time::timeout(Duration::from_secs(10), runner.run())
        .await
        .expect("runner should stop on its own");
    match result {
        Err(RunnerError::Halted(reason)) => {
            assert!(reason.contains("persist block 1"), "unexpected reason: {reason}")
        }
        other => panic!("expected a halt, got {other:?}"),
    }
    assert_eq!(store.head().unwrap().hash(), foreign.hash());
    assert!(finalized.try_recv().is_err(), "unpersisted block must not be announced");
}
