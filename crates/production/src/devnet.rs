//! Local validator network in one process.
//!
//! Every validator gets its own chain store, validator-set manager, mempool
//! and [`ProductionRunner`] task. They talk over a shared [`LocalNetwork`].

use crate::config::{NodeConfig, NodeConfigError};
use crate::mempool::Mempool;
use crate::network::LocalNetwork;
use crate::runner::{ProductionRunner, RunnerError, ShutdownHandle};
use favo_bft::{InMemorySnapshotStore, MemoryChainStore, ValidatorSetManager};
use favo_core::Event;
use favo_types::{
    Address, Block, BlockNumber, EpochNumber, Extra, Hash, KeyPair, Transaction, ValidatorInfo,
    ValidatorSet, ValidatorSetDelta,
};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum DevnetError {
    #[error(transparent)]
    Config(#[from] NodeConfigError),

    #[error("Runner error: {0}")]
    Runner(#[from] RunnerError),

    #[error("timed out after {elapsed:?} waiting for height {target}, lowest head is {lowest}")]
    Timeout {
        target: BlockNumber,
        lowest: BlockNumber,
        elapsed: Duration,
    },

    #[error("validator {address} stopped: {reason}")]
    NodeStopped { address: Address, reason: String },
}

/// Derive the devnet key for validator `index`. Same seed, same keys.
pub fn devnet_keypair(seed: u64, index: usize) -> KeyPair {
    let mut bytes = [0u8; 32];
    let key_seed = seed.wrapping_add(index as u64).wrapping_mul(0x517cc1b727220a95);
    bytes[..8].copy_from_slice(&key_seed.to_le_bytes());
    bytes[8..16].copy_from_slice(&(index as u64).to_le_bytes());
    bytes[16..20].copy_from_slice(b"favo");
    KeyPair::from_seed(&bytes)
}

struct DevnetNode {
    address: Address,
    store: Arc<MemoryChainStore>,
    validators: Arc<ValidatorSetManager>,
    mempool: Arc<Mempool>,
    events: tokio::sync::mpsc::Sender<Event>,
    shutdown: Option<ShutdownHandle>,
    task: JoinHandle<Result<(), RunnerError>>,
}

/// A node's view of the chain at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeReport {
    pub address: Address,
    pub head_number: BlockNumber,
    pub head_hash: Hash,
    pub epoch: EpochNumber,
    pub validators: Vec<Address>,
}

impl fmt::Display for NodeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "validator {}", self.address)?;
        writeln!(f, "  head:       #{} {}", self.head_number, self.head_hash)?;
        writeln!(f, "  epoch:      {}", self.epoch)?;
        write!(f, "  validators:")?;
        for address in &self.validators {
            write!(f, " {address}")?;
        }
        Ok(())
    }
}

/// Running in-process validator network.
pub struct Devnet {
    nodes: Vec<DevnetNode>,
    network: LocalNetwork,
    genesis: Block,
}

impl Devnet {
    /// Start `config.devnet.validators` validators, all in the genesis set.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: &NodeConfig) -> Result<Self, DevnetError> {
        config.validate()?;
        let bft_config = config.bft_config()?;
        let devnet = &config.devnet;

        let keys: Vec<KeyPair> = (0..devnet.validators)
            .map(|i| devnet_keypair(devnet.seed, i))
            .collect();
        let genesis_set = ValidatorSet::new(
            keys.iter()
                .map(|k| ValidatorInfo::new(k.public_key(), 1))
                .collect(),
        );
        let genesis = Block::genesis(0, &Extra::default());
        let network = LocalNetwork::new();

        let mut runners = Vec::with_capacity(keys.len());
        for key in keys {
            let store = Arc::new(MemoryChainStore::with_genesis(genesis.clone()));
            let validators = Arc::new(ValidatorSetManager::new(
                genesis_set.clone(),
                genesis.hash(),
                Arc::new(InMemorySnapshotStore::new()),
            ));
            let mempool = Arc::new(Mempool::new());
            for i in 0..devnet.transactions {
                mempool.submit(Transaction((i as u64).to_be_bytes().to_vec()));
            }

            let runner = ProductionRunner::builder()
                .signing_key(key)
                .bft_config(bft_config.clone())
                .store(store)
                .validators(validators)
                .network(network.clone())
                .mempool(mempool)
                .channel_capacity(config.node.event_channel_capacity)
                .finalized_capacity(config.node.finalized_channel_capacity)
                .build()?;
            runners.push(runner);
        }

        // Every node is registered before any runner starts.
        let nodes = runners
            .into_iter()
            .map(|mut runner| DevnetNode {
                address: runner.address(),
                store: Arc::clone(runner.store()),
                validators: Arc::clone(runner.validators()),
                mempool: Arc::clone(runner.mempool()),
                events: runner.event_sender(),
                shutdown: runner.shutdown_handle(),
                task: tokio::spawn(runner.run()),
            })
            .collect::<Vec<_>>();

        info!(
            validators = nodes.len(),
            genesis_hash = ?genesis.hash(),
            period_size = bft_config.period_size,
            epoch_size = bft_config.epoch_size,
            "Devnet started"
        );

        Ok(Self {
            nodes,
            network,
            genesis,
        })
    }

    pub fn genesis(&self) -> &Block {
        &self.genesis
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn network(&self) -> &LocalNetwork {
        &self.network
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.nodes.iter().map(|n| n.address).collect()
    }

    /// Chain store of validator `index`.
    pub fn store(&self, index: usize) -> Option<&Arc<MemoryChainStore>> {
        self.nodes.get(index).map(|n| &n.store)
    }

    /// Add a transaction to every validator's pool.
    pub fn submit_transaction(&self, tx: Transaction) {
        for node in &self.nodes {
            node.mempool.submit(tx.clone());
        }
    }

    /// Deliver a membership change request to every validator.
    pub async fn request_validator_change(&self, delta: ValidatorSetDelta) -> Result<(), DevnetError> {
        for node in &self.nodes {
            node.events
                .send(Event::ValidatorSetChangeRequested {
                    delta: delta.clone(),
                })
                .await
                .map_err(|_| DevnetError::Runner(RunnerError::ChannelClosed))?;
        }
        Ok(())
    }

    /// Lowest head number across validators.
    pub fn min_head(&self) -> BlockNumber {
        self.nodes
            .iter()
            .map(|n| n.store.head().map(|b| b.number()).unwrap_or(0))
            .min()
            .unwrap_or(0)
    }

    /// Poll until every validator's head reaches `height`.
    ///
    /// Fails early if a validator task ends, and after `timeout` otherwise.
    pub async fn wait_for_height(
        &self,
        height: BlockNumber,
        timeout: Duration,
    ) -> Result<(), DevnetError> {
        let started = tokio::time::Instant::now();
        let mut tick = tokio::time::interval(Duration::from_millis(20));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tick.tick().await;
            if self.min_head() >= height {
                return Ok(());
            }
            if let Some(node) = self.nodes.iter().find(|n| n.task.is_finished()) {
                return Err(DevnetError::NodeStopped {
                    address: node.address,
                    reason: "runner task exited".to_string(),
                });
            }
            if started.elapsed() >= timeout {
                return Err(DevnetError::Timeout {
                    target: height,
                    lowest: self.min_head(),
                    elapsed: started.elapsed(),
                });
            }
        }
    }

    /// Every validator's current view.
    pub fn reports(&self) -> Vec<NodeReport> {
        self.nodes
            .iter()
            .map(|node| {
                let head = node.store.head();
                NodeReport {
                    address: node.address,
                    head_number: head.as_ref().map(|b| b.number()).unwrap_or(0),
                    head_hash: head.map(|b| b.hash()).unwrap_or_default(),
                    epoch: node.validators.current_epoch(),
                    validators: node
                        .validators
                        .current_set()
                        .iter()
                        .map(|v| v.address)
                        .collect(),
                }
            })
            .collect()
    }

    /// Stop every validator and wait for its task.
    ///
    /// Returns the first halt or runner error, if any.
    pub async fn shutdown(mut self) -> Result<(), DevnetError> {
        for node in &mut self.nodes {
            if let Some(handle) = node.shutdown.take() {
                handle.shutdown();
            }
        }

        let mut first_error = None;
        for node in self.nodes.drain(..) {
            let outcome = match node.task.await {
                Ok(result) => result.map_err(DevnetError::from),
                Err(join) => Err(DevnetError::NodeStopped {
                    address: node.address,
                    reason: join.to_string(),
                }),
            };
            if let Err(e) = outcome {
                warn!(validator = ?node.address, error = %e, "Validator stopped with error");
                first_error.get_or_insert(e);
            }
        }
        info!("Devnet stopped");
        first_error.map_or(Ok(()), Err)
    }
}

impl fmt::Debug for Devnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Devnet")
            .field("validators", &self.nodes.len())
            .field("min_head", &self.min_head())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_devnet_keys_are_seeded() {
        assert_eq!(
            devnet_keypair(7, 2).address(),
            devnet_keypair(7, 2).address()
        );
        assert_ne!(devnet_keypair(7, 2).address(), devnet_keypair(7, 3).address());
        assert_ne!(devnet_keypair(7, 2).address(), devnet_keypair(8, 2).address());
    }

    #[test]
    fn test_report_display() {
        let report = NodeReport {
            address: devnet_keypair(0, 0).address(),
            head_number: 5,
            head_hash: Hash::from_bytes(b"head"),
            epoch: 1,
            validators: vec![devnet_keypair(0, 0).address()],
        };
        let text = report.to_string();
        assert!(text.contains("#5"));
        assert!(text.contains("epoch:      1"));
    }
}
