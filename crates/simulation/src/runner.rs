//! Deterministic simulation runner.
//!
//! Each node has its own chain store, validator-set manager and executor.
//! Delegated work (signature checks, state execution) completes inline at the
//! current simulated time.

use crate::event_queue::EventKey;
use crate::executor::SimExecutor;
use crate::network::{NetworkConfig, SimulatedNetwork};
use crate::NodeIndex;
use favo_bft::{
    BftConfig, BftError, BftState, ChainAccessor, ChainStore, InMemorySnapshotStore,
    MemoryChainStore, RestoreError, ValidatorSetManager,
};
use favo_core::{Action, Event, StateMachine, TimerId};
use favo_types::{
    Address, Block, BlockNumber, EpochNumber, Extra, Hash, KeyPair, Round, Transaction,
    ValidatorInfo, ValidatorSet, ValidatorSetDelta,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

/// A restarted node could not rebuild its state from its own chain.
#[derive(Debug, Error)]
pub enum RestartError {
    #[error("no such node: {0}")]
    UnknownNode(NodeIndex),

    #[error("validator replay failed: {0}")]
    Restore(#[from] RestoreError),

    #[error("state machine startup failed: {0}")]
    Startup(#[from] BftError),
}

/// One simulated validator.
struct SimNode {
    key: KeyPair,
    state: BftState,
    store: Arc<MemoryChainStore>,
    validators: Arc<ValidatorSetManager>,
    executor: SimExecutor,
    /// Hashes of finalized blocks, in height order.
    finalized: Vec<Hash>,
    halted: Option<String>,
    crashed: bool,
}

/// Point-in-time view of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStatus {
    pub address: Address,
    /// Height being decided.
    pub height: BlockNumber,
    pub round: Round,
    pub head_number: BlockNumber,
    pub head_hash: Hash,
    pub epoch: EpochNumber,
    pub validators: Vec<Address>,
    pub halted: Option<String>,
    pub crashed: bool,
}

/// Statistics collected during simulation.
#[derive(Debug, Default, Clone)]
pub struct SimulationStats {
    /// Total events processed.
    pub events_processed: u64,
    /// Events processed by priority.
    pub events_by_priority: [u64; 4],
    /// Total actions generated.
    pub actions_generated: u64,
    /// Messages sent (successfully scheduled for delivery).
    pub messages_sent: u64,
    /// Messages dropped due to network partition.
    pub messages_dropped_partition: u64,
    /// Messages dropped due to packet loss.
    pub messages_dropped_loss: u64,
    /// Events addressed to crashed nodes.
    pub events_dropped_crashed: u64,
    /// Events addressed to halted nodes.
    pub events_dropped_halted: u64,
    pub timers_set: u64,
    pub timers_cancelled: u64,
    /// `EmitFinalizedBlock` actions across all nodes.
    pub blocks_finalized: u64,
}

impl SimulationStats {
    /// Total messages dropped (partition + packet loss).
    pub fn messages_dropped(&self) -> u64 {
        self.messages_dropped_partition + self.messages_dropped_loss
    }

    /// Message delivery rate (sent / (sent + dropped)).
    pub fn delivery_rate(&self) -> f64 {
        let total = self.messages_sent + self.messages_dropped();
        if total == 0 {
            1.0
        } else {
            self.messages_sent as f64 / total as f64
        }
    }
}

/// Deterministic simulation runner.
///
/// Processes events in deterministic order and executes actions.
/// Given the same seed, produces identical results every run.
pub struct SimulationRunner {
    nodes: Vec<SimNode>,

    /// Global event queue, ordered deterministically.
    event_queue: BTreeMap<EventKey, Event>,

    /// Sequence counter for deterministic ordering.
    sequence: u64,

    now: Duration,

    network: SimulatedNetwork,

    /// RNG for network conditions (seeded for determinism).
    rng: ChaCha8Rng,

    /// Pending timers, for replacement and cancellation.
    timers: HashMap<(NodeIndex, TimerId), EventKey>,

    config: BftConfig,
    genesis: Block,
    genesis_set: ValidatorSet,

    stats: SimulationStats,
}

impl SimulationRunner {
    /// Create a runner where every node is a genesis validator.
    pub fn new(
        network_config: NetworkConfig,
        config: BftConfig,
        seed: u64,
    ) -> Result<Self, BftError> {
        let count = network_config.num_nodes as usize;
        Self::with_genesis_validators(network_config, config, seed, count)
    }

    /// Create a runner where only the first `genesis_validators` nodes are in
    /// the genesis set. The rest follow the chain until they are added.
    pub fn with_genesis_validators(
        network_config: NetworkConfig,
        config: BftConfig,
        seed: u64,
        genesis_validators: usize,
    ) -> Result<Self, BftError> {
        let network = SimulatedNetwork::new(network_config.clone());
        let rng = ChaCha8Rng::seed_from_u64(seed);

        let keys: Vec<KeyPair> = (0..network_config.num_nodes)
            .map(|i| {
                let mut seed_bytes = [0u8; 32];
                let key_seed = seed.wrapping_add(i as u64).wrapping_mul(0x517cc1b727220a95);
                seed_bytes[..8].copy_from_slice(&key_seed.to_le_bytes());
                seed_bytes[8..16].copy_from_slice(&(i as u64).to_le_bytes());
                KeyPair::from_seed(&seed_bytes)
            })
            .collect();

        let genesis_set = ValidatorSet::new(
            keys.iter()
                .take(genesis_validators)
                .map(|k| ValidatorInfo::new(k.public_key(), 1))
                .collect(),
        );
        let genesis = Block::genesis(0, &Extra::default());

        let mut nodes = Vec::with_capacity(keys.len());
        for key in keys {
            let store = Arc::new(MemoryChainStore::with_genesis(genesis.clone()));
            let validators = Arc::new(ValidatorSetManager::new(
                genesis_set.clone(),
                genesis.hash(),
                Arc::new(InMemorySnapshotStore::new()),
            ));
            let state = BftState::new(
                key.clone(),
                config.clone(),
                Arc::clone(&validators),
                store.clone(),
            )?;
            nodes.push(SimNode {
                key,
                state,
                store,
                validators,
                executor: SimExecutor::new(),
                finalized: Vec::new(),
                halted: None,
                crashed: false,
            });
        }

        info!(
            num_nodes = nodes.len(),
            genesis_validators = genesis_set.len(),
            genesis_hash = ?genesis.hash(),
            seed,
            "Created simulation runner"
        );

        Ok(Self {
            nodes,
            event_queue: BTreeMap::new(),
            sequence: 0,
            now: Duration::ZERO,
            network,
            rng,
            timers: HashMap::new(),
            config,
            genesis,
            genesis_set,
            stats: SimulationStats::default(),
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Accessors
    // ═══════════════════════════════════════════════════════════════════════

    pub fn stats(&self) -> &SimulationStats {
        &self.stats
    }

    /// Current simulation time.
    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn network(&self) -> &SimulatedNetwork {
        &self.network
    }

    /// Mutable network access for partition and loss configuration.
    pub fn network_mut(&mut self) -> &mut SimulatedNetwork {
        &mut self.network
    }

    pub fn genesis(&self) -> &Block {
        &self.genesis
    }

    pub fn genesis_set(&self) -> &ValidatorSet {
        &self.genesis_set
    }

    pub fn config(&self) -> &BftConfig {
        &self.config
    }

    pub fn node_state(&self, node: NodeIndex) -> Option<&BftState> {
        self.nodes.get(node as usize).map(|n| &n.state)
    }

    pub fn node_store(&self, node: NodeIndex) -> Option<&Arc<MemoryChainStore>> {
        self.nodes.get(node as usize).map(|n| &n.store)
    }

    pub fn node_validators(&self, node: NodeIndex) -> Option<&Arc<ValidatorSetManager>> {
        self.nodes.get(node as usize).map(|n| &n.validators)
    }

    pub fn executor_mut(&mut self, node: NodeIndex) -> Option<&mut SimExecutor> {
        self.nodes.get_mut(node as usize).map(|n| &mut n.executor)
    }

    /// Hashes of the blocks `node` finalized, in height order.
    pub fn finalized_hashes(&self, node: NodeIndex) -> &[Hash] {
        self.nodes
            .get(node as usize)
            .map(|n| n.finalized.as_slice())
            .unwrap_or(&[])
    }

    /// Validator entry for `node`, as it would appear in a membership delta.
    pub fn validator_info(&self, node: NodeIndex) -> Option<ValidatorInfo> {
        self.nodes
            .get(node as usize)
            .map(|n| ValidatorInfo::new(n.key.public_key(), 1))
    }

    pub fn node_status(&self, node: NodeIndex) -> Option<NodeStatus> {
        let n = self.nodes.get(node as usize)?;
        let head = n.state.head();
        Some(NodeStatus {
            address: n.state.address(),
            height: n.state.height(),
            round: n.state.round(),
            head_number: head.number,
            head_hash: head.hash,
            epoch: n.validators.current_epoch(),
            validators: n.validators.current_set().iter().map(|v| v.address).collect(),
            halted: n.halted.clone(),
            crashed: n.crashed,
        })
    }

    /// Lowest head number among nodes that are running.
    pub fn min_live_head(&self) -> BlockNumber {
        self.nodes
            .iter()
            .filter(|n| !n.crashed && n.halted.is_none())
            .map(|n| n.state.head().number)
            .min()
            .unwrap_or(0)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Driving the simulation
    // ═══════════════════════════════════════════════════════════════════════

    /// Enter the height after genesis on every running node.
    pub fn start(&mut self) {
        for index in 0..self.nodes.len() {
            let node = &mut self.nodes[index];
            if node.crashed {
                continue;
            }
            node.state.set_time(self.now);
            let actions = node.state.start();
            self.process_actions(index as NodeIndex, actions);
        }
    }

    /// Schedule an event for `node` after `delay`.
    pub fn schedule_initial_event(&mut self, node: NodeIndex, delay: Duration, event: Event) {
        let time = self.now + delay;
        self.schedule_event(node, time, event);
    }

    /// Gossip a transaction into every node's pool.
    pub fn submit_transaction(&mut self, tx: Transaction) {
        for node in &mut self.nodes {
            node.executor.submit(tx.clone());
        }
    }

    /// Deliver the same membership change request to every node now.
    pub fn request_validator_change(&mut self, delta: ValidatorSetDelta) {
        for node in 0..self.nodes.len() as NodeIndex {
            self.schedule_event(
                node,
                self.now,
                Event::ValidatorSetChangeRequested {
                    delta: delta.clone(),
                },
            );
        }
    }

    /// Stop a node. Its pending timers are dropped and nothing reaches it
    /// until it is restarted.
    pub fn crash_node(&mut self, node: NodeIndex) {
        let Some(n) = self.nodes.get_mut(node as usize) else {
            return;
        };
        n.crashed = true;
        for id in [TimerId::Proposal, TimerId::Round] {
            if let Some(key) = self.timers.remove(&(node, id)) {
                self.event_queue.remove(&key);
            }
        }
        info!(node, time = ?self.now, "Node crashed");
    }

    /// Rebuild a crashed node from its own chain store and start it again.
    ///
    /// The validator set is replayed from genesis; nothing else survives.
    pub fn restart_node(&mut self, node: NodeIndex) -> Result<(), RestartError> {
        let config = self.config.clone();
        let genesis_set = self.genesis_set.clone();
        let genesis_hash = self.genesis.hash();
        let n = self
            .nodes
            .get_mut(node as usize)
            .ok_or(RestartError::UnknownNode(node))?;

        let validators = Arc::new(ValidatorSetManager::new(
            genesis_set,
            genesis_hash,
            Arc::new(InMemorySnapshotStore::new()),
        ));
        let accessor = ChainAccessor::new(n.store.clone(), config.retry);
        let head = validators.restore_from_chain(&accessor, config.epoch_size)?;
        let mut state = BftState::new(
            n.key.clone(),
            config,
            Arc::clone(&validators),
            n.store.clone(),
        )?;
        state.set_time(self.now);

        let actions = state.start();
        n.state = state;
        n.validators = validators;
        n.crashed = false;
        n.halted = None;
        info!(node, head, time = ?self.now, "Node restarted");

        self.process_actions(node, actions);
        Ok(())
    }

    /// Run simulation until no more events or time limit reached.
    pub fn run_until(&mut self, end_time: Duration) {
        trace!(
            end_time_secs = end_time.as_secs_f64(),
            "Running simulation step"
        );

        while let Some((key, event)) = self.event_queue.pop_first() {
            if key.time > end_time {
                self.event_queue.insert(key, event);
                break;
            }
            self.now = key.time;
            let node_index = key.node_index;
            if matches!(event, Event::ProposalTimer | Event::RoundTimeout) {
                self.timers.retain(|_, pending| *pending != key);
            }

            let node = &mut self.nodes[node_index as usize];
            if node.crashed {
                self.stats.events_dropped_crashed += 1;
                continue;
            }
            if node.halted.is_some() {
                self.stats.events_dropped_halted += 1;
                continue;
            }

            self.stats.events_processed += 1;
            self.stats.events_by_priority[event.priority() as usize] += 1;

            trace!(time = ?self.now, node = node_index, event = event.type_name(), "Processing event");
            node.state.set_time(self.now);
            let actions = node.state.handle(event);
            self.stats.actions_generated += actions.len() as u64;
            self.process_actions(node_index, actions);
        }
        self.now = self.now.max(end_time);

        trace!(
            events_processed = self.stats.events_processed,
            actions_generated = self.stats.actions_generated,
            final_time = ?self.now,
            "Simulation step complete"
        );
    }

    /// Run in `step` increments until every running node's head reaches
    /// `height`, or `deadline` passes. Returns whether the height was reached.
    pub fn run_until_height(
        &mut self,
        height: BlockNumber,
        step: Duration,
        deadline: Duration,
    ) -> bool {
        while self.now < deadline {
            if self.min_live_head() >= height {
                return true;
            }
            let next = (self.now + step).min(deadline);
            self.run_until(next);
        }
        self.min_live_head() >= height
    }

    fn process_actions(&mut self, from: NodeIndex, actions: Vec<Action>) {
        for action in actions {
            // Nothing after a halt takes effect.
            if self.nodes[from as usize].halted.is_some() {
                break;
            }
            self.process_action(from, action);
        }
    }

    /// Process an action from a node.
    fn process_action(&mut self, from: NodeIndex, action: Action) {
        match action {
            Action::Broadcast { message } => {
                for to in self.network.all_nodes() {
                    if to != from {
                        let event = Event::MessageReceived {
                            message: message.clone(),
                        };
                        self.try_deliver_message(from, to, event);
                    }
                }
            }

            Action::SetTimer { id, duration } => {
                if let Some(old) = self.timers.remove(&(from, id)) {
                    self.event_queue.remove(&old);
                }
                let key = self.schedule_event(from, self.now + duration, id.event());
                self.timers.insert((from, id), key);
                self.stats.timers_set += 1;
            }

            Action::CancelTimer { id } => {
                if let Some(key) = self.timers.remove(&(from, id)) {
                    if self.event_queue.remove(&key).is_some() {
                        self.stats.timers_cancelled += 1;
                    }
                }
            }

            // Delegated work completes instantly in simulation
            Action::VerifyMessage {
                message,
                public_key,
                signing_message,
            } => {
                let valid = public_key
                    .verify(&signing_message, message.signature())
                    .is_ok();
                self.schedule_event(from, self.now, Event::MessageVerified { message, valid });
            }

            Action::ApplyTransactions {
                height,
                round,
                parent_state_root,
                max_transactions,
            } => {
                let executor = &self.nodes[from as usize].executor;
                let result = executor.apply(parent_state_root, max_transactions);
                self.schedule_event(
                    from,
                    self.now,
                    Event::TransactionsApplied {
                        height,
                        round,
                        result,
                    },
                );
            }

            Action::PersistBlock { block } => {
                let number = block.number();
                if let Err(e) = self.nodes[from as usize].store.append(block) {
                    error!(node = from, number, error = %e, "Failed to persist block");
                    self.nodes[from as usize].halted =
                        Some(format!("failed to persist block {number}: {e}"));
                }
            }

            Action::EmitFinalizedBlock { block } => {
                let node = &mut self.nodes[from as usize];
                node.executor.remove_included(&block.transactions);
                node.finalized.push(block.hash());
                self.stats.blocks_finalized += 1;
                debug!(node = from, number = block.number(), block_hash = ?block.hash(), "Block finalized");
            }

            Action::Halt { reason } => {
                warn!(node = from, reason = %reason, "Node halted");
                self.nodes[from as usize].halted = Some(reason);
            }
        }
    }

    fn schedule_event(&mut self, node: NodeIndex, time: Duration, event: Event) -> EventKey {
        self.sequence += 1;
        let key = EventKey::new(time, &event, node, self.sequence);
        self.event_queue.insert(key, event);
        key
    }

    fn try_deliver_message(&mut self, from: NodeIndex, to: NodeIndex, event: Event) {
        if self.network.is_partitioned(from, to) {
            self.stats.messages_dropped_partition += 1;
            trace!(from, to, "Message dropped due to partition");
            return;
        }

        if self.network.should_drop_packet(&mut self.rng) {
            self.stats.messages_dropped_loss += 1;
            trace!(from, to, "Message dropped due to packet loss");
            return;
        }

        let latency = self.network.sample_latency(&mut self.rng);
        self.schedule_event(to, self.now + latency, event);
        self.stats.messages_sent += 1;
    }
}

impl std::fmt::Debug for SimulationRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationRunner")
            .field("nodes", &self.nodes.len())
            .field("now", &self.now)
            .field("queued_events", &self.event_queue.len())
            .finish_non_exhaustive()
    }
}
