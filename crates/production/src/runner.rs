//! Production runner implementation.
//!
//! One tokio task per validator owns the [`BftState`] and drives it from
//! three channels, polled in priority order:
//!
//! 1. Timers (proposal, round timeout)
//! 2. Callbacks (signature checks and execution results)
//! 3. Inbound (peer messages and operator requests)
//!
//! Signature verification and transaction execution run on the blocking
//! pool and report back through the callback channel.

use crate::mempool::Mempool;
use crate::network::LocalNetwork;
use crate::timers::{TimerFired, TimerManager};
use favo_bft::{BftConfig, BftError, BftState, ChainStore, MemoryChainStore, ValidatorSetManager};
use favo_core::{Action, Event, StateMachine};
use favo_types::{Address, Block, KeyPair};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, span, warn, Level};

/// Errors from the production runner.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Event channel closed")]
    ChannelClosed,

    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("State machine startup failed: {0}")]
    Startup(#[from] BftError),

    #[error("Consensus halted: {0}")]
    Halted(String),
}

/// Handle for shutting down a running ProductionRunner.
///
/// When dropped, signals the runner to exit gracefully.
#[derive(Debug)]
pub struct ShutdownHandle {
    tx: Option<oneshot::Sender<()>>,
}

impl ShutdownHandle {
    /// Trigger shutdown (consumes the handle).
    pub fn shutdown(mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for ShutdownHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Builder for constructing a [`ProductionRunner`].
///
/// Required fields:
/// - `signing_key` - ed25519 keypair for proposals, votes and seals
/// - `bft_config` - consensus parameters
/// - `store` - chain store seeded with at least the genesis block
/// - `validators` - validator-set manager matching the store
/// - `network` - transport the node registers on
///
/// Optional fields:
/// - `mempool` - transaction pool (defaults to a fresh, empty one)
/// - `channel_capacity` - inbound channel capacity (defaults to 10,000)
/// - `finalized_capacity` - finalized-block notification buffer (defaults to 256)
#[derive(Default)]
pub struct ProductionRunnerBuilder {
    signing_key: Option<KeyPair>,
    bft_config: Option<BftConfig>,
    store: Option<Arc<MemoryChainStore>>,
    validators: Option<Arc<ValidatorSetManager>>,
    network: Option<LocalNetwork>,
    mempool: Option<Arc<Mempool>>,
    channel_capacity: Option<usize>,
    finalized_capacity: Option<usize>,
}

impl ProductionRunnerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signing_key(mut self, key: KeyPair) -> Self {
        self.signing_key = Some(key);
        self
    }

    pub fn bft_config(mut self, config: BftConfig) -> Self {
        self.bft_config = Some(config);
        self
    }

    pub fn store(mut self, store: Arc<MemoryChainStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn validators(mut self, validators: Arc<ValidatorSetManager>) -> Self {
        self.validators = Some(validators);
        self
    }

    pub fn network(mut self, network: LocalNetwork) -> Self {
        self.network = Some(network);
        self
    }

    pub fn mempool(mut self, mempool: Arc<Mempool>) -> Self {
        self.mempool = Some(mempool);
        self
    }

    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = Some(capacity);
        self
    }

    pub fn finalized_capacity(mut self, capacity: usize) -> Self {
        self.finalized_capacity = Some(capacity);
        self
    }

    /// Build the runner and register it on the network.
    ///
    /// Messages that arrive before [`ProductionRunner::run`] starts wait in
    /// the inbound channel.
    pub fn build(self) -> Result<ProductionRunner, RunnerError> {
        let signing_key = self
            .signing_key
            .ok_or(RunnerError::MissingField("signing_key"))?;
        let bft_config = self
            .bft_config
            .ok_or(RunnerError::MissingField("bft_config"))?;
        let store = self.store.ok_or(RunnerError::MissingField("store"))?;
        let validators = self
            .validators
            .ok_or(RunnerError::MissingField("validators"))?;
        let network = self.network.ok_or(RunnerError::MissingField("network"))?;
        let mempool = self.mempool.unwrap_or_default();
        let channel_capacity = self.channel_capacity.unwrap_or(10_000).max(1);
        let finalized_capacity = self.finalized_capacity.unwrap_or(256).max(1);

        let address = signing_key.address();
        let state = BftState::new(signing_key, bft_config, Arc::clone(&validators), store.clone())?;

        // Timers get their own channel so a message flood never delays them.
        let (timer_tx, timer_rx) = mpsc::channel(16);
        let (callback_tx, callback_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::channel(channel_capacity);
        let (finalized_tx, _) = broadcast::channel(finalized_capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        network.register(address, inbound_tx.clone());

        Ok(ProductionRunner {
            state,
            address,
            store,
            validators,
            mempool,
            network,
            timers: TimerManager::new(timer_tx),
            timer_rx,
            callback_tx,
            callback_rx,
            inbound_tx,
            inbound_rx,
            finalized_tx,
            shutdown_rx,
            shutdown_tx: Some(shutdown_tx),
            halted: None,
        })
    }
}

/// Production runner with async I/O.
pub struct ProductionRunner {
    state: BftState,
    address: Address,
    store: Arc<MemoryChainStore>,
    validators: Arc<ValidatorSetManager>,
    mempool: Arc<Mempool>,
    network: LocalNetwork,
    timers: TimerManager,
    timer_rx: mpsc::Receiver<TimerFired>,
    /// Results of delegated work.
    callback_tx: mpsc::UnboundedSender<Event>,
    callback_rx: mpsc::UnboundedReceiver<Event>,
    /// Peer messages and operator requests.
    inbound_tx: mpsc::Sender<Event>,
    inbound_rx: mpsc::Receiver<Event>,
    finalized_tx: broadcast::Sender<Block>,
    shutdown_rx: oneshot::Receiver<()>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    halted: Option<String>,
}

impl ProductionRunner {
    /// Create a new builder for constructing a production runner.
    pub fn builder() -> ProductionRunnerBuilder {
        ProductionRunnerBuilder::new()
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Sender for operator requests such as
    /// [`Event::ValidatorSetChangeRequested`].
    pub fn event_sender(&self) -> mpsc::Sender<Event> {
        self.inbound_tx.clone()
    }

    /// Receive every block this node finalizes from now on.
    pub fn subscribe_finalized(&self) -> broadcast::Receiver<Block> {
        self.finalized_tx.subscribe()
    }

    pub fn store(&self) -> &Arc<MemoryChainStore> {
        &self.store
    }

    /// Read-only view of the validator set, safe to query while running.
    pub fn validators(&self) -> &Arc<ValidatorSetManager> {
        &self.validators
    }

    pub fn mempool(&self) -> &Arc<Mempool> {
        &self.mempool
    }

    /// Take the shutdown handle.
    ///
    /// Returns a handle that when dropped triggers graceful shutdown.
    /// Can only be called once; subsequent calls return None.
    pub fn shutdown_handle(&mut self) -> Option<ShutdownHandle> {
        self.shutdown_tx
            .take()
            .map(|tx| ShutdownHandle { tx: Some(tx) })
    }

    /// Run the event loop until shutdown or halt.
    ///
    /// Returns `Ok(())` after a shutdown signal and
    /// [`RunnerError::Halted`] if consensus stopped on its own.
    pub async fn run(mut self) -> Result<(), RunnerError> {
        info!(
            validator = ?self.address,
            head = self.state.head().number,
            epoch = self.validators.current_epoch(),
            validators = self.state.validator_set().len(),
            "Starting production runner"
        );

        self.state.set_time(wall_clock());
        let actions = self.state.start();
        self.process_actions(actions);

        let result = loop {
            if let Some(reason) = self.halted.take() {
                break Err(RunnerError::Halted(reason));
            }

            tokio::select! {
                biased;

                _ = &mut self.shutdown_rx => {
                    info!(validator = ?self.address, "Shutdown signal received");
                    break Ok(());
                }

                Some(fired) = self.timer_rx.recv() => {
                    if let Some(event) = self.timers.take_fired(fired) {
                        self.dispatch(event);
                    }
                }

                Some(event) = self.callback_rx.recv() => {
                    self.dispatch(event);
                }

                event = self.inbound_rx.recv() => match event {
                    Some(event) => self.dispatch(event),
                    None => break Err(RunnerError::ChannelClosed),
                },
            }
        };

        self.timers.cancel_all();
        self.network.unregister(&self.address);
        info!(
            validator = ?self.address,
            head = self.state.head().number,
            stats = ?self.state.stats(),
            "Production runner stopped"
        );
        result
    }

    fn dispatch(&mut self, event: Event) {
        let event_type = event.type_name();
        let event_span = span!(
            Level::DEBUG,
            "handle_event",
            event.type = %event_type,
            height = self.state.height(),
            round = self.state.round(),
        );
        let _guard = event_span.enter();

        self.state.set_time(wall_clock());
        let actions = self.state.handle(event);
        self.process_actions(actions);
    }

    fn process_actions(&mut self, actions: Vec<Action>) {
        for action in actions {
            // Nothing after a halt takes effect.
            if self.halted.is_some() {
                break;
            }
            self.process_action(action);
        }
    }

    fn process_action(&mut self, action: Action) {
        match action {
            Action::Broadcast { message } => {
                self.network.broadcast(self.address, &message);
            }

            Action::SetTimer { id, duration } => {
                self.timers.set_timer(id, duration);
            }

            Action::CancelTimer { id } => {
                self.timers.cancel_timer(id);
            }

            // ═══════════════════════════════════════════════════════════════
            // Delegated work - results go to the callback channel
            // ═══════════════════════════════════════════════════════════════
            Action::VerifyMessage {
                message,
                public_key,
                signing_message,
            } => {
                let callback_tx = self.callback_tx.clone();
                tokio::task::spawn_blocking(move || {
                    let valid = public_key
                        .verify(&signing_message, message.signature())
                        .is_ok();
                    let _ = callback_tx.send(Event::MessageVerified { message, valid });
                });
            }

            Action::ApplyTransactions {
                height,
                round,
                parent_state_root,
                max_transactions,
            } => {
                let callback_tx = self.callback_tx.clone();
                let mempool = Arc::clone(&self.mempool);
                tokio::task::spawn_blocking(move || {
                    let applied = mempool.apply(parent_state_root, max_transactions);
                    let _ = callback_tx.send(Event::TransactionsApplied {
                        height,
                        round,
                        result: Ok(applied),
                    });
                });
            }

            // ═══════════════════════════════════════════════════════════════
            // Storage and notifications
            // ═══════════════════════════════════════════════════════════════
            Action::PersistBlock { block } => {
                let number = block.number();
                if let Err(e) = self.store.append(block) {
                    error!(validator = ?self.address, number, error = %e, "Failed to persist block");
                    self.halted = Some(format!("failed to persist block {number}: {e}"));
                }
            }

            Action::EmitFinalizedBlock { block } => {
                self.mempool.remove_included(&block.transactions);
                debug!(
                    validator = ?self.address,
                    number = block.number(),
                    block_hash = ?block.hash(),
                    transactions = block.transactions.len(),
                    "Block finalized"
                );
                // No subscribers is fine.
                let _ = self.finalized_tx.send(block);
            }

            Action::Halt { reason } => {
                warn!(validator = ?self.address, reason = %reason, "Consensus halted");
                self.halted = Some(reason);
            }
        }
    }
}

impl std::fmt::Debug for ProductionRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProductionRunner")
            .field("address", &self.address)
            .field("height", &self.state.height())
            .field("round", &self.state.round())
            .field("timers", &self.timers)
            .finish()
    }
}

/// Time since the Unix epoch. Block timestamps are taken from this clock.
fn wall_clock() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
}
