//! Event types for the deterministic state machine.

use crate::ConsensusMessage;
use favo_types::{BlockNumber, Hash, Receipt, Round, Transaction, ValidatorSetDelta};

/// Priority levels for event ordering within the same timestamp.
///
/// Events at the same simulation time are processed in priority order.
/// Lower values = higher priority (processed first).
///
/// This ensures causality is preserved: internal events (consequences of
/// processing an event) are handled before new external inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum EventPriority {
    /// Internal events: consequences of prior event processing.
    /// Processed first to maintain causality.
    Internal = 0,

    /// Timer events: scheduled by the node itself.
    Timer = 1,

    /// Network events: external inputs from other nodes.
    Network = 2,

    /// Client events: external inputs from operators.
    Client = 3,
}

/// Output of the state-execution collaborator for a proposed block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedTransactions {
    /// Transactions selected and applied, in block order.
    pub transactions: Vec<Transaction>,
    /// State root after applying them on top of the parent.
    pub state_root: Hash,
    pub receipts: Vec<Receipt>,
}

/// All possible events a node can receive.
///
/// Events are **passive data** - they describe something that happened.
/// The state machine processes events and returns actions.
#[derive(Debug, Clone)]
pub enum Event {
    // ═══════════════════════════════════════════════════════════════════════
    // Timers (priority: Timer)
    // ═══════════════════════════════════════════════════════════════════════
    /// Block interval elapsed; the proposer for the current round builds its block.
    ProposalTimer,

    /// The current round did not finalize in time.
    RoundTimeout,

    // ═══════════════════════════════════════════════════════════════════════
    // Network Messages (priority: Network)
    // ═══════════════════════════════════════════════════════════════════════
    /// Received a consensus message from a peer. Not yet verified.
    MessageReceived { message: ConsensusMessage },

    // ═══════════════════════════════════════════════════════════════════════
    // Async Callbacks (priority: Internal)
    // Results from delegated work (crypto, execution)
    // ═══════════════════════════════════════════════════════════════════════
    /// Signature verification completed.
    ///
    /// Callback from `Action::VerifyMessage`.
    MessageVerified {
        /// The message that was verified.
        message: ConsensusMessage,
        /// Whether the signature is valid.
        valid: bool,
    },

    /// State execution for a proposal completed.
    ///
    /// Callback from `Action::ApplyTransactions`.
    TransactionsApplied {
        height: BlockNumber,
        round: Round,
        result: Result<AppliedTransactions, String>,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Operator Requests (priority: Client)
    // ═══════════════════════════════════════════════════════════════════════
    /// Queue a membership change for the next period boundary.
    ValidatorSetChangeRequested { delta: ValidatorSetDelta },
}

impl Event {
    /// Get the priority for this event type.
    pub fn priority(&self) -> EventPriority {
        match self {
            Event::MessageVerified { .. } | Event::TransactionsApplied { .. } => {
                EventPriority::Internal
            }
            Event::ProposalTimer | Event::RoundTimeout => EventPriority::Timer,
            Event::MessageReceived { .. } => EventPriority::Network,
            Event::ValidatorSetChangeRequested { .. } => EventPriority::Client,
        }
    }

    /// Check if this is an internal event (consequence of prior processing).
    pub fn is_internal(&self) -> bool {
        self.priority() == EventPriority::Internal
    }

    /// Check if this is a network event (from another node).
    pub fn is_network(&self) -> bool {
        self.priority() == EventPriority::Network
    }

    /// Get the event type name for telemetry.
    pub fn type_name(&self) -> &'static str {
        match self {
            Event::ProposalTimer => "ProposalTimer",
            Event::RoundTimeout => "RoundTimeout",
            Event::MessageReceived { .. } => "MessageReceived",
            Event::MessageVerified { .. } => "MessageVerified",
            Event::TransactionsApplied { .. } => "TransactionsApplied",
            Event::ValidatorSetChangeRequested { .. } => "ValidatorSetChangeRequested",
        }
    }
}
