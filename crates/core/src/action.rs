//! Action types for the deterministic state machine.

use crate::{ConsensusMessage, TimerId};
use favo_types::{Block, BlockNumber, Hash, PublicKey, Round};
use std::time::Duration;

/// Actions the state machine wants to perform.
///
/// Actions are **commands** - they describe something to do.
/// The runner executes actions and may convert results back into events.
#[derive(Debug, Clone)]
pub enum Action {
    // ═══════════════════════════════════════════════════════════════════════
    // Network
    // ═══════════════════════════════════════════════════════════════════════
    /// Broadcast a message to every other validator.
    ///
    /// The sender handles its own copy directly; runners do not loop it back.
    Broadcast { message: ConsensusMessage },

    // ═══════════════════════════════════════════════════════════════════════
    // Timers
    // ═══════════════════════════════════════════════════════════════════════
    /// Set a timer to fire after a duration. Replaces any timer with the same id.
    SetTimer { id: TimerId, duration: Duration },

    /// Cancel a previously set timer.
    CancelTimer { id: TimerId },

    // ═══════════════════════════════════════════════════════════════════════
    // Delegated Work (async, returns callback event)
    // ═══════════════════════════════════════════════════════════════════════
    /// Verify a message signature.
    ///
    /// Delegated to a blocking pool in production, instant in simulation.
    /// Returns `Event::MessageVerified` when complete.
    VerifyMessage {
        /// The message to verify.
        message: ConsensusMessage,
        /// Public key of the sender (pre-resolved by the state machine).
        public_key: PublicKey,
        /// The bytes the signature must cover.
        signing_message: Vec<u8>,
    },

    /// Select transactions and apply them on top of the parent state.
    ///
    /// Returns `Event::TransactionsApplied` when complete. Never retried.
    ApplyTransactions {
        height: BlockNumber,
        round: Round,
        parent_state_root: Hash,
        max_transactions: usize,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Storage
    // ═══════════════════════════════════════════════════════════════════════
    /// Append a finalized, sealed block to the chain.
    PersistBlock { block: Block },

    // ═══════════════════════════════════════════════════════════════════════
    // Notifications
    // ═══════════════════════════════════════════════════════════════════════
    /// Emit a finalized block for external observers.
    EmitFinalizedBlock { block: Block },

    /// Consensus participation stopped. Emitted once; the node ignores
    /// every event afterwards.
    Halt { reason: String },
}

impl Action {
    /// Check if this action is delegated work (returns a callback event).
    pub fn is_delegated(&self) -> bool {
        matches!(
            self,
            Action::VerifyMessage { .. } | Action::ApplyTransactions { .. }
        )
    }

    /// Check if this is a storage write action.
    pub fn is_storage_write(&self) -> bool {
        matches!(self, Action::PersistBlock { .. })
    }

    /// Get the action type name for telemetry.
    pub fn type_name(&self) -> &'static str {
        match self {
            Action::Broadcast { .. } => "Broadcast",
            Action::SetTimer { .. } => "SetTimer",
            Action::CancelTimer { .. } => "CancelTimer",
            Action::VerifyMessage { .. } => "VerifyMessage",
            Action::ApplyTransactions { .. } => "ApplyTransactions",
            Action::PersistBlock { .. } => "PersistBlock",
            Action::EmitFinalizedBlock { .. } => "EmitFinalizedBlock",
            Action::Halt { .. } => "Halt",
        }
    }
}
