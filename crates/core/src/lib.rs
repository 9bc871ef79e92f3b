//! Core types for favobft consensus.
//!
//! This crate provides the foundational types for the consensus architecture:
//!
//! - [`Event`]: All possible inputs to the state machine
//! - [`Action`]: All possible outputs from the state machine
//! - [`EventPriority`]: Ordering priority for events at the same timestamp
//! - [`StateMachine`]: The trait that all state machines implement
//!
//! # Architecture
//!
//! The core is built on a simple event-driven model:
//!
//! ```text
//! Events → StateMachine::handle() → Actions
//! ```
//!
//! The state machine is:
//! - **Synchronous**: No async, no .await
//! - **Deterministic**: Same state + event = same actions
//! - **Pure-ish**: Mutates self, but performs no network or timer I/O
//!
//! All I/O is handled by the runner (simulation or production) which:
//! 1. Delivers events to the state machine
//! 2. Executes the returned actions
//! 3. Converts action results back into events

mod action;
mod event;
mod message;
mod traits;

pub use action::Action;
pub use event::{AppliedTransactions, Event, EventPriority};
pub use message::ConsensusMessage;
pub use traits::StateMachine;

/// Timer identification. Setting a timer replaces the pending one with the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerId {
    /// Block interval before the proposer builds its block.
    Proposal,
    /// Round timeout; expiry triggers a round change.
    Round,
}

impl TimerId {
    /// The event delivered when this timer fires.
    pub fn event(self) -> Event {
        match self {
            TimerId::Proposal => Event::ProposalTimer,
            TimerId::Round => Event::RoundTimeout,
        }
    }
}
