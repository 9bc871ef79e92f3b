//! favobft consensus state machine.
//!
//! This crate provides a synchronous IBFT-family consensus implementation
//! that can be used for both simulation and production.
//!
//! # Architecture
//!
//! The state machine processes events synchronously:
//!
//! - `Event::ProposalTimer` → Re-propose a lock or request block contents
//! - `Event::TransactionsApplied` → Assemble, sign and broadcast the block
//! - `Event::MessageReceived` → Screen the sender, delegate signature checks
//! - `Event::MessageVerified` → Count the proposal, vote or round change
//! - `Event::RoundTimeout` → Ask peers to move to the next round
//!
//! All I/O is performed by the runner via returned `Action`s.
//!
//! # Terminology
//!
//! - **Height**: Number of the block being decided. Strictly sequential.
//!
//! - **Round**: Attempt number within a height. Each round has one proposer,
//!   chosen by rotating through the validator set.
//!
//! - **Period**: Fixed run of `period_size` blocks. Membership changes are
//!   only carried by the last block of a period.
//!
//! - **Epoch**: Run of blocks sharing one validator set. An epoch ends at a
//!   block that changes membership, or at a scheduled boundary.
//!
//! - **Committed seals**: Commit-vote signatures from a quorum, stored in the
//!   finalized block's extra data.
//!
//! # Safety and liveness
//!
//! - **Quorum**: Strictly more than 2/3 of total voting power. Two quorums
//!   always share an honest validator.
//!
//! - **Locking**: A validator that saw a prepare quorum for block B locks on B
//!   and will neither prepare nor propose anything else at that height.
//!
//! - **Round change**: A validator whose round timer fires asks for the next
//!   round. A quorum of requests moves everyone; a weak quorum (more than
//!   1/3) pulls lagging validators along. Timeouts grow exponentially with
//!   the round, up to a cap.

mod accessor;
mod boundary;
mod config;
mod round;
mod seal;
mod state;
mod storage;
mod validation;
mod validators;
mod vote_set;

pub use accessor::{AccessorError, ChainAccessor, Clock, SystemClock};

#[cfg(any(test, feature = "test-utils"))]
pub use accessor::ManualClock;
pub use boundary::{is_end_of_period, is_epoch_ending_block, resolve_epoch_end};
pub use config::{BftConfig, ConfigError, RetryPolicy, MAX_BACKOFF_EXPONENT, MAX_ROUND_LOOKAHEAD};
pub use round::{RoundState, Step};
pub use seal::{verify_committed_seals, SealError};
pub use state::{BftError, BftState, BftStats};
pub use storage::{BlockchainBackend, ChainStore, MemoryChainStore, StoreError};
pub use validation::{validate_block, BlockContext, ProposalError};
pub use validators::{
    InMemorySnapshotStore, RestoreError, SnapshotStore, ValidatorSetError, ValidatorSetManager,
    ValidatorSnapshot,
};
pub use vote_set::{RoundChangeSet, VoteOutcome, VoteSet};
