//! Proposed block validation.
//!
//! A proposal is only prepared if its block is a well-formed successor of the
//! local head and agrees with the local view of epochs and pending membership
//! changes. Validation never consults the network or storage; everything it
//! needs is captured in [`BlockContext`].

use crate::boundary::is_end_of_period;
use favo_types::{
    transactions_root, Block, BlockNumber, EpochNumber, ExtraError, Hash, Header, ValidatorSet,
    ValidatorSetDelta,
};
use thiserror::Error;

/// Why a proposed block was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProposalError {
    #[error("block number {got}, expected {expected}")]
    WrongNumber { expected: BlockNumber, got: BlockNumber },

    #[error("parent hash {got:?} does not match head {expected:?}")]
    ParentMismatch { expected: Hash, got: Hash },

    #[error("header hash does not match its contents")]
    HashMismatch,

    #[error("transaction root does not match the body")]
    TxRootMismatch,

    #[error("malformed extra data: {0}")]
    MalformedExtra(#[from] ExtraError),

    #[error("proposed extra data is already sealed")]
    AlreadySealed,

    #[error("header proposer is not a validator")]
    UnknownProposer,

    #[error("timestamp {got} is before parent timestamp {parent}")]
    TimestampRegression { parent: u64, got: u64 },

    #[error("checkpoint epoch {got}, expected {expected}")]
    EpochMismatch {
        expected: EpochNumber,
        got: EpochNumber,
    },

    #[error("checkpoint epoch start does not match the last boundary")]
    EpochStartMismatch,

    #[error("validator delta does not match pending membership changes")]
    DeltaMismatch,

    #[error("validator delta outside a period boundary")]
    UnexpectedDelta,
}

/// Local view a proposed block is checked against.
#[derive(Debug, Clone, Copy)]
pub struct BlockContext<'a> {
    pub head: &'a Header,
    pub validators: &'a ValidatorSet,
    pub epoch: EpochNumber,
    pub epoch_start: (BlockNumber, Hash),
    /// Delta this height must carry (empty off period boundaries).
    pub expected_delta: &'a ValidatorSetDelta,
    pub period_size: u64,
}

/// Check `block` against `ctx`.
pub fn validate_block(block: &Block, ctx: &BlockContext<'_>) -> Result<(), ProposalError> {
    let header = &block.header;
    let expected_number = ctx.head.number + 1;

    if header.number != expected_number {
        return Err(ProposalError::WrongNumber {
            expected: expected_number,
            got: header.number,
        });
    }
    if header.parent_hash != ctx.head.hash {
        return Err(ProposalError::ParentMismatch {
            expected: ctx.head.hash,
            got: header.parent_hash,
        });
    }

    let extra = header.extra()?;
    if header.compute_hash()? != header.hash {
        return Err(ProposalError::HashMismatch);
    }
    if header.tx_root != transactions_root(&block.transactions) {
        return Err(ProposalError::TxRootMismatch);
    }
    if extra.round != 0 || !extra.committed_seals.is_empty() {
        return Err(ProposalError::AlreadySealed);
    }
    if !ctx.validators.contains(&header.proposer) {
        return Err(ProposalError::UnknownProposer);
    }
    if header.timestamp < ctx.head.timestamp {
        return Err(ProposalError::TimestampRegression {
            parent: ctx.head.timestamp,
            got: header.timestamp,
        });
    }

    if extra.checkpoint.epoch_number != ctx.epoch {
        return Err(ProposalError::EpochMismatch {
            expected: ctx.epoch,
            got: extra.checkpoint.epoch_number,
        });
    }
    if (
        extra.checkpoint.epoch_start_number,
        extra.checkpoint.epoch_start_hash,
    ) != ctx.epoch_start
    {
        return Err(ProposalError::EpochStartMismatch);
    }

    if is_end_of_period(header.number, ctx.period_size) {
        if extra.validators != *ctx.expected_delta {
            return Err(ProposalError::DeltaMismatch);
        }
    } else if !extra.validators.is_empty() {
        return Err(ProposalError::UnexpectedDelta);
    }

    Ok(())
}
