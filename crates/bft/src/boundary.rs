//! Period and epoch boundary evaluation.
//!
//! A period (sprint) ends at every block number divisible by the period size.
//! An epoch ends at a block that changes validator membership, or whose
//! successor carries a different epoch number. Epoch ends are a subset of
//! period ends.

use crate::accessor::{AccessorError, ChainAccessor};
use favo_types::{BlockNumber, Extra};

/// Whether `block_number` closes a period of `period_size` blocks.
///
/// `period_size` must be at least 1; configuration validation rejects zero.
pub fn is_end_of_period(block_number: BlockNumber, period_size: u64) -> bool {
    debug_assert!(period_size >= 1, "period_size must be validated by config");
    block_number.checked_rem(period_size) == Some(0)
}

/// Whether `block_number` (with decoded `extra`) closes its epoch.
///
/// Returns `Err(NoBlock)` when the answer depends on a successor that does
/// not exist yet. Every other error is returned unchanged; none of them
/// means "not an epoch end".
pub fn is_epoch_ending_block(
    block_number: BlockNumber,
    extra: &Extra,
    accessor: &ChainAccessor,
) -> Result<bool, AccessorError> {
    if !extra.validators.is_empty() {
        return Ok(true);
    }
    // No successor can exist past the last representable number.
    let successor = block_number
        .checked_add(1)
        .ok_or(AccessorError::NoBlock(block_number))?;
    let (_, next) = accessor.get_block_data(successor)?;
    Ok(next.checkpoint.epoch_number != extra.checkpoint.epoch_number)
}

/// Decide whether a stored block closes its epoch, resolving the chain-tip case.
///
/// Genesis never closes an epoch. When the successor does not exist yet, the
/// block closes the epoch iff it ends a scheduled epoch of `epoch_size`
/// blocks; the proposer of the successor applies the same rule, so both
/// answers agree once the successor is stored.
pub fn resolve_epoch_end(
    block_number: BlockNumber,
    extra: &Extra,
    accessor: &ChainAccessor,
    epoch_size: u64,
) -> Result<bool, AccessorError> {
    if block_number == 0 {
        return Ok(false);
    }
    match is_epoch_ending_block(block_number, extra, accessor) {
        Err(AccessorError::NoBlock(_)) => Ok(is_end_of_period(block_number, epoch_size)),
        other => other,
    }
}
