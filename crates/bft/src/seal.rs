//! Committed-seal verification.

use favo_types::{vote_message, Address, Extra, Header, ValidatorSet, VoteKind};
use std::collections::HashSet;
use thiserror::Error;

/// A finalized header whose seals do not prove a commit quorum.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SealError {
    #[error("seal from non-member {0}")]
    NotMember(Address),

    #[error("duplicate seal from {0}")]
    Duplicate(Address),

    #[error("invalid seal signature from {0}")]
    InvalidSignature(Address),

    #[error("sealing power {power} of {total} is not a quorum")]
    InsufficientPower { power: u64, total: u64 },
}

/// Check that `extra` (decoded from `header`) carries commit seals from a
/// quorum of `set` over `(number, round, hash)`.
pub fn verify_committed_seals(
    header: &Header,
    extra: &Extra,
    set: &ValidatorSet,
) -> Result<(), SealError> {
    let message = vote_message(VoteKind::Commit, header.number, extra.round, &header.hash);
    let mut seen = HashSet::with_capacity(extra.committed_seals.len());
    let mut power = 0u64;

    for seal in &extra.committed_seals {
        let validator = set
            .get(&seal.signer)
            .ok_or(SealError::NotMember(seal.signer))?;
        if !seen.insert(seal.signer) {
            return Err(SealError::Duplicate(seal.signer));
        }
        validator
            .public_key
            .verify(&message, &seal.signature)
            .map_err(|_| SealError::InvalidSignature(seal.signer))?;
        power += validator.voting_power;
    }

    if !set.has_quorum(power) {
        return Err(SealError::InsufficientPower {
            power,
            total: set.total_voting_power(),
        });
    }
    Ok(())
}
