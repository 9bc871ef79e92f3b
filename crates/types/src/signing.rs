//! Domain-separated signing messages.
//!
//! Every signature in the protocol covers a tag plus the fields that pin it to
//! a single step, so a signature produced for one message type can never be
//! replayed as another.

use crate::{BlockNumber, Hash, Round};

pub const DOMAIN_PROPOSAL: &[u8] = b"favobft:proposal";
pub const DOMAIN_PREPARE: &[u8] = b"favobft:prepare";
pub const DOMAIN_COMMIT: &[u8] = b"favobft:commit";
pub const DOMAIN_ROUND_CHANGE: &[u8] = b"favobft:round_change";

/// Which phase a vote belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VoteKind {
    Prepare,
    Commit,
}

impl VoteKind {
    pub fn domain(self) -> &'static [u8] {
        match self {
            VoteKind::Prepare => DOMAIN_PREPARE,
            VoteKind::Commit => DOMAIN_COMMIT,
        }
    }
}

fn step_message(domain: &[u8], height: BlockNumber, round: Round, block_hash: &Hash) -> Vec<u8> {
    let mut msg = Vec::with_capacity(domain.len() + 8 + 8 + 32);
    msg.extend_from_slice(domain);
    msg.extend_from_slice(&height.to_be_bytes());
    msg.extend_from_slice(&round.to_be_bytes());
    msg.extend_from_slice(block_hash.as_bytes());
    msg
}

/// Message signed by the proposer of `(height, round)`.
pub fn proposal_message(height: BlockNumber, round: Round, block_hash: &Hash) -> Vec<u8> {
    step_message(DOMAIN_PROPOSAL, height, round, block_hash)
}

/// Message signed by a prepare or commit vote. The commit form is also the
/// committed seal written into the finalized header.
pub fn vote_message(
    kind: VoteKind,
    height: BlockNumber,
    round: Round,
    block_hash: &Hash,
) -> Vec<u8> {
    step_message(kind.domain(), height, round, block_hash)
}

/// Message signed by a round-change vote. Binds the sender's lock, if any.
pub fn round_change_message(
    height: BlockNumber,
    round: Round,
    locked: Option<(Round, Hash)>,
) -> Vec<u8> {
    let mut msg = Vec::with_capacity(DOMAIN_ROUND_CHANGE.len() + 8 + 8 + 1 + 8 + 32);
    msg.extend_from_slice(DOMAIN_ROUND_CHANGE);
    msg.extend_from_slice(&height.to_be_bytes());
    msg.extend_from_slice(&round.to_be_bytes());
    match locked {
        Some((locked_round, hash)) => {
            msg.push(1);
            msg.extend_from_slice(&locked_round.to_be_bytes());
            msg.extend_from_slice(hash.as_bytes());
        }
        None => msg.push(0),
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domains_separate_messages() {
        let h = Hash::from_bytes(b"block");
        let prepare = vote_message(VoteKind::Prepare, 1, 0, &h);
        let commit = vote_message(VoteKind::Commit, 1, 0, &h);
        let proposal = proposal_message(1, 0, &h);
        assert_ne!(prepare, commit);
        assert_ne!(prepare, proposal);
    }

    #[test]
    fn test_round_change_binds_lock() {
        let h = Hash::from_bytes(b"block");
        assert_ne!(
            round_change_message(3, 1, None),
            round_change_message(3, 1, Some((0, h)))
        );
    }
}
