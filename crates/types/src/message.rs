//! Signed consensus messages exchanged between validators.

use crate::signing::{proposal_message, round_change_message, vote_message, VoteKind};
use crate::{Address, Block, BlockNumber, Hash, KeyPair, Round, Signature};

/// A block proposed for `(height, round)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    pub height: BlockNumber,
    pub round: Round,
    pub block: Block,
    /// Validator that sent the proposal; must be the scheduled proposer.
    pub proposer: Address,
    pub signature: Signature,
}

impl Proposal {
    pub fn new(round: Round, block: Block, signing_key: &KeyPair) -> Self {
        let height = block.number();
        let signature = signing_key.sign(&proposal_message(height, round, &block.hash()));
        Self {
            height,
            round,
            block,
            proposer: signing_key.address(),
            signature,
        }
    }

    pub fn signing_message(&self) -> Vec<u8> {
        proposal_message(self.height, self.round, &self.block.hash())
    }
}

/// A prepare or commit vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vote {
    pub kind: VoteKind,
    pub height: BlockNumber,
    pub round: Round,
    pub block_hash: Hash,
    pub voter: Address,
    pub signature: Signature,
}

impl Vote {
    pub fn new(
        kind: VoteKind,
        height: BlockNumber,
        round: Round,
        block_hash: Hash,
        signing_key: &KeyPair,
    ) -> Self {
        let signature = signing_key.sign(&vote_message(kind, height, round, &block_hash));
        Self {
            kind,
            height,
            round,
            block_hash,
            voter: signing_key.address(),
            signature,
        }
    }

    pub fn signing_message(&self) -> Vec<u8> {
        vote_message(self.kind, self.height, self.round, &self.block_hash)
    }
}

/// The block a validator is locked on, and the round it locked in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockedBlock {
    pub round: Round,
    pub block: Block,
}

/// Request to move the height to `round`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundChange {
    pub height: BlockNumber,
    pub round: Round,
    pub voter: Address,
    /// The sender's lock, so the next proposer can re-propose it.
    pub locked: Option<LockedBlock>,
    pub signature: Signature,
}

impl RoundChange {
    pub fn new(
        height: BlockNumber,
        round: Round,
        locked: Option<LockedBlock>,
        signing_key: &KeyPair,
    ) -> Self {
        let lock_ref = locked.as_ref().map(|l| (l.round, l.block.hash()));
        let signature = signing_key.sign(&round_change_message(height, round, lock_ref));
        Self {
            height,
            round,
            voter: signing_key.address(),
            locked,
            signature,
        }
    }

    pub fn signing_message(&self) -> Vec<u8> {
        let lock_ref = self.locked.as_ref().map(|l| (l.round, l.block.hash()));
        round_change_message(self.height, self.round, lock_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{test_block, test_keypair};

    #[test]
    fn test_vote_signature_verifies() {
        let kp = test_keypair(1);
        let vote = Vote::new(VoteKind::Commit, 4, 2, Hash::from_bytes(b"b"), &kp);
        assert_eq!(vote.voter, kp.address());
        assert!(kp
            .public_key()
            .verify(&vote.signing_message(), &vote.signature)
            .is_ok());
    }

    #[test]
    fn test_proposal_takes_height_from_block() {
        let kp = test_keypair(2);
        let proposal = Proposal::new(1, test_block(7), &kp);
        assert_eq!(proposal.height, 7);
        assert!(kp
            .public_key()
            .verify(&proposal.signing_message(), &proposal.signature)
            .is_ok());
    }

    #[test]
    fn test_round_change_lock_is_signed() {
        let kp = test_keypair(3);
        let mut rc = RoundChange::new(
            3,
            2,
            Some(LockedBlock {
                round: 1,
                block: test_block(3),
            }),
            &kp,
        );
        let pk = kp.public_key();
        assert!(pk.verify(&rc.signing_message(), &rc.signature).is_ok());
        // Stripping the lock invalidates the signature.
        rc.locked = None;
        assert!(pk.verify(&rc.signing_message(), &rc.signature).is_err());
    }
}
