//! Per-height round state.

use crate::vote_set::{RoundChangeSet, VoteSet};
use favo_types::{BlockNumber, LockedBlock, Proposal, Round, ValidatorSetDelta};
use std::collections::BTreeMap;

/// Where the current height is in the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    /// Height entered, round not started yet.
    NewHeight,
    /// Waiting for (or building) the round's proposal.
    Propose,
    /// Proposal accepted, collecting prepare votes.
    Prepare,
    /// Prepare quorum seen and locked, collecting commit votes.
    Commit,
    /// Commit quorum seen; the block has been handed off.
    Finalized,
    /// Round timed out; asking peers to move to a higher round.
    RoundChange,
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Step::NewHeight => "NEW_HEIGHT",
            Step::Propose => "PROPOSE",
            Step::Prepare => "PREPARE",
            Step::Commit => "COMMIT",
            Step::Finalized => "FINALIZED",
            Step::RoundChange => "ROUND_CHANGE",
        };
        f.write_str(name)
    }
}

/// Transient state for one height. Discarded when the height finalizes.
#[derive(Debug, Clone)]
pub struct RoundState {
    pub height: BlockNumber,
    pub round: Round,
    pub step: Step,

    /// Proposal accepted for the current round.
    pub proposal: Option<Proposal>,

    /// Block this node prepared a quorum for. Survives round changes.
    pub locked: Option<LockedBlock>,

    pub votes: VoteSet,
    pub round_changes: RoundChangeSet,

    /// Verified proposals for rounds not reached yet.
    pub future_proposals: BTreeMap<Round, Proposal>,

    /// Highest round this node has sent a round change for.
    pub requested_round: Option<Round>,

    /// Round whose state execution is outstanding.
    pub awaiting_execution: Option<Round>,

    /// Delta a proposal at this height must carry. Fixed when the height starts.
    pub expected_delta: ValidatorSetDelta,

    // Per-round flags, reset by `advance_to`.
    pub proposed: bool,
    pub prepared: bool,
    pub prepare_certified: bool,
}

impl RoundState {
    pub fn new(height: BlockNumber, expected_delta: ValidatorSetDelta) -> Self {
        Self {
            height,
            round: 0,
            step: Step::NewHeight,
            proposal: None,
            locked: None,
            votes: VoteSet::new(),
            round_changes: RoundChangeSet::new(),
            future_proposals: BTreeMap::new(),
            requested_round: None,
            awaiting_execution: None,
            expected_delta,
            proposed: false,
            prepared: false,
            prepare_certified: false,
        }
    }

    /// Enter `round` in the propose step. Anything tied to earlier rounds is
    /// dropped, including an outstanding execution request.
    pub fn advance_to(&mut self, round: Round) {
        self.round = round;
        self.step = Step::Propose;
        self.proposal = None;
        self.awaiting_execution = None;
        self.proposed = false;
        self.prepared = false;
        self.prepare_certified = false;
        self.votes.prune_below(round);
        self.round_changes.prune_below(round);
        self.future_proposals.retain(|r, _| *r >= round);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use favo_types::test_utils::{test_block, test_keypair};

    #[test]
    fn test_advance_keeps_lock_and_clears_round_flags() {
        let mut rs = RoundState::new(5, ValidatorSetDelta::default());
        rs.locked = Some(LockedBlock {
            round: 0,
            block: test_block(5),
        });
        rs.proposal = Some(Proposal::new(0, test_block(5), &test_keypair(1)));
        rs.awaiting_execution = Some(0);
        rs.prepared = true;

        rs.advance_to(2);
        assert_eq!(rs.round, 2);
        assert_eq!(rs.step, Step::Propose);
        assert!(rs.proposal.is_none());
        assert!(rs.awaiting_execution.is_none());
        assert!(!rs.prepared);
        assert!(rs.locked.is_some());
    }

    #[test]
    fn test_step_display() {
        assert_eq!(Step::RoundChange.to_string(), "ROUND_CHANGE");
    }
}
