//! Consensus messages as seen by the runner.

use favo_types::{Address, BlockNumber, Proposal, Round, RoundChange, Signature, Vote};

/// A signed consensus message.
///
/// The runner moves these between nodes without inspecting them; the state
/// machine decides what each one means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsensusMessage {
    /// Block proposal from the scheduled proposer.
    Proposal(Box<Proposal>),

    /// Prepare or commit vote.
    Vote(Vote),

    /// Request to move to a higher round.
    RoundChange(Box<RoundChange>),
}

impl ConsensusMessage {
    pub fn height(&self) -> BlockNumber {
        match self {
            ConsensusMessage::Proposal(p) => p.height,
            ConsensusMessage::Vote(v) => v.height,
            ConsensusMessage::RoundChange(rc) => rc.height,
        }
    }

    pub fn round(&self) -> Round {
        match self {
            ConsensusMessage::Proposal(p) => p.round,
            ConsensusMessage::Vote(v) => v.round,
            ConsensusMessage::RoundChange(rc) => rc.round,
        }
    }

    /// The validator that signed this message.
    pub fn sender(&self) -> Address {
        match self {
            ConsensusMessage::Proposal(p) => p.proposer,
            ConsensusMessage::Vote(v) => v.voter,
            ConsensusMessage::RoundChange(rc) => rc.voter,
        }
    }

    pub fn signature(&self) -> &Signature {
        match self {
            ConsensusMessage::Proposal(p) => &p.signature,
            ConsensusMessage::Vote(v) => &v.signature,
            ConsensusMessage::RoundChange(rc) => &rc.signature,
        }
    }

    /// The bytes the sender's signature covers.
    pub fn signing_message(&self) -> Vec<u8> {
        match self {
            ConsensusMessage::Proposal(p) => p.signing_message(),
            ConsensusMessage::Vote(v) => v.signing_message(),
            ConsensusMessage::RoundChange(rc) => rc.signing_message(),
        }
    }

    /// Get a human-readable name for this message type.
    pub fn type_name(&self) -> &'static str {
        match self {
            ConsensusMessage::Proposal(_) => "Proposal",
            ConsensusMessage::Vote(v) => match v.kind {
                favo_types::VoteKind::Prepare => "Prepare",
                favo_types::VoteKind::Commit => "Commit",
            },
            ConsensusMessage::RoundChange(_) => "RoundChange",
        }
    }
}

impl From<Proposal> for ConsensusMessage {
    fn from(p: Proposal) -> Self {
        ConsensusMessage::Proposal(Box::new(p))
    }
}

impl From<Vote> for ConsensusMessage {
    fn from(v: Vote) -> Self {
        ConsensusMessage::Vote(v)
    }
}

impl From<RoundChange> for ConsensusMessage {
    fn from(rc: RoundChange) -> Self {
        ConsensusMessage::RoundChange(Box::new(rc))
    }
}
