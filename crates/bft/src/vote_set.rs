//! Vote and round-change collection for a single height.

use favo_types::{
    Address, CommittedSeal, Hash, LockedBlock, Round, RoundChange, ValidatorSet, Vote, VoteKind,
};
use std::collections::{BTreeMap, BTreeSet};

/// Result of adding a vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    Added,
    /// Same voter, same step, same block: already counted.
    Duplicate,
    /// Same voter, same step, different block. The first vote stands.
    Equivocation { existing: Hash },
}

/// Prepare and commit votes, keyed by `(round, kind)` then voter.
#[derive(Debug, Default, Clone)]
pub struct VoteSet {
    votes: BTreeMap<(Round, VoteKind), BTreeMap<Address, Vote>>,
}

impl VoteSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, vote: Vote) -> VoteOutcome {
        let by_voter = self.votes.entry((vote.round, vote.kind)).or_default();
        match by_voter.get(&vote.voter) {
            Some(existing) if existing.block_hash == vote.block_hash => VoteOutcome::Duplicate,
            Some(existing) => VoteOutcome::Equivocation {
                existing: existing.block_hash,
            },
            None => {
                by_voter.insert(vote.voter, vote);
                VoteOutcome::Added
            }
        }
    }

    /// Voting power behind `hash` for `(round, kind)`.
    pub fn power_for(&self, round: Round, kind: VoteKind, hash: &Hash, set: &ValidatorSet) -> u64 {
        self.votes
            .get(&(round, kind))
            .map(|by_voter| {
                by_voter
                    .values()
                    .filter(|v| v.block_hash == *hash)
                    .map(|v| set.voting_power(&v.voter))
                    .sum()
            })
            .unwrap_or(0)
    }

    /// The block hash with a quorum for `(round, kind)`, if any.
    ///
    /// At most one hash can reach quorum since each voter counts once.
    pub fn quorum_for(&self, round: Round, kind: VoteKind, set: &ValidatorSet) -> Option<Hash> {
        let by_voter = self.votes.get(&(round, kind))?;
        let hashes: BTreeSet<Hash> = by_voter.values().map(|v| v.block_hash).collect();
        hashes
            .into_iter()
            .find(|h| set.has_quorum(self.power_for(round, kind, h, set)))
    }

    /// Commit signatures for `hash` at `round`, in validator-set order.
    pub fn commit_seals(&self, round: Round, hash: &Hash, set: &ValidatorSet) -> Vec<CommittedSeal> {
        let Some(by_voter) = self.votes.get(&(round, VoteKind::Commit)) else {
            return Vec::new();
        };
        set.iter()
            .filter_map(|validator| by_voter.get(&validator.address))
            .filter(|vote| vote.block_hash == *hash)
            .map(|vote| CommittedSeal {
                signer: vote.voter,
                signature: vote.signature,
            })
            .collect()
    }

    /// Drop every vote for rounds before `round`.
    pub fn prune_below(&mut self, round: Round) {
        self.votes.retain(|(r, _), _| *r >= round);
    }

    /// Total number of votes held.
    pub fn len(&self) -> usize {
        self.votes.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Round-change votes, keyed by target round then voter.
#[derive(Debug, Default, Clone)]
pub struct RoundChangeSet {
    by_round: BTreeMap<Round, BTreeMap<Address, RoundChange>>,
}

impl RoundChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if this voter already asked for this round.
    pub fn add(&mut self, rc: RoundChange) -> bool {
        let by_voter = self.by_round.entry(rc.round).or_default();
        if by_voter.contains_key(&rc.voter) {
            return false;
        }
        by_voter.insert(rc.voter, rc);
        true
    }

    pub fn power_for(&self, round: Round, set: &ValidatorSet) -> u64 {
        self.by_round
            .get(&round)
            .map(|by_voter| by_voter.keys().map(|a| set.voting_power(a)).sum())
            .unwrap_or(0)
    }

    /// Highest round above `current` with a round-change quorum.
    pub fn quorum_round_above(&self, current: Round, set: &ValidatorSet) -> Option<Round> {
        self.by_round
            .range(current + 1..)
            .rev()
            .map(|(round, _)| *round)
            .find(|round| set.has_quorum(self.power_for(*round, set)))
    }

    /// Smallest round worth joining when validators holding more than 1/3 of
    /// the power have asked for rounds above `current`.
    ///
    /// Each voter counts once, at the highest round it asked for.
    pub fn catch_up_round(&self, current: Round, set: &ValidatorSet) -> Option<Round> {
        let mut highest: BTreeMap<Address, Round> = BTreeMap::new();
        for (round, by_voter) in self.by_round.range(current + 1..) {
            for voter in by_voter.keys() {
                highest.insert(*voter, *round);
            }
        }
        let power: u64 = highest.keys().map(|a| set.voting_power(a)).sum();
        if !set.has_weak_quorum(power) {
            return None;
        }
        highest.values().min().copied()
    }

    /// The highest-round lock reported by round changes for `round`.
    pub fn best_lock(&self, round: Round) -> Option<&LockedBlock> {
        self.by_round
            .get(&round)?
            .values()
            .filter_map(|rc| rc.locked.as_ref())
            .max_by_key(|lock| lock.round)
    }

    pub fn prune_below(&mut self, round: Round) {
        self.by_round.retain(|r, _| *r >= round);
    }
}
