//! Validator set and membership deltas.

use crate::{Address, PublicKey};
use serde::{Deserialize, Serialize};

/// A single validator entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidatorInfo {
    /// Address derived from the public key.
    pub address: Address,
    /// Key used to verify this validator's votes and seals.
    pub public_key: PublicKey,
    /// Voting power (stake weight).
    pub voting_power: u64,
}

impl ValidatorInfo {
    pub fn new(public_key: PublicKey, voting_power: u64) -> Self {
        Self {
            address: public_key.address(),
            public_key,
            voting_power,
        }
    }
}

/// Ordered, deduplicated set of active validators.
///
/// Order is significant: it drives proposer rotation and the order in which
/// committed seals are written into a header.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidatorSet {
    validators: Vec<ValidatorInfo>,
    total_power: u64,
}

impl ValidatorSet {
    /// Build a set, keeping the first occurrence of any duplicated address.
    pub fn new(validators: Vec<ValidatorInfo>) -> Self {
        let mut set = Self::default();
        for v in validators {
            set.insert(v);
        }
        set
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValidatorInfo> {
        self.validators.iter()
    }

    pub fn validators(&self) -> &[ValidatorInfo] {
        &self.validators
    }

    pub fn total_voting_power(&self) -> u64 {
        self.total_power
    }

    pub fn get(&self, address: &Address) -> Option<&ValidatorInfo> {
        self.validators.iter().find(|v| v.address == *address)
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.get(address).is_some()
    }

    pub fn index_of(&self, address: &Address) -> Option<usize> {
        self.validators.iter().position(|v| v.address == *address)
    }

    /// Voting power of `address`, zero for non-members.
    pub fn voting_power(&self, address: &Address) -> u64 {
        self.get(address).map(|v| v.voting_power).unwrap_or(0)
    }

    /// Append a validator. Returns false if the address is already present.
    pub fn insert(&mut self, info: ValidatorInfo) -> bool {
        if self.contains(&info.address) {
            return false;
        }
        self.total_power = self.total_power.saturating_add(info.voting_power);
        self.validators.push(info);
        true
    }

    /// Remove a validator, preserving the order of the rest.
    pub fn remove(&mut self, address: &Address) -> Option<ValidatorInfo> {
        let idx = self.index_of(address)?;
        let removed = self.validators.remove(idx);
        self.total_power -= removed.voting_power;
        Some(removed)
    }

    /// Round-robin proposer for `(height, round)`.
    pub fn proposer_for(&self, height: u64, round: u64) -> Option<&ValidatorInfo> {
        if self.validators.is_empty() {
            return None;
        }
        let index = (height.wrapping_add(round) % self.validators.len() as u64) as usize;
        self.validators.get(index)
    }

    /// Whether `power` is strictly more than 2/3 of the total.
    pub fn has_quorum(&self, power: u64) -> bool {
        (power as u128) * 3 > (self.total_power as u128) * 2
    }

    /// Whether `power` is strictly more than 1/3 of the total, so at least one
    /// honest validator is included.
    pub fn has_weak_quorum(&self, power: u64) -> bool {
        (power as u128) * 3 > self.total_power as u128
    }

    /// Minimum power satisfying [`Self::has_quorum`].
    pub fn quorum_threshold(&self) -> u64 {
        (self.total_power * 2 / 3) + 1
    }
}

/// Membership change carried by a header: validators joining and leaving.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidatorSetDelta {
    pub added: Vec<ValidatorInfo>,
    pub removed: Vec<Address>,
}

impl ValidatorSetDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    /// Fold another delta into this one.
    ///
    /// A removal cancels a pending addition of the same address and vice
    /// versa, so the merged delta stays applicable to the original set.
    pub fn merge(&mut self, other: ValidatorSetDelta) {
        for addr in other.removed {
            if let Some(pos) = self.added.iter().position(|v| v.address == addr) {
                self.added.remove(pos);
            } else if !self.removed.contains(&addr) {
                self.removed.push(addr);
            }
        }
        for info in other.added {
            if let Some(pos) = self.removed.iter().position(|a| *a == info.address) {
                self.removed.remove(pos);
            } else if !self.added.iter().any(|v| v.address == info.address) {
                self.added.push(info);
            }
        }
    }

    /// Remove the entries of `applied` from this delta.
    pub fn subtract(&mut self, applied: &ValidatorSetDelta) {
        self.added
            .retain(|v| !applied.added.iter().any(|a| a.address == v.address));
        self.removed.retain(|r| !applied.removed.contains(r));
    }
}
