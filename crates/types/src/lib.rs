//! Core types for favobft consensus.
//!
//! This crate provides the foundational types used throughout the consensus
//! implementation:
//!
//! - **Primitives**: Hash, Ed25519 keys and signatures, addresses
//! - **Validators**: ValidatorInfo, ValidatorSet, ValidatorSetDelta
//! - **Chain data**: Header, Block, the consensus [`Extra`] payload and its codec
//! - **Messages**: signed proposals, votes and round changes
//!
//! # Design Philosophy
//!
//! This crate is self-contained with minimal dependencies. It does not depend on
//! any other workspace crates, making it the foundation layer.

mod block;
mod crypto;
mod extra;
mod hash;
mod identifiers;
mod message;
mod signing;
mod validator;

pub use block::{receipts_root, transactions_root, Block, Header, Receipt, Transaction};
pub use crypto::{CryptoError, KeyPair, PublicKey, Signature};
pub use extra::{
    Checkpoint, CommittedSeal, Extra, ExtraError, EXTRA_VERSION, FIXED_REGION_LEN, VANITY_LEN,
};
pub use hash::{Hash, HexError};
pub use identifiers::{Address, BlockNumber, EpochNumber, Round};
pub use message::{LockedBlock, Proposal, RoundChange, Vote};
pub use signing::{
    proposal_message, round_change_message, vote_message, VoteKind, DOMAIN_COMMIT,
    DOMAIN_PREPARE, DOMAIN_PROPOSAL, DOMAIN_ROUND_CHANGE,
};
pub use validator::{ValidatorInfo, ValidatorSet, ValidatorSetDelta};

/// Test utilities.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils {
    use super::*;

    /// Deterministic keypair from a seed byte.
    pub fn test_keypair(seed: u8) -> KeyPair {
        let mut bytes = [0u8; 32];
        bytes[0] = seed;
        bytes[31] = 0x5a;
        KeyPair::from_seed(&bytes)
    }

    /// Validator entry for [`test_keypair`]`(seed)`.
    pub fn test_validator(seed: u8, voting_power: u64) -> ValidatorInfo {
        ValidatorInfo::new(test_keypair(seed).public_key(), voting_power)
    }

    /// Keypairs and an equal-power validator set of size `n` (seeds 1..=n).
    pub fn test_validator_set(n: u8) -> (Vec<KeyPair>, ValidatorSet) {
        let keys: Vec<KeyPair> = (1..=n).map(test_keypair).collect();
        let set = ValidatorSet::new(
            keys.iter()
                .map(|k| ValidatorInfo::new(k.public_key(), 1))
                .collect(),
        );
        (keys, set)
    }

    /// Unsealed empty block at `number` in epoch 0.
    pub fn test_block(number: BlockNumber) -> Block {
        let extra = Extra::new(ValidatorSetDelta::default(), Checkpoint::default());
        Block {
            header: Header::new(
                number,
                Hash::from_bytes(&number.to_be_bytes()),
                Address::default(),
                Hash::ZERO,
                transactions_root(&[]),
                number * 1_000,
                &extra,
            ),
            transactions: Vec::new(),
        }
    }
}
