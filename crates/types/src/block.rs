//! Block, header, transaction and receipt types.

use crate::{Address, BlockNumber, Extra, ExtraError, Hash};

/// Opaque transaction payload. Execution semantics live outside consensus.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Transaction(pub Vec<u8>);

impl Transaction {
    pub fn hash(&self) -> Hash {
        Hash::from_bytes(&self.0)
    }
}

/// Outcome of executing one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: Hash,
    pub success: bool,
    /// Digest of the events emitted by the transaction.
    pub events_hash: Hash,
}

/// Commitment over an ordered list of receipts.
pub fn receipts_root(receipts: &[Receipt]) -> Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"favobft:receipts");
    for r in receipts {
        hasher.update(r.tx_hash.as_bytes());
        hasher.update(&[r.success as u8]);
        hasher.update(r.events_hash.as_bytes());
    }
    Hash::from_hash_bytes(hasher.finalize().as_bytes())
}

/// Commitment over an ordered list of transactions.
pub fn transactions_root(transactions: &[Transaction]) -> Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"favobft:transactions");
    for tx in transactions {
        hasher.update(tx.hash().as_bytes());
    }
    Hash::from_hash_bytes(hasher.finalize().as_bytes())
}

/// Block header.
///
/// `hash` commits to every other field, with the extra data reduced to its
/// filtered form (see [`Extra::filtered`]). Writing the seals and commit round
/// after agreement therefore leaves the hash unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub number: BlockNumber,
    pub hash: Hash,
    pub parent_hash: Hash,
    pub proposer: Address,
    pub state_root: Hash,
    pub tx_root: Hash,
    /// Milliseconds since the Unix epoch (or simulation start).
    pub timestamp: u64,
    /// Encoded [`Extra`].
    pub extra_data: Vec<u8>,
}

impl Header {
    /// Assemble a header and compute its hash.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        number: BlockNumber,
        parent_hash: Hash,
        proposer: Address,
        state_root: Hash,
        tx_root: Hash,
        timestamp: u64,
        extra: &Extra,
    ) -> Self {
        let mut header = Self {
            number,
            hash: Hash::ZERO,
            parent_hash,
            proposer,
            state_root,
            tx_root,
            timestamp,
            extra_data: extra.encode(),
        };
        header.hash = header.hash_with(&extra.filtered());
        header
    }

    /// Decode this header's extra data.
    pub fn extra(&self) -> Result<Extra, ExtraError> {
        Extra::decode(&self.extra_data)
    }

    /// Recompute the hash from the header's own fields.
    pub fn compute_hash(&self) -> Result<Hash, ExtraError> {
        Ok(self.hash_with(&self.extra()?.filtered()))
    }

    /// Replace the extra data without touching the hash. Only valid for
    /// changes that keep the filtered form, i.e. round and seals.
    pub fn with_sealed_extra(mut self, extra: &Extra) -> Self {
        self.extra_data = extra.encode();
        self
    }

    fn hash_with(&self, filtered: &Extra) -> Hash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"favobft:header");
        hasher.update(&self.number.to_be_bytes());
        hasher.update(self.parent_hash.as_bytes());
        hasher.update(self.proposer.as_bytes());
        hasher.update(self.state_root.as_bytes());
        hasher.update(self.tx_root.as_bytes());
        hasher.update(&self.timestamp.to_be_bytes());
        hasher.update(&filtered.encode());
        Hash::from_hash_bytes(hasher.finalize().as_bytes())
    }
}

/// A header plus its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: Header,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn hash(&self) -> Hash {
        self.header.hash
    }

    pub fn number(&self) -> BlockNumber {
        self.header.number
    }

    /// Genesis block carrying the epoch-0 checkpoint.
    pub fn genesis(timestamp: u64, extra: &Extra) -> Self {
        Self {
            header: Header::new(
                0,
                Hash::ZERO,
                Address::default(),
                Hash::ZERO,
                transactions_root(&[]),
                timestamp,
                extra,
            ),
            transactions: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Checkpoint, CommittedSeal, Signature};

    fn header() -> Header {
        let extra = Extra::new(
            Default::default(),
            Checkpoint {
                epoch_number: 1,
                ..Default::default()
            },
        );
        Header::new(
            5,
            Hash::from_bytes(b"parent"),
            Address([1u8; 20]),
            Hash::from_bytes(b"state"),
            transactions_root(&[]),
            1_000,
            &extra,
        )
    }

    #[test]
    fn test_hash_matches_recomputation() {
        let h = header();
        assert_eq!(h.compute_hash().unwrap(), h.hash);
    }

    #[test]
    fn test_sealing_keeps_hash() {
        let h = header();
        let mut extra = h.extra().unwrap();
        extra.round = 4;
        extra.committed_seals.push(CommittedSeal {
            signer: Address([2u8; 20]),
            signature: Signature([3u8; 64]),
        });
        let sealed = h.clone().with_sealed_extra(&extra);
        assert_ne!(sealed.extra_data, h.extra_data);
        assert_eq!(sealed.compute_hash().unwrap(), h.hash);
    }

    #[test]
    fn test_field_change_changes_hash() {
        let mut h = header();
        h.timestamp += 1;
        assert_ne!(h.compute_hash().unwrap(), h.hash);
    }

    #[test]
    fn test_transactions_root_is_order_sensitive() {
        let a = Transaction(vec![1]);
        let b = Transaction(vec![2]);
        assert_ne!(
            transactions_root(&[a.clone(), b.clone()]),
            transactions_root(&[b, a])
        );
    }
}
