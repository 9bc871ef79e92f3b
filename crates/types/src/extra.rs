//! Consensus extra data carried in every header.
//!
//! # Layout
//!
//! ```text
//! [vanity: 32][version: u8][round: u64 BE]             fixed region
//! [len: u32 BE][validator delta]
//! [len: u32 BE][checkpoint]
//! [len: u32 BE][committed seals]
//! ```
//!
//! Every variable-size field is either length-prefixed or counted, and the
//! decoder insists that each section is consumed exactly and that nothing
//! follows the last section. Any blob the decoder accepts therefore has
//! exactly one encoding, which is what the header hash and the seals commit to.

use crate::{
    Address, EpochNumber, Hash, PublicKey, Round, Signature, ValidatorInfo, ValidatorSetDelta,
};
use thiserror::Error;

/// Length of the free-form vanity prefix.
pub const VANITY_LEN: usize = 32;

/// Current extra-data format version.
pub const EXTRA_VERSION: u8 = 1;

/// Vanity + version + round.
pub const FIXED_REGION_LEN: usize = VANITY_LEN + 1 + 8;

const VALIDATOR_ENTRY_LEN: usize = Address::LEN + PublicKey::LEN + 8;
const SEAL_ENTRY_LEN: usize = Address::LEN + Signature::LEN;
const CHECKPOINT_LEN: usize = 8 + 8 + 32 + 32;

/// Extra data failed to decode. Always permanent: the bytes will not change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtraError {
    #[error("extra data too short: {len} bytes, fixed region needs {min}")]
    TooShort { len: usize, min: usize },

    #[error("unsupported extra data version {0}")]
    UnsupportedVersion(u8),

    #[error("{section}: need {needed} bytes at offset {offset}, only {available} available")]
    Overrun {
        section: &'static str,
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("{section}: {unconsumed} bytes left unconsumed")]
    SectionLength {
        section: &'static str,
        unconsumed: usize,
    },

    #[error("{0} trailing bytes after the last section")]
    TrailingBytes(usize),
}

/// Epoch bookkeeping committed by every header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Checkpoint {
    /// Epoch this block belongs to.
    pub epoch_number: EpochNumber,
    /// Number of the boundary block that opened this epoch (0 for the first).
    pub epoch_start_number: u64,
    /// Hash of that boundary block.
    pub epoch_start_hash: Hash,
    /// Commitment to the receipts produced by executing this block.
    pub event_root: Hash,
}

/// A validator's commit signature over a finalized block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommittedSeal {
    pub signer: Address,
    pub signature: Signature,
}

/// Decoded view of a header's extra data.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Extra {
    pub vanity: [u8; VANITY_LEN],
    /// Round in which the block was committed. Zero until sealed.
    pub round: Round,
    /// Membership change taking effect after this block.
    pub validators: ValidatorSetDelta,
    pub checkpoint: Checkpoint,
    pub committed_seals: Vec<CommittedSeal>,
}

impl Extra {
    /// Unsealed extra for a proposal.
    pub fn new(validators: ValidatorSetDelta, checkpoint: Checkpoint) -> Self {
        Self {
            vanity: [0u8; VANITY_LEN],
            round: 0,
            validators,
            checkpoint,
            committed_seals: Vec::new(),
        }
    }

    /// The form the header hash commits to: no seals, round zero.
    pub fn filtered(&self) -> Self {
        Self {
            round: 0,
            committed_seals: Vec::new(),
            ..self.clone()
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            FIXED_REGION_LEN
                + 12
                + CHECKPOINT_LEN
                + 8
                + VALIDATOR_ENTRY_LEN * self.validators.added.len()
                + Address::LEN * self.validators.removed.len()
                + 4
                + SEAL_ENTRY_LEN * self.committed_seals.len(),
        );
        out.extend_from_slice(&self.vanity);
        out.push(EXTRA_VERSION);
        out.extend_from_slice(&self.round.to_be_bytes());

        let mut delta = Vec::new();
        put_u32(&mut delta, self.validators.added.len());
        for v in &self.validators.added {
            delta.extend_from_slice(v.address.as_bytes());
            delta.extend_from_slice(v.public_key.as_bytes());
            delta.extend_from_slice(&v.voting_power.to_be_bytes());
        }
        put_u32(&mut delta, self.validators.removed.len());
        for addr in &self.validators.removed {
            delta.extend_from_slice(addr.as_bytes());
        }
        put_section(&mut out, &delta);

        let mut checkpoint = Vec::with_capacity(CHECKPOINT_LEN);
        checkpoint.extend_from_slice(&self.checkpoint.epoch_number.to_be_bytes());
        checkpoint.extend_from_slice(&self.checkpoint.epoch_start_number.to_be_bytes());
        checkpoint.extend_from_slice(self.checkpoint.epoch_start_hash.as_bytes());
        checkpoint.extend_from_slice(self.checkpoint.event_root.as_bytes());
        put_section(&mut out, &checkpoint);

        let mut seals = Vec::new();
        put_u32(&mut seals, self.committed_seals.len());
        for seal in &self.committed_seals {
            seals.extend_from_slice(seal.signer.as_bytes());
            seals.extend_from_slice(seal.signature.as_bytes());
        }
        put_section(&mut out, &seals);

        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ExtraError> {
        if bytes.len() < FIXED_REGION_LEN {
            return Err(ExtraError::TooShort {
                len: bytes.len(),
                min: FIXED_REGION_LEN,
            });
        }

        let mut r = Reader::new(bytes, "fixed region");
        let vanity = r.array::<VANITY_LEN>()?;
        let version = r.u8()?;
        if version != EXTRA_VERSION {
            return Err(ExtraError::UnsupportedVersion(version));
        }
        let round = r.u64()?;

        let mut delta = r.section("validator delta")?;
        let added_count = delta.count(VALIDATOR_ENTRY_LEN)?;
        let mut added = Vec::with_capacity(added_count);
        for _ in 0..added_count {
            added.push(ValidatorInfo {
                address: Address(delta.array()?),
                public_key: PublicKey(delta.array()?),
                voting_power: delta.u64()?,
            });
        }
        let removed_count = delta.count(Address::LEN)?;
        let mut removed = Vec::with_capacity(removed_count);
        for _ in 0..removed_count {
            removed.push(Address(delta.array()?));
        }
        delta.finish()?;

        let mut cp = r.section("checkpoint")?;
        let checkpoint = Checkpoint {
            epoch_number: cp.u64()?,
            epoch_start_number: cp.u64()?,
            epoch_start_hash: Hash::from_hash_bytes(&cp.array()?),
            event_root: Hash::from_hash_bytes(&cp.array()?),
        };
        cp.finish()?;

        let mut seals = r.section("committed seals")?;
        let seal_count = seals.count(SEAL_ENTRY_LEN)?;
        let mut committed_seals = Vec::with_capacity(seal_count);
        for _ in 0..seal_count {
            committed_seals.push(CommittedSeal {
                signer: Address(seals.array()?),
                signature: Signature(seals.array()?),
            });
        }
        seals.finish()?;

        if r.remaining() > 0 {
            return Err(ExtraError::TrailingBytes(r.remaining()));
        }

        Ok(Self {
            vanity,
            round,
            validators: ValidatorSetDelta { added, removed },
            checkpoint,
            committed_seals,
        })
    }
}

fn put_u32(out: &mut Vec<u8>, n: usize) {
    out.extend_from_slice(&(n as u32).to_be_bytes());
}

fn put_section(out: &mut Vec<u8>, payload: &[u8]) {
    put_u32(out, payload.len());
    out.extend_from_slice(payload);
}

/// Bounds-checked cursor over one region of the blob.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    /// Offset of `buf` within the whole blob, for error reporting.
    base: usize,
    section: &'static str,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8], section: &'static str) -> Self {
        Self {
            buf,
            pos: 0,
            base: 0,
            section,
        }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ExtraError> {
        if self.remaining() < n {
            return Err(ExtraError::Overrun {
                section: self.section,
                offset: self.base + self.pos,
                needed: n,
                available: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], ExtraError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, ExtraError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, ExtraError> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64, ExtraError> {
        Ok(u64::from_be_bytes(self.array()?))
    }

    /// Read an item count and check the items can fit in what is left, so a
    /// corrupt count never drives a huge allocation.
    fn count(&mut self, item_len: usize) -> Result<usize, ExtraError> {
        let offset = self.base + self.pos;
        let n = self.u32()? as usize;
        let needed = n.saturating_mul(item_len);
        if needed > self.remaining() {
            return Err(ExtraError::Overrun {
                section: self.section,
                offset,
                needed,
                available: self.remaining(),
            });
        }
        Ok(n)
    }

    /// Split off a length-prefixed section.
    fn section(&mut self, name: &'static str) -> Result<Reader<'a>, ExtraError> {
        self.section = name;
        let len = self.u32()? as usize;
        let base = self.base + self.pos;
        let buf = self.take(len)?;
        Ok(Reader {
            buf,
            pos: 0,
            base,
            section: name,
        })
    }

    fn finish(self) -> Result<(), ExtraError> {
        match self.remaining() {
            0 => Ok(()),
            unconsumed => Err(ExtraError::SectionLength {
                section: self.section,
                unconsumed,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_validator;

    fn sample_extra() -> Extra {
        Extra {
            vanity: [0xab; VANITY_LEN],
            round: 3,
            validators: ValidatorSetDelta {
                added: vec![test_validator(1, 100), test_validator(2, 50)],
                removed: vec![test_validator(3, 1).address],
            },
            checkpoint: Checkpoint {
                epoch_number: 2,
                epoch_start_number: 8,
                epoch_start_hash: Hash::from_bytes(b"start"),
                event_root: Hash::from_bytes(b"events"),
            },
            committed_seals: vec![CommittedSeal {
                signer: test_validator(1, 100).address,
                signature: Signature([9u8; 64]),
            }],
        }
    }

    #[test]
    fn test_encode_decode_preserves_fields() {
        let extra = sample_extra();
        let decoded = Extra::decode(&extra.encode()).unwrap();
        assert_eq!(decoded, extra);
    }

    #[test]
    fn test_reencode_is_byte_identical() {
        for extra in [Extra::default(), sample_extra(), sample_extra().filtered()] {
            let bytes = extra.encode();
            let reencoded = Extra::decode(&bytes).unwrap().encode();
            assert_eq!(reencoded, bytes);
        }
    }

    #[test]
    fn test_empty_extra_layout() {
        let bytes = Extra::default().encode();
        // fixed region + (4 + 8) delta + (4 + 80) checkpoint + (4 + 4) seals
        assert_eq!(bytes.len(), FIXED_REGION_LEN + 12 + 84 + 8);
        assert_eq!(bytes[VANITY_LEN], EXTRA_VERSION);
    }

    #[test]
    fn test_every_truncation_is_rejected() {
        let bytes = sample_extra().encode();
        for len in 0..bytes.len() {
            assert!(
                Extra::decode(&bytes[..len]).is_err(),
                "prefix of length {len} decoded"
            );
        }
    }

    #[test]
    fn test_short_blob_reports_fixed_region() {
        assert_eq!(
            Extra::decode(&[0u8; 10]),
            Err(ExtraError::TooShort {
                len: 10,
                min: FIXED_REGION_LEN
            })
        );
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = sample_extra().encode();
        bytes.push(0);
        assert_eq!(Extra::decode(&bytes), Err(ExtraError::TrailingBytes(1)));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let mut bytes = Extra::default().encode();
        bytes[VANITY_LEN] = 7;
        assert_eq!(
            Extra::decode(&bytes),
            Err(ExtraError::UnsupportedVersion(7))
        );
    }

    #[test]
    fn test_section_with_slack_rejected() {
        let mut bytes = Extra::default().encode();
        // Grow the delta section length by one and splice in a padding byte.
        let len_at = FIXED_REGION_LEN;
        bytes[len_at..len_at + 4].copy_from_slice(&9u32.to_be_bytes());
        bytes.insert(len_at + 4 + 8, 0);
        assert!(matches!(
            Extra::decode(&bytes),
            Err(ExtraError::SectionLength {
                section: "validator delta",
                unconsumed: 1
            })
        ));
    }

    #[test]
    fn test_oversized_count_rejected() {
        let mut bytes = Extra::default().encode();
        // Claim a billion added validators inside an 8-byte delta section.
        let count_at = FIXED_REGION_LEN + 4;
        bytes[count_at..count_at + 4].copy_from_slice(&1_000_000_000u32.to_be_bytes());
        assert!(matches!(
            Extra::decode(&bytes),
            Err(ExtraError::Overrun {
                section: "validator delta",
                ..
            })
        ));
    }

    #[test]
    fn test_filtered_drops_seals_and_round() {
        let filtered = sample_extra().filtered();
        assert_eq!(filtered.round, 0);
        assert!(filtered.committed_seals.is_empty());
        assert_eq!(filtered.validators, sample_extra().validators);
    }
}
