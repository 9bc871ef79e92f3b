//! Epoch and validator-set management.
//!
//! [`ValidatorSetManager`] owns the active validator set and the epoch it
//! belongs to. The consensus state machine and read-only status readers share
//! it through an `Arc`; the set itself is handed out as an immutable
//! `Arc<ValidatorSet>` snapshot, so readers never observe a half-applied delta.
//!
//! The set changes only in [`ValidatorSetManager::apply_boundary`], once per
//! confirmed epoch-ending block. Each resulting set is persisted as a
//! [`ValidatorSnapshot`] keyed by epoch number.

use crate::accessor::{AccessorError, ChainAccessor};
use crate::boundary::resolve_epoch_end;
use crate::config::RetryPolicy;
use crate::seal::{verify_committed_seals, SealError};
use favo_types::{
    Address, BlockNumber, EpochNumber, Extra, Hash, Header, ValidatorSet, ValidatorSetDelta,
};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Boundary application failures. All indicate an upstream contract violation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidatorSetError {
    #[error("boundary at block {block_number} already applied (last applied: {last_applied})")]
    DuplicateApplication {
        block_number: BlockNumber,
        last_applied: BlockNumber,
    },

    #[error("block {block_number} removes {address}, which is not in the validator set")]
    SetUnderflow {
        block_number: BlockNumber,
        address: Address,
    },

    #[error("block {block_number} adds {address}, which is already in the validator set")]
    AlreadyPresent {
        block_number: BlockNumber,
        address: Address,
    },

    #[error("block {block_number} would leave the validator set empty")]
    EmptySet { block_number: BlockNumber },

    #[error("block {block_number} is in epoch {actual}, manager is at epoch {expected}")]
    EpochMismatch {
        block_number: BlockNumber,
        expected: EpochNumber,
        actual: EpochNumber,
    },
}

/// Replay of stored blocks failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RestoreError {
    #[error(transparent)]
    Accessor(#[from] AccessorError),

    #[error(transparent)]
    ValidatorSet(#[from] ValidatorSetError),

    #[error("block {number} hash does not match its contents")]
    HashMismatch { number: BlockNumber },

    #[error("block {number} does not extend its stored parent")]
    BrokenLink { number: BlockNumber },

    #[error("block {number} has invalid committed seals: {source}")]
    Seals {
        number: BlockNumber,
        #[source]
        source: SealError,
    },
}

/// Validator set in force for one epoch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorSnapshot {
    pub epoch: EpochNumber,
    /// Boundary block that opened the epoch (genesis for epoch 0).
    pub start_number: BlockNumber,
    pub start_hash: Hash,
    pub validators: Arc<ValidatorSet>,
}

/// Persistence for validator snapshots.
pub trait SnapshotStore: Send + Sync {
    fn put(&self, snapshot: ValidatorSnapshot);
    fn get(&self, epoch: EpochNumber) -> Option<ValidatorSnapshot>;
    fn latest(&self) -> Option<ValidatorSnapshot>;
}

/// Snapshot store backed by a map.
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    snapshots: RwLock<BTreeMap<EpochNumber, ValidatorSnapshot>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.snapshots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.read().is_empty()
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn put(&self, snapshot: ValidatorSnapshot) {
        self.snapshots.write().insert(snapshot.epoch, snapshot);
    }

    fn get(&self, epoch: EpochNumber) -> Option<ValidatorSnapshot> {
        self.snapshots.read().get(&epoch).cloned()
    }

    fn latest(&self) -> Option<ValidatorSnapshot> {
        self.snapshots.read().values().next_back().cloned()
    }
}

#[derive(Debug)]
struct ManagerState {
    epoch: EpochNumber,
    set: Arc<ValidatorSet>,
    start_number: BlockNumber,
    start_hash: Hash,
    last_applied: Option<BlockNumber>,
    /// Membership changes requested but not yet carried by a header.
    pending: ValidatorSetDelta,
}

/// Owner of the active validator set.
pub struct ValidatorSetManager {
    state: RwLock<ManagerState>,
    snapshots: Arc<dyn SnapshotStore>,
}

impl ValidatorSetManager {
    /// Start at epoch 0 with the genesis validator set.
    pub fn new(
        genesis_set: ValidatorSet,
        genesis_hash: Hash,
        snapshots: Arc<dyn SnapshotStore>,
    ) -> Self {
        let set = Arc::new(genesis_set);
        snapshots.put(ValidatorSnapshot {
            epoch: 0,
            start_number: 0,
            start_hash: genesis_hash,
            validators: Arc::clone(&set),
        });
        Self {
            state: RwLock::new(ManagerState {
                epoch: 0,
                set,
                start_number: 0,
                start_hash: genesis_hash,
                last_applied: None,
                pending: ValidatorSetDelta::default(),
            }),
            snapshots,
        }
    }

    /// Read-only snapshot of the active set.
    pub fn current_set(&self) -> Arc<ValidatorSet> {
        Arc::clone(&self.state.read().set)
    }

    pub fn current_epoch(&self) -> EpochNumber {
        self.state.read().epoch
    }

    /// Boundary block that opened the current epoch: `(number, hash)`.
    pub fn epoch_start(&self) -> (BlockNumber, Hash) {
        let state = self.state.read();
        (state.start_number, state.start_hash)
    }

    /// Number of the last boundary block applied, if any.
    pub fn last_applied(&self) -> Option<BlockNumber> {
        self.state.read().last_applied
    }

    /// Persisted snapshot for `epoch`.
    pub fn snapshot(&self, epoch: EpochNumber) -> Option<ValidatorSnapshot> {
        self.snapshots.get(epoch)
    }

    /// Membership changes waiting for the next period boundary.
    pub fn pending_delta(&self) -> ValidatorSetDelta {
        self.state.read().pending.clone()
    }

    /// Queue a membership change.
    ///
    /// Rejected if the merged pending delta would not apply cleanly to the
    /// current set; nothing is queued in that case.
    pub fn queue_delta(&self, delta: ValidatorSetDelta) -> Result<(), ValidatorSetError> {
        let mut state = self.state.write();
        let mut merged = state.pending.clone();
        merged.merge(delta);
        let next_block = state.last_applied.map_or(0, |n| n + 1);
        apply_delta(&state.set, &merged, next_block)?;
        debug!(
            added = merged.added.len(),
            removed = merged.removed.len(),
            "Validator set change queued"
        );
        state.pending = merged;
        Ok(())
    }

    /// Apply the boundary closed by block `block_number`.
    ///
    /// Applies the block's delta (removals, then additions) to a copy of the
    /// current set, then atomically installs it with epoch
    /// `extra.checkpoint.epoch_number + 1` and persists the snapshot. On
    /// error nothing changes.
    #[instrument(skip(self, extra), fields(epoch = extra.checkpoint.epoch_number))]
    pub fn apply_boundary(
        &self,
        block_number: BlockNumber,
        block_hash: Hash,
        extra: &Extra,
    ) -> Result<(), ValidatorSetError> {
        let mut state = self.state.write();

        if let Some(last_applied) = state.last_applied {
            if block_number <= last_applied {
                return Err(ValidatorSetError::DuplicateApplication {
                    block_number,
                    last_applied,
                });
            }
        }
        if extra.checkpoint.epoch_number != state.epoch {
            return Err(ValidatorSetError::EpochMismatch {
                block_number,
                expected: state.epoch,
                actual: extra.checkpoint.epoch_number,
            });
        }

        let next = Arc::new(apply_delta(&state.set, &extra.validators, block_number)?);
        let epoch = extra.checkpoint.epoch_number + 1;

        state.set = Arc::clone(&next);
        state.epoch = epoch;
        state.start_number = block_number;
        state.start_hash = block_hash;
        state.last_applied = Some(block_number);
        state.pending.subtract(&extra.validators);

        self.snapshots.put(ValidatorSnapshot {
            epoch,
            start_number: block_number,
            start_hash: block_hash,
            validators: Arc::clone(&next),
        });

        info!(
            block_number,
            epoch,
            validators = next.len(),
            total_power = next.total_voting_power(),
            added = extra.validators.added.len(),
            removed = extra.validators.removed.len(),
            "Epoch boundary applied"
        );
        Ok(())
    }

    /// Rebuild epoch state by replaying stored blocks after genesis.
    ///
    /// Blocks up to the backend's latest number are read with the accessor's
    /// retry policy; the block after the head is looked up once. Each block's
    /// seals are checked against the set of the epoch that produced it, and
    /// every epoch boundary found is applied. Boundaries already applied are
    /// skipped, so a restore can resume. Returns the number of the last block
    /// replayed.
    pub fn restore_from_chain(
        &self,
        accessor: &ChainAccessor,
        epoch_size: u64,
    ) -> Result<BlockNumber, RestoreError> {
        let head = accessor
            .backend()
            .latest_number()
            .ok_or(AccessorError::NoBlock(0))?;
        // A missing successor of the head just means we reached the tip.
        let tip = accessor.with_policy(RetryPolicy::single_attempt());
        let (genesis, _) = accessor.get_block_data(0)?;
        let mut parent_hash = genesis.hash;

        for number in 1..=head {
            let (header, extra) = accessor.get_block_data(number)?;
            self.verify_replayed(&header, &extra, parent_hash)?;

            let lookup = if number < head { accessor } else { &tip };
            if resolve_epoch_end(number, &extra, lookup, epoch_size)? {
                let already = self.last_applied().is_some_and(|last| last >= number);
                if !already {
                    self.apply_boundary(number, header.hash, &extra)?;
                }
            }
            parent_hash = header.hash;
        }

        info!(
            head,
            epoch = self.current_epoch(),
            validators = self.current_set().len(),
            "Validator set restored from chain"
        );
        Ok(head)
    }

    fn verify_replayed(
        &self,
        header: &Header,
        extra: &Extra,
        parent_hash: Hash,
    ) -> Result<(), RestoreError> {
        let number = header.number;
        if header.parent_hash != parent_hash {
            return Err(RestoreError::BrokenLink { number });
        }
        match header.compute_hash() {
            Ok(hash) if hash == header.hash => {}
            _ => return Err(RestoreError::HashMismatch { number }),
        }
        let epoch = self.current_epoch();
        if extra.checkpoint.epoch_number != epoch {
            return Err(ValidatorSetError::EpochMismatch {
                block_number: number,
                expected: epoch,
                actual: extra.checkpoint.epoch_number,
            }
            .into());
        }
        verify_committed_seals(header, extra, &self.current_set()).map_err(|source| {
            warn!(number, error = %source, "Stored block has invalid seals");
            RestoreError::Seals { number, source }
        })
    }
}

impl std::fmt::Debug for ValidatorSetManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("ValidatorSetManager")
            .field("epoch", &state.epoch)
            .field("validators", &state.set.len())
            .field("last_applied", &state.last_applied)
            .finish()
    }
}

/// `set` with `delta` applied, or the first violation found.
fn apply_delta(
    set: &ValidatorSet,
    delta: &ValidatorSetDelta,
    block_number: BlockNumber,
) -> Result<ValidatorSet, ValidatorSetError> {
    let mut next = set.clone();
    for address in &delta.removed {
        if next.remove(address).is_none() {
            return Err(ValidatorSetError::SetUnderflow {
                block_number,
                address: *address,
            });
        }
    }
    for info in &delta.added {
        if !next.insert(info.clone()) {
            return Err(ValidatorSetError::AlreadyPresent {
                block_number,
                address: info.address,
            });
        }
    }
    if next.is_empty() {
        return Err(ValidatorSetError::EmptySet { block_number });
    }
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::ManualClock;
    use crate::storage::BlockchainBackend;
    use favo_types::test_utils::{test_validator, test_validator_set};
    use favo_types::{Block, Checkpoint};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn manager(n: u8) -> (ValidatorSetManager, Arc<InMemorySnapshotStore>) {
        let (_, set) = test_validator_set(n);
        let store = Arc::new(InMemorySnapshotStore::new());
        (
            ValidatorSetManager::new(set, Hash::from_bytes(b"genesis"), store.clone()),
            store,
        )
    }

    fn boundary_extra(epoch: EpochNumber, delta: ValidatorSetDelta) -> Extra {
        Extra::new(
            delta,
            Checkpoint {
                epoch_number: epoch,
                ..Default::default()
            },
        )
    }

    /// Serves only genesis, hidden from the first `misses` lookups.
    struct SlowGenesis {
        header: Header,
        misses: u32,
        calls: AtomicU32,
    }

    impl BlockchainBackend for SlowGenesis {
        fn header_by_number(&self, number: BlockNumber) -> Option<Header> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            (number == 0 && call >= self.misses).then(|| self.header.clone())
        }

        fn latest_number(&self) -> Option<BlockNumber> {
            Some(0)
        }
    }

    fn slow_genesis(misses: u32) -> Arc<SlowGenesis> {
        Arc::new(SlowGenesis {
            header: Block::genesis(0, &Extra::default()).header,
            misses,
            calls: AtomicU32::new(0),
        })
    }

    #[test]
    fn test_restore_retries_lagging_backend() {
        let (m, _) = manager(4);
        let clock = Arc::new(ManualClock::new());
        let retry = RetryPolicy {
            max_attempts: 3,
            delay: Duration::from_millis(10),
        };
        let accessor = ChainAccessor::new(slow_genesis(2), retry).with_clock(clock.clone());
        assert_eq!(m.restore_from_chain(&accessor, 4).unwrap(), 0);
        assert_eq!(clock.sleeps().len(), 2);

        let (m, _) = manager(4);
        let accessor = ChainAccessor::new(slow_genesis(2), RetryPolicy::single_attempt());
        assert_eq!(
            m.restore_from_chain(&accessor, 4).unwrap_err(),
            RestoreError::Accessor(AccessorError::NoBlock(0))
        );
    }

    #[test]
    fn test_genesis_snapshot_persisted() {
        let (m, store) = manager(4);
        assert_eq!(m.current_epoch(), 0);
        assert_eq!(store.get(0).unwrap().validators.len(), 4);
        assert_eq!(m.epoch_start().0, 0);
    }

    #[test]
    fn test_apply_boundary_adds_and_bumps_epoch() {
        let (m, store) = manager(4);
        let joiner = test_validator(9, 3);
        let extra = boundary_extra(
            0,
            ValidatorSetDelta {
                added: vec![joiner.clone()],
                removed: vec![],
            },
        );
        m.apply_boundary(4, Hash::from_bytes(b"b4"), &extra).unwrap();

        assert_eq!(m.current_epoch(), 1);
        assert!(m.current_set().contains(&joiner.address));
        assert_eq!(m.current_set().total_voting_power(), 7);
        assert_eq!(m.epoch_start(), (4, Hash::from_bytes(b"b4")));
        assert_eq!(store.get(1).unwrap().validators, m.current_set());
        assert_eq!(store.latest().unwrap().epoch, 1);
    }

    #[test]
    fn test_duplicate_application_leaves_set_unchanged() {
        let (m, _) = manager(4);
        let leaver = test_validator(2, 1).address;
        let extra = boundary_extra(
            0,
            ValidatorSetDelta {
                added: vec![],
                removed: vec![leaver],
            },
        );
        m.apply_boundary(4, Hash::ZERO, &extra).unwrap();
        let after_first = m.current_set();

        let err = m.apply_boundary(4, Hash::ZERO, &extra).unwrap_err();
        assert_eq!(
            err,
            ValidatorSetError::DuplicateApplication {
                block_number: 4,
                last_applied: 4
            }
        );
        assert_eq!(m.current_set(), after_first);
        assert_eq!(m.current_epoch(), 1);
    }

    #[test]
    fn test_removal_of_unknown_validator_underflows() {
        let (m, _) = manager(4);
        let stranger = test_validator(77, 1).address;
        let extra = boundary_extra(
            0,
            ValidatorSetDelta {
                added: vec![],
                removed: vec![stranger],
            },
        );
        assert_eq!(
            m.apply_boundary(4, Hash::ZERO, &extra),
            Err(ValidatorSetError::SetUnderflow {
                block_number: 4,
                address: stranger
            })
        );
        assert_eq!(m.current_epoch(), 0);
        assert_eq!(m.current_set().len(), 4);
        assert_eq!(m.last_applied(), None);
    }

    #[test]
    fn test_empty_set_rejected() {
        let (m, _) = manager(1);
        let only = test_validator(1, 1).address;
        let extra = boundary_extra(
            0,
            ValidatorSetDelta {
                added: vec![],
                removed: vec![only],
            },
        );
        assert_eq!(
            m.apply_boundary(4, Hash::ZERO, &extra),
            Err(ValidatorSetError::EmptySet { block_number: 4 })
        );
    }

    #[test]
    fn test_epoch_mismatch_rejected() {
        let (m, _) = manager(4);
        let extra = boundary_extra(3, ValidatorSetDelta::default());
        assert!(matches!(
            m.apply_boundary(4, Hash::ZERO, &extra),
            Err(ValidatorSetError::EpochMismatch { expected: 0, .. })
        ));
    }

    #[test]
    fn test_empty_delta_rolls_epoch_only() {
        let (m, _) = manager(4);
        let before = m.current_set();
        m.apply_boundary(8, Hash::ZERO, &boundary_extra(0, Default::default()))
            .unwrap();
        assert_eq!(m.current_epoch(), 1);
        assert_eq!(*m.current_set(), *before);
    }

    #[test]
    fn test_queue_delta_validates_and_clears_on_apply() {
        let (m, _) = manager(4);
        let joiner = test_validator(9, 1);
        let bad = ValidatorSetDelta {
            added: vec![],
            removed: vec![test_validator(50, 1).address],
        };
        assert!(matches!(
            m.queue_delta(bad),
            Err(ValidatorSetError::SetUnderflow { .. })
        ));
        assert!(m.pending_delta().is_empty());

        let join = ValidatorSetDelta {
            added: vec![joiner],
            removed: vec![],
        };
        m.queue_delta(join.clone()).unwrap();
        assert_eq!(m.pending_delta(), join);

        m.apply_boundary(4, Hash::ZERO, &boundary_extra(0, join))
            .unwrap();
        assert!(m.pending_delta().is_empty());
    }

    #[test]
    fn test_concurrent_readers_see_whole_sets() {
        let (m, _) = manager(4);
        let m = Arc::new(m);
        let reader = {
            let m = Arc::clone(&m);
            std::thread::spawn(move || {
                for _ in 0..1_000 {
                    let set = m.current_set();
                    // Either before (4) or after (5) the boundary, never in between.
                    assert!(set.len() == 4 || set.len() == 5);
                }
            })
        };
        let extra = boundary_extra(
            0,
            ValidatorSetDelta {
                added: vec![test_validator(9, 1)],
                removed: vec![],
            },
        );
        m.apply_boundary(4, Hash::ZERO, &extra).unwrap();
        reader.join().unwrap();
    }
}
