//! Shared transaction pool with a hashing executor.

use favo_core::AppliedTransactions;
use favo_types::{Hash, Receipt, Transaction};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use tracing::trace;

/// Thread-safe FIFO transaction pool.
///
/// Shared between the runner (which executes and prunes) and whoever feeds
/// the node transactions. Executing a block does not remove anything;
/// transactions leave the pool when a block containing them finalizes.
#[derive(Debug, Default)]
pub struct Mempool {
    inner: Mutex<PoolInner>,
}

#[derive(Debug, Default)]
struct PoolInner {
    queue: VecDeque<Transaction>,
    hashes: HashSet<Hash>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a transaction. Returns false for duplicates.
    pub fn submit(&self, tx: Transaction) -> bool {
        let mut inner = self.inner.lock();
        if !inner.hashes.insert(tx.hash()) {
            return false;
        }
        inner.queue.push_back(tx);
        true
    }

    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Execute up to `max_transactions` pooled transactions on top of
    /// `parent_state_root`.
    ///
    /// The post-state root is a hash chain over the parent root and the
    /// transaction hashes, so every node applying the same list to the same
    /// parent gets the same root.
    pub fn apply(&self, parent_state_root: Hash, max_transactions: usize) -> AppliedTransactions {
        let transactions: Vec<Transaction> = {
            let inner = self.inner.lock();
            inner.queue.iter().take(max_transactions).cloned().collect()
        };

        let mut state_root = parent_state_root;
        let mut receipts = Vec::with_capacity(transactions.len());
        for tx in &transactions {
            let tx_hash = tx.hash();
            state_root = Hash::from_parts(&[state_root.as_bytes(), tx_hash.as_bytes()]);
            receipts.push(Receipt {
                tx_hash,
                success: true,
                events_hash: Hash::from_parts(&[b"events", tx_hash.as_bytes()]),
            });
        }
        trace!(count = transactions.len(), ?state_root, "Applied transactions");

        AppliedTransactions {
            transactions,
            state_root,
            receipts,
        }
    }

    /// Drop transactions included in a finalized block.
    pub fn remove_included(&self, included: &[Transaction]) {
        if included.is_empty() {
            return;
        }
        let mut inner = self.inner.lock();
        for tx in included {
            inner.hashes.remove(&tx.hash());
        }
        let PoolInner { queue, hashes } = &mut *inner;
        queue.retain(|tx| hashes.contains(&tx.hash()));
    }
}
