//! Hashing stand-in for state execution.

use favo_core::AppliedTransactions;
use favo_types::{Hash, Receipt, Transaction};
use std::collections::VecDeque;

/// Deterministic executor with a local transaction pool.
///
/// The post-state root is a hash chain over the parent root and the applied
/// transaction hashes, so any two nodes applying the same transactions to
/// the same parent agree on the result.
#[derive(Debug, Default)]
pub struct SimExecutor {
    pool: VecDeque<Transaction>,
    failing: bool,
}

impl SimExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a transaction to the pool.
    pub fn submit(&mut self, tx: Transaction) {
        if !self.pool.contains(&tx) {
            self.pool.push_back(tx);
        }
    }

    /// Number of transactions waiting for a block.
    pub fn pending(&self) -> usize {
        self.pool.len()
    }

    /// Make every following `apply` fail.
    pub fn set_failing(&mut self, failing: bool) {
        self.failing = failing;
    }

    /// Apply up to `max_transactions` pooled transactions on top of `parent_state_root`.
    ///
    /// Transactions stay pooled until a block including them finalizes.
    pub fn apply(
        &self,
        parent_state_root: Hash,
        max_transactions: usize,
    ) -> Result<AppliedTransactions, String> {
        if self.failing {
            return Err("executor unavailable".to_string());
        }

        let transactions: Vec<Transaction> =
            self.pool.iter().take(max_transactions).cloned().collect();
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

        Ok(AppliedTransactions {
            transactions,
            state_root,
            receipts,
        })
    }

    /// Drop transactions that made it into a finalized block.
    pub fn remove_included(&mut self, included: &[Transaction]) {
        self.pool.retain(|tx| !included.contains(tx));
    }
}
