//! Pending transaction pool.
//!
//! Transactions are ordered by gas price (highest first) with arrival order
//! breaking ties. The pool checks signatures and duplicates on insert; balance
//! and nonce checks happen when the miner applies a transaction to a
//! candidate state.

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use crate::error::PoolError;
use crate::types::{Hash256, Transaction};

/// Default maximum number of pooled transactions.
pub const DEFAULT_MAX_TRANSACTIONS: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct PriorityKey {
    // highest price sorts first
    gas_price: Reverse<u64>,
    sequence: u64,
    hash: Hash256,
}

#[derive(Debug)]
pub struct TxPool {
    by_hash: HashMap<Hash256, (Transaction, PriorityKey)>,
    ordered: BTreeSet<PriorityKey>,
    next_sequence: u64,
    max_transactions: usize,
}

impl TxPool {
    pub fn new(max_transactions: usize) -> Self {
        Self {
            by_hash: HashMap::new(),
            ordered: BTreeSet::new(),
            next_sequence: 0,
            max_transactions,
        }
    }

    /// Add a signed transaction. Returns its hash.
    pub fn insert(&mut self, tx: Transaction) -> Result<Hash256, PoolError> {
        let hash = tx.hash();
        if self.by_hash.contains_key(&hash) {
            return Err(PoolError::AlreadyKnown(hash));
        }
        if !tx.is_valid() {
            return Err(PoolError::InvalidSignature(hash));
        }
        if self.by_hash.len() >= self.max_transactions {
            return Err(PoolError::PoolFull);
        }
        let key = PriorityKey {
            gas_price: Reverse(tx.gas_price),
            sequence: self.next_sequence,
            hash,
        };
        self.next_sequence += 1;
        self.ordered.insert(key);
        self.by_hash.insert(hash, (tx, key));
        debug!(%hash, pooled = self.by_hash.len(), "transaction added to pool");
        Ok(hash)
    }

    /// Up to `limit` transactions in priority order.
    pub fn pending(&self, limit: usize) -> Vec<Transaction> {
        self.ordered
            .iter()
            .take(limit)
            .filter_map(|key| self.by_hash.get(&key.hash).map(|(tx, _)| tx.clone()))
            .collect()
    }

    pub fn remove(&mut self, hash: &Hash256) -> Option<Transaction> {
        let (tx, key) = self.by_hash.remove(hash)?;
        self.ordered.remove(&key);
        Some(tx)
    }

    /// Drop every transaction included in a committed block.
    pub fn remove_included(&mut self, txs: &[Transaction]) -> usize {
        txs.iter().filter(|tx| self.remove(&tx.hash()).is_some()).count()
    }

    pub fn contains(&self, hash: &Hash256) -> bool {
        self.by_hash.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }
}

impl Default for TxPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TRANSACTIONS)
    }
}
