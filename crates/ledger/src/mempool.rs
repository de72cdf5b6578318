//! Memory Pool Implementation
//!
//! Pending transactions keyed by hash, split into a verified partition (safe
//! to propose and relay) and an unverified one (awaiting re-validation after
//! a new block). Shared between the blockchain, consensus and network
//! actors, so both partitions are concurrent maps.

use appchain_config::MEMORY_POOL_MAX_TRANSACTIONS;
use appchain_core::{Fixed8, RelayResultReason, Transaction, TransactionData, UInt256};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::time::Instant;
use tracing::{debug, trace};

/// Memory pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemPoolConfig {
    /// Maximum number of transactions in pool
    pub capacity: usize,
}

impl Default for MemPoolConfig {
    fn default() -> Self {
        Self {
            capacity: MEMORY_POOL_MAX_TRANSACTIONS,
        }
    }
}

/// Transaction pool entry with metadata
#[derive(Debug, Clone)]
struct PoolItem {
    transaction: Transaction,
    fee: Fixed8,
    added: Instant,
}

impl PoolItem {
    fn new(transaction: Transaction) -> Self {
        Self {
            fee: transaction.network_fee(),
            transaction,
            added: Instant::now(),
        }
    }
}

/// Higher fee first, then lower hash.
fn by_priority(a: &(Fixed8, UInt256), b: &(Fixed8, UInt256)) -> Ordering {
    b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1))
}

/// Outcome of one re-verification batch.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReverifyOutcome {
    pub promoted: Vec<UInt256>,
    pub dropped: Vec<UInt256>,
}

#[derive(Debug)]
pub struct MemoryPool {
    capacity: usize,
    verified: DashMap<UInt256, PoolItem>,
    unverified: DashMap<UInt256, PoolItem>,
}

impl MemoryPool {
    pub fn new(config: MemPoolConfig) -> Self {
        Self {
            capacity: config.capacity,
            verified: DashMap::new(),
            unverified: DashMap::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(MemPoolConfig { capacity })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn count(&self) -> usize {
        self.verified.len() + self.unverified.len()
    }

    pub fn verified_count(&self) -> usize {
        self.verified.len()
    }

    pub fn unverified_count(&self) -> usize {
        self.unverified.len()
    }

    pub fn contains(&self, hash: &UInt256) -> bool {
        self.verified.contains_key(hash) || self.unverified.contains_key(hash)
    }

    /// Adds a verified transaction.
    ///
    /// The add that takes the count above capacity is undone and reported as
    /// `OutOfMemory`, so exactly `capacity` transactions fit.
    pub fn try_add(&self, transaction: Transaction) -> RelayResultReason {
        let hash = transaction.hash();
        if self.contains(&hash) {
            return RelayResultReason::AlreadyExists;
        }
        self.verified.insert(hash, PoolItem::new(transaction));
        if self.count() > self.capacity {
            self.verified.remove(&hash);
            debug!(%hash, capacity = self.capacity, "memory pool full");
            return RelayResultReason::OutOfMemory;
        }
        trace!(%hash, "transaction added to memory pool");
        RelayResultReason::Succeed
    }

    pub fn try_get(&self, hash: &UInt256) -> Option<Transaction> {
        self.verified
            .get(hash)
            .or_else(|| self.unverified.get(hash))
            .map(|item| item.transaction.clone())
    }

    /// Looks up a transaction in the verified partition only.
    pub fn try_get_verified(&self, hash: &UInt256) -> Option<Transaction> {
        self.verified.get(hash).map(|item| item.transaction.clone())
    }

    pub fn try_remove(&self, hash: &UInt256) -> Option<Transaction> {
        self.verified
            .remove(hash)
            .or_else(|| self.unverified.remove(hash))
            .map(|(_, item)| item.transaction)
    }

    pub fn get_verified_transactions(&self) -> Vec<Transaction> {
        self.verified
            .iter()
            .map(|entry| entry.transaction.clone())
            .collect()
    }

    /// Verified transactions drawing on the same balances or supply as
    /// `transaction`: everything from its account, plus issues of the asset
    /// it issues.
    pub fn get_competing_verified(&self, transaction: &Transaction) -> Vec<Transaction> {
        let issued = match transaction.data() {
            TransactionData::Issue { asset_id, .. } => Some(*asset_id),
            _ => None,
        };
        self.verified
            .iter()
            .filter(|entry| {
                let other = &entry.transaction;
                other.account() == transaction.account()
                    || matches!(
                        (issued, other.data()),
                        (Some(asset), TransactionData::Issue { asset_id, .. }) if *asset_id == asset
                    )
            })
            .map(|entry| entry.transaction.clone())
            .collect()
    }

    pub fn get_unverified_transactions(&self) -> Vec<Transaction> {
        self.unverified
            .iter()
            .map(|entry| entry.transaction.clone())
            .collect()
    }

    pub fn verified_hashes(&self) -> Vec<UInt256> {
        self.verified.iter().map(|entry| *entry.key()).collect()
    }

    /// Verified transactions ordered by fee, highest first.
    pub fn get_sorted_verified_transactions(&self) -> Vec<Transaction> {
        let mut keys: Vec<(Fixed8, UInt256)> = self
            .verified
            .iter()
            .map(|entry| (entry.fee, *entry.key()))
            .collect();
        keys.sort_by(by_priority);
        keys.into_iter()
            .filter_map(|(_, hash)| self.try_get_verified(&hash))
            .collect()
    }

    /// Drops the transactions of a persisted block from both partitions.
    pub fn remove_persisted<'a>(&self, hashes: impl IntoIterator<Item = &'a UInt256>) -> usize {
        hashes
            .into_iter()
            .filter(|hash| self.try_remove(hash).is_some())
            .count()
    }

    /// Moves every verified transaction to the unverified partition. Called
    /// after each block: ledger state changed, so earlier checks are stale.
    pub fn invalidate_verified(&self) {
        let hashes = self.verified_hashes();
        for hash in hashes {
            if let Some((hash, item)) = self.verified.remove(&hash) {
                self.unverified.insert(hash, item);
            }
        }
    }

    /// Re-validates up to `max` unverified transactions, highest fee first.
    ///
    /// `verify` receives the candidate and the transactions already verified
    /// (including ones promoted earlier in this batch). Passing transactions
    /// move back to the verified partition, failing ones are dropped.
    pub fn reverify_top_unverified<F>(&self, max: usize, mut verify: F) -> ReverifyOutcome
    where
        F: FnMut(&Transaction, &[Transaction]) -> bool,
    {
        let mut keys: Vec<(Fixed8, UInt256)> = self
            .unverified
            .iter()
            .map(|entry| (entry.fee, *entry.key()))
            .collect();
        keys.sort_by(by_priority);
        keys.truncate(max);

        let mut outcome = ReverifyOutcome::default();
        let mut others = self.get_verified_transactions();
        for (_, hash) in keys {
            let Some((hash, item)) = self.unverified.remove(&hash) else {
                continue;
            };
            if verify(&item.transaction, &others) {
                others.push(item.transaction.clone());
                self.verified.insert(hash, item);
                outcome.promoted.push(hash);
            } else {
                outcome.dropped.push(hash);
            }
        }
        debug!(
            promoted = outcome.promoted.len(),
            dropped = outcome.dropped.len(),
            remaining = self.unverified.len(),
            "memory pool reverified"
        );
        outcome
    }

    /// Age of the oldest pooled transaction.
    pub fn oldest_age(&self) -> Option<std::time::Duration> {
        self.verified
            .iter()
            .chain(self.unverified.iter())
            .map(|entry| entry.added.elapsed())
            .max()
    }

    pub fn clear(&self) {
        self.verified.clear();
        self.unverified.clear();
    }
}

impl Default for MemoryPool {
    fn default() -> Self {
        Self::new(MemPoolConfig::default())
    }
}
