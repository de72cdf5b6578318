//! Key-value storage.
//!
//! The storage engine itself is a collaborator; the ledger only needs
//! consistent read views and atomic batch writes. `MemoryStore` is the
//! provided engine.

mod memory;
mod snapshot;

pub use memory::MemoryStore;
pub use snapshot::Snapshot;

use crate::LedgerResult;
use appchain_core::{UInt160, UInt256};
use std::sync::Arc;

/// Key prefixes of the ledger tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Table {
    Block = 0x01,
    Transaction = 0x02,
    Account = 0x40,
    Asset = 0x4C,
    AppChain = 0x60,
    HeaderHashList = 0x80,
    CurrentBlock = 0xC0,
    CurrentHeader = 0xC1,
}

/// Storage key: table prefix plus key bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageKey {
    pub table: Table,
    pub key: Vec<u8>,
}

impl StorageKey {
    pub fn new(table: Table, key: Vec<u8>) -> Self {
        Self { table, key }
    }

    /// Gets the full key bytes (prefix + key)
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut full_key = Vec::with_capacity(1 + self.key.len());
        full_key.push(self.table as u8);
        full_key.extend_from_slice(&self.key);
        full_key
    }

    pub fn block(hash: &UInt256) -> Self {
        Self::new(Table::Block, hash.as_bytes().to_vec())
    }

    pub fn transaction(hash: &UInt256) -> Self {
        Self::new(Table::Transaction, hash.as_bytes().to_vec())
    }

    pub fn account(script_hash: &UInt160) -> Self {
        Self::new(Table::Account, script_hash.as_bytes().to_vec())
    }

    pub fn asset(asset_id: &UInt256) -> Self {
        Self::new(Table::Asset, asset_id.as_bytes().to_vec())
    }

    pub fn app_chain(chain_hash: &UInt256) -> Self {
        Self::new(Table::AppChain, chain_hash.as_bytes().to_vec())
    }

    /// Checkpoint `n` holds header hashes `[n * 2000, (n + 1) * 2000)`.
    pub fn header_hash_list(checkpoint: u32) -> Self {
        Self::new(Table::HeaderHashList, checkpoint.to_le_bytes().to_vec())
    }

    pub fn current_block() -> Self {
        Self::new(Table::CurrentBlock, Vec::new())
    }

    pub fn current_header() -> Self {
        Self::new(Table::CurrentHeader, Vec::new())
    }
}

/// A consistent, read-only view of the store at one point in time.
pub trait ReadView: Send + Sync {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    /// All entries whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)>;
}

/// Writes applied atomically by `Store::write_batch`. `None` deletes.
#[derive(Debug, Default, Clone)]
pub struct WriteBatch {
    changes: Vec<(Vec<u8>, Option<Vec<u8>>)>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.changes.push((key, Some(value)));
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.changes.push((key, None));
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn into_changes(self) -> Vec<(Vec<u8>, Option<Vec<u8>>)> {
        self.changes
    }
}

/// Storage engine interface.
pub trait Store: Send + Sync {
    /// Opens a read view unaffected by later writes.
    fn read_view(&self) -> Arc<dyn ReadView>;

    /// Applies all changes atomically.
    fn write_batch(&self, batch: WriteBatch) -> LedgerResult<()>;

    /// Opens a writable snapshot over the current state.
    fn snapshot(&self) -> Snapshot {
        Snapshot::new(self.read_view())
    }
}
