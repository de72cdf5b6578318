//! Copy-on-write snapshot over a read view.

use super::{ReadView, Store, StorageKey, Table, WriteBatch};
use crate::state::{
    AccountState, AppChainState, AssetState, HashIndexState, HeaderHashList, TransactionRecord,
};
use crate::{LedgerError, LedgerResult};
use appchain_core::{Block, Fixed8, Header, Transaction, TrimmedBlock, UInt160, UInt256};
use appchain_io::{Serializable, SerializableExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A writable view: reads fall through to the base view unless the key was
/// changed locally. `None` in the overlay marks a deletion.
#[derive(Clone)]
pub struct Snapshot {
    base: Arc<dyn ReadView>,
    changes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("changes", &self.changes.len())
            .finish()
    }
}

impl Snapshot {
    pub fn new(base: Arc<dyn ReadView>) -> Self {
        Self {
            base,
            changes: BTreeMap::new(),
        }
    }

    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    pub fn get_raw(&self, key: &StorageKey) -> Option<Vec<u8>> {
        let full_key = key.to_bytes();
        match self.changes.get(&full_key) {
            Some(value) => value.clone(),
            None => self.base.get(&full_key),
        }
    }

    pub fn contains(&self, key: &StorageKey) -> bool {
        self.get_raw(key).is_some()
    }

    pub fn put_raw(&mut self, key: &StorageKey, value: Vec<u8>) {
        self.changes.insert(key.to_bytes(), Some(value));
    }

    pub fn delete(&mut self, key: &StorageKey) {
        self.changes.insert(key.to_bytes(), None);
    }

    /// Entries of one table, overlay applied, in key order. Keys are
    /// returned without the table prefix.
    pub fn find(&self, table: Table) -> Vec<(Vec<u8>, Vec<u8>)> {
        let prefix = [table as u8];
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> =
            self.base.scan_prefix(&prefix).into_iter().collect();
        for (key, value) in self.changes.iter().filter(|(k, _)| k.starts_with(&prefix)) {
            match value {
                Some(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        merged
            .into_iter()
            .map(|(mut key, value)| {
                key.remove(0);
                (key, value)
            })
            .collect()
    }

    pub fn get<T: DeserializeOwned>(&self, key: &StorageKey) -> LedgerResult<Option<T>> {
        self.get_raw(key)
            .map(|bytes| bincode::deserialize(&bytes))
            .transpose()
            .map_err(LedgerError::from)
    }

    pub fn put<T: Serialize>(&mut self, key: &StorageKey, value: &T) -> LedgerResult<()> {
        let bytes = bincode::serialize(value)?;
        self.put_raw(key, bytes);
        Ok(())
    }

    /// Loads a record (or `default()` when absent), applies `change` and
    /// writes it back.
    pub fn get_and_change<T, R>(
        &mut self,
        key: &StorageKey,
        default: impl FnOnce() -> T,
        change: impl FnOnce(&mut T) -> R,
    ) -> LedgerResult<R>
    where
        T: Serialize + DeserializeOwned,
    {
        let mut value = self.get(key)?.unwrap_or_else(default);
        let result = change(&mut value);
        self.put(key, &value)?;
        Ok(result)
    }

    fn get_wire<T: Serializable>(&self, key: &StorageKey) -> LedgerResult<Option<T>> {
        self.get_raw(key)
            .map(|bytes| T::from_array(&bytes))
            .transpose()
            .map_err(LedgerError::from)
    }

    fn put_wire<T: Serializable>(&mut self, key: &StorageKey, value: &T) {
        self.put_raw(key, value.to_array());
    }

    /// Writes the overlay to `store` in one batch and drops it.
    pub fn commit(&mut self, store: &dyn Store) -> LedgerResult<()> {
        let mut batch = WriteBatch::new();
        for (key, value) in std::mem::take(&mut self.changes) {
            match value {
                Some(value) => batch.put(key, value),
                None => batch.delete(key),
            }
        }
        store.write_batch(batch)
    }

    // Ledger queries

    pub fn current_block(&self) -> LedgerResult<Option<HashIndexState>> {
        self.get(&StorageKey::current_block())
    }

    pub fn set_current_block(&mut self, state: &HashIndexState) -> LedgerResult<()> {
        self.put(&StorageKey::current_block(), state)
    }

    pub fn current_header(&self) -> LedgerResult<Option<HashIndexState>> {
        self.get(&StorageKey::current_header())
    }

    pub fn set_current_header(&mut self, state: &HashIndexState) -> LedgerResult<()> {
        self.put(&StorageKey::current_header(), state)
    }

    /// Height of the last persisted block, `None` before genesis.
    pub fn height(&self) -> LedgerResult<Option<u32>> {
        Ok(self.current_block()?.map(|state| state.index))
    }

    pub fn get_trimmed_block(&self, hash: &UInt256) -> LedgerResult<Option<TrimmedBlock>> {
        self.get_wire(&StorageKey::block(hash))
    }

    pub fn put_trimmed_block(&mut self, block: &TrimmedBlock) {
        self.put_wire(&StorageKey::block(&block.header.hash()), block);
    }

    pub fn get_header(&self, hash: &UInt256) -> LedgerResult<Option<Header>> {
        Ok(self.get_trimmed_block(hash)?.map(|trimmed| trimmed.header))
    }

    /// Reassembles a persisted block; header-only records return `None`.
    pub fn get_block(&self, hash: &UInt256) -> LedgerResult<Option<Block>> {
        let Some(trimmed) = self.get_trimmed_block(hash)? else {
            return Ok(None);
        };
        if !trimmed.is_block() {
            return Ok(None);
        }
        let mut transactions = Vec::with_capacity(trimmed.hashes.len());
        for tx_hash in &trimmed.hashes {
            let record = self
                .get_transaction_record(tx_hash)?
                .ok_or_else(|| LedgerError::not_found(format!("transaction {tx_hash}")))?;
            transactions.push(record.transaction);
        }
        Ok(Some(Block::new(trimmed.header, transactions)))
    }

    pub fn contains_block(&self, hash: &UInt256) -> LedgerResult<bool> {
        Ok(self
            .get_trimmed_block(hash)?
            .is_some_and(|trimmed| trimmed.is_block()))
    }

    pub fn get_transaction_record(
        &self,
        hash: &UInt256,
    ) -> LedgerResult<Option<TransactionRecord>> {
        self.get_wire(&StorageKey::transaction(hash))
    }

    pub fn put_transaction(&mut self, block_index: u32, transaction: &Transaction) {
        let record = TransactionRecord {
            block_index,
            transaction: transaction.clone(),
        };
        self.put_wire(&StorageKey::transaction(&transaction.hash()), &record);
    }

    pub fn get_transaction(&self, hash: &UInt256) -> LedgerResult<Option<Transaction>> {
        Ok(self
            .get_transaction_record(hash)?
            .map(|record| record.transaction))
    }

    pub fn contains_transaction(&self, hash: &UInt256) -> bool {
        self.contains(&StorageKey::transaction(hash))
    }

    pub fn get_account(&self, script_hash: &UInt160) -> LedgerResult<Option<AccountState>> {
        self.get(&StorageKey::account(script_hash))
    }

    pub fn balance(&self, script_hash: &UInt160, asset_id: &UInt256) -> LedgerResult<Fixed8> {
        Ok(self
            .get_account(script_hash)?
            .map(|account| account.balance(asset_id))
            .unwrap_or(Fixed8::ZERO))
    }

    pub fn get_asset(&self, asset_id: &UInt256) -> LedgerResult<Option<AssetState>> {
        self.get(&StorageKey::asset(asset_id))
    }

    pub fn get_app_chain(&self, chain_hash: &UInt256) -> LedgerResult<Option<AppChainState>> {
        self.get(&StorageKey::app_chain(chain_hash))
    }

    pub fn put_app_chain(&mut self, state: &AppChainState) -> LedgerResult<()> {
        self.put(&StorageKey::app_chain(&state.hash), state)
    }

    pub fn app_chains(&self) -> LedgerResult<Vec<AppChainState>> {
        self.find(Table::AppChain)
            .into_iter()
            .map(|(_, value)| bincode::deserialize(&value).map_err(LedgerError::from))
            .collect()
    }

    /// All header hash list checkpoints in order.
    pub fn header_hash_lists(&self) -> LedgerResult<Vec<HeaderHashList>> {
        let mut lists = Vec::new();
        for (key, value) in self.find(Table::HeaderHashList) {
            let index: [u8; 4] = key.as_slice().try_into().map_err(|_| {
                LedgerError::Storage(format!("malformed header hash list key {key:?}"))
            })?;
            lists.push((u32::from_le_bytes(index), bincode::deserialize(&value)?));
        }
        lists.sort_by_key(|(index, _)| *index);
        Ok(lists.into_iter().map(|(_, list)| list).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_overlay_and_commit() {
        let store = MemoryStore::new();
        let mut snapshot = store.snapshot();
        let key = StorageKey::account(&UInt160::zero());
        snapshot.put(&key, &AccountState::default()).unwrap();

        let clone = snapshot.clone();
        snapshot.delete(&key);
        assert!(clone.contains(&key));
        assert!(!snapshot.contains(&key));
        assert!(store.read_view().get(&key.to_bytes()).is_none());

        let mut clone = clone;
        clone.commit(&store).unwrap();
        assert!(!clone.has_changes());
        assert!(store.snapshot().contains(&key));
    }

    #[test]
    fn test_get_and_change() {
        let store = MemoryStore::new();
        let mut snapshot = store.snapshot();
        let account = UInt160::from_array([4u8; 20]);
        let asset = UInt256::from_array([5u8; 32]);
        let key = StorageKey::account(&account);
        for _ in 0..3 {
            snapshot
                .get_and_change(&key, || AccountState::new(account), |state| {
                    state.credit(asset, Fixed8::ONE)
                })
                .unwrap();
        }
        assert_eq!(
            snapshot.balance(&account, &asset).unwrap(),
            Fixed8::from_units(3).unwrap()
        );
    }

    #[test]
    fn test_find_strips_prefix_and_honours_deletes() {
        let store = MemoryStore::new();
        let mut snapshot = store.snapshot();
        snapshot.put_raw(&StorageKey::header_hash_list(1), vec![1]);
        snapshot.put_raw(&StorageKey::header_hash_list(0), vec![0]);
        snapshot.commit(&store).unwrap();

        let mut snapshot = store.snapshot();
        snapshot.delete(&StorageKey::header_hash_list(1));
        snapshot.put_raw(&StorageKey::header_hash_list(2), vec![2]);
        let found = snapshot.find(Table::HeaderHashList);
        assert_eq!(
            found,
            vec![
                (0u32.to_le_bytes().to_vec(), vec![0]),
                (2u32.to_le_bytes().to_vec(), vec![2]),
            ]
        );
    }
}
