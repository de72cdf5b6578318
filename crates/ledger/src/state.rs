//! Ledger state records.
//!
//! Records that hold only plain data are stored with bincode; records that
//! embed wire types (transactions, headers) use the wire encoding.

use appchain_core::{Fixed8, PublicKey, Transaction, UInt160, UInt256};
use appchain_io::{BinaryWriter, IoResult, MemoryReader, Serializable};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Balances held by one script hash.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    pub script_hash: UInt160,
    pub balances: BTreeMap<UInt256, Fixed8>,
}

impl AccountState {
    pub fn new(script_hash: UInt160) -> Self {
        Self {
            script_hash,
            balances: BTreeMap::new(),
        }
    }

    pub fn balance(&self, asset_id: &UInt256) -> Fixed8 {
        self.balances.get(asset_id).copied().unwrap_or(Fixed8::ZERO)
    }

    pub fn credit(&mut self, asset_id: UInt256, value: Fixed8) {
        let entry = self.balances.entry(asset_id).or_insert(Fixed8::ZERO);
        *entry = *entry + value;
    }

    /// Debits `value`, returning false and leaving the balance untouched if
    /// it is insufficient.
    pub fn debit(&mut self, asset_id: UInt256, value: Fixed8) -> bool {
        let current = self.balance(&asset_id);
        match current.checked_sub(value) {
            Some(remaining) if !remaining.is_negative() => {
                if remaining == Fixed8::ZERO {
                    self.balances.remove(&asset_id);
                } else {
                    self.balances.insert(asset_id, remaining);
                }
                true
            }
            _ => false,
        }
    }
}

/// A registered asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetState {
    pub asset_id: UInt256,
    pub name: String,
    pub precision: u8,
    /// Maximum supply.
    pub amount: Fixed8,
    pub issued: Fixed8,
    /// Only this account may issue more.
    pub owner: UInt160,
    pub block_index: u32,
}

/// A registered app chain, as recorded on the root chain and cached by the
/// app chain itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppChainState {
    pub hash: UInt256,
    pub name: String,
    pub owner: PublicKey,
    pub seed_list: Vec<String>,
    pub standby_validators: Vec<PublicKey>,
    /// Block timestamp of registration.
    pub register_time: u32,
    /// Block timestamp of the last validator or seed list change.
    pub last_modified: u32,
}

/// Pointer to a block or header by hash and height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashIndexState {
    pub hash: UInt256,
    pub index: u32,
}

/// One checkpoint of the header hash list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderHashList {
    pub hashes: Vec<UInt256>,
}

/// A persisted transaction and the height of its block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    pub block_index: u32,
    pub transaction: Transaction,
}

impl Serializable for TransactionRecord {
    fn size(&self) -> usize {
        4 + self.transaction.size()
    }

    fn serialize(&self, writer: &mut BinaryWriter) {
        writer.write_u32(self.block_index);
        writer.write_serializable(&self.transaction);
    }

    fn deserialize(reader: &mut MemoryReader) -> IoResult<Self> {
        Ok(Self {
            block_index: reader.read_u32()?,
            transaction: reader.read_serializable()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_debit_and_credit() {
        let asset = UInt256::from_array([1u8; 32]);
        let mut account = AccountState::new(UInt160::zero());
        account.credit(asset, Fixed8::from_raw(500));
        assert!(!account.debit(asset, Fixed8::from_raw(501)));
        assert_eq!(account.balance(&asset), Fixed8::from_raw(500));
        assert!(account.debit(asset, Fixed8::from_raw(500)));
        assert!(account.balances.is_empty());
    }

    #[test]
    fn test_bincode_records() {
        let state = HashIndexState {
            hash: UInt256::from_array([3u8; 32]),
            index: 9,
        };
        let bytes = bincode::serialize(&state).unwrap();
        let decoded: HashIndexState = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, state);
    }
}
