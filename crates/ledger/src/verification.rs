//! Transaction verification against ledger state.
//!
//! `others` are transactions that will be applied alongside the one being
//! verified (the rest of the pool, or the rest of a proposed block); their
//! debits and issues count against the same balances and supplies.

use crate::store::Snapshot;
use crate::{LedgerError, LedgerResult};
use appchain_core::{Fixed8, Transaction, TransactionData, UInt160, UInt256};

/// Amounts a transaction takes out of its account: `(asset, value)`.
pub fn debits(tx: &Transaction, utility_token: &UInt256) -> Vec<(UInt256, Fixed8)> {
    match tx.data() {
        TransactionData::Contract {
            asset_id, value, ..
        } => vec![(*asset_id, *value)],
        TransactionData::Invocation { .. } => vec![(*utility_token, tx.network_fee())],
        _ => Vec::new(),
    }
}

fn pending_debit(
    others: &[Transaction],
    exclude: &UInt256,
    account: &UInt160,
    asset_id: &UInt256,
    utility_token: &UInt256,
) -> Fixed8 {
    others
        .iter()
        .filter(|other| other.hash() != *exclude && other.account() == account)
        .flat_map(|other| debits(other, utility_token))
        .filter(|(asset, _)| asset == asset_id)
        .map(|(_, value)| value)
        .sum()
}

fn pending_issue(others: &[Transaction], exclude: &UInt256, asset_id: &UInt256) -> Fixed8 {
    others
        .iter()
        .filter(|other| other.hash() != *exclude)
        .filter_map(|other| match other.data() {
            TransactionData::Issue {
                asset_id: issued,
                value,
                ..
            } if issued == asset_id => Some(*value),
            _ => None,
        })
        .sum()
}

fn invalid(tx: &Transaction, reason: &str) -> LedgerError {
    LedgerError::invalid_transaction(tx.hash(), reason)
}

/// Full verification of a non-miner transaction: witnesses, amounts,
/// asset rules and balances.
pub fn verify_transaction(
    tx: &Transaction,
    snapshot: &Snapshot,
    others: &[Transaction],
    utility_token: &UInt256,
) -> LedgerResult<()> {
    match tx.data() {
        TransactionData::Miner { outputs } => {
            if outputs
                .iter()
                .any(|output| output.value.is_negative() || output.asset_id != *utility_token)
            {
                return Err(invalid(tx, "miner outputs must be non-negative utility token"));
            }
            return Ok(());
        }
        TransactionData::Register { .. } => {
            return Err(invalid(tx, "asset registration is only valid in genesis"));
        }
        TransactionData::Issue {
            asset_id, value, ..
        } => {
            if *value <= Fixed8::ZERO {
                return Err(invalid(tx, "issue value must be positive"));
            }
            let asset = snapshot
                .get_asset(asset_id)?
                .ok_or_else(|| invalid(tx, "unknown asset"))?;
            if asset.owner != *tx.account() {
                return Err(invalid(tx, "only the asset owner may issue"));
            }
            let total = asset
                .issued
                .checked_add(*value)
                .and_then(|total| total.checked_add(pending_issue(others, &tx.hash(), asset_id)))
                .ok_or_else(|| invalid(tx, "issue overflow"))?;
            if total > asset.amount {
                return Err(invalid(tx, "issue exceeds asset supply"));
            }
        }
        TransactionData::Contract {
            asset_id, value, ..
        } => {
            if *value <= Fixed8::ZERO {
                return Err(invalid(tx, "transfer value must be positive"));
            }
            if snapshot.get_asset(asset_id)?.is_none() {
                return Err(invalid(tx, "unknown asset"));
            }
        }
        TransactionData::Invocation {
            gas_price,
            gas_limit,
            ..
        } => {
            if gas_price.is_negative() || gas_limit.is_negative() {
                return Err(invalid(tx, "negative gas"));
            }
            if gas_price.checked_mul(*gas_limit).is_none() {
                return Err(invalid(tx, "fee overflow"));
            }
        }
    }

    for (asset_id, value) in debits(tx, utility_token) {
        if value == Fixed8::ZERO {
            continue;
        }
        let available = snapshot.balance(tx.account(), &asset_id)?;
        let required = value
            .checked_add(pending_debit(
                others,
                &tx.hash(),
                tx.account(),
                &asset_id,
                utility_token,
            ))
            .ok_or_else(|| invalid(tx, "debit overflow"))?;
        if required > available {
            return Err(LedgerError::InsufficientBalance {
                account: *tx.account(),
                required: required.raw(),
                available: available.raw(),
            });
        }
    }

    if !tx.verify_witnesses() {
        return Err(invalid(tx, "witness verification failed"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{AccountState, AssetState};
    use crate::store::{MemoryStore, StorageKey, Store};
    use appchain_core::{sha256, KeyPair};

    const TOKEN: UInt256 = UInt256::from_array([0x11; 32]);

    struct Fixture {
        store: MemoryStore,
        key: KeyPair,
    }

    impl Fixture {
        fn new(balance: i64) -> Self {
            let store = MemoryStore::new();
            let key = KeyPair::from_private_key(&sha256(b"verify")).unwrap();
            let mut snapshot = store.snapshot();
            snapshot
                .put(
                    &StorageKey::asset(&TOKEN),
                    &AssetState {
                        asset_id: TOKEN,
                        name: "token".into(),
                        precision: 8,
                        amount: Fixed8::from_units(1000).unwrap(),
                        issued: Fixed8::from_units(100).unwrap(),
                        owner: key.script_hash(),
                        block_index: 0,
                    },
                )
                .unwrap();
            let mut account = AccountState::new(key.script_hash());
            account.credit(TOKEN, Fixed8::from_units(balance).unwrap());
            snapshot
                .put(&StorageKey::account(&key.script_hash()), &account)
                .unwrap();
            snapshot.commit(&store).unwrap();
            Self { store, key }
        }

        fn transfer(&self, nonce: u32, units: i64) -> Transaction {
            Transaction::new(
                nonce,
                self.key.script_hash(),
                TransactionData::Contract {
                    asset_id: TOKEN,
                    to: UInt160::zero(),
                    value: Fixed8::from_units(units).unwrap(),
                },
                Vec::new(),
            )
            .sign(&self.key)
        }
    }

    #[test]
    fn test_transfer_checks_balance_with_pending() {
        let fixture = Fixture::new(10);
        let snapshot = fixture.store.snapshot();
        let tx = fixture.transfer(1, 6);
        assert!(verify_transaction(&tx, &snapshot, &[], &TOKEN).is_ok());

        let other = fixture.transfer(2, 5);
        let err = verify_transaction(&tx, &snapshot, &[other, tx.clone()], &TOKEN).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { .. }));
    }

    #[test]
    fn test_unsigned_and_register_rejected() {
        let fixture = Fixture::new(10);
        let snapshot = fixture.store.snapshot();
        let unsigned = fixture.transfer(1, 1).with_witnesses(Vec::new());
        assert!(verify_transaction(&unsigned, &snapshot, &[], &TOKEN).is_err());

        let register = Transaction::new(
            0,
            fixture.key.script_hash(),
            TransactionData::Register {
                name: "x".into(),
                precision: 0,
                amount: Fixed8::ONE,
                owner: fixture.key.script_hash(),
            },
            Vec::new(),
        )
        .sign(&fixture.key);
        assert!(verify_transaction(&register, &snapshot, &[], &TOKEN).is_err());
    }

    #[test]
    fn test_issue_respects_owner_and_supply() {
        let fixture = Fixture::new(0);
        let snapshot = fixture.store.snapshot();
        let issue = |nonce, units| {
            Transaction::new(
                nonce,
                fixture.key.script_hash(),
                TransactionData::Issue {
                    asset_id: TOKEN,
                    to: UInt160::zero(),
                    value: Fixed8::from_units(units).unwrap(),
                },
                Vec::new(),
            )
            .sign(&fixture.key)
        };
        assert!(verify_transaction(&issue(1, 900), &snapshot, &[], &TOKEN).is_ok());
        assert!(verify_transaction(&issue(1, 901), &snapshot, &[], &TOKEN).is_err());
        assert!(verify_transaction(&issue(1, 500), &snapshot, &[issue(2, 500)], &TOKEN).is_err());
    }
}
