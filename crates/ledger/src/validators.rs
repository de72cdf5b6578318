//! Validator-set resolution.
//!
//! The root chain always uses its configured standby validators. An app chain
//! uses the set recorded in its `AppChainState`, and a pending invocation
//! that calls `AppChain.ChangeValidators` replaces it for the block that
//! carries it.
//!
//! Detecting that call is a raw byte scan (`contains_syscall`), not a
//! disassembly: the pattern may match inside push data, and a call encoded
//! any other way is missed. Matching scripts are executed on a throwaway
//! copy of the snapshot.

use crate::app_chain::CHANGE_VALIDATORS_METHOD;
use crate::executor::{ScriptExecutor, StackItem};
use crate::store::Snapshot;
use crate::LedgerResult;
use appchain_config::ProtocolSettings;
use appchain_core::script::contains_syscall;
use appchain_core::{PublicKey, Transaction, TransactionData};
use tracing::debug;

/// Sorted validators before any pending change.
pub fn standby_validators(
    snapshot: &Snapshot,
    settings: &ProtocolSettings,
) -> LedgerResult<Vec<PublicKey>> {
    let mut validators = if settings.is_root() {
        settings.standby_validators.clone()
    } else {
        match snapshot.get_app_chain(&settings.chain_hash)? {
            Some(state) if !state.standby_validators.is_empty() => state.standby_validators,
            _ => settings.standby_validators.clone(),
        }
    };
    validators.sort();
    Ok(validators)
}

/// Reads a validator list from the top of a result stack: an array of
/// encoded public keys.
pub fn validators_from_stack(stack: &[StackItem]) -> Option<Vec<PublicKey>> {
    let StackItem::Array(items) = stack.last()? else {
        return None;
    };
    if items.is_empty() {
        return None;
    }
    let mut keys = items
        .iter()
        .map(|item| item.as_bytes().and_then(|bytes| PublicKey::from_bytes(bytes).ok()))
        .collect::<Option<Vec<_>>>()?;
    keys.sort();
    keys.dedup();
    Some(keys)
}

/// Whether `tx` is an invocation that appears to change validators.
pub fn is_change_validators(tx: &Transaction) -> bool {
    matches!(
        tx.data(),
        TransactionData::Invocation { script, .. } if contains_syscall(script, CHANGE_VALIDATORS_METHOD)
    )
}

/// Validators for the block that will contain `others`.
pub fn get_validators(
    snapshot: &Snapshot,
    settings: &ProtocolSettings,
    others: &[Transaction],
    executor: &dyn ScriptExecutor,
) -> LedgerResult<Vec<PublicKey>> {
    let mut validators = standby_validators(snapshot, settings)?;
    if settings.is_root() {
        return Ok(validators);
    }
    for tx in others.iter().filter(|tx| is_change_validators(tx)) {
        let TransactionData::Invocation {
            script, gas_limit, ..
        } = tx.data()
        else {
            continue;
        };
        let mut scratch = snapshot.clone();
        let result = executor.execute(script, tx, &mut scratch, *gas_limit);
        if !result.is_halt() {
            continue;
        }
        if let Some(keys) = validators_from_stack(&result.result_stack) {
            debug!(tx = %tx.hash(), count = keys.len(), "pending validator change");
            validators = keys;
        }
    }
    Ok(validators)
}
