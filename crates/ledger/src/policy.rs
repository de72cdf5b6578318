//! Transaction policy hook.

use appchain_core::{Fixed8, Transaction, UInt160};
use std::collections::HashSet;

/// Local admission policy consulted by the memory pool and by consensus.
pub trait PolicyPlugin: Send + Sync {
    /// Whether the node accepts `tx` at all.
    fn check_policy(&self, _tx: &Transaction) -> bool {
        true
    }

    /// Narrows the candidate list for the next block. The input is sorted
    /// by fee, highest first.
    fn filter_for_block(&self, transactions: Vec<Transaction>) -> Vec<Transaction> {
        transactions
    }
}

/// Accepts everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAllPolicy;

impl PolicyPlugin for AllowAllPolicy {}

/// Blocks listed accounts and caps block content.
#[derive(Debug, Clone)]
pub struct SimplePolicy {
    pub max_transactions_per_block: usize,
    pub max_free_transactions_per_block: usize,
    pub blocked_accounts: HashSet<UInt160>,
}

impl Default for SimplePolicy {
    fn default() -> Self {
        Self {
            max_transactions_per_block: 500,
            max_free_transactions_per_block: 20,
            blocked_accounts: HashSet::new(),
        }
    }
}

impl PolicyPlugin for SimplePolicy {
    fn check_policy(&self, tx: &Transaction) -> bool {
        !self.blocked_accounts.contains(tx.account())
    }

    fn filter_for_block(&self, transactions: Vec<Transaction>) -> Vec<Transaction> {
        let mut free = 0;
        transactions
            .into_iter()
            .filter(|tx| self.check_policy(tx))
            .filter(|tx| {
                if tx.network_fee() > Fixed8::ZERO {
                    return true;
                }
                free += 1;
                free <= self.max_free_transactions_per_block
            })
            .take(self.max_transactions_per_block)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use appchain_core::{TransactionData, UInt256};

    fn tx(nonce: u32, account: u8, gas_price: i64) -> Transaction {
        let data = if gas_price > 0 {
            TransactionData::Invocation {
                script: vec![0x51],
                gas_price: Fixed8::from_raw(gas_price),
                gas_limit: Fixed8::ONE,
            }
        } else {
            TransactionData::Contract {
                asset_id: UInt256::zero(),
                to: UInt160::zero(),
                value: Fixed8::ONE,
            }
        };
        Transaction::new(nonce, UInt160::from_array([account; 20]), data, Vec::new())
    }

    #[test]
    fn test_simple_policy_limits_free_transactions() {
        let policy = SimplePolicy {
            max_transactions_per_block: 3,
            max_free_transactions_per_block: 1,
            blocked_accounts: HashSet::from([UInt160::from_array([9u8; 20])]),
        };
        assert!(!policy.check_policy(&tx(0, 9, 10)));

        let selected = policy.filter_for_block(vec![
            tx(1, 1, 50),
            tx(2, 9, 40),
            tx(3, 1, 0),
            tx(4, 1, 0),
            tx(5, 1, 10),
            tx(6, 1, 5),
        ]);
        let nonces: Vec<u32> = selected.iter().map(Transaction::nonce).collect();
        assert_eq!(nonces, vec![1, 3, 5]);
    }
}
