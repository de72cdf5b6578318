//! Memory pool capacity boundary and re-verification.

use appchain_core::{Fixed8, RelayResultReason, Transaction, TransactionData, UInt160};
use appchain_ledger::MemoryPool;
use proptest::prelude::*;

fn invocation(nonce: u32) -> Transaction {
    Transaction::new(
        nonce,
        UInt160::zero(),
        TransactionData::Invocation {
            script: vec![0x51],
            gas_price: Fixed8::from_raw(i64::from(nonce)),
            gas_limit: Fixed8::ONE,
        },
        Vec::new(),
    )
}

#[test]
fn test_exactly_capacity_transactions_fit() {
    let capacity = 16;
    let pool = MemoryPool::with_capacity(capacity);
    for nonce in 0..capacity as u32 {
        assert_eq!(pool.try_add(invocation(nonce)), RelayResultReason::Succeed);
    }
    assert_eq!(pool.count(), capacity);

    let overflow = invocation(capacity as u32);
    assert_eq!(pool.try_add(overflow.clone()), RelayResultReason::OutOfMemory);
    assert_eq!(pool.count(), capacity);
    assert!(!pool.contains(&overflow.hash()));
}

#[test]
fn test_unverified_transactions_count_against_capacity() {
    let pool = MemoryPool::with_capacity(2);
    pool.try_add(invocation(1));
    pool.try_add(invocation(2));
    pool.invalidate_verified();
    assert_eq!(pool.unverified_count(), 2);
    assert_eq!(pool.try_add(invocation(3)), RelayResultReason::OutOfMemory);

    pool.remove_persisted([&invocation(1).hash()]);
    assert_eq!(pool.try_add(invocation(3)), RelayResultReason::Succeed);
}

proptest! {
    #[test]
    fn test_pool_never_exceeds_capacity(capacity in 1usize..32, adds in 0u32..64) {
        let pool = MemoryPool::with_capacity(capacity);
        for nonce in 0..adds {
            let expected = if (nonce as usize) < capacity {
                RelayResultReason::Succeed
            } else {
                RelayResultReason::OutOfMemory
            };
            prop_assert_eq!(pool.try_add(invocation(nonce)), expected);
        }
        prop_assert_eq!(pool.count(), (adds as usize).min(capacity));
    }

    #[test]
    fn test_reverify_partitions_unverified(keep in prop::collection::vec(any::<bool>(), 0..40)) {
        let pool = MemoryPool::with_capacity(64);
        for nonce in 0..keep.len() as u32 {
            pool.try_add(invocation(nonce));
        }
        pool.invalidate_verified();

        let outcome = pool.reverify_top_unverified(keep.len(), |tx, _| keep[tx.nonce() as usize]);
        let kept = keep.iter().filter(|keep| **keep).count();
        prop_assert_eq!(outcome.promoted.len(), kept);
        prop_assert_eq!(outcome.dropped.len(), keep.len() - kept);
        prop_assert_eq!(pool.verified_count(), kept);
        prop_assert_eq!(pool.unverified_count(), 0);
        for hash in &outcome.promoted {
            prop_assert!(pool.try_get_verified(hash).is_some());
        }
    }
}
