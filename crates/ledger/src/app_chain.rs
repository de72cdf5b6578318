//! App chain registry state changes.
//!
//! Scripts that register an app chain or change its validators or seed list
//! raise notifications. The persistor applies them to the `AppChain` table
//! as part of the block and queues them; the blockchain actor publishes the
//! queue once the block is committed.

use crate::state::AppChainState;
use crate::store::{Snapshot, StorageKey};
use crate::LedgerResult;
use appchain_core::{PublicKey, UInt256};
use tracing::warn;

/// System call that replaces a chain's validator set.
pub const CHANGE_VALIDATORS_METHOD: &str = "AppChain.ChangeValidators";

/// System call that replaces a chain's seed list.
pub const CHANGE_SEED_LIST_METHOD: &str = "AppChain.ChangeSeedList";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppChainNotification {
    Create(AppChainState),
    ChangeValidators {
        chain_hash: UInt256,
        validators: Vec<PublicKey>,
    },
    ChangeSeedList {
        chain_hash: UInt256,
        seed_list: Vec<String>,
    },
}

impl AppChainNotification {
    pub fn chain_hash(&self) -> UInt256 {
        match self {
            Self::Create(state) => state.hash,
            Self::ChangeValidators { chain_hash, .. } | Self::ChangeSeedList { chain_hash, .. } => {
                *chain_hash
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Create(_) => "Create",
            Self::ChangeValidators { .. } => "ChangeValidators",
            Self::ChangeSeedList { .. } => "ChangeSeedList",
        }
    }

    /// Writes the change into `snapshot`. Changes to an unknown chain are
    /// ignored.
    pub fn apply(&self, snapshot: &mut Snapshot, timestamp: u32) -> LedgerResult<()> {
        match self {
            Self::Create(state) => {
                let mut state = state.clone();
                state.register_time = timestamp;
                state.last_modified = timestamp;
                snapshot.put_app_chain(&state)
            }
            Self::ChangeValidators {
                chain_hash,
                validators,
            } => {
                let Some(mut state) = snapshot.get_app_chain(chain_hash)? else {
                    warn!(chain = %chain_hash, "validator change for unknown app chain");
                    return Ok(());
                };
                let mut validators = validators.clone();
                validators.sort();
                state.standby_validators = validators;
                state.last_modified = timestamp;
                snapshot.put(&StorageKey::app_chain(chain_hash), &state)
            }
            Self::ChangeSeedList {
                chain_hash,
                seed_list,
            } => {
                let Some(mut state) = snapshot.get_app_chain(chain_hash)? else {
                    warn!(chain = %chain_hash, "seed list change for unknown app chain");
                    return Ok(());
                };
                state.seed_list = seed_list.clone();
                state.last_modified = timestamp;
                snapshot.put(&StorageKey::app_chain(chain_hash), &state)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, Store};
    use appchain_core::{sha256, KeyPair};

    fn key(seed: u8) -> PublicKey {
        KeyPair::from_private_key(&sha256(&[seed]))
            .unwrap()
            .public_key()
            .clone()
    }

    fn chain(hash: UInt256) -> AppChainState {
        AppChainState {
            hash,
            name: "game".into(),
            owner: key(0),
            seed_list: vec!["127.0.0.1:20333".into()],
            standby_validators: vec![key(1)],
            register_time: 0,
            last_modified: 0,
        }
    }

    #[test]
    fn test_apply_notifications() {
        let store = MemoryStore::new();
        let mut snapshot = store.snapshot();
        let hash = UInt256::from_array([7u8; 32]);

        AppChainNotification::Create(chain(hash))
            .apply(&mut snapshot, 100)
            .unwrap();
        let created = snapshot.get_app_chain(&hash).unwrap().unwrap();
        assert_eq!(created.register_time, 100);

        let validators = vec![key(3), key(2)];
        AppChainNotification::ChangeValidators {
            chain_hash: hash,
            validators: validators.clone(),
        }
        .apply(&mut snapshot, 200)
        .unwrap();
        let changed = snapshot.get_app_chain(&hash).unwrap().unwrap();
        let mut sorted = validators;
        sorted.sort();
        assert_eq!(changed.standby_validators, sorted);
        assert_eq!(changed.register_time, 100);
        assert_eq!(changed.last_modified, 200);

        AppChainNotification::ChangeSeedList {
            chain_hash: UInt256::zero(),
            seed_list: Vec::new(),
        }
        .apply(&mut snapshot, 300)
        .unwrap();
        assert!(snapshot.get_app_chain(&UInt256::zero()).unwrap().is_none());
        assert_eq!(snapshot.app_chains().unwrap().len(), 1);
    }
}
