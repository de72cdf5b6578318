//! Registry of the chains running in this process.
//!
//! Replaces process-wide lookups: a chain's actors find the root chain, and
//! managers find app chains, only through the registry they were given.

use crate::event_bus::AppChainEventBus;
use crate::system::ChainSystem;
use crate::{NodeError, NodeResult};
use appchain_core::UInt256;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

pub struct ChainRegistry {
    chains: RwLock<HashMap<UInt256, Arc<ChainSystem>>>,
    /// Bumped on every registration change.
    changes: watch::Sender<u64>,
    event_bus: AppChainEventBus,
}

impl ChainRegistry {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            chains: RwLock::new(HashMap::new()),
            changes,
            event_bus: AppChainEventBus::new(),
        }
    }

    pub fn event_bus(&self) -> &AppChainEventBus {
        &self.event_bus
    }

    /// Adds a running chain.
    ///
    /// # Panics
    ///
    /// There is exactly one root chain per process; registering a second
    /// one panics.
    pub fn register(&self, system: Arc<ChainSystem>) -> NodeResult<()> {
        let hash = system.chain_hash();
        {
            let mut chains = self.chains.write();
            if chains.contains_key(&hash) {
                if system.is_root() {
                    panic!("root chain registered twice");
                }
                return Err(NodeError::AlreadyRunning(hash));
            }
            chains.insert(hash, system.clone());
        }
        info!(chain = %hash, name = %system.name(), "chain registered");
        self.changes.send_modify(|version| *version += 1);
        Ok(())
    }

    pub fn unregister(&self, hash: &UInt256) -> Option<Arc<ChainSystem>> {
        let removed = self.chains.write().remove(hash);
        if removed.is_some() {
            info!(chain = %hash, "chain unregistered");
            self.changes.send_modify(|version| *version += 1);
        }
        removed
    }

    pub fn get(&self, hash: &UInt256) -> Option<Arc<ChainSystem>> {
        self.chains.read().get(hash).cloned()
    }

    pub fn root(&self) -> Option<Arc<ChainSystem>> {
        self.get(&UInt256::zero())
    }

    pub fn contains(&self, hash: &UInt256) -> bool {
        self.chains.read().contains_key(hash)
    }

    pub fn chain_hashes(&self) -> Vec<UInt256> {
        self.chains.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.chains.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.read().is_empty()
    }

    /// Resolves once a chain with `hash` is registered.
    pub async fn wait_for(&self, hash: &UInt256) -> Arc<ChainSystem> {
        let mut changes = self.changes.subscribe();
        loop {
            if let Some(system) = self.get(hash) {
                return system;
            }
            // The sender lives in `self`, so this only returns on a change.
            let _ = changes.changed().await;
        }
    }
}

impl Default for ChainRegistry {
    fn default() -> Self {
        Self::new()
    }
}
