//! Starts and updates app chains as the root chain registers them.

use crate::registry::ChainRegistry;
use crate::system::{stop_chain, ChainCollaborators, ChainSystem, StoreFactory};
use appchain_config::ProtocolSettings;
use appchain_core::{KeyPair, PublicKey, UInt256};
use appchain_ledger::{AppChainNotification, AppChainState};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Starts, updates and stops app chain instances on behalf of an
/// [`AppChainManager`].
pub trait AppChainLauncher: Send + Sync {
    /// A new app chain was registered on the root chain.
    fn launch(&self, state: AppChainState);

    fn change_validators(&self, chain_hash: UInt256, validators: Vec<PublicKey>);

    fn change_seed_list(&self, chain_hash: UInt256, seed_list: Vec<String>);

    fn stop(&self, chain_hash: UInt256);
}

/// Feeds root chain notifications to a launcher.
///
/// Subscribes to the registry's event bus when built, so no notification
/// published after construction is missed.
pub struct AppChainManager {
    launcher: Arc<dyn AppChainLauncher>,
    events: broadcast::Receiver<AppChainNotification>,
    launched: HashSet<UInt256>,
}

impl AppChainManager {
    pub fn new(registry: &ChainRegistry, launcher: Arc<dyn AppChainLauncher>) -> Self {
        Self {
            launcher,
            events: registry.event_bus().subscribe(),
            launched: HashSet::new(),
        }
    }

    /// Handles notifications until cancelled, then stops every chain it
    /// launched.
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            let notification = tokio::select! {
                _ = cancel.cancelled() => break,
                received = self.events.recv() => match received {
                    Ok(notification) => notification,
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "app chain notifications dropped");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
            };
            self.handle(notification);
        }
        for chain_hash in self.launched.drain() {
            self.launcher.stop(chain_hash);
        }
        debug!("app chain manager stopped");
    }

    pub fn handle(&mut self, notification: AppChainNotification) {
        info!(
            chain = %notification.chain_hash(),
            kind = notification.kind(),
            "app chain notification"
        );
        match notification {
            AppChainNotification::Create(state) => {
                if self.launched.insert(state.hash) {
                    self.launcher.launch(state);
                }
            }
            AppChainNotification::ChangeValidators {
                chain_hash,
                validators,
            } => self.launcher.change_validators(chain_hash, validators),
            AppChainNotification::ChangeSeedList {
                chain_hash,
                seed_list,
            } => self.launcher.change_seed_list(chain_hash, seed_list),
        }
    }
}

/// Launcher that runs each app chain as a [`ChainSystem`] in this process.
pub struct SystemLauncher {
    registry: Arc<ChainRegistry>,
    template: ProtocolSettings,
    stores: StoreFactory,
    key: Option<KeyPair>,
    collaborators: ChainCollaborators,
    /// Chains whose start is still in flight.
    pending: Arc<Mutex<HashSet<UInt256>>>,
}

impl SystemLauncher {
    /// `template` supplies timing and limits; identity, validators and
    /// seeds come from each chain's registration.
    pub fn new(
        registry: Arc<ChainRegistry>,
        template: ProtocolSettings,
        stores: StoreFactory,
        key: Option<KeyPair>,
        collaborators: ChainCollaborators,
    ) -> Self {
        Self {
            registry,
            template,
            stores,
            key,
            collaborators,
            pending: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Settings for the app chain registered as `state`.
    pub fn settings_for(&self, state: &AppChainState) -> ProtocolSettings {
        let mut prefix = [0u8; 4];
        prefix.copy_from_slice(&state.hash.as_bytes()[..4]);
        ProtocolSettings {
            magic: self.template.magic ^ u32::from_le_bytes(prefix),
            chain_hash: state.hash,
            name: state.name.clone(),
            standby_validators: state.standby_validators.clone(),
            seed_list: state.seed_list.clone(),
            ..self.template.clone()
        }
    }
}

impl AppChainLauncher for SystemLauncher {
    fn launch(&self, state: AppChainState) {
        let chain_hash = state.hash;
        if self.registry.contains(&chain_hash) || !self.pending.lock().insert(chain_hash) {
            debug!(chain = %chain_hash, "app chain already running");
            return;
        }
        let settings = self.settings_for(&state);
        let store = (self.stores)(&chain_hash);
        let key = self.key.clone();
        let collaborators = self.collaborators.clone();
        let registry = self.registry.clone();
        let pending = self.pending.clone();
        tokio::spawn(async move {
            let name = settings.name.clone();
            let started = ChainSystem::start(settings, store, key, collaborators, &registry).await;
            pending.lock().remove(&chain_hash);
            if let Err(e) = started {
                error!(chain = %chain_hash, name = %name, error = %format!("{e:#}"), "app chain failed to start");
            }
        });
    }

    fn change_validators(&self, chain_hash: UInt256, validators: Vec<PublicKey>) {
        let Some(system) = self.registry.get(&chain_hash) else {
            debug!(chain = %chain_hash, "validator change for a chain not running here");
            return;
        };
        let is_member = self
            .key
            .as_ref()
            .is_some_and(|key| validators.contains(key.public_key()));
        if is_member && system.start_consensus() {
            info!(chain = %chain_hash, "joined app chain validators");
        }
    }

    fn change_seed_list(&self, chain_hash: UInt256, seed_list: Vec<String>) {
        if let Some(system) = self.registry.get(&chain_hash) {
            system.connect_seeds(&seed_list);
        }
    }

    fn stop(&self, chain_hash: UInt256) {
        let registry = self.registry.clone();
        tokio::spawn(async move {
            if let Err(e) = stop_chain(&registry, &chain_hash).await {
                debug!(chain = %chain_hash, error = %e, "app chain not stopped");
            }
        });
    }
}
