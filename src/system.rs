//! Actor wiring for one chain.
//!
//! `ChainSystem::start` creates every mailbox before spawning anything, so
//! each actor is handed the senders of the actors it talks to up front.
//! Spawn order then follows the startup dependencies: the persistor must be
//! running before the blockchain persists genesis, and consensus starts last,
//! once the ledger can answer it.

use crate::registry::ChainRegistry;
use crate::{NodeError, NodeResult};
use anyhow::Context;
use appchain_config::ProtocolSettings;
use appchain_consensus::{ConsensusActor, ConsensusCommand};
use appchain_core::{KeyPair, UInt256};
use appchain_io::{MailboxSender, PriorityMailbox};
use appchain_ledger::{
    AllowAllPolicy, BlockPersistor, Blockchain, BlockchainHandle, Chain, LedgerEvent, MemoryPool,
    NoopExecutor, PolicyPlugin, ScriptExecutor, Store,
};
use appchain_network::{listen, LocalNode, LocalNodeHandle, TaskCommand, TaskManager};
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument, Span};

/// Opens the store for a chain, keyed by its chain hash.
pub type StoreFactory = Arc<dyn Fn(&UInt256) -> Arc<dyn Store> + Send + Sync>;

/// Pluggable pieces a chain is built with.
#[derive(Clone)]
pub struct ChainCollaborators {
    pub executor: Arc<dyn ScriptExecutor>,
    pub policy: Arc<dyn PolicyPlugin>,
}

impl Default for ChainCollaborators {
    fn default() -> Self {
        Self {
            executor: Arc::new(NoopExecutor),
            policy: Arc::new(AllowAllPolicy),
        }
    }
}

/// The running actors of one chain.
pub struct ChainSystem {
    chain: Arc<Chain>,
    blockchain: BlockchainHandle,
    local_node: LocalNodeHandle,
    task_manager: MailboxSender<TaskCommand>,
    consensus: Mutex<Option<MailboxSender<ConsensusCommand>>>,
    key: Option<KeyPair>,
    span: Span,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for ChainSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainSystem")
            .field("name", &self.name())
            .field("chain_hash", &self.chain_hash())
            .field("height", &self.chain.height())
            .field("consensus", &self.is_consensus_running())
            .finish_non_exhaustive()
    }
}

impl ChainSystem {
    /// Starts every actor of the chain described by `settings` and adds it
    /// to `registry`.
    ///
    /// Returns once genesis is persisted (on an empty store) and the actors
    /// are accepting messages. When `key` belongs to a current validator the
    /// consensus actor is started as well. For the root chain, committed app
    /// chain notifications are forwarded to the registry's event bus.
    pub async fn start(
        settings: ProtocolSettings,
        store: Arc<dyn Store>,
        key: Option<KeyPair>,
        collaborators: ChainCollaborators,
        registry: &Arc<ChainRegistry>,
    ) -> anyhow::Result<Arc<Self>> {
        settings
            .validate()
            .with_context(|| format!("invalid settings for chain {}", settings.name))?;
        let settings = Arc::new(settings);
        let span = info_span!("chain", hash = %settings.chain_hash, name = %settings.name);
        let mempool = Arc::new(MemoryPool::with_capacity(
            settings.memory_pool_max_transactions,
        ));
        let chain = Arc::new(
            Chain::open(
                settings.clone(),
                store,
                mempool,
                collaborators.executor,
                collaborators.policy,
            )
            .with_context(|| format!("cannot open ledger of chain {}", settings.name))?,
        );

        let (persistor_mailbox, persistor_sender) = PriorityMailbox::new();
        let (blockchain_mailbox, blockchain_sender) = PriorityMailbox::new();
        let (task_mailbox, task_sender) = PriorityMailbox::new();
        let (local_mailbox, local_sender) = PriorityMailbox::new();
        let blockchain = BlockchainHandle::new(blockchain_sender.clone());
        let local_node = LocalNodeHandle::new(local_sender);

        let system = Arc::new(Self {
            chain: chain.clone(),
            blockchain: blockchain.clone(),
            local_node: local_node.clone(),
            task_manager: task_sender.clone(),
            consensus: Mutex::new(None),
            key,
            span,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        });

        let persistor = BlockPersistor::new(chain.clone(), persistor_mailbox, blockchain_sender)
            .context("cannot start block persistor")?;
        system.spawn(persistor.run(system.cancel.clone()));

        let mut actor = Blockchain::new(
            chain.clone(),
            blockchain_mailbox,
            persistor_sender,
            Arc::new(local_node.clone()),
        );
        let initialized = actor.initialize().instrument(system.span.clone()).await;
        if let Err(e) = initialized {
            system.cancel.cancel();
            return Err(e).context("genesis rendezvous failed");
        }
        system.spawn(actor.run(system.cancel.clone()));

        system.spawn(TaskManager::new(chain.clone(), task_mailbox).run(system.cancel.clone()));
        let node = LocalNode::new(chain.clone(), local_mailbox, blockchain.clone(), task_sender);
        system.spawn(node.run(system.cancel.clone()));

        if settings.is_root() {
            let events = match blockchain.subscribe() {
                Ok(events) => events,
                Err(e) => {
                    system.cancel.cancel();
                    return Err(e).context("cannot subscribe to root chain events");
                }
            };
            system.spawn(forward_app_chain_events(
                events,
                registry.clone(),
                system.cancel.clone(),
            ));
        }

        if system.key_is_validator() {
            system.start_consensus();
        }
        system.connect_seeds(&settings.seed_list);

        if let Err(e) = registry.register(system.clone()) {
            system.cancel.cancel();
            return Err(e.into());
        }
        system.span.in_scope(|| {
            info!(
                height = chain.height(),
                consensus = system.is_consensus_running(),
                "chain started"
            )
        });
        Ok(system)
    }

    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future.instrument(self.span.clone()));
        self.tasks.lock().push(handle);
    }

    fn key_is_validator(&self) -> bool {
        let Some(key) = &self.key else {
            return false;
        };
        match self.chain.validators() {
            Ok(validators) => validators.contains(key.public_key()),
            Err(e) => {
                self.span
                    .in_scope(|| warn!(error = %e, "cannot resolve validators"));
                false
            }
        }
    }

    /// Spawns the consensus actor unless it is already running. Returns
    /// whether consensus is running.
    ///
    /// The service sits out any round in which the node key is not among
    /// the validators.
    pub fn start_consensus(&self) -> bool {
        let Some(key) = self.key.clone() else {
            return false;
        };
        let mut consensus = self.consensus.lock();
        if consensus.is_some() {
            return true;
        }
        if self.cancel.is_cancelled() {
            return false;
        }
        let (mailbox, sender) = PriorityMailbox::new();
        let actor = ConsensusActor::new(
            self.chain.clone(),
            key,
            mailbox,
            self.blockchain.clone(),
            self.local_node.clone(),
            self.task_manager.clone(),
        );
        self.spawn(actor.run(self.cancel.clone()));
        if sender.send(ConsensusCommand::Start).is_err() {
            return false;
        }
        *consensus = Some(sender);
        true
    }

    /// Dials every seed that parses as a socket address.
    pub fn connect_seeds(&self, seeds: &[String]) {
        for seed in seeds {
            match seed.parse::<SocketAddr>() {
                Ok(address) => {
                    self.local_node.connect(address);
                }
                Err(_) => self
                    .span
                    .in_scope(|| warn!(seed = %seed, "ignoring unparsable seed address")),
            }
        }
    }

    /// Accepts peers on `address` until shutdown. Returns the bound address.
    pub async fn listen(&self, address: SocketAddr) -> anyhow::Result<SocketAddr> {
        let listener = TcpListener::bind(address)
            .await
            .with_context(|| format!("cannot listen on {address}"))?;
        let bound = listener.local_addr()?;
        self.spawn(listen(listener, self.local_node.clone(), self.cancel.clone()));
        self.span.in_scope(|| info!(address = %bound, "listening"));
        Ok(bound)
    }

    /// Stops every actor of this chain and waits for them to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.consensus.lock().take();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                if e.is_panic() {
                    self.span.in_scope(|| warn!(error = %e, "actor panicked"));
                }
            }
        }
        self.span.in_scope(|| info!("chain stopped"));
    }

    pub fn chain(&self) -> &Arc<Chain> {
        &self.chain
    }

    pub fn chain_hash(&self) -> UInt256 {
        self.chain.settings().chain_hash
    }

    pub fn name(&self) -> &str {
        &self.chain.settings().name
    }

    pub fn is_root(&self) -> bool {
        self.chain.settings().is_root()
    }

    pub fn blockchain(&self) -> &BlockchainHandle {
        &self.blockchain
    }

    pub fn local_node(&self) -> &LocalNodeHandle {
        &self.local_node
    }

    pub fn consensus(&self) -> Option<MailboxSender<ConsensusCommand>> {
        self.consensus.lock().clone()
    }

    pub fn is_consensus_running(&self) -> bool {
        self.consensus.lock().is_some()
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Stops `hash` and removes it from `registry`.
pub async fn stop_chain(registry: &ChainRegistry, hash: &UInt256) -> NodeResult<()> {
    let system = registry
        .unregister(hash)
        .ok_or(NodeError::NotRunning(*hash))?;
    system.shutdown().await;
    Ok(())
}

async fn forward_app_chain_events(
    mut events: tokio::sync::mpsc::UnboundedReceiver<LedgerEvent>,
    registry: Arc<ChainRegistry>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        if let LedgerEvent::AppChainNotify(notification) = event {
            registry.event_bus().publish(notification);
        }
    }
}
