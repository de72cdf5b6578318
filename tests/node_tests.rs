//! Chain wiring, registry and app chain lifecycle.

use appchain_config::ProtocolSettings;
use appchain_core::{
    sha256, Fixed8, KeyPair, PublicKey, RelayResultReason, Transaction, TransactionData, UInt256,
};
use appchain_ledger::{
    AppChainNotification, AppChainState, ExecutionResult, LedgerEvent, MemoryStore, ScriptExecutor,
    Snapshot, Store,
};
use appchain_node::{
    stop_chain, AppChainLauncher, AppChainManager, ChainCollaborators, ChainRegistry, ChainSystem,
    NodeError, SystemLauncher,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const REGISTER_SCRIPT: &[u8] = b"register-game-chain";

fn node_key() -> KeyPair {
    KeyPair::from_private_key(&sha256(b"node key")).unwrap()
}

fn root_settings(key: &KeyPair) -> ProtocolSettings {
    ProtocolSettings {
        standby_validators: vec![key.public_key().clone()],
        seconds_per_block: 1,
        ..ProtocolSettings::default()
    }
}

fn game_chain(key: &KeyPair) -> AppChainState {
    AppChainState {
        hash: UInt256::from_array([0x42; 32]),
        name: "game".into(),
        owner: key.public_key().clone(),
        seed_list: Vec::new(),
        standby_validators: vec![key.public_key().clone()],
        register_time: 0,
        last_modified: 0,
    }
}

/// Registers `state` whenever it runs `REGISTER_SCRIPT`.
struct RegisteringExecutor {
    state: AppChainState,
}

impl ScriptExecutor for RegisteringExecutor {
    fn execute(
        &self,
        script: &[u8],
        _transaction: &Transaction,
        _snapshot: &mut Snapshot,
        _gas_limit: Fixed8,
    ) -> ExecutionResult {
        let mut result = ExecutionResult::halt(Vec::new());
        if script == REGISTER_SCRIPT {
            result
                .app_chain_notifications
                .push(AppChainNotification::Create(self.state.clone()));
        }
        result
    }
}

#[derive(Debug, PartialEq)]
enum Launched {
    Launch(UInt256),
    Validators(UInt256, usize),
    Seeds(UInt256, Vec<String>),
    Stop(UInt256),
}

struct RecordingLauncher {
    calls: mpsc::UnboundedSender<Launched>,
}

impl AppChainLauncher for RecordingLauncher {
    fn launch(&self, state: AppChainState) {
        let _ = self.calls.send(Launched::Launch(state.hash));
    }

    fn change_validators(&self, chain_hash: UInt256, validators: Vec<PublicKey>) {
        let _ = self.calls.send(Launched::Validators(chain_hash, validators.len()));
    }

    fn change_seed_list(&self, chain_hash: UInt256, seed_list: Vec<String>) {
        let _ = self.calls.send(Launched::Seeds(chain_hash, seed_list));
    }

    fn stop(&self, chain_hash: UInt256) {
        let _ = self.calls.send(Launched::Stop(chain_hash));
    }
}

async fn next_persisted(events: &mut mpsc::UnboundedReceiver<LedgerEvent>) -> u32 {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(60), events.recv())
            .await
            .expect("timed out waiting for a block")
            .expect("ledger events closed");
        if let LedgerEvent::PersistCompleted { block } = event {
            return block.index();
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_root_chain_starts_and_registers() {
    let key = node_key();
    let registry = Arc::new(ChainRegistry::new());
    let waiter = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.wait_for(&UInt256::zero()).await })
    };

    let root = ChainSystem::start(
        root_settings(&key),
        Arc::new(MemoryStore::new()),
        Some(key),
        ChainCollaborators::default(),
        &registry,
    )
    .await
    .unwrap();
    assert!(root.is_root());
    assert!(root.is_consensus_running());
    assert_eq!(root.chain().height(), 0);

    let found = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .unwrap()
        .unwrap();
    assert!(Arc::ptr_eq(&found, &root));
    assert!(Arc::ptr_eq(&registry.root().unwrap(), &root));

    let mut events = root.blockchain().subscribe().unwrap();
    assert_eq!(next_persisted(&mut events).await, 1);

    root.shutdown().await;
    assert!(root.is_stopped());
    assert!(!root.is_consensus_running());
}

#[tokio::test]
async fn test_observer_does_not_run_consensus() {
    let validator = node_key();
    let observer = KeyPair::from_private_key(&sha256(b"observer")).unwrap();
    let registry = Arc::new(ChainRegistry::new());
    let root = ChainSystem::start(
        root_settings(&validator),
        Arc::new(MemoryStore::new()),
        Some(observer),
        ChainCollaborators::default(),
        &registry,
    )
    .await
    .unwrap();
    assert!(!root.is_consensus_running());
    assert!(root.consensus().is_none());
    root.shutdown().await;
}

#[tokio::test]
async fn test_invalid_settings_rejected() {
    let registry = Arc::new(ChainRegistry::new());
    let result = ChainSystem::start(
        ProtocolSettings::default(),
        Arc::new(MemoryStore::new()),
        None,
        ChainCollaborators::default(),
        &registry,
    )
    .await;
    assert!(result.is_err());
    assert!(registry.is_empty());
}

#[tokio::test]
#[should_panic(expected = "root chain registered twice")]
async fn test_second_root_chain_panics() {
    let key = node_key();
    let registry = Arc::new(ChainRegistry::new());
    for _ in 0..2 {
        ChainSystem::start(
            root_settings(&key),
            Arc::new(MemoryStore::new()),
            None,
            ChainCollaborators::default(),
            &registry,
        )
        .await
        .unwrap();
    }
}

#[tokio::test]
async fn test_stop_chain_unregisters() {
    let key = node_key();
    let registry = Arc::new(ChainRegistry::new());
    let root = ChainSystem::start(
        root_settings(&key),
        Arc::new(MemoryStore::new()),
        None,
        ChainCollaborators::default(),
        &registry,
    )
    .await
    .unwrap();

    stop_chain(&registry, &UInt256::zero()).await.unwrap();
    assert!(root.is_stopped());
    assert!(registry.root().is_none());
    assert!(matches!(
        stop_chain(&registry, &UInt256::zero()).await,
        Err(NodeError::NotRunning(_))
    ));
}

#[tokio::test]
async fn test_manager_forwards_notifications_to_launcher() {
    let key = node_key();
    let registry = ChainRegistry::new();
    let (calls, mut recorded) = mpsc::unbounded_channel();
    let manager = AppChainManager::new(&registry, Arc::new(RecordingLauncher { calls }));
    let cancel = CancellationToken::new();
    let running = tokio::spawn(manager.run(cancel.clone()));

    let state = game_chain(&key);
    let hash = state.hash;
    let bus = registry.event_bus();
    bus.publish(AppChainNotification::Create(state.clone()));
    bus.publish(AppChainNotification::Create(state));
    bus.publish(AppChainNotification::ChangeValidators {
        chain_hash: hash,
        validators: vec![key.public_key().clone()],
    });
    bus.publish(AppChainNotification::ChangeSeedList {
        chain_hash: hash,
        seed_list: vec!["10.0.0.1:20333".into()],
    });

    assert_eq!(recorded.recv().await, Some(Launched::Launch(hash)));
    assert_eq!(recorded.recv().await, Some(Launched::Validators(hash, 1)));
    assert_eq!(
        recorded.recv().await,
        Some(Launched::Seeds(hash, vec!["10.0.0.1:20333".into()]))
    );

    cancel.cancel();
    running.await.unwrap();
    assert_eq!(recorded.recv().await, Some(Launched::Stop(hash)));
}

#[tokio::test(start_paused = true)]
async fn test_registration_on_root_chain_launches_app_chain() {
    let key = node_key();
    let state = game_chain(&key);
    let registry = Arc::new(ChainRegistry::new());
    let template = root_settings(&key);

    let launcher = SystemLauncher::new(
        registry.clone(),
        template.clone(),
        Arc::new(|_: &UInt256| Arc::new(MemoryStore::new()) as Arc<dyn Store>),
        Some(key.clone()),
        ChainCollaborators::default(),
    );
    let app_settings = launcher.settings_for(&state);
    assert_eq!(app_settings.chain_hash, state.hash);
    assert_ne!(app_settings.magic, template.magic);

    let manager = AppChainManager::new(&registry, Arc::new(launcher));
    let cancel = CancellationToken::new();
    tokio::spawn(manager.run(cancel.clone()));

    let collaborators = ChainCollaborators {
        executor: Arc::new(RegisteringExecutor {
            state: state.clone(),
        }),
        ..ChainCollaborators::default()
    };
    let root = ChainSystem::start(
        template,
        Arc::new(MemoryStore::new()),
        Some(key.clone()),
        collaborators,
        &registry,
    )
    .await
    .unwrap();

    let register = Transaction::new(
        1,
        key.script_hash(),
        TransactionData::Invocation {
            script: REGISTER_SCRIPT.to_vec(),
            gas_price: Fixed8::ZERO,
            gas_limit: Fixed8::ZERO,
        },
        Vec::new(),
    )
    .sign(&key);
    assert_eq!(
        root.blockchain().relay_transaction(register).await,
        RelayResultReason::Succeed
    );

    let app = tokio::time::timeout(Duration::from_secs(60), registry.wait_for(&state.hash))
        .await
        .expect("app chain was not launched");
    assert!(!app.is_root());
    assert_eq!(app.name(), "game");
    assert!(app.is_consensus_running());
    let recorded = root.chain().snapshot().get_app_chain(&state.hash).unwrap();
    assert_eq!(recorded.map(|chain| chain.name), Some("game".to_string()));

    let mut events = app.blockchain().subscribe().unwrap();
    assert_eq!(next_persisted(&mut events).await, 1);

    cancel.cancel();
    app.shutdown().await;
    root.shutdown().await;
}
