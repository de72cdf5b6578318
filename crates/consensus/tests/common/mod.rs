#![allow(dead_code)]

use appchain_config::ProtocolSettings;
use appchain_consensus::{ConsensusEvent, ConsensusService, ConsensusTimer};
use appchain_core::{sha256, Block, ConsensusPayload, KeyPair, UInt256};
use appchain_io::PriorityMailbox;
use appchain_ledger::{
    AllowAllPolicy, BlockPersistor, Blockchain, BlockchainHandle, Chain, MemoryPool, MemoryStore,
    NoopExecutor, NullRelay,
};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub fn validator_keys(count: u8) -> Vec<KeyPair> {
    let mut keys: Vec<KeyPair> = (0..count)
        .map(|i| KeyPair::from_private_key(&sha256(&[0xC0, i])).unwrap())
        .collect();
    keys.sort_by(|a, b| a.public_key().cmp(b.public_key()));
    keys
}

pub fn settings(keys: &[KeyPair]) -> ProtocolSettings {
    ProtocolSettings {
        standby_validators: keys.iter().map(|key| key.public_key().clone()).collect(),
        seconds_per_block: 1,
        ..ProtocolSettings::default()
    }
}

pub fn open_chain(settings: &ProtocolSettings) -> Arc<Chain> {
    let settings = Arc::new(settings.clone());
    Arc::new(
        Chain::open(
            settings.clone(),
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryPool::with_capacity(settings.memory_pool_max_transactions)),
            Arc::new(NoopExecutor),
            Arc::new(AllowAllPolicy),
        )
        .unwrap(),
    )
}

/// Persistor and blockchain actors over `chain`, with genesis persisted.
pub async fn start_ledger(chain: &Arc<Chain>, cancel: &CancellationToken) -> BlockchainHandle {
    let (blockchain_mailbox, blockchain_sender) = PriorityMailbox::new();
    let (persistor_mailbox, persistor_sender) = PriorityMailbox::new();
    let persistor =
        BlockPersistor::new(chain.clone(), persistor_mailbox, blockchain_sender.clone()).unwrap();
    tokio::spawn(persistor.run(cancel.clone()));
    let mut blockchain = Blockchain::new(
        chain.clone(),
        blockchain_mailbox,
        persistor_sender,
        Arc::new(NullRelay),
    );
    blockchain.initialize().await.unwrap();
    tokio::spawn(blockchain.run(cancel.clone()));
    BlockchainHandle::new(blockchain_sender)
}

/// One validator's service over its own ledger, driven by hand.
pub struct TestNode {
    pub chain: Arc<Chain>,
    pub blockchain: BlockchainHandle,
    pub service: ConsensusService,
    pub events: mpsc::UnboundedReceiver<ConsensusEvent>,
    /// Most recently scheduled timer.
    pub timer: Option<ConsensusTimer>,
    pub announced: Vec<UInt256>,
    pub restarted: Vec<UInt256>,
    cancel: CancellationToken,
}

impl TestNode {
    pub async fn start(settings: &ProtocolSettings, key: KeyPair) -> Self {
        let cancel = CancellationToken::new();
        let chain = open_chain(settings);
        let blockchain = start_ledger(&chain, &cancel).await;
        let (event_tx, events) = mpsc::unbounded_channel();
        let service = ConsensusService::new(chain.clone(), key, event_tx);
        Self {
            chain,
            blockchain,
            service,
            events,
            timer: None,
            announced: Vec::new(),
            restarted: Vec::new(),
            cancel,
        }
    }

    /// Takes pending events, keeping timers and announcements on the node
    /// and returning payloads and blocks.
    pub fn drain(&mut self) -> (Vec<ConsensusPayload>, Vec<Block>) {
        let mut payloads = Vec::new();
        let mut blocks = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            match event {
                ConsensusEvent::SendDirectly(payload) => payloads.push(payload),
                ConsensusEvent::RelayBlock(block) => blocks.push(block),
                ConsensusEvent::ScheduleTimer { timer, .. } => self.timer = Some(timer),
                ConsensusEvent::AnnounceTransactions(hashes) => self.announced.extend(hashes),
                ConsensusEvent::RestartTasks(hashes) => self.restarted.extend(hashes),
            }
        }
        (payloads, blocks)
    }

    pub fn fire_timer(&mut self) {
        let timer = self.timer.expect("no timer scheduled");
        self.service.on_timer(timer);
    }
}

impl Drop for TestNode {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub async fn start_nodes(count: u8) -> Vec<TestNode> {
    let keys = validator_keys(count);
    let settings = settings(&keys);
    let mut nodes = Vec::new();
    for key in keys {
        nodes.push(TestNode::start(&settings, key).await);
    }
    nodes
}

/// Delivers every payload any node sends to all the others until no node
/// has anything left to say. Returns the blocks each node relayed.
pub fn exchange(nodes: &mut [TestNode]) -> Vec<Vec<Block>> {
    let mut relayed: Vec<Vec<Block>> = (0..nodes.len()).map(|_| Vec::new()).collect();
    let mut queue = VecDeque::new();
    for (index, node) in nodes.iter_mut().enumerate() {
        let (payloads, blocks) = node.drain();
        queue.extend(payloads.into_iter().map(|payload| (index, payload)));
        relayed[index].extend(blocks);
    }
    while let Some((from, payload)) = queue.pop_front() {
        for (index, node) in nodes.iter_mut().enumerate() {
            if index == from {
                continue;
            }
            node.service.on_consensus_payload(&payload);
            let (payloads, blocks) = node.drain();
            queue.extend(payloads.into_iter().map(|payload| (index, payload)));
            relayed[index].extend(blocks);
        }
    }
    relayed
}
