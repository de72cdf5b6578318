#![allow(dead_code)]

use appchain_config::ProtocolSettings;
use appchain_core::merkle;
use appchain_core::script::{bft_quorum, consensus_address, invocation_script, multi_sig_redeem_script};
use appchain_core::{sha256, Block, Header, KeyPair, PublicKey, Transaction, UInt256, Witness};
use appchain_io::{MailboxSender, PriorityMailbox};
use appchain_ledger::{
    AllowAllPolicy, BlockPersistor, Blockchain, BlockchainCommand, BlockchainHandle, Chain,
    LedgerEvent, MemoryPool, MemoryStore, NoopExecutor, NullRelay, Store,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub fn validator_keys(count: u8) -> Vec<KeyPair> {
    let mut keys: Vec<KeyPair> = (0..count)
        .map(|i| KeyPair::from_private_key(&sha256(&[0xA5, i])).unwrap())
        .collect();
    keys.sort_by(|a, b| a.public_key().cmp(b.public_key()));
    keys
}

pub fn settings(keys: &[KeyPair]) -> ProtocolSettings {
    ProtocolSettings {
        standby_validators: keys.iter().map(|key| key.public_key().clone()).collect(),
        ..ProtocolSettings::default()
    }
}

/// Signs `header` with the first M of `keys`, which must be sorted.
pub fn sign_header(header: Header, keys: &[KeyPair]) -> Header {
    let public: Vec<PublicKey> = keys.iter().map(|key| key.public_key().clone()).collect();
    let m = bft_quorum(keys.len());
    let message = header.get_hash_data();
    let signatures: Vec<_> = keys.iter().take(m).map(|key| key.sign(&message)).collect();
    header.with_witness(Witness::new(
        invocation_script(&signatures),
        multi_sig_redeem_script(m, &public),
    ))
}

/// Builds the successor of `prev` holding only a miner transaction.
pub fn next_block(prev: &Header, keys: &[KeyPair]) -> Block {
    let public: Vec<PublicKey> = keys.iter().map(|key| key.public_key().clone()).collect();
    let index = prev.index() + 1;
    let transactions = vec![Transaction::miner(index, Vec::new())];
    let hashes: Vec<UInt256> = transactions.iter().map(Transaction::hash).collect();
    let header = Header::new(
        0,
        prev.hash(),
        merkle::compute_root(&hashes),
        prev.timestamp() + 15,
        index,
        u64::from(index),
        consensus_address(&public),
        Witness::default(),
    );
    Block::new(sign_header(header, keys), transactions)
}

/// A blockchain actor past genesis and the sender of its mailbox. The
/// persistor runs until `cancel`.
pub async fn initialized_actor(
    settings: ProtocolSettings,
    store: Arc<dyn Store>,
    cancel: CancellationToken,
) -> (Blockchain, MailboxSender<BlockchainCommand>) {
    let settings = Arc::new(settings);
    let chain = Arc::new(
        Chain::open(
            settings.clone(),
            store,
            Arc::new(MemoryPool::with_capacity(settings.memory_pool_max_transactions)),
            Arc::new(NoopExecutor),
            Arc::new(AllowAllPolicy),
        )
        .unwrap(),
    );
    let (blockchain_mailbox, blockchain_sender) = PriorityMailbox::new();
    let (persistor_mailbox, persistor_sender) = PriorityMailbox::new();

    let persistor =
        BlockPersistor::new(chain.clone(), persistor_mailbox, blockchain_sender.clone()).unwrap();
    tokio::spawn(persistor.run(cancel));

    let mut blockchain = Blockchain::new(
        chain,
        blockchain_mailbox,
        persistor_sender,
        Arc::new(NullRelay),
    );
    blockchain.initialize().await.unwrap();
    (blockchain, blockchain_sender)
}

pub struct Node {
    pub chain: Arc<Chain>,
    pub store: Arc<dyn Store>,
    pub handle: BlockchainHandle,
    pub events: mpsc::UnboundedReceiver<LedgerEvent>,
    pub cancel: CancellationToken,
}

impl Node {
    pub async fn start(settings: ProtocolSettings) -> Self {
        Self::start_with_store(settings, Arc::new(MemoryStore::new())).await
    }

    pub async fn start_with_store(settings: ProtocolSettings, store: Arc<dyn Store>) -> Self {
        let cancel = CancellationToken::new();
        let (blockchain, blockchain_sender) =
            initialized_actor(settings, store.clone(), cancel.clone()).await;
        let chain = blockchain.chain().clone();
        tokio::spawn(blockchain.run(cancel.clone()));

        let handle = BlockchainHandle::new(blockchain_sender);
        let events = handle.subscribe().unwrap();
        Self {
            chain,
            store,
            handle,
            events,
            cancel,
        }
    }

    pub fn tip(&self) -> Header {
        let hash = self.chain.current_block_hash().unwrap();
        self.chain.get_header(&hash).unwrap().unwrap()
    }

    /// Next persisted block index, skipping other events.
    pub async fn next_persisted(&mut self) -> u32 {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(10), self.events.recv())
                .await
                .expect("timed out waiting for a persisted block")
                .expect("event stream closed");
            if let LedgerEvent::PersistCompleted { block } = event {
                return block.index();
            }
        }
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
