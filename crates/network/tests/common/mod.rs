#![allow(dead_code)]

use appchain_config::ProtocolSettings;
use appchain_core::merkle;
use appchain_core::script::{bft_quorum, consensus_address, invocation_script, multi_sig_redeem_script};
use appchain_core::{sha256, Block, Header, KeyPair, PublicKey, Transaction, UInt256, Witness};
use appchain_io::{PriorityMailbox, MailboxSender};
use appchain_ledger::{
    AllowAllPolicy, BlockPersistor, Blockchain, BlockchainHandle, Chain, MemoryPool, MemoryStore,
    NoopExecutor,
};
use appchain_network::{LocalNode, LocalNodeHandle, TaskCommand, TaskManager};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub fn validator_keys(count: u8) -> Vec<KeyPair> {
    let mut keys: Vec<KeyPair> = (0..count)
        .map(|i| KeyPair::from_private_key(&sha256(&[0x5A, i])).unwrap())
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

/// Chain view over an empty store, without genesis.
pub fn empty_chain() -> Arc<Chain> {
    let settings = Arc::new(settings(&validator_keys(1)));
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

/// Successor of `prev` holding only a miner transaction, signed by `keys`.
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
    let m = bft_quorum(keys.len());
    let message = header.get_hash_data();
    let signatures: Vec<_> = keys.iter().take(m).map(|key| key.sign(&message)).collect();
    let header = header.with_witness(Witness::new(
        invocation_script(&signatures),
        multi_sig_redeem_script(m, &public),
    ));
    Block::new(header, transactions)
}

/// Persistor, blockchain, task manager and local node of one chain.
pub struct Stack {
    pub keys: Vec<KeyPair>,
    pub chain: Arc<Chain>,
    pub blockchain: BlockchainHandle,
    pub local_node: LocalNodeHandle,
    pub task_manager: MailboxSender<TaskCommand>,
    pub cancel: CancellationToken,
}

impl Stack {
    pub async fn start() -> Self {
        let keys = validator_keys(1);
        let settings = Arc::new(settings(&keys));
        let chain = Arc::new(
            Chain::open(
                settings.clone(),
                Arc::new(MemoryStore::new()),
                Arc::new(MemoryPool::with_capacity(settings.memory_pool_max_transactions)),
                Arc::new(NoopExecutor),
                Arc::new(AllowAllPolicy),
            )
            .unwrap(),
        );
        let cancel = CancellationToken::new();
        let (blockchain_mailbox, blockchain_sender) = PriorityMailbox::new();
        let (persistor_mailbox, persistor_sender) = PriorityMailbox::new();
        let (task_mailbox, task_sender) = PriorityMailbox::new();
        let (local_mailbox, local_sender) = PriorityMailbox::new();
        let local_node = LocalNodeHandle::new(local_sender);
        let blockchain = BlockchainHandle::new(blockchain_sender.clone());

        let persistor =
            BlockPersistor::new(chain.clone(), persistor_mailbox, blockchain_sender).unwrap();
        tokio::spawn(persistor.run(cancel.clone()));

        let mut actor = Blockchain::new(
            chain.clone(),
            blockchain_mailbox,
            persistor_sender,
            Arc::new(local_node.clone()),
        );
        actor.initialize().await.unwrap();
        tokio::spawn(actor.run(cancel.clone()));

        tokio::spawn(TaskManager::new(chain.clone(), task_mailbox).run(cancel.clone()));
        let node = LocalNode::new(chain.clone(), local_mailbox, blockchain.clone(), task_sender.clone());
        tokio::spawn(node.run(cancel.clone()));

        Self {
            keys,
            chain,
            blockchain,
            local_node,
            task_manager: task_sender,
            cancel,
        }
    }

    pub fn tip(&self) -> Header {
        let hash = self.chain.current_block_hash().unwrap();
        self.chain.get_header(&hash).unwrap().unwrap()
    }

    pub fn magic(&self) -> u32 {
        self.chain.settings().magic
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
