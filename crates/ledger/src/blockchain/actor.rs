//! Blockchain actor state machine.

use super::messages::{BlockchainCommand, LedgerEvent};
use super::RelaySink;
use crate::chain::Chain;
use crate::genesis;
use crate::persistor::{PersistCommand, PersistCompleted, PersistorHandle};
use crate::verification::verify_transaction;
use crate::{LedgerError, LedgerResult, RELAY_WINDOW, REVERIFY_BATCH_SIZE};
use appchain_core::{
    Block, ConsensusPayload, Header, Inventory, InventoryType, PeerId, RelayResultReason,
    Transaction, UInt256,
};
use appchain_io::{MailboxSender, PriorityMailbox};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Bound on the one blocking wait at startup: persisting block 0.
pub const GENESIS_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Blockchain {
    chain: Arc<Chain>,
    mailbox: PriorityMailbox<BlockchainCommand>,
    self_sender: MailboxSender<BlockchainCommand>,
    persistor: PersistorHandle,
    relay: Arc<dyn RelaySink>,
    /// Header-verified blocks waiting for their predecessors.
    block_cache: HashMap<UInt256, Block>,
    /// Blocks whose previous header is unknown, by index.
    block_cache_unverified: HashMap<u32, Vec<Block>>,
    /// Highest index handed to the persistor.
    persisting_height: u32,
    /// Tip of the header chain.
    last_header: Option<Header>,
    /// Consensus payloads accepted at the current height.
    consensus_seen: HashSet<UInt256>,
    subscribers: Vec<mpsc::UnboundedSender<LedgerEvent>>,
}

impl Blockchain {
    pub fn new(
        chain: Arc<Chain>,
        mailbox: PriorityMailbox<BlockchainCommand>,
        persistor: PersistorHandle,
        relay: Arc<dyn RelaySink>,
    ) -> Self {
        let self_sender = mailbox.sender();
        Self {
            persisting_height: chain.height(),
            chain,
            mailbox,
            self_sender,
            persistor,
            relay,
            block_cache: HashMap::new(),
            block_cache_unverified: HashMap::new(),
            last_header: None,
            consensus_seen: HashSet::new(),
            subscribers: Vec::new(),
        }
    }

    pub fn chain(&self) -> &Arc<Chain> {
        &self.chain
    }

    /// Blocks buffered because their previous header is still unknown.
    pub fn unverified_block_count(&self) -> usize {
        self.block_cache_unverified.values().map(Vec::len).sum()
    }

    /// Loads the header tip, persisting the genesis block first on an empty
    /// store.
    ///
    /// Genesis persistence is the one place the actor waits on another: it
    /// sends block 0 to the persistor and blocks on the reply, bounded by
    /// `GENESIS_TIMEOUT`. The persistor task must already be running.
    pub async fn initialize(&mut self) -> LedgerResult<()> {
        if !self.chain.is_initialized() {
            let block = genesis::genesis_block(self.chain.settings());
            info!(
                chain = %self.chain.settings().name,
                hash = %block.hash(),
                "persisting genesis block"
            );
            self.chain.push_header(block.hash());
            let (reply, response) = oneshot::channel();
            self.persistor
                .send(PersistCommand::PersistGenesis { block, reply })
                .map_err(|_| LedgerError::ActorUnavailable("persistor"))?;
            let completed = tokio::time::timeout(GENESIS_TIMEOUT, response)
                .await
                .map_err(|_| LedgerError::Timeout("genesis persistence"))?
                .map_err(|_| LedgerError::ActorUnavailable("persistor"))??;
            self.chain.set_persisted(0, completed.snapshot);
            self.last_header = Some(completed.block.header().clone());
        } else {
            let hash = self
                .chain
                .current_header_hash()
                .ok_or_else(|| LedgerError::not_found("current header"))?;
            let header = self
                .chain
                .get_header(&hash)?
                .ok_or_else(|| LedgerError::not_found(format!("header {hash}")))?;
            self.last_header = Some(header);
        }
        self.persisting_height = self.chain.height();
        Ok(())
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                command = self.mailbox.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
            }
        }
        debug!(chain = %self.chain.settings().name, "blockchain actor stopped");
    }

    pub fn handle(&mut self, command: BlockchainCommand) {
        match command {
            BlockchainCommand::NewBlock { block, reply } => {
                let result = self.on_new_block(block);
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            BlockchainCommand::NewHeaders { headers, peer } => self.on_new_headers(headers, peer),
            BlockchainCommand::NewTransaction { transaction, reply } => {
                let result = self.on_new_transaction(transaction);
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            BlockchainCommand::NewConsensus { payload, reply } => {
                let result = self.on_new_consensus(payload);
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            BlockchainCommand::PersistCompleted(completed) => self.on_persist_completed(completed),
            BlockchainCommand::Subscribe(subscriber) => self.subscribers.push(subscriber),
            BlockchainCommand::ReverifyMemPool => self.on_reverify_mempool(),
        }
    }

    fn publish(&mut self, event: LedgerEvent) {
        self.subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    fn header_count(&self) -> u32 {
        self.chain.header_count() as u32
    }

    /// Checks `header` as the successor of the header tip.
    fn verify_next_header(&self, header: &Header) -> bool {
        let Some(prev) = &self.last_header else {
            return false;
        };
        header.prev_hash() == prev.hash()
            && header.index() == prev.index() + 1
            && header.timestamp() > prev.timestamp()
            && header.verify_witness(&prev.next_consensus())
    }

    fn on_new_block(&mut self, block: Block) -> RelayResultReason {
        let index = block.index();
        let hash = block.hash();
        if index <= self.persisting_height || self.block_cache.contains_key(&hash) {
            return RelayResultReason::AlreadyExists;
        }
        if !block.verify_structure() {
            warn!(index, %hash, "block transactions do not match its header");
            return RelayResultReason::Invalid;
        }

        let header_count = self.header_count();
        if index - 1 >= header_count {
            let pending = self.block_cache_unverified.entry(index).or_default();
            if !pending.iter().any(|cached| cached.hash() == hash) {
                pending.push(block);
            }
            trace!(index, %hash, "block buffered until its previous header arrives");
            return RelayResultReason::UnableToVerify;
        }

        if index == header_count {
            if !self.verify_next_header(block.header()) {
                warn!(index, %hash, "invalid block");
                return RelayResultReason::Invalid;
            }
        } else if self.chain.header_hash(index) != Some(hash) {
            return RelayResultReason::Invalid;
        }

        if index == self.persisting_height + 1 {
            let mut blocks = vec![block];
            loop {
                let next = self.persisting_height + 1 + blocks.len() as u32;
                let Some(next_hash) = self.chain.header_hash(next) else {
                    break;
                };
                let Some(cached) = self.block_cache.remove(&next_hash) else {
                    break;
                };
                blocks.push(cached);
            }
            self.persist_all(blocks);
            let persisted = self.persisting_height;
            self.block_cache_unverified
                .retain(|index, _| *index > persisted);
            let next = persisted + 1;
            if let Some(unverified) = self.block_cache_unverified.remove(&next) {
                for block in unverified {
                    let _ = self
                        .self_sender
                        .send(BlockchainCommand::NewBlock { block, reply: None });
                }
            }
        } else {
            self.block_cache.insert(hash, block.clone());
            if index + RELAY_WINDOW >= self.header_count() {
                self.relay.relay_directly(Inventory::Block(block.clone()));
            }
            if index == header_count {
                self.append_header(block.header().clone());
                self.send_to_persistor(PersistCommand::PersistHeaders(vec![block
                    .header()
                    .clone()]));
            }
        }
        RelayResultReason::Succeed
    }

    /// Sends consecutive blocks to the persistor and relays the most recent
    /// few when close to the header tip.
    fn persist_all(&mut self, blocks: Vec<Block>) {
        let seconds_per_block = self.chain.settings().seconds_per_block;
        let relay_tail = 2 + 15u64.saturating_sub(seconds_per_block) as usize;
        let count = blocks.len();
        for (position, block) in blocks.into_iter().enumerate() {
            let index = block.index();
            if index as usize == self.chain.header_count() {
                self.append_header(block.header().clone());
            }
            self.persisting_height = index;
            let relay = position + relay_tail >= count
                && index + RELAY_WINDOW >= self.header_count();
            if relay {
                self.relay.relay_directly(Inventory::Block(block.clone()));
            }
            self.send_to_persistor(PersistCommand::PersistBlock(block));
        }
    }

    fn append_header(&mut self, header: Header) {
        self.chain.push_header(header.hash());
        self.last_header = Some(header);
    }

    fn send_to_persistor(&self, command: PersistCommand) {
        if self.persistor.send(command).is_err() {
            warn!("persistor mailbox closed");
        }
    }

    fn on_new_headers(&mut self, headers: Vec<Header>, peer: Option<PeerId>) {
        let mut accepted = Vec::new();
        for header in headers {
            let header_count = self.header_count();
            if header.index() > header_count {
                break;
            }
            if header.index() < header_count {
                continue;
            }
            if !self.verify_next_header(&header) {
                warn!(index = header.index(), hash = %header.hash(), "invalid header");
                break;
            }
            self.append_header(header.clone());
            accepted.push(header);
        }
        if !accepted.is_empty() {
            debug!(
                count = accepted.len(),
                header_height = self.header_count() - 1,
                "headers accepted"
            );
            self.send_to_persistor(PersistCommand::PersistHeaders(accepted));
        }
        if let Some(peer) = peer {
            self.relay.header_task_completed(peer);
        }
    }

    fn on_new_transaction(&mut self, transaction: Transaction) -> RelayResultReason {
        if transaction.is_miner() {
            return RelayResultReason::Invalid;
        }
        let hash = transaction.hash();
        if self.chain.contains_transaction(&hash) {
            return RelayResultReason::AlreadyExists;
        }
        if !self.chain.policy().check_policy(&transaction) {
            return RelayResultReason::PolicyFail;
        }
        let snapshot = self.chain.snapshot();
        let mempool = self.chain.mempool();
        let others = mempool.get_competing_verified(&transaction);
        if let Err(e) =
            verify_transaction(&transaction, &snapshot, &others, &self.chain.utility_token())
        {
            debug!(%hash, error = %e, "transaction rejected");
            return RelayResultReason::Invalid;
        }
        let result = mempool.try_add(transaction.clone());
        if result.is_success() {
            self.relay
                .relay_directly(Inventory::Transaction(transaction.clone()));
            self.publish(LedgerEvent::Transaction(transaction));
        }
        result
    }

    fn on_new_consensus(&mut self, payload: ConsensusPayload) -> RelayResultReason {
        let hash = payload.hash();
        if self.consensus_seen.contains(&hash) {
            return RelayResultReason::AlreadyExists;
        }
        if payload.block_index() <= self.chain.height() {
            return RelayResultReason::Invalid;
        }
        let validators = match self.chain.validators() {
            Ok(validators) => validators,
            Err(e) => {
                warn!(error = %e, "cannot load validators");
                return RelayResultReason::Unknown;
            }
        };
        let Some(validator) = validators.get(payload.validator_index() as usize) else {
            return RelayResultReason::Invalid;
        };
        if !payload.verify_witness(validator) {
            return RelayResultReason::Invalid;
        }
        self.consensus_seen.insert(hash);
        self.publish(LedgerEvent::ConsensusPayload(payload.clone()));
        self.relay.relay_directly(Inventory::Consensus(payload));
        RelayResultReason::Succeed
    }

    /// # Panics
    ///
    /// Panics if the committed block is not the successor of the current
    /// height: the persistor and this actor disagree on ordering.
    fn on_persist_completed(&mut self, completed: PersistCompleted) {
        let PersistCompleted {
            block,
            app_chain_notifications,
            snapshot,
        } = completed;
        let index = block.index();
        assert_eq!(
            index,
            self.chain.height() + 1,
            "persist completion out of order"
        );
        self.chain.set_persisted(index, snapshot);
        self.consensus_seen.clear();

        let mempool = self.chain.mempool().clone();
        let hashes = block.transaction_hashes();
        mempool.remove_persisted(&hashes);
        mempool.invalidate_verified();
        let pending: Vec<UInt256> = mempool
            .get_unverified_transactions()
            .iter()
            .map(Transaction::hash)
            .collect();
        if !pending.is_empty() {
            self.relay
                .broadcast_inventory(InventoryType::Transaction, pending);
        }

        for notification in app_chain_notifications {
            info!(
                kind = notification.kind(),
                chain = %notification.chain_hash(),
                "app chain notification"
            );
            self.publish(LedgerEvent::AppChainNotify(notification));
        }
        self.publish(LedgerEvent::PersistCompleted { block });

        self.try_persist_cached();
        if mempool.unverified_count() > 0 {
            let _ = self.self_sender.send(BlockchainCommand::ReverifyMemPool);
        }
    }

    fn try_persist_cached(&mut self) {
        let mut blocks = Vec::new();
        loop {
            let next = self.persisting_height + 1 + blocks.len() as u32;
            let Some(hash) = self.chain.header_hash(next) else {
                break;
            };
            let Some(block) = self.block_cache.remove(&hash) else {
                break;
            };
            blocks.push(block);
        }
        if !blocks.is_empty() {
            self.persist_all(blocks);
        }
    }

    fn on_reverify_mempool(&mut self) {
        let snapshot = self.chain.snapshot();
        let utility_token = self.chain.utility_token();
        let policy = self.chain.policy().clone();
        let mempool = self.chain.mempool().clone();
        mempool.reverify_top_unverified(REVERIFY_BATCH_SIZE, |tx, others| {
            policy.check_policy(tx)
                && !snapshot.contains_transaction(&tx.hash())
                && verify_transaction(tx, &snapshot, others, &utility_token).is_ok()
        });
        if mempool.unverified_count() > 0 {
            let _ = self.self_sender.send(BlockchainCommand::ReverifyMemPool);
        }
    }
}
