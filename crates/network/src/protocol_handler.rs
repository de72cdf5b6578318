//! Per-connection protocol state.
//!
//! Enforces the version/verack handshake and routes every later message to
//! the blockchain, the task manager or back to the peer. Returning an error
//! from [`ProtocolHandler::handle`] closes the connection.

use crate::local_node::RelayCache;
use crate::message::Message;
use crate::payloads::{
    CompressedTransactionsPayload, GetBlocksPayload, HeadersPayload, InvGroupPayload, InvPayload,
    PingPayload, VersionPayload,
};
use crate::remote_node::RemoteCommand;
use crate::task_manager::TaskCommand;
use crate::{NetworkError, NetworkResult, MAX_BLOCKS_PER_MESSAGE, MAX_HEADERS_PER_MESSAGE};
use appchain_core::{Inventory, InventoryType, PeerId, Transaction, UInt256};
use appchain_io::MailboxSender;
use appchain_ledger::{BlockchainHandle, Chain};
use std::sync::Arc;
use tracing::{debug, trace};

pub struct ProtocolHandler {
    peer: PeerId,
    chain: Arc<Chain>,
    blockchain: BlockchainHandle,
    task_manager: MailboxSender<TaskCommand>,
    relay_cache: RelayCache,
    remote: MailboxSender<RemoteCommand>,
    local_nonce: u32,
    user_agent: String,
    remote_version: Option<VersionPayload>,
    verack_received: bool,
}

impl ProtocolHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        peer: PeerId,
        chain: Arc<Chain>,
        blockchain: BlockchainHandle,
        task_manager: MailboxSender<TaskCommand>,
        relay_cache: RelayCache,
        remote: MailboxSender<RemoteCommand>,
        local_nonce: u32,
        user_agent: String,
    ) -> Self {
        Self {
            peer,
            chain,
            blockchain,
            task_manager,
            relay_cache,
            remote,
            local_nonce,
            user_agent,
            remote_version: None,
            verack_received: false,
        }
    }

    /// Our `version` message, sent as soon as the connection opens.
    pub fn version_message(&self) -> Message {
        Message::Version(VersionPayload::new(
            self.local_nonce,
            self.user_agent.clone(),
            self.chain.height(),
        ))
    }

    pub fn remote_version(&self) -> Option<&VersionPayload> {
        self.remote_version.as_ref()
    }

    pub fn is_handshaked(&self) -> bool {
        self.verack_received
    }

    fn violation(&self, reason: impl Into<String>) -> NetworkError {
        NetworkError::protocol_violation(self.peer, reason)
    }

    fn tell_tasks(&self, command: TaskCommand) -> NetworkResult<()> {
        self.task_manager
            .send(command)
            .map_err(|_| NetworkError::ActorUnavailable("task manager"))
    }

    /// Processes one inbound message and returns the direct replies.
    pub fn handle(&mut self, message: Message) -> NetworkResult<Vec<Message>> {
        match message {
            Message::Version(payload) => self.on_version(payload),
            Message::Verack => self.on_verack(),
            other if !self.verack_received => Err(self.violation(format!(
                "{} before handshake",
                other.command()
            ))),
            Message::GetAddr => Ok(Vec::new()),
            Message::Ping(payload) => {
                self.tell_tasks(TaskCommand::Update {
                    peer: self.peer,
                    last_block_index: payload.last_block_index,
                })?;
                Ok(vec![Message::Pong(PingPayload::new(
                    self.chain.height(),
                    payload.nonce,
                ))])
            }
            Message::Pong(payload) => {
                self.tell_tasks(TaskCommand::Update {
                    peer: self.peer,
                    last_block_index: payload.last_block_index,
                })?;
                Ok(Vec::new())
            }
            Message::Inv(payload) => {
                if !self.is_known(payload.inv_type, &payload.hash) {
                    self.tell_tasks(TaskCommand::NewTasks {
                        peer: self.peer,
                        payload,
                    })?;
                }
                Ok(Vec::new())
            }
            Message::InvGroup(payload) => {
                let inv_type = payload.inv_type;
                let hashes: Vec<UInt256> = payload
                    .hashes
                    .into_iter()
                    .filter(|hash| !self.is_known(inv_type, hash))
                    .collect();
                if !hashes.is_empty() {
                    self.tell_tasks(TaskCommand::NewGroupTasks {
                        peer: self.peer,
                        payload: InvGroupPayload { inv_type, hashes },
                    })?;
                }
                Ok(Vec::new())
            }
            Message::GetData(payload) => self.on_get_data(payload.inv_type, &[payload.hash]),
            Message::GetDataGroup(payload) => self.on_get_data(payload.inv_type, &payload.hashes),
            Message::GetHeaders(payload) => self.on_get_headers(&payload),
            Message::GetBlocks(payload) => {
                let hashes = self.chain.hashes_after(
                    &payload.hash_start,
                    &payload.hash_stop,
                    MAX_BLOCKS_PER_MESSAGE,
                );
                Ok(Message::announce(InventoryType::Block, &hashes))
            }
            Message::Headers(payload) => {
                if payload.headers.is_empty() {
                    self.tell_tasks(TaskCommand::HeaderTaskCompleted { peer: self.peer })?;
                } else {
                    self.blockchain.tell_headers(payload.headers, Some(self.peer))?;
                }
                Ok(Vec::new())
            }
            Message::Block(block) => {
                self.on_inventory(Inventory::Block(block))?;
                Ok(Vec::new())
            }
            Message::Transaction(tx) => {
                self.on_transaction(tx)?;
                Ok(Vec::new())
            }
            Message::Transactions(batch) => {
                for tx in batch.into_transactions() {
                    self.on_transaction(tx)?;
                }
                Ok(Vec::new())
            }
            Message::Consensus(payload) => {
                self.on_inventory(Inventory::Consensus(payload))?;
                Ok(Vec::new())
            }
        }
    }

    fn on_version(&mut self, payload: VersionPayload) -> NetworkResult<Vec<Message>> {
        if self.remote_version.is_some() {
            return Err(self.violation("duplicate version"));
        }
        if payload.nonce == self.local_nonce {
            return Err(self.violation("connected to self"));
        }
        debug!(
            peer = %self.peer,
            user_agent = %payload.user_agent,
            start_height = payload.start_height,
            "version received"
        );
        self.remote_version = Some(payload);
        Ok(vec![Message::Verack])
    }

    fn on_verack(&mut self) -> NetworkResult<Vec<Message>> {
        let Some(version) = &self.remote_version else {
            return Err(self.violation("verack before version"));
        };
        if self.verack_received {
            return Err(self.violation("duplicate verack"));
        }
        self.verack_received = true;
        self.tell_tasks(TaskCommand::Register {
            peer: self.peer,
            start_height: version.start_height,
            remote: self.remote.clone(),
        })?;
        Ok(Vec::new())
    }

    fn is_known(&self, inv_type: InventoryType, hash: &UInt256) -> bool {
        match inv_type {
            InventoryType::Block => self.chain.contains_block(hash),
            InventoryType::Transaction => self.chain.contains_transaction(hash),
            InventoryType::Consensus => false,
        }
    }

    fn on_get_data(
        &self,
        inv_type: InventoryType,
        hashes: &[UInt256],
    ) -> NetworkResult<Vec<Message>> {
        let mut replies = Vec::new();
        let mut transactions = Vec::new();
        for hash in hashes {
            let inventory = match self.relay_cache.get(hash) {
                Some(inventory) => Some(inventory),
                None => match inv_type {
                    InventoryType::Block => self.chain.get_block(hash)?.map(Inventory::Block),
                    InventoryType::Transaction => {
                        self.chain.get_transaction(hash)?.map(Inventory::Transaction)
                    }
                    InventoryType::Consensus => None,
                },
            };
            match inventory {
                Some(Inventory::Transaction(tx)) if hashes.len() > 1 => transactions.push(tx),
                Some(inventory) => replies.push(Message::from_inventory(inventory)),
                None => trace!(peer = %self.peer, %hash, "requested inventory not found"),
            }
        }
        if !transactions.is_empty() {
            replies.extend(
                CompressedTransactionsPayload::create_batches(&transactions)?
                    .into_iter()
                    .map(Message::Transactions),
            );
        }
        Ok(replies)
    }

    fn on_get_headers(&self, payload: &GetBlocksPayload) -> NetworkResult<Vec<Message>> {
        let hashes = self.chain.hashes_after(
            &payload.hash_start,
            &payload.hash_stop,
            MAX_HEADERS_PER_MESSAGE,
        );
        let mut headers = Vec::with_capacity(hashes.len());
        for hash in &hashes {
            match self.chain.get_header(hash)? {
                Some(header) => headers.push(header),
                None => break,
            }
        }
        Ok(vec![Message::Headers(HeadersPayload::new(headers))])
    }

    fn on_transaction(&self, tx: Transaction) -> NetworkResult<()> {
        if tx.is_miner() {
            self.tell_tasks(TaskCommand::TaskCompleted {
                peer: self.peer,
                hash: tx.hash(),
            })?;
            return Ok(());
        }
        self.on_inventory(Inventory::Transaction(tx))
    }

    fn on_inventory(&self, inventory: Inventory) -> NetworkResult<()> {
        self.tell_tasks(TaskCommand::TaskCompleted {
            peer: self.peer,
            hash: inventory.hash(),
        })?;
        self.blockchain.tell_inventory(inventory)?;
        Ok(())
    }
}

/// Hashes an inbound message carries, used for the per-peer known set.
pub(crate) fn inbound_hashes(message: &Message) -> Vec<UInt256> {
    match message {
        Message::Inv(InvPayload { hash, .. }) => vec![*hash],
        Message::InvGroup(payload) => payload.hashes.clone(),
        Message::Block(block) => vec![block.hash()],
        Message::Transaction(tx) => vec![tx.hash()],
        Message::Transactions(batch) => batch.transactions().iter().map(Transaction::hash).collect(),
        Message::Consensus(payload) => vec![payload.hash()],
        _ => Vec::new(),
    }
}
