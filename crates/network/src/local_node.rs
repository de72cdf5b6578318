//! Local node actor.
//!
//! Owns the peer registry. Every outbound relay path of the node ends here:
//! inventory announcements, full-object pushes and grouped re-broadcasts
//! fan out to each connected remote node.

use crate::connection;
use crate::message::Message;
use crate::payloads::InvPayload;
use crate::protocol_handler::ProtocolHandler;
use crate::remote_node::{RemoteCommand, RemoteNode};
use crate::task_manager::TaskCommand;
use crate::RELAY_CACHE_CAPACITY;
use appchain_core::{Inventory, InventoryType, PeerId, RelayResultReason, UInt256};
use appchain_io::{MailboxMessage, MailboxSender, PriorityMailbox};
use appchain_ledger::{BlockchainCommand, BlockchainHandle, Chain, RelayReply, RelaySink};
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A byte stream a remote node can run over.
pub trait PeerStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> PeerStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Recently relayed inventories, answered from memory on `getdata`.
#[derive(Clone)]
pub struct RelayCache {
    inner: Arc<Mutex<LruCache<UInt256, Inventory>>>,
}

impl RelayCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            ))),
        }
    }

    pub fn insert(&self, inventory: Inventory) {
        self.inner.lock().put(inventory.hash(), inventory);
    }

    pub fn get(&self, hash: &UInt256) -> Option<Inventory> {
        self.inner.lock().get(hash).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for RelayCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayCache").field("len", &self.len()).finish()
    }
}

pub enum LocalNodeCommand {
    /// Run a remote node over an established stream.
    Accept {
        stream: Box<dyn PeerStream>,
        address: SocketAddr,
    },
    /// Dial `address`; failures are logged and not retried.
    Connect(SocketAddr),
    /// Submit an inventory to the ledger; the ledger relays it on success.
    Relay {
        inventory: Inventory,
        reply: Option<RelayReply>,
    },
    /// Announce an inventory to every peer.
    RelayDirectly(Inventory),
    /// Push the full inventory to every peer.
    SendDirectly(Inventory),
    BroadcastInventory {
        inv_type: InventoryType,
        hashes: Vec<UInt256>,
    },
    HeaderTaskCompleted(PeerId),
    Terminated(PeerId),
}

impl std::fmt::Debug for LocalNodeCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accept { address, .. } => {
                f.debug_struct("Accept").field("address", address).finish_non_exhaustive()
            }
            Self::Connect(address) => f.debug_tuple("Connect").field(address).finish(),
            Self::Relay { inventory, .. } => f
                .debug_struct("Relay")
                .field("hash", &inventory.hash())
                .finish_non_exhaustive(),
            Self::RelayDirectly(inventory) => {
                f.debug_tuple("RelayDirectly").field(&inventory.hash()).finish()
            }
            Self::SendDirectly(inventory) => {
                f.debug_tuple("SendDirectly").field(&inventory.hash()).finish()
            }
            Self::BroadcastInventory { inv_type, hashes } => f
                .debug_struct("BroadcastInventory")
                .field("inv_type", inv_type)
                .field("hashes", &hashes.len())
                .finish(),
            Self::HeaderTaskCompleted(peer) => {
                f.debug_tuple("HeaderTaskCompleted").field(peer).finish()
            }
            Self::Terminated(peer) => f.debug_tuple("Terminated").field(peer).finish(),
        }
    }
}

impl MailboxMessage for LocalNodeCommand {
    fn is_high_priority(&self) -> bool {
        match self {
            Self::Relay { inventory, .. }
            | Self::RelayDirectly(inventory)
            | Self::SendDirectly(inventory) => {
                inventory.inventory_type() != InventoryType::Transaction
            }
            Self::BroadcastInventory { inv_type, .. } => *inv_type != InventoryType::Transaction,
            _ => true,
        }
    }
}

struct PeerEntry {
    address: SocketAddr,
    sender: MailboxSender<RemoteCommand>,
}

pub struct LocalNode {
    chain: Arc<Chain>,
    mailbox: PriorityMailbox<LocalNodeCommand>,
    self_sender: MailboxSender<LocalNodeCommand>,
    blockchain: BlockchainHandle,
    task_manager: MailboxSender<TaskCommand>,
    relay_cache: RelayCache,
    peers: HashMap<PeerId, PeerEntry>,
    next_peer_id: u64,
    nonce: u32,
    user_agent: String,
    cancel: CancellationToken,
}

impl LocalNode {
    pub fn new(
        chain: Arc<Chain>,
        mailbox: PriorityMailbox<LocalNodeCommand>,
        blockchain: BlockchainHandle,
        task_manager: MailboxSender<TaskCommand>,
    ) -> Self {
        let self_sender = mailbox.sender();
        Self {
            chain,
            mailbox,
            self_sender,
            blockchain,
            task_manager,
            relay_cache: RelayCache::new(RELAY_CACHE_CAPACITY),
            peers: HashMap::new(),
            next_peer_id: 1,
            nonce: rand::random(),
            user_agent: format!("/appchain-node:{}/", env!("CARGO_PKG_VERSION")),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn nonce(&self) -> u32 {
        self.nonce
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn relay_cache(&self) -> &RelayCache {
        &self.relay_cache
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        self.cancel = cancel.clone();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                command = self.mailbox.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
            }
        }
        debug!(chain = %self.chain.settings().name, "local node stopped");
    }

    pub fn handle(&mut self, command: LocalNodeCommand) {
        match command {
            LocalNodeCommand::Accept { stream, address } => self.add_peer(stream, address),
            LocalNodeCommand::Connect(address) => {
                let sender = self.self_sender.clone();
                tokio::spawn(async move {
                    match TcpStream::connect(address).await {
                        Ok(stream) => {
                            let _ = sender.send(LocalNodeCommand::Accept {
                                stream: Box::new(stream),
                                address,
                            });
                        }
                        Err(e) => warn!(%address, error = %e, "connect failed"),
                    }
                });
            }
            LocalNodeCommand::Relay { inventory, reply } => {
                let command = match inventory {
                    Inventory::Block(block) => BlockchainCommand::NewBlock { block, reply },
                    Inventory::Transaction(transaction) => {
                        BlockchainCommand::NewTransaction { transaction, reply }
                    }
                    Inventory::Consensus(payload) => {
                        BlockchainCommand::NewConsensus { payload, reply }
                    }
                };
                if let Err(e) = self.blockchain.send(command) {
                    warn!(error = %e, "relay dropped");
                }
            }
            LocalNodeCommand::RelayDirectly(inventory) => {
                let announcement = Message::Inv(InvPayload::new(
                    inventory.inventory_type(),
                    inventory.hash(),
                ));
                self.relay_cache.insert(inventory);
                self.broadcast(&[announcement]);
            }
            LocalNodeCommand::SendDirectly(inventory) => {
                self.relay_cache.insert(inventory.clone());
                self.broadcast(&[Message::from_inventory(inventory)]);
            }
            LocalNodeCommand::BroadcastInventory { inv_type, hashes } => {
                self.broadcast(&Message::announce(inv_type, &hashes));
            }
            LocalNodeCommand::HeaderTaskCompleted(peer) => {
                let _ = self
                    .task_manager
                    .send(TaskCommand::HeaderTaskCompleted { peer });
            }
            LocalNodeCommand::Terminated(peer) => {
                if let Some(entry) = self.peers.remove(&peer) {
                    debug!(%peer, address = %entry.address, peers = self.peers.len(), "peer removed");
                }
            }
        }
    }

    fn broadcast(&mut self, messages: &[Message]) {
        self.peers.retain(|_, entry| {
            messages
                .iter()
                .all(|message| entry.sender.send(RemoteCommand::Send(message.clone())).is_ok())
        });
    }

    fn add_peer(&mut self, stream: Box<dyn PeerStream>, address: SocketAddr) {
        let peer = PeerId(self.next_peer_id);
        self.next_peer_id += 1;

        let (mailbox, sender) = PriorityMailbox::new();
        let outbound = connection::spawn(stream, self.chain.settings().magic, sender.clone());
        let handler = ProtocolHandler::new(
            peer,
            self.chain.clone(),
            self.blockchain.clone(),
            self.task_manager.clone(),
            self.relay_cache.clone(),
            sender.clone(),
            self.nonce,
            self.user_agent.clone(),
        );
        let node = RemoteNode::new(
            peer,
            address,
            mailbox,
            outbound,
            handler,
            self.self_sender.clone(),
            self.task_manager.clone(),
        );
        self.peers.insert(peer, PeerEntry { address, sender });
        tokio::spawn(node.run(self.cancel.child_token()));
    }
}

/// Cloneable handle to the local node; the ledger's relay sink.
#[derive(Debug, Clone)]
pub struct LocalNodeHandle {
    sender: MailboxSender<LocalNodeCommand>,
}

impl LocalNodeHandle {
    pub fn new(sender: MailboxSender<LocalNodeCommand>) -> Self {
        Self { sender }
    }

    pub fn send(&self, command: LocalNodeCommand) -> bool {
        self.sender.send(command).is_ok()
    }

    pub fn connect(&self, address: SocketAddr) -> bool {
        self.send(LocalNodeCommand::Connect(address))
    }

    pub fn accept(&self, stream: impl PeerStream, address: SocketAddr) -> bool {
        self.send(LocalNodeCommand::Accept {
            stream: Box::new(stream),
            address,
        })
    }

    /// Submits an inventory and waits for the ledger's verdict.
    pub async fn relay(&self, inventory: Inventory) -> RelayResultReason {
        let (tx, rx) = oneshot::channel();
        if !self.send(LocalNodeCommand::Relay {
            inventory,
            reply: Some(tx),
        }) {
            return RelayResultReason::Unknown;
        }
        rx.await.unwrap_or(RelayResultReason::Unknown)
    }

    pub fn send_directly(&self, inventory: Inventory) {
        self.send(LocalNodeCommand::SendDirectly(inventory));
    }
}

impl RelaySink for LocalNodeHandle {
    fn relay_directly(&self, inventory: Inventory) {
        self.send(LocalNodeCommand::RelayDirectly(inventory));
    }

    fn broadcast_inventory(&self, inventory_type: InventoryType, hashes: Vec<UInt256>) {
        self.send(LocalNodeCommand::BroadcastInventory {
            inv_type: inventory_type,
            hashes,
        });
    }

    fn header_task_completed(&self, peer: PeerId) {
        self.send(LocalNodeCommand::HeaderTaskCompleted(peer));
    }
}

/// Accepts inbound connections until cancelled.
pub async fn listen(listener: TcpListener, node: LocalNodeHandle, cancel: CancellationToken) {
    if let Ok(address) = listener.local_addr() {
        info!(%address, "listening for peers");
    }
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, address)) => {
                    if !node.accept(stream, address) {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "accept failed"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use appchain_core::Transaction;

    #[test]
    fn test_relay_cache_evicts_oldest() {
        let cache = RelayCache::new(2);
        let txs: Vec<Transaction> = (0..3).map(|i| Transaction::miner(i, Vec::new())).collect();
        for tx in &txs {
            cache.insert(Inventory::Transaction(tx.clone()));
        }
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&txs[0].hash()).is_none());
        assert!(matches!(
            cache.get(&txs[2].hash()),
            Some(Inventory::Transaction(tx)) if tx == txs[2]
        ));
    }

    #[test]
    fn test_transaction_relay_is_low_priority() {
        let tx = Inventory::Transaction(Transaction::miner(1, Vec::new()));
        assert!(!LocalNodeCommand::RelayDirectly(tx).is_high_priority());
        assert!(LocalNodeCommand::Terminated(PeerId(1)).is_high_priority());
    }
}
