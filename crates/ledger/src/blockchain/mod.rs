//! Blockchain actor.
//!
//! Orders everything that changes the ledger: inbound blocks and headers,
//! transactions entering the memory pool and consensus payloads. Blocks are
//! handed to the persistor strictly in height order.

mod actor;
mod messages;

pub use actor::{Blockchain, GENESIS_TIMEOUT};
pub use messages::{BlockchainCommand, LedgerEvent, RelayReply};

use crate::{LedgerError, LedgerResult};
use appchain_core::{
    Block, ConsensusPayload, Header, Inventory, InventoryType, PeerId, RelayResultReason,
    Transaction, UInt256,
};
use appchain_io::MailboxSender;
use tokio::sync::{mpsc, oneshot};

/// Outbound relay used by the ledger. Implemented by the network layer.
pub trait RelaySink: Send + Sync {
    /// Announces an inventory to every connected peer.
    fn relay_directly(&self, inventory: Inventory);

    /// Announces many hashes of one type in grouped messages.
    fn broadcast_inventory(&self, inventory_type: InventoryType, hashes: Vec<UInt256>);

    /// A header batch from `peer` has been processed.
    fn header_task_completed(&self, peer: PeerId);
}

/// Relay sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRelay;

impl RelaySink for NullRelay {
    fn relay_directly(&self, _inventory: Inventory) {}

    fn broadcast_inventory(&self, _inventory_type: InventoryType, _hashes: Vec<UInt256>) {}

    fn header_task_completed(&self, _peer: PeerId) {}
}

/// Cloneable handle for sending to the blockchain actor.
#[derive(Debug, Clone)]
pub struct BlockchainHandle {
    sender: MailboxSender<BlockchainCommand>,
}

impl BlockchainHandle {
    pub fn new(sender: MailboxSender<BlockchainCommand>) -> Self {
        Self { sender }
    }

    pub fn send(&self, command: BlockchainCommand) -> LedgerResult<()> {
        self.sender
            .send(command)
            .map_err(|_| LedgerError::ActorUnavailable("blockchain"))
    }

    async fn ask(
        &self,
        build: impl FnOnce(Option<RelayReply>) -> BlockchainCommand,
    ) -> RelayResultReason {
        let (tx, rx) = oneshot::channel();
        if self.send(build(Some(tx))).is_err() {
            return RelayResultReason::Unknown;
        }
        rx.await.unwrap_or(RelayResultReason::Unknown)
    }

    pub async fn relay_block(&self, block: Block) -> RelayResultReason {
        self.ask(|reply| BlockchainCommand::NewBlock { block, reply })
            .await
    }

    pub async fn relay_transaction(&self, transaction: Transaction) -> RelayResultReason {
        self.ask(|reply| BlockchainCommand::NewTransaction { transaction, reply })
            .await
    }

    pub async fn relay_consensus(&self, payload: ConsensusPayload) -> RelayResultReason {
        self.ask(|reply| BlockchainCommand::NewConsensus { payload, reply })
            .await
    }

    /// Fire-and-forget variants used by the network layer.
    pub fn tell_inventory(&self, inventory: Inventory) -> LedgerResult<()> {
        self.send(match inventory {
            Inventory::Block(block) => BlockchainCommand::NewBlock { block, reply: None },
            Inventory::Transaction(transaction) => BlockchainCommand::NewTransaction {
                transaction,
                reply: None,
            },
            Inventory::Consensus(payload) => BlockchainCommand::NewConsensus {
                payload,
                reply: None,
            },
        })
    }

    pub fn tell_headers(&self, headers: Vec<Header>, peer: Option<PeerId>) -> LedgerResult<()> {
        self.send(BlockchainCommand::NewHeaders { headers, peer })
    }

    pub fn subscribe(&self) -> LedgerResult<mpsc::UnboundedReceiver<LedgerEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.send(BlockchainCommand::Subscribe(tx))?;
        Ok(rx)
    }
}
