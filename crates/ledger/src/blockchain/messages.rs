//! Blockchain actor messages and events.

use crate::app_chain::AppChainNotification;
use crate::persistor::PersistCompleted;
use appchain_core::{Block, ConsensusPayload, Header, PeerId, RelayResultReason, Transaction};
use appchain_io::MailboxMessage;
use tokio::sync::{mpsc, oneshot};

/// Reply channel for a relayed inventory.
pub type RelayReply = oneshot::Sender<RelayResultReason>;

#[derive(Debug)]
pub enum BlockchainCommand {
    NewBlock {
        block: Block,
        reply: Option<RelayReply>,
    },
    NewHeaders {
        headers: Vec<Header>,
        peer: Option<PeerId>,
    },
    NewTransaction {
        transaction: Transaction,
        reply: Option<RelayReply>,
    },
    NewConsensus {
        payload: ConsensusPayload,
        reply: Option<RelayReply>,
    },
    PersistCompleted(PersistCompleted),
    Subscribe(mpsc::UnboundedSender<LedgerEvent>),
    ReverifyMemPool,
}

impl MailboxMessage for BlockchainCommand {
    fn is_high_priority(&self) -> bool {
        !matches!(
            self,
            Self::NewTransaction { .. } | Self::ReverifyMemPool
        )
    }

    fn collapse_key(&self) -> Option<&'static str> {
        match self {
            Self::ReverifyMemPool => Some("reverify-mempool"),
            _ => None,
        }
    }
}

/// Events published to subscribers.
#[derive(Debug, Clone)]
pub enum LedgerEvent {
    /// A block was committed; the chain view already reflects it.
    PersistCompleted { block: Block },
    /// A transaction entered the memory pool.
    Transaction(Transaction),
    /// A consensus payload passed validation.
    ConsensusPayload(ConsensusPayload),
    /// An app chain registry change was committed.
    AppChainNotify(AppChainNotification),
}
