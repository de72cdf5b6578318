//! Consensus actor.
//!
//! Feeds ledger events and timers into a [`ConsensusService`] one at a time
//! and carries out the events it emits: payloads and blocks go to the local
//! node, missing transactions to the task manager, timers to `tokio::time`.

use crate::service::{ConsensusEvent, ConsensusService, ConsensusTimer};
use appchain_core::{Block, ConsensusPayload, Inventory, InventoryType, KeyPair, Transaction};
use appchain_io::{MailboxMessage, MailboxSender, PriorityMailbox};
use appchain_ledger::{BlockchainHandle, Chain, LedgerEvent};
use appchain_network::{LocalNodeCommand, LocalNodeHandle, TaskCommand};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub enum ConsensusCommand {
    Start,
    Payload(ConsensusPayload),
    Transaction(Transaction),
    PersistCompleted(Block),
    Timer(ConsensusTimer),
}

impl fmt::Debug for ConsensusCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => f.write_str("Start"),
            Self::Payload(payload) => f.debug_tuple("Payload").field(&payload.hash()).finish(),
            Self::Transaction(tx) => f.debug_tuple("Transaction").field(&tx.hash()).finish(),
            Self::PersistCompleted(block) => {
                f.debug_tuple("PersistCompleted").field(&block.index()).finish()
            }
            Self::Timer(timer) => f.debug_tuple("Timer").field(timer).finish(),
        }
    }
}

impl MailboxMessage for ConsensusCommand {
    fn is_high_priority(&self) -> bool {
        !matches!(self, Self::Transaction(_))
    }

    fn collapse_key(&self) -> Option<&'static str> {
        match self {
            Self::Start => Some("consensus-start"),
            _ => None,
        }
    }
}

impl ConsensusCommand {
    fn from_ledger_event(event: LedgerEvent) -> Option<Self> {
        match event {
            LedgerEvent::PersistCompleted { block } => Some(Self::PersistCompleted(block)),
            LedgerEvent::Transaction(tx) => Some(Self::Transaction(tx)),
            LedgerEvent::ConsensusPayload(payload) => Some(Self::Payload(payload)),
            LedgerEvent::AppChainNotify(_) => None,
        }
    }
}

pub struct ConsensusActor {
    service: ConsensusService,
    mailbox: PriorityMailbox<ConsensusCommand>,
    self_sender: MailboxSender<ConsensusCommand>,
    events: mpsc::UnboundedReceiver<ConsensusEvent>,
    blockchain: BlockchainHandle,
    local_node: LocalNodeHandle,
    task_manager: MailboxSender<TaskCommand>,
    cancel: CancellationToken,
}

impl ConsensusActor {
    pub fn new(
        chain: Arc<Chain>,
        key: KeyPair,
        mailbox: PriorityMailbox<ConsensusCommand>,
        blockchain: BlockchainHandle,
        local_node: LocalNodeHandle,
        task_manager: MailboxSender<TaskCommand>,
    ) -> Self {
        let (event_tx, events) = mpsc::unbounded_channel();
        Self {
            service: ConsensusService::new(chain, key, event_tx),
            self_sender: mailbox.sender(),
            mailbox,
            events,
            blockchain,
            local_node,
            task_manager,
            cancel: CancellationToken::new(),
        }
    }

    pub fn service(&self) -> &ConsensusService {
        &self.service
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        self.cancel = cancel.clone();
        match self.blockchain.subscribe() {
            Ok(ledger_events) => {
                tokio::spawn(forward_ledger_events(
                    ledger_events,
                    self.self_sender.clone(),
                    cancel.clone(),
                ));
            }
            Err(e) => warn!(error = %e, "cannot subscribe to ledger events"),
        }
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                command = self.mailbox.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
            }
        }
        debug!("consensus actor stopped");
    }

    pub fn handle(&mut self, command: ConsensusCommand) {
        match command {
            ConsensusCommand::Start => self.service.start(),
            ConsensusCommand::Payload(payload) => self.service.on_consensus_payload(&payload),
            ConsensusCommand::Transaction(tx) => self.service.on_transaction(tx),
            ConsensusCommand::PersistCompleted(block) => self.service.on_persist_completed(&block),
            ConsensusCommand::Timer(timer) => self.service.on_timer(timer),
        }
        while let Ok(event) = self.events.try_recv() {
            self.dispatch(event);
        }
    }

    fn dispatch(&self, event: ConsensusEvent) {
        match event {
            ConsensusEvent::SendDirectly(payload) => {
                self.local_node.send_directly(Inventory::Consensus(payload));
            }
            ConsensusEvent::AnnounceTransactions(hashes) => {
                self.local_node.send(LocalNodeCommand::BroadcastInventory {
                    inv_type: InventoryType::Transaction,
                    hashes,
                });
            }
            ConsensusEvent::RelayBlock(block) => {
                if !self.local_node.send(LocalNodeCommand::Relay {
                    inventory: Inventory::Block(block),
                    reply: None,
                }) {
                    warn!("local node unavailable, block not relayed");
                }
            }
            ConsensusEvent::RestartTasks(hashes) => {
                let _ = self.task_manager.send(TaskCommand::RestartTasks {
                    inv_type: InventoryType::Transaction,
                    hashes,
                });
            }
            ConsensusEvent::ScheduleTimer { timer, delay } => {
                let sender = self.self_sender.clone();
                let cancel = self.cancel.child_token();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = tokio::time::sleep(delay) => {
                            let _ = sender.send(ConsensusCommand::Timer(timer));
                        }
                    }
                });
            }
        }
    }
}

async fn forward_ledger_events(
    mut events: mpsc::UnboundedReceiver<LedgerEvent>,
    sender: MailboxSender<ConsensusCommand>,
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
        if let Some(command) = ConsensusCommand::from_ledger_event(event) {
            if sender.send(command).is_err() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transactions_are_low_priority() {
        let tx = Transaction::miner(1, Vec::new());
        assert!(!ConsensusCommand::Transaction(tx).is_high_priority());
        assert!(ConsensusCommand::Start.is_high_priority());
        assert_eq!(ConsensusCommand::Start.collapse_key(), Some("consensus-start"));
        let timer = ConsensusTimer {
            height: 1,
            view: 0,
            seq: 1,
        };
        assert!(ConsensusCommand::Timer(timer).is_high_priority());
        assert_eq!(ConsensusCommand::Timer(timer).collapse_key(), None);
    }
}
