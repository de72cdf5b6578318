//! Consensus service - the dBFT state machine.
//!
//! Handlers run synchronously against the [`ConsensusContext`] and never
//! touch the network. Everything the round needs done outside is emitted as
//! a [`ConsensusEvent`] for the actor to carry out.

mod handlers;

use crate::context::{ConsensusContext, Role};
use crate::messages::ConsensusMessage;
use crate::{ConsensusResult, CONSENSUS_VERSION};
use appchain_core::{Block, ConsensusPayload, KeyPair, Transaction, UInt256};
use appchain_ledger::Chain;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

/// Identifies one scheduled timeout. Only the most recently scheduled
/// timer of the current height and view is acted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsensusTimer {
    pub height: u32,
    pub view: u16,
    pub seq: u64,
}

/// Events emitted by the consensus service
#[derive(Debug, Clone)]
pub enum ConsensusEvent {
    /// Push a signed payload to every peer.
    SendDirectly(ConsensusPayload),
    /// Announce proposed transactions so backups can fetch what they miss.
    AnnounceTransactions(Vec<UInt256>),
    /// A finished block for the blockchain to persist and relay.
    RelayBlock(Block),
    /// Request these proposed transactions again from peers.
    RestartTasks(Vec<UInt256>),
    /// Deliver `timer` back to the service after `delay`.
    ScheduleTimer {
        timer: ConsensusTimer,
        delay: Duration,
    },
}

/// The dBFT state machine for one validator.
pub struct ConsensusService {
    chain: Arc<Chain>,
    context: ConsensusContext,
    events: mpsc::UnboundedSender<ConsensusEvent>,
    block_received_at: Instant,
    timer_seq: u64,
    started: bool,
}

impl ConsensusService {
    pub fn new(
        chain: Arc<Chain>,
        key: KeyPair,
        events: mpsc::UnboundedSender<ConsensusEvent>,
    ) -> Self {
        Self {
            chain,
            context: ConsensusContext::new(key),
            events,
            block_received_at: Instant::now(),
            timer_seq: 0,
            started: false,
        }
    }

    pub fn context(&self) -> &ConsensusContext {
        &self.context
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Starts the first round at the current chain height.
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        info!(chain = %self.chain.settings().name, "consensus started");
        self.started = true;
        self.initialize(0);
    }

    /// Enters `view` of the current height, or a new height when `view` is 0.
    pub fn initialize(&mut self, view: u16) {
        if view == 0 {
            if let Err(e) = self.context.reset(&self.chain) {
                error!(error = %e, "cannot start consensus round");
                return;
            }
        } else {
            self.context.change_view(view);
        }
        let Some(my_index) = self.context.my_index else {
            debug!(block_index = self.context.block_index, "not a validator this round");
            return;
        };
        if view > 0 {
            info!(
                block_index = self.context.block_index,
                view,
                primary = self.context.primary_index,
                "view changed"
            );
        }
        info!(
            block_index = self.context.block_index,
            view,
            my_index,
            primary = self.context.primary_index,
            role = if self.context.is_primary() { "primary" } else { "backup" },
            "initialize consensus"
        );
        if self.context.is_primary() {
            self.context.role = Role::Primary {
                request_sent: false,
            };
            let delay = self
                .chain
                .settings()
                .time_per_block()
                .saturating_sub(self.block_received_at.elapsed());
            self.change_timer(delay);
        } else {
            self.context.role = Role::Backup {
                request_received: false,
            };
            self.change_timer(self.view_timeout(view));
        }
    }

    /// `seconds_per_block * (view + 2)`.
    fn view_timeout(&self, view: u16) -> Duration {
        Duration::from_secs(
            self.chain
                .settings()
                .seconds_per_block
                .saturating_mul(u64::from(view) + 2),
        )
    }

    /// Supersedes any pending timer with one firing after `delay`.
    fn change_timer(&mut self, delay: Duration) {
        self.timer_seq += 1;
        let timer = ConsensusTimer {
            height: self.context.block_index,
            view: self.context.view_number,
            seq: self.timer_seq,
        };
        trace!(?timer, ?delay, "timer scheduled");
        self.emit(ConsensusEvent::ScheduleTimer { timer, delay });
    }

    fn emit(&self, event: ConsensusEvent) {
        if self.events.send(event).is_err() {
            debug!("consensus event receiver dropped");
        }
    }

    fn send_payload(&self, payload: ConsensusResult<ConsensusPayload>) {
        match payload {
            Ok(payload) => self.emit(ConsensusEvent::SendDirectly(payload)),
            Err(e) => warn!(error = %e, "cannot build consensus payload"),
        }
    }

    pub fn on_timer(&mut self, timer: ConsensusTimer) {
        if !self.started || self.context.flags.block_sent {
            return;
        }
        if timer.height != self.context.block_index
            || timer.view != self.context.view_number
            || timer.seq != self.timer_seq
        {
            trace!(?timer, "stale timer ignored");
            return;
        }
        info!(height = timer.height, view = timer.view, "timeout");
        match self.context.role {
            Role::Primary {
                request_sent: false,
            } => self.send_prepare_request(),
            Role::Primary { request_sent: true } | Role::Backup { .. } => {
                self.request_change_view()
            }
            Role::Idle => {}
        }
    }

    /// Handles a payload the blockchain has already checked against the
    /// sender's key.
    ///
    /// Payloads for another version, height or previous block are dropped,
    /// as are undecodable ones and, except for view changes, messages from
    /// another view.
    pub fn on_consensus_payload(&mut self, payload: &ConsensusPayload) {
        if !self.started || self.context.flags.block_sent {
            return;
        }
        if payload.version() != CONSENSUS_VERSION {
            debug!(version = payload.version(), "unsupported consensus version");
            return;
        }
        if payload.prev_hash() != self.context.prev_hash
            || payload.block_index() != self.context.block_index
        {
            if self.context.block_index < payload.block_index() {
                debug!(
                    expected = payload.block_index(),
                    current = self.context.block_index,
                    "chain sync needed"
                );
            }
            return;
        }
        let index = payload.validator_index() as usize;
        if index >= self.context.validators.len() || Some(index) == self.context.my_index {
            return;
        }
        let message = match ConsensusMessage::from_bytes(payload.data()) {
            Ok(message) => message,
            Err(e) => {
                debug!(validator = index, error = %e, "undecodable consensus message");
                return;
            }
        };
        if message.view_number() != self.context.view_number
            && !matches!(message, ConsensusMessage::ChangeView { .. })
        {
            return;
        }
        match message {
            ConsensusMessage::ChangeView { body, .. } => self.on_change_view(index, body),
            ConsensusMessage::PrepareRequest { body, .. } => {
                self.on_prepare_request(payload, index, *body)
            }
            ConsensusMessage::PrepareResponse { body, .. } => {
                self.on_prepare_response(index, body)
            }
        }
    }

    /// A transaction entered the pool; it may complete a pending proposal.
    pub fn on_transaction(&mut self, transaction: Transaction) {
        if !self.started || transaction.is_miner() {
            return;
        }
        let context = &self.context;
        if !context.role.request_received()
            || context.flags.signature_sent
            || context.flags.view_changing
            || context.flags.block_sent
        {
            return;
        }
        let hash = transaction.hash();
        if context.transactions.contains_key(&hash) || !context.transaction_hashes.contains(&hash) {
            return;
        }
        self.add_transaction(transaction, true);
    }

    /// A block was persisted: start the next height.
    pub fn on_persist_completed(&mut self, block: &Block) {
        info!(index = block.index(), hash = %block.hash(), "persist block");
        self.block_received_at = Instant::now();
        if self.started {
            self.initialize(0);
        }
    }

    /// Assembles and relays the block once enough signatures are in.
    pub fn check_signatures(&mut self) {
        if self.context.flags.block_sent {
            return;
        }
        if let Some(block) = self.context.create_block() {
            info!(
                index = block.index(),
                hash = %block.hash(),
                transactions = block.transactions().len(),
                "relay block"
            );
            self.context.flags.block_sent = true;
            self.emit(ConsensusEvent::RelayBlock(block));
        }
    }
}
