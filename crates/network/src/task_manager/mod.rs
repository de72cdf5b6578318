//! Task manager actor.
//!
//! Decides what to fetch from which peer. A hash is requested from at most
//! one peer at a time: the global in-flight set is claimed before a
//! `getdata` goes out and released on completion, expiry or disconnect.
//! Header sync is serialised through the `HEADER_TASK` sentinel, and block
//! range sync only starts once no header batch is outstanding.

mod session;

pub use session::TaskSession;

use crate::message::Message;
use crate::payloads::{GetBlocksPayload, InvGroupPayload, InvPayload};
use crate::remote_node::RemoteCommand;
use crate::{TASK_SWEEP_INTERVAL, TASK_TIMEOUT};
use appchain_core::{InventoryType, PeerId, UInt256};
use appchain_io::{MailboxMessage, MailboxSender, PriorityMailbox};
use appchain_ledger::Chain;
use lru::LruCache;
use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Global task key held while a header batch is outstanding.
pub const HEADER_TASK: UInt256 = UInt256::zero();

pub enum TaskCommand {
    /// Handshake finished.
    Register {
        peer: PeerId,
        start_height: u32,
        remote: MailboxSender<RemoteCommand>,
    },
    /// The peer reported a new height.
    Update { peer: PeerId, last_block_index: u32 },
    NewTasks { peer: PeerId, payload: InvPayload },
    NewGroupTasks { peer: PeerId, payload: InvGroupPayload },
    /// An announced object arrived.
    TaskCompleted { peer: PeerId, hash: UInt256 },
    /// The blockchain processed a header batch from the peer.
    HeaderTaskCompleted { peer: PeerId },
    /// Forget and re-request `hashes` from every peer.
    RestartTasks {
        inv_type: InventoryType,
        hashes: Vec<UInt256>,
    },
    Terminated { peer: PeerId },
    /// Expire stale tasks.
    Sweep,
}

impl std::fmt::Debug for TaskCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Register { peer, start_height, .. } => f
                .debug_struct("Register")
                .field("peer", peer)
                .field("start_height", start_height)
                .finish_non_exhaustive(),
            Self::Update { peer, last_block_index } => f
                .debug_struct("Update")
                .field("peer", peer)
                .field("last_block_index", last_block_index)
                .finish(),
            Self::NewTasks { peer, payload } => {
                f.debug_struct("NewTasks").field("peer", peer).field("payload", payload).finish()
            }
            Self::NewGroupTasks { peer, payload } => f
                .debug_struct("NewGroupTasks")
                .field("peer", peer)
                .field("hashes", &payload.hashes.len())
                .finish(),
            Self::TaskCompleted { peer, hash } => {
                f.debug_struct("TaskCompleted").field("peer", peer).field("hash", hash).finish()
            }
            Self::HeaderTaskCompleted { peer } => {
                f.debug_struct("HeaderTaskCompleted").field("peer", peer).finish()
            }
            Self::RestartTasks { inv_type, hashes } => f
                .debug_struct("RestartTasks")
                .field("inv_type", inv_type)
                .field("hashes", &hashes.len())
                .finish(),
            Self::Terminated { peer } => f.debug_struct("Terminated").field("peer", peer).finish(),
            Self::Sweep => f.write_str("Sweep"),
        }
    }
}

impl MailboxMessage for TaskCommand {
    fn is_high_priority(&self) -> bool {
        match self {
            Self::NewTasks { payload, .. } => payload.inv_type != InventoryType::Transaction,
            Self::NewGroupTasks { payload, .. } => payload.inv_type != InventoryType::Transaction,
            _ => true,
        }
    }

    fn collapse_key(&self) -> Option<&'static str> {
        match self {
            Self::Sweep => Some("task-sweep"),
            _ => None,
        }
    }
}

pub struct TaskManager {
    chain: Arc<Chain>,
    mailbox: PriorityMailbox<TaskCommand>,
    sessions: HashMap<PeerId, TaskSession>,
    global_tasks: HashSet<UInt256>,
    known_hashes: LruCache<UInt256, ()>,
}

impl TaskManager {
    pub fn new(chain: Arc<Chain>, mailbox: PriorityMailbox<TaskCommand>) -> Self {
        let capacity = chain.settings().memory_pool_max_transactions * 2;
        Self {
            chain,
            mailbox,
            sessions: HashMap::new(),
            global_tasks: HashSet::new(),
            known_hashes: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)),
        }
    }

    pub fn session(&self, peer: &PeerId) -> Option<&TaskSession> {
        self.sessions.get(peer)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_in_flight(&self, hash: &UInt256) -> bool {
        self.global_tasks.contains(hash)
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        let mut sweep = tokio::time::interval_at(
            tokio::time::Instant::now() + TASK_SWEEP_INTERVAL,
            TASK_SWEEP_INTERVAL,
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sweep.tick() => self.handle(TaskCommand::Sweep),
                command = self.mailbox.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
            }
        }
        debug!("task manager stopped");
    }

    pub fn handle(&mut self, command: TaskCommand) {
        match command {
            TaskCommand::Register {
                peer,
                start_height,
                remote,
            } => {
                debug!(%peer, start_height, "task session registered");
                self.sessions
                    .insert(peer, TaskSession::new(peer, remote, start_height));
                self.request_tasks(peer);
            }
            TaskCommand::Update {
                peer,
                last_block_index,
            } => {
                if let Some(session) = self.sessions.get_mut(&peer) {
                    session.update_height(last_block_index);
                    self.request_tasks(peer);
                }
            }
            TaskCommand::NewTasks { peer, payload } => {
                self.on_new_tasks(peer, payload.inv_type, vec![payload.hash]);
            }
            TaskCommand::NewGroupTasks { peer, payload } => {
                self.on_new_tasks(peer, payload.inv_type, payload.hashes);
            }
            TaskCommand::TaskCompleted { peer, hash } => self.on_task_completed(peer, hash),
            TaskCommand::HeaderTaskCompleted { peer } => {
                let Some(session) = self.sessions.get_mut(&peer) else {
                    return;
                };
                if session.tasks.remove(&HEADER_TASK).is_some() {
                    self.global_tasks.remove(&HEADER_TASK);
                }
                self.request_tasks(peer);
            }
            TaskCommand::RestartTasks { inv_type, hashes } => {
                self.on_restart_tasks(inv_type, hashes)
            }
            TaskCommand::Terminated { peer } => self.on_terminated(peer),
            TaskCommand::Sweep => self.on_sweep(),
        }
    }

    fn is_known(&self, inv_type: InventoryType, hash: &UInt256) -> bool {
        if self.known_hashes.contains(hash) {
            return true;
        }
        match inv_type {
            InventoryType::Block => self.chain.contains_block(hash),
            InventoryType::Transaction => self.chain.contains_transaction(hash),
            InventoryType::Consensus => false,
        }
    }

    fn on_new_tasks(&mut self, peer: PeerId, inv_type: InventoryType, hashes: Vec<UInt256>) {
        if !self.sessions.contains_key(&peer) {
            return;
        }
        // Transactions are useless while blocks are still syncing.
        if inv_type == InventoryType::Transaction
            && self.chain.height() < self.chain.header_height()
        {
            self.request_tasks(peer);
            return;
        }

        let mut seen = HashSet::new();
        let mut fresh: Vec<UInt256> = hashes
            .into_iter()
            .filter(|hash| seen.insert(*hash) && !self.is_known(inv_type, hash))
            .collect();
        let Some(session) = self.sessions.get_mut(&peer) else {
            return;
        };
        if inv_type == InventoryType::Block {
            session.available_tasks.extend(
                fresh
                    .iter()
                    .filter(|hash| self.global_tasks.contains(*hash))
                    .copied(),
            );
        }
        fresh.retain(|hash| !self.global_tasks.contains(hash));
        if fresh.is_empty() {
            self.request_tasks(peer);
            return;
        }

        for hash in &fresh {
            self.global_tasks.insert(*hash);
            session.start_task(*hash);
        }
        trace!(%peer, %inv_type, count = fresh.len(), "requesting inventory");
        for message in Message::request(inv_type, &fresh) {
            session.send(message);
        }
    }

    fn on_task_completed(&mut self, peer: PeerId, hash: UInt256) {
        self.known_hashes.put(hash, ());
        self.global_tasks.remove(&hash);
        for session in self.sessions.values_mut() {
            session.available_tasks.remove(&hash);
        }
        if let Some(session) = self.sessions.get_mut(&peer) {
            session.tasks.remove(&hash);
            self.request_tasks(peer);
        }
    }

    fn on_restart_tasks(&mut self, inv_type: InventoryType, hashes: Vec<UInt256>) {
        for hash in &hashes {
            self.known_hashes.pop(hash);
            self.global_tasks.remove(hash);
        }
        debug!(%inv_type, count = hashes.len(), "restarting tasks");
        let messages = Message::request(inv_type, &hashes);
        for session in self.sessions.values() {
            for message in &messages {
                session.send(message.clone());
            }
        }
    }

    fn on_terminated(&mut self, peer: PeerId) {
        let Some(session) = self.sessions.remove(&peer) else {
            return;
        };
        for hash in session.tasks.keys() {
            self.global_tasks.remove(hash);
        }
        debug!(%peer, released = session.task_count(), "task session closed");
        let peers: Vec<PeerId> = self.sessions.keys().copied().collect();
        for peer in peers {
            self.request_tasks(peer);
        }
    }

    fn on_sweep(&mut self) {
        let mut expired = 0;
        for session in self.sessions.values_mut() {
            for hash in session.expire(TASK_TIMEOUT) {
                self.global_tasks.remove(&hash);
                expired += 1;
            }
        }
        if expired > 0 {
            debug!(expired, "stale tasks released");
        }
        let peers: Vec<PeerId> = self.sessions.keys().copied().collect();
        for peer in peers {
            self.request_tasks(peer);
        }
    }

    /// Gives an idle session something to do: deferred block hashes first,
    /// then a header batch, then a block range.
    fn request_tasks(&mut self, peer: PeerId) {
        let Self {
            chain,
            sessions,
            global_tasks,
            known_hashes,
            ..
        } = self;
        let Some(session) = sessions.get_mut(&peer) else {
            return;
        };
        if session.has_task() {
            return;
        }

        if !session.available_tasks.is_empty() {
            session
                .available_tasks
                .retain(|hash| !known_hashes.contains(hash) && !chain.contains_block(hash));
            let claim: Vec<UInt256> = session
                .available_tasks
                .iter()
                .filter(|hash| !global_tasks.contains(*hash))
                .copied()
                .collect();
            if !claim.is_empty() {
                for hash in &claim {
                    session.available_tasks.remove(hash);
                    global_tasks.insert(*hash);
                    session.start_task(*hash);
                }
                for message in Message::request(InventoryType::Block, &claim) {
                    session.send(message);
                }
                return;
            }
        }

        let height = chain.height();
        let header_height = chain.header_height();
        if !global_tasks.contains(&HEADER_TASK) && header_height < session.last_block_index() {
            if let Some(hash) = chain.current_header_hash() {
                global_tasks.insert(HEADER_TASK);
                session.start_task(HEADER_TASK);
                session.send(Message::GetHeaders(GetBlocksPayload::new(hash)));
            }
        } else if height < session.last_block_index() {
            let Some(mut hash) = chain.current_block_hash() else {
                return;
            };
            for index in height + 1..=header_height {
                let Some(next) = chain.header_hash(index) else {
                    break;
                };
                if !global_tasks.contains(&next) {
                    break;
                }
                hash = next;
            }
            session.send(Message::GetBlocks(GetBlocksPayload::new(hash)));
        }
    }
}
