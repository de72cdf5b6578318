//! Per-peer task bookkeeping.

use crate::message::Message;
use crate::remote_node::RemoteCommand;
use appchain_core::{PeerId, UInt256};
use appchain_io::MailboxSender;
use std::collections::{HashMap, HashSet};
use tokio::time::{Duration, Instant};
use tracing::trace;

pub struct TaskSession {
    peer: PeerId,
    remote: MailboxSender<RemoteCommand>,
    /// Height the peer claims to have.
    last_block_index: u32,
    /// Hashes requested from this peer, with the request time.
    pub(crate) tasks: HashMap<UInt256, Instant>,
    /// Block hashes the peer announced while another peer was already
    /// fetching them.
    pub(crate) available_tasks: HashSet<UInt256>,
}

impl TaskSession {
    pub fn new(peer: PeerId, remote: MailboxSender<RemoteCommand>, start_height: u32) -> Self {
        Self {
            peer,
            remote,
            last_block_index: start_height,
            tasks: HashMap::new(),
            available_tasks: HashSet::new(),
        }
    }

    pub fn peer(&self) -> PeerId {
        self.peer
    }

    pub fn last_block_index(&self) -> u32 {
        self.last_block_index
    }

    pub(crate) fn update_height(&mut self, height: u32) {
        self.last_block_index = self.last_block_index.max(height);
    }

    pub fn has_task(&self) -> bool {
        !self.tasks.is_empty()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn available_count(&self) -> usize {
        self.available_tasks.len()
    }

    pub(crate) fn start_task(&mut self, hash: UInt256) {
        self.tasks.insert(hash, Instant::now());
    }

    /// Removes and returns tasks requested more than `timeout` ago.
    pub(crate) fn expire(&mut self, timeout: Duration) -> Vec<UInt256> {
        let now = Instant::now();
        let expired: Vec<UInt256> = self
            .tasks
            .iter()
            .filter(|(_, started)| now.duration_since(**started) > timeout)
            .map(|(hash, _)| *hash)
            .collect();
        for hash in &expired {
            self.tasks.remove(hash);
        }
        expired
    }

    pub(crate) fn send(&self, message: Message) {
        trace!(peer = %self.peer, command = message.command(), "task request");
        let _ = self.remote.send(RemoteCommand::Send(message));
    }
}
