//! Remote node actor.
//!
//! One per connection. Inbound frames and outbound requests from the rest
//! of the node share its priority mailbox; the protocol handler decides what
//! an inbound message means. Stopping for any reason reports `Terminated` to
//! the task manager and the local node.

use crate::local_node::LocalNodeCommand;
use crate::message::Message;
use crate::protocol_handler::{inbound_hashes, ProtocolHandler};
use crate::task_manager::TaskCommand;
use crate::RELAY_CACHE_CAPACITY;
use appchain_core::{PeerId, UInt256};
use appchain_io::{MailboxMessage, MailboxSender, PriorityMailbox};
use lru::LruCache;
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Hashes remembered per peer to avoid announcing back what it sent us.
const KNOWN_HASHES_CAPACITY: usize = RELAY_CACHE_CAPACITY * 10;

#[derive(Debug)]
pub enum RemoteCommand {
    /// A decoded frame from the socket.
    Inbound(Message),
    /// A message to write to the socket.
    Send(Message),
    /// Close the connection.
    Disconnect(String),
}

impl MailboxMessage for RemoteCommand {
    fn is_high_priority(&self) -> bool {
        match self {
            Self::Inbound(message) | Self::Send(message) => message.is_high_priority(),
            Self::Disconnect(_) => true,
        }
    }

    fn collapse_key(&self) -> Option<&'static str> {
        match self {
            Self::Inbound(Message::GetAddr) => Some("recv-getaddr"),
            Self::Inbound(Message::GetHeaders(_)) => Some("recv-getheaders"),
            Self::Inbound(Message::GetBlocks(_)) => Some("recv-getblocks"),
            Self::Send(Message::GetAddr) => Some("send-getaddr"),
            Self::Send(Message::GetHeaders(_)) => Some("send-getheaders"),
            Self::Send(Message::GetBlocks(_)) => Some("send-getblocks"),
            _ => None,
        }
    }
}

pub struct RemoteNode {
    peer: PeerId,
    address: SocketAddr,
    mailbox: PriorityMailbox<RemoteCommand>,
    outbound: mpsc::UnboundedSender<Message>,
    handler: ProtocolHandler,
    local_node: MailboxSender<LocalNodeCommand>,
    task_manager: MailboxSender<TaskCommand>,
    known_hashes: LruCache<UInt256, ()>,
}

impl RemoteNode {
    pub fn new(
        peer: PeerId,
        address: SocketAddr,
        mailbox: PriorityMailbox<RemoteCommand>,
        outbound: mpsc::UnboundedSender<Message>,
        handler: ProtocolHandler,
        local_node: MailboxSender<LocalNodeCommand>,
        task_manager: MailboxSender<TaskCommand>,
    ) -> Self {
        Self {
            peer,
            address,
            mailbox,
            outbound,
            handler,
            local_node,
            task_manager,
            known_hashes: LruCache::new(
                NonZeroUsize::new(KNOWN_HASHES_CAPACITY).unwrap_or(NonZeroUsize::MIN),
            ),
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        info!(peer = %self.peer, address = %self.address, "peer connected");
        let version = self.handler.version_message();
        let reason = if self.write(version) {
            self.event_loop(&cancel).await
        } else {
            "connection closed".to_string()
        };

        info!(peer = %self.peer, address = %self.address, %reason, "peer disconnected");
        let _ = self.task_manager.send(TaskCommand::Terminated { peer: self.peer });
        let _ = self
            .local_node
            .send(LocalNodeCommand::Terminated(self.peer));
    }

    async fn event_loop(&mut self, cancel: &CancellationToken) -> String {
        loop {
            let command = tokio::select! {
                _ = cancel.cancelled() => return "shutdown".to_string(),
                command = self.mailbox.recv() => command,
            };
            match command {
                Some(RemoteCommand::Inbound(message)) => {
                    for hash in inbound_hashes(&message) {
                        self.known_hashes.put(hash, ());
                    }
                    match self.handler.handle(message) {
                        Ok(replies) => {
                            for reply in replies {
                                if !self.write(reply) {
                                    return "connection closed".to_string();
                                }
                            }
                        }
                        Err(e) => {
                            warn!(peer = %self.peer, error = %e, "dropping peer");
                            return e.to_string();
                        }
                    }
                }
                Some(RemoteCommand::Send(message)) => {
                    if !self.handler.is_handshaked() {
                        debug!(peer = %self.peer, command = message.command(), "not ready, message dropped");
                        continue;
                    }
                    if let Some(message) = self.filter_announcement(message) {
                        if !self.write(message) {
                            return "connection closed".to_string();
                        }
                    }
                }
                Some(RemoteCommand::Disconnect(reason)) => return reason,
                None => return "mailbox closed".to_string(),
            }
        }
    }

    /// Drops announced hashes the peer already has.
    fn filter_announcement(&mut self, message: Message) -> Option<Message> {
        match message {
            Message::Inv(payload) => {
                if self.known_hashes.put(payload.hash, ()).is_some() {
                    None
                } else {
                    Some(Message::Inv(payload))
                }
            }
            Message::InvGroup(mut payload) => {
                payload
                    .hashes
                    .retain(|hash| self.known_hashes.put(*hash, ()).is_none());
                (!payload.hashes.is_empty()).then_some(Message::InvGroup(payload))
            }
            other => Some(other),
        }
    }

    fn write(&self, message: Message) -> bool {
        self.outbound.send(message).is_ok()
    }
}
