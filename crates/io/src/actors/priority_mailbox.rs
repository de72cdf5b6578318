//! Priority mailbox for the node's actors.
//!
//! Every actor drains a single mailbox with two FIFO lanes. Control traffic
//! (blocks, headers, consensus payloads, timers, termination) goes to the high
//! lane and is always dequeued before bulk traffic waiting in the low lane.
//! Messages that report a collapse key are dropped on enqueue while an earlier
//! message with the same key is still pending.

use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Notify;

/// Classification hooks for mailbox messages.
pub trait MailboxMessage: Send + 'static {
    /// Whether the message belongs in the high-priority lane.
    fn is_high_priority(&self) -> bool {
        false
    }

    /// Key under which a pending duplicate supersedes this message.
    fn collapse_key(&self) -> Option<&'static str> {
        None
    }
}

/// Returned when the receiving actor has stopped.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("mailbox closed")]
pub struct MailboxClosed;

struct Lanes<M> {
    high: VecDeque<M>,
    low: VecDeque<M>,
    pending_keys: HashSet<&'static str>,
}

struct Shared<M> {
    lanes: Mutex<Lanes<M>>,
    notify: Notify,
    senders: AtomicUsize,
    receiver_alive: AtomicBool,
}

impl<M: MailboxMessage> Shared<M> {
    fn pop(&self) -> Option<M> {
        let mut lanes = self.lanes.lock();
        let message = match lanes.high.pop_front() {
            Some(message) => Some(message),
            None => lanes.low.pop_front(),
        }?;
        if let Some(key) = message.collapse_key() {
            lanes.pending_keys.remove(key);
        }
        Some(message)
    }
}

/// The receiving half, owned by the actor's run loop.
pub struct PriorityMailbox<M: MailboxMessage> {
    shared: Arc<Shared<M>>,
}

/// Cloneable sending half.
pub struct MailboxSender<M: MailboxMessage> {
    shared: Arc<Shared<M>>,
}

impl<M: MailboxMessage> PriorityMailbox<M> {
    /// Creates a new mailbox and its first sender.
    pub fn new() -> (Self, MailboxSender<M>) {
        let shared = Arc::new(Shared {
            lanes: Mutex::new(Lanes {
                high: VecDeque::new(),
                low: VecDeque::new(),
                pending_keys: HashSet::new(),
            }),
            notify: Notify::new(),
            senders: AtomicUsize::new(1),
            receiver_alive: AtomicBool::new(true),
        });
        (
            Self {
                shared: Arc::clone(&shared),
            },
            MailboxSender { shared },
        )
    }

    /// Returns a new sender for this mailbox.
    pub fn sender(&self) -> MailboxSender<M> {
        self.shared.senders.fetch_add(1, Ordering::AcqRel);
        MailboxSender {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Returns the number of queued messages across both lanes.
    pub fn len(&self) -> usize {
        let lanes = self.shared.lanes.lock();
        lanes.high.len() + lanes.low.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dequeues without waiting.
    pub fn try_recv(&mut self) -> Option<M> {
        self.shared.pop()
    }

    /// Receives the next message, high lane first.
    ///
    /// Returns `None` once the mailbox is empty and every sender is dropped.
    pub async fn recv(&mut self) -> Option<M> {
        loop {
            let notified = self.shared.notify.notified();
            if let Some(message) = self.shared.pop() {
                return Some(message);
            }
            if self.shared.senders.load(Ordering::Acquire) == 0 {
                return None;
            }
            notified.await;
        }
    }
}

impl<M: MailboxMessage> Drop for PriorityMailbox<M> {
    fn drop(&mut self) {
        self.shared.receiver_alive.store(false, Ordering::Release);
        let mut lanes = self.shared.lanes.lock();
        lanes.high.clear();
        lanes.low.clear();
        lanes.pending_keys.clear();
    }
}

impl<M: MailboxMessage> MailboxSender<M> {
    /// Enqueues a message.
    ///
    /// A message whose collapse key is already pending is silently dropped and
    /// still reported as delivered.
    pub fn send(&self, message: M) -> Result<(), MailboxClosed> {
        if !self.shared.receiver_alive.load(Ordering::Acquire) {
            return Err(MailboxClosed);
        }
        {
            let mut lanes = self.shared.lanes.lock();
            if let Some(key) = message.collapse_key() {
                if !lanes.pending_keys.insert(key) {
                    return Ok(());
                }
            }
            if message.is_high_priority() {
                lanes.high.push_back(message);
            } else {
                lanes.low.push_back(message);
            }
        }
        self.shared.notify.notify_one();
        Ok(())
    }

    /// Whether the receiving actor is still running.
    pub fn is_closed(&self) -> bool {
        !self.shared.receiver_alive.load(Ordering::Acquire)
    }
}

impl<M: MailboxMessage> Clone for MailboxSender<M> {
    fn clone(&self) -> Self {
        self.shared.senders.fetch_add(1, Ordering::AcqRel);
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<M: MailboxMessage> Drop for MailboxSender<M> {
    fn drop(&mut self) {
        if self.shared.senders.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.shared.notify.notify_one();
        }
    }
}

impl<M: MailboxMessage> fmt::Debug for PriorityMailbox<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PriorityMailbox")
            .field("len", &self.len())
            .finish()
    }
}

impl<M: MailboxMessage> fmt::Debug for MailboxSender<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailboxSender")
            .field("closed", &self.is_closed())
            .finish()
    }
}
