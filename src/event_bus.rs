//! App chain notification bus.
//!
//! The root chain's blockchain actor publishes every committed app chain
//! registry change here; managers subscribe when they are built.

use appchain_ledger::AppChainNotification;
use tokio::sync::broadcast;
use tracing::trace;

/// Notifications kept for a slow subscriber before it starts lagging.
pub const EVENT_BUS_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct AppChainEventBus {
    sender: broadcast::Sender<AppChainNotification>,
}

impl AppChainEventBus {
    pub fn new() -> Self {
        Self::with_capacity(EVENT_BUS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Delivers `notification` to every current subscriber and returns how
    /// many there were.
    pub fn publish(&self, notification: AppChainNotification) -> usize {
        trace!(
            chain = %notification.chain_hash(),
            kind = notification.kind(),
            "app chain notification"
        );
        self.sender.send(notification).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AppChainNotification> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for AppChainEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use appchain_core::UInt256;

    fn seed_change(byte: u8) -> AppChainNotification {
        AppChainNotification::ChangeSeedList {
            chain_hash: UInt256::from_array([byte; 32]),
            seed_list: vec!["127.0.0.1:20333".into()],
        }
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = AppChainEventBus::new();
        assert_eq!(bus.publish(seed_change(1)), 0);
    }

    #[tokio::test]
    async fn test_every_subscriber_receives_in_order() {
        let bus = AppChainEventBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        assert_eq!(bus.publish(seed_change(1)), 2);
        assert_eq!(bus.publish(seed_change(2)), 2);

        for receiver in [&mut first, &mut second] {
            assert_eq!(receiver.recv().await.unwrap(), seed_change(1));
            assert_eq!(receiver.recv().await.unwrap(), seed_change(2));
        }
    }
}
