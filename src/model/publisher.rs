//! Coalesced change notification for [`crate::model::exchange_state::ExchangeState`].
//!
//! A venue client applies a whole batch of queued wire messages and fires the
//! publisher once at the end, after it has released the state's write lock,
//! rather than once per message. Observers subscribe to the *event* of a
//! change, not to the payload, and re-read whatever of the state they need
//! through their own read lock.

use tokio::sync::broadcast;

/// Default channel capacity: generous enough that a slow subscriber does not
/// force a lagged reconnect under normal tick rates, but bounded so a
/// subscriber that stops polling entirely is made to notice (`RecvError::Lagged`).
const CHANNEL_CAPACITY: usize = 64;

/// Publishes a zero-sized "something changed" event to any number of
/// subscribers.
#[derive(Debug, Clone)]
pub struct Publisher {
    sender: broadcast::Sender<()>,
}

impl Default for Publisher {
    fn default() -> Self {
        Self::new()
    }
}

impl Publisher {
    /// A publisher with no subscribers yet.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _receiver) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Subscribe to future notifications. Past notifications are not
    /// replayed; a new subscriber should read current state immediately
    /// after subscribing rather than assuming it will see every edge.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.sender.subscribe()
    }

    /// Notify all current subscribers that state has changed. Safe to call
    /// with zero subscribers; the send error in that case is not a fault.
    pub fn notify(&self) {
        let _ = self.sender.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_observes_notifications() {
        let publisher = Publisher::new();
        let mut receiver = publisher.subscribe();

        publisher.notify();
        receiver.recv().await.unwrap();
    }

    #[tokio::test]
    async fn notify_with_no_subscribers_does_not_panic() {
        let publisher = Publisher::new();
        publisher.notify();
    }
}
