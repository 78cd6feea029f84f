//! Change notifications for live connections
//!
//! The bus only says "something changed" for a key (a user id or an
//! application id). Each subscriber owns a one-slot channel, so a burst of
//! broadcasts coalesces into a single pending wake-up and a broadcaster
//! never waits on a slow subscriber.

mod sync;

pub use sync::{run_policy_sync, sync_instruction};

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use metrics::counter;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

use crate::metrics::BROADCAST_SKIPPED_TOTAL;

/// Subscription registry keyed by user or application id
#[derive(Default)]
pub struct NotificationBus {
    subscribers: DashMap<String, HashMap<Uuid, mpsc::Sender<()>>>,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `subscriber` under `key` and return its signal channel
    pub fn subscribe(&self, key: &str, subscriber: Uuid) -> mpsc::Receiver<()> {
        let (tx, rx) = mpsc::channel(1);
        self.register(key, subscriber, tx);
        rx
    }

    /// Register one signal channel under every key in `keys`.
    ///
    /// The registrations are removed when the returned guard is dropped.
    pub fn subscribe_all(self: &Arc<Self>, keys: &[&str], subscriber: Uuid) -> Subscription {
        let (tx, rx) = mpsc::channel(1);
        let mut registered = Vec::with_capacity(keys.len());
        for key in keys {
            if key.is_empty() || registered.iter().any(|k: &String| k.as_str() == *key) {
                continue;
            }
            self.register(key, subscriber, tx.clone());
            registered.push(key.to_string());
        }
        Subscription {
            bus: Arc::clone(self),
            keys: registered,
            subscriber,
            rx,
        }
    }

    fn register(&self, key: &str, subscriber: Uuid, tx: mpsc::Sender<()>) {
        self.subscribers
            .entry(key.to_string())
            .or_default()
            .insert(subscriber, tx);
        tracing::trace!("Subscribed {} to {}", subscriber, key);
    }

    pub fn unsubscribe(&self, key: &str, subscriber: Uuid) {
        if let Some(mut entry) = self.subscribers.get_mut(key) {
            entry.remove(&subscriber);
        }
        self.subscribers.remove_if(key, |_, subs| subs.is_empty());
    }

    /// Wake every subscriber of `key`. Returns how many were signalled.
    ///
    /// A subscriber with a wake-up already pending is skipped.
    pub fn broadcast(&self, key: &str) -> usize {
        let Some(entry) = self.subscribers.get(key) else {
            return 0;
        };

        let mut signalled = 0;
        for tx in entry.values() {
            match tx.try_send(()) {
                Ok(()) => signalled += 1,
                Err(TrySendError::Full(())) => {
                    counter!(BROADCAST_SKIPPED_TOTAL).increment(1);
                }
                Err(TrySendError::Closed(())) => {}
            }
        }
        tracing::debug!("Broadcast {} to {} subscriber(s)", key, signalled);
        signalled
    }

    pub fn subscriber_count(&self, key: &str) -> usize {
        self.subscribers.get(key).map(|s| s.len()).unwrap_or(0)
    }
}

/// Registrations of one connection; unsubscribes on drop
pub struct Subscription {
    bus: Arc<NotificationBus>,
    keys: Vec<String>,
    subscriber: Uuid,
    rx: mpsc::Receiver<()>,
}

impl Subscription {
    pub fn subscriber(&self) -> Uuid {
        self.subscriber
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Wait for the next wake-up. Returns false if the bus dropped us.
    pub async fn changed(&mut self) -> bool {
        self.rx.recv().await.is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        for key in &self.keys {
            self.bus.unsubscribe(key, self.subscriber);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_reaches_key_subscribers_only() {
        let bus = NotificationBus::new();
        let mut a = bus.subscribe("user1", Uuid::new_v4());
        let mut b = bus.subscribe("app1", Uuid::new_v4());

        assert_eq!(bus.broadcast("user1"), 1);
        assert!(a.try_recv().is_ok());
        assert!(b.try_recv().is_err());
        assert_eq!(bus.broadcast("nobody"), 0);
    }

    #[tokio::test]
    async fn test_pending_signal_coalesces() {
        let bus = NotificationBus::new();
        let mut rx = bus.subscribe("user1", Uuid::new_v4());

        assert_eq!(bus.broadcast("user1"), 1);
        assert_eq!(bus.broadcast("user1"), 0);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_subscription_guard_unsubscribes() {
        let bus = Arc::new(NotificationBus::new());
        let id = Uuid::new_v4();
        {
            let subscription = bus.subscribe_all(&["user1", "app1", "user1"], id);
            assert_eq!(subscription.keys(), ["user1", "app1"]);
            assert_eq!(bus.subscriber_count("user1"), 1);
            assert_eq!(bus.subscriber_count("app1"), 1);
        }
        assert_eq!(bus.subscriber_count("user1"), 0);
        assert_eq!(bus.subscriber_count("app1"), 0);
        assert!(bus.subscribers.is_empty());
    }

    #[tokio::test]
    async fn test_shared_channel_across_keys() {
        let bus = Arc::new(NotificationBus::new());
        let mut subscription = bus.subscribe_all(&["user1", "app1"], Uuid::new_v4());

        bus.broadcast("user1");
        bus.broadcast("app1");
        assert!(subscription.changed().await);
        assert!(subscription.rx.try_recv().is_err());
    }
}
