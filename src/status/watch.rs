//! # Per-instance broadcaster and resumable watch streams.
//!
//! [`Broadcaster`] fans each published value out to every live subscriber.
//! Each subscriber owns an unbounded FIFO queue, so a slow reader never delays
//! the others; it only grows its own backlog.
//!
//! [`Watch`] wraps one subscription with a resource-version horizon:
//! ```text
//!  update_state ──► Broadcaster ──┬──► [queue W1] ──► Watch(min=0) ──► frames
//!                                 └──► [queue W2] ──► Watch(min=5) ──► frames
//! ```
//! Dropping a [`Watch`] (or a bare [`Subscription`]) removes its queue.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::record::{StatusRecord, WatchEvent};

/// Keepalive interval used when a watch is idle.
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(5);

/// A single keepalive write. Two of them are sent back to back so a proxy
/// can notice a dead peer.
pub const KEEPALIVE_TOKEN: &str = " ";

struct Subscribers<T> {
    next_id: u64,
    senders: Vec<(u64, mpsc::UnboundedSender<T>)>,
}

/// Fan-out of values to subscriber queues, scoped to one runtime instance.
pub struct Broadcaster<T> {
    inner: Arc<Mutex<Subscribers<T>>>,
}

impl<T: Clone> Broadcaster<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Subscribers {
                next_id: 0,
                senders: Vec::new(),
            })),
        }
    }

    /// Sends `value` to every subscriber; closed queues are pruned.
    pub fn publish(&self, value: T) {
        let mut subs = self.inner.lock();
        subs.senders
            .retain(|(_, tx)| tx.send(value.clone()).is_ok());
    }

    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subs = self.inner.lock();
        let id = subs.next_id;
        subs.next_id += 1;
        subs.senders.push((id, tx));
        Subscription {
            id,
            rx,
            owner: Arc::downgrade(&self.inner),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().senders.len()
    }
}

impl<T: Clone> Default for Broadcaster<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving end of a broadcaster. Unsubscribes on drop.
pub struct Subscription<T> {
    id: u64,
    rx: mpsc::UnboundedReceiver<T>,
    owner: Weak<Mutex<Subscribers<T>>>,
}

impl<T> Subscription<T> {
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(owner) = self.owner.upgrade() {
            owner.lock().senders.retain(|(id, _)| *id != self.id);
        }
    }
}

/// One item of a watch stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Event(WatchEvent<Arc<StatusRecord>>),
    Keepalive,
}

impl Frame {
    /// Bytes to write for this frame.
    pub fn to_wire(&self) -> Result<String, serde_json::Error> {
        match self {
            Frame::Event(event) => event.to_line(),
            Frame::Keepalive => Ok(KEEPALIVE_TOKEN.to_string()),
        }
    }

    pub fn record(&self) -> Option<&StatusRecord> {
        match self {
            Frame::Event(event) => Some(&event.payload),
            Frame::Keepalive => None,
        }
    }
}

/// A single-use stream of status changes above a resource version.
pub struct Watch {
    initial: VecDeque<Arc<StatusRecord>>,
    subscription: Subscription<Arc<StatusRecord>>,
    horizon: u64,
    keepalive: Duration,
    keepalives_owed: u8,
}

impl Watch {
    pub(crate) fn new(
        current: Arc<StatusRecord>,
        subscription: Subscription<Arc<StatusRecord>>,
        min_version: u64,
        keepalive: Duration,
    ) -> Self {
        let mut initial = VecDeque::new();
        if current.resource_version() > min_version {
            initial.push_back(current);
        }
        tracing::debug!(subscriber = subscription.id, min_version, "watch opened");
        Self {
            initial,
            subscription,
            horizon: min_version,
            keepalive,
            keepalives_owed: 0,
        }
    }

    /// Next frame, or `None` once the runtime behind this watch is gone.
    ///
    /// Waits at most one keepalive interval for an update; when it elapses,
    /// this and the following call return [`Frame::Keepalive`].
    pub async fn next(&mut self) -> Option<Frame> {
        if self.keepalives_owed > 0 {
            self.keepalives_owed -= 1;
            return Some(Frame::Keepalive);
        }
        if let Some(record) = self.initial.pop_front() {
            return Some(self.emit(record));
        }
        loop {
            match tokio::time::timeout(self.keepalive, self.subscription.recv()).await {
                Ok(Some(record)) if record.resource_version() > self.horizon => {
                    return Some(self.emit(record));
                }
                Ok(Some(record)) => {
                    tracing::trace!(
                        subscriber = self.subscription.id,
                        version = record.resource_version(),
                        horizon = self.horizon,
                        "resource version too low, skipping"
                    );
                }
                Ok(None) => return None,
                Err(_) => {
                    self.keepalives_owed = 1;
                    return Some(Frame::Keepalive);
                }
            }
        }
    }

    /// Next record, skipping keepalives.
    pub async fn next_record(&mut self) -> Option<Arc<StatusRecord>> {
        loop {
            match self.next().await? {
                Frame::Event(event) => return Some(event.payload),
                Frame::Keepalive => continue,
            }
        }
    }

    fn emit(&mut self, record: Arc<StatusRecord>) -> Frame {
        self.horizon = record.resource_version();
        Frame::Event(WatchEvent::modified(record))
    }
}

impl Drop for Watch {
    fn drop(&mut self) {
        tracing::debug!(subscriber = self.subscription.id, "watch ended");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::StatusStore;
    use proptest::prelude::*;
    use serde_json::Value;

    fn record(version: u64) -> Arc<StatusRecord> {
        Arc::new(StatusRecord::new("ModelInstanceStatus", version, "ready", Value::Null))
    }

    #[tokio::test]
    async fn broadcaster_delivers_in_order_to_every_subscriber() {
        let bus = Broadcaster::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        for v in 1..=3u64 {
            bus.publish(v);
        }

        for sub in [&mut a, &mut b] {
            assert_eq!(sub.recv().await, Some(1));
            assert_eq!(sub.recv().await, Some(2));
            assert_eq!(sub.recv().await, Some(3));
        }
    }

    #[tokio::test]
    async fn dropping_a_subscription_unsubscribes() {
        let bus: Broadcaster<u64> = Broadcaster::new();
        let a = bus.subscribe();
        let _b = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        drop(a);
        assert_eq!(bus.subscriber_count(), 1);
        bus.publish(1);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn watch_emits_snapshot_above_horizon() {
        let bus = Broadcaster::new();
        let mut watch = Watch::new(record(5), bus.subscribe(), 0, DEFAULT_KEEPALIVE);
        let first = watch.next_record().await.unwrap();
        assert_eq!(first.resource_version(), 5);
    }

    #[tokio::test]
    async fn watch_skips_versions_at_or_below_horizon() {
        let bus = Broadcaster::new();
        let mut watch = Watch::new(record(5), bus.subscribe(), 5, DEFAULT_KEEPALIVE);

        bus.publish(record(4));
        bus.publish(record(5));
        bus.publish(record(6));

        assert_eq!(watch.next_record().await.unwrap().resource_version(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_watch_sends_two_keepalives() {
        let bus: Broadcaster<Arc<StatusRecord>> = Broadcaster::new();
        let mut watch = Watch::new(record(1), bus.subscribe(), 1, DEFAULT_KEEPALIVE);

        assert_eq!(watch.next().await, Some(Frame::Keepalive));
        assert_eq!(watch.next().await, Some(Frame::Keepalive));

        bus.publish(record(2));
        let frame = watch.next().await.unwrap();
        assert_eq!(frame.record().unwrap().resource_version(), 2);
        assert_eq!(Frame::Keepalive.to_wire().unwrap(), " ");
    }

    #[tokio::test]
    async fn watch_ends_when_broadcaster_is_gone() {
        let bus: Broadcaster<Arc<StatusRecord>> = Broadcaster::new();
        let mut watch = Watch::new(record(1), bus.subscribe(), 1, DEFAULT_KEEPALIVE);
        drop(bus);
        assert_eq!(watch.next().await, None);
    }

    /// Opens a watch at `min_version` after `before` updates, applies `after`
    /// more, closes the store and returns every version the watch yielded.
    fn yielded_versions(min_version: u64, before: u64, after: u64) -> Vec<u64> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        rt.block_on(async {
            let store = StatusStore::new("ModelInstanceStatus", "started", DEFAULT_KEEPALIVE);
            for _ in 0..before {
                store.update_status(Value::Null);
            }
            let mut watch = store.watch(min_version);
            for _ in 0..after {
                store.update_status(Value::Null);
            }
            drop(store);

            let mut versions = Vec::new();
            while let Some(record) = watch.next_record().await {
                versions.push(record.resource_version());
            }
            versions
        })
    }

    proptest! {
        #[test]
        fn watch_yields_only_newer_versions_in_sequence(
            min_version in 0u64..48,
            before in 0u64..20,
            after in 0u64..20,
        ) {
            let versions = yielded_versions(min_version, before, after);
            let current = 1 + before;
            let expected: Vec<u64> =
                ((min_version + 1).max(current)..=current + after).collect();

            prop_assert!(versions.iter().all(|v| *v > min_version));
            prop_assert!(versions.windows(2).all(|w| w[1] == w[0] + 1));
            prop_assert_eq!(versions, expected);
        }
    }
}
