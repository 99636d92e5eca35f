use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::Value;

use super::record::StatusRecord;
use super::watch::{Broadcaster, Watch};

/// Current status of one plugin plus the broadcaster that announces changes.
///
/// Writers hold the lock while broadcasting, so every subscriber sees versions
/// in the order they were produced.
pub struct StatusStore {
    kind: &'static str,
    current: RwLock<Arc<StatusRecord>>,
    channel: Broadcaster<Arc<StatusRecord>>,
    keepalive: Duration,
}

impl StatusStore {
    /// Creates a store at resource version 1.
    pub fn new(kind: &'static str, initial_state: &str, keepalive: Duration) -> Self {
        Self {
            kind,
            current: RwLock::new(Arc::new(StatusRecord::new(
                kind,
                1,
                initial_state,
                Value::Null,
            ))),
            channel: Broadcaster::new(),
            keepalive,
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn status(&self) -> Arc<StatusRecord> {
        Arc::clone(&self.current.read())
    }

    /// Replaces the record with the next version and broadcasts it.
    ///
    /// `state = None` keeps the current state.
    pub fn update_state(&self, state: Option<&str>, payload: Value) -> Arc<StatusRecord> {
        let mut current = self.current.write();
        let state = state.unwrap_or(current.state.as_str());
        let version = current.resource_version() + 1;
        let next = Arc::new(StatusRecord::new(self.kind, version, state, payload));
        tracing::debug!(kind = self.kind, version, state = %next.state, "status updated");
        *current = Arc::clone(&next);
        self.channel.publish(Arc::clone(&next));
        next
    }

    /// Publishes a payload without changing the state.
    pub fn update_status(&self, payload: Value) -> Arc<StatusRecord> {
        self.update_state(None, payload)
    }

    /// Opens a watch yielding records with a version above `min_version`.
    ///
    /// The snapshot is taken and the subscription registered under the read
    /// lock, so no update can fall between the two.
    pub fn watch(&self, min_version: u64) -> Watch {
        let current = self.current.read();
        let subscription = self.channel.subscribe();
        Watch::new(Arc::clone(&current), subscription, min_version, self.keepalive)
    }

    pub fn watcher_count(&self) -> usize {
        self.channel.subscriber_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::watch::DEFAULT_KEEPALIVE;
    use serde_json::json;

    fn store() -> StatusStore {
        StatusStore::new("ModelInstanceStatus", "started", DEFAULT_KEEPALIVE)
    }

    #[test]
    fn starts_at_version_one() {
        let status = store().status();
        assert_eq!(status.resource_version(), 1);
        assert_eq!(status.state, "started");
        assert_eq!(status.kind(), "ModelInstanceStatus");
    }

    #[test]
    fn every_update_bumps_version_by_one() {
        let store = store();
        for expected in 2..=20u64 {
            let record = if expected % 2 == 0 {
                store.update_state(Some("ready"), Value::Null)
            } else {
                store.update_status(json!({"step": expected}))
            };
            assert_eq!(record.resource_version(), expected);
            assert_eq!(store.status().resource_version(), expected);
        }
    }

    #[test]
    fn update_status_keeps_state() {
        let store = store();
        store.update_state(Some("training"), Value::Null);
        let record = store.update_status(json!({"epoch": 3}));
        assert_eq!(record.state, "training");
        assert_eq!(record.payload, json!({"epoch": 3}));
    }

    #[test]
    fn old_records_are_not_mutated() {
        let store = store();
        let before = store.status();
        store.update_state(Some("initializing"), Value::Null);
        assert_eq!(before.state, "started");
        assert_eq!(before.resource_version(), 1);
    }

    #[test]
    fn versions_stay_ordered_under_concurrent_writers() {
        let store = Arc::new(store());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    (0..50)
                        .map(|i| store.update_status(json!(i)).resource_version())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        seen.sort_unstable();
        let expected: Vec<u64> = (2..=401).collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn dropped_watch_leaves_no_subscriber() {
        let store = store();
        let watch = store.watch(0);
        assert_eq!(store.watcher_count(), 1);
        drop(watch);
        assert_eq!(store.watcher_count(), 0);
    }

    #[tokio::test]
    async fn watchers_with_different_horizons_see_each_update_once() {
        let store = store();
        for _ in 0..4 {
            store.update_status(Value::Null);
        }
        assert_eq!(store.status().resource_version(), 5);

        let mut from_zero = store.watch(0);
        let mut from_five = store.watch(5);

        store.update_state(Some("initializing"), Value::Null);
        store.update_state(Some("initialized"), Value::Null);

        let seen: Vec<u64> = vec![
            from_zero.next_record().await.unwrap().resource_version(),
            from_zero.next_record().await.unwrap().resource_version(),
            from_zero.next_record().await.unwrap().resource_version(),
        ];
        assert_eq!(seen, vec![5, 6, 7]);

        let seen: Vec<u64> = vec![
            from_five.next_record().await.unwrap().resource_version(),
            from_five.next_record().await.unwrap().resource_version(),
        ];
        assert_eq!(seen, vec![6, 7]);
    }
}
