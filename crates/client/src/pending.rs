use std::sync::Arc;

use courier_messaging::Envelope;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

struct PendingRequest {
    created_at: Instant,
    sender: oneshot::Sender<Envelope>,
}

/// Requests awaiting a reply, keyed by correlation id.
///
/// Shared between request futures and the background loop. Each entry is
/// removed exactly once: by the loop when it resolves the request, or by the
/// request future when it gives up.
#[derive(Clone, Default)]
pub struct PendingTable {
    requests: Arc<DashMap<String, PendingRequest>>,
}

impl PendingTable {
    pub fn register(&self, id: &str) -> oneshot::Receiver<Envelope> {
        let (sender, receiver) = oneshot::channel();
        self.requests.insert(
            id.to_string(),
            PendingRequest {
                created_at: Instant::now(),
                sender,
            },
        );
        receiver
    }

    pub fn contains(&self, id: &str) -> bool {
        self.requests.contains_key(id)
    }

    /// Drops the entry without resolving it. Returns whether it was present.
    pub fn remove(&self, id: &str) -> bool {
        self.requests.remove(id).is_some()
    }

    /// Hands `envelope` to the waiting request. Returns whether a caller
    /// was still waiting for it.
    pub fn resolve(&self, id: &str, envelope: Envelope) -> bool {
        let Some((_, request)) = self.requests.remove(id) else {
            return false;
        };

        debug!(
            id,
            elapsed_ms = request.created_at.elapsed().as_millis(),
            "resolving request"
        );

        request.sender.send(envelope).is_ok()
    }

    /// Ids pending at the time of the call.
    pub fn snapshot(&self) -> Vec<String> {
        self.requests.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Drops every entry, waking each waiter with a closed channel.
    pub fn clear(&self) {
        self.requests.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[tokio::test]
    async fn test_resolve_wakes_waiter_once() {
        let table = PendingTable::default();
        let receiver = table.register("abc");

        assert!(table.contains("abc"));
        assert!(table.resolve("abc", Envelope::new("abc", json!({"results": 1}))));
        assert!(!table.resolve("abc", Envelope::new("abc", json!({}))));
        assert!(!table.contains("abc"));

        let envelope = receiver.await.unwrap();
        assert_eq!(envelope.message, json!({"results": 1}));
    }

    #[tokio::test]
    async fn test_resolve_after_receiver_dropped() {
        let table = PendingTable::default();
        drop(table.register("abc"));

        assert!(!table.resolve("abc", Envelope::new("abc", json!({}))));
        assert_eq!(table.len(), 0);
    }

    #[tokio::test]
    async fn test_clear_closes_waiters() {
        let table = PendingTable::default();
        let receiver = table.register("abc");

        table.clear();

        assert!(receiver.await.is_err());
    }

    #[test]
    fn test_snapshot_and_remove() {
        let table = PendingTable::default();
        let _first = table.register("a");
        let _second = table.register("b");

        let mut ids = table.snapshot();
        ids.sort();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);

        assert!(table.remove("a"));
        assert!(!table.remove("a"));
        assert_eq!(table.len(), 1);
    }
}
