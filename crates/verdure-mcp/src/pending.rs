//! Outbound request correlation: `id → PendingRequest`.
//!
//! Ids are assigned monotonically in enqueue order; responses resolve by id
//! and may arrive in any order. Entries not resolved within the request
//! timeout are rejected and removed, so the map returns to empty whenever
//! the system is idle.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::McpError;

struct PendingEntry {
    method: String,
    resolver: oneshot::Sender<Result<Value, McpError>>,
}

/// The pending-request map.
pub struct PendingRequests {
    next_id: AtomicU64,
    entries: Mutex<HashMap<u64, PendingEntry>>,
}

impl PendingRequests {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate the next request id.
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Register a pending request and get the completion receiver.
    pub fn register(
        &self,
        id: u64,
        method: impl Into<String>,
    ) -> oneshot::Receiver<Result<Value, McpError>> {
        let (tx, rx) = oneshot::channel();
        let mut entries = self.lock();
        entries.insert(
            id,
            PendingEntry {
                method: method.into(),
                resolver: tx,
            },
        );
        rx
    }

    /// Resolve a pending request. Returns false when the id is unknown
    /// (already timed out, or never ours).
    pub fn resolve(&self, id: u64, outcome: Result<Value, McpError>) -> bool {
        let entry = self.lock().remove(&id);
        match entry {
            Some(entry) => {
                tracing::debug!(id, method = %entry.method, ok = outcome.is_ok(), "Resolving pending request");
                // The caller may have given up; that is not an error here.
                let _ = entry.resolver.send(outcome);
                true
            }
            None => {
                tracing::debug!(id, "Response for unknown or expired request id");
                false
            }
        }
    }

    /// Drop a pending entry without resolving (timeout path).
    pub fn remove(&self, id: u64) {
        self.lock().remove(&id);
    }

    /// Reject everything in flight (connection loss).
    pub fn reject_all(&self, reason: &str) {
        let entries: Vec<PendingEntry> = {
            let mut map = self.lock();
            map.drain().map(|(_, entry)| entry).collect()
        };
        for entry in entries {
            let _ = entry.resolver.send(Err(McpError::Send(reason.to_string())));
        }
    }

    /// Number of requests awaiting a response.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, PendingEntry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ids_are_monotonic_from_one() {
        let pending = PendingRequests::new();
        assert_eq!(pending.next_id(), 1);
        assert_eq!(pending.next_id(), 2);
        assert_eq!(pending.next_id(), 3);
    }

    #[tokio::test]
    async fn resolve_delivers_result_and_empties_map() {
        let pending = PendingRequests::new();
        let id = pending.next_id();
        let rx = pending.register(id, "tools/list");
        assert_eq!(pending.len(), 1);

        assert!(pending.resolve(id, Ok(json!({"tools": []}))));
        assert!(pending.is_empty());

        let value = rx.await.unwrap().unwrap();
        assert_eq!(value, json!({"tools": []}));
    }

    #[tokio::test]
    async fn out_of_order_resolution_matches_by_id() {
        let pending = PendingRequests::new();
        let id_a = pending.next_id();
        let id_b = pending.next_id();
        let rx_a = pending.register(id_a, "a");
        let rx_b = pending.register(id_b, "b");

        assert!(pending.resolve(id_b, Ok(json!("b"))));
        assert!(pending.resolve(id_a, Ok(json!("a"))));

        assert_eq!(rx_a.await.unwrap().unwrap(), json!("a"));
        assert_eq!(rx_b.await.unwrap().unwrap(), json!("b"));
    }

    #[test]
    fn unknown_id_is_not_resolved() {
        let pending = PendingRequests::new();
        assert!(!pending.resolve(99, Ok(json!(null))));
    }

    #[tokio::test]
    async fn reject_all_fails_every_waiter() {
        let pending = PendingRequests::new();
        let rx_a = pending.register(pending.next_id(), "a");
        let rx_b = pending.register(pending.next_id(), "b");

        pending.reject_all("disconnected");
        assert!(pending.is_empty());
        assert!(rx_a.await.unwrap().is_err());
        assert!(rx_b.await.unwrap().is_err());
    }
}
