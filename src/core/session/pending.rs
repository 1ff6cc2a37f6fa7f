//! Pending request tracking.
//!
//! Every request a session writes is registered here under a fresh id. The
//! entry is removed exactly once: by the reader when the matching response
//! arrives, by the caller when its deadline passes, or by the session when the
//! link goes away. Whoever removes the entry owns its outcome.

use crate::core::communication::codec::RequestId;
use crate::domain::error::RpcError;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Mutex};

pub type RpcOutcome = Result<Value, RpcError>;

/// An outstanding request awaiting its matched response or timeout
#[derive(Debug)]
pub struct PendingRequest {
    pub id: RequestId,
    pub method: String,
    pub submitted_at: Instant,
    pub timeout: Duration,
    responder: oneshot::Sender<RpcOutcome>,
}

impl PendingRequest {
    pub fn deadline(&self) -> Instant {
        self.submitted_at + self.timeout
    }

    /// Deliver the outcome; the caller may already have gone away
    pub fn resolve(self, outcome: RpcOutcome) {
        let _ = self.responder.send(outcome);
    }
}

#[derive(Debug, Default)]
struct PendingMap {
    /// Registrations are accepted only while a link is up
    open: bool,
    entries: HashMap<RequestId, PendingRequest>,
}

/// Tracks in-flight requests for one session
#[derive(Debug)]
pub struct RequestTracker {
    next_id: AtomicU64,
    pending: Mutex<PendingMap>,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(PendingMap::default()),
        }
    }

    /// Allocate an id without registering it; responses to it are untracked
    pub fn allocate_id(&self) -> RequestId {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Register a new request.
    ///
    /// Fails with `ConnectionLost` when no link is up, so callers never wait
    /// on a request that cannot be written.
    pub async fn register(
        &self,
        method: &str,
        timeout: Duration,
    ) -> Result<(RequestId, oneshot::Receiver<RpcOutcome>), RpcError> {
        let mut pending = self.pending.lock().await;
        if !pending.open {
            return Err(RpcError::ConnectionLost);
        }

        let id = self.allocate_id();
        let (tx, rx) = oneshot::channel();
        pending.entries.insert(
            id,
            PendingRequest {
                id,
                method: method.to_string(),
                submitted_at: Instant::now(),
                timeout,
                responder: tx,
            },
        );
        Ok((id, rx))
    }

    /// Complete a request with its response.
    ///
    /// Returns the retired entry's method and age, or `None` when the id is
    /// not pending (late arrival after timeout, or an id we never registered).
    pub async fn complete(&self, id: RequestId, outcome: RpcOutcome) -> Option<(String, Duration)> {
        let entry = self.pending.lock().await.entries.remove(&id)?;
        let method = entry.method.clone();
        let age = entry.submitted_at.elapsed();
        entry.resolve(outcome);
        Some((method, age))
    }

    /// Remove a request without resolving it
    pub async fn retire(&self, id: RequestId) -> Option<PendingRequest> {
        self.pending.lock().await.entries.remove(&id)
    }

    /// Start accepting registrations for a new link
    pub async fn open(&self) {
        self.pending.lock().await.open = true;
    }

    /// Stop accepting registrations and resolve everything in flight with
    /// `error`. Returns how many requests were failed.
    pub async fn close(&self, error: RpcError) -> usize {
        let drained: Vec<PendingRequest> = {
            let mut pending = self.pending.lock().await;
            pending.open = false;
            pending.entries.drain().map(|(_, entry)| entry).collect()
        };
        let count = drained.len();
        for entry in drained {
            entry.resolve(Err(error.clone()));
        }
        count
    }

    pub async fn is_pending(&self, id: RequestId) -> bool {
        self.pending.lock().await.entries.contains_key(&id)
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.entries.len()
    }

    /// Methods of the requests still in flight, oldest first
    pub async fn in_flight(&self) -> Vec<(RequestId, String)> {
        let pending = self.pending.lock().await;
        let mut list: Vec<_> = pending
            .entries
            .values()
            .map(|entry| (entry.id, entry.method.clone()))
            .collect();
        list.sort_by_key(|(id, _)| *id);
        list
    }
}

impl Default for RequestTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn open_tracker() -> RequestTracker {
        let tracker = RequestTracker::new();
        tracker.open().await;
        tracker
    }

    #[tokio::test]
    async fn test_register_requires_open_link() {
        let tracker = RequestTracker::new();
        let err = tracker
            .register("printer.info", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err, RpcError::ConnectionLost);
    }

    #[tokio::test]
    async fn test_register_and_complete() {
        let tracker = open_tracker().await;

        let (id, rx) = tracker
            .register("printer.gcode.script", Duration::from_secs(1))
            .await
            .unwrap();
        assert!(tracker.is_pending(id).await);

        let (method, _) = tracker.complete(id, Ok(json!("ok"))).await.unwrap();
        assert_eq!(method, "printer.gcode.script");
        assert!(!tracker.is_pending(id).await);
        assert_eq!(rx.await.unwrap(), Ok(json!("ok")));
    }

    #[tokio::test]
    async fn test_id_is_retired_once() {
        let tracker = open_tracker().await;
        let (id, _rx) = tracker
            .register("printer.info", Duration::from_secs(1))
            .await
            .unwrap();

        assert!(tracker.retire(id).await.is_some());
        assert!(tracker.retire(id).await.is_none());
        assert!(tracker.complete(id, Ok(Value::Null)).await.is_none());
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let tracker = open_tracker().await;
        let mut ids = Vec::new();
        for _ in 0..50 {
            let (id, _rx) = tracker
                .register("printer.info", Duration::from_secs(1))
                .await
                .unwrap();
            ids.push(id);
        }
        ids.push(tracker.allocate_id());
        let mut sorted = ids.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), ids.len());
    }

    #[tokio::test]
    async fn test_close_fails_everything() {
        let tracker = open_tracker().await;
        let mut receivers = Vec::new();
        for _ in 0..5 {
            let (_, rx) = tracker
                .register("printer.gcode.script", Duration::from_secs(30))
                .await
                .unwrap();
            receivers.push(rx);
        }

        assert_eq!(tracker.close(RpcError::ConnectionLost).await, 5);
        assert_eq!(tracker.pending_count().await, 0);
        for rx in receivers {
            assert_eq!(rx.await.unwrap(), Err(RpcError::ConnectionLost));
        }

        // Closed until the next link opens
        assert!(tracker
            .register("printer.info", Duration::from_secs(1))
            .await
            .is_err());
        tracker.open().await;
        assert!(tracker
            .register("printer.info", Duration::from_secs(1))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_in_flight_is_ordered() {
        let tracker = open_tracker().await;
        let (first, _a) = tracker.register("a", Duration::from_secs(1)).await.unwrap();
        let (second, _b) = tracker.register("b", Duration::from_secs(1)).await.unwrap();

        let list = tracker.in_flight().await;
        assert_eq!(list, vec![(first, "a".to_string()), (second, "b".to_string())]);
    }
}
