//! Request seams shared by the auth, heartbeat and subscription components.

use crate::core::errors::DeribitError;
use crate::core::kernel::RpcResult;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::oneshot;

/// Sends a JSON-RPC request and waits for its result
#[async_trait]
pub trait RpcRequester: Send + Sync {
    async fn request(&self, method: &str, params: Value) -> Result<Value, DeribitError>;
}

/// Sends a JSON-RPC request without waiting for the reply
#[async_trait]
pub trait RpcNotifier: Send + Sync {
    /// Returns the id assigned to the request
    async fn notify(&self, method: &str, params: Value) -> Result<u64, DeribitError>;
}

/// Monotonic request ids, starting at 1
#[derive(Debug)]
pub struct RequestIds(AtomicU64);

impl RequestIds {
    pub fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for RequestIds {
    fn default() -> Self {
        Self::new()
    }
}

/// Requests awaiting a reply, keyed by id
#[derive(Debug, Default)]
pub struct PendingRequests {
    inner: Mutex<HashMap<u64, oneshot::Sender<RpcResult>>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: u64) -> oneshot::Receiver<RpcResult> {
        let (tx, rx) = oneshot::channel();
        self.lock().insert(id, tx);
        rx
    }

    /// Hand a reply to its waiter. Returns the result back if nobody is waiting.
    pub fn resolve(&self, id: u64, result: RpcResult) -> Option<RpcResult> {
        let waiter = self.lock().remove(&id);
        match waiter {
            Some(tx) => tx.send(result).err(),
            None => Some(result),
        }
    }

    pub fn remove(&self, id: u64) {
        self.lock().remove(&id);
    }

    /// Drop every waiter; their receivers observe a closed channel
    pub fn fail_all(&self) -> usize {
        let mut map = self.lock();
        let count = map.len();
        map.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<RpcResult>>> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_ids_are_monotonic() {
        let ids = RequestIds::new();
        assert_eq!(ids.next(), 1);
        assert_eq!(ids.next(), 2);
        assert_eq!(ids.next(), 3);
    }

    #[tokio::test]
    async fn test_resolve_delivers_to_waiter() {
        let pending = PendingRequests::new();
        let rx = pending.register(5);

        assert!(pending.resolve(5, Ok(json!("ok"))).is_none());
        assert_eq!(rx.await.unwrap(), Ok(json!("ok")));
        assert!(pending.is_empty());
    }

    #[test]
    fn test_resolve_unknown_id_returns_result() {
        let pending = PendingRequests::new();
        let unclaimed = pending.resolve(9, Ok(json!(1)));
        assert_eq!(unclaimed, Some(Ok(json!(1))));
    }

    #[tokio::test]
    async fn test_fail_all_closes_waiters() {
        let pending = PendingRequests::new();
        let rx1 = pending.register(1);
        let rx2 = pending.register(2);

        assert_eq!(pending.fail_all(), 2);
        assert!(rx1.await.is_err());
        assert!(rx2.await.is_err());
    }
}
