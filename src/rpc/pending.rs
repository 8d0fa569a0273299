//! Outstanding calls awaiting a response.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::oneshot;

use super::message::InvocationResponse;
use crate::error::{Result, WireError};

/// Correlation id → waiting caller.
///
/// Ids come from a per-table counter starting at 1. An entry is removed the
/// first time it is matched, evicted, or failed, so no id is matched twice.
#[derive(Debug)]
pub struct PendingCalls {
    next_id: AtomicU64,
    calls: Mutex<HashMap<u64, oneshot::Sender<InvocationResponse>>>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate an id and register a waiter for it.
    ///
    /// The entry lives as long as the returned [`PendingCall`]; dropping it
    /// (for instance when the caller's future is cancelled) evicts the id.
    pub fn register(&self) -> PendingCall<'_> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        if let Ok(mut calls) = self.calls.lock() {
            calls.insert(id, tx);
        }
        PendingCall {
            table: self,
            id,
            rx: Some(rx),
        }
    }

    /// Hand `response` to the waiter for `id`.
    ///
    /// Returns false for unknown, evicted or already completed ids.
    pub fn complete(&self, id: u64, response: InvocationResponse) -> bool {
        let waiter = self.calls.lock().ok().and_then(|mut calls| calls.remove(&id));
        match waiter {
            Some(tx) => tx.send(response).is_ok(),
            None => false,
        }
    }

    /// Drop the entry for `id` (timeout or send failure).
    pub fn evict(&self, id: u64) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.remove(&id);
        }
    }

    /// Fail every outstanding call; waiters observe a closed channel.
    pub fn fail_all(&self) -> usize {
        self.calls
            .lock()
            .map(|mut calls| calls.drain().count())
            .unwrap_or(0)
    }

    /// Number of outstanding calls.
    pub fn len(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Registration of one outstanding call.
#[derive(Debug)]
pub struct PendingCall<'a> {
    table: &'a PendingCalls,
    id: u64,
    rx: Option<oneshot::Receiver<InvocationResponse>>,
}

impl PendingCall<'_> {
    /// Correlation id to put on the request.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the response, giving up with `CallTimeout` after `timeout`.
    ///
    /// # Errors
    ///
    /// `CallTimeout`, `ConnectionClosed` when the table is failed, or the
    /// callee's fault.
    pub async fn wait(mut self, timeout: Option<Duration>) -> Result<Bytes> {
        let Some(rx) = self.rx.take() else {
            return Err(WireError::ConnectionClosed);
        };
        let response = match timeout {
            Some(limit) => tokio::time::timeout(limit, rx)
                .await
                .map_err(|_| WireError::CallTimeout)?,
            None => rx.await,
        };
        response.map_err(|_| WireError::ConnectionClosed)?.into_result()
    }
}

impl Drop for PendingCall<'_> {
    fn drop(&mut self) {
        self.table.evict(self.id);
    }
}

impl Default for PendingCalls {
    fn default() -> Self {
        Self::new()
    }
}
