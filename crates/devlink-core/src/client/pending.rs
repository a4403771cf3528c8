//! Table of commands waiting for their response.

use crate::codec::Response;
use crate::error::{LinkError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;
use tracing::warn;

type Waiter = oneshot::Sender<Result<Response>>;

#[derive(Debug, Default)]
struct Table {
    waiters: HashMap<String, Waiter>,
    closed: bool,
}

/// Pending command completions keyed by `commandId`.
///
/// Once closed, every waiter has been failed and no new command can
/// register, so a command can never wait on a connection that is gone.
#[derive(Debug, Clone, Default)]
pub(crate) struct PendingTable {
    inner: Arc<Mutex<Table>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        // A poisoned table still holds consistent entries.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a waiter for `command_id`.
    ///
    /// An id that is still waiting for its response is refused; the
    /// existing waiter keeps its entry.
    pub fn register(&self, command_id: &str) -> Result<oneshot::Receiver<Result<Response>>> {
        let mut table = self.lock();
        if table.closed {
            return Err(LinkError::BrokenConnection);
        }
        if table.waiters.contains_key(command_id) {
            warn!("Command {} is already waiting for a response", command_id);
            return Err(LinkError::InvalidPayload {
                message: format!("command {} is already waiting for a response", command_id),
            });
        }
        let (tx, rx) = oneshot::channel();
        table.waiters.insert(command_id.to_string(), tx);
        Ok(rx)
    }

    /// Drop the waiter for `command_id` without completing it.
    pub fn remove(&self, command_id: &str) -> bool {
        self.lock().waiters.remove(command_id).is_some()
    }

    /// Deliver a response. Returns `false` if nobody waits for it.
    pub fn complete(&self, command_id: &str, response: Response) -> bool {
        let waiter = self.lock().waiters.remove(command_id);
        match waiter {
            // The receiver may have timed out in the meantime.
            Some(tx) => tx.send(Ok(response)).is_ok(),
            None => false,
        }
    }

    /// Fail every waiter and refuse new registrations.
    pub fn close(&self, reason: impl Fn() -> LinkError) {
        let waiters: Vec<Waiter> = {
            let mut table = self.lock();
            table.closed = true;
            table.waiters.drain().map(|(_, tx)| tx).collect()
        };
        for tx in waiters {
            let _ = tx.send(Err(reason()));
        }
    }

    pub fn len(&self) -> usize {
        self.lock().waiters.len()
    }
}

/// Removes a pending entry when the waiting future goes away.
pub(crate) struct PendingGuard {
    table: PendingTable,
    command_id: String,
}

impl PendingGuard {
    pub fn new(table: PendingTable, command_id: String) -> Self {
        Self { table, command_id }
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.table.remove(&self.command_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[tokio::test]
    async fn test_complete_delivers_to_waiter() {
        let table = PendingTable::new();
        let rx = table.register("a").unwrap();

        assert!(table.complete("a", Response::ok("a", Map::new())));
        let response = rx.await.unwrap().unwrap();
        assert_eq!(response.command_id.as_deref(), Some("a"));
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_complete_unknown_id_is_rejected() {
        let table = PendingTable::new();
        let _rx = table.register("a").unwrap();
        assert!(!table.complete("b", Response::ok("b", Map::new())));
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn test_close_fails_waiters_and_blocks_registration() {
        let table = PendingTable::new();
        let rx = table.register("a").unwrap();

        table.close(|| LinkError::BrokenConnection);

        assert!(rx.await.unwrap().unwrap_err().is_broken_connection());
        assert!(table.register("b").unwrap_err().is_broken_connection());
    }

    #[tokio::test]
    async fn test_duplicate_id_keeps_first_waiter() {
        let table = PendingTable::new();
        let rx = table.register("a").unwrap();

        let err = table.register("a").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidPayload);
        assert_eq!(table.len(), 1);

        assert!(table.complete("a", Response::ok("a", Map::new())));
        assert!(rx.await.unwrap().is_ok());

        // Free again once answered.
        assert!(table.register("a").is_ok());
    }

    #[test]
    fn test_guard_removes_entry() {
        let table = PendingTable::new();
        let _rx = table.register("a").unwrap();
        {
            let _guard = PendingGuard::new(table.clone(), "a".to_string());
        }
        assert_eq!(table.len(), 0);
    }
}
