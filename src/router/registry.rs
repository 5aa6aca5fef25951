//! Session registry and waiting room
//!
//! Pure directory state: who is connected and who is waiting for a bridge.
//! No knowledge of message kinds or roles lives here; the dispatcher owns
//! the protocol. Mutation only happens through these methods.

use std::collections::HashMap;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex, RwLock};

use crate::error::{AppError, Result};
use crate::signaling::OutboundEnvelope;

/// Transport handle for one registered client
#[derive(Debug, Clone)]
pub struct ClientHandle {
    pub user_name: String,
    outbound: mpsc::Sender<OutboundEnvelope>,
}

impl ClientHandle {
    pub fn new(user_name: impl Into<String>, outbound: mpsc::Sender<OutboundEnvelope>) -> Self {
        Self {
            user_name: user_name.into(),
            outbound,
        }
    }

    /// Queue an envelope for delivery.
    ///
    /// Fire-and-forget: a closed transport or a saturated queue is an error
    /// the caller logs; nothing is retried.
    pub fn send(&self, envelope: OutboundEnvelope) -> Result<()> {
        self.outbound.try_send(envelope).map_err(|e| match e {
            TrySendError::Full(_) => AppError::Signaling("outbound queue full".to_string()),
            TrySendError::Closed(_) => AppError::Signaling("transport is not open".to_string()),
        })
    }
}

/// A client that has asked for a bridge and not yet been claimed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitingEntry {
    pub id: String,
    pub user_name: String,
}

/// In-memory directory of connected clients plus the waiting room
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, ClientHandle>>,
    waiting: Mutex<Vec<WaitingEntry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            waiting: Mutex::new(Vec::new()),
        }
    }

    /// Register a new identity.
    ///
    /// At most one session per identity may exist; a duplicate attempt is
    /// rejected without touching the original. Returns the registry size
    /// after the insert.
    pub async fn register(
        &self,
        id: &str,
        user_name: &str,
        outbound: mpsc::Sender<OutboundEnvelope>,
    ) -> Result<usize> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(id) {
            return Err(AppError::DuplicateIdentity(id.to_string()));
        }
        sessions.insert(id.to_string(), ClientHandle::new(user_name, outbound));
        Ok(sessions.len())
    }

    /// Remove a session and, if present, its waiting entry. Idempotent.
    pub async fn unregister(&self, id: &str) {
        self.sessions.write().await.remove(id);
        self.waiting.lock().await.retain(|entry| entry.id != id);
    }

    pub async fn lookup(&self, id: &str) -> Option<ClientHandle> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.sessions.read().await.contains_key(id)
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Snapshot of all sessions (for fan-out delivery)
    pub async fn sessions_snapshot(&self) -> Vec<(String, ClientHandle)> {
        self.sessions
            .read()
            .await
            .iter()
            .map(|(id, handle)| (id.clone(), handle.clone()))
            .collect()
    }

    /// Add a waiting entry. Returns false if the identity is already
    /// waiting (no duplicate entries, no duplicate notices).
    pub async fn enqueue_waiting(&self, id: &str, user_name: &str) -> bool {
        let mut waiting = self.waiting.lock().await;
        if waiting.iter().any(|entry| entry.id == id) {
            return false;
        }
        waiting.push(WaitingEntry {
            id: id.to_string(),
            user_name: user_name.to_string(),
        });
        true
    }

    /// Remove a waiting entry once a bridge has claimed the client.
    /// Idempotent.
    pub async fn dequeue_waiting(&self, id: &str) -> bool {
        let mut waiting = self.waiting.lock().await;
        let before = waiting.len();
        waiting.retain(|entry| entry.id != id);
        waiting.len() != before
    }

    /// Current waiting entries, in arrival order
    pub async fn waiting_entries(&self) -> Vec<WaitingEntry> {
        self.waiting.lock().await.clone()
    }

    pub async fn waiting_count(&self) -> usize {
        self.waiting.lock().await.len()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle_pair() -> (
        mpsc::Sender<OutboundEnvelope>,
        mpsc::Receiver<OutboundEnvelope>,
    ) {
        mpsc::channel(8)
    }

    #[tokio::test]
    async fn test_duplicate_register_rejected() {
        let registry = SessionRegistry::new();
        let (tx1, _rx1) = handle_pair();
        let (tx2, _rx2) = handle_pair();

        assert_eq!(registry.register("alice", "Alice", tx1).await.unwrap(), 1);
        let err = registry.register("alice", "Imposter", tx2).await.unwrap_err();
        assert!(matches!(err, AppError::DuplicateIdentity(_)));

        // Original registration survives the rejected attempt
        let handle = registry.lookup("alice").await.unwrap();
        assert_eq!(handle.user_name, "Alice");
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = handle_pair();
        registry.register("alice", "Alice", tx).await.unwrap();

        registry.unregister("alice").await;
        registry.unregister("alice").await;
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn test_register_again_after_unregister() {
        let registry = SessionRegistry::new();
        let (tx1, _rx1) = handle_pair();
        registry.register("alice", "Alice", tx1).await.unwrap();
        registry.unregister("alice").await;

        let (tx2, _rx2) = handle_pair();
        assert!(registry.register("alice", "Alice", tx2).await.is_ok());
    }

    #[tokio::test]
    async fn test_waiting_room_deduplicates() {
        let registry = SessionRegistry::new();
        assert!(registry.enqueue_waiting("alice", "Alice").await);
        assert!(!registry.enqueue_waiting("alice", "Alice").await);
        assert_eq!(registry.waiting_count().await, 1);
    }

    #[tokio::test]
    async fn test_waiting_preserves_arrival_order() {
        let registry = SessionRegistry::new();
        registry.enqueue_waiting("alice", "Alice").await;
        registry.enqueue_waiting("bob", "Bob").await;

        let ids: Vec<String> = registry
            .waiting_entries()
            .await
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn test_unregister_removes_waiting_entry() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = handle_pair();
        registry.register("alice", "Alice", tx).await.unwrap();
        registry.enqueue_waiting("alice", "Alice").await;

        registry.unregister("alice").await;
        assert_eq!(registry.waiting_count().await, 0);
    }

    #[tokio::test]
    async fn test_dequeue_waiting_is_idempotent() {
        let registry = SessionRegistry::new();
        registry.enqueue_waiting("alice", "Alice").await;
        assert!(registry.dequeue_waiting("alice").await);
        assert!(!registry.dequeue_waiting("alice").await);
    }

    #[tokio::test]
    async fn test_send_to_closed_transport_fails() {
        let (tx, rx) = handle_pair();
        drop(rx);
        let handle = ClientHandle::new("Alice", tx);
        assert!(handle
            .send(OutboundEnvelope::new(
                crate::signaling::SignalKind::Log,
                "hi"
            ))
            .is_err());
    }
}
