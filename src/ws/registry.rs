//! Live set of open connections eligible to receive broadcasts.
//!
//! Each room owns one registry. Entries are inserted when a session becomes
//! active and removed when the [`Registration`] guard returned by
//! [`ConnectionRegistry::add`] is dropped, so every exit path of a session
//! deregisters it. The lock is never held across an await point; readers work
//! on snapshots so an entry may vanish mid-broadcast without harm.
//!
//! Removing an entry from outside its session (pruning) signals that session
//! through [`Registration::evicted`] so it shuts down instead of lingering
//! unregistered.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use axum::extract::ws::{CloseFrame, Message};
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Notify};
use tracing::debug;
use uuid::Uuid;

/// Frames a connection may have queued before it counts as too slow to keep.
pub const OUTBOUND_QUEUE_SIZE: usize = 100;

/// Sender half feeding a connection's writer task.
pub type ConnectionSender = mpsc::Sender<Message>;

/// Queue for a new connection's writer task.
pub fn outbound_channel() -> (ConnectionSender, mpsc::Receiver<Message>) {
    mpsc::channel(OUTBOUND_QUEUE_SIZE)
}

/// Identifies one accepted connection for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub id: ConnectionId,
    /// Display name, `None` for anonymous clients
    pub name: Option<String>,
    pub sender: ConnectionSender,
    pub joined_at: DateTime<Utc>,
    evict: Arc<Notify>,
}

impl RegistryEntry {
    fn evict(&self) {
        self.evict.notify_one();
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum RegistryError {
    AlreadyRegistered(ConnectionId),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::AlreadyRegistered(id) => write!(f, "connection {} is already registered", id),
        }
    }
}

impl std::error::Error for RegistryError {}

#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    entries: Arc<RwLock<HashMap<ConnectionId, RegistryEntry>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // A panicking holder cannot leave the map half-updated, so poisoning is ignored.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<ConnectionId, RegistryEntry>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ConnectionId, RegistryEntry>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a connection. The entry lives as long as the returned guard.
    pub fn add(
        &self,
        id: ConnectionId,
        name: Option<String>,
        sender: ConnectionSender,
    ) -> Result<Registration, RegistryError> {
        let mut entries = self.write();
        if entries.contains_key(&id) {
            return Err(RegistryError::AlreadyRegistered(id));
        }
        let evict = Arc::new(Notify::new());
        entries.insert(
            id,
            RegistryEntry {
                id,
                name,
                sender,
                joined_at: Utc::now(),
                evict: evict.clone(),
            },
        );
        debug!(conn = %id, total = entries.len(), "Connection registered");
        Ok(Registration {
            registry: self.clone(),
            id,
            evict,
        })
    }

    /// Remove a connection. Its session is told to shut down.
    pub fn remove(&self, id: &ConnectionId) -> Option<RegistryEntry> {
        let mut entries = self.write();
        let removed = entries.remove(id);
        if let Some(entry) = &removed {
            entry.evict();
            debug!(conn = %id, total = entries.len(), "Connection removed");
        }
        removed
    }

    /// Remove several connections at once, returning how many were present.
    pub fn remove_all(&self, ids: &[ConnectionId]) -> usize {
        let mut entries = self.write();
        ids.iter()
            .filter_map(|id| entries.remove(id))
            .map(|entry| entry.evict())
            .count()
    }

    /// Snapshot of every current entry.
    pub fn list(&self) -> Vec<RegistryEntry> {
        self.read().values().cloned().collect()
    }

    pub fn get(&self, id: &ConnectionId) -> Option<RegistryEntry> {
        self.read().get(id).cloned()
    }

    /// Update the display name of a registered connection.
    pub fn rename(&self, id: &ConnectionId, name: Option<String>) -> bool {
        match self.write().get_mut(id) {
            Some(entry) => {
                entry.name = name;
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Oldest join time among current entries.
    pub fn oldest_joined_at(&self) -> Option<DateTime<Utc>> {
        self.read().values().map(|entry| entry.joined_at).min()
    }

    /// Ask every registered connection to close. Entries are removed by their
    /// sessions once the close frame has gone out. A connection whose queue
    /// cannot take the frame is evicted directly.
    pub fn close_all(&self, code: u16, reason: &str) -> usize {
        let frame = CloseFrame {
            code,
            reason: reason.to_string().into(),
        };
        let mut queued = 0;
        for entry in self.list() {
            if entry.sender.try_send(Message::Close(Some(frame.clone()))).is_ok() {
                queued += 1;
            } else {
                self.remove(&entry.id);
            }
        }
        queued
    }
}

/// Scoped registry membership; dropping it deregisters the connection.
pub struct Registration {
    registry: ConnectionRegistry,
    id: ConnectionId,
    evict: Arc<Notify>,
}

impl Registration {
    /// Resolves once the entry has been removed by someone other than this guard.
    pub async fn evicted(&self) {
        self.evict.notified().await
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> (ConnectionSender, mpsc::Receiver<Message>) {
        outbound_channel()
    }

    #[test]
    fn registration_guard_removes_entry_on_drop() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = channel();
        let id = ConnectionId::new();

        let guard = registry.add(id, Some("alice".into()), tx).unwrap();
        assert!(registry.contains(&id));
        assert_eq!(registry.get(&id).unwrap().name.as_deref(), Some("alice"));

        drop(guard);
        assert!(!registry.contains(&id));
        assert!(registry.is_empty());
    }

    #[test]
    fn a_connection_is_registered_at_most_once() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = channel();
        let id = ConnectionId::new();

        let _guard = registry.add(id, None, tx.clone()).unwrap();
        assert_eq!(
            registry.add(id, Some("dup".into()), tx).err(),
            Some(RegistryError::AlreadyRegistered(id))
        );
        assert_eq!(registry.len(), 1);
        assert!(registry.get(&id).unwrap().name.is_none());
    }

    #[test]
    fn guard_tolerates_prior_removal() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = channel();
        let id = ConnectionId::new();

        let guard = registry.add(id, None, tx).unwrap();
        assert!(registry.remove(&id).is_some());
        drop(guard);
        assert!(registry.is_empty());
    }

    #[test]
    fn size_tracks_open_connections_through_churn() {
        let registry = ConnectionRegistry::new();
        let mut guards = Vec::new();
        for round in 0..10 {
            let (tx, _rx) = channel();
            guards.push(registry.add(ConnectionId::new(), None, tx).unwrap());
            if round % 3 == 2 {
                guards.remove(0);
            }
            assert_eq!(registry.len(), guards.len());
        }
        guards.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn snapshot_is_unaffected_by_later_removal() {
        let registry = ConnectionRegistry::new();
        let (tx1, _rx1) = channel();
        let (tx2, _rx2) = channel();
        let a = registry.add(ConnectionId::new(), None, tx1).unwrap();
        let _b = registry.add(ConnectionId::new(), None, tx2).unwrap();

        let snapshot = registry.list();
        drop(a);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(registry.list().len(), 1);
    }

    #[test]
    fn rename_and_remove_all() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = channel();
        let ids: Vec<ConnectionId> = (0..3).map(|_| ConnectionId::new()).collect();
        let guards: Vec<Registration> = ids
            .iter()
            .map(|id| registry.add(*id, None, tx.clone()).unwrap())
            .collect();

        assert!(registry.rename(&ids[0], Some("bob".into())));
        assert_eq!(registry.get(&ids[0]).unwrap().name.as_deref(), Some("bob"));
        assert!(!registry.rename(&ConnectionId::new(), None));

        assert_eq!(registry.remove_all(&[ids[0], ids[1], ConnectionId::new()]), 2);
        assert_eq!(registry.len(), 1);
        drop(guards);
        assert!(registry.is_empty());
    }

    #[test]
    fn close_all_sends_close_frames_to_live_connections() {
        let registry = ConnectionRegistry::new();
        let (tx1, mut rx1) = channel();
        let (tx2, rx2) = channel();
        let _a = registry.add(ConnectionId::new(), None, tx1).unwrap();
        let _b = registry.add(ConnectionId::new(), None, tx2).unwrap();
        drop(rx2);

        assert_eq!(registry.close_all(1001, "Server shutting down"), 1);
        match rx1.try_recv().unwrap() {
            Message::Close(Some(frame)) => {
                assert_eq!(frame.code, 1001);
                assert_eq!(frame.reason, "Server shutting down");
            }
            other => panic!("expected close frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn pruned_entries_signal_their_session() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = channel();
        let id = ConnectionId::new();
        let guard = registry.add(id, None, tx).unwrap();

        assert_eq!(registry.remove_all(&[id]), 1);
        tokio::time::timeout(std::time::Duration::from_secs(1), guard.evicted())
            .await
            .expect("session was not told about its eviction");
    }

    #[test]
    fn close_all_evicts_connections_with_full_queues() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = channel();
        let id = ConnectionId::new();
        let _guard = registry.add(id, None, tx.clone()).unwrap();
        for _ in 0..OUTBOUND_QUEUE_SIZE {
            tx.try_send(Message::Text("backlog".into())).unwrap();
        }

        assert_eq!(registry.close_all(1001, "Server shutting down"), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn oldest_join_time_is_reported() {
        let registry = ConnectionRegistry::new();
        assert!(registry.oldest_joined_at().is_none());

        let (tx, _rx) = channel();
        let first = ConnectionId::new();
        let _a = registry.add(first, None, tx.clone()).unwrap();
        let _b = registry.add(ConnectionId::new(), None, tx).unwrap();
        assert_eq!(registry.oldest_joined_at(), registry.get(&first).map(|e| e.joined_at));
    }
}
