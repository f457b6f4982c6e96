//! The set of live observer connections.
//!
//! The registry is the single source of truth for who is connected and
//! which quiz each connection watches. It never touches sockets: each
//! entry holds a [`ConnectionHandle`] whose bounded outbound queue is
//! drained by the connection's own task, so the map lock is never held
//! across network I/O.
//!
//! Mutations take the write lock; lookups and snapshots take the read
//! lock and return owned copies.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use quizcast_types::{ConnectionId, QuizId};
use tokio::sync::{Notify, RwLock, mpsc};

use crate::clock::Clock;

/// A frame queued for delivery on one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// A serialized server message, shared between all recipients.
    Text(Arc<str>),
    /// A protocol-level ping.
    Ping,
}

/// Handle used to push frames to one connection and to close it.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    outbound: mpsc::Sender<OutboundFrame>,
    close: Arc<Notify>,
}

/// The receiving side of a [`ConnectionHandle`], owned by the
/// connection's task.
#[derive(Debug)]
pub struct ConnectionInbox {
    /// Frames to write to the socket, in order.
    pub outbound: mpsc::Receiver<OutboundFrame>,
    /// Signalled when the server wants the connection closed.
    pub close: Arc<Notify>,
}

impl ConnectionHandle {
    /// Create a handle and its inbox with an outbound queue of
    /// `capacity` frames.
    pub fn channel(capacity: usize) -> (Self, ConnectionInbox) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let close = Arc::new(Notify::new());
        let handle = Self {
            id: ConnectionId::new(),
            outbound: tx,
            close: Arc::clone(&close),
        };
        (
            handle,
            ConnectionInbox {
                outbound: rx,
                close,
            },
        )
    }

    /// The connection id.
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a frame without waiting.
    ///
    /// # Errors
    ///
    /// Fails if the queue is full or the connection task has exited.
    pub fn try_send(
        &self,
        frame: OutboundFrame,
    ) -> Result<(), mpsc::error::TrySendError<OutboundFrame>> {
        self.outbound.try_send(frame)
    }

    /// Ask the connection's task to close the socket.
    pub fn close(&self) {
        self.close.notify_one();
    }
}

/// Which connections a broadcast is aimed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Every registered connection.
    All,
    /// Connections currently subscribed to one quiz.
    Quiz(QuizId),
}

impl core::fmt::Display for Topic {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Quiz(id) => write!(f, "quiz:{id}"),
        }
    }
}

/// Errors returned by [`ConnectionRegistry::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The registry already holds the configured maximum.
    #[error("connection limit of {max} reached")]
    CapacityExceeded {
        /// The configured maximum.
        max: usize,
    },
}

#[derive(Debug)]
struct Entry {
    handle: ConnectionHandle,
    subscription: Option<QuizId>,
    last_heartbeat: DateTime<Utc>,
}

/// The registry of live connections.
#[derive(Debug)]
pub struct ConnectionRegistry {
    entries: RwLock<HashMap<ConnectionId, Entry>>,
    max_connections: usize,
    clock: Arc<dyn Clock>,
}

impl ConnectionRegistry {
    /// Create an empty registry bounded at `max_connections`.
    pub fn new(max_connections: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_connections,
            clock,
        }
    }

    /// The configured capacity.
    pub const fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// The clock used for heartbeat bookkeeping.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Register a connection, unsubscribed, with a fresh heartbeat.
    ///
    /// The capacity check and the insert happen under one write lock, so
    /// concurrent upgrades can never push the size past the limit.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::CapacityExceeded`] when full.
    pub async fn admit(&self, handle: ConnectionHandle) -> Result<(), RegistryError> {
        let mut entries = self.entries.write().await;
        if entries.len() >= self.max_connections {
            return Err(RegistryError::CapacityExceeded {
                max: self.max_connections,
            });
        }
        let id = handle.id();
        entries.insert(
            id,
            Entry {
                handle,
                subscription: None,
                last_heartbeat: self.clock.now(),
            },
        );
        tracing::debug!(connection_id = %id, size = entries.len(), "Connection admitted");
        Ok(())
    }

    /// Drop a connection. Removing an unknown id is a no-op.
    ///
    /// Returns `true` if the connection was present.
    pub async fn remove(&self, id: ConnectionId) -> bool {
        let removed = self.entries.write().await.remove(&id).is_some();
        if removed {
            tracing::debug!(connection_id = %id, "Connection removed");
        }
        removed
    }

    /// Replace the connection's subscription (`None` unsubscribes).
    ///
    /// Returns `false` if the connection is not registered.
    pub async fn set_subscription(&self, id: ConnectionId, quiz: Option<QuizId>) -> bool {
        let mut entries = self.entries.write().await;
        entries.get_mut(&id).is_some_and(|entry| {
            entry.subscription = quiz;
            true
        })
    }

    /// Record a sign of life from the connection.
    ///
    /// Returns `false` if the connection is not registered.
    pub async fn touch(&self, id: ConnectionId) -> bool {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        entries.get_mut(&id).is_some_and(|entry| {
            entry.last_heartbeat = now;
            true
        })
    }

    /// Copy the handles matching `topic`.
    pub async fn snapshot(&self, topic: Topic) -> Vec<ConnectionHandle> {
        let entries = self.entries.read().await;
        entries
            .values()
            .filter(|entry| match topic {
                Topic::All => true,
                Topic::Quiz(quiz) => entry.subscription == Some(quiz),
            })
            .map(|entry| entry.handle.clone())
            .collect()
    }

    /// Number of registered connections.
    pub async fn size(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether a connection is registered.
    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.entries.read().await.contains_key(&id)
    }

    /// The connection's current subscription.
    pub async fn subscription(&self, id: ConnectionId) -> Option<QuizId> {
        self.entries
            .read()
            .await
            .get(&id)
            .and_then(|entry| entry.subscription)
    }

    /// Number of subscribers per quiz.
    pub async fn subscriber_counts(&self) -> BTreeMap<QuizId, usize> {
        let entries = self.entries.read().await;
        let mut counts = BTreeMap::new();
        for quiz in entries.values().filter_map(|entry| entry.subscription) {
            let count = counts.entry(quiz).or_insert(0_usize);
            *count = count.saturating_add(1);
        }
        counts
    }

    /// Remove every connection whose last heartbeat is strictly older
    /// than `cutoff` and return their handles so the caller can close
    /// them.
    pub async fn evict_stale(&self, cutoff: DateTime<Utc>) -> Vec<ConnectionHandle> {
        let mut entries = self.entries.write().await;
        let stale: Vec<ConnectionId> = entries
            .iter()
            .filter(|(_, entry)| entry.last_heartbeat < cutoff)
            .map(|(id, _)| *id)
            .collect();
        stale
            .into_iter()
            .filter_map(|id| entries.remove(&id))
            .map(|entry| entry.handle)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::indexing_slicing)]

    use chrono::TimeDelta;

    use super::*;
    use crate::clock::ManualClock;

    fn registry(max: usize) -> (ConnectionRegistry, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        (ConnectionRegistry::new(max, clock.clone()), clock)
    }

    #[tokio::test]
    async fn admission_is_bounded() {
        let (registry, _) = registry(2);
        let mut inboxes = Vec::new();
        for _ in 0..2 {
            let (handle, inbox) = ConnectionHandle::channel(4);
            registry.admit(handle).await.unwrap();
            inboxes.push(inbox);
        }
        let (extra, _inbox) = ConnectionHandle::channel(4);
        assert_eq!(
            registry.admit(extra).await,
            Err(RegistryError::CapacityExceeded { max: 2 })
        );
        assert_eq!(registry.size().await, 2);
    }

    #[tokio::test]
    async fn concurrent_admission_never_exceeds_capacity() {
        let (registry, _) = registry(5);
        let registry = Arc::new(registry);
        let mut tasks = Vec::new();
        for _ in 0..40 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                let (handle, inbox) = ConnectionHandle::channel(1);
                (registry.admit(handle).await.is_ok(), inbox)
            }));
        }
        let mut admitted = 0_usize;
        let mut inboxes = Vec::new();
        for task in tasks {
            let (ok, inbox) = task.await.unwrap();
            if ok {
                admitted = admitted.saturating_add(1);
            }
            inboxes.push(inbox);
        }
        assert_eq!(admitted, 5);
        assert_eq!(registry.size().await, 5);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let (registry, _) = registry(4);
        let (handle, _inbox) = ConnectionHandle::channel(1);
        let id = handle.id();
        registry.admit(handle).await.unwrap();
        assert!(registry.remove(id).await);
        assert!(!registry.remove(id).await);
        assert_eq!(registry.size().await, 0);
    }

    #[tokio::test]
    async fn subscription_replaces_previous_and_filters_snapshots() {
        let (registry, _) = registry(4);
        let (a, _ia) = ConnectionHandle::channel(1);
        let (b, _ib) = ConnectionHandle::channel(1);
        let (a_id, b_id) = (a.id(), b.id());
        registry.admit(a).await.unwrap();
        registry.admit(b).await.unwrap();

        registry.set_subscription(a_id, Some(QuizId(1))).await;
        registry.set_subscription(a_id, Some(QuizId(2))).await;
        registry.set_subscription(b_id, Some(QuizId(1))).await;

        let quiz1: Vec<_> = registry
            .snapshot(Topic::Quiz(QuizId(1)))
            .await
            .iter()
            .map(ConnectionHandle::id)
            .collect();
        assert_eq!(quiz1, vec![b_id]);
        assert_eq!(registry.snapshot(Topic::All).await.len(), 2);
        assert_eq!(registry.subscription(a_id).await, Some(QuizId(2)));

        registry.set_subscription(b_id, None).await;
        assert!(registry.snapshot(Topic::Quiz(QuizId(1))).await.is_empty());

        let counts = registry.subscriber_counts().await;
        assert_eq!(counts.get(&QuizId(2)), Some(&1));
        assert_eq!(counts.get(&QuizId(1)), None);
    }

    #[tokio::test]
    async fn unknown_connections_are_ignored() {
        let (registry, _) = registry(1);
        let ghost = ConnectionId::new();
        assert!(!registry.touch(ghost).await);
        assert!(!registry.set_subscription(ghost, Some(QuizId(1))).await);
    }

    #[tokio::test]
    async fn evict_stale_uses_strict_cutoff() {
        let (registry, clock) = registry(4);
        let (old, _io) = ConnectionHandle::channel(1);
        let old_id = old.id();
        registry.admit(old).await.unwrap();

        clock.advance(TimeDelta::seconds(60));
        let (fresh, _if) = ConnectionHandle::channel(1);
        let fresh_id = fresh.id();
        registry.admit(fresh).await.unwrap();

        // Exactly at the cutoff is not stale.
        let cutoff = clock.now() - TimeDelta::seconds(60);
        assert!(registry.evict_stale(cutoff).await.is_empty());

        let evicted = registry.evict_stale(cutoff + TimeDelta::seconds(1)).await;
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].id(), old_id);
        assert!(registry.contains(fresh_id).await);
        assert!(!registry.contains(old_id).await);
    }
}
