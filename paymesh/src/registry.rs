//! Table of in-flight calls keyed by correlation id.
//!
//! Callers register an id and wait on the returned [`Waiter`]; the reply router
//! resolves ids as replies arrive. Waiters are buffered with capacity one and
//! resolved with `try_send`, so the router never blocks on a slow or departed
//! caller. Channels are never closed by the registry: removing an entry drops
//! its sender, and a caller that already gave up drops the receiver, which turns
//! a late `resolve` into a harmless no-op.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use crate::message::Delivery;

/// Receiving half handed to the caller that registered an id
pub type Waiter = mpsc::Receiver<Delivery>;

#[derive(Debug)]
struct CorrelationEntry {
    sender: mpsc::Sender<Delivery>,
    created_at: Instant,
}

/// Concurrency-safe map of correlation id to reply waiter
#[derive(Debug, Default)]
pub struct CorrelationRegistry {
    entries: RwLock<HashMap<String, CorrelationEntry>>,
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an id and get the channel its reply will arrive on.
    /// Registering an id twice replaces the earlier waiter.
    pub fn register(&self, id: impl Into<String>) -> Waiter {
        let (sender, receiver) = mpsc::channel(1);
        let entry = CorrelationEntry {
            sender,
            created_at: Instant::now(),
        };

        let id = id.into();
        if self.entries.write().insert(id.clone(), entry).is_some() {
            debug!("Correlation id {} re-registered, previous waiter dropped", id);
        }
        receiver
    }

    /// Hand a delivery to the waiter registered under `id`.
    ///
    /// Returns `false` when no entry exists, the waiter already holds a reply,
    /// or the caller is gone. Never blocks.
    pub fn resolve(&self, id: &str, delivery: Delivery) -> bool {
        let entries = self.entries.read();
        match entries.get(id) {
            Some(entry) => entry.sender.try_send(delivery).is_ok(),
            None => false,
        }
    }

    /// Forget an id. Removing an unknown id is a no-op.
    pub fn remove(&self, id: &str) {
        self.entries.write().remove(id);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Age of the longest-waiting call, if any
    pub fn oldest_pending_age(&self) -> Option<Duration> {
        self.entries
            .read()
            .values()
            .map(|entry| entry.created_at.elapsed())
            .max()
    }
}

/// Removes its id from the registry when dropped
#[derive(Debug)]
pub struct PendingCallGuard<'a> {
    registry: &'a CorrelationRegistry,
    id: String,
}

impl<'a> PendingCallGuard<'a> {
    pub fn new(registry: &'a CorrelationRegistry, id: impl Into<String>) -> Self {
        Self {
            registry,
            id: id.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for PendingCallGuard<'_> {
    fn drop(&mut self) {
        self.registry.remove(&self.id);
    }
}
