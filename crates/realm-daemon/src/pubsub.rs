//! The audit-event queue contract and its in-memory implementation.
//!
//! Each `(realm, tenant)` pair owns an ordered queue of audit events.
//! The request path publishes; tenants drain their queue through the
//! tenant-log API with pull/ack. Production backends add a delivery
//! visibility window (~10 seconds), may block an empty pull (~30
//! seconds), and expire events after seven days; the in-memory queue
//! keeps none of that machinery and simply serves the queue head.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use realm_core::engine::Event;
use realm_core::types::RealmId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from queue operations.
#[derive(Debug, Error)]
pub enum PubSubError {
    /// One or more ack receipts matched nothing, including receipts that
    /// were already processed. The whole batch fails.
    #[error("{count} ack id(s) were invalid")]
    InvalidAck {
        /// How many of the submitted receipts were invalid.
        count: usize,
    },
    /// The backend was unreachable or failed internally.
    #[error("pubsub unavailable: {0}")]
    Unavailable(String),
    /// The operation was abandoned because the request was cancelled.
    #[error("operation cancelled")]
    Cancelled,
}

/// One audit event as published by the request path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMessage {
    /// Hashed user identity.
    pub user: String,
    /// The event name.
    pub event: String,
    /// The registration's guess budget, on `guess_used`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub num_guesses: Option<u16>,
    /// Guesses consumed so far, on `guess_used`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub guess_count: Option<u16>,
}

impl From<Event> for EventMessage {
    fn from(event: Event) -> Self {
        Self {
            user: event.user,
            event: event.kind.as_str().to_string(),
            num_guesses: event.num_guesses,
            guess_count: event.guess_count,
        }
    }
}

/// One delivered audit event, as returned to a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantLogEntry {
    /// Informational event identity, stable across redeliveries.
    pub id: String,
    /// Opaque per-delivery receipt for acknowledgement.
    pub ack: String,
    /// When the event was published.
    pub when: DateTime<Utc>,
    /// Hashed user identity.
    pub user_id: String,
    /// The event name.
    pub event: String,
    /// The registration's guess budget, on `guess_used`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub num_guesses: Option<u16>,
    /// Guesses consumed so far, on `guess_used`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub guess_count: Option<u16>,
}

/// A per-`(realm, tenant)` audit-event queue.
#[async_trait]
pub trait PubSub: Send + Sync {
    /// Appends one event; the event is durable before this returns.
    ///
    /// # Errors
    ///
    /// Fails when the backend is unavailable.
    async fn publish(
        &self,
        realm: &RealmId,
        tenant: &str,
        event: EventMessage,
    ) -> Result<(), PubSubError>;

    /// Returns up to `max` currently-visible events, oldest first.
    ///
    /// # Errors
    ///
    /// Fails when the backend is unavailable.
    async fn pull(
        &self,
        realm: &RealmId,
        tenant: &str,
        max: u16,
    ) -> Result<Vec<TenantLogEntry>, PubSubError>;

    /// Removes the events behind the given receipts. Batch semantics: if
    /// any receipt is invalid the call fails with
    /// [`PubSubError::InvalidAck`].
    ///
    /// # Errors
    ///
    /// Fails on invalid receipts or an unavailable backend.
    async fn ack(&self, realm: &RealmId, tenant: &str, ids: &[String]) -> Result<(), PubSubError>;
}

/// An in-memory queue for tests and single-node development.
#[derive(Default)]
pub struct MemoryPubSub {
    state: Mutex<MemoryQueues>,
}

#[derive(Default)]
struct MemoryQueues {
    events: HashMap<String, Vec<TenantLogEntry>>,
    next_id: u64,
}

impl MemoryPubSub {
    /// Creates an empty queue set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn queue_key(realm: &RealmId, tenant: &str) -> String {
    format!("{realm}:{tenant}")
}

#[async_trait]
impl PubSub for MemoryPubSub {
    async fn publish(
        &self,
        realm: &RealmId,
        tenant: &str,
        event: EventMessage,
    ) -> Result<(), PubSubError> {
        let mut state = self.state.lock().expect("pubsub mutex poisoned");
        let id = state.next_id;
        state.next_id += 1;
        let entry = TenantLogEntry {
            id: id.to_string(),
            ack: format!("{id}_{id:x}"),
            when: Utc::now(),
            user_id: event.user,
            event: event.event,
            num_guesses: event.num_guesses,
            guess_count: event.guess_count,
        };
        state
            .events
            .entry(queue_key(realm, tenant))
            .or_default()
            .push(entry);
        Ok(())
    }

    async fn pull(
        &self,
        realm: &RealmId,
        tenant: &str,
        max: u16,
    ) -> Result<Vec<TenantLogEntry>, PubSubError> {
        let state = self.state.lock().expect("pubsub mutex poisoned");
        let queue = state.events.get(&queue_key(realm, tenant));
        Ok(queue.map_or_else(Vec::new, |events| {
            events.iter().take(usize::from(max)).cloned().collect()
        }))
    }

    async fn ack(&self, realm: &RealmId, tenant: &str, ids: &[String]) -> Result<(), PubSubError> {
        let mut state = self.state.lock().expect("pubsub mutex poisoned");
        let queue = state.events.entry(queue_key(realm, tenant)).or_default();
        let before = queue.len();
        queue.retain(|entry| !ids.contains(&entry.ack));
        let removed = before - queue.len();
        if removed == ids.len() {
            Ok(())
        } else {
            Err(PubSubError::InvalidAck {
                count: ids.len() - removed,
            })
        }
    }
}
