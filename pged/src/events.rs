//! Session lifecycle events
//!
//! Every session publishes a fixed set of typed events on a broadcast
//! channel. Subscribers that fall behind lose the oldest events; publishing
//! with no subscriber is a no-op.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

/// Buffered events per subscriber before the oldest are dropped.
const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DbEvent {
    /// A physical connection was checked out (reference count 0 → 1)
    Connected { session: u64 },

    /// The physical connection went back to the pool (reference count 1 → 0)
    Disconnected { session: u64 },

    /// BEGIN was issued (transaction depth 0 → 1)
    StartedTransaction { session: u64 },

    /// COMMIT or ROLLBACK was issued (transaction depth 1 → 0)
    EndedTransaction {
        session: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        committed: bool,
    },

    /// A statement is about to run through `exec`
    PreQuery {
        session: u64,
        sql: String,
        params: Vec<Value>,
    },

    /// A statement finished, successfully or not
    Query {
        session: u64,
        sql: String,
        params: Vec<Value>,
    },
}

impl DbEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DbEvent::Connected { .. } => "connected",
            DbEvent::Disconnected { .. } => "disconnected",
            DbEvent::StartedTransaction { .. } => "started_transaction",
            DbEvent::EndedTransaction { .. } => "ended_transaction",
            DbEvent::PreQuery { .. } => "pre_query",
            DbEvent::Query { .. } => "query",
        }
    }

    pub fn session(&self) -> u64 {
        match self {
            DbEvent::Connected { session }
            | DbEvent::Disconnected { session }
            | DbEvent::StartedTransaction { session }
            | DbEvent::EndedTransaction { session, .. }
            | DbEvent::PreQuery { session, .. }
            | DbEvent::Query { session, .. } => *session,
        }
    }
}

/// Fan-out publisher for one session's events.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<DbEvent>,
}

impl EventPublisher {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DbEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: DbEvent) {
        tracing::debug!(session = event.session(), event = event.name(), "session event");
        // No receivers is fine.
        let _ = self.sender.send(event);
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new()
    }
}
