//! The contract between the gateway and a durable, replayable event log.
//!
//! Any store that can append with monotonically increasing indices and replay
//! from an offset satisfies it; [`crate::memory::InMemoryLog`] is the
//! reference implementation.

use crate::error::{Error, LogErrorKind};
use crate::id::{EventId, StreamId};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Event type used when an append does not name one.
pub const DEFAULT_EVENT_TYPE: &str = "message";

/// Body of one log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "encoding", content = "value", rename_all = "snake_case")]
pub enum Payload {
    Text(String),
    Json(Value),
    Binary(Vec<u8>),
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_owned())
    }
}

impl From<Value> for Payload {
    /// Bare JSON strings are stored as text so they are not quoted on the wire.
    fn from(value: Value) -> Self {
        match value {
            Value::String(text) => Payload::Text(text),
            other => Payload::Json(other),
        }
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Binary(bytes)
    }
}

/// One immutable entry of a log, as assigned by `append`.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    id: EventId,
    event_type: String,
    payload: Payload,
}

impl Event {
    /// Only log implementations should build events; everyone else receives
    /// them from `append` or a subscription.
    pub fn new(id: EventId, event_type: impl Into<String>, payload: Payload) -> Self {
        Self {
            id,
            event_type: event_type.into(),
            payload,
        }
    }

    pub fn id(&self) -> &EventId {
        &self.id
    }

    pub fn index(&self) -> u64 {
        self.id.index()
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }
}

/// Resolves the type an entry is stored under.
///
/// An empty type becomes [`DEFAULT_EVENT_TYPE`]. Line breaks and NUL are
/// rejected since the type is written verbatim into an SSE `event:` line.
pub fn normalize_event_type(event_type: &str) -> Result<&str, Error> {
    if event_type.is_empty() {
        return Ok(DEFAULT_EVENT_TYPE);
    }
    if event_type.contains(['\r', '\n', '\0']) {
        return Err(Error::log(LogErrorKind::InvalidEventType));
    }
    Ok(event_type)
}

/// Parameters a log is created with. Creating an existing log succeeds only
/// when the options match.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogOptions {
    /// Upper bound on entries kept by the log; `None` is unbounded.
    pub max_entries: Option<u64>,
}

/// What a subscription handler is called with.
#[derive(Debug, Clone, PartialEq)]
pub enum LogNotification {
    Entry(Event),
    /// The log was deleted. Always the last notification of a subscription.
    Deleted(StreamId),
}

/// Callback invoked on the log's own delivery context, one notification at a
/// time and in index order. The log awaits the returned future before
/// delivering the next notification, so a handler applies backpressure by
/// not resolving until it has room.
pub type NotificationHandler =
    Arc<dyn Fn(LogNotification) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Handle returned by `subscribe_from`; pass it back to `unsubscribe`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    id: SubscriptionId,
    stream_id: StreamId,
    after_index: u64,
    head_index: u64,
}

impl Subscription {
    pub fn new(id: SubscriptionId, stream_id: StreamId, after_index: u64, head_index: u64) -> Self {
        Self {
            id,
            stream_id,
            after_index,
            head_index,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    pub fn after_index(&self) -> u64 {
        self.after_index
    }

    /// Last index present when the subscription was made. Entries up to here
    /// are replayed backlog, later ones are live.
    pub fn head_index(&self) -> u64 {
        self.head_index
    }

    pub fn has_backlog(&self) -> bool {
        self.head_index > self.after_index
    }
}

/// Durable, ordered, replay-capable log service.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Creates the log. Idempotent for identical options; fails with
    /// `LogErrorKind::Conflict` when the log exists with different ones.
    async fn create(&self, stream_id: &StreamId, options: LogOptions) -> Result<(), Error>;

    /// Appends one entry and returns it once the log has accepted it. A failed
    /// append never assigns an index.
    async fn append(
        &self,
        stream_id: &StreamId,
        event_type: &str,
        payload: Payload,
    ) -> Result<Event, Error>;

    /// Delivers every entry with `index > after_index` in increasing order,
    /// then keeps delivering new entries as they are appended, without gaps or
    /// duplicates across the boundary.
    async fn subscribe_from(
        &self,
        stream_id: &StreamId,
        after_index: u64,
        handler: NotificationHandler,
    ) -> Result<Subscription, Error>;

    /// Stops further notifications. Safe to call from inside the handler, and
    /// more than once.
    fn unsubscribe(&self, subscription: &Subscription);

    /// Removes the log. Open subscriptions receive `LogNotification::Deleted`.
    async fn delete(&self, stream_id: &StreamId) -> Result<(), Error>;

    /// Index of the newest entry, `0` for an empty log.
    async fn head(&self, stream_id: &StreamId) -> Result<u64, Error>;
}
