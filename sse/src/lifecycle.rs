//! Per-connection state machine.
//!
//! `STARTING -> REPLAYING -> LIVE -> CLOSED`, with `STARTING -> LIVE` for
//! connections that have nothing to replay. Every exit path (forwarder end,
//! client disconnect, slow consumer, shutdown) goes through [`Lifecycle::close`],
//! the single terminal transition. It runs exactly once and releases the log
//! subscription and the registry entry.

use crate::connection::{ConnectionId, ConnectionRegistry};
use events::{EventId, EventLog, StreamId, Subscription};
use log::*;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Starting,
    Replaying,
    Live,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConnectionState::Starting => write!(f, "starting"),
            ConnectionState::Replaying => write!(f, "replaying"),
            ConnectionState::Live => write!(f, "live"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseCause {
    /// A terminal event type was forwarded.
    Completed,
    TimedOut,
    /// The client went away.
    Disconnected,
    /// The hand-off queue overflowed. The client resumes from its last id.
    Lagged,
    StreamDeleted,
    Shutdown,
    Failed(String),
}

impl CloseCause {
    /// Disconnects are routine; only internal failures are errors.
    pub fn level(&self) -> Level {
        match self {
            CloseCause::Disconnected => Level::Debug,
            CloseCause::Completed
            | CloseCause::TimedOut
            | CloseCause::StreamDeleted
            | CloseCause::Shutdown => Level::Info,
            CloseCause::Lagged => Level::Warn,
            CloseCause::Failed(_) => Level::Error,
        }
    }
}

impl fmt::Display for CloseCause {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CloseCause::Completed => write!(f, "completed"),
            CloseCause::TimedOut => write!(f, "timed out"),
            CloseCause::Disconnected => write!(f, "client disconnected"),
            CloseCause::Lagged => write!(f, "client fell behind"),
            CloseCause::StreamDeleted => write!(f, "stream deleted"),
            CloseCause::Shutdown => write!(f, "server shutting down"),
            CloseCause::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Point-in-time view of a connection, for listings.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSummary {
    pub connection_id: String,
    pub stream_id: String,
    pub state: ConnectionState,
    pub last_event_id: Option<String>,
    pub connected_secs: u64,
}

pub struct Lifecycle {
    connection_id: ConnectionId,
    stream_id: StreamId,
    opened_at: Instant,
    state: Mutex<ConnectionState>,
    active: AtomicBool,
    last_index: AtomicU64,
    cause: OnceLock<CloseCause>,
    cancel: CancellationToken,
    subscription: OnceLock<Subscription>,
    log: Arc<dyn EventLog>,
    registry: Arc<ConnectionRegistry>,
}

impl Lifecycle {
    pub fn new(
        stream_id: StreamId,
        log: Arc<dyn EventLog>,
        registry: Arc<ConnectionRegistry>,
    ) -> Arc<Self> {
        Arc::new(Self {
            connection_id: ConnectionId::new(),
            stream_id,
            opened_at: Instant::now(),
            state: Mutex::new(ConnectionState::Starting),
            active: AtomicBool::new(true),
            last_index: AtomicU64::new(0),
            cause: OnceLock::new(),
            cancel: CancellationToken::new(),
            subscription: OnceLock::new(),
            log,
            registry,
        })
    }

    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// False once `close` has started. Log callbacks check this before
    /// handing anything off.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn close_cause(&self) -> Option<&CloseCause> {
        self.cause.get()
    }

    /// Index of the last event written to the client, `0` before the first.
    pub fn last_index(&self) -> u64 {
        self.last_index.load(Ordering::Acquire)
    }

    pub(crate) fn record_index(&self, index: u64) {
        self.last_index.store(index, Ordering::Release);
    }

    pub(crate) fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stores the log subscription so `close` can release it. If the
    /// connection closed while the subscription was being made, it is
    /// released right away.
    pub(crate) fn attach(&self, subscription: Subscription) {
        let subscription = self.subscription.get_or_init(|| subscription);
        if !self.is_active() {
            self.log.unsubscribe(subscription);
        }
    }

    /// Moves forward through `STARTING -> REPLAYING -> LIVE`. Returns true when
    /// the state changed; never leaves `CLOSED`.
    pub(crate) fn advance(&self, next: ConnectionState) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let allowed = matches!(
            (*state, next),
            (ConnectionState::Starting, ConnectionState::Replaying)
                | (ConnectionState::Starting, ConnectionState::Live)
                | (ConnectionState::Replaying, ConnectionState::Live)
        );
        if allowed {
            trace!("Connection {} {} -> {next}", self.connection_id, *state);
            *state = next;
        }
        allowed
    }

    /// The terminal transition. Idempotent: only the first call has any
    /// effect, and it returns true.
    pub fn close(&self, cause: CloseCause) -> bool {
        if !self.active.swap(false, Ordering::SeqCst) {
            return false;
        }
        let cause = self.cause.get_or_init(|| cause);

        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = ConnectionState::Closed;
        self.cancel.cancel();
        if let Some(subscription) = self.subscription.get() {
            self.log.unsubscribe(subscription);
        }
        self.registry.unregister(&self.connection_id);

        log!(
            cause.level(),
            "Closed SSE connection {} on {} after index {}: {cause}",
            self.connection_id,
            self.stream_id,
            self.last_index()
        );
        true
    }

    pub fn summary(&self) -> ConnectionSummary {
        let last_index = self.last_index();
        ConnectionSummary {
            connection_id: self.connection_id.to_string(),
            stream_id: self.stream_id.to_string(),
            state: self.state(),
            last_event_id: (last_index > 0)
                .then(|| EventId::new(self.stream_id.clone(), last_index).to_string()),
            connected_secs: self.opened_at.elapsed().as_secs(),
        }
    }
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("connection_id", &self.connection_id)
            .field("stream_id", &self.stream_id)
            .field("state", &self.state())
            .field("last_index", &self.last_index())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use events::{InMemoryLog, LogNotification, LogOptions};
    use futures::future::{self, FutureExt};

    fn lifecycle() -> (Arc<Lifecycle>, Arc<ConnectionRegistry>) {
        let registry = Arc::new(ConnectionRegistry::new());
        let stream_id = StreamId::new("orders").unwrap();
        let log: Arc<dyn EventLog> = Arc::new(InMemoryLog::new());
        (Lifecycle::new(stream_id, log, Arc::clone(&registry)), registry)
    }

    #[test]
    fn test_states_only_move_forward() {
        let (connection, _) = lifecycle();
        assert_eq!(connection.state(), ConnectionState::Starting);
        assert!(connection.advance(ConnectionState::Replaying));
        assert!(!connection.advance(ConnectionState::Starting));
        assert!(connection.advance(ConnectionState::Live));
        assert!(!connection.advance(ConnectionState::Replaying));
        assert_eq!(connection.state(), ConnectionState::Live);
    }

    #[test]
    fn test_close_runs_once_and_keeps_first_cause() {
        let (connection, registry) = lifecycle();
        registry.register(Arc::clone(&connection));
        assert_eq!(registry.len(), 1);

        assert!(connection.close(CloseCause::Completed));
        assert!(!connection.close(CloseCause::Disconnected));

        assert!(!connection.is_active());
        assert_eq!(connection.close_cause(), Some(&CloseCause::Completed));
        assert_eq!(connection.state(), ConnectionState::Closed);
        assert!(connection.cancellation().is_cancelled());
        assert!(registry.is_empty());
        assert!(!connection.advance(ConnectionState::Live));
    }

    #[tokio::test]
    async fn test_close_releases_subscription() {
        let log = InMemoryLog::new();
        let shared: Arc<dyn EventLog> = Arc::new(log.clone());
        let stream_id = StreamId::new("orders").unwrap();
        shared.create(&stream_id, LogOptions::default()).await.unwrap();

        let registry = Arc::new(ConnectionRegistry::new());
        let connection = Lifecycle::new(stream_id.clone(), Arc::clone(&shared), registry);
        let subscription = shared
            .subscribe_from(
                &stream_id,
                0,
                Arc::new(|_: LogNotification| future::ready(()).boxed()),
            )
            .await
            .unwrap();
        connection.attach(subscription);
        assert_eq!(log.active_subscriptions(), 1);

        connection.close(CloseCause::Shutdown);
        assert_eq!(log.active_subscriptions(), 0);
    }

    #[test]
    fn test_summary_reports_last_event_id() {
        let (connection, _) = lifecycle();
        assert_eq!(connection.summary().last_event_id, None);

        connection.record_index(4);
        let summary = connection.summary();
        assert_eq!(
            summary.last_event_id,
            Some(format!("{}_4", connection.stream_id()))
        );
        assert_eq!(summary.state, ConnectionState::Starting);
    }

    #[test]
    fn test_close_severity() {
        assert_eq!(CloseCause::Disconnected.level(), Level::Debug);
        assert_eq!(CloseCause::Completed.level(), Level::Info);
        assert_eq!(CloseCause::Lagged.level(), Level::Warn);
        assert_eq!(CloseCause::Failed("gap".into()).level(), Level::Error);
    }
}
