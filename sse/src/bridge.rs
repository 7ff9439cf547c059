//! Resumption bridge: connects one client connection to one log subscription.
//!
//! A fresh subscribe creates a new log and streams it from the start. A resume
//! decodes the client's last event id and asks the log for everything after
//! it, so replay and live tail arrive through the same subscription.
//!
//! Log notifications are handed off through a bounded queue to a forwarding
//! task, one per connection, which is the only writer of the connection's
//! frames. The log callback waits for room in the queue, so a replay is
//! paced by the client. Only a queue that stays full for `lag_timeout` closes
//! the connection as `Lagged`.

use crate::codec::Fields;
use crate::connection::ConnectionRegistry;
use crate::error::Error;
use crate::lifecycle::{CloseCause, ConnectionState, Lifecycle};
use crate::message::{event_frame, keep_alive_frame, open_frame};
use crate::transport::{self, FrameWriter, StreamingResponse};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use events::{
    Event, EventId, EventLog, LogNotification, LogOptions, NotificationHandler, StreamId,
};
use log::*;
use std::collections::HashSet;
use std::future;
use std::sync::Arc;
use std::time::Duration;
use futures::future::FutureExt;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, Interval};
use tokio_util::sync::CancellationToken;

/// What happens to a log once a terminal event has been forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionPolicy {
    Keep,
    /// Delete the log after `grace`, leaving time for late resumes.
    DeleteOnTerminal { grace: Duration },
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Category of streams created by fresh subscribes.
    pub category: String,
    pub terminal_event_types: HashSet<String>,
    pub retention: RetentionPolicy,
    pub log_options: LogOptions,
    /// `None` keeps connections open indefinitely.
    pub timeout: Option<Duration>,
    pub keep_alive: Option<Duration>,
    /// Reconnection delay sent to clients in the opening frame.
    pub retry_hint: Option<Duration>,
    pub handoff_capacity: usize,
    /// How long a notification may wait for room in the hand-off queue.
    pub lag_timeout: Duration,
    pub write_buffer_frames: usize,
}

impl BridgeConfig {
    pub fn is_terminal(&self, event_type: &str) -> bool {
        self.terminal_event_types.contains(event_type)
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            category: "events".to_string(),
            terminal_event_types: HashSet::from(["completed".to_string()]),
            retention: RetentionPolicy::DeleteOnTerminal {
                grace: Duration::from_secs(30),
            },
            log_options: LogOptions::default(),
            timeout: None,
            keep_alive: Some(Duration::from_secs(15)),
            retry_hint: Some(Duration::from_millis(3000)),
            handoff_capacity: 1024,
            lag_timeout: Duration::from_secs(30),
            write_buffer_frames: 16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscribeRequest {
    Fresh,
    Resume(EventId),
}

impl SubscribeRequest {
    /// Interprets an optional resumption token. An absent or blank token is a
    /// fresh subscribe; anything else must be a canonical event id.
    pub fn from_token(token: Option<&str>) -> Result<Self, Error> {
        match token.map(str::trim) {
            None | Some("") => Ok(SubscribeRequest::Fresh),
            Some(token) => Ok(SubscribeRequest::Resume(token.parse::<EventId>()?)),
        }
    }
}

/// Result of a subscribe: either a live stream, or an immediate answer that
/// there is nothing left to stream.
pub enum SubscribeOutcome {
    Streaming(StreamingResponse),
    /// The resumed stream's log no longer exists.
    Concluded { stream_id: StreamId },
}

impl IntoResponse for SubscribeOutcome {
    fn into_response(self) -> Response {
        match self {
            SubscribeOutcome::Streaming(response) => response.into_response(),
            // 204 tells an EventSource to stop reconnecting.
            SubscribeOutcome::Concluded { .. } => StatusCode::NO_CONTENT.into_response(),
        }
    }
}

pub struct Bridge {
    log: Arc<dyn EventLog>,
    registry: Arc<ConnectionRegistry>,
    config: Arc<BridgeConfig>,
}

impl Bridge {
    pub fn new(
        log: Arc<dyn EventLog>,
        registry: Arc<ConnectionRegistry>,
        config: BridgeConfig,
    ) -> Self {
        Self {
            log,
            registry,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub async fn subscribe(&self, request: SubscribeRequest) -> Result<SubscribeOutcome, Error> {
        let resumed = matches!(request, SubscribeRequest::Resume(_));
        let (stream_id, after_index) = match request {
            SubscribeRequest::Fresh => {
                // A bad category is a deployment fault, not the client's.
                let stream_id = StreamId::new(&self.config.category).map_err(|e| {
                    error!("Cannot create a stream in category {:?}: {e}", self.config.category);
                    Error::internal(format!("invalid stream category: {e}"))
                })?;
                self.log.create(&stream_id, self.config.log_options).await?;
                info!("Created stream {stream_id} for a fresh subscribe");
                (stream_id, 0)
            }
            SubscribeRequest::Resume(event_id) => {
                debug!("Resuming {} after index {}", event_id.stream_id(), event_id.index());
                (event_id.stream_id().clone(), event_id.index())
            }
        };

        let connection = Lifecycle::new(
            stream_id.clone(),
            Arc::clone(&self.log),
            Arc::clone(&self.registry),
        );
        let (handoff_tx, handoff_rx) = mpsc::channel(self.config.handoff_capacity.max(1));
        let handler =
            handoff_handler(Arc::clone(&connection), handoff_tx, self.config.lag_timeout);

        let subscription = match self.log.subscribe_from(&stream_id, after_index, handler).await {
            Ok(subscription) => subscription,
            Err(e) if resumed && e.is_not_found() => {
                info!("Stream {stream_id} no longer exists, concluding resumed subscribe");
                return Ok(SubscribeOutcome::Concluded { stream_id });
            }
            Err(e) => {
                warn!("Failed to subscribe to {stream_id} after index {after_index}: {e}");
                return Err(e.into());
            }
        };

        let replay_until = subscription.head_index();
        connection.advance(if subscription.has_backlog() {
            ConnectionState::Replaying
        } else {
            ConnectionState::Live
        });
        connection.attach(subscription);
        self.registry.register(Arc::clone(&connection));

        let (writer, frames) =
            transport::channel(self.config.write_buffer_frames, Arc::clone(&connection));
        let forwarder = Forwarder {
            cancel: connection.cancellation(),
            connection,
            handoff: handoff_rx,
            writer,
            log: Arc::clone(&self.log),
            config: Arc::clone(&self.config),
            last_index: after_index,
            replay_until,
        };
        tokio::spawn(forwarder.run());

        Ok(SubscribeOutcome::Streaming(StreamingResponse::new(
            stream_id, frames,
        )))
    }
}

/// The log callback: check the connection is still active, then wait for room
/// in the hand-off queue.
fn handoff_handler(
    connection: Arc<Lifecycle>,
    handoff: mpsc::Sender<LogNotification>,
    lag_timeout: Duration,
) -> NotificationHandler {
    Arc::new(move |notification: LogNotification| {
        let connection = Arc::clone(&connection);
        let handoff = handoff.clone();
        async move {
            if !connection.is_active() {
                return;
            }
            let cancel = connection.cancellation();
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {}
                sent = time::timeout(lag_timeout, handoff.send(notification)) => match sent {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => {
                        connection.close(CloseCause::Failed(
                            "forwarding task stopped receiving".to_string(),
                        ));
                    }
                    Err(_) => {
                        warn!(
                            "Hand-off queue of connection {} full for {lag_timeout:?}",
                            connection.connection_id()
                        );
                        connection.close(CloseCause::Lagged);
                    }
                },
            }
        }
        .boxed()
    })
}

enum Step {
    Continue,
    Close(CloseCause),
    /// Closed from outside while waiting.
    Cancelled,
}

impl Step {
    /// `None` to keep going, otherwise the forwarder's exit value.
    fn into_exit(self) -> Option<Option<CloseCause>> {
        match self {
            Step::Continue => None,
            Step::Close(cause) => Some(Some(cause)),
            Step::Cancelled => Some(None),
        }
    }
}

struct Forwarder {
    connection: Arc<Lifecycle>,
    cancel: CancellationToken,
    handoff: mpsc::Receiver<LogNotification>,
    writer: FrameWriter,
    log: Arc<dyn EventLog>,
    config: Arc<BridgeConfig>,
    last_index: u64,
    /// Head of the log when the subscription was made; reaching it ends replay.
    replay_until: u64,
}

/// Closes the connection if the forwarder exits without doing so, including
/// by panic.
struct ReleaseGuard(Arc<Lifecycle>);

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        if self.0.is_active() {
            self.0.close(CloseCause::Failed(
                "forwarding task ended unexpectedly".to_string(),
            ));
        }
    }
}

impl Forwarder {
    async fn run(mut self) {
        let _release = ReleaseGuard(Arc::clone(&self.connection));
        if let Some(cause) = self.forward().await {
            self.connection.close(cause);
        }
    }

    /// Returns the close cause, or `None` when the connection was closed from
    /// outside.
    async fn forward(&mut self) -> Option<CloseCause> {
        let opening = open_frame(self.connection.stream_id(), self.config.retry_hint);
        if let Some(exit) = self.write(&opening).await.into_exit() {
            return exit;
        }

        let timeout = sleep_or_pending(self.config.timeout);
        tokio::pin!(timeout);
        let mut keep_alive = self
            .config
            .keep_alive
            .map(|period| time::interval_at(Instant::now() + period, period));

        loop {
            let step = tokio::select! {
                biased;

                _ = self.cancel.cancelled() => Step::Cancelled,
                _ = &mut timeout => Step::Close(CloseCause::TimedOut),
                notification = self.handoff.recv() => match notification {
                    Some(LogNotification::Entry(event)) => {
                        if let Some(keep_alive) = keep_alive.as_mut() {
                            keep_alive.reset();
                        }
                        self.forward_event(event).await
                    }
                    Some(LogNotification::Deleted(_)) => Step::Close(CloseCause::StreamDeleted),
                    None => Step::Close(CloseCause::Failed(
                        "event log stopped delivering".to_string(),
                    )),
                },
                _ = next_tick(&mut keep_alive) => self.write(&keep_alive_frame()).await,
            };
            if let Some(exit) = step.into_exit() {
                return exit;
            }
        }
    }

    async fn forward_event(&mut self, event: Event) -> Step {
        let index = event.index();
        if index <= self.last_index {
            warn!(
                "Skipping duplicate delivery of {} on connection {}",
                event.id(),
                self.connection.connection_id()
            );
            return Step::Continue;
        }
        let expected = self.last_index + 1;
        if index != expected {
            error!(
                "Index gap on connection {}: expected {expected}, received {}",
                self.connection.connection_id(),
                event.id()
            );
            return Step::Close(CloseCause::Failed(format!(
                "index gap: expected {expected}, received {index}"
            )));
        }

        let written = self.write(&event_frame(&event)).await;
        if !matches!(written, Step::Continue) {
            return written;
        }
        self.last_index = index;
        self.connection.record_index(index);

        if index >= self.replay_until && self.connection.advance(ConnectionState::Live) {
            debug!(
                "Connection {} replayed through index {index}, now live",
                self.connection.connection_id()
            );
        }

        if self.config.is_terminal(event.event_type()) {
            self.apply_retention();
            return Step::Close(CloseCause::Completed);
        }
        Step::Continue
    }

    /// Writes one frame, giving up if the connection is closed meanwhile.
    async fn write(&self, frame: &Fields) -> Step {
        tokio::select! {
            biased;

            _ = self.cancel.cancelled() => Step::Cancelled,
            written = self.writer.write(frame) => match written {
                Ok(()) => Step::Continue,
                Err(e) => Step::Close(e.into_cause()),
            },
        }
    }

    fn apply_retention(&self) {
        let RetentionPolicy::DeleteOnTerminal { grace } = self.config.retention else {
            return;
        };
        let log = Arc::clone(&self.log);
        let stream_id = self.connection.stream_id().clone();
        debug!("Deleting {stream_id} in {grace:?} after its terminal event");

        tokio::spawn(async move {
            time::sleep(grace).await;
            match log.delete(&stream_id).await {
                Ok(()) => {}
                // Another connection on the same stream got there first.
                Err(e) if e.is_not_found() => trace!("{stream_id} already deleted"),
                Err(e) => warn!("Failed to delete {stream_id} after terminal event: {e}"),
            }
        });
    }
}

async fn sleep_or_pending(timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => time::sleep(timeout).await,
        None => future::pending().await,
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => future::pending().await,
    }
}
