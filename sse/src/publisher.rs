//! Appending to logs on behalf of producers.
//!
//! An append either returns the confirmed event or an error; an index is never
//! assumed. Only `Unavailable` failures are retried, with exponential backoff.

use crate::codec::{OversizePolicy, Parser};
use crate::error::Error;
use events::{Event, EventLog, Payload, StreamId, DEFAULT_EVENT_TYPE};
use log::*;
use std::sync::Arc;
use std::time::Duration;

/// Exponential backoff retry policy.
///
/// Retries with exponentially increasing delays, capped at a maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }

    pub fn with_delays(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    /// Delay before retry number `n_past_retries + 1`, or `None` when retries
    /// are used up.
    pub fn next_delay(&self, n_past_retries: u32) -> Option<Duration> {
        (n_past_retries < self.max_retries).then(|| self.exponential_delay(n_past_retries))
    }

    fn exponential_delay(&self, n_attempts: u32) -> Duration {
        let delay = self.base_delay.as_secs_f64() * 2_f64.powi(n_attempts as i32);
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Bounds applied when parsing `text/event-stream` bodies for ingest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestLimits {
    pub max_frame_chars: usize,
    pub oversize_policy: OversizePolicy,
}

impl Default for IngestLimits {
    fn default() -> Self {
        Self {
            max_frame_chars: 64 * 1024,
            oversize_policy: OversizePolicy::Continue,
        }
    }
}

pub struct Publisher {
    log: Arc<dyn EventLog>,
    retry: RetryPolicy,
    limits: IngestLimits,
}

impl Publisher {
    pub fn new(log: Arc<dyn EventLog>, retry: RetryPolicy, limits: IngestLimits) -> Self {
        Self { log, retry, limits }
    }

    /// Appends one event and returns it as confirmed by the log.
    pub async fn publish(
        &self,
        stream_id: &StreamId,
        event_type: &str,
        payload: Payload,
    ) -> Result<Event, Error> {
        let mut retries = 0;
        loop {
            match self.log.append(stream_id, event_type, payload.clone()).await {
                Ok(event) => return Ok(event),
                Err(e) if e.is_retryable() => match self.retry.next_delay(retries) {
                    Some(delay) => {
                        warn!(
                            "Append to {stream_id} not confirmed ({e}), retry {} in {delay:?}",
                            retries + 1
                        );
                        tokio::time::sleep(delay).await;
                        retries += 1;
                    }
                    None => {
                        error!("Giving up on append to {stream_id} after {retries} retries: {e}");
                        return Err(e.into());
                    }
                },
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Appends every frame of a `text/event-stream` body, in order.
    ///
    /// The whole body is parsed before anything is appended, so a body rejected
    /// under the stop policy appends nothing. Each frame's `event` (default
    /// `message`) and `data` become one entry. Frames with empty data are
    /// skipped, as an event source would not dispatch them, and any `id` in the
    /// body is ignored since the log assigns indices.
    pub async fn ingest(&self, stream_id: &StreamId, body: &[u8]) -> Result<Vec<Event>, Error> {
        let mut frames = Vec::new();
        let mut parser = Parser::new(self.limits.max_frame_chars, self.limits.oversize_policy);
        parser.feed(body, |fields| frames.push(fields))?;
        if parser.finish() {
            warn!("Ignoring incomplete trailing frame in body for {stream_id}");
        }

        let mut events = Vec::with_capacity(frames.len());
        for fields in frames {
            if fields.data.is_empty() {
                trace!("Skipping frame without data for {stream_id}");
                continue;
            }
            let event_type = fields.event.as_deref().unwrap_or(DEFAULT_EVENT_TYPE);
            events.push(
                self.publish(stream_id, event_type, Payload::Text(fields.data))
                    .await?,
            );
        }
        debug!("Ingested {} events into {stream_id}", events.len());
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CodecErrorKind, ErrorKind, LogErrorKind};
    use async_trait::async_trait;
    use events::{
        EventId, InMemoryLog, LogOptions, NotificationHandler, Subscription,
    };
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_exponential_delay() {
        let policy =
            RetryPolicy::new(3).with_delays(Duration::from_secs(1), Duration::from_secs(60));

        assert_eq!(policy.next_delay(0), Some(Duration::from_secs(1)));
        assert_eq!(policy.next_delay(1), Some(Duration::from_secs(2)));
        assert_eq!(policy.next_delay(2), Some(Duration::from_secs(4)));
        assert_eq!(policy.next_delay(3), None);
    }

    #[test]
    fn test_max_delay_cap() {
        let policy = RetryPolicy::new(10);
        let delay = policy.exponential_delay(10);
        assert!(delay <= policy.max_delay);
    }

    /// Fails the first `failures` appends with `Unavailable`.
    struct FlakyLog {
        inner: InMemoryLog,
        failures: AtomicU32,
    }

    #[async_trait]
    impl EventLog for FlakyLog {
        async fn create(
            &self,
            stream_id: &StreamId,
            options: LogOptions,
        ) -> Result<(), events::Error> {
            self.inner.create(stream_id, options).await
        }

        async fn append(
            &self,
            stream_id: &StreamId,
            event_type: &str,
            payload: Payload,
        ) -> Result<Event, events::Error> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(events::Error::log(LogErrorKind::Unavailable));
            }
            self.inner.append(stream_id, event_type, payload).await
        }

        async fn subscribe_from(
            &self,
            stream_id: &StreamId,
            after_index: u64,
            handler: NotificationHandler,
        ) -> Result<Subscription, events::Error> {
            self.inner.subscribe_from(stream_id, after_index, handler).await
        }

        fn unsubscribe(&self, subscription: &Subscription) {
            self.inner.unsubscribe(subscription)
        }

        async fn delete(&self, stream_id: &StreamId) -> Result<(), events::Error> {
            self.inner.delete(stream_id).await
        }

        async fn head(&self, stream_id: &StreamId) -> Result<u64, events::Error> {
            self.inner.head(stream_id).await
        }
    }

    async fn flaky(failures: u32, max_retries: u32) -> (Publisher, StreamId) {
        let log = FlakyLog {
            inner: InMemoryLog::new(),
            failures: AtomicU32::new(failures),
        };
        let stream_id = StreamId::new("orders").unwrap();
        log.create(&stream_id, LogOptions::default()).await.unwrap();
        let retry = RetryPolicy::new(max_retries)
            .with_delays(Duration::from_millis(1), Duration::from_millis(5));
        (
            Publisher::new(Arc::new(log), retry, IngestLimits::default()),
            stream_id,
        )
    }

    async fn publisher_with(limits: IngestLimits) -> (Publisher, InMemoryLog, StreamId) {
        let log = InMemoryLog::new();
        let stream_id = StreamId::new("orders").unwrap();
        log.create(&stream_id, LogOptions::default()).await.unwrap();
        let publisher = Publisher::new(Arc::new(log.clone()), RetryPolicy::default(), limits);
        (publisher, log, stream_id)
    }

    #[tokio::test]
    async fn test_unavailable_append_is_retried() {
        let (publisher, stream_id) = flaky(2, 3).await;
        let event = publisher
            .publish(&stream_id, "created", Payload::from("x"))
            .await
            .unwrap();
        assert_eq!(event.id(), &EventId::new(stream_id, 1));
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let (publisher, stream_id) = flaky(5, 2).await;
        let err = publisher
            .publish(&stream_id, "created", Payload::from("x"))
            .await
            .unwrap_err();
        assert_eq!(err.error_kind, ErrorKind::Log(LogErrorKind::Unavailable));
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let (publisher, _, _) = publisher_with(IngestLimits::default()).await;
        let missing = StreamId::new("orders").unwrap();
        let err = publisher
            .publish(&missing, "created", Payload::from("x"))
            .await
            .unwrap_err();
        assert_eq!(err.error_kind, ErrorKind::Log(LogErrorKind::NotFound));
    }

    #[tokio::test]
    async fn test_ingest_appends_each_frame() {
        let (publisher, log, stream_id) = publisher_with(IngestLimits::default()).await;
        let body = b": keep-alive\n\n\
            event: created\ndata: a\ndata: b\n\n\
            id: ignored\ndata: c\n\n\
            data: partial";

        let events = publisher.ingest(&stream_id, body).await.unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type(), "created");
        assert_eq!(events[0].payload(), &Payload::from("a\nb"));
        assert_eq!(events[1].event_type(), DEFAULT_EVENT_TYPE);
        assert_eq!(events[1].index(), 2);
        assert_eq!(log.head(&stream_id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_ingest_skips_frames_without_data() {
        let (publisher, log, stream_id) = publisher_with(IngestLimits::default()).await;
        let body = b"event: x\n\nfoo: bar\n\nretry: 100\n\nevent: kept\ndata: y\n\n";

        let events = publisher.ingest(&stream_id, body).await.unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].index(), 1);
        assert_eq!(events[0].event_type(), "kept");
        assert_eq!(events[0].payload(), &Payload::from("y"));
        assert_eq!(log.head(&stream_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_ingest_under_stop_policy_appends_nothing() {
        let limits = IngestLimits {
            max_frame_chars: 10,
            oversize_policy: OversizePolicy::Stop,
        };
        let (publisher, log, stream_id) = publisher_with(limits).await;

        let err = publisher
            .ingest(&stream_id, b"data: ok\n\ndata: 12345678901234\n\n")
            .await
            .unwrap_err();

        assert_eq!(
            err.error_kind,
            ErrorKind::Codec(CodecErrorKind::FrameTooLarge { limit: 10 })
        );
        assert_eq!(log.head(&stream_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ingest_under_continue_policy_skips_oversized_frame() {
        let limits = IngestLimits {
            max_frame_chars: 10,
            oversize_policy: OversizePolicy::Continue,
        };
        let (publisher, _, stream_id) = publisher_with(limits).await;

        let events = publisher
            .ingest(&stream_id, b"data: 12345678901234\n\ndata: ok\n\n")
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload(), &Payload::from("ok"));
    }
}
