//! In-process reference implementation of [`EventLog`].
//!
//! Each stream keeps its entries in a `Vec` (index `n` lives at position
//! `n - 1`) and publishes its head through a `watch` channel. Every
//! subscription runs its own delivery task that walks a cursor over the
//! entries and parks on the watch channel once caught up, so replay and live
//! tail are the same loop and there is no boundary to lose or repeat an entry.
//! The task awaits the handler for every notification, so a long replay moves
//! at the pace of the subscriber rather than flooding it.

use crate::client::{
    normalize_event_type, Event, EventLog, LogNotification, LogOptions, NotificationHandler,
    Payload, Subscription, SubscriptionId,
};
use crate::error::{Error, LogErrorKind};
use crate::id::{EventId, StreamId};
use async_trait::async_trait;
use dashmap::DashMap;
use log::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Entries cloned out of a stream per lock acquisition during delivery.
const DELIVERY_BATCH: usize = 256;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Head {
    index: u64,
    deleted: bool,
}

struct StreamLog {
    stream_id: StreamId,
    options: LogOptions,
    entries: RwLock<Vec<Event>>,
    head: watch::Sender<Head>,
}

impl StreamLog {
    fn new(stream_id: StreamId, options: LogOptions) -> Self {
        let (head, _) = watch::channel(Head::default());
        Self {
            stream_id,
            options,
            entries: RwLock::new(Vec::new()),
            head,
        }
    }

    fn append(&self, event_type: &str, payload: Payload) -> Result<Event, Error> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;

        if self.head.borrow().deleted {
            return Err(Error::log(LogErrorKind::NotFound));
        }
        if let Some(max) = self.options.max_entries {
            if entries.len() as u64 >= max {
                return Err(Error::log(LogErrorKind::Full));
            }
        }

        let index = entries.len() as u64 + 1;
        let event = Event::new(
            EventId::new(self.stream_id.clone(), index),
            event_type,
            payload,
        );
        entries.push(event.clone());
        // Published while still holding the write lock so heads are observed
        // in append order.
        self.head.send_modify(|head| head.index = index);

        Ok(event)
    }

    fn read_after(&self, cursor: u64, limit: usize) -> Result<Vec<Event>, Error> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        let start = (cursor as usize).min(entries.len());
        let end = start.saturating_add(limit).min(entries.len());
        Ok(entries[start..end].to_vec())
    }

    fn head_index(&self) -> Result<u64, Error> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries.len() as u64)
    }

    fn mark_deleted(&self) {
        self.head.send_modify(|head| head.deleted = true);
    }
}

fn poisoned() -> Error {
    Error::log(LogErrorKind::Unavailable).with_source("stream lock poisoned")
}

#[derive(Default)]
struct Inner {
    streams: DashMap<StreamId, Arc<StreamLog>>,
    subscriptions: DashMap<SubscriptionId, CancellationToken>,
    next_subscription: AtomicU64,
}

impl Inner {
    fn stream(&self, stream_id: &StreamId) -> Result<Arc<StreamLog>, Error> {
        self.streams
            .get(stream_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::log(LogErrorKind::NotFound))
    }
}

/// Event log kept in process memory. Cloning shares the same logs.
#[derive(Clone, Default)]
pub struct InMemoryLog {
    inner: Arc<Inner>,
}

impl InMemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of subscriptions whose delivery task is still running.
    pub fn active_subscriptions(&self) -> usize {
        self.inner.subscriptions.len()
    }
}

#[async_trait]
impl EventLog for InMemoryLog {
    async fn create(&self, stream_id: &StreamId, options: LogOptions) -> Result<(), Error> {
        let entry = self
            .inner
            .streams
            .entry(stream_id.clone())
            .or_insert_with(|| {
                debug!("Creating log {stream_id} with {options:?}");
                Arc::new(StreamLog::new(stream_id.clone(), options))
            });

        if entry.value().options == options {
            Ok(())
        } else {
            Err(Error::log(LogErrorKind::Conflict))
        }
    }

    async fn append(
        &self,
        stream_id: &StreamId,
        event_type: &str,
        payload: Payload,
    ) -> Result<Event, Error> {
        let event_type = normalize_event_type(event_type)?;
        let event = self.inner.stream(stream_id)?.append(event_type, payload)?;
        trace!("Appended {} ({})", event.id(), event.event_type());
        Ok(event)
    }

    async fn subscribe_from(
        &self,
        stream_id: &StreamId,
        after_index: u64,
        handler: NotificationHandler,
    ) -> Result<Subscription, Error> {
        let stream = self.inner.stream(stream_id)?;
        let head_index = stream.head_index()?;
        if after_index > head_index {
            return Err(Error::log(LogErrorKind::OffsetOutOfRange));
        }

        let id = SubscriptionId(self.inner.next_subscription.fetch_add(1, Ordering::Relaxed));
        let token = CancellationToken::new();
        self.inner.subscriptions.insert(id, token.clone());

        let inner = Arc::clone(&self.inner);
        let head_rx = stream.head.subscribe();
        tokio::spawn(async move {
            deliver(stream, after_index, head_rx, handler, token).await;
            inner.subscriptions.remove(&id);
        });

        debug!("Subscribed {id:?} to {stream_id} after index {after_index} (head {head_index})");
        Ok(Subscription::new(id, stream_id.clone(), after_index, head_index))
    }

    fn unsubscribe(&self, subscription: &Subscription) {
        if let Some((id, token)) = self.inner.subscriptions.remove(&subscription.id()) {
            debug!("Unsubscribed {id:?} from {}", subscription.stream_id());
            token.cancel();
        }
    }

    async fn delete(&self, stream_id: &StreamId) -> Result<(), Error> {
        let (_, stream) = self
            .inner
            .streams
            .remove(stream_id)
            .ok_or_else(|| Error::log(LogErrorKind::NotFound))?;

        // Take the write lock so no append lands after the deletion mark.
        let _entries = stream.entries.write().map_err(|_| poisoned())?;
        stream.mark_deleted();
        info!("Deleted log {stream_id}");
        Ok(())
    }

    async fn head(&self, stream_id: &StreamId) -> Result<u64, Error> {
        self.inner.stream(stream_id)?.head_index()
    }
}

async fn deliver(
    stream: Arc<StreamLog>,
    mut cursor: u64,
    mut head_rx: watch::Receiver<Head>,
    handler: NotificationHandler,
    token: CancellationToken,
) {
    loop {
        // Mark the head as seen before draining: anything appended after this
        // point wakes the `changed()` below.
        let head = *head_rx.borrow_and_update();

        while cursor < head.index {
            let batch = match stream.read_after(cursor, DELIVERY_BATCH) {
                Ok(batch) => batch,
                Err(e) => {
                    error!("Stopping delivery for {}: {e}", stream.stream_id);
                    return;
                }
            };
            if batch.is_empty() {
                break;
            }
            for event in batch {
                cursor = event.index();
                if !notify(&handler, LogNotification::Entry(event), &token).await {
                    return;
                }
            }
            // A handler that always has room never yields on its own.
            tokio::task::yield_now().await;
        }

        if head.deleted {
            let deleted = LogNotification::Deleted(stream.stream_id.clone());
            notify(&handler, deleted, &token).await;
            return;
        }

        tokio::select! {
            _ = token.cancelled() => return,
            changed = head_rx.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
    }
}

/// Runs the handler to completion unless the subscription is cancelled first.
/// Returns `false` once cancelled.
async fn notify(
    handler: &NotificationHandler,
    notification: LogNotification,
    token: &CancellationToken,
) -> bool {
    if token.is_cancelled() {
        return false;
    }
    tokio::select! {
        biased;

        _ = token.cancelled() => false,
        _ = handler(notification) => !token.is_cancelled(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::{Mutex, OnceLock};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn channel_handler() -> (NotificationHandler, mpsc::UnboundedReceiver<LogNotification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler: NotificationHandler = Arc::new(move |note| {
            let _ = tx.send(note);
            futures::future::ready(()).boxed()
        });
        (handler, rx)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<LogNotification>) -> LogNotification {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for a notification")
            .expect("handler dropped")
    }

    async fn next_index(rx: &mut mpsc::UnboundedReceiver<LogNotification>) -> u64 {
        match next(rx).await {
            LogNotification::Entry(event) => event.index(),
            other => panic!("expected an entry, got {other:?}"),
        }
    }

    async fn stream_with(log: &InMemoryLog, n: u64) -> StreamId {
        let stream_id = StreamId::new("orders").unwrap();
        log.create(&stream_id, LogOptions::default()).await.unwrap();
        for i in 1..=n {
            log.append(&stream_id, "created", Payload::from(format!("order {i}")))
                .await
                .unwrap();
        }
        stream_id
    }

    #[tokio::test]
    async fn test_append_assigns_increasing_indices_from_one() {
        let log = InMemoryLog::new();
        let stream_id = stream_with(&log, 0).await;

        for expected in 1..=3 {
            let event = log.append(&stream_id, "", "x".into()).await.unwrap();
            assert_eq!(event.index(), expected);
            assert_eq!(event.id().stream_id(), &stream_id);
            assert_eq!(event.event_type(), "message");
        }
        assert_eq!(log.head(&stream_id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_create_is_idempotent_only_for_identical_options() {
        let log = InMemoryLog::new();
        let stream_id = StreamId::new("orders").unwrap();
        log.create(&stream_id, LogOptions::default()).await.unwrap();
        log.create(&stream_id, LogOptions::default()).await.unwrap();

        let err = log
            .create(&stream_id, LogOptions { max_entries: Some(5) })
            .await
            .unwrap_err();
        assert_eq!(err.log_kind(), Some(&LogErrorKind::Conflict));
    }

    #[tokio::test]
    async fn test_append_to_missing_log_fails() {
        let log = InMemoryLog::new();
        let err = log
            .append(&StreamId::new("orders").unwrap(), "created", "x".into())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_full_log_rejects_append_without_assigning_an_index() {
        let log = InMemoryLog::new();
        let stream_id = StreamId::new("orders").unwrap();
        log.create(&stream_id, LogOptions { max_entries: Some(2) })
            .await
            .unwrap();
        log.append(&stream_id, "a", "1".into()).await.unwrap();
        log.append(&stream_id, "a", "2".into()).await.unwrap();

        let err = log.append(&stream_id, "a", "3".into()).await.unwrap_err();
        assert_eq!(err.log_kind(), Some(&LogErrorKind::Full));
        assert_eq!(log.head(&stream_id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_resume_at_every_offset_replays_exactly_the_suffix_then_goes_live() {
        let n = 5;
        let log = InMemoryLog::new();
        let stream_id = stream_with(&log, n).await;

        for k in 0..=n {
            let (handler, mut rx) = channel_handler();
            // Live entries from earlier rounds are backlog for later ones.
            let head = log.head(&stream_id).await.unwrap();
            let subscription = log.subscribe_from(&stream_id, k, handler).await.unwrap();
            assert_eq!(subscription.head_index(), head);

            for expected in (k + 1)..=head {
                assert_eq!(next_index(&mut rx).await, expected, "resume at {k}");
            }

            let live = log.append(&stream_id, "created", "live".into()).await.unwrap();
            assert_eq!(live.index(), head + 1);
            assert_eq!(next_index(&mut rx).await, head + 1);

            log.unsubscribe(&subscription);
        }
    }

    #[tokio::test]
    async fn test_replay_then_live_scenario() {
        let log = InMemoryLog::new();
        let stream_id = stream_with(&log, 3).await;
        let (handler, mut rx) = channel_handler();

        let token: EventId = format!("{stream_id}_1").parse().unwrap();
        let subscription = log
            .subscribe_from(token.stream_id(), token.index(), handler)
            .await
            .unwrap();
        assert!(subscription.has_backlog());

        assert_eq!(next_index(&mut rx).await, 2);
        assert_eq!(next_index(&mut rx).await, 3);
        log.append(&stream_id, "created", "four".into()).await.unwrap();
        assert_eq!(next_index(&mut rx).await, 4);
    }

    #[tokio::test]
    async fn test_replay_waits_for_a_handler_without_room() {
        let log = InMemoryLog::new();
        let stream_id = stream_with(&log, 1000).await;
        let (tx, mut rx) = mpsc::channel(1);
        let handler: NotificationHandler = Arc::new(move |note| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(note).await;
            }
            .boxed()
        });
        log.subscribe_from(&stream_id, 0, handler).await.unwrap();

        // Nothing is dropped while the subscriber is not reading.
        tokio::time::sleep(Duration::from_millis(20)).await;
        for expected in 1..=1000 {
            let note = timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
            match note {
                Some(LogNotification::Entry(event)) => assert_eq!(event.index(), expected),
                other => panic!("expected entry {expected}, got {other:?}"),
            }
        }
        assert_eq!(log.active_subscriptions(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_delivered_in_order_without_gaps() {
        let log = InMemoryLog::new();
        let stream_id = stream_with(&log, 0).await;
        let (handler, mut rx) = channel_handler();
        log.subscribe_from(&stream_id, 0, handler).await.unwrap();

        let mut writers = Vec::new();
        for _ in 0..4 {
            let log = log.clone();
            let stream_id = stream_id.clone();
            writers.push(tokio::spawn(async move {
                for _ in 0..50 {
                    log.append(&stream_id, "tick", "x".into()).await.unwrap();
                }
            }));
        }
        for writer in writers {
            writer.await.unwrap();
        }

        for expected in 1..=200 {
            assert_eq!(next_index(&mut rx).await, expected);
        }
    }

    #[tokio::test]
    async fn test_subscribing_past_the_head_is_rejected() {
        let log = InMemoryLog::new();
        let stream_id = stream_with(&log, 2).await;
        let (handler, _rx) = channel_handler();

        let err = log.subscribe_from(&stream_id, 3, handler).await.unwrap_err();
        assert_eq!(err.log_kind(), Some(&LogErrorKind::OffsetOutOfRange));
        assert_eq!(log.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_from_inside_the_handler_stops_delivery() {
        let log = InMemoryLog::new();
        let stream_id = stream_with(&log, 5).await;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let slot: Arc<OnceLock<Subscription>> = Arc::new(OnceLock::new());
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();

        let handler: NotificationHandler = {
            let log = log.clone();
            let seen = Arc::clone(&seen);
            let slot = Arc::clone(&slot);
            Arc::new(move |note| {
                if let LogNotification::Entry(event) = note {
                    seen.lock().unwrap().push(event.index());
                    if event.index() == 2 {
                        if let Some(subscription) = slot.get() {
                            log.unsubscribe(subscription);
                        }
                        let _ = done_tx.send(());
                    }
                }
                futures::future::ready(()).boxed()
            })
        };

        // The current-thread test runtime only runs the delivery task once
        // this test yields, so the handle is stored before any callback.
        let subscription = log.subscribe_from(&stream_id, 0, handler).await.unwrap();
        slot.set(subscription).unwrap();

        timeout(Duration::from_secs(2), done_rx.recv()).await.unwrap();
        log.append(&stream_id, "late", "x".into()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
        assert_eq!(log.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_delete_sends_terminal_notification_after_backlog() {
        let log = InMemoryLog::new();
        let stream_id = stream_with(&log, 2).await;
        let (handler, mut rx) = channel_handler();
        log.subscribe_from(&stream_id, 0, handler).await.unwrap();

        log.delete(&stream_id).await.unwrap();

        assert_eq!(next_index(&mut rx).await, 1);
        assert_eq!(next_index(&mut rx).await, 2);
        assert_eq!(next(&mut rx).await, LogNotification::Deleted(stream_id.clone()));
        assert!(log.head(&stream_id).await.unwrap_err().is_not_found());
        assert!(log.delete(&stream_id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_concurrent_subscribers_are_independent() {
        let log = InMemoryLog::new();
        let stream_id = stream_with(&log, 3).await;
        let (first, mut first_rx) = channel_handler();
        let (second, mut second_rx) = channel_handler();

        let first_sub = log.subscribe_from(&stream_id, 0, first).await.unwrap();
        log.subscribe_from(&stream_id, 2, second).await.unwrap();

        assert_eq!(next_index(&mut first_rx).await, 1);
        log.unsubscribe(&first_sub);

        assert_eq!(next_index(&mut second_rx).await, 3);
        log.append(&stream_id, "created", "x".into()).await.unwrap();
        assert_eq!(next_index(&mut second_rx).await, 4);
    }
}
