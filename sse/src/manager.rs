use crate::bridge::{Bridge, BridgeConfig, SubscribeOutcome, SubscribeRequest};
use crate::connection::ConnectionRegistry;
use crate::error::Error;
use crate::lifecycle::{CloseCause, ConnectionSummary};
use crate::publisher::{IngestLimits, Publisher, RetryPolicy};
use events::{Event, EventLog, Payload, StreamId};
use log::*;
use serde::Serialize;
use std::sync::Arc;

/// Head of a stream's log and how many clients are following it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamStatus {
    pub stream_id: String,
    pub head_index: u64,
    pub connections: usize,
}

/// App-wide entry point: one per process, shared through the web state.
pub struct Manager {
    log: Arc<dyn EventLog>,
    registry: Arc<ConnectionRegistry>,
    bridge: Bridge,
    publisher: Publisher,
}

impl Manager {
    pub fn new(
        log: Arc<dyn EventLog>,
        config: BridgeConfig,
        retry: RetryPolicy,
        limits: IngestLimits,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        Self {
            bridge: Bridge::new(Arc::clone(&log), Arc::clone(&registry), config),
            publisher: Publisher::new(Arc::clone(&log), retry, limits),
            log,
            registry,
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        self.bridge.config()
    }

    /// Opens a connection. `token` is the client's last event id, if any; a
    /// malformed token is rejected before the log is touched.
    pub async fn subscribe(&self, token: Option<&str>) -> Result<SubscribeOutcome, Error> {
        let request = SubscribeRequest::from_token(token).map_err(|e| {
            debug!("Rejecting subscribe with malformed token {token:?}");
            e
        })?;
        self.bridge.subscribe(request).await
    }

    pub async fn publish(
        &self,
        stream_id: &StreamId,
        event_type: &str,
        payload: Payload,
    ) -> Result<Event, Error> {
        self.publisher.publish(stream_id, event_type, payload).await
    }

    pub async fn ingest(&self, stream_id: &StreamId, body: &[u8]) -> Result<Vec<Event>, Error> {
        self.publisher.ingest(stream_id, body).await
    }

    /// Administrative cleanup. Open connections drain what they were sent and
    /// then close as `StreamDeleted`.
    pub async fn delete_stream(&self, stream_id: &StreamId) -> Result<(), Error> {
        self.log.delete(stream_id).await?;
        info!(
            "Deleted stream {stream_id} ({} open connections)",
            self.registry.count_for_stream(stream_id)
        );
        Ok(())
    }

    pub async fn stream_status(&self, stream_id: &StreamId) -> Result<StreamStatus, Error> {
        let head_index = self.log.head(stream_id).await?;
        Ok(StreamStatus {
            stream_id: stream_id.to_string(),
            head_index,
            connections: self.registry.count_for_stream(stream_id),
        })
    }

    pub fn connections(&self) -> Vec<ConnectionSummary> {
        self.registry.summaries()
    }

    /// Closes every open connection. Returns how many were closed.
    pub fn shutdown(&self) -> usize {
        let closed = self.registry.close_all(CloseCause::Shutdown);
        info!("Closed {closed} SSE connections for shutdown");
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, LogErrorKind};
    use events::{InMemoryLog, LogOptions};

    fn manager() -> (Manager, InMemoryLog) {
        let log = InMemoryLog::new();
        let config = BridgeConfig {
            keep_alive: None,
            ..BridgeConfig::default()
        };
        let manager = Manager::new(
            Arc::new(log.clone()),
            config,
            RetryPolicy::default(),
            IngestLimits::default(),
        );
        (manager, log)
    }

    #[tokio::test]
    async fn test_malformed_token_never_reaches_the_log() {
        let (manager, log) = manager();
        let err = manager.subscribe(Some("not-a-token")).await.err().unwrap();
        assert_eq!(err.error_kind, ErrorKind::Token);
        assert_eq!(log.active_subscriptions(), 0);
        assert!(manager.connections().is_empty());
    }

    #[tokio::test]
    async fn test_status_publish_and_delete() {
        let (manager, log) = manager();
        let stream_id = StreamId::new("orders").unwrap();
        log.create(&stream_id, LogOptions::default()).await.unwrap();

        manager
            .publish(&stream_id, "created", Payload::from("x"))
            .await
            .unwrap();
        let status = manager.stream_status(&stream_id).await.unwrap();
        assert_eq!(status.head_index, 1);
        assert_eq!(status.connections, 0);

        manager.delete_stream(&stream_id).await.unwrap();
        let err = manager.stream_status(&stream_id).await.unwrap_err();
        assert_eq!(err.error_kind, ErrorKind::Log(LogErrorKind::NotFound));
    }

    #[tokio::test]
    async fn test_connections_are_listed_until_shutdown() {
        let (manager, _) = manager();
        let outcome = manager.subscribe(None).await.unwrap();
        let SubscribeOutcome::Streaming(response) = outcome else {
            panic!("fresh subscribe must stream");
        };

        let connections = manager.connections();
        assert_eq!(connections.len(), 1);
        assert_eq!(connections[0].stream_id, response.stream_id().to_string());
        let status = manager.stream_status(response.stream_id()).await.unwrap();
        assert_eq!(status.connections, 1);

        assert_eq!(manager.shutdown(), 1);
        assert!(manager.connections().is_empty());
    }
}
