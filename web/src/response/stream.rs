use events::Event;
use serde::Serialize;
use sse::StreamStatus;
use utoipa::ToSchema;

/// An event as confirmed by the log.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub(crate) struct PublishedEvent {
    /// Canonical event id, usable as a resumption token
    pub id: String,
    pub index: u64,
    pub event_type: String,
}

impl From<&Event> for PublishedEvent {
    fn from(event: &Event) -> Self {
        Self {
            id: event.id().to_string(),
            index: event.index(),
            event_type: event.event_type().to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub(crate) struct StreamStatusResponse {
    pub stream_id: String,
    /// Index of the newest entry; 0 for an empty log
    pub head_index: u64,
    /// Open SSE connections following this stream
    pub connections: usize,
}

impl From<StreamStatus> for StreamStatusResponse {
    fn from(status: StreamStatus) -> Self {
        Self {
            stream_id: status.stream_id,
            head_index: status.head_index,
            connections: status.connections,
        }
    }
}
