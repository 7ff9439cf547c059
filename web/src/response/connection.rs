use serde::Serialize;
use sse::ConnectionSummary;
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub(crate) struct ConnectionResponse {
    pub connection_id: String,
    pub stream_id: String,
    /// One of `starting`, `replaying`, `live`, `closed`
    pub state: String,
    /// Id of the last event written to this connection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_event_id: Option<String>,
    pub connected_secs: u64,
}

impl From<ConnectionSummary> for ConnectionResponse {
    fn from(summary: ConnectionSummary) -> Self {
        Self {
            connection_id: summary.connection_id,
            stream_id: summary.stream_id,
            state: summary.state.to_string(),
            last_event_id: summary.last_event_id,
            connected_secs: summary.connected_secs,
        }
    }
}
