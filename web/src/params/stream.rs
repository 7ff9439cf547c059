use events::{Payload, DEFAULT_EVENT_TYPE};
use serde::Deserialize;
use serde_json::Value;
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Path)]
pub(crate) struct StreamPathParams {
    /// Canonical stream id, `<category>.<uuid>`
    pub(crate) stream_id: String,
}

/// Request body for appending one event.
#[derive(Debug, Deserialize, ToSchema)]
pub(crate) struct PublishParams {
    /// Defaults to `message`.
    pub(crate) event_type: Option<String>,
    /// A JSON string is sent as-is; any other JSON value is sent compact on a
    /// single `data:` line.
    #[schema(value_type = Object)]
    pub(crate) payload: Value,
}

impl PublishParams {
    pub(crate) fn event_type(&self) -> &str {
        self.event_type.as_deref().unwrap_or(DEFAULT_EVENT_TYPE)
    }

    pub(crate) fn into_payload(self) -> Payload {
        Payload::from(self.payload)
    }
}
