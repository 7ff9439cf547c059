//! SSE HTTP handler for the web layer.
//!
//! Only the axum glue lives here; subscribe orchestration, the lifecycle and
//! the response body are owned by the `sse` crate.

use crate::extractors::last_event_id::LastEventId;
use crate::{AppState, Error};
use axum::extract::State;
use axum::response::IntoResponse;
use log::*;

/// GET subscribe to a stream of events.
///
/// Without a token a new stream is created and its id is returned in the
/// `X-Stream-Id` header and the opening comment. With a token every event
/// after it is replayed before the live tail follows.
#[utoipa::path(
    get,
    path = "/events",
    params(
        ("Last-Event-ID" = Option<String>, Header, description = "Id of the last event the client received"),
        crate::params::subscribe::SubscribeParams,
    ),
    responses(
        (status = 200, description = "Event stream opened", content_type = "text/event-stream", body = String),
        (status = 204, description = "The resumed stream no longer exists; stop reconnecting"),
        (status = 400, description = "Malformed token, or token beyond the stream's head"),
        (status = 503, description = "Event log temporarily unavailable")
    )
)]
pub(crate) async fn subscribe(
    State(app_state): State<AppState>,
    LastEventId(token): LastEventId,
) -> Result<impl IntoResponse, Error> {
    debug!("GET /events with token {token:?}");

    let outcome = app_state.sse_manager.subscribe(token.as_deref()).await?;

    Ok(outcome)
}
