use crate::controller::ApiResponse;
use crate::params::stream::{PublishParams, StreamPathParams};
use crate::response::stream::{PublishedEvent, StreamStatusResponse};
use crate::{AppState, Error};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use events::StreamId;
use log::*;
use serde_json::json;

/// POST append one event to a stream.
#[utoipa::path(
    post,
    path = "/streams/{stream_id}/events",
    params(StreamPathParams),
    request_body = PublishParams,
    responses(
        (status = 201, description = "Event appended; its id is a valid resumption token", body = PublishedEvent),
        (status = 400, description = "Malformed stream id"),
        (status = 404, description = "Stream not found"),
        (status = 422, description = "Invalid event type"),
        (status = 503, description = "Event log could not confirm the append"),
        (status = 507, description = "Stream reached its capacity")
    )
)]
pub async fn publish(
    State(app_state): State<AppState>,
    Path(stream_id): Path<String>,
    Json(params): Json<PublishParams>,
) -> Result<impl IntoResponse, Error> {
    debug!("POST event {:?} to stream {stream_id}", params.event_type());
    let stream_id: StreamId = stream_id.parse()?;

    let event_type = params.event_type().to_string();
    let event = app_state
        .sse_manager
        .publish(&stream_id, &event_type, params.into_payload())
        .await?;

    debug!("Appended event {}", event.id());

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::new(
            StatusCode::CREATED.into(),
            PublishedEvent::from(&event),
        )),
    ))
}

/// POST append every frame of a `text/event-stream` body to a stream.
///
/// Each frame's `event` (default `message`) and `data` become one event. Ids in
/// the body are ignored.
#[utoipa::path(
    post,
    path = "/streams/{stream_id}/frames",
    params(StreamPathParams),
    request_body(content = String, content_type = "text/event-stream"),
    responses(
        (status = 201, description = "All frames appended, in order", body = [PublishedEvent]),
        (status = 400, description = "Malformed stream id"),
        (status = 404, description = "Stream not found"),
        (status = 413, description = "A frame exceeded the size bound and the stop policy is configured"),
        (status = 503, description = "Event log could not confirm an append")
    )
)]
pub async fn ingest(
    State(app_state): State<AppState>,
    Path(stream_id): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, Error> {
    debug!("POST {} bytes of frames to stream {stream_id}", body.len());
    let stream_id: StreamId = stream_id.parse()?;

    let events = app_state.sse_manager.ingest(&stream_id, &body).await?;
    let published: Vec<PublishedEvent> = events.iter().map(PublishedEvent::from).collect();

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::new(StatusCode::CREATED.into(), published)),
    ))
}

/// GET the head index of a stream and how many clients follow it.
#[utoipa::path(
    get,
    path = "/streams/{stream_id}",
    params(StreamPathParams),
    responses(
        (status = 200, description = "Successfully retrieved the stream status", body = StreamStatusResponse),
        (status = 400, description = "Malformed stream id"),
        (status = 404, description = "Stream not found")
    )
)]
pub async fn read(
    State(app_state): State<AppState>,
    Path(stream_id): Path<String>,
) -> Result<impl IntoResponse, Error> {
    debug!("GET stream status for {stream_id}");
    let stream_id: StreamId = stream_id.parse()?;

    let status = app_state.sse_manager.stream_status(&stream_id).await?;

    Ok(Json(ApiResponse::new(
        StatusCode::OK.into(),
        StreamStatusResponse::from(status),
    )))
}

/// DELETE a stream's log. Open connections close after the events already
/// handed to them.
#[utoipa::path(
    delete,
    path = "/streams/{stream_id}",
    params(StreamPathParams),
    responses(
        (status = 200, description = "Successfully deleted the stream"),
        (status = 400, description = "Malformed stream id"),
        (status = 404, description = "Stream not found")
    )
)]
pub async fn delete(
    State(app_state): State<AppState>,
    Path(stream_id): Path<String>,
) -> Result<impl IntoResponse, Error> {
    debug!("DELETE stream {stream_id}");
    let stream_id: StreamId = stream_id.parse()?;

    app_state.sse_manager.delete_stream(&stream_id).await?;

    Ok(Json(json!({"stream_id": stream_id.to_string()})))
}
