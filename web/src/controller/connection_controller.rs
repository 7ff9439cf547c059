use crate::controller::ApiResponse;
use crate::response::connection::ConnectionResponse;
use crate::{AppState, Error};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use log::*;

/// GET all open SSE connections.
#[utoipa::path(
    get,
    path = "/connections",
    responses(
        (status = 200, description = "Successfully retrieved all open connections", body = [ConnectionResponse])
    )
)]
pub async fn index(State(app_state): State<AppState>) -> Result<impl IntoResponse, Error> {
    let connections: Vec<ConnectionResponse> = app_state
        .sse_manager
        .connections()
        .into_iter()
        .map(ConnectionResponse::from)
        .collect();

    debug!("Found {} open connections", connections.len());

    Ok(Json(ApiResponse::new(StatusCode::OK.into(), connections)))
}
