use crate::controller::{connection_controller, health_check_controller, stream_controller};
use crate::{params, response, sse_handler, AppState};
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::timeout::TimeoutLayer;

use utoipa::OpenApi;
use utoipa_rapidoc::RapiDoc;

// This is the global definition of our OpenAPI document. To be a part
// of the rendered document, a path and schema must be listed here.
#[derive(OpenApi)]
#[openapi(
        info(
            title = "SSE Gateway API"
        ),
        paths(
            sse_handler::subscribe,
            stream_controller::publish,
            stream_controller::ingest,
            stream_controller::read,
            stream_controller::delete,
            connection_controller::index,
            health_check_controller::health_check,
        ),
        components(
            schemas(
                params::stream::PublishParams,
                response::stream::PublishedEvent,
                response::stream::StreamStatusResponse,
                response::connection::ConnectionResponse,
            )
        ),
        tags(
            (name = "sse_gateway", description = "Resumable Server-Sent Events gateway")
        )
    )]
pub struct ApiDoc;

pub fn define_routes(app_state: AppState) -> Router {
    let request_timeout = app_state.config.request_timeout();

    Router::new()
        .merge(sse_routes(app_state.clone()))
        .merge(
            // Timeouts end the response, so they never wrap the event stream.
            Router::new()
                .merge(stream_routes(app_state.clone()))
                .merge(connection_routes(app_state))
                .merge(health_routes())
                .layer(TimeoutLayer::new(request_timeout)),
        )
        .merge(RapiDoc::with_openapi("/api-docs/openapi.json", ApiDoc::openapi()).path("/rapidoc"))
}

fn sse_routes(app_state: AppState) -> Router {
    Router::new()
        .route("/events", get(sse_handler::subscribe))
        .with_state(app_state)
}

fn stream_routes(app_state: AppState) -> Router {
    Router::new()
        .route("/streams/:stream_id/events", post(stream_controller::publish))
        .route("/streams/:stream_id/frames", post(stream_controller::ingest))
        .route(
            "/streams/:stream_id",
            get(stream_controller::read).delete(stream_controller::delete),
        )
        .with_state(app_state)
}

fn connection_routes(app_state: AppState) -> Router {
    Router::new()
        .route("/connections", get(connection_controller::index))
        .with_state(app_state)
}

fn health_routes() -> Router {
    Router::new().route("/health", get(health_check_controller::health_check))
}
