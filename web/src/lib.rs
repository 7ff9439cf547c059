//! HTTP surface of the gateway: the SSE subscribe endpoint, stream and
//! connection controllers, and the OpenAPI document.

use axum::http::{HeaderValue, Method};
use events::id::validate_category;
use events::{EventLog, LogOptions};
use log::*;
use service::config::Config;
use sse::{BridgeConfig, IngestLimits, OversizePolicy, RetentionPolicy, RetryPolicy};
use std::io;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

mod controller;
mod error;
mod extractors;
mod params;
mod response;
pub mod router;
pub(crate) mod sse_handler;

pub use error::{Error, Result};

// Needs to implement Clone to be able to be passed into Router as State
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub sse_manager: Arc<sse::Manager>,
}

impl AppState {
    /// Wires an event log into a fresh SSE manager configured from `config`.
    /// Fails when the configuration cannot produce valid streams.
    pub fn new(config: Config, log: Arc<dyn EventLog>) -> Result<Self> {
        let sse_manager = Arc::new(sse::Manager::new(
            log,
            bridge_config(&config)?,
            RetryPolicy::new(config.publish_max_retries),
            ingest_limits(&config),
        ));
        Ok(Self {
            config,
            sse_manager,
        })
    }
}

pub async fn init_server(app_state: AppState) -> io::Result<()> {
    let server_url = format!("{}:{}", app_state.config.interface(), app_state.config.port);
    let listener = tokio::net::TcpListener::bind(&server_url).await?;

    info!("Server starting... listening for connections on http://{server_url}");

    let cors_layer = CorsLayer::new()
        .allow_methods([Method::DELETE, Method::GET, Method::POST])
        .allow_headers(Any)
        .allow_origin(allowed_origins(&app_state.config));

    let sse_manager = Arc::clone(&app_state.sse_manager);
    let app = router::define_routes(app_state).layer(cors_layer);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            service::shutdown_signal().await;
            // Open streams never finish on their own, so end them before the
            // server waits for in-flight responses.
            sse_manager.shutdown();
        })
        .await?;

    info!("Server stopped");
    Ok(())
}

fn allowed_origins(config: &Config) -> Vec<HeaderValue> {
    config
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Ignoring invalid CORS origin {origin:?}: {e}");
                None
            }
        })
        .collect()
}

pub fn bridge_config(config: &Config) -> Result<BridgeConfig> {
    validate_category(&config.stream_category).map_err(|e| {
        sse::Error::internal(format!(
            "invalid stream category {:?}: {e}",
            config.stream_category
        ))
    })?;

    let retention = if config.delete_on_terminal {
        RetentionPolicy::DeleteOnTerminal {
            grace: config.cleanup_grace(),
        }
    } else {
        RetentionPolicy::Keep
    };

    Ok(BridgeConfig {
        category: config.stream_category.clone(),
        terminal_event_types: config
            .terminal_event_types
            .iter()
            .map(|event_type| event_type.trim().to_string())
            .filter(|event_type| !event_type.is_empty())
            .collect(),
        retention,
        log_options: LogOptions {
            max_entries: config.max_log_entries(),
        },
        timeout: config.sse_timeout(),
        keep_alive: config.keep_alive(),
        retry_hint: config.retry_hint(),
        handoff_capacity: config.handoff_capacity,
        lag_timeout: config.lag_timeout(),
        write_buffer_frames: config.write_buffer_frames,
    })
}

pub fn ingest_limits(config: &Config) -> IngestLimits {
    let oversize_policy = config
        .oversize_policy
        .parse::<OversizePolicy>()
        .unwrap_or_else(|_| {
            warn!(
                "Unknown oversize policy {:?}, using {}",
                config.oversize_policy,
                OversizePolicy::default()
            );
            OversizePolicy::default()
        });

    IngestLimits {
        max_frame_chars: config.max_frame_chars,
        oversize_policy,
    }
}
