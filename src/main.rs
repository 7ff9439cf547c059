use events::InMemoryLog;
use log::*;
use service::{config::Config, logging::Logger};
use std::sync::Arc;
use web::AppState;

#[tokio::main]
async fn main() {
    let config = Config::new();

    if let Err(e) = Logger::init_logger(&config) {
        eprintln!("Failed to initialize logger: {e}");
        std::process::exit(1);
    }

    info!("Starting up SSE gateway...");
    debug!("Configuration: {config:?}");

    // The in-memory log is process-local: streams do not survive a restart.
    let log = Arc::new(InMemoryLog::new());
    let app_state = match AppState::new(config, log) {
        Ok(app_state) => app_state,
        Err(e) => {
            error!("Invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = web::init_server(app_state).await {
        error!("Server failed: {e}");
        std::process::exit(1);
    }
}
