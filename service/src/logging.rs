//! Terminal logging for the gateway binary.

use crate::config::Config;
use log::{LevelFilter, SetLoggerError};
use simplelog::{ColorChoice, ConfigBuilder, TermLogger, TerminalMode};

/// HTTP and runtime crates that are muted below `Trace`.
const NOISY_DEPENDENCIES: &[&str] = &[
    "hyper",
    "h2",
    "tower",
    "tower_http",
    "axum",
    "tokio_util",
    "reqwest",
];

pub struct Logger;

impl Logger {
    /// Installs the process-wide terminal logger at `config.log_level_filter`.
    /// Errors if a logger is already installed.
    pub fn init_logger(config: &Config) -> Result<(), SetLoggerError> {
        let level = config.log_level_filter;
        TermLogger::init(
            level,
            Self::log_config(level),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        )
    }

    /// Dependencies whose records are dropped at `level`. Nothing is dropped
    /// at `Trace`.
    fn muted_modules(level: LevelFilter) -> &'static [&'static str] {
        if level == LevelFilter::Trace {
            &[]
        } else {
            NOISY_DEPENDENCIES
        }
    }

    fn log_config(level: LevelFilter) -> simplelog::Config {
        let mut builder = ConfigBuilder::new();
        builder.set_time_format_rfc3339();
        for module in Self::muted_modules(level) {
            builder.add_filter_ignore_str(module);
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_mutes_nothing() {
        assert!(Logger::muted_modules(LevelFilter::Trace).is_empty());
    }

    #[test]
    fn test_lower_levels_mute_transport_crates() {
        for level in [
            LevelFilter::Off,
            LevelFilter::Error,
            LevelFilter::Warn,
            LevelFilter::Info,
            LevelFilter::Debug,
        ] {
            let muted = Logger::muted_modules(level);
            assert!(muted.contains(&"hyper"), "{level}");
            assert!(muted.contains(&"tower_http"), "{level}");
        }
    }

    #[test]
    fn test_gateway_crates_are_never_muted() {
        for module in ["sse", "events", "web", "service", "sse_gateway"] {
            assert!(
                !NOISY_DEPENDENCIES.contains(&module),
                "{module} must stay visible"
            );
        }
    }

    #[test]
    fn test_log_config_builds_at_every_level() {
        for level in [LevelFilter::Info, LevelFilter::Trace] {
            let _config = Logger::log_config(level);
        }
    }
}
