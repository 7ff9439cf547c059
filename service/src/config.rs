use clap::builder::TypedValueParser as _;
use clap::Parser;
use dotenvy::dotenv;
use log::LevelFilter;
use std::time::Duration;

#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// A list of full CORS origin URLs that allowed to receive server responses.
    #[arg(
        long,
        env,
        value_delimiter = ',',
        use_value_delimiter = true,
        default_value = "http://localhost:3000,https://localhost:3000"
    )]
    pub allowed_origins: Vec<String>,

    /// The host interface to listen for incoming connections
    #[arg(short, long, env, default_value = "127.0.0.1")]
    pub interface: Option<String>,

    /// The host TCP port to listen for incoming connections
    #[arg(short, long, env, default_value_t = 4000)]
    pub port: u16,

    /// Set the log level verbosity threshold (level) to control what gets displayed on console output
    #[arg(
        short,
        long,
        env,
        default_value_t = LevelFilter::Info,
        value_parser = clap::builder::PossibleValuesParser::new(["OFF", "ERROR", "WARN", "INFO", "DEBUG", "TRACE"])
            .try_map(|s| s.parse::<LevelFilter>()),
        )]
    pub log_level_filter: LevelFilter,

    /// Category used for the stream id of every fresh subscription (lowercase alphanumeric).
    #[arg(long, env, default_value = "events")]
    pub stream_category: String,

    /// Event types that end a stream. Once one is forwarded the connection closes normally.
    #[arg(
        long,
        env,
        value_delimiter = ',',
        use_value_delimiter = true,
        default_value = "completed"
    )]
    pub terminal_event_types: Vec<String>,

    /// Maximum characters of a single frame in bodies posted to the ingest endpoint
    #[arg(long, env, default_value_t = 65536)]
    pub max_frame_chars: usize,

    /// What to do with a frame over `max_frame_chars`: skip it and continue, or stop
    #[arg(
        long,
        env,
        default_value = "continue",
        value_parser = clap::builder::PossibleValuesParser::new(["continue", "stop"])
    )]
    pub oversize_policy: String,

    /// Delete a stream's log once a terminal event has been delivered
    #[arg(long, env, default_value_t = true, action = clap::ArgAction::Set)]
    pub delete_on_terminal: bool,

    /// Seconds to wait after a terminal event before deleting the log
    #[arg(long, env, default_value_t = 30)]
    pub cleanup_grace_secs: u64,

    /// Maximum entries per stream log (0 = unbounded)
    #[arg(long, env, default_value_t = 0)]
    pub max_log_entries: u64,

    /// Seconds before an SSE connection is closed (0 = never)
    #[arg(long, env, default_value_t = 0)]
    pub sse_timeout_secs: u64,

    /// Seconds of idleness before a keep-alive comment is sent (0 = disabled)
    #[arg(long, env, default_value_t = 15)]
    pub keep_alive_secs: u64,

    /// Reconnection delay in milliseconds advertised to clients (0 = none)
    #[arg(long, env, default_value_t = 3000)]
    pub retry_hint_ms: u64,

    /// Log entries queued per connection ahead of its writer
    #[arg(long, env, default_value_t = 1024)]
    pub handoff_capacity: usize,

    /// Seconds a full hand-off queue is tolerated before the client is disconnected
    #[arg(long, env, default_value_t = 30)]
    pub lag_timeout_secs: u64,

    /// Encoded frames buffered per connection ahead of the socket
    #[arg(long, env, default_value_t = 16)]
    pub write_buffer_frames: usize,

    /// Timeout in seconds for non-streaming API requests
    #[arg(long, env, default_value_t = 30)]
    pub request_timeout_secs: u64,

    /// Retries for appends the log could not confirm
    #[arg(long, env, default_value_t = 3)]
    pub publish_max_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        // Load .env file first
        dotenv().ok();
        // Then parse the command line parameters and flags
        Config::parse()
    }

    pub fn interface(&self) -> &str {
        self.interface.as_deref().unwrap_or("127.0.0.1")
    }

    pub fn sse_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.sse_timeout_secs)
    }

    pub fn keep_alive(&self) -> Option<Duration> {
        non_zero_secs(self.keep_alive_secs)
    }

    pub fn retry_hint(&self) -> Option<Duration> {
        (self.retry_hint_ms > 0).then(|| Duration::from_millis(self.retry_hint_ms))
    }

    pub fn cleanup_grace(&self) -> Duration {
        Duration::from_secs(self.cleanup_grace_secs)
    }

    pub fn max_log_entries(&self) -> Option<u64> {
        (self.max_log_entries > 0).then_some(self.max_log_entries)
    }

    pub fn lag_timeout(&self) -> Duration {
        Duration::from_secs(self.lag_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}
