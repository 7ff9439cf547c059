use anyhow::Result;
use clap::Parser;
use colored::*;
use std::time::Duration;

use testing_tools::output::print_test_summary;
use testing_tools::scenarios::{self, TestEnvironment};

#[derive(Parser)]
#[command(name = "sse-test-client")]
#[command(about = "End-to-end tests against a running SSE gateway")]
struct Cli {
    /// Base URL of the gateway (e.g., http://localhost:4000)
    #[arg(long, default_value = "http://localhost:4000")]
    base_url: String,

    /// Test scenario to run
    #[arg(long, value_enum)]
    scenario: ScenarioChoice,

    /// Seconds to wait for each expected event
    #[arg(long, default_value_t = 5)]
    timeout_secs: u64,

    /// Event type the gateway is configured to treat as terminal
    #[arg(long, default_value = "completed")]
    terminal_event_type: String,

    /// Enable verbose output
    #[arg(long, short)]
    verbose: bool,
}

#[derive(clap::ValueEnum, Clone)]
enum ScenarioChoice {
    /// Open a fresh subscription and check it is listed
    ConnectionTest,
    /// Resume mid-stream, receive the rest, then live events
    ReplayThenLive,
    /// Disconnect, miss events, resume and receive exactly those
    ResumeAfterDisconnect,
    /// A terminal event is delivered and the server closes the stream
    TerminalCompletion,
    /// A malformed Last-Event-ID is rejected with 400
    MalformedToken,
    /// Run all scenarios
    All,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    }

    println!("{}", "=== SETUP PHASE ===".bright_white().bold());
    println!("{} Gateway at {}", "→".blue(), cli.base_url);

    let env = TestEnvironment::new(
        cli.base_url.trim_end_matches('/').to_string(),
        Duration::from_secs(cli.timeout_secs),
        cli.terminal_event_type,
    );

    println!("\n{}", "=== TEST PHASE ===".bright_white().bold());

    let mut results = Vec::new();

    match cli.scenario {
        ScenarioChoice::ConnectionTest => results.push(scenarios::test_connection(&env).await?),
        ScenarioChoice::ReplayThenLive => {
            results.push(scenarios::test_replay_then_live(&env).await?)
        }
        ScenarioChoice::ResumeAfterDisconnect => {
            results.push(scenarios::test_resume_after_disconnect(&env).await?)
        }
        ScenarioChoice::TerminalCompletion => {
            results.push(scenarios::test_terminal_completion(&env).await?)
        }
        ScenarioChoice::MalformedToken => {
            results.push(scenarios::test_malformed_token(&env).await?)
        }
        ScenarioChoice::All => {
            results.push(scenarios::test_connection(&env).await?);
            results.push(scenarios::test_replay_then_live(&env).await?);
            results.push(scenarios::test_resume_after_disconnect(&env).await?);
            results.push(scenarios::test_terminal_completion(&env).await?);
            results.push(scenarios::test_malformed_token(&env).await?);
        }
    }

    print_test_summary(&results);

    if results.iter().any(|r| !r.passed) {
        std::process::exit(1);
    }

    Ok(())
}
