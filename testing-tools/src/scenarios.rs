use anyhow::Result;
use colored::*;
use reqwest::{Client, StatusCode};
use serde_json::json;
use std::time::{Duration, Instant};

use crate::api_client::ApiClient;
use crate::output::{print_event, TestResult};
use crate::sse_client::{Connection, Event, Opened};

/// Everything a scenario needs to talk to the gateway.
pub struct TestEnvironment {
    pub client: Client,
    pub base_url: String,
    pub api_client: ApiClient,
    pub timeout: Duration,
    pub terminal_event_type: String,
}

impl TestEnvironment {
    pub fn new(base_url: String, timeout: Duration, terminal_event_type: String) -> Self {
        let client = Client::new();
        Self {
            api_client: ApiClient::new(client.clone(), base_url.clone()),
            client,
            base_url,
            timeout,
            terminal_event_type,
        }
    }

    async fn open(&self, token: Option<&str>, label: &str) -> Result<Opened> {
        Connection::open(&self.client, &self.base_url, token, label).await
    }

    /// Opens a connection that must stream.
    async fn stream(&self, token: Option<&str>, label: &str) -> Result<Connection> {
        match self.open(token, label).await? {
            Opened::Streaming(connection) => Ok(connection),
            Opened::Concluded => anyhow::bail!("Expected a stream, got 204 No Content"),
            Opened::Rejected { status, body } => {
                anyhow::bail!("Expected a stream, got {status}: {body}")
            }
        }
    }

    async fn publish_numbered(&self, stream_id: &str, from: u64, to: u64) -> Result<()> {
        for n in from..=to {
            self.api_client
                .publish(stream_id, "numbered", json!({"n": n}))
                .await?;
        }
        Ok(())
    }
}

fn data_numbers(events: &[Event]) -> Vec<String> {
    events.iter().map(|event| event.data.clone()).collect()
}

fn expected_numbers(from: u64, to: u64) -> Vec<String> {
    (from..=to).map(|n| json!({"n": n}).to_string()).collect()
}

/// Checks the results of a scenario step and turns them into a `TestResult`.
fn verdict(scenario: &str, start: Instant, outcome: Result<()>) -> TestResult {
    match outcome {
        Ok(()) => {
            println!("{} {} passed", "✓".green(), scenario);
            TestResult::pass(scenario, start.elapsed())
        }
        Err(e) => {
            println!("{} {} failed: {}", "✗".red(), scenario, e);
            TestResult::fail(scenario, e.to_string(), start.elapsed())
        }
    }
}

pub async fn test_connection(env: &TestEnvironment) -> Result<TestResult> {
    let start = Instant::now();

    println!("\n{}", "=== TEST: Connection ===".bright_cyan().bold());

    let outcome = async {
        println!("{} Opening a fresh subscription...", "→".blue());
        let connection = env.stream(None, "fresh").await?;
        println!(
            "{} Stream {} created",
            "✓".green(),
            connection.stream_id.as_str().yellow()
        );

        let status = env.api_client.stream_status(&connection.stream_id).await?;
        if status["head_index"] != 0 {
            anyhow::bail!("New stream is not empty: {status}");
        }
        if status["connections"] != 1 {
            anyhow::bail!("Expected one connection on the new stream: {status}");
        }

        let connections = env.api_client.connections().await?;
        let listed = connections
            .as_array()
            .map(|all| {
                all.iter()
                    .any(|c| c["stream_id"] == connection.stream_id.as_str())
            })
            .unwrap_or(false);
        if !listed {
            anyhow::bail!("Connection missing from /connections");
        }
        Ok(())
    }
    .await;

    Ok(verdict("connection_test", start, outcome))
}

pub async fn test_replay_then_live(env: &TestEnvironment) -> Result<TestResult> {
    let start = Instant::now();

    println!("\n{}", "=== TEST: Replay Then Live ===".bright_cyan().bold());

    let outcome = async {
        let mut first = env.stream(None, "fresh").await?;
        let stream_id = first.stream_id.clone();

        println!("{} Publishing events 1..=3...", "→".blue());
        env.publish_numbered(&stream_id, 1, 3).await?;
        let received = first.collect(3, env.timeout).await?;
        let token = received[0]
            .id
            .clone()
            .ok_or_else(|| anyhow::anyhow!("Event without an id"))?;

        println!("{} Resuming after {}...", "→".blue(), token.as_str().yellow());
        let mut resumed = env.stream(Some(&token), "resumed").await?;
        let replayed = resumed.collect(2, env.timeout).await?;
        for event in &replayed {
            print_event(&resumed.label, event);
        }
        if data_numbers(&replayed) != expected_numbers(2, 3) {
            anyhow::bail!("Replay mismatch: {:?}", data_numbers(&replayed));
        }

        println!("{} Publishing live event 4...", "→".blue());
        env.publish_numbered(&stream_id, 4, 4).await?;
        let live = resumed.collect(1, env.timeout).await?;
        print_event(&resumed.label, &live[0]);
        if data_numbers(&live) != expected_numbers(4, 4) {
            anyhow::bail!("Live tail mismatch: {:?}", data_numbers(&live));
        }
        Ok(())
    }
    .await;

    Ok(verdict("replay_then_live", start, outcome))
}

pub async fn test_resume_after_disconnect(env: &TestEnvironment) -> Result<TestResult> {
    let start = Instant::now();

    println!(
        "\n{}",
        "=== TEST: Resume After Disconnect ===".bright_cyan().bold()
    );

    let outcome = async {
        let mut first = env.stream(None, "fresh").await?;
        let stream_id = first.stream_id.clone();

        env.publish_numbered(&stream_id, 1, 2).await?;
        first.collect(2, env.timeout).await?;
        let token = first
            .last_event_id()
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("No event id received"))?;

        println!("{} Disconnecting...", "→".blue());
        drop(first);

        println!("{} Publishing events 3..=5 while offline...", "→".blue());
        env.publish_numbered(&stream_id, 3, 5).await?;

        let mut resumed = env.stream(Some(&token), "resumed").await?;
        let missed = resumed.collect(3, env.timeout).await?;
        for event in &missed {
            print_event(&resumed.label, event);
        }
        if data_numbers(&missed) != expected_numbers(3, 5) {
            anyhow::bail!(
                "Expected exactly the missed events 3..=5, got {:?}",
                data_numbers(&missed)
            );
        }
        Ok(())
    }
    .await;

    Ok(verdict("resume_after_disconnect", start, outcome))
}

pub async fn test_terminal_completion(env: &TestEnvironment) -> Result<TestResult> {
    let start = Instant::now();

    println!("\n{}", "=== TEST: Terminal Completion ===".bright_cyan().bold());

    let outcome = async {
        let mut connection = env.stream(None, "fresh").await?;
        let stream_id = connection.stream_id.clone();

        println!(
            "{} Publishing terminal event {}...",
            "→".blue(),
            env.terminal_event_type.as_str().yellow()
        );
        env.api_client
            .publish(&stream_id, &env.terminal_event_type, json!("done"))
            .await?;

        let event = connection
            .wait_for_event(&env.terminal_event_type, env.timeout)
            .await?;
        print_event(&connection.label, &event);

        connection.wait_for_close(env.timeout).await?;
        println!("{} Server closed the stream", "✓".green());
        Ok(())
    }
    .await;

    Ok(verdict("terminal_completion", start, outcome))
}

pub async fn test_malformed_token(env: &TestEnvironment) -> Result<TestResult> {
    let start = Instant::now();

    println!("\n{}", "=== TEST: Malformed Token ===".bright_cyan().bold());

    let outcome = async {
        match env.open(Some("not-a-valid-token"), "malformed").await? {
            Opened::Rejected { status, .. } if status == StatusCode::BAD_REQUEST => {
                println!("{} Rejected with {}", "✓".green(), status);
                Ok(())
            }
            Opened::Rejected { status, body } => {
                anyhow::bail!("Expected 400, got {status}: {body}")
            }
            Opened::Concluded => anyhow::bail!("Expected 400, got 204"),
            Opened::Streaming(_) => anyhow::bail!("Expected 400, got a stream"),
        }
    }
    .await;

    Ok(verdict("malformed_token", start, outcome))
}
