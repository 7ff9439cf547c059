use anyhow::{Context, Result};
use reqwest::{Client, Response};
use serde_json::{json, Value};

pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(client: Client, base_url: String) -> Self {
        Self { client, base_url }
    }

    /// Appends one event and returns the confirmed `{id, index, event_type}`.
    pub async fn publish(&self, stream_id: &str, event_type: &str, payload: Value) -> Result<Value> {
        let url = format!("{}/streams/{stream_id}/events", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&json!({"event_type": event_type, "payload": payload}))
            .send()
            .await
            .context("Failed to publish event")?;

        data(response, "publish event").await
    }

    /// Appends every frame of an SSE-formatted body.
    pub async fn ingest(&self, stream_id: &str, body: String) -> Result<Value> {
        let url = format!("{}/streams/{stream_id}/frames", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "text/event-stream")
            .body(body)
            .send()
            .await
            .context("Failed to ingest frames")?;

        data(response, "ingest frames").await
    }

    pub async fn stream_status(&self, stream_id: &str) -> Result<Value> {
        let url = format!("{}/streams/{stream_id}", self.base_url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to get stream status")?;

        data(response, "get stream status").await
    }

    pub async fn delete_stream(&self, stream_id: &str) -> Result<()> {
        let url = format!("{}/streams/{stream_id}", self.base_url);

        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .context("Failed to delete stream")?;

        check(response, "delete stream").await.map(|_| ())
    }

    pub async fn connections(&self) -> Result<Value> {
        let url = format!("{}/connections", self.base_url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to list connections")?;

        data(response, "list connections").await
    }
}

async fn check(response: Response, action: &str) -> Result<Response> {
    if !response.status().is_success() {
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read response body".to_string());
        anyhow::bail!("Failed to {action}: {status} - Response: {body}");
    }
    Ok(response)
}

async fn data(response: Response, action: &str) -> Result<Value> {
    let body: Value = check(response, action)
        .await?
        .json()
        .await
        .with_context(|| format!("Failed to parse {action} response"))?;
    Ok(body["data"].clone())
}
