use anyhow::{Context, Result};
use futures_util::stream::StreamExt;
use log::*;
use reqwest::{Client, StatusCode};
use sse::codec::{OversizePolicy, Parser};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Frames larger than this are skipped by the client.
const MAX_FRAME_CHARS: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Event {
    pub id: Option<String>,
    pub event_type: String,
    pub data: String,
    pub timestamp: Instant,
}

/// What the gateway answered to a subscribe.
pub enum Opened {
    Streaming(Connection),
    /// 204: the resumed stream is gone and the client should stop.
    Concluded,
    Rejected { status: StatusCode, body: String },
}

pub struct Connection {
    pub label: String,
    pub stream_id: String,
    event_rx: mpsc::UnboundedReceiver<Event>,
    last_event_id: Option<String>,
    handle: tokio::task::JoinHandle<()>,
}

impl Connection {
    /// Opens `GET /events`, resuming after `token` when one is given.
    pub async fn open(
        client: &Client,
        base_url: &str,
        token: Option<&str>,
        label: impl Into<String>,
    ) -> Result<Opened> {
        let label = label.into();
        let url = format!("{base_url}/events");
        let mut request = client.get(&url).header("Accept", "text/event-stream");
        if let Some(token) = token {
            request = request.header("Last-Event-ID", token);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to connect to {url}"))?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::NO_CONTENT => return Ok(Opened::Concluded),
            status => {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unable to read response body".to_string());
                return Ok(Opened::Rejected { status, body });
            }
        }

        let stream_id = response
            .headers()
            .get("x-stream-id")
            .and_then(|value| value.to_str().ok())
            .context("Streaming response without an X-Stream-Id header")?
            .to_string();

        let (tx, rx) = mpsc::unbounded_channel();
        let reader_label = label.clone();
        let handle = tokio::spawn(async move {
            let mut body = response.bytes_stream();
            let mut parser = Parser::new(MAX_FRAME_CHARS, OversizePolicy::Continue);

            while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        warn!("SSE read error for {reader_label}: {e}");
                        break;
                    }
                };
                let mut frames = Vec::new();
                if let Err(e) = parser.feed(&chunk, |fields| frames.push(fields)) {
                    warn!("SSE parse error for {reader_label}: {e}");
                    break;
                }
                for fields in frames {
                    if fields.comment.is_some() && fields.is_comment_only() {
                        trace!("Comment for {reader_label}: {:?}", fields.comment);
                        continue;
                    }
                    let event = Event {
                        id: fields.id,
                        event_type: fields.event.unwrap_or_else(|| "message".to_string()),
                        data: fields.data,
                        timestamp: Instant::now(),
                    };
                    if tx.send(event).is_err() {
                        debug!("SSE receiver dropped for {reader_label}");
                        return;
                    }
                }
            }
            debug!("SSE stream ended for {reader_label}");
        });

        Ok(Opened::Streaming(Self {
            label,
            stream_id,
            event_rx: rx,
            last_event_id: token.map(str::to_string),
            handle,
        }))
    }

    /// Id of the last event received, usable to resume.
    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    /// Next event, `Ok(None)` when the server closed the stream.
    pub async fn next_event(&mut self, timeout: Duration) -> Result<Option<Event>> {
        match tokio::time::timeout(timeout, self.event_rx.recv()).await {
            Ok(Some(event)) => {
                if let Some(id) = &event.id {
                    self.last_event_id = Some(id.clone());
                }
                Ok(Some(event))
            }
            Ok(None) => Ok(None),
            Err(_) => anyhow::bail!("Timeout waiting for an event on {}", self.label),
        }
    }

    pub async fn wait_for_event(&mut self, event_type: &str, timeout: Duration) -> Result<Event> {
        let deadline = Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                anyhow::bail!("Timeout waiting for event: {event_type}");
            }

            match self.next_event(remaining).await? {
                Some(event) if event.event_type == event_type => return Ok(event),
                // Wrong event type, keep waiting
                Some(_) => continue,
                None => anyhow::bail!("SSE connection closed"),
            }
        }
    }

    /// Receives exactly `count` events.
    pub async fn collect(&mut self, count: usize, timeout: Duration) -> Result<Vec<Event>> {
        let mut events = Vec::with_capacity(count);
        while events.len() < count {
            match self.next_event(timeout).await? {
                Some(event) => events.push(event),
                None => anyhow::bail!(
                    "SSE connection closed after {} of {count} events",
                    events.len()
                ),
            }
        }
        Ok(events)
    }

    /// Waits for the server to end the stream.
    pub async fn wait_for_close(&mut self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                anyhow::bail!("Stream still open after {timeout:?}");
            }
            if self.next_event(remaining).await?.is_none() {
                return Ok(());
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // Dropping the body is how the gateway learns the client left.
        self.handle.abort();
    }
}
