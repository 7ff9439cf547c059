//! Streaming transport: one open HTTP response per connection.
//!
//! The forwarding task owns the only [`FrameWriter`]; the response body owns
//! the matching [`FrameStream`]. Dropping the body (client gone) drops the
//! stream and closes the connection, and a failed write tells the forwarder
//! the same thing at the latest on its next frame.

use crate::codec::{encode, Fields};
use crate::connection::ConnectionId;
use crate::error::Error;
use crate::lifecycle::{CloseCause, Lifecycle};
use async_stream::stream;
use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use events::StreamId;
use futures::Stream;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

pub const CONTENT_TYPE_SSE: &str = "text/event-stream";
pub const HEADER_STREAM_ID: &str = "x-stream-id";
pub const HEADER_ACCEL_BUFFERING: &str = "x-accel-buffering";

/// Creates the writer/stream pair for one connection. `capacity` frames may be
/// buffered before writes wait for the client.
pub(crate) fn channel(capacity: usize, connection: Arc<Lifecycle>) -> (FrameWriter, FrameStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        FrameWriter { tx },
        FrameStream {
            rx,
            guard: DisconnectGuard(connection),
        },
    )
}

#[derive(Debug)]
pub(crate) enum WriteError {
    Disconnected,
    Encode(Error),
}

impl WriteError {
    pub(crate) fn into_cause(self) -> CloseCause {
        match self {
            WriteError::Disconnected => CloseCause::Disconnected,
            WriteError::Encode(e) => CloseCause::Failed(e.to_string()),
        }
    }
}

/// Write half. Frames are written in call order.
pub(crate) struct FrameWriter {
    tx: mpsc::Sender<Bytes>,
}

impl FrameWriter {
    pub(crate) async fn write(&self, frame: &Fields) -> Result<(), WriteError> {
        let bytes = encode(frame).map_err(WriteError::Encode)?;
        self.tx
            .send(bytes)
            .await
            .map_err(|_| WriteError::Disconnected)
    }
}

struct DisconnectGuard(Arc<Lifecycle>);

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        // No-op when the connection already closed for another reason.
        self.0.close(CloseCause::Disconnected);
    }
}

/// Read half: encoded frames, one per item, ending when the connection closes.
pub struct FrameStream {
    rx: mpsc::Receiver<Bytes>,
    guard: DisconnectGuard,
}

impl FrameStream {
    pub async fn next_frame(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    pub fn connection(&self) -> Arc<Lifecycle> {
        Arc::clone(&self.guard.0)
    }
}

impl Stream for FrameStream {
    type Item = Bytes;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Bytes>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

/// The streamed arm of a subscribe outcome.
pub struct StreamingResponse {
    stream_id: StreamId,
    frames: FrameStream,
}

impl StreamingResponse {
    pub(crate) fn new(stream_id: StreamId, frames: FrameStream) -> Self {
        Self { stream_id, frames }
    }

    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.frames.guard.0.connection_id().clone()
    }

    pub fn connection(&self) -> Arc<Lifecycle> {
        self.frames.connection()
    }

    pub fn into_frames(self) -> FrameStream {
        self.frames
    }

    pub fn into_body(self) -> Body {
        let mut frames = self.frames;
        Body::from_stream(stream! {
            while let Some(bytes) = frames.next_frame().await {
                yield Ok::<_, Infallible>(bytes);
            }
        })
    }
}

impl IntoResponse for StreamingResponse {
    fn into_response(self) -> Response {
        let stream_id = self.stream_id.to_string();
        let headers = [
            (header::CONTENT_TYPE.as_str(), CONTENT_TYPE_SSE),
            (header::CACHE_CONTROL.as_str(), "no-cache"),
            (HEADER_ACCEL_BUFFERING, "no"),
            (HEADER_STREAM_ID, stream_id.as_str()),
        ];
        (StatusCode::OK, headers, self.into_body()).into_response()
    }
}
