//! Resumable Server-Sent Events (SSE) gateway core.
//!
//! This crate turns an append-only, replayable event log (see the `events`
//! crate) into long-lived `text/event-stream` responses that a client can
//! resume after a disconnect by sending back the last event id it saw.
//!
//! # Architecture
//!
//! - **Codec**: WHATWG event-stream parser and serializer with a per-frame
//!   size bound. No I/O.
//! - **Bridge**: per-connection orchestration. Fresh subscribes create a new
//!   log; resumes replay everything after the client's last id and continue
//!   with the live tail through the same subscription.
//! - **Lifecycle**: `STARTING -> REPLAYING -> LIVE -> CLOSED` with a single,
//!   idempotent terminal transition that releases every resource.
//! - **Transport**: the streamed HTTP response. Dropping it (client gone)
//!   closes the connection.
//! - **Registry**: dual-index registry (by connection and by stream) used for
//!   status, listings and shutdown.
//!
//! # Message Flow
//!
//! 1. Client opens `GET /events`, optionally with `Last-Event-ID`
//! 2. Token decoded (malformed tokens are rejected before any log access)
//! 3. Bridge subscribes to the log from the token's index
//! 4. Log callback hands each entry to the connection's forwarding task
//!    through a bounded queue
//! 5. Forwarding task encodes one frame per entry (`id` = event id) and writes
//!    it to the response
//! 6. Terminal event, timeout, disconnect, deletion or shutdown closes the
//!    connection and unsubscribes
//!
//! # Modules
//!
//! - `codec`: event-stream wire format
//! - `bridge`: subscribe orchestration and the forwarding task
//! - `lifecycle`: connection state machine and close causes
//! - `transport`: streaming response and disconnect detection
//! - `connection`: ConnectionRegistry with dual-index architecture and type-safe ConnectionId
//! - `manager`: app-wide entry point used by the web layer
//! - `message`: mapping from log entries to frames
//! - `publisher`: confirmed appends with retry, and bulk ingest of SSE bodies

pub mod bridge;
pub mod codec;
pub mod connection;
pub mod error;
pub mod lifecycle;
pub mod manager;
pub mod message;
pub mod publisher;
pub mod transport;

pub use bridge::{BridgeConfig, RetentionPolicy, SubscribeOutcome, SubscribeRequest};
pub use codec::OversizePolicy;
pub use connection::ConnectionId;
pub use error::{Error, ErrorKind};
pub use lifecycle::{CloseCause, ConnectionState, ConnectionSummary};
pub use manager::{Manager, StreamStatus};
pub use publisher::{IngestLimits, RetryPolicy};
pub use transport::StreamingResponse;
