//! Durable event log infrastructure for the SSE gateway.
//!
//! This crate owns everything the gateway knows about the log that sits
//! behind it, and nothing about HTTP or the SSE wire format.
//!
//! # Architecture
//!
//! - **StreamId / EventId**: validated identity value types with a canonical
//!   string form (`category.uuid` and `category.uuid_index`) that is used both
//!   as the SSE `id` field and as the resumption token.
//! - **EventLog**: the create/append/subscribe_from/unsubscribe/delete
//!   contract the gateway depends on. Any ordered, replay-capable store can
//!   implement it.
//! - **InMemoryLog**: in-process reference implementation with one delivery
//!   task per subscription.
//!
//! This crate has no dependencies on the other workspace crates.

pub mod client;
pub mod error;
pub mod id;
pub mod memory;

pub use client::{
    Event, EventLog, LogNotification, LogOptions, NotificationHandler, Payload, Subscription,
    SubscriptionId, DEFAULT_EVENT_TYPE,
};
pub use error::{Error, ErrorKind, IdErrorKind, LogErrorKind};
pub use id::{EventId, StreamId};
pub use memory::InMemoryLog;
