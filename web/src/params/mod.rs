//! This module holds typed parameters for various endpoint inputs.
//!
//! By using typed parameters, inputs are validated (by type) and correctly
//! formatted before they reach the SSE core. Stream ids and resumption tokens
//! stay plain strings here; decoding them is the core's job so that a bad
//! token is reported the same way on every route.

pub(crate) mod stream;
pub(crate) mod subscribe;
