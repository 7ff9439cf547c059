//! Response DTOs documented in the OpenAPI schema.

pub(crate) mod connection;
pub(crate) mod stream;
