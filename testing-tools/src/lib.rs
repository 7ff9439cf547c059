// Testing Tools Library
//
// This crate provides testing utilities and tools for the SSE gateway.
// Currently includes:
// - sse-test-client: end-to-end scenarios against a running gateway

pub mod api_client;
pub mod output;
pub mod scenarios;
pub mod sse_client;
