#![forbid(unsafe_code)]

//! Tunegate: an HTTP gateway that hides upstream media URLs behind
//! short-lived stream ids and relays range requests to them.
//!
//! The binary in `src/bin/gateway.rs` only wires configuration and logging;
//! everything else lives here so it can be exercised by the tests.

pub mod config;
pub mod error;
pub mod extractor;
pub mod proxy;
pub mod registry;
pub mod relay;
pub mod server;
pub mod token;

#[cfg(test)]
mod testing;
