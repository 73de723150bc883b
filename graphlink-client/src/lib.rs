//! # graphlink-client
//!
//! Async client for GraphBinary graph-query servers.
//!
//! This crate provides:
//! - A websocket transport with TLS and HTTP Basic auth on the upgrade
//! - A multiplexed protocol engine: many in-flight requests per connection,
//!   streamed partial responses, SASL challenge handling
//! - Per-request [`ResultSet`] channels with end-of-stream and error signaling
//! - A load-balancing connection pool with admission control by in-flight load
//! - Session clients with transaction commit/rollback

mod auth;
mod client;
mod connection;
mod error;
mod pool;
mod protocol;
mod result_set;
mod tls;
mod transport;

pub use auth::AuthInfo;
pub use client::{Client, ClientSettings};
pub use error::ClientError;
pub use result_set::{ResultChannel, ResultSet};
pub use tls::TlsOptions;
pub use transport::TransporterType;

// Re-exported protocol types used at the API surface.
pub use graphlink_protocol::{Bytecode, Instruction, Value};
