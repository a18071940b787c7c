//! Local enqueue endpoint
//!
//! Producers on the same machine hand events to the daemon over a Unix
//! socket. The daemon claims the socket path exclusively, so at most one
//! instance runs per path.
//!
//! # Architecture
//!
//! ```text
//! producer ──> Client ──> Unix socket ──> Listener ──> EventStore::queue
//! ```
//!
//! The listener keeps no event state of its own; every request goes straight
//! to the queue, which serializes concurrent writers.

mod client;
mod listener;
mod lock;
mod protocol;

pub use client::Client;
pub use listener::Listener;
pub use protocol::{
    ErrorBody, ErrorCode, Introspection, MethodInfo, QueueParams, Request, Response,
    METHOD_INTROSPECT, METHOD_QUEUE, SERVICE_NAME,
};
