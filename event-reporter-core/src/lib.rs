//! # event-reporter-core
//!
//! Core library for event-reporter, a store-and-forward agent that queues
//! device events locally and reports them to a remote API.
//!
//! This library provides:
//! - Domain types for queued events and delivery outcomes
//! - A durable SQLite queue that merges repeated occurrences by content
//! - The remote API client (registration, login, event reports)
//! - The delivery loop that drains the queue
//! - The local enqueue endpoint (Unix socket server and client)
//! - Configuration and logging
//!
//! ## Architecture
//!
//! ```text
//! producers ──> ipc::Listener ──> EventStore <── DeliveryLoop ──> ApiClient ──> server
//! ```
//!
//! An event stays in the store until the server accepted it or refused it
//! for good. Transient failures leave it queued for the next pass.
//!
//! ## Example
//!
//! ```rust,no_run
//! use event_reporter_core::{Config, EventStore};
//!
//! let config = Config::load().expect("failed to load config");
//!
//! let store = EventStore::open(&config.database_path()).expect("failed to open queue");
//! store.migrate().expect("failed to run migrations");
//! ```

// Re-export commonly used items at the crate root
pub use api::ApiClient;
pub use config::Config;
pub use delivery::{DeliveryLoop, Reporter, Schedule, TickStats};
pub use error::{Error, Result};
pub use store::{Discarded, EventStore};
pub use types::*;

// Public modules
pub mod api;
pub mod config;
pub mod delivery;
pub mod error;
pub mod ipc;
pub mod logging;
pub mod store;
pub mod types;
