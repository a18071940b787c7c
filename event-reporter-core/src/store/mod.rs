//! Durable event queue
//!
//! Events are stored in SQLite, one row per distinct payload. Every operation
//! runs in its own transaction, so a crash leaves either the old or the new
//! state on disk and never a partial write.

pub mod queue;
pub mod schema;

pub use queue::{Discarded, EventStore};
