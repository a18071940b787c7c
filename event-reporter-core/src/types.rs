//! Core domain types for event-reporter
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Event** | One queued record: an opaque payload plus every time it occurred |
//! | **Details** | The payload bytes a producer handed us, stored verbatim |
//! | **Content key** | SHA-256 of the details; repeated occurrences share one record |
//! | **Outcome** | What happened when we tried to report an event |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ============================================
// Event
// ============================================

/// A queued event awaiting delivery.
///
/// Invariant: `timestamps` is never empty for a stored event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Content key (lowercase hex SHA-256 of `details`)
    pub key: String,
    /// Opaque payload bytes
    pub details: Vec<u8>,
    /// Occurrence times, in the order they were queued
    pub timestamps: Vec<DateTime<Utc>>,
}

impl Event {
    /// Number of occurrences folded into this record
    pub fn occurrences(&self) -> usize {
        self.timestamps.len()
    }

    /// Short form of the content key for log lines
    pub fn short_key(&self) -> &str {
        &self.key[..12.min(self.key.len())]
    }
}

/// Compute the content key for a payload.
pub fn content_key(details: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(details);
    hex::encode(hasher.finalize())
}

/// Convert epoch nanoseconds (as sent by producers) to a UTC instant.
pub fn from_nanos(nanos: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_nanos(nanos)
}

// ============================================
// Delivery
// ============================================

/// Result of one attempt to report an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The server accepted the report
    Delivered,
    /// The server will never accept this report; the event is dropped
    Rejected(String),
    /// Worth retrying later; the event stays queued
    TransientFailure(String),
}

impl DeliveryOutcome {
    /// Whether the event should leave the queue after this outcome
    pub fn is_final(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered | DeliveryOutcome::Rejected(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryOutcome::Delivered => "delivered",
            DeliveryOutcome::Rejected(_) => "rejected",
            DeliveryOutcome::TransientFailure(_) => "transient_failure",
        }
    }
}

impl std::fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryOutcome::Delivered => f.write_str("delivered"),
            DeliveryOutcome::Rejected(reason) => write!(f, "rejected: {}", reason),
            DeliveryOutcome::TransientFailure(cause) => write!(f, "transient failure: {}", cause),
        }
    }
}
