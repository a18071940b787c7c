//! Outbound event report payload and response classification
//!
//! A queued event's details are the JSON event description written by the
//! producer: `{"type": "...", "details": {...}}`. The report sent to the API
//! pairs that description with every recorded occurrence:
//!
//! ```text
//! {"description": {"type": "...", "details": {...}}, "dateTimes": ["2018-05-01T10:00:00Z", ...]}
//! ```
//!
//! Other top-level members of the description are passed through unchanged.

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::StatusCode;
use serde::Serialize;

use crate::types::Event;

/// Body of POST /api/v1/events
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Report {
    pub description: Description,
    #[serde(rename = "dateTimes")]
    pub date_times: Vec<String>,
}

/// What happened, as described by the producer
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Description {
    #[serde(rename = "type")]
    pub event_type: String,
    pub details: serde_json::Value,
    /// Any other top-level members the producer wrote, passed through as-is
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Report {
    /// Build the report for a queued event.
    ///
    /// Fails with a reason when the details can never form a valid report.
    pub fn from_event(event: &Event) -> Result<Self, String> {
        let value: serde_json::Value = serde_json::from_slice(&event.details)
            .map_err(|e| format!("details are not valid JSON: {}", e))?;

        let serde_json::Value::Object(mut fields) = value else {
            return Err("details must be a JSON object".to_string());
        };

        let event_type = match fields.remove("type") {
            Some(serde_json::Value::String(t)) if !t.trim().is_empty() => t,
            _ => return Err("details have no string \"type\"".to_string()),
        };

        let details = fields
            .remove("details")
            .unwrap_or_else(|| serde_json::json!({}));

        Ok(Self {
            description: Description {
                event_type,
                details,
                extra: fields,
            },
            date_times: event.timestamps.iter().map(format_timestamp).collect(),
        })
    }
}

/// RFC 3339 in UTC, whole seconds, `Z` suffix.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// How the API answered one report submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Verdict {
    Accepted,
    /// 401/403: the token may simply have expired
    Unauthorized(String),
    Permanent(String),
    Retryable(String),
}

/// Classify an HTTP response to a report submission.
pub(crate) fn classify(status: StatusCode, body: &str) -> Verdict {
    let detail = || format!("API error ({}): {}", status, body.trim());

    if status.is_success() {
        Verdict::Accepted
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        Verdict::Unauthorized(detail())
    } else if matches!(status.as_u16(), 408 | 425 | 429) {
        Verdict::Retryable(detail())
    } else if status.is_client_error() {
        Verdict::Permanent(detail())
    } else {
        // 5xx and anything unexpected
        Verdict::Retryable(detail())
    }
}
