//! IPC protocol types for the enqueue endpoint
//!
//! Newline-delimited JSON frames, one request per line:
//!
//! ```text
//! -> {"id":"1","method":"queue","params":{"details":[123,125],"timestamp_nanos":1525168800000000000}}
//! <- {"id":"1","result":null}
//! ```

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Name the endpoint advertises through `introspect`
pub const SERVICE_NAME: &str = "org.cacophony.Events";

/// Queue one event occurrence
pub const METHOD_QUEUE: &str = "queue";

/// Describe the service and its methods
pub const METHOD_INTROSPECT: &str = "introspect";

/// A request to the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Caller-chosen request identifier, echoed in the response
    pub id: String,
    /// Method name to invoke
    pub method: String,
    /// Method parameters as JSON value
    #[serde(default)]
    pub params: serde_json::Value,
}

impl Request {
    /// Create a new request with auto-generated ID
    pub fn new(
        method: impl Into<String>,
        params: impl Serialize,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            method: method.into(),
            params: serde_json::to_value(params)?,
        })
    }
}

/// A response from the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Request ID this response corresponds to
    pub id: String,
    /// Result value on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    /// Create a success response
    pub fn success(id: impl Into<String>, result: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            result: Some(result),
            error: None,
        }
    }

    /// Create a success response with no result value
    pub fn ok(id: impl Into<String>) -> Self {
        Self::success(id, serde_json::Value::Null)
    }

    /// Create an error response
    pub fn error(id: impl Into<String>, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            result: None,
            error: Some(ErrorBody {
                code,
                message: message.into(),
            }),
        }
    }

    /// Check if this response is an error
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Error information in a response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
}

/// Error codes for IPC errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The frame was not a valid request
    ParseError,
    /// The method exists but the params do not fit it
    InvalidParams,
    /// Unknown method name
    MethodNotFound,
    /// The queue could not persist the event
    QueueFailed,
    /// Anything else that went wrong inside the daemon
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ParseError => "parse_error",
            ErrorCode::InvalidParams => "invalid_params",
            ErrorCode::MethodNotFound => "method_not_found",
            ErrorCode::QueueFailed => "queue_failed",
            ErrorCode::Internal => "internal",
        }
    }
}

/// Params for `queue`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueParams {
    /// Opaque event payload
    pub details: Vec<u8>,
    /// Occurrence time as nanoseconds since the Unix epoch
    pub timestamp_nanos: i64,
}

/// Result of `introspect`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Introspection {
    pub service: String,
    pub methods: Vec<MethodInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MethodInfo {
    pub name: String,
    pub params: Vec<String>,
}

impl Introspection {
    /// Description of this daemon's endpoint
    pub fn current() -> Self {
        Self {
            service: SERVICE_NAME.to_string(),
            methods: vec![
                MethodInfo {
                    name: METHOD_QUEUE.to_string(),
                    params: vec!["details".to_string(), "timestamp_nanos".to_string()],
                },
                MethodInfo {
                    name: METHOD_INTROSPECT.to_string(),
                    params: vec![],
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_shape() {
        let resp = Response::error("7", ErrorCode::QueueFailed, "disk full");
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"id": "7", "error": {"code": "queue_failed", "message": "disk full"}})
        );
        assert!(resp.is_error());
    }

    #[test]
    fn test_ok_response_has_null_result() {
        let line = serde_json::to_string(&Response::ok("1")).unwrap();
        assert_eq!(line, r#"{"id":"1","result":null}"#);
    }

    #[test]
    fn test_queue_params_parse() {
        let params: QueueParams = serde_json::from_value(serde_json::json!({
            "details": [123, 125],
            "timestamp_nanos": -5,
        }))
        .unwrap();
        assert_eq!(params.details, b"{}".to_vec());
        assert_eq!(params.timestamp_nanos, -5);
    }

    #[test]
    fn test_request_ids_are_unique() {
        let a = Request::new(METHOD_INTROSPECT, ()).unwrap();
        let b = Request::new(METHOD_INTROSPECT, ()).unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_introspection_lists_queue() {
        let info = Introspection::current();
        assert_eq!(info.service, SERVICE_NAME);
        assert!(info.methods.iter().any(|m| m.name == METHOD_QUEUE));
    }
}
