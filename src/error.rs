//! Error taxonomy for every call that goes through the API client.
//!
//! ERROR HANDLING
//! ==============
//! Only `AuthExpired` is ever recovered internally (one refresh, one replay).
//! Everything else reaches the caller exactly as it was observed. Role
//! mismatches never show up here; the route gate turns them into redirects.

#[cfg(test)]
#[path = "error_test.rs"]
mod error_test;

use serde_json::Value;

/// Errors produced by API client operations.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The server rejected the request with a 4xx. `detail` is the response body,
    /// which for login/register carries field-level messages.
    #[error("request rejected: status {status}: {}", detail_message(.detail))]
    Validation { status: u16, detail: Value },

    /// A protected call still returned 401 after its single retry.
    #[error("access token expired and could not be renewed")]
    AuthExpired,

    /// The refresh token was missing or rejected. Stored tokens have been cleared.
    #[error("session is no longer valid; log in again")]
    SessionInvalid,

    /// Transport-level failure (connect, timeout, TLS).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The server failed with a 5xx.
    #[error("server error: status {status}")]
    Server { status: u16, body: String },

    /// The response body did not match the expected shape.
    #[error("response decode failed: {0}")]
    Decode(String),

    /// Token persistence failed.
    #[error("token storage failed: {0}")]
    Storage(String),

    /// A client-side argument was rejected before any request was sent.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl ApiError {
    /// Stable machine-readable code, used by the CLI exit path.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "E_VALIDATION",
            Self::AuthExpired => "E_AUTH_EXPIRED",
            Self::SessionInvalid => "E_SESSION_INVALID",
            Self::Network(_) => "E_NETWORK",
            Self::Server { .. } => "E_SERVER",
            Self::Decode(_) => "E_DECODE",
            Self::Storage(_) => "E_STORAGE",
            Self::InvalidArgument(_) => "E_INVALID_ARGUMENT",
        }
    }

    /// HTTP status carried by the error, if the server answered at all.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Validation { status, .. } | Self::Server { status, .. } => Some(*status),
            Self::AuthExpired | Self::SessionInvalid => Some(401),
            _ => None,
        }
    }
}

/// Pull the human-readable part out of a DRF-style error body.
///
/// `{"detail": "..."}` yields the detail string; field maps such as
/// `{"username": ["taken"]}` are flattened to `username: taken`.
#[must_use]
pub fn detail_message(detail: &Value) -> String {
    match detail {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Object(map) => {
            if let Some(Value::String(s)) = map.get("detail") {
                return s.clone();
            }
            map.iter()
                .map(|(field, msgs)| format!("{field}: {}", flatten_messages(msgs)))
                .collect::<Vec<_>>()
                .join("; ")
        }
        other => flatten_messages(other),
    }
}

fn flatten_messages(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(flatten_messages).collect::<Vec<_>>().join(", "),
        other => other.to_string(),
    }
}
