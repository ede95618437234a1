//! Inference error types.
//!
//! All errors implement `std::error::Error` via `thiserror`. Structured logging
//! is the caller's responsibility; these types carry the context needed to build
//! meaningful log entries.

use thiserror::Error;

/// HTTP statuses the upstream uses to signal it is shedding load.
const OVERLOAD_STATUSES: [u16; 3] = [429, 503, 529];

/// Errors that can occur during inference operations.
#[derive(Debug, Clone, Error)]
pub enum InferenceError {
    /// TCP/HTTP connection to the model endpoint failed.
    #[error("connection failed to {endpoint}: {reason}")]
    ConnectionFailed {
        endpoint: String,
        reason: String,
    },

    /// The model endpoint did not respond within the configured timeout.
    #[error("inference timeout after {duration_secs}s")]
    Timeout {
        duration_secs: u64,
    },

    /// The upstream reported it is overloaded.
    #[error("model service overloaded (HTTP {status}): {body}")]
    Overloaded {
        status: u16,
        body: String,
    },

    /// Non-2xx HTTP response from the model endpoint.
    #[error("HTTP {status}: {body}")]
    HttpError {
        status: u16,
        body: String,
    },

    /// The response body did not match the chat completion shape.
    #[error("response parse error: {reason}")]
    ResponseParseError {
        reason: String,
    },

    /// Configuration loading or validation error.
    #[error("config error: {reason}")]
    ConfigError {
        reason: String,
    },
}

impl InferenceError {
    /// Classify a non-2xx response.
    ///
    /// Overload shows up either as a dedicated status or as an error body
    /// mentioning it (some gateways wrap it in a 500).
    pub fn from_status(status: u16, body: String) -> Self {
        if OVERLOAD_STATUSES.contains(&status) || body.to_lowercase().contains("overloaded") {
            InferenceError::Overloaded { status, body }
        } else {
            InferenceError::HttpError { status, body }
        }
    }

    /// Whether the upstream is shedding load.
    pub fn is_overloaded(&self) -> bool {
        matches!(self, InferenceError::Overloaded { .. })
    }

    /// Whether a retry of the same call might succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            InferenceError::Overloaded { .. }
            | InferenceError::ConnectionFailed { .. }
            | InferenceError::Timeout { .. } => true,
            InferenceError::HttpError { status, .. } => *status >= 500,
            InferenceError::ResponseParseError { .. } | InferenceError::ConfigError { .. } => false,
        }
    }

}
