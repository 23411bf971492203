//! Error types for the API client
//!
//! Only the failures a caller can act on are surfaced here. Authentication
//! problems, rate limits and transient failures are retried inside the client
//! and only show up once recovery is impossible.

use serde::Serialize;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Everything known about a request that kept failing
#[derive(Debug, Clone, Default, Serialize)]
pub struct RequestDiagnostics {
    /// HTTP method
    pub method: String,
    /// Endpoint as requested, e.g. `search/tweets`
    pub endpoint: String,
    /// Query parameters sent
    pub params: Vec<(String, String)>,
    /// Fully encoded URL, when a response was received
    pub encoded_url: Option<String>,
    /// Last observed status code
    pub status_code: Option<u16>,
    /// The API's own `errors` array, if the body carried one
    pub errors: Option<Value>,
    /// Description of the last failure
    pub cause: String,
}

impl fmt::Display for RequestDiagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.endpoint)?;
        if let Some(status) = self.status_code {
            write!(f, " (status {status})")?;
        }
        if let Some(url) = &self.encoded_url {
            write!(f, " url={url}")?;
        }
        if let Some(errors) = &self.errors {
            write!(f, " errors={errors}")?;
        }
        write!(f, ": {}", self.cause)
    }
}

/// Errors surfaced by the API client
#[derive(Debug, Error)]
pub enum ApiError {
    /// Credentials could not be loaded or signed with; the process must stop
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Rejected even after fresh credentials were loaded
    #[error("Forbidden: {0}")]
    Forbidden(Box<RequestDiagnostics>),

    /// Quota exhausted and the caller asked not to wait
    #[error("Rate limit exceeded on {endpoint}, resets at {reset_at}")]
    RateLimited { endpoint: String, reset_at: i64 },

    /// Transient failures exceeded the retry budget
    #[error("Retries exhausted: {0}")]
    ExhaustedRetries(Box<RequestDiagnostics>),

    /// The resource is gone; repeating the call cannot succeed
    #[error("Not found: {endpoint}")]
    NotFound { endpoint: String },

    /// The body did not have the expected shape
    #[error("Malformed response from {endpoint}: {message}")]
    Malformed { endpoint: String, message: String },

    /// Transport-level failure outside a retried call
    #[error("Transport error: {0}")]
    Transport(String),

    /// Shutdown was requested while the call was waiting to retry
    #[error("Cancelled while waiting on {endpoint}")]
    Cancelled { endpoint: String },
}

impl ApiError {
    /// Whether the process can no longer make progress
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Auth(_))
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Build a malformed response error
    pub fn malformed(endpoint: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Malformed {
            endpoint: endpoint.into(),
            message: message.to_string(),
        }
    }
}

/// Result type for API operations
pub type ApiResult<T> = Result<T, ApiError>;
