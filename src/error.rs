//! propedge error types

use std::time::Duration;

/// propedge error types
#[derive(Debug, thiserror::Error)]
pub enum PropEdgeError {
    /// The provider's daily budget is spent and no stale copy exists.
    ///
    /// Not transient: retrying before the day rolls over cannot succeed.
    #[error("upstream budget exhausted for provider '{provider}' and no cached data available")]
    UpstreamExhausted { provider: String },

    // Upstream/network errors
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("upstream request timed out")]
    Timeout,

    // Store errors
    #[error("store error: {0}")]
    Store(String),

    // Data errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl PropEdgeError {
    /// Whether a retry might succeed.
    ///
    /// Network failures, timeouts, rate limits and 5xx responses are
    /// transient. Budget exhaustion, bad payloads and configuration errors
    /// are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(_) | Self::Timeout | Self::RateLimited { .. } => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Provider-supplied retry hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for PropEdgeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PropEdgeError::Timeout
        } else if let Some(status) = err.status() {
            PropEdgeError::Api {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            PropEdgeError::Http(err.to_string())
        }
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for PropEdgeError {
    fn from(err: redis::RedisError) -> Self {
        PropEdgeError::Store(err.to_string())
    }
}

/// Result type alias for propedge operations
pub type Result<T> = std::result::Result<T, PropEdgeError>;
