//! Errors raised while talking to the model provider

use reqwest::StatusCode;

/// Result type for model operations
pub type Result<T> = std::result::Result<T, LlmError>;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Provider returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("Request timed out")]
    Timeout,

    #[error("Network error: {0}")]
    Http(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl LlmError {
    /// Whether another attempt could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::RateLimited | LlmError::Timeout | LlmError::Http(_) => true,
            LlmError::Status { status, .. } => status.is_server_error(),
            LlmError::Authentication(_) | LlmError::Parse(_) => false,
        }
    }

    /// Map an HTTP failure status to an error
    pub fn from_status(status: StatusCode, body: String) -> Self {
        match status.as_u16() {
            401 | 403 => LlmError::Authentication(body),
            429 => LlmError::RateLimited,
            _ => LlmError::Status { status, body },
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            LlmError::Timeout
        } else if e.is_decode() {
            LlmError::Parse(e.to_string())
        } else {
            LlmError::Http(e.to_string())
        }
    }
}
