// Error handling module
// Defines the authentication error taxonomy and transport failures

use std::time::Duration;
use thiserror::Error;

/// Errors produced while building authenticators or obtaining tokens
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuthError {
    /// Mutually exclusive or jointly required options were violated
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The identity endpoint answered with a non-success status
    #[error("Authentication failed with status code [{status}]: {message}")]
    AuthenticationFailed { status: u16, message: String },

    /// The identity endpoint answered but the body was unusable
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// The token payload segment could not be decoded
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    /// The identity call did not finish within its deadline
    #[error("Token request timed out after {0:?}")]
    Timeout(Duration),

    /// The request never produced a response
    #[error("Transport error: {0}")]
    Transport(String),
}

impl AuthError {
    /// Whether retrying the same refresh later may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            AuthError::AuthenticationFailed { status, .. } => *status == 429 || *status >= 500,
            AuthError::Timeout(_) | AuthError::Transport(_) => true,
            _ => false,
        }
    }
}

/// Failures raised by an [`HttpTransport`](crate::http_client::HttpTransport)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// Carries the transport's configured request timeout
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("network error: {0}")]
    Network(String),

    /// The request could not be built or its body could not be read
    #[error("request error: {0}")]
    Request(String),
}

impl TransportError {
    /// Classify a reqwest failure; `timeout` is the deadline the client was built with
    pub fn from_reqwest(e: reqwest::Error, timeout: Duration) -> Self {
        if e.is_timeout() {
            TransportError::Timeout(timeout)
        } else if e.is_connect() {
            TransportError::Network(e.to_string())
        } else if e.is_builder() || e.is_request() || e.is_body() || e.is_decode() {
            TransportError::Request(e.to_string())
        } else {
            TransportError::Network(e.to_string())
        }
    }
}

impl From<TransportError> for AuthError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Timeout(after) => AuthError::Timeout(after),
            other => AuthError::Transport(other.to_string()),
        }
    }
}

/// Result type alias for authentication operations
pub type Result<T> = std::result::Result<T, AuthError>;
