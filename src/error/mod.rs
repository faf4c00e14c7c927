// Error handling module for the snode network layer
//
// This module defines the closed error taxonomy shared by every component.
// Only the retry classifier inspects these variants to decide on retries;
// all other components fail fast and propagate.

use std::result;
use thiserror::Error;

/// Result type for snode network operations
pub type Result<T> = result::Result<T, NetworkError>;

/// Error type for snode network operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NetworkError {
    /// A URL could not be constructed or parsed
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// A payload was not valid JSON
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    /// A response was syntactically valid but did not match the expected shape
    #[error("Parsing failed: {0}")]
    ParsingFailed(String),

    /// A response violated the protocol (wrong envelope, missing fields)
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// An outgoing body exceeded the maximum accepted size
    #[error("Maximum file size exceeded")]
    MaxFileSizeExceeded,

    /// A request completed with a non-2xx status code
    #[error("HTTP request failed with status {code}")]
    HttpRequestFailed {
        /// HTTP-like status code
        code: u16,
        /// Raw response body, if any
        body: Option<String>,
    },

    /// The caller-supplied timeout elapsed
    #[error("Operation timed out")]
    TimedOut,

    /// The operation was cancelled before completion
    #[error("Operation cancelled")]
    Cancelled,

    /// The node pool (or a swarm) could not supply enough nodes
    #[error("Insufficient nodes")]
    InsufficientNodes,

    /// The local clock disagrees with the network beyond tolerance
    #[error("Clock out of sync with service node network")]
    ClockOutOfSync,

    /// A node rejected this request's signature
    #[error("Signature verification failed")]
    SignatureVerificationFailed,

    /// No enabled transport reported itself ready
    #[error("No enabled transport is ready")]
    TransportsNotReady,

    /// Failure attributable to a specific hop of an onion path
    #[error("Onion path failure: {0}")]
    PathFailure(String),

    /// Signing capability failure
    #[error("Signing failed: {0}")]
    SigningFailed(String),
}

impl From<reqwest::Error> for NetworkError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return NetworkError::TimedOut;
        }
        if let Some(status) = err.status() {
            return NetworkError::HttpRequestFailed {
                code: status.as_u16(),
                body: None,
            };
        }
        NetworkError::InvalidResponse(err.to_string())
    }
}

impl From<serde_json::Error> for NetworkError {
    fn from(err: serde_json::Error) -> Self {
        NetworkError::InvalidJson(err.to_string())
    }
}

impl NetworkError {
    /// Whether this error was caused by a specific hop misbehaving, as
    /// opposed to a caller-side condition. Hop-attributable failures
    /// condemn the owning path; caller-side ones do not.
    pub fn is_hop_attributable(&self) -> bool {
        matches!(
            self,
            NetworkError::PathFailure(_) | NetworkError::InvalidResponse(_)
        )
    }
}
