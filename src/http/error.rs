//! Error types for upstream HTTP requests.
//!
//! Every failure carries the URL and host it happened on so per-record error
//! markers in the output stay actionable.

use thiserror::Error;

/// Errors that can occur while talking to an upstream service.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error requesting {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request exceeded the configured per-request bound.
    #[error("timeout requesting {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// Non-success HTTP response.
    #[error("HTTP {status} requesting {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// The Retry-After header value, if present (for 429 responses).
        retry_after: Option<String>,
    },

    /// An API rejected the contact credentials (HTTP 401/407).
    ///
    /// Only produced for API requests; the same status from an HTML page is
    /// an ordinary [`UpstreamError::HttpStatus`].
    #[error("credentials rejected (HTTP {status}) requesting {url}")]
    CredentialsRejected {
        /// The URL that rejected the request.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The run was cancelled before the request could be (re)sent.
    #[error("cancelled before requesting {url}")]
    Cancelled {
        /// The URL that was not requested.
        url: String,
    },

    /// The response body could not be read.
    #[error("failed reading response body from {url}: {source}")]
    Body {
        /// The URL whose body failed.
        url: String,
        /// The underlying read error.
        #[source]
        source: reqwest::Error,
    },

    /// The request URL is malformed.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },
}

impl UpstreamError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after: None,
        }
    }

    /// Creates an HTTP status error with a Retry-After header value.
    pub fn http_status_with_retry_after(
        url: impl Into<String>,
        status: u16,
        retry_after: Option<String>,
    ) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after,
        }
    }

    /// Creates a rejected-credentials error.
    pub fn credentials_rejected(url: impl Into<String>, status: u16) -> Self {
        Self::CredentialsRejected {
            url: url.into(),
            status,
        }
    }

    /// Creates a cancellation error.
    pub fn cancelled(url: impl Into<String>) -> Self {
        Self::Cancelled { url: url.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates a body read error.
    pub fn body(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Body {
            url: url.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Returns the HTTP status code when the failure was a status response.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } | Self::CredentialsRejected { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }

    /// Returns true when the request was abandoned because the run was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Short marker used in joined output text, e.g. `HTTP 429` or `timeout`.
    #[must_use]
    pub fn marker(&self) -> String {
        match self {
            Self::Network { .. } => "network error".to_string(),
            Self::Timeout { .. } => "timeout".to_string(),
            Self::HttpStatus { status, .. } | Self::CredentialsRejected { status, .. } => {
                format!("HTTP {status}")
            }
            Self::Cancelled { .. } => "cancelled".to_string(),
            Self::Body { .. } => "unreadable body".to_string(),
            Self::InvalidUrl { .. } => "invalid URL".to_string(),
        }
    }
}
