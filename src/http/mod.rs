//! Rate-limited HTTP transport for upstream lookups.
//!
//! # Features
//!
//! - Per-host minimum request interval shared across all workers
//! - Exponential backoff for rate-limited and transient failures
//! - `Retry-After` support on HTTP 429
//! - Fixed per-request timeout, treated as transient
//! - Static contact credentials on API requests, browser User-Agent on page fetches
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use trialscan_core::http::{ApiCredentials, RateLimitedClient, RateLimiter, RequestProfile, RetryPolicy};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let limiter = Arc::new(RateLimiter::new(Duration::from_millis(350)));
//! let credentials = ApiCredentials {
//!     tool: "trialscan".to_string(),
//!     email: "me@example.org".to_string(),
//!     api_key: None,
//! };
//! let client = RateLimitedClient::new(limiter, RetryPolicy::default(), credentials)?;
//! let response = client
//!     .get(
//!         "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/esearch.fcgi",
//!         &[("db", "pubmed"), ("term", "NCT01234567[si]"), ("retmode", "json")],
//!         RequestProfile::Api,
//!     )
//!     .await?;
//! println!("{}", response.body);
//! # Ok(())
//! # }
//! ```

mod client;
mod error;
pub mod rate_limiter;
mod retry;

pub use client::{
    ApiCredentials, ClientStats, DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT, RateLimitedClient,
    RawResponse, RequestProfile,
};
pub use error::UpstreamError;
pub use rate_limiter::{RateBudget, RateLimiter, extract_host, parse_retry_after};
pub use retry::{DEFAULT_MAX_ATTEMPTS, FailureType, RetryDecision, RetryPolicy, classify_error};
