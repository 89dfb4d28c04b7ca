//! Rate-limited, retrying HTTP transport shared by every lookup stage.
//!
//! One [`RateLimitedClient`] is built per run and shared by all workers. It
//! owns the connection pool, the per-host [`RateLimiter`], the
//! [`RetryPolicy`] and the static contact credentials that API requests must
//! carry.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use reqwest::Client;
use reqwest::header::{ACCEPT, RETRY_AFTER, USER_AGENT};
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::rate_limiter::{RateLimiter, extract_host, parse_retry_after};
use super::retry::{FailureType, RetryDecision, RetryPolicy, classify_error};
use super::UpstreamError;
use crate::cancel::CancellationToken;
use crate::config::ConfigError;
use crate::user_agent::{BROWSER_USER_AGENT, default_api_user_agent};

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default upper bound for a whole request (connect + response + body).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

const HTML_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// Static identification attached to API requests.
#[derive(Clone, Default)]
pub struct ApiCredentials {
    /// Tool name registered with the upstream.
    pub tool: String,
    /// Contact email registered with the upstream.
    pub email: String,
    /// Optional API key allowing a higher request rate.
    pub api_key: Option<String>,
}

impl std::fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("tool", &self.tool)
            .field("email", &self.email)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// How a request presents itself to the upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestProfile {
    /// JSON/XML API call carrying `tool`, `email` and `api_key` parameters.
    Api,
    /// HTML page fetch with a desktop browser User-Agent.
    Browser,
}

/// A successful upstream response with its body read into memory.
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// Final URL after redirects.
    pub url: String,
    /// Host the request was dispatched to.
    pub host: String,
    /// HTTP status code.
    pub status: u16,
    /// Response body as text.
    pub body: String,
}

/// Request counters for the end-of-run summary.
#[derive(Debug, Default)]
pub struct ClientStats {
    requests: AtomicUsize,
    retries: AtomicUsize,
    failures: AtomicUsize,
    unreadable: AtomicUsize,
}

impl ClientStats {
    /// Returns the number of dispatched attempts (retries included).
    #[must_use]
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Returns the number of retries performed.
    #[must_use]
    pub fn retries(&self) -> usize {
        self.retries.load(Ordering::SeqCst)
    }

    /// Returns the number of requests that failed after all attempts.
    #[must_use]
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    /// Returns the number of successful responses whose body could not be parsed.
    #[must_use]
    pub fn unreadable(&self) -> usize {
        self.unreadable.load(Ordering::SeqCst)
    }

    pub(crate) fn increment_unreadable(&self) {
        self.unreadable.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_requests(&self) {
        self.requests.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_retries(&self) {
        self.retries.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_failures(&self) {
        self.failures.fetch_add(1, Ordering::SeqCst);
    }
}

/// HTTP transport enforcing per-host spacing and bounded retries.
///
/// Cheap to clone; clones share the connection pool, rate budgets and
/// counters.
#[derive(Debug, Clone)]
pub struct RateLimitedClient {
    client: Client,
    rate_limiter: Arc<RateLimiter>,
    retry_policy: RetryPolicy,
    credentials: ApiCredentials,
    stats: Arc<ClientStats>,
    cancel: CancellationToken,
}

impl RateLimitedClient {
    /// Creates a client with the default connect and request timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::HttpClient`] when the HTTP client cannot be built.
    pub fn new(
        rate_limiter: Arc<RateLimiter>,
        retry_policy: RetryPolicy,
        credentials: ApiCredentials,
    ) -> Result<Self, ConfigError> {
        Self::with_timeouts(
            rate_limiter,
            retry_policy,
            credentials,
            DEFAULT_CONNECT_TIMEOUT,
            DEFAULT_REQUEST_TIMEOUT,
        )
    }

    /// Creates a client with explicit timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::HttpClient`] when the HTTP client cannot be built.
    #[instrument(level = "debug", skip(rate_limiter, retry_policy, credentials))]
    pub fn with_timeouts(
        rate_limiter: Arc<RateLimiter>,
        retry_policy: RetryPolicy,
        credentials: ApiCredentials,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .user_agent(default_api_user_agent())
            .gzip(true)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        debug!(
            max_attempts = retry_policy.max_attempts(),
            request_timeout_ms = request_timeout.as_millis(),
            has_api_key = credentials.api_key.is_some(),
            "created rate-limited client"
        );

        Ok(Self {
            client,
            rate_limiter,
            retry_policy,
            credentials,
            stats: Arc::new(ClientStats::default()),
            cancel: CancellationToken::new(),
        })
    }

    /// Ties the client to a run's cancellation token.
    ///
    /// Once cancelled, no further attempt is dispatched and pending rate-limit
    /// or backoff waits end immediately with [`UpstreamError::Cancelled`].
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Returns the shared request counters.
    #[must_use]
    pub fn stats(&self) -> &ClientStats {
        &self.stats
    }

    /// Returns the shared rate limiter.
    #[must_use]
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    /// Issues a GET request, waiting for the host's rate budget before every
    /// attempt and retrying transient failures with exponential backoff.
    ///
    /// # Errors
    ///
    /// Returns the last [`UpstreamError`] once the failure is permanent or the
    /// retry policy is exhausted, or [`UpstreamError::Cancelled`] when the run
    /// is cancelled before an attempt is dispatched.
    #[instrument(skip(self, params), fields(host))]
    pub async fn get(
        &self,
        url: &str,
        params: &[(&str, &str)],
        profile: RequestProfile,
    ) -> Result<RawResponse, UpstreamError> {
        let request_url = self.build_url(url, params, profile)?;
        let host = extract_host(url);
        tracing::Span::current().record("host", host.as_str());

        let mut attempt = 0u32;
        loop {
            attempt += 1;

            if self.cancel.is_cancelled() {
                debug!(attempt, "run cancelled; not dispatching");
                return Err(UpstreamError::cancelled(url));
            }
            tokio::select! {
                () = self.rate_limiter.acquire_host(&host) => {}
                () = self.cancel.cancelled() => {
                    debug!(attempt, "run cancelled while waiting for rate budget");
                    return Err(UpstreamError::cancelled(url));
                }
            }
            self.stats.increment_requests();
            debug!(attempt, "dispatching request");

            let error = match self.send_once(&request_url, &host, profile).await {
                Ok(response) => return Ok(response),
                Err(error) => error,
            };

            let failure_type = classify_error(&error);
            let retry_after = if failure_type == FailureType::RateLimited {
                self.retry_after_delay(&error, url).await
            } else {
                None
            };

            match self.retry_policy.should_retry(failure_type, attempt) {
                RetryDecision::Retry {
                    delay: backoff,
                    attempt: next_attempt,
                } => {
                    info!(
                        host = %host,
                        attempt = next_attempt,
                        max_attempts = self.retry_policy.max_attempts(),
                        delay_ms = retry_after.unwrap_or(backoff).as_millis(),
                        using_retry_after = retry_after.is_some(),
                        error = %error,
                        "retrying request"
                    );
                    self.stats.increment_retries();
                    // A Retry-After hold is enforced by the next acquire,
                    // unless the limiter is disabled.
                    let wait = match retry_after {
                        Some(_) if !self.rate_limiter.is_disabled() => Duration::ZERO,
                        Some(hold) => hold,
                        None => backoff,
                    };
                    tokio::select! {
                        () = tokio::time::sleep(wait) => {}
                        () = self.cancel.cancelled() => {
                            debug!(attempt, error = %error, "run cancelled during retry wait");
                            return Err(UpstreamError::cancelled(url));
                        }
                    }
                }
                RetryDecision::DoNotRetry { reason } => {
                    warn!(host = %host, attempts = attempt, %reason, error = %error, "request failed");
                    self.stats.increment_failures();
                    return Err(error);
                }
            }
        }
    }

    fn build_url(
        &self,
        url: &str,
        params: &[(&str, &str)],
        profile: RequestProfile,
    ) -> Result<Url, UpstreamError> {
        let mut parsed = Url::parse(url).map_err(|_| UpstreamError::invalid_url(url))?;
        if params.is_empty() && profile == RequestProfile::Browser {
            return Ok(parsed);
        }

        {
            let mut query = parsed.query_pairs_mut();
            for (key, value) in params {
                query.append_pair(key, value);
            }
            if profile == RequestProfile::Api {
                if !self.credentials.tool.is_empty() {
                    query.append_pair("tool", &self.credentials.tool);
                }
                if !self.credentials.email.is_empty() {
                    query.append_pair("email", &self.credentials.email);
                }
                if let Some(api_key) = &self.credentials.api_key {
                    query.append_pair("api_key", api_key);
                }
            }
        }
        Ok(parsed)
    }

    async fn send_once(
        &self,
        url: &Url,
        host: &str,
        profile: RequestProfile,
    ) -> Result<RawResponse, UpstreamError> {
        let mut request = self.client.get(url.as_str());
        if profile == RequestProfile::Browser {
            request = request
                .header(USER_AGENT, BROWSER_USER_AGENT)
                .header(ACCEPT, HTML_ACCEPT);
        }

        let response = request
            .send()
            .await
            .map_err(|e| map_send_error(url.as_str(), e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);
            if profile == RequestProfile::Api && matches!(status.as_u16(), 401 | 407) {
                return Err(UpstreamError::credentials_rejected(
                    url.as_str(),
                    status.as_u16(),
                ));
            }
            return Err(UpstreamError::http_status_with_retry_after(
                url.as_str(),
                status.as_u16(),
                retry_after,
            ));
        }

        let final_url = response.url().to_string();
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                UpstreamError::timeout(url.as_str())
            } else {
                UpstreamError::body(url.as_str(), e)
            }
        })?;

        Ok(RawResponse {
            url: final_url,
            host: host.to_string(),
            status: status.as_u16(),
            body,
        })
    }

    async fn retry_after_delay(&self, error: &UpstreamError, url: &str) -> Option<Duration> {
        let UpstreamError::HttpStatus {
            retry_after: Some(header),
            ..
        } = error
        else {
            return None;
        };
        let delay = parse_retry_after(header)?;
        self.rate_limiter.record_rate_limit(url, delay).await;
        Some(delay)
    }
}

fn map_send_error(url: &str, error: reqwest::Error) -> UpstreamError {
    if error.is_timeout() {
        UpstreamError::timeout(url)
    } else {
        UpstreamError::network(url, error)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn client_with(credentials: ApiCredentials) -> RateLimitedClient {
        RateLimitedClient::new(
            Arc::new(RateLimiter::disabled()),
            RetryPolicy::default(),
            credentials,
        )
        .unwrap()
    }

    #[test]
    fn test_build_url_api_appends_credentials() {
        let client = client_with(ApiCredentials {
            tool: "Scan".to_string(),
            email: "me@example.org".to_string(),
            api_key: Some("k123".to_string()),
        });
        let url = client
            .build_url(
                "https://eutils.example.org/esearch.fcgi",
                &[("db", "pubmed"), ("term", "\"a b\"[tiab]")],
                RequestProfile::Api,
            )
            .unwrap();
        assert_eq!(
            url.query(),
            Some("db=pubmed&term=%22a+b%22%5Btiab%5D&tool=Scan&email=me%40example.org&api_key=k123")
        );
    }

    #[test]
    fn test_build_url_browser_skips_credentials() {
        let client = client_with(ApiCredentials {
            tool: "Scan".to_string(),
            email: "me@example.org".to_string(),
            api_key: None,
        });
        let url = client
            .build_url(
                "https://fda.example.org/pmn.cfm",
                &[("ID", "K123456")],
                RequestProfile::Browser,
            )
            .unwrap();
        assert_eq!(url.query(), Some("ID=K123456"));
    }

    #[test]
    fn test_build_url_rejects_malformed_base() {
        let client = client_with(ApiCredentials::default());
        let err = client
            .build_url("not a url", &[], RequestProfile::Api)
            .unwrap_err();
        assert!(matches!(err, UpstreamError::InvalidUrl { .. }));
    }

    #[test]
    fn test_credentials_debug_redacts_api_key() {
        let credentials = ApiCredentials {
            tool: "Scan".to_string(),
            email: "me@example.org".to_string(),
            api_key: Some("secret-key".to_string()),
        };
        let debug = format!("{credentials:?}");
        assert!(!debug.contains("secret-key"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_stats_start_at_zero() {
        let client = client_with(ApiCredentials::default());
        assert_eq!(client.stats().requests(), 0);
        assert_eq!(client.stats().retries(), 0);
        assert_eq!(client.stats().failures(), 0);
    }
}
