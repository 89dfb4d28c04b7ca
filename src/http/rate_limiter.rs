//! Per-host rate limiting for upstream requests.
//!
//! This module provides the [`RateLimiter`] struct which owns one [`RateBudget`]
//! per upstream host and enforces a minimum interval between dispatches to the
//! same host.
//!
//! # Overview
//!
//! Requests to different hosts never wait for each other. Each host may carry
//! its own interval (NCBI allows ~3 req/s without an API key and ~10 req/s
//! with one, while the FDA site gets a polite fixed pause).
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use trialscan_core::http::RateLimiter;
//!
//! # async fn example() {
//! let limiter = Arc::new(
//!     RateLimiter::new(Duration::from_millis(350))
//!         .with_host_interval("eutils.ncbi.nlm.nih.gov", Duration::from_millis(100)),
//! );
//!
//! // First request to a host proceeds immediately
//! limiter.acquire("https://eutils.ncbi.nlm.nih.gov/entrez/eutils/esearch.fcgi").await;
//!
//! // Second request to the same host waits out the interval
//! limiter.acquire("https://eutils.ncbi.nlm.nih.gov/entrez/eutils/esummary.fcgi").await;
//!
//! // A different host proceeds immediately
//! limiter.acquire("https://www.accessdata.fda.gov/scripts/cdrh/cfdocs/cfPMN/pmn.cfm").await;
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// Warning threshold for cumulative delay per host (30 seconds).
const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(30);

/// Maximum Retry-After value (1 hour) to prevent excessive delays.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Per-host rate limiter shared by every request of a run.
///
/// Wrap it in `Arc` and hand clones to each worker. Host state lives in a
/// `DashMap`; the timing read-update of a single host is serialized by a
/// `tokio::sync::Mutex`, so concurrent workers can never dispatch to the same
/// host closer together than its interval.
#[derive(Debug)]
pub struct RateLimiter {
    /// Interval applied to hosts without an explicit override.
    default_interval: Duration,

    /// Whether rate limiting is disabled (for `--rate-limit 0` style test setups).
    disabled: bool,

    /// Host-specific intervals, keyed by lowercase host.
    host_intervals: HashMap<String, Duration>,

    /// Per-host budgets. `Arc` lets the `DashMap` shard lock be released
    /// before awaiting on the inner mutex.
    hosts: DashMap<String, Arc<RateBudget>>,
}

/// Timing state of one upstream host.
#[derive(Debug)]
pub struct RateBudget {
    /// Minimum spacing between dispatches to this host.
    interval: Duration,

    /// Timing state guarded for atomic check-and-update.
    timing: Mutex<BudgetTiming>,

    /// Cumulative delay applied to this host (in milliseconds).
    cumulative_delay_ms: AtomicU64,
}

#[derive(Debug, Default)]
struct BudgetTiming {
    /// `None` until the first dispatch (first request is immediate).
    last_request: Option<Instant>,
    /// Server-mandated pause (Retry-After) that every worker must honor.
    hold_until: Option<Instant>,
}

impl RateBudget {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            timing: Mutex::new(BudgetTiming::default()),
            cumulative_delay_ms: AtomicU64::new(0),
        }
    }

    /// Returns the minimum interval for this host.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns the total delay applied to this host so far.
    #[must_use]
    pub fn cumulative_delay(&self) -> Duration {
        Duration::from_millis(self.cumulative_delay_ms.load(Ordering::SeqCst))
    }

    #[allow(clippy::cast_possible_truncation)]
    fn add_cumulative_delay(&self, delay: Duration) -> Duration {
        let delay_ms = delay.as_millis() as u64;
        let new_total = self
            .cumulative_delay_ms
            .fetch_add(delay_ms, Ordering::SeqCst)
            + delay_ms;
        Duration::from_millis(new_total)
    }
}

impl RateLimiter {
    /// Creates a new rate limiter with the specified default interval.
    #[must_use]
    #[instrument(skip_all, fields(interval_ms = default_interval.as_millis()))]
    pub fn new(default_interval: Duration) -> Self {
        debug!("creating rate limiter");
        Self {
            default_interval,
            disabled: false,
            host_intervals: HashMap::new(),
            hosts: DashMap::new(),
        }
    }

    /// Creates a disabled rate limiter that applies no delays.
    #[must_use]
    pub fn disabled() -> Self {
        debug!("creating disabled rate limiter");
        Self {
            default_interval: Duration::ZERO,
            disabled: true,
            host_intervals: HashMap::new(),
            hosts: DashMap::new(),
        }
    }

    /// Overrides the interval for one host (given as a host name or URL).
    #[must_use]
    pub fn with_host_interval(mut self, host_or_url: &str, interval: Duration) -> Self {
        self.host_intervals.insert(normalize_host(host_or_url), interval);
        self
    }

    /// Returns whether rate limiting is disabled.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Returns the interval applied to hosts without an override.
    #[must_use]
    pub fn default_interval(&self) -> Duration {
        self.default_interval
    }

    /// Returns the interval that applies to `host`.
    #[must_use]
    pub fn interval_for(&self, host: &str) -> Duration {
        self.host_intervals
            .get(host)
            .copied()
            .unwrap_or(self.default_interval)
    }

    /// Returns the budget for `host`, if any request has touched it yet.
    #[must_use]
    pub fn budget(&self, host: &str) -> Option<Arc<RateBudget>> {
        self.hosts.get(host).map(|entry| Arc::clone(entry.value()))
    }

    fn budget_or_insert(&self, host: &str) -> Arc<RateBudget> {
        self.hosts
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(RateBudget::new(self.interval_for(host))))
            .clone()
    }

    /// Acquires permission to dispatch a request to the given URL's host.
    pub async fn acquire(&self, url: &str) {
        let host = extract_host(url);
        self.acquire_host(&host).await;
    }

    /// Acquires permission to dispatch a request to `host`.
    ///
    /// Waits until the host's interval has elapsed since its last dispatch
    /// (and past any server-mandated hold), then stamps the dispatch time.
    /// The first request to any host proceeds immediately.
    #[instrument(skip(self))]
    pub async fn acquire_host(&self, host: &str) {
        if self.disabled {
            return;
        }

        let budget = self.budget_or_insert(host);

        // Only the per-host mutex is held across the sleep, so other hosts
        // keep flowing while this one waits.
        let mut timing = budget.timing.lock().await;

        let now = Instant::now();
        let interval_ready = timing
            .last_request
            .map_or(now, |last| last + budget.interval);
        let ready_at = timing
            .hold_until
            .map_or(interval_ready, |hold| hold.max(interval_ready));

        if ready_at > now {
            let delay = ready_at - now;
            let cumulative = budget.add_cumulative_delay(delay);

            debug!(
                host,
                delay_ms = delay.as_millis(),
                cumulative_ms = cumulative.as_millis(),
                "applying rate limit delay"
            );

            if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
                warn!(
                    host,
                    cumulative_delay_secs = cumulative.as_secs(),
                    "excessive rate limiting - consider reducing request volume to this host"
                );
            }

            tokio::time::sleep_until(ready_at).await;
        } else if timing.last_request.is_none() {
            debug!(host, "first request to host - no delay");
        }

        timing.last_request = Some(Instant::now());
    }

    /// Records a server-mandated pause (from a Retry-After header).
    ///
    /// Every worker targeting the host waits until the pause has elapsed.
    #[instrument(skip(self))]
    pub async fn record_rate_limit(&self, url: &str, delay: Duration) {
        let host = extract_host(url);
        let budget = self.budget_or_insert(&host);
        let cumulative = budget.add_cumulative_delay(delay);

        {
            let mut timing = budget.timing.lock().await;
            let until = Instant::now() + delay;
            timing.hold_until = Some(timing.hold_until.map_or(until, |hold| hold.max(until)));
        }

        debug!(
            host = %host,
            delay_ms = delay.as_millis(),
            cumulative_ms = cumulative.as_millis(),
            "recorded server rate limit"
        );

        if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
            warn!(
                host = %host,
                cumulative_delay_secs = cumulative.as_secs(),
                "excessive server rate limiting - upstream may be under heavy load"
            );
        }
    }
}

fn normalize_host(host_or_url: &str) -> String {
    if host_or_url.contains("://") {
        extract_host(host_or_url)
    } else {
        host_or_url.trim().to_ascii_lowercase()
    }
}

/// Extracts the lowercase host from a URL.
///
/// Returns "unknown" for malformed URLs so such requests are still rate limited.
///
/// # Examples
///
/// ```
/// use trialscan_core::http::extract_host;
///
/// assert_eq!(extract_host("https://eutils.ncbi.nlm.nih.gov/entrez"), "eutils.ncbi.nlm.nih.gov");
/// assert_eq!(extract_host("http://Example.COM/Path"), "example.com");
/// assert_eq!(extract_host("not a url"), "unknown");
/// ```
#[must_use]
pub fn extract_host(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Parses a Retry-After header value into a Duration.
///
/// Supports integer seconds and HTTP-dates (RFC 7231). Returns `None` if the
/// value cannot be parsed. Caps excessive values at 1 hour.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use trialscan_core::http::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("invalid"), None);
/// ```
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        }

        #[allow(clippy::cast_sign_loss)]
        let duration = Duration::from_secs(seconds as u64);
        return Some(duration.min(MAX_RETRY_AFTER));
    }

    if let Ok(datetime) = httpdate::parse_http_date(header_value) {
        let now = std::time::SystemTime::now();
        Some(
            datetime
                .duration_since(now)
                .map_or(Duration::ZERO, |duration| duration.min(MAX_RETRY_AFTER)),
        )
    } else {
        debug!(header_value, "unparseable Retry-After value");
        None
    }
}
