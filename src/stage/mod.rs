//! Lookup stages: one request/response round trip against one upstream.
//!
//! # Architecture
//!
//! - [`LookupStage`] - Async trait every stage implements
//! - [`LookupResult`] - Found / not found / error, kept distinct in the output
//! - [`SearchStage`] - E-utilities `esearch`, returning ids
//! - [`TrialPublicationStage`] - `esearch` on a trial's secondary-id field
//! - [`SummaryStage`] - E-utilities `esummary`, returning author/title lines
//! - [`AbstractStage`] - E-utilities `efetch`, returning abstract text
//! - [`FdaPageStage`] - FDA 510(k) page scrape, returning a trial link

mod eutils;
mod fda;

pub use eutils::{AbstractStage, EutilsEndpoint, SearchStage, SummaryStage, TrialPublicationStage};
pub use fda::FdaPageStage;

use std::fmt::Debug;

use async_trait::async_trait;
use tracing::warn;

use crate::extract::{Extraction, ResponseKind};
use crate::http::{RateLimitedClient, RawResponse, UpstreamError};

/// Outcome of one lookup.
#[derive(Debug)]
pub enum LookupResult {
    /// Upstream answered with at least one identifier or fragment.
    Found(Extraction),
    /// Upstream answered, but there was nothing to extract.
    NotFound,
    /// The request failed after retries.
    Error(UpstreamError),
}

impl LookupResult {
    /// Wraps an extraction, mapping an empty one to [`LookupResult::NotFound`].
    #[must_use]
    pub fn from_extraction(extraction: Extraction) -> Self {
        if extraction.is_empty() {
            Self::NotFound
        } else {
            Self::Found(extraction)
        }
    }
}

/// Reads a successful response into a lookup result.
///
/// An unreadable body counts as not found; it is logged and counted in the
/// client's stats so the run summary still shows it.
pub(crate) fn read_response(
    client: &RateLimitedClient,
    kind: &ResponseKind,
    raw: &RawResponse,
    stage: &str,
) -> LookupResult {
    match kind.try_extract(raw, stage) {
        Ok(extraction) => LookupResult::from_extraction(extraction),
        Err(error) => {
            warn!(
                stage,
                host = %raw.host,
                url = %raw.url,
                error = %error,
                "discarding unreadable response"
            );
            client.stats().increment_unreadable();
            LookupResult::NotFound
        }
    }
}

/// A single upstream lookup.
///
/// Uses `async_trait` so stages can be chained as `Arc<dyn LookupStage>`.
#[async_trait]
pub trait LookupStage: Send + Sync + Debug {
    /// Short stage name used in logs and provenance.
    fn name(&self) -> &str;

    /// Looks up one input value (a search term or an identifier).
    async fn lookup(&self, input: &str) -> LookupResult;
}
