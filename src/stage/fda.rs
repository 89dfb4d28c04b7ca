//! FDA 510(k) premarket notification page stage.

use async_trait::async_trait;
use tracing::instrument;

use crate::extract::ResponseKind;
use crate::http::{RateLimitedClient, RequestProfile};

use super::{LookupResult, LookupStage, read_response};

/// Fetches `pmn.cfm?ID=<id>` and returns the first trial link on the page.
#[derive(Debug, Clone)]
pub struct FdaPageStage {
    client: RateLimitedClient,
    page_url: String,
}

impl FdaPageStage {
    /// Creates the stage for a page URL taking the clearance id as `?ID=`.
    #[must_use]
    pub fn new(client: RateLimitedClient, page_url: impl Into<String>) -> Self {
        Self {
            client,
            page_url: page_url.into(),
        }
    }
}

#[async_trait]
impl LookupStage for FdaPageStage {
    fn name(&self) -> &'static str {
        "fda-page"
    }

    #[instrument(skip(self), fields(stage = "fda-page"))]
    async fn lookup(&self, input: &str) -> LookupResult {
        let id = input.trim();
        match self
            .client
            .get(&self.page_url, &[("ID", id)], RequestProfile::Browser)
            .await
        {
            Ok(raw) => read_response(&self.client, &ResponseKind::HtmlPage, &raw, self.name()),
            Err(error) => LookupResult::Error(error),
        }
    }
}
