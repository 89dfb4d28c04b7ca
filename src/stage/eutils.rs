//! NCBI E-utilities stages (`esearch`, `esummary`, `efetch`).

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::config::PipelineConfig;
use crate::extract::{IdentifierKind, ResponseKind, extract_nct_id};
use crate::http::{RateLimitedClient, RequestProfile};

use super::{LookupResult, LookupStage, read_response};

const ABSTRACT_TAG: &str = "AbstractText";

/// Base URL and database shared by every E-utilities stage.
#[derive(Debug, Clone)]
pub struct EutilsEndpoint {
    base_url: String,
    database: String,
}

impl EutilsEndpoint {
    /// Creates an endpoint; `base_url` is the directory holding the `.fcgi` scripts.
    #[must_use]
    pub fn new(base_url: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            database: database.into(),
        }
    }

    /// Creates an endpoint from run configuration.
    #[must_use]
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(&config.eutils_base_url, &config.database)
    }

    fn script_url(&self, script: &str) -> String {
        format!("{}/{script}", self.base_url)
    }

    async fn fetch(
        &self,
        client: &RateLimitedClient,
        stage: &str,
        script: &str,
        params: &[(&str, &str)],
        kind: &ResponseKind,
    ) -> LookupResult {
        let mut query = vec![("db", self.database.as_str())];
        query.extend_from_slice(params);
        match client
            .get(&self.script_url(script), &query, RequestProfile::Api)
            .await
        {
            Ok(raw) => read_response(client, kind, &raw, stage),
            Err(error) => LookupResult::Error(error),
        }
    }
}

/// `esearch`: search term in, up to `cap` ids out.
#[derive(Debug, Clone)]
pub struct SearchStage {
    client: RateLimitedClient,
    endpoint: EutilsEndpoint,
    cap: usize,
}

impl SearchStage {
    /// Creates a search stage keeping at most `cap` ids.
    #[must_use]
    pub fn new(client: RateLimitedClient, endpoint: EutilsEndpoint, cap: usize) -> Self {
        Self {
            client,
            endpoint,
            cap,
        }
    }

    async fn search(&self, stage: &str, term: &str) -> LookupResult {
        let retmax = self.cap.to_string();
        let kind = ResponseKind::SearchResult {
            cap: self.cap,
            kind: IdentifierKind::Pmid,
        };
        self.endpoint
            .fetch(
                &self.client,
                stage,
                "esearch.fcgi",
                &[("term", term), ("retmode", "json"), ("retmax", &retmax)],
                &kind,
            )
            .await
    }
}

#[async_trait]
impl LookupStage for SearchStage {
    fn name(&self) -> &'static str {
        "search"
    }

    #[instrument(skip(self, input), fields(stage = "search"))]
    async fn lookup(&self, input: &str) -> LookupResult {
        self.search(self.name(), input).await
    }
}

/// `esearch` on the secondary source id field of a registered trial.
///
/// Accepts a bare registry id or any text containing one (a study URL).
#[derive(Debug, Clone)]
pub struct TrialPublicationStage {
    search: SearchStage,
}

impl TrialPublicationStage {
    /// Creates the stage keeping at most `cap` publications per trial.
    #[must_use]
    pub fn new(client: RateLimitedClient, endpoint: EutilsEndpoint, cap: usize) -> Self {
        Self {
            search: SearchStage::new(client, endpoint, cap),
        }
    }
}

#[async_trait]
impl LookupStage for TrialPublicationStage {
    fn name(&self) -> &'static str {
        "trial-publications"
    }

    #[instrument(skip(self, input), fields(stage = "trial-publications"))]
    async fn lookup(&self, input: &str) -> LookupResult {
        let Some(nct) = extract_nct_id(input) else {
            debug!(input, "no registry id in input");
            return LookupResult::NotFound;
        };
        let term = format!("{nct}[si]");
        self.search.search(self.name(), &term).await
    }
}

/// `esummary`: one id in, `"<first author>: <title>"` out.
#[derive(Debug, Clone)]
pub struct SummaryStage {
    client: RateLimitedClient,
    endpoint: EutilsEndpoint,
}

impl SummaryStage {
    /// Creates a summary stage.
    #[must_use]
    pub fn new(client: RateLimitedClient, endpoint: EutilsEndpoint) -> Self {
        Self { client, endpoint }
    }
}

#[async_trait]
impl LookupStage for SummaryStage {
    fn name(&self) -> &'static str {
        "summary"
    }

    #[instrument(skip(self), fields(stage = "summary"))]
    async fn lookup(&self, input: &str) -> LookupResult {
        self.endpoint
            .fetch(
                &self.client,
                self.name(),
                "esummary.fcgi",
                &[("id", input), ("retmode", "json")],
                &ResponseKind::Summary,
            )
            .await
    }
}

/// `efetch`: one id in, the article's abstract text out.
#[derive(Debug, Clone)]
pub struct AbstractStage {
    client: RateLimitedClient,
    endpoint: EutilsEndpoint,
}

impl AbstractStage {
    /// Creates an abstract stage.
    #[must_use]
    pub fn new(client: RateLimitedClient, endpoint: EutilsEndpoint) -> Self {
        Self { client, endpoint }
    }
}

#[async_trait]
impl LookupStage for AbstractStage {
    fn name(&self) -> &'static str {
        "abstracts"
    }

    #[instrument(skip(self), fields(stage = "abstracts"))]
    async fn lookup(&self, input: &str) -> LookupResult {
        let kind = ResponseKind::XmlDocument {
            tag: ABSTRACT_TAG.to_string(),
        };
        self.endpoint
            .fetch(
                &self.client,
                self.name(),
                "efetch.fcgi",
                &[("id", input), ("retmode", "xml")],
                &kind,
            )
            .await
    }
}
