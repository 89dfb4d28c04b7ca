//! The four batch jobs, each a fixed chain of lookup stages.
//!
//! | Job | Seed | Stages |
//! |-----|------|--------|
//! | literature | search term from device + company | search (cap 1), summary |
//! | trial-links | 510(k) id | FDA page |
//! | trial-abstracts | registry id from a trial URL | trial publications (cap 20), abstracts |
//! | trial-chain | 510(k) id | FDA page, trial publications, abstracts |

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::config::{ConfigError, PipelineConfig};
use crate::http::{RateLimitedClient, RateLimiter, extract_host};
use crate::pipeline::{FieldSeed, Pipeline, PipelineError, SearchTermSeed, Seeder, TrialIdSeed};
use crate::query::QueryBuilder;
use crate::stage::{
    AbstractStage, EutilsEndpoint, FdaPageStage, LookupStage, SearchStage, SummaryStage,
    TrialPublicationStage,
};

/// Default name column for the literature job.
pub const DEFAULT_DEVICE_COLUMN: &str = "Device";
/// Default qualifier column for the literature job.
pub const DEFAULT_COMPANY_COLUMN: &str = "Company";
/// Default clearance-id column.
pub const DEFAULT_ID_COLUMN: &str = "ID";
/// Default trial URL column.
pub const DEFAULT_TRIAL_URL_COLUMN: &str = "ctgov_url";

/// A batch job and the input columns it reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    /// Device + company to the first matching article summary.
    Literature {
        /// Device name column.
        device_column: String,
        /// Company column; blank values drop the affiliation clause.
        company_column: Option<String>,
    },
    /// 510(k) id to the trial link on its FDA page.
    TrialLinks {
        /// Clearance id column.
        id_column: String,
    },
    /// Trial URL to the abstracts of every linked publication.
    TrialAbstracts {
        /// Key column copied to the output.
        id_column: String,
        /// Trial URL column.
        url_column: String,
    },
    /// 510(k) id through FDA page and trial publications to abstracts.
    TrialChain {
        /// Clearance id column.
        id_column: String,
    },
}

impl Job {
    /// Job name as used on the command line.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Literature { .. } => "literature",
            Self::TrialLinks { .. } => "trial-links",
            Self::TrialAbstracts { .. } => "trial-abstracts",
            Self::TrialChain { .. } => "trial-chain",
        }
    }

    /// True when the job calls E-utilities and so needs a contact email.
    #[must_use]
    pub fn needs_contact(&self) -> bool {
        !matches!(self, Self::TrialLinks { .. })
    }

    /// Columns copied from the input into every output row.
    #[must_use]
    pub fn key_columns(&self) -> Vec<String> {
        match self {
            Self::Literature {
                device_column,
                company_column,
            } => std::iter::once(device_column.clone())
                .chain(company_column.clone())
                .collect(),
            Self::TrialLinks { id_column } | Self::TrialChain { id_column } => {
                vec![id_column.clone()]
            }
            Self::TrialAbstracts {
                id_column,
                url_column,
            } => vec![id_column.clone(), url_column.clone()],
        }
    }

    fn seeder(&self, config: &PipelineConfig) -> Arc<dyn Seeder> {
        match self {
            Self::Literature {
                device_column,
                company_column,
            } => Arc::new(SearchTermSeed::new(
                QueryBuilder::from_config(config),
                device_column.clone(),
                company_column.clone(),
            )),
            Self::TrialLinks { id_column } | Self::TrialChain { id_column } => {
                Arc::new(FieldSeed::new(id_column.clone()))
            }
            Self::TrialAbstracts { url_column, .. } => Arc::new(TrialIdSeed::new(url_column.clone())),
        }
    }

    fn stages(
        &self,
        config: &PipelineConfig,
        client: &RateLimitedClient,
    ) -> Vec<Arc<dyn LookupStage>> {
        let endpoint = EutilsEndpoint::from_config(config);
        let fda = || -> Arc<dyn LookupStage> {
            Arc::new(FdaPageStage::new(client.clone(), config.fda_page_url.clone()))
        };
        let publications = || -> Arc<dyn LookupStage> {
            Arc::new(TrialPublicationStage::new(
                client.clone(),
                endpoint.clone(),
                config.trial_publication_cap,
            ))
        };
        let abstracts = || -> Arc<dyn LookupStage> {
            Arc::new(AbstractStage::new(client.clone(), endpoint.clone()))
        };

        match self {
            Self::Literature { .. } => vec![
                Arc::new(SearchStage::new(
                    client.clone(),
                    endpoint.clone(),
                    config.literature_cap,
                )),
                Arc::new(SummaryStage::new(client.clone(), endpoint.clone())),
            ],
            Self::TrialLinks { .. } => vec![fda()],
            Self::TrialAbstracts { .. } => vec![publications(), abstracts()],
            Self::TrialChain { .. } => vec![fda(), publications(), abstracts()],
        }
    }

    /// Builds the job's pipeline over a shared client.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] for an invalid concurrency setting.
    pub fn build_pipeline(
        &self,
        config: &PipelineConfig,
        client: &RateLimitedClient,
    ) -> Result<Pipeline, PipelineError> {
        debug!(job = self.name(), "building pipeline");
        Pipeline::new(
            self.seeder(config),
            self.stages(config, client),
            self.key_columns(),
            config.join_separator.clone(),
            config.concurrency,
        )
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Builds the per-host rate limiter: NCBI at its policy interval, the FDA
/// site and anything else at the page interval.
#[must_use]
pub fn build_rate_limiter(config: &PipelineConfig) -> RateLimiter {
    let ncbi_interval = config.effective_ncbi_interval();
    debug!(
        ncbi_host = %extract_host(&config.eutils_base_url),
        ncbi_interval_ms = ncbi_interval.as_millis(),
        page_interval_ms = config.page_interval.as_millis(),
        "configured rate budgets"
    );
    RateLimiter::new(config.page_interval)
        .with_host_interval(&config.eutils_base_url, ncbi_interval)
        .with_host_interval(&config.fda_page_url, config.page_interval)
}

/// Builds the shared client for a run.
///
/// # Errors
///
/// Returns [`ConfigError::HttpClient`] when the HTTP client cannot be built.
pub fn build_client(config: &PipelineConfig) -> Result<RateLimitedClient, ConfigError> {
    RateLimitedClient::with_timeouts(
        Arc::new(build_rate_limiter(config)),
        config.retry_policy(),
        config.credentials(),
        config.connect_timeout,
        config.request_timeout,
    )
}
