//! Trialscan Core Library
//!
//! Enriches lists of medical-device and regulatory identifiers by chaining
//! lookups against public registries and literature databases, then joining
//! everything found into one output row per input record.
//!
//! # Architecture
//!
//! Data flows left to right; no module depends on one to its right:
//!
//! - [`query`] - Normalized, deduplicated search expressions
//! - [`http`] - Per-host rate limiting and retrying HTTP transport
//! - [`extract`] - Identifier/text extraction from JSON, HTML and XML bodies
//! - [`stage`] - One upstream round trip per lookup
//! - [`pipeline`] - Seeding, fan-out and joining per record, bounded concurrency
//! - [`sink`] - Input-ordered result collection and CSV output
//!
//! Supporting modules: [`config`] (run settings), [`cancel`] (run-wide
//! cancellation), [`input`] (table loading), [`record`] (row types) and
//! [`jobs`] (the four predefined stage chains).

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cancel;
pub mod config;
pub mod extract;
pub mod http;
pub mod input;
pub mod jobs;
pub mod pipeline;
pub mod query;
pub mod record;
pub mod sink;
pub mod stage;
mod user_agent;

// Re-export commonly used types
pub use cancel::CancellationToken;
pub use config::{ConfigError, DEFAULT_CONCURRENCY, MAX_CONCURRENCY, PipelineConfig};
pub use extract::{Extraction, ExternalIdentifier, IdentifierKind, ResponseKind};
pub use http::{RateLimitedClient, RateLimiter, RetryPolicy, UpstreamError};
pub use input::{InputError, InputTable, read_table, read_table_from_path};
pub use jobs::{Job, build_client};
pub use pipeline::{Pipeline, PipelineError, RunReport, Seeder};
pub use query::{QueryBuilder, SearchTerm};
pub use record::{InputRecord, OutputRow, RecordStatus};
pub use sink::{ResultSink, RunSummary, SinkError, write_rows, write_rows_to_path};
pub use stage::{LookupResult, LookupStage};
pub use user_agent::BROWSER_USER_AGENT;
