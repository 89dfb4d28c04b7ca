//! Multi-stage lookup pipeline.
//!
//! Each record is seeded, run through the first stage, then fanned out: every
//! identifier a stage discovers drives one lookup in the next stage. Text
//! fragments are tagged with the identifier behind them and joined into a
//! single output row.
//!
//! # Concurrency Model
//!
//! - Each record runs in its own Tokio task
//! - A semaphore permit is acquired before starting each record
//! - Fan-out branches inside one record run one at a time
//! - Rows are reordered by input index before they are returned
//!
//! # Cancellation
//!
//! A shared [`CancellationToken`] is checked before every lookup. It is
//! cancelled externally (e.g. on Ctrl+C) or by the pipeline itself when an
//! API rejects the contact credentials. In-flight requests finish; records
//! never started, or cut short between lookups, are reported as `cancelled`.

mod seed;

pub use seed::{FieldSeed, SearchTermSeed, Seeder, TrialIdSeed};

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn};

use crate::cancel::CancellationToken;
use crate::config::MAX_CONCURRENCY;
use crate::extract::ExternalIdentifier;
use crate::http::{UpstreamError, classify_error};
use crate::record::{InputRecord, OutputRow, RecordStatus};
use crate::sink::{ResultSink, RunSummary, SinkError};
use crate::stage::{LookupResult, LookupStage};

/// Errors that stop a whole batch. Per-record failures never surface here.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A pipeline needs at least one stage.
    #[error("pipeline has no stages")]
    NoStages,

    /// Concurrency outside the supported range.
    #[error("invalid concurrency value {value}: must be between 1 and {MAX_CONCURRENCY}")]
    InvalidConcurrency {
        /// The rejected value.
        value: usize,
    },

    /// Semaphore was closed unexpectedly.
    #[error("semaphore closed unexpectedly")]
    SemaphoreClosed,

    /// Rows could not be collected in order.
    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// Rows in input order plus status counts.
#[derive(Debug)]
pub struct RunReport {
    /// One row per input record, in input order.
    pub rows: Vec<OutputRow>,
    /// Status counts over `rows`.
    pub summary: RunSummary,
    /// True when the run stopped early.
    pub cancelled: bool,
}

#[derive(Debug)]
struct Shared {
    seeder: Arc<dyn Seeder>,
    stages: Vec<Arc<dyn LookupStage>>,
    key_columns: Vec<String>,
    join_separator: String,
}

/// Chains lookup stages over a batch of records.
#[derive(Debug)]
pub struct Pipeline {
    shared: Arc<Shared>,
    concurrency: usize,
}

impl Pipeline {
    /// Creates a pipeline.
    ///
    /// `key_columns` are copied from each input record into its output row.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NoStages`] or
    /// [`PipelineError::InvalidConcurrency`].
    #[instrument(level = "debug", skip(seeder, stages, key_columns, join_separator))]
    pub fn new(
        seeder: Arc<dyn Seeder>,
        stages: Vec<Arc<dyn LookupStage>>,
        key_columns: Vec<String>,
        join_separator: impl Into<String>,
        concurrency: usize,
    ) -> Result<Self, PipelineError> {
        if stages.is_empty() {
            return Err(PipelineError::NoStages);
        }
        if !(1..=MAX_CONCURRENCY).contains(&concurrency) {
            return Err(PipelineError::InvalidConcurrency { value: concurrency });
        }

        debug!(
            stages = ?stages.iter().map(|s| s.name().to_string()).collect::<Vec<_>>(),
            "created pipeline"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                seeder,
                stages,
                key_columns,
                join_separator: join_separator.into(),
            }),
            concurrency,
        })
    }

    /// Returns the configured concurrency limit.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Returns the key columns copied into every row.
    #[must_use]
    pub fn key_columns(&self) -> &[String] {
        &self.shared.key_columns
    }

    /// Processes a batch and returns one row per record in input order.
    ///
    /// Record-level failures become `error` rows; they never fail the batch.
    /// Record indices must be `0..records.len()`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] only for internal failures (closed
    /// semaphore, row bookkeeping).
    #[instrument(skip(self, records, cancel), fields(records = records.len(), concurrency = self.concurrency))]
    pub async fn run(
        &self,
        records: Vec<InputRecord>,
        cancel: CancellationToken,
    ) -> Result<RunReport, PipelineError> {
        let total = records.len();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut sink = ResultSink::new();
        let mut handles = Vec::with_capacity(total);

        info!("starting batch");

        let mut pending = records.into_iter();
        for record in pending.by_ref() {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|_| PipelineError::SemaphoreClosed)?;

            if cancel.is_cancelled() {
                sink.push(OutputRow::cancelled(
                    record.index,
                    self.shared.key_fields(&record),
                ))?;
                break;
            }

            let shared = Arc::clone(&self.shared);
            let cancel = cancel.clone();
            let index = record.index;
            let key_fields = shared.key_fields(&record);
            handles.push((
                index,
                key_fields,
                tokio::spawn(async move {
                    let _permit = permit;
                    process_record(&shared, &record, &cancel).await
                }),
            ));
        }

        for record in pending {
            sink.push(OutputRow::cancelled(
                record.index,
                self.shared.key_fields(&record),
            ))?;
        }

        debug!(task_count = handles.len(), "waiting for records to complete");

        for (index, key_fields, handle) in handles {
            let row = match handle.await {
                Ok(row) => row,
                Err(e) => {
                    warn!(record = index, error = %e, "record task panicked");
                    OutputRow {
                        index,
                        key_fields,
                        status: RecordStatus::Error,
                        found: 0,
                        identifiers: Vec::new(),
                        joined_text: "ERROR: internal task failure".to_string(),
                    }
                }
            };
            sink.push(row)?;
        }

        let rows = sink.finish(total)?;
        let summary = RunSummary::from_rows(&rows);
        let cancelled = cancel.is_cancelled();
        info!(
            records = summary.records,
            found = summary.found,
            not_found = summary.not_found,
            errors = summary.errors,
            cancelled = summary.cancelled,
            "batch complete"
        );

        Ok(RunReport {
            rows,
            summary,
            cancelled,
        })
    }
}

impl Shared {
    fn key_fields(&self, record: &InputRecord) -> Vec<String> {
        self.key_columns
            .iter()
            .map(|column| record.get(column).unwrap_or_default().to_string())
            .collect()
    }
}

/// Accumulates one record's lookups.
#[derive(Debug, Default)]
struct RecordState {
    identifiers: Vec<String>,
    fragments: Vec<String>,
    found: usize,
    errored: bool,
    cancelled: bool,
}

impl RecordState {
    fn record_error(&mut self, tag: Option<&str>, error: &UpstreamError, cancel: &CancellationToken) {
        if error.is_cancelled() {
            self.cancelled = true;
            return;
        }
        let marker = format!("ERROR: {}", error.marker());
        self.fragments.push(match tag {
            Some(tag) => format!("{tag}: {marker}"),
            None => marker,
        });
        self.errored = true;

        if classify_error(error).is_fatal() && cancel.cancel() {
            error!(error = %error, "upstream rejected credentials; stopping new requests");
        }
    }

    fn into_row(self, index: usize, key_fields: Vec<String>, separator: &str) -> OutputRow {
        let status = if self.cancelled {
            RecordStatus::Cancelled
        } else if self.errored {
            RecordStatus::Error
        } else if self.found > 0 {
            RecordStatus::Found
        } else {
            RecordStatus::NotFound
        };
        let found = if self.errored || self.cancelled {
            0
        } else {
            self.found
        };
        OutputRow {
            index,
            key_fields,
            status,
            found,
            identifiers: self.identifiers,
            joined_text: self.fragments.join(separator),
        }
    }
}

#[instrument(skip_all, fields(record = record.index))]
async fn process_record(
    shared: &Shared,
    record: &InputRecord,
    cancel: &CancellationToken,
) -> OutputRow {
    let key_fields = shared.key_fields(record);
    let mut state = RecordState::default();

    let Some(seed) = shared.seeder.seed(record) else {
        debug!("no lookup input; skipping");
        return state.into_row(record.index, key_fields, &shared.join_separator);
    };

    let Some((first, rest)) = shared.stages.split_first() else {
        return state.into_row(record.index, key_fields, &shared.join_separator);
    };

    if cancel.is_cancelled() {
        state.cancelled = true;
        return state.into_row(record.index, key_fields, &shared.join_separator);
    }

    let mut frontier: Vec<ExternalIdentifier> = match first.lookup(&seed).await {
        LookupResult::Found(extraction) => {
            state.fragments.extend(extraction.fragments);
            extraction.identifiers
        }
        LookupResult::NotFound => Vec::new(),
        LookupResult::Error(error) => {
            state.record_error(None, &error, cancel);
            Vec::new()
        }
    };
    state
        .identifiers
        .extend(frontier.iter().map(ExternalIdentifier::label));
    state.found = frontier.len();

    'stages: for stage in rest {
        if frontier.is_empty() {
            break;
        }
        state.found = frontier.len();

        let mut next = Vec::new();
        for identifier in &frontier {
            if cancel.is_cancelled() {
                state.cancelled = true;
                break 'stages;
            }
            let tag = identifier.label();
            match stage.lookup(&identifier.value).await {
                LookupResult::Found(extraction) => {
                    if !extraction.fragments.is_empty() {
                        state
                            .fragments
                            .push(format!("{tag}: {}", extraction.fragments.join(" ")));
                    }
                    state
                        .identifiers
                        .extend(extraction.identifiers.iter().map(ExternalIdentifier::label));
                    next.extend(extraction.identifiers);
                }
                LookupResult::NotFound => {
                    debug!(stage = stage.name(), identifier = %tag, "nothing found");
                }
                LookupResult::Error(error) => {
                    state.record_error(Some(&tag), &error, cancel);
                }
            }
        }
        frontier = next;
    }

    let row = state.into_row(record.index, key_fields, &shared.join_separator);
    debug!(status = %row.status, found = row.found, "record complete");
    row
}
