//! Ordered result collection and CSV output.
//!
//! Workers finish in any order; the sink buffers rows by input index and
//! hands them back in input order once the batch is complete.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use thiserror::Error;
use tracing::{debug, info};

use crate::record::{OutputRow, RecordStatus};

/// Fixed columns written after the key columns.
pub const RESULT_COLUMNS: [&str; 4] = ["status", "found", "identifiers", "joined_text"];

/// Separator between identifiers in the `identifiers` column.
pub const IDENTIFIER_SEPARATOR: &str = " ";

/// Errors from collecting or writing results.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Two rows were pushed for the same input index.
    #[error("duplicate row for input record {index}")]
    DuplicateRow {
        /// Input index.
        index: usize,
    },

    /// The batch finished without a row for some input record.
    #[error("missing row for input record {index}")]
    MissingRow {
        /// Input index.
        index: usize,
    },

    /// The output file could not be created.
    #[error("failed to create output file {path}: {source}")]
    Create {
        /// Output path.
        path: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Writing CSV failed.
    #[error("failed to write output: {0}")]
    Csv(#[from] csv::Error),

    /// Flushing the writer failed.
    #[error("failed to flush output: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-status row counts for the end-of-run summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Rows written.
    pub records: usize,
    /// Rows with status `found`.
    pub found: usize,
    /// Rows with status `not_found`.
    pub not_found: usize,
    /// Rows with status `error`.
    pub errors: usize,
    /// Rows with status `cancelled`.
    pub cancelled: usize,
}

impl RunSummary {
    /// Counts statuses over a set of rows.
    #[must_use]
    pub fn from_rows(rows: &[OutputRow]) -> Self {
        let mut summary = Self {
            records: rows.len(),
            ..Self::default()
        };
        for row in rows {
            match row.status {
                RecordStatus::Found => summary.found += 1,
                RecordStatus::NotFound => summary.not_found += 1,
                RecordStatus::Error => summary.errors += 1,
                RecordStatus::Cancelled => summary.cancelled += 1,
            }
        }
        summary
    }
}

/// Buffers rows by input index and releases them in input order.
#[derive(Debug, Default)]
pub struct ResultSink {
    rows: BTreeMap<usize, OutputRow>,
}

impl ResultSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a finished row.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::DuplicateRow`] if the index was already pushed.
    pub fn push(&mut self, row: OutputRow) -> Result<(), SinkError> {
        let index = row.index;
        if self.rows.insert(index, row).is_some() {
            return Err(SinkError::DuplicateRow { index });
        }
        Ok(())
    }

    /// Number of rows collected so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true when no rows were collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns all rows in input order, checking that indices `0..expected`
    /// are all present.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::MissingRow`] for the first absent index.
    pub fn finish(self, expected: usize) -> Result<Vec<OutputRow>, SinkError> {
        if let Some(index) = (0..expected).find(|i| !self.rows.contains_key(i)) {
            return Err(SinkError::MissingRow { index });
        }
        debug!(rows = self.rows.len(), "result sink complete");
        Ok(self.rows.into_values().collect())
    }
}

/// Writes rows as delimited text with a header line.
///
/// # Errors
///
/// Returns [`SinkError`] when serialization or IO fails.
pub fn write_rows<W: Write>(
    writer: W,
    key_columns: &[String],
    rows: &[OutputRow],
    delimiter: u8,
) -> Result<(), SinkError> {
    let mut csv_writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .from_writer(writer);

    let header = key_columns
        .iter()
        .map(String::as_str)
        .chain(RESULT_COLUMNS);
    csv_writer.write_record(header)?;

    for row in rows {
        let found = row.found.to_string();
        let identifiers = row.identifiers.join(IDENTIFIER_SEPARATOR);
        let record = row
            .key_fields
            .iter()
            .map(String::as_str)
            .chain([
                row.status.as_str(),
                found.as_str(),
                identifiers.as_str(),
                row.joined_text.as_str(),
            ]);
        csv_writer.write_record(record)?;
    }
    csv_writer.flush()?;
    Ok(())
}

/// Writes rows to a file, replacing it.
///
/// # Errors
///
/// Returns [`SinkError`] when the file cannot be created or written.
pub fn write_rows_to_path(
    path: &Path,
    key_columns: &[String],
    rows: &[OutputRow],
    delimiter: u8,
) -> Result<(), SinkError> {
    let file = File::create(path).map_err(|source| SinkError::Create {
        path: path.display().to_string(),
        source,
    })?;
    write_rows(file, key_columns, rows, delimiter)?;
    info!(path = %path.display(), rows = rows.len(), "wrote results");
    Ok(())
}
