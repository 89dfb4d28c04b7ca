//! Delimited-text input loading.
//!
//! Rows are kept even when fields are blank or missing; deciding whether a
//! record has anything to look up is the pipeline's job.

use std::io::Read;
use std::path::Path;

use thiserror::Error;
use tracing::debug;

use crate::record::InputRecord;

/// Errors from reading the input table.
#[derive(Debug, Error)]
pub enum InputError {
    /// The input file could not be opened.
    #[error("failed to open input {path}: {source}")]
    Open {
        /// Input path.
        path: String,
        /// Underlying CSV/IO error.
        #[source]
        source: csv::Error,
    },

    /// A row could not be parsed.
    #[error("malformed input: {0}")]
    Csv(#[from] csv::Error),

    /// A column the job needs is not in the header.
    #[error("input has no column named '{column}' (found: {found})")]
    MissingColumn {
        /// Required column.
        column: String,
        /// Comma-separated header names.
        found: String,
    },
}

/// A loaded input table.
#[derive(Debug, Clone, Default)]
pub struct InputTable {
    /// Header names in file order.
    pub headers: Vec<String>,
    /// Records in file order, indexed from zero.
    pub records: Vec<InputRecord>,
}

impl InputTable {
    /// Checks that every listed column exists.
    ///
    /// # Errors
    ///
    /// Returns [`InputError::MissingColumn`] for the first absent column.
    pub fn require_columns<'a>(
        &self,
        columns: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), InputError> {
        for column in columns {
            if !self.headers.iter().any(|h| h == column) {
                return Err(InputError::MissingColumn {
                    column: column.to_string(),
                    found: self.headers.join(", "),
                });
            }
        }
        Ok(())
    }
}

/// Reads a table with a header row from any reader.
///
/// # Errors
///
/// Returns [`InputError::Csv`] when the data cannot be parsed.
pub fn read_table<R: Read>(reader: R, delimiter: u8) -> Result<InputTable, InputError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(reader);

    let headers: Vec<String> = csv_reader
        .headers()?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect();

    let mut records = Vec::new();
    for (index, row) in csv_reader.records().enumerate() {
        let row = row?;
        let fields = headers
            .iter()
            .zip(row.iter())
            .map(|(name, value)| (name.clone(), value.to_string()))
            .collect();
        records.push(InputRecord::new(index, fields));
    }

    debug!(columns = headers.len(), records = records.len(), "read input table");
    Ok(InputTable { headers, records })
}

/// Reads a table from a file.
///
/// # Errors
///
/// Returns [`InputError::Open`] or [`InputError::Csv`].
pub fn read_table_from_path(path: &Path, delimiter: u8) -> Result<InputTable, InputError> {
    let file = std::fs::File::open(path).map_err(|e| InputError::Open {
        path: path.display().to_string(),
        source: csv::Error::from(e),
    })?;
    read_table(file, delimiter)
}
