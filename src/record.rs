//! Input and output records.

use std::fmt;
use std::str::FromStr;

/// One input row: named fields plus its position in the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputRecord {
    /// Zero-based position in the input; the record's identity.
    pub index: usize,
    fields: Vec<(String, String)>,
}

impl InputRecord {
    /// Creates a record from ordered `(column, value)` pairs.
    #[must_use]
    pub fn new(index: usize, fields: Vec<(String, String)>) -> Self {
        Self { index, fields }
    }

    /// Returns a field's value, or `None` if the column is absent.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.as_str())
    }

    /// Returns a field's trimmed value, treating blank as absent.
    #[must_use]
    pub fn get_non_blank(&self, column: &str) -> Option<&str> {
        self.get(column).map(str::trim).filter(|v| !v.is_empty())
    }
}

/// Final state of one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    /// At least one identifier was found.
    Found,
    /// Every lookup succeeded, but nothing was found.
    NotFound,
    /// At least one lookup failed.
    Error,
    /// The run was cancelled before the record finished.
    Cancelled,
}

impl RecordStatus {
    /// Returns the status string written to the output.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Found => "found",
            Self::NotFound => "not_found",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "found" => Ok(Self::Found),
            "not_found" => Ok(Self::NotFound),
            "error" => Ok(Self::Error),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown record status '{other}'")),
        }
    }
}

/// One output row per input record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRow {
    /// Position of the originating input record.
    pub index: usize,
    /// Key field values copied from the input, in key-column order.
    pub key_fields: Vec<String>,
    /// Record outcome.
    pub status: RecordStatus,
    /// Number of identifiers behind the joined text (0 on error).
    pub found: usize,
    /// Every identifier discovered for the record, in discovery order.
    pub identifiers: Vec<String>,
    /// Tagged fragments joined by the configured separator.
    pub joined_text: String,
}

impl OutputRow {
    /// Row for a record that never ran because the batch was cancelled.
    #[must_use]
    pub fn cancelled(index: usize, key_fields: Vec<String>) -> Self {
        Self {
            index,
            key_fields,
            status: RecordStatus::Cancelled,
            found: 0,
            identifiers: Vec::new(),
            joined_text: String::new(),
        }
    }
}
