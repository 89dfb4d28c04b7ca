//! First-stage inputs derived from an input record.

use std::fmt::Debug;

use crate::extract::extract_nct_id;
use crate::query::QueryBuilder;
use crate::record::InputRecord;

/// Produces the value fed to the first lookup stage.
///
/// `None` means the record has nothing to look up; it is reported as
/// not found without any request.
pub trait Seeder: Send + Sync + Debug {
    /// Returns the first-stage input for a record.
    fn seed(&self, record: &InputRecord) -> Option<String>;
}

/// Builds a literature search term from a name column and an optional
/// qualifier column.
#[derive(Debug, Clone)]
pub struct SearchTermSeed {
    builder: QueryBuilder,
    name_column: String,
    qualifier_column: Option<String>,
}

impl SearchTermSeed {
    /// Creates a seed reading `name_column` and, if given, `qualifier_column`.
    #[must_use]
    pub fn new(
        builder: QueryBuilder,
        name_column: impl Into<String>,
        qualifier_column: Option<String>,
    ) -> Self {
        Self {
            builder,
            name_column: name_column.into(),
            qualifier_column,
        }
    }
}

impl Seeder for SearchTermSeed {
    fn seed(&self, record: &InputRecord) -> Option<String> {
        let name = record.get(&self.name_column)?;
        let qualifier = self
            .qualifier_column
            .as_deref()
            .and_then(|column| record.get(column));
        self.builder
            .build(name, qualifier)
            .map(|term| term.expression().to_string())
    }
}

/// Uses a column's trimmed value as-is.
#[derive(Debug, Clone)]
pub struct FieldSeed {
    column: String,
}

impl FieldSeed {
    /// Creates a seed reading `column`.
    #[must_use]
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
        }
    }
}

impl Seeder for FieldSeed {
    fn seed(&self, record: &InputRecord) -> Option<String> {
        record.get_non_blank(&self.column).map(str::to_string)
    }
}

/// Extracts a trial registry id from a URL column.
#[derive(Debug, Clone)]
pub struct TrialIdSeed {
    column: String,
}

impl TrialIdSeed {
    /// Creates a seed reading the URL in `column`.
    #[must_use]
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
        }
    }
}

impl Seeder for TrialIdSeed {
    fn seed(&self, record: &InputRecord) -> Option<String> {
        record.get_non_blank(&self.column).and_then(extract_nct_id)
    }
}
