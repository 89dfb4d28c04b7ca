//! Search-expression construction for literature lookups.
//!
//! A device name (and optional company qualifier) becomes one boolean
//! expression over title/abstract and affiliation fields. Names are
//! normalized first so that trademark glyphs and diacritics never reach the
//! upstream, then expanded into a small set of spelling variants.
//!
//! # Example
//!
//! ```
//! use trialscan_core::query::QueryBuilder;
//!
//! let builder = QueryBuilder::new("mortality", "humans[mh]");
//! let term = builder.build("Watchman™ FLX", Some("Boston Scientific")).unwrap();
//! assert!(term.expression().starts_with("(\"Watchman FLX\"[tiab]"));
//! ```

use std::fmt;

use tracing::trace;
use unicode_normalization::UnicodeNormalization;
use url::form_urlencoded;

use crate::config::PipelineConfig;

const TRADEMARK_GLYPHS: [char; 3] = ['®', '™', '©'];

/// A normalized, deterministic search expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchTerm {
    expression: String,
}

impl SearchTerm {
    /// Wraps an already-built expression (e.g. `NCT01234567[si]`).
    #[must_use]
    pub fn raw(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
        }
    }

    /// Returns the unencoded boolean expression.
    #[must_use]
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Returns the expression form-encoded (spaces as `+`), as it appears on the wire.
    #[must_use]
    pub fn encoded(&self) -> String {
        form_urlencoded::byte_serialize(self.expression.as_bytes()).collect()
    }
}

impl fmt::Display for SearchTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

/// Builds literature search terms from a primary name and optional qualifier.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    outcome_terms: String,
    population_filter: String,
}

impl QueryBuilder {
    /// Creates a builder with fixed outcome and population clauses.
    #[must_use]
    pub fn new(outcome_terms: impl Into<String>, population_filter: impl Into<String>) -> Self {
        Self {
            outcome_terms: outcome_terms.into(),
            population_filter: population_filter.into(),
        }
    }

    /// Creates a builder from run configuration.
    #[must_use]
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(&config.outcome_terms, &config.population_filter)
    }

    /// Builds the expression for one record.
    ///
    /// Returns `None` when the name is blank after normalization. A blank
    /// qualifier omits the affiliation clause.
    #[must_use]
    pub fn build(&self, name: &str, qualifier: Option<&str>) -> Option<SearchTerm> {
        let name_variants = spelling_variants(name);
        if name_variants.is_empty() {
            return None;
        }

        let mut expression = field_clause(&name_variants, "tiab");

        let qualifier_variants = qualifier.map(spelling_variants).unwrap_or_default();
        if !qualifier_variants.is_empty() {
            expression.push_str(" AND ");
            expression.push_str(&field_clause(&qualifier_variants, "ad"));
        }

        let outcome = self.outcome_terms.trim();
        if !outcome.is_empty() {
            expression.push_str(" AND (");
            expression.push_str(outcome);
            expression.push(')');
        }

        let population = self.population_filter.trim();
        if !population.is_empty() {
            expression.push_str(" AND ");
            expression.push_str(population);
        }

        trace!(expression = %expression, "built search term");
        Some(SearchTerm { expression })
    }
}

/// Normalizes a free-text name: trademark glyphs removed, diacritics folded
/// to ASCII, whitespace collapsed and trimmed.
#[must_use]
pub fn normalize_name(raw: &str) -> String {
    let stripped: String = raw.chars().filter(|c| !TRADEMARK_GLYPHS.contains(c)).collect();
    let ascii: String = stripped.nfkd().filter(char::is_ascii).collect();
    ascii.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Returns `{canonical, no spaces, spaces as hyphens}` with duplicates
/// removed, in that order. Empty when the name normalizes to nothing.
#[must_use]
pub fn spelling_variants(raw: &str) -> Vec<String> {
    let canonical = normalize_name(raw);
    if canonical.is_empty() {
        return Vec::new();
    }

    let mut variants = Vec::with_capacity(3);
    for candidate in [
        canonical.clone(),
        canonical.replace(' ', ""),
        canonical.replace(' ', "-"),
    ] {
        if !variants.contains(&candidate) {
            variants.push(candidate);
        }
    }
    variants
}

fn field_clause(variants: &[String], field: &str) -> String {
    let parts: Vec<String> = variants
        .iter()
        .map(|v| format!("\"{}\"[{field}]", v.replace('"', "")))
        .collect();
    format!("({})", parts.join(" OR "))
}
