//! E-utilities JSON readers (`esearch` and `esummary`).

use std::collections::HashMap;

use serde::Deserialize;

use super::ExtractionError;

#[derive(Debug, Deserialize)]
struct SearchEnvelope {
    esearchresult: SearchResult,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    count: Option<Count>,
    #[serde(default)]
    idlist: Vec<String>,
}

/// Upstream sends counts as strings, but numbers are accepted too.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Count {
    Number(u64),
    Text(String),
}

impl Count {
    fn value(&self) -> u64 {
        match self {
            Self::Number(n) => *n,
            Self::Text(s) => s.trim().parse().unwrap_or(0),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SummaryEnvelope {
    result: SummaryResult,
}

#[derive(Debug, Deserialize)]
struct SummaryResult {
    #[serde(default)]
    uids: Vec<String>,
    #[serde(flatten)]
    records: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct SummaryRecord {
    #[serde(default)]
    sortfirstauthor: String,
    #[serde(default)]
    title: String,
}

/// Reads up to `cap` ids from an `esearch` JSON body.
///
/// A zero count yields no ids even if an `idlist` is present.
pub fn parse_search_ids(body: &str, cap: usize) -> Result<Vec<String>, ExtractionError> {
    let envelope: SearchEnvelope = serde_json::from_str(body)?;
    let result = envelope.esearchresult;
    let count = result
        .count
        .as_ref()
        .map_or(result.idlist.len() as u64, Count::value);
    if count == 0 {
        return Ok(Vec::new());
    }
    Ok(result
        .idlist
        .into_iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .take(cap)
        .collect())
}

/// Reads `"<sortfirstauthor>: <title>"` for every uid in an `esummary` body.
pub fn parse_summaries(body: &str) -> Result<Vec<String>, ExtractionError> {
    let envelope: SummaryEnvelope = serde_json::from_str(body)?;
    let SummaryResult { uids, records } = envelope.result;
    Ok(uids
        .iter()
        .filter_map(|uid| records.get(uid))
        .filter_map(|value| SummaryRecord::deserialize(value).ok())
        .map(|record| {
            format!(
                "{}: {}",
                record.sortfirstauthor.trim(),
                record.title.trim()
            )
        })
        .collect())
}
