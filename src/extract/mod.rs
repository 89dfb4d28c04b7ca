//! Identifier and text extraction from upstream responses.
//!
//! Each [`ResponseKind`] knows how to read one response shape. Extraction
//! never fails outward: a malformed body is logged and yields an empty
//! [`Extraction`], which the pipeline treats like a confirmed empty result.

mod html;
mod json;
mod xml;

use std::fmt;

use thiserror::Error;
use tracing::warn;

use crate::http::RawResponse;

pub use html::{NCT_STUDY_BASE_URL, extract_nct_id, extract_trial_link};
pub use json::{parse_search_ids, parse_summaries};
pub use xml::collect_element_text;

/// What an extracted identifier refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentifierKind {
    /// `PubMed` article id.
    Pmid,
    /// ClinicalTrials.gov registry id (`NCT` + 8 digits).
    NctId,
    /// ClinicalTrials.gov study URL.
    TrialUrl,
}

impl IdentifierKind {
    fn tag(self) -> &'static str {
        match self {
            Self::Pmid => "PMID",
            Self::NctId => "NCT",
            Self::TrialUrl => "URL",
        }
    }
}

/// Where an identifier came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    /// Name of the stage that extracted it.
    pub stage: String,
    /// Upstream host that served the response.
    pub host: String,
}

/// A typed reference found in an upstream response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalIdentifier {
    /// Identifier type.
    pub kind: IdentifierKind,
    /// Raw value (`"31415926"`, `"NCT01234567"`, a URL).
    pub value: String,
    /// Stage and host that produced it.
    pub provenance: Provenance,
}

impl ExternalIdentifier {
    /// Creates an identifier with provenance.
    #[must_use]
    pub fn new(
        kind: IdentifierKind,
        value: impl Into<String>,
        stage: &str,
        host: &str,
    ) -> Self {
        Self {
            kind,
            value: value.into(),
            provenance: Provenance {
                stage: stage.to_string(),
                host: host.to_string(),
            },
        }
    }

    /// Tag used when joining fragments, e.g. `PMID-31415926`.
    ///
    /// Registry ids and URLs are self-describing and are used verbatim.
    #[must_use]
    pub fn label(&self) -> String {
        match self.kind {
            IdentifierKind::Pmid => format!("{}-{}", self.kind.tag(), self.value),
            IdentifierKind::NctId | IdentifierKind::TrialUrl => self.value.clone(),
        }
    }
}

impl fmt::Display for ExternalIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Identifiers and text fragments read from one response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    /// Identifiers in document order.
    pub identifiers: Vec<ExternalIdentifier>,
    /// Text fragments in document order.
    pub fragments: Vec<String>,
}

impl Extraction {
    /// Returns true when nothing was extracted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.identifiers.is_empty() && self.fragments.is_empty()
    }
}

/// Body parse failure. [`ResponseKind::extract`] turns it into an empty result.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Body is not the expected JSON document.
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Body is not well-formed XML.
    #[error("malformed XML: {0}")]
    Xml(String),
}

/// The response shapes the pipeline knows how to read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseKind {
    /// E-utilities search result; keeps at most `cap` ids of type `kind`.
    SearchResult {
        /// Maximum ids kept.
        cap: usize,
        /// Type assigned to the ids.
        kind: IdentifierKind,
    },
    /// E-utilities summary; one `"<first author>: <title>"` fragment per uid.
    Summary,
    /// HTML page; first trial link or registry id.
    HtmlPage,
    /// XML document; inner text of every element named `tag`, joined.
    XmlDocument {
        /// Element name to collect.
        tag: String,
    },
}

impl ResponseKind {
    /// Extracts from a response body. Never fails.
    #[must_use]
    pub fn extract(&self, raw: &RawResponse, stage: &str) -> Extraction {
        match self.try_extract(raw, stage) {
            Ok(extraction) => extraction,
            Err(error) => {
                warn!(
                    stage,
                    host = %raw.host,
                    url = %raw.url,
                    error = %error,
                    "discarding unreadable response"
                );
                Extraction::default()
            }
        }
    }

    /// Extracts from a response body, reporting unreadable bodies.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractionError`] when the body is not the expected shape.
    pub fn try_extract(
        &self,
        raw: &RawResponse,
        stage: &str,
    ) -> Result<Extraction, ExtractionError> {
        let mut extraction = Extraction::default();
        match self {
            Self::SearchResult { cap, kind } => {
                extraction.identifiers = parse_search_ids(&raw.body, *cap)?
                    .into_iter()
                    .map(|id| ExternalIdentifier::new(*kind, id, stage, &raw.host))
                    .collect();
            }
            Self::Summary => {
                extraction.fragments = parse_summaries(&raw.body)?;
            }
            Self::HtmlPage => {
                if let Some(link) = extract_trial_link(&raw.body) {
                    extraction.identifiers.push(ExternalIdentifier::new(
                        IdentifierKind::TrialUrl,
                        link,
                        stage,
                        &raw.host,
                    ));
                }
            }
            Self::XmlDocument { tag } => {
                let text = collect_element_text(&raw.body, tag)?;
                if !text.is_empty() {
                    extraction.fragments.push(text);
                }
            }
        }
        Ok(extraction)
    }
}
