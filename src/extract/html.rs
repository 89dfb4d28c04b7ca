//! Trial-link scraping from FDA premarket notification pages.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use tracing::trace;

/// Study page prefix used when only a bare registry id is found.
pub const NCT_STUDY_BASE_URL: &str = "https://www.clinicaltrials.gov/study/";

#[allow(clippy::expect_used)]
static ANCHOR_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("anchor selector is valid")); // Static selector, safe to panic

#[allow(clippy::expect_used)]
static TRIAL_DOMAIN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)clinicaltrials\.gov").expect("trial domain regex is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static NCT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"NCT\d{8}").expect("NCT regex is valid")); // Static pattern, safe to panic

/// Returns the first trial link on a page.
///
/// Older pages carry an anchor to the registry; its `href` is returned
/// trimmed. Newer pages only print the registry id, which is turned into a
/// study URL. Only the first hit is used.
#[must_use]
pub fn extract_trial_link(page: &str) -> Option<String> {
    let document = Html::parse_document(page);

    let anchor = document
        .select(&ANCHOR_SELECTOR)
        .filter_map(|a| a.value().attr("href"))
        .find(|href| TRIAL_DOMAIN_PATTERN.is_match(href))
        .map(str::trim)
        .filter(|href| !href.is_empty());
    if let Some(href) = anchor {
        trace!(href, "found trial anchor");
        return Some(href.to_string());
    }

    let text: String = document.root_element().text().collect();
    let nct = extract_nct_id(&text)?;
    trace!(nct = %nct, "found registry id in page text");
    Some(format!("{NCT_STUDY_BASE_URL}{nct}"))
}

/// Returns the first `NCT` + 8 digit token in `text`.
#[must_use]
pub fn extract_nct_id(text: &str) -> Option<String> {
    NCT_PATTERN.find(text).map(|m| m.as_str().to_string())
}
