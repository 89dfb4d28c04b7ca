//! Shared User-Agent strings for upstream HTTP requests.
//!
//! API calls identify the tool; HTML page fetches present a desktop browser
//! because the FDA site serves a stripped mobile page to unknown agents.

/// Project URL for User-Agent identification (good citizenship; RFC 9308).
const PROJECT_UA_URL: &str = "https://github.com/fierce/trialscan";

/// Desktop browser User-Agent for HTML document endpoints.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
    (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36";

/// Default User-Agent for API requests (identifies the tool).
#[must_use]
pub fn default_api_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("trialscan/{version} (research-tool; +{PROJECT_UA_URL})")
}
