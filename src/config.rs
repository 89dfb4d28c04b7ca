//! Static run configuration: contact tokens, query clauses, endpoints and
//! transport limits.
//!
//! Values are layered: built-in defaults, then an optional `key = value`
//! config file, then environment variables, then CLI flags (applied by the
//! binary). [`PipelineConfig::validate`] runs before any request is sent.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::http::{ApiCredentials, DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_ATTEMPTS, RetryPolicy};

/// Default outcome clause appended to every literature search.
pub const DEFAULT_OUTCOME_TERMS: &str =
    "mortality OR morbidity OR \"length of stay\" OR readmission OR complication*";

/// Default population filter appended to every literature search.
pub const DEFAULT_POPULATION_FILTER: &str = "humans[mh]";

/// NCBI E-utilities base URL.
pub const DEFAULT_EUTILS_BASE_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";

/// FDA 510(k) premarket notification page.
pub const DEFAULT_FDA_PAGE_URL: &str =
    "https://www.accessdata.fda.gov/scripts/cdrh/cfdocs/cfPMN/pmn.cfm";

/// Join separator for text fragments inside one output cell.
pub const DEFAULT_JOIN_SEPARATOR: &str = " │ ";

/// Default worker pool size.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Maximum worker pool size.
pub const MAX_CONCURRENCY: usize = 32;

const NCBI_INTERVAL: Duration = Duration::from_millis(350);
const NCBI_INTERVAL_WITH_KEY: Duration = Duration::from_millis(100);
const PAGE_INTERVAL: Duration = Duration::from_millis(350);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Configuration errors. Always fatal, raised before any record is processed.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A setting the selected job needs is absent.
    #[error("missing required setting `{key}`: {hint}")]
    Missing {
        /// Setting name.
        key: &'static str,
        /// How to provide it.
        hint: &'static str,
    },

    /// A setting holds an unusable value.
    #[error("invalid value for `{key}`: {reason}")]
    Invalid {
        /// Setting name.
        key: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// The config file is not valid `key = value` syntax.
    #[error("config syntax error on line {line}: {reason}")]
    Syntax {
        /// 1-indexed line number.
        line: usize,
        /// What was wrong.
        reason: String,
    },

    /// The config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// Config file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The HTTP client could not be constructed.
    #[error("HTTP client construction failed: {0}")]
    HttpClient(String),
}

impl ConfigError {
    fn invalid(key: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Everything a run needs that is not per-record.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Tool name sent to NCBI.
    pub tool: String,
    /// Contact email sent to NCBI (required by its usage policy).
    pub email: Option<String>,
    /// Optional NCBI API key.
    pub api_key: Option<String>,
    /// Outcome clause ANDed onto literature searches.
    pub outcome_terms: String,
    /// Population filter ANDed onto literature searches.
    pub population_filter: String,
    /// Target database for E-utilities.
    pub database: String,
    /// E-utilities base URL (`esearch.fcgi` etc. are appended).
    pub eutils_base_url: String,
    /// FDA 510(k) page URL (the ID is passed as `?ID=`).
    pub fda_page_url: String,
    /// Interval between NCBI requests without an API key.
    pub ncbi_interval: Duration,
    /// Interval between NCBI requests with an API key.
    pub ncbi_interval_with_key: Duration,
    /// Interval between HTML page requests.
    pub page_interval: Duration,
    /// Connect timeout.
    pub connect_timeout: Duration,
    /// Upper bound for one request.
    pub request_timeout: Duration,
    /// Attempts per request, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles after that.
    pub base_backoff: Duration,
    /// PMIDs kept from a literature search.
    pub literature_cap: usize,
    /// PMIDs kept per trial publication search.
    pub trial_publication_cap: usize,
    /// Records processed concurrently.
    pub concurrency: usize,
    /// Separator between joined fragments.
    pub join_separator: String,
    /// Output column delimiter.
    pub delimiter: u8,
    /// Input column delimiter; independent of the output one.
    pub input_delimiter: u8,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tool: "trialscan".to_string(),
            email: None,
            api_key: None,
            outcome_terms: DEFAULT_OUTCOME_TERMS.to_string(),
            population_filter: DEFAULT_POPULATION_FILTER.to_string(),
            database: "pubmed".to_string(),
            eutils_base_url: DEFAULT_EUTILS_BASE_URL.to_string(),
            fda_page_url: DEFAULT_FDA_PAGE_URL.to_string(),
            ncbi_interval: NCBI_INTERVAL,
            ncbi_interval_with_key: NCBI_INTERVAL_WITH_KEY,
            page_interval: PAGE_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: REQUEST_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_backoff: Duration::from_secs(1),
            literature_cap: 1,
            trial_publication_cap: 20,
            concurrency: DEFAULT_CONCURRENCY,
            join_separator: DEFAULT_JOIN_SEPARATOR.to_string(),
            delimiter: b',',
            input_delimiter: b',',
        }
    }
}

impl PipelineConfig {
    /// Interval for NCBI hosts, shorter when an API key is configured.
    #[must_use]
    pub fn effective_ncbi_interval(&self) -> Duration {
        if self.api_key.is_some() {
            self.ncbi_interval_with_key
        } else {
            self.ncbi_interval
        }
    }

    /// Retry policy derived from `max_attempts` and `base_backoff`.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            self.base_backoff,
            Duration::from_secs(32),
            2.0,
        )
    }

    /// Contact credentials attached to API requests.
    #[must_use]
    pub fn credentials(&self) -> ApiCredentials {
        ApiCredentials {
            tool: self.tool.clone(),
            email: self.email.clone().unwrap_or_default(),
            api_key: self.api_key.clone(),
        }
    }

    /// Overlays values present in a parsed config file.
    pub fn apply_file(&mut self, file: FileConfig) {
        let FileConfig {
            tool,
            email,
            api_key,
            outcome_terms,
            population_filter,
            eutils_base_url,
            fda_page_url,
            concurrency,
            max_attempts,
            request_timeout_secs,
            ncbi_interval_ms,
            page_interval_ms,
            delimiter,
            input_delimiter,
            join_separator,
        } = file;

        if let Some(v) = tool {
            self.tool = v;
        }
        if email.is_some() {
            self.email = email;
        }
        if api_key.is_some() {
            self.api_key = api_key;
        }
        if let Some(v) = outcome_terms {
            self.outcome_terms = v;
        }
        if let Some(v) = population_filter {
            self.population_filter = v;
        }
        if let Some(v) = eutils_base_url {
            self.eutils_base_url = v;
        }
        if let Some(v) = fda_page_url {
            self.fda_page_url = v;
        }
        if let Some(v) = concurrency {
            self.concurrency = v;
        }
        if let Some(v) = max_attempts {
            self.max_attempts = v;
        }
        if let Some(v) = request_timeout_secs {
            self.request_timeout = Duration::from_secs(v);
        }
        if let Some(v) = ncbi_interval_ms {
            self.ncbi_interval = Duration::from_millis(v);
        }
        if let Some(v) = page_interval_ms {
            self.page_interval = Duration::from_millis(v);
        }
        if let Some(v) = delimiter {
            self.delimiter = v;
        }
        if let Some(v) = input_delimiter {
            self.input_delimiter = v;
        }
        if let Some(v) = join_separator {
            self.join_separator = v;
        }
    }

    /// Overlays `NCBI_EMAIL` and `NCBI_API_KEY` from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|name| env::var(name).ok());
    }

    /// Overlays contact settings from an arbitrary variable lookup.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        if let Some(email) = non_empty("NCBI_EMAIL") {
            self.email = Some(email);
        }
        if let Some(api_key) = non_empty("NCBI_API_KEY") {
            self.api_key = Some(api_key);
        }
    }

    /// Fails fast on settings that would make every lookup fail.
    ///
    /// `needs_contact` is true for jobs that call NCBI, whose usage policy
    /// requires a contact email.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self, needs_contact: bool) -> Result<(), ConfigError> {
        if needs_contact {
            match self.email.as_deref().map(str::trim) {
                None | Some("") => {
                    return Err(ConfigError::Missing {
                        key: "email",
                        hint: "pass --email, set NCBI_EMAIL, or add `email = \"...\"` to the config file",
                    });
                }
                Some(email) if !email.contains('@') => {
                    return Err(ConfigError::invalid("email", "expected an email address"));
                }
                Some(_) => {}
            }
            if self.tool.trim().is_empty() {
                return Err(ConfigError::invalid("tool", "tool name must not be empty"));
            }
        }

        if !(1..=MAX_CONCURRENCY).contains(&self.concurrency) {
            return Err(ConfigError::invalid(
                "concurrency",
                format!(
                    "{} is outside 1..={MAX_CONCURRENCY}",
                    self.concurrency
                ),
            ));
        }
        if !(1..=10).contains(&self.max_attempts) {
            return Err(ConfigError::invalid(
                "max_attempts",
                format!("{} is outside 1..=10", self.max_attempts),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::invalid(
                "request_timeout_secs",
                "timeout must be at least 1 second",
            ));
        }
        if self.literature_cap == 0 || self.trial_publication_cap == 0 {
            return Err(ConfigError::invalid("search cap", "must be at least 1"));
        }
        if self.join_separator.is_empty() {
            return Err(ConfigError::invalid("join_separator", "must not be empty"));
        }
        if self.join_separator.as_bytes().contains(&self.delimiter) {
            return Err(ConfigError::invalid(
                "join_separator",
                format!(
                    "separator {:?} contains the column delimiter {:?}",
                    self.join_separator,
                    char::from(self.delimiter)
                ),
            ));
        }
        for (key, value) in [
            ("eutils_base_url", &self.eutils_base_url),
            ("fda_page_url", &self.fda_page_url),
        ] {
            if url::Url::parse(value).is_err() {
                return Err(ConfigError::invalid(key, format!("{value:?} is not a URL")));
            }
        }
        Ok(())
    }
}

/// Values read from a config file; `None` means "not set".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileConfig {
    /// Tool name.
    pub tool: Option<String>,
    /// Contact email.
    pub email: Option<String>,
    /// NCBI API key.
    pub api_key: Option<String>,
    /// Outcome clause.
    pub outcome_terms: Option<String>,
    /// Population filter.
    pub population_filter: Option<String>,
    /// E-utilities base URL.
    pub eutils_base_url: Option<String>,
    /// FDA page URL.
    pub fda_page_url: Option<String>,
    /// Worker pool size.
    pub concurrency: Option<usize>,
    /// Attempts per request.
    pub max_attempts: Option<u32>,
    /// Request timeout in seconds.
    pub request_timeout_secs: Option<u64>,
    /// NCBI interval in milliseconds (without API key).
    pub ncbi_interval_ms: Option<u64>,
    /// Page interval in milliseconds.
    pub page_interval_ms: Option<u64>,
    /// Output column delimiter (single ASCII character).
    pub delimiter: Option<u8>,
    /// Input column delimiter (single ASCII character).
    pub input_delimiter: Option<u8>,
    /// Join separator.
    pub join_separator: Option<String>,
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/trialscan/config.toml`
/// 2. `$HOME/.config/trialscan/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("trialscan")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("trialscan")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads a config file. A missing file is not an error when `optional` is set.
///
/// # Errors
///
/// Returns [`ConfigError::Read`] or a parse error.
pub fn load_file_config(path: &Path, optional: bool) -> Result<Option<FileConfig>, ConfigError> {
    if optional && !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config_str(&raw).map(Some)
}

/// Parses `key = value` lines; strings are double-quoted, `#` starts a comment.
///
/// # Errors
///
/// Returns [`ConfigError::Syntax`] for malformed lines or unknown keys.
pub fn parse_config_str(raw: &str) -> Result<FileConfig, ConfigError> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line_no = line_index + 1;
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            return Err(syntax(line_no, "expected key = value"));
        };

        let key = raw_key.trim();
        let value = raw_value.trim();
        let string = || parse_string_literal(value).map_err(|r| syntax(line_no, format!("`{key}`: {r}")));
        let integer =
            || parse_integer_u64(value).map_err(|r| syntax(line_no, format!("`{key}`: {r}")));

        match key {
            "tool" => cfg.tool = Some(string()?),
            "email" => cfg.email = Some(string()?),
            "api_key" => cfg.api_key = Some(string()?),
            "outcome_terms" => cfg.outcome_terms = Some(string()?),
            "population_filter" => cfg.population_filter = Some(string()?),
            "eutils_base_url" => cfg.eutils_base_url = Some(string()?),
            "fda_page_url" => cfg.fda_page_url = Some(string()?),
            "join_separator" => cfg.join_separator = Some(string()?),
            "concurrency" => {
                cfg.concurrency = Some(
                    usize::try_from(integer()?)
                        .map_err(|_| syntax(line_no, "`concurrency` out of range"))?,
                );
            }
            "max_attempts" => {
                cfg.max_attempts = Some(
                    u32::try_from(integer()?)
                        .map_err(|_| syntax(line_no, "`max_attempts` out of range"))?,
                );
            }
            "request_timeout_secs" => cfg.request_timeout_secs = Some(integer()?),
            "ncbi_interval_ms" => cfg.ncbi_interval_ms = Some(integer()?),
            "page_interval_ms" => cfg.page_interval_ms = Some(integer()?),
            "delimiter" => {
                let parsed = string()?;
                cfg.delimiter = Some(parse_delimiter(&parsed).map_err(|r| syntax(line_no, r))?);
            }
            "input_delimiter" => {
                let parsed = string()?;
                cfg.input_delimiter =
                    Some(parse_delimiter(&parsed).map_err(|r| syntax(line_no, r))?);
            }
            unknown => {
                return Err(syntax(line_no, format!("unknown configuration key '{unknown}'")));
            }
        }
    }
    Ok(cfg)
}

/// Parses a single-character ASCII delimiter (`\t` accepted for tab).
///
/// # Errors
///
/// Returns a description when the value is not exactly one ASCII character.
pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    if value == "\\t" {
        return Ok(b'\t');
    }
    match value.as_bytes() {
        [byte] if byte.is_ascii() => Ok(*byte),
        _ => Err(format!("delimiter must be one ASCII character, got {value:?}")),
    }
}

fn syntax(line: usize, reason: impl Into<String>) -> ConfigError {
    ConfigError::Syntax {
        line,
        reason: reason.into(),
    }
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String, String> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        return Err("expected double-quoted string".to_string());
    }
    Ok(raw_value[1..raw_value.len() - 1].replace("\\\"", "\""))
}

fn parse_integer_u64(raw_value: &str) -> Result<u64, String> {
    let token = raw_value.trim();
    if token.is_empty() {
        return Err("expected integer value".to_string());
    }
    token
        .parse::<u64>()
        .map_err(|e| format!("expected non-negative integer ({e})"))
}
