use thiserror::Error;

/// Malformed field specification. Fatal: raised before any page is fetched.
#[derive(Debug, Clone, Error)]
pub enum SpecError {
    #[error("field `{0}` declares no locators")]
    EmptyChain(String),
    #[error("field `{field}`: invalid selector `{selector}`: {reason}")]
    Selector {
        field: String,
        selector: String,
        reason: String,
    },
    #[error("field `{field}`: invalid pattern `{pattern}`: {source}")]
    Pattern {
        field: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Document loader failure for one URL. Recoverable per identifier.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("timed out fetching {url}")]
    Timeout { url: String },
    #[error("HTTP {status} from {url}")]
    HttpStatus { url: String, status: u16 },
    #[error("network error fetching {url}: {reason}")]
    Network { url: String, reason: String },
}

impl FetchError {
    /// Rate limiting, server errors and timeouts are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout { .. } | FetchError::Network { .. } => true,
            FetchError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
        }
    }
}

/// Fetched document that cannot be read as the expected page.
#[derive(Debug, Clone, Error)]
pub enum ParseError {
    #[error("empty document from {url}")]
    Empty { url: String },
    #[error("{url} has no recognizable researcher content")]
    NotAProfile { url: String },
    #[error(transparent)]
    Spec(#[from] SpecError),
}
