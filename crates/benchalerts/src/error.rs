//! Error taxonomy for benchalerts.

/// Problems with the data returned by GitHub or Conbench.
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("contender commit '{sha}' doesn't have any runs in conbench")]
    NoRuns { sha: String },

    #[error("need exactly 1 pull request associated with commit '{sha}', found {found:?}")]
    PullRequestCount { sha: String, found: Vec<u64> },

    #[error("need exactly 1 GitHub App installation, found {found}")]
    InstallationCount { found: usize },

    #[error("response is missing expected field: {0}")]
    MissingField(String),
}

/// benchalerts errors.
#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("HTTP {status} for {method} {url}: {body}")]
    Http {
        status: u16,
        method: String,
        url: String,
        body: String,
    },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error("invalid {kind} value: {value}")]
    InvalidValue { kind: &'static str, value: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("could not sign GitHub App token: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

impl AlertError {
    /// HTTP status code, when the error came from a non-2xx response.
    pub fn status(&self) -> Option<u16> {
        match self {
            AlertError::Http { status, .. } => Some(*status),
            AlertError::Transport(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Result type for benchalerts operations.
pub type Result<T> = std::result::Result<T, AlertError>;
