//! Environment-driven configuration.
//!
//! Everything is resolved up front by [`AlertSettings::from_lookup`] so that a
//! missing or conflicting credential fails before any request is sent.
//! Empty variables are treated the same as unset ones.

use std::fmt;

use tracing::error;

use crate::error::{AlertError, Result};

pub const GITHUB_APP_ID: &str = "GITHUB_APP_ID";
pub const GITHUB_APP_PRIVATE_KEY: &str = "GITHUB_APP_PRIVATE_KEY";
pub const GITHUB_API_TOKEN: &str = "GITHUB_API_TOKEN";
pub const CONBENCH_URL: &str = "CONBENCH_URL";
pub const CONBENCH_EMAIL: &str = "CONBENCH_EMAIL";
pub const CONBENCH_PASSWORD: &str = "CONBENCH_PASSWORD";
pub const BUILD_URL: &str = "BUILD_URL";
pub const Z_SCORE_THRESHOLD: &str = "Z_SCORE_THRESHOLD";

/// How to authenticate against the GitHub API.
#[derive(Clone, PartialEq, Eq)]
pub enum GitHubAuth {
    /// GitHub App credentials, exchanged for an installation token.
    App { app_id: String, private_key: String },
    /// Personal access token.
    Token(String),
}

impl fmt::Debug for GitHubAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GitHubAuth::App { app_id, .. } => f
                .debug_struct("App")
                .field("app_id", app_id)
                .field("private_key", &"<redacted>")
                .finish(),
            GitHubAuth::Token(_) => f.debug_tuple("Token").field(&"<redacted>").finish(),
        }
    }
}

impl GitHubAuth {
    /// Resolve exactly one authentication mode.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let app_id = non_empty(&lookup, GITHUB_APP_ID);
        let private_key = non_empty(&lookup, GITHUB_APP_PRIVATE_KEY);
        let token = non_empty(&lookup, GITHUB_API_TOKEN);

        match (app_id, private_key, token) {
            (Some(_), Some(_), Some(_)) => config_error(format!(
                "both GitHub App credentials and {GITHUB_API_TOKEN} are set; choose one"
            )),
            (Some(app_id), Some(private_key), None) => Ok(GitHubAuth::App {
                app_id,
                private_key,
            }),
            (Some(_), None, _) => {
                config_error(format!("Environment variable {GITHUB_APP_PRIVATE_KEY} not found"))
            }
            (None, Some(_), _) => {
                config_error(format!("Environment variable {GITHUB_APP_ID} not found"))
            }
            (None, None, Some(token)) => Ok(GitHubAuth::Token(token)),
            (None, None, None) => config_error(format!(
                "Environment variable {GITHUB_API_TOKEN} not found \
                 (or set {GITHUB_APP_ID} and {GITHUB_APP_PRIVATE_KEY})"
            )),
        }
    }

    pub fn is_app(&self) -> bool {
        matches!(self, GitHubAuth::App { .. })
    }
}

/// Conbench login credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct ConbenchLogin {
    pub email: String,
    pub password: String,
}

impl fmt::Debug for ConbenchLogin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConbenchLogin")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Where the Conbench server lives and how to log in to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConbenchConfig {
    /// Server root URL, without a trailing slash.
    pub url: String,
    /// Only needed for private servers.
    pub login: Option<ConbenchLogin>,
}

impl ConbenchConfig {
    pub fn new(url: &str) -> Self {
        ConbenchConfig {
            url: url.trim_end_matches('/').to_string(),
            login: None,
        }
    }

    pub fn with_login(mut self, email: &str, password: &str) -> Self {
        self.login = Some(ConbenchLogin {
            email: email.to_string(),
            password: password.to_string(),
        });
        self
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let Some(url) = non_empty(&lookup, CONBENCH_URL) else {
            return config_error(format!("Environment variable {CONBENCH_URL} not found"));
        };
        let config = ConbenchConfig::new(&url);

        match (
            non_empty(&lookup, CONBENCH_EMAIL),
            non_empty(&lookup, CONBENCH_PASSWORD),
        ) {
            (Some(email), Some(password)) => Ok(config.with_login(&email, &password)),
            (None, None) => Ok(config),
            (Some(_), None) => {
                config_error(format!("Environment variable {CONBENCH_PASSWORD} not found"))
            }
            (None, Some(_)) => {
                config_error(format!("Environment variable {CONBENCH_EMAIL} not found"))
            }
        }
    }

    /// Conbench homepage table filtered to runs of one commit.
    pub fn search_url(&self, commit_sha: &str) -> String {
        format!("{}/?search={}", self.url, commit_sha)
    }
}

/// Everything a workflow needs from the environment.
#[derive(Debug, Clone)]
pub struct AlertSettings {
    pub github: GitHubAuth,
    pub conbench: ConbenchConfig,
    /// URL of the CI build running this code; linked when reporting errors.
    pub build_url: Option<String>,
    /// Positive z-score threshold override sent to Conbench.
    pub z_score_threshold: Option<f64>,
}

impl AlertSettings {
    /// Read settings through `lookup`, usually `std::env::var`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let github = GitHubAuth::from_lookup(&lookup)?;
        let conbench = ConbenchConfig::from_lookup(&lookup)?;
        let build_url = non_empty(&lookup, BUILD_URL);
        let z_score_threshold = match non_empty(&lookup, Z_SCORE_THRESHOLD) {
            Some(raw) => Some(parse_z_score_threshold(&raw)?),
            None => None,
        };

        Ok(AlertSettings {
            github,
            conbench,
            build_url,
            z_score_threshold,
        })
    }
}

/// Parse a z-score threshold, which must be a finite positive number.
pub fn parse_z_score_threshold(raw: &str) -> Result<f64> {
    match raw.trim().parse::<f64>() {
        Ok(value) if value.is_finite() && value > 0.0 => Ok(value),
        _ => config_error(format!(
            "{Z_SCORE_THRESHOLD} must be a positive number, got '{raw}'"
        )),
    }
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).filter(|value| !value.trim().is_empty())
}

fn config_error<T>(message: String) -> Result<T> {
    error!("{message}");
    Err(AlertError::Config(message))
}
