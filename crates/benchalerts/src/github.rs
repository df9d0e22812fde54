//! GitHub clients: App authentication and per-repo status, check and comment updates.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info};

use crate::config::GitHubAuth;
use crate::error::{AlertError, DataError, Result};
use crate::http::{bearer_headers, HttpClient, JsonApi};

pub const GITHUB_API_URL: &str = "https://api.github.com";

const GITHUB_MEDIA_TYPE: &str = "application/vnd.github+json";

/// GitHub rejects commit status descriptions longer than this.
pub const MAX_STATUS_DESCRIPTION: usize = 140;

// ---------------------------------------------------------------------------
// Status vocabularies
// ---------------------------------------------------------------------------

/// State of a commit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusState {
    Error,
    Failure,
    Pending,
    Success,
}

impl StatusState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusState::Error => "error",
            StatusState::Failure => "failure",
            StatusState::Pending => "pending",
            StatusState::Success => "success",
        }
    }
}

impl fmt::Display for StatusState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatusState {
    type Err = AlertError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "error" => Ok(StatusState::Error),
            "failure" => Ok(StatusState::Failure),
            "pending" => Ok(StatusState::Pending),
            "success" => Ok(StatusState::Success),
            _ => Err(AlertError::InvalidValue {
                kind: "status state",
                value: s.to_string(),
            }),
        }
    }
}

/// Status or conclusion of a check run.
///
/// `Queued` and `InProgress` are sent as the check's `status`; every other
/// value is a terminal `conclusion`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Queued,
    InProgress,
    ActionRequired,
    Cancelled,
    Failure,
    Neutral,
    Success,
    Skipped,
    TimedOut,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Queued => "queued",
            CheckStatus::InProgress => "in_progress",
            CheckStatus::ActionRequired => "action_required",
            CheckStatus::Cancelled => "cancelled",
            CheckStatus::Failure => "failure",
            CheckStatus::Neutral => "neutral",
            CheckStatus::Success => "success",
            CheckStatus::Skipped => "skipped",
            CheckStatus::TimedOut => "timed_out",
        }
    }

    /// Whether the check is still running.
    pub fn is_running(&self) -> bool {
        matches!(self, CheckStatus::Queued | CheckStatus::InProgress)
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckStatus {
    type Err = AlertError;

    fn from_str(s: &str) -> Result<Self> {
        let status = match s {
            "queued" => CheckStatus::Queued,
            "in_progress" => CheckStatus::InProgress,
            "action_required" => CheckStatus::ActionRequired,
            "cancelled" => CheckStatus::Cancelled,
            "failure" => CheckStatus::Failure,
            "neutral" => CheckStatus::Neutral,
            "success" => CheckStatus::Success,
            "skipped" => CheckStatus::Skipped,
            "timed_out" => CheckStatus::TimedOut,
            _ => {
                return Err(AlertError::InvalidValue {
                    kind: "check status",
                    value: s.to_string(),
                })
            }
        };
        Ok(status)
    }
}

// ---------------------------------------------------------------------------
// GitHub App
// ---------------------------------------------------------------------------

/// JWT claims GitHub expects from an App.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppClaims {
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

impl AppClaims {
    /// Issued a minute in the past to absorb clock drift, valid for ten minutes.
    pub fn new(app_id: &str, now: DateTime<Utc>) -> Self {
        AppClaims {
            iss: app_id.to_string(),
            iat: (now - Duration::minutes(1)).timestamp(),
            exp: (now + Duration::minutes(10)).timestamp(),
        }
    }
}

/// Sign an RS256 JWT for the GitHub App endpoints.
pub fn encode_app_jwt(app_id: &str, private_key: &str, now: DateTime<Utc>) -> Result<String> {
    let key = EncodingKey::from_rsa_pem(private_key.as_bytes())?;
    let claims = AppClaims::new(app_id, now);
    Ok(jsonwebtoken::encode(
        &Header::new(Algorithm::RS256),
        &claims,
        &key,
    )?)
}

#[derive(Debug, Deserialize)]
struct Installation {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct AccessToken {
    token: String,
}

/// Client for the `/app` endpoints, authenticated with an App JWT.
pub struct GitHubAppClient {
    api: Arc<dyn JsonApi>,
}

impl GitHubAppClient {
    pub fn new(app_id: &str, private_key: &str) -> Result<Self> {
        let jwt = encode_app_jwt(app_id, private_key, Utc::now())?;
        let api = HttpClient::new(
            &format!("{GITHUB_API_URL}/app"),
            bearer_headers(&jwt, Some(GITHUB_MEDIA_TYPE))?,
        )?;
        Ok(Self::with_api(Arc::new(api)))
    }

    pub fn with_api(api: Arc<dyn JsonApi>) -> Self {
        GitHubAppClient { api }
    }

    /// Exchange the App JWT for an installation access token.
    ///
    /// The token lasts for an hour. Each App is meant to be installed on a
    /// single organization, so exactly one installation must exist.
    pub async fn get_app_access_token(&self) -> Result<String> {
        let installations: Vec<Installation> =
            serde_json::from_value(self.api.get("/installations", &[]).await?)?;
        if installations.len() != 1 {
            error!(
                found = installations.len(),
                "GitHub App must have exactly 1 installation"
            );
            return Err(DataError::InstallationCount {
                found: installations.len(),
            }
            .into());
        }

        let path = format!("/installations/{}/access_tokens", installations[0].id);
        let token_info = self
            .api
            .post(&path, None)
            .await?
            .ok_or_else(|| DataError::MissingField("token".to_string()))?;
        let token: AccessToken = serde_json::from_value(token_info)?;
        Ok(token.token)
    }
}

// ---------------------------------------------------------------------------
// Repo client
// ---------------------------------------------------------------------------

/// Which pull request a comment goes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullRequestRef {
    Number(u64),
    /// Resolved to the single pull request associated with the commit.
    CommitSha(String),
}

/// A commit status update. Statuses are keyed by `title`; posting the same
/// title again overwrites the previous status on that commit.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitStatus {
    pub commit_sha: String,
    pub title: String,
    pub description: String,
    pub state: StatusState,
    pub details_url: Option<String>,
}

impl CommitStatus {
    pub fn body(&self) -> Value {
        let mut body = json!({
            "state": self.state.as_str(),
            "description": truncate_description(&self.description),
            "context": self.title,
        });
        if let Some(url) = &self.details_url {
            body["target_url"] = json!(url);
        }
        body
    }
}

/// A check run update. Checks are keyed by `name`.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckUpdate {
    pub name: String,
    pub commit_sha: String,
    pub status: CheckStatus,
    pub title: Option<String>,
    pub summary: Option<String>,
    /// Markdown shown below the summary.
    pub details: Option<String>,
    pub details_url: Option<String>,
}

impl CheckUpdate {
    pub fn body(&self, now: DateTime<Utc>) -> Value {
        let timestamp = now.to_rfc3339_opts(SecondsFormat::Secs, true);
        let mut body = json!({
            "name": self.name,
            "head_sha": self.commit_sha,
        });

        if self.status.is_running() {
            body["status"] = json!(self.status.as_str());
            body["started_at"] = json!(timestamp);
        } else {
            body["conclusion"] = json!(self.status.as_str());
            body["completed_at"] = json!(timestamp);
        }

        if let Some(title) = &self.title {
            let mut output = json!({
                "title": title,
                "summary": self.summary.clone().unwrap_or_default(),
            });
            if let Some(details) = &self.details {
                output["text"] = json!(details);
            }
            body["output"] = output;
        }

        if let Some(url) = &self.details_url {
            body["details_url"] = json!(url);
        }
        body
    }
}

#[derive(Debug, Deserialize)]
struct PullRequest {
    number: u64,
}

/// Client for one repository's endpoints.
pub struct GitHubRepoClient {
    repo: String,
    api: Arc<dyn JsonApi>,
}

impl GitHubRepoClient {
    /// Authenticate and create a client for `repo` (`owner/name`).
    pub async fn new(repo: &str, auth: &GitHubAuth) -> Result<Self> {
        validate_repo(repo)?;
        let token = match auth {
            GitHubAuth::App {
                app_id,
                private_key,
            } => {
                info!("Attempting to authenticate as a GitHub App");
                GitHubAppClient::new(app_id, private_key)?
                    .get_app_access_token()
                    .await?
            }
            GitHubAuth::Token(token) => token.clone(),
        };

        let api = HttpClient::new(
            &format!("{GITHUB_API_URL}/repos/{repo}"),
            bearer_headers(&token, Some(GITHUB_MEDIA_TYPE))?,
        )?;
        Ok(GitHubRepoClient {
            repo: repo.to_string(),
            api: Arc::new(api),
        })
    }

    pub fn with_api(repo: &str, api: Arc<dyn JsonApi>) -> Result<Self> {
        validate_repo(repo)?;
        Ok(GitHubRepoClient {
            repo: repo.to_string(),
            api,
        })
    }

    /// Comment on a pull request given by number or by commit SHA.
    pub async fn create_pull_request_comment(
        &self,
        comment: &str,
        target: &PullRequestRef,
    ) -> Result<Value> {
        let number = match target {
            PullRequestRef::Number(number) => *number,
            PullRequestRef::CommitSha(sha) => self.pull_request_for_commit(sha).await?,
        };

        info!(
            "Posting the following message to {}#{number}:\n\n{comment}",
            self.repo
        );
        let path = format!("/issues/{number}/comments");
        let res = self.api.post(&path, Some(&json!({ "body": comment }))).await?;
        Ok(res.unwrap_or(Value::Null))
    }

    async fn pull_request_for_commit(&self, commit_sha: &str) -> Result<u64> {
        let pulls: Vec<PullRequest> = serde_json::from_value(
            self.api
                .get(&format!("/commits/{commit_sha}/pulls"), &[])
                .await?,
        )?;
        let numbers: Vec<u64> = pulls.iter().map(|p| p.number).collect();
        if numbers.len() != 1 {
            error!("Need exactly 1 pull request associated with commit '{commit_sha}', found {numbers:?}");
            return Err(DataError::PullRequestCount {
                sha: commit_sha.to_string(),
                found: numbers,
            }
            .into());
        }
        Ok(numbers[0])
    }

    /// Create or overwrite a commit status.
    pub async fn update_commit_status(&self, status: &CommitStatus) -> Result<Value> {
        let path = format!("/statuses/{}", status.commit_sha);
        let res = self.api.post(&path, Some(&status.body())).await?;
        Ok(res.unwrap_or(Value::Null))
    }

    /// Create or overwrite a check run. Requires App authentication.
    pub async fn update_check(&self, check: &CheckUpdate) -> Result<Value> {
        let res = self
            .api
            .post("/check-runs", Some(&check.body(Utc::now())))
            .await?;
        Ok(res.unwrap_or(Value::Null))
    }
}

fn validate_repo(repo: &str) -> Result<()> {
    match repo.split_once('/') {
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {
            Ok(())
        }
        _ => Err(AlertError::Config(format!(
            "repo must be in the form 'owner/repo', got '{repo}'"
        ))),
    }
}

fn truncate_description(description: &str) -> String {
    if description.chars().count() <= MAX_STATUS_DESCRIPTION {
        return description.to_string();
    }
    let mut out: String = description
        .chars()
        .take(MAX_STATUS_DESCRIPTION - 1)
        .collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2022, 11, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_status_state_parse() {
        assert_eq!("pending".parse::<StatusState>().unwrap(), StatusState::Pending);
        let err = "running".parse::<StatusState>().unwrap_err();
        assert!(err.to_string().contains("status state"));
    }

    #[test]
    fn test_check_status_parse_and_running() {
        assert_eq!(
            "action_required".parse::<CheckStatus>().unwrap(),
            CheckStatus::ActionRequired
        );
        assert!("pending".parse::<CheckStatus>().is_err());
        assert!(CheckStatus::Queued.is_running());
        assert!(CheckStatus::InProgress.is_running());
        assert!(!CheckStatus::Skipped.is_running());
        assert_eq!(
            serde_json::to_value(CheckStatus::TimedOut).unwrap(),
            json!("timed_out")
        );
    }

    #[test]
    fn test_app_claims_window() {
        let claims = AppClaims::new("1234", now());
        assert_eq!(claims.iss, "1234");
        assert_eq!(now().timestamp() - claims.iat, 60);
        assert_eq!(claims.exp - now().timestamp(), 600);
    }

    #[test]
    fn test_encode_app_jwt_rejects_bad_key() {
        let err = encode_app_jwt("1234", "not a pem", now()).unwrap_err();
        assert!(matches!(err, AlertError::Jwt(_)));
    }

    #[test]
    fn test_status_body_truncates_description() {
        let status = CommitStatus {
            commit_sha: "abc".to_string(),
            title: "conbench".to_string(),
            description: "x".repeat(200),
            state: StatusState::Failure,
            details_url: Some("https://conbench.example/?search=abc".to_string()),
        };
        let body = status.body();
        assert_eq!(body["state"], "failure");
        assert_eq!(body["context"], "conbench");
        assert_eq!(
            body["description"].as_str().unwrap().chars().count(),
            MAX_STATUS_DESCRIPTION
        );
        assert_eq!(body["target_url"], "https://conbench.example/?search=abc");
    }

    #[test]
    fn test_status_body_without_url() {
        let status = CommitStatus {
            commit_sha: "abc".to_string(),
            title: "conbench".to_string(),
            description: "short".to_string(),
            state: StatusState::Pending,
            details_url: None,
        };
        let body = status.body();
        assert_eq!(body["description"], "short");
        assert!(body.get("target_url").is_none());
    }

    #[test]
    fn test_check_body_running_vs_terminal() {
        let mut check = CheckUpdate {
            name: "Conbench regression analysis".to_string(),
            commit_sha: "abc".to_string(),
            status: CheckStatus::InProgress,
            title: Some("Finding possible regressions".to_string()),
            summary: Some("Analyzing".to_string()),
            details: None,
            details_url: None,
        };
        let body = check.body(now());
        assert_eq!(body["status"], "in_progress");
        assert_eq!(body["started_at"], "2022-11-01T12:00:00Z");
        assert!(body.get("conclusion").is_none());
        assert!(body["output"].get("text").is_none());

        check.status = CheckStatus::Failure;
        check.details = Some("details".to_string());
        let body = check.body(now());
        assert_eq!(body["conclusion"], "failure");
        assert_eq!(body["completed_at"], "2022-11-01T12:00:00Z");
        assert!(body.get("status").is_none());
        assert_eq!(body["output"]["text"], "details");
    }

    #[test]
    fn test_validate_repo() {
        assert!(validate_repo("owner/repo").is_ok());
        assert!(validate_repo("owner").is_err());
        assert!(validate_repo("/repo").is_err());
        assert!(validate_repo("a/b/c").is_err());
    }
}
