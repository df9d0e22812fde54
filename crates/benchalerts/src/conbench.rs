//! Conbench client and the response types it decodes.

use std::sync::Arc;

use reqwest::header::HeaderMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::OnceCell;
use tracing::info;

use crate::config::ConbenchConfig;
use crate::error::{AlertError, Result};
use crate::http::{HttpClient, JsonApi};

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// Entry of the `/runs/?sha=` listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRef {
    pub id: String,
}

/// Commit a run was executed on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCommit {
    pub sha: String,
    #[serde(default)]
    pub parent_sha: Option<String>,
    #[serde(default)]
    pub repository: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLinks {
    /// API URL of the baseline run, when Conbench found one.
    #[serde(default)]
    pub baseline: Option<String>,
}

/// Full run metadata from `/runs/{id}/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunInfo {
    pub id: String,
    pub commit: RunCommit,
    #[serde(default)]
    pub links: RunLinks,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// One benchmark case compared between a baseline and a contender run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseComparison {
    /// Display name of the case.
    #[serde(default)]
    pub benchmark: String,
    #[serde(default)]
    pub batch: Option<String>,
    #[serde(default)]
    pub contender_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub contender_z_score: Option<f64>,
    #[serde(default)]
    pub contender_z_regression: bool,
    #[serde(default)]
    pub contender_z_improvement: bool,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub threshold_z: Option<f64>,
    #[serde(default)]
    pub contender_error: Option<Value>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub tags: Map<String, Value>,
}

impl CaseComparison {
    pub fn display_name(&self) -> String {
        if !self.benchmark.is_empty() {
            return self.benchmark.clone();
        }
        tag_name(&self.tags).unwrap_or_else(|| "unknown benchmark".to_string())
    }
}

/// A raw benchmark result from `/benchmarks/?run_id=`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkResult {
    pub id: String,
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub tags: Map<String, Value>,
    #[serde(default)]
    pub error: Option<Value>,
}

impl BenchmarkResult {
    pub fn display_name(&self) -> String {
        tag_name(&self.tags).unwrap_or_else(|| self.id.clone())
    }
}

fn tag_name(tags: &Map<String, Value>) -> Option<String> {
    tags.get("name").and_then(Value::as_str).map(str::to_string)
}

/// Accept a number, a numeric string, or null.
fn lenient_f64<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Turn a Conbench API link into a path relative to `/api`.
///
/// Relative paths pass through; absolute links must contain `/api/`.
pub fn api_path(link: &str) -> Result<String> {
    match link.rfind("/api/") {
        Some(idx) => Ok(link[idx + "/api".len()..].to_string()),
        None if link.starts_with('/') => Ok(link.to_string()),
        None => Err(AlertError::InvalidValue {
            kind: "Conbench API link",
            value: link.to_string(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Client for a Conbench server's API.
///
/// Logs in lazily on the first request when credentials are configured; the
/// session cookie is kept for every call after that.
pub struct ConbenchClient {
    config: ConbenchConfig,
    api: Arc<dyn JsonApi>,
    session: OnceCell<()>,
}

impl ConbenchClient {
    pub fn new(config: &ConbenchConfig) -> Result<Self> {
        let api = HttpClient::new(&format!("{}/api", config.url), HeaderMap::new())?;
        Ok(Self::with_api(config, Arc::new(api)))
    }

    pub fn with_api(config: &ConbenchConfig, api: Arc<dyn JsonApi>) -> Self {
        ConbenchClient {
            config: config.clone(),
            api,
            session: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &ConbenchConfig {
        &self.config
    }

    async fn ensure_session(&self) -> Result<()> {
        let Some(login) = &self.config.login else {
            return Ok(());
        };
        self.session
            .get_or_try_init(|| async {
                info!("Logging in to {} as {}", self.config.url, login.email);
                let creds = json!({ "email": login.email, "password": login.password });
                self.api.post("/login/", Some(&creds)).await.map(|_| ())
            })
            .await?;
        Ok(())
    }

    async fn get(&self, path: &str, params: &[(&str, String)]) -> Result<Value> {
        self.ensure_session().await?;
        self.api.get(path, params).await
    }

    /// Runs recorded for a commit.
    pub async fn get_runs_for_commit(&self, commit_sha: &str) -> Result<Vec<RunRef>> {
        let runs = self
            .get("/runs/", &[("sha", commit_sha.to_string())])
            .await?;
        Ok(serde_json::from_value(runs)?)
    }

    pub async fn get_run(&self, run_id: &str) -> Result<RunInfo> {
        let run = self.get(&format!("/runs/{run_id}/"), &[]).await?;
        Ok(serde_json::from_value(run)?)
    }

    /// Follow a run link such as a run's `links.baseline`.
    pub async fn get_run_by_link(&self, link: &str) -> Result<RunInfo> {
        let run = self.get(&api_path(link)?, &[]).await?;
        Ok(serde_json::from_value(run)?)
    }

    /// Case-by-case comparison of two runs.
    ///
    /// `z_score_threshold` overrides the server's default threshold.
    pub async fn compare_runs(
        &self,
        baseline_run_id: &str,
        contender_run_id: &str,
        z_score_threshold: Option<f64>,
    ) -> Result<Vec<CaseComparison>> {
        let path = format!("/compare/runs/{baseline_run_id}...{contender_run_id}/");
        let params: Vec<(&str, String)> = z_score_threshold
            .map(|z| vec![("threshold_z", z.to_string())])
            .unwrap_or_default();
        let comparison = self.get(&path, &params).await?;
        Ok(serde_json::from_value(comparison)?)
    }

    /// Raw benchmark results of a run.
    pub async fn get_benchmark_results(&self, run_id: &str) -> Result<Vec<BenchmarkResult>> {
        let results = self
            .get("/benchmarks/", &[("run_id", run_id.to_string())])
            .await?;
        Ok(serde_json::from_value(results)?)
    }

    /// Web UI page of a run.
    pub fn run_link(&self, run_id: &str) -> String {
        format!("{}/runs/{}/", self.config.url, run_id)
    }

    /// Web UI page comparing two runs.
    pub fn compare_link(&self, baseline_run_id: &str, contender_run_id: &str) -> String {
        format!(
            "{}/compare/runs/{}...{}/",
            self.config.url, baseline_run_id, contender_run_id
        )
    }
}
