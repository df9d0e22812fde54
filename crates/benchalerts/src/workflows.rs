//! End-to-end workflows: analyze a contender commit and report to GitHub.
//!
//! Both reporting workflows have the same shape:
//!
//! 1. post a pending status (or in-progress check) right away,
//! 2. fetch comparisons, classify and render inside a guarded block,
//! 3. post the terminal status or check linking to Conbench,
//! 4. if step 2 or 3 failed, post an error status (or neutral check) that
//!    embeds the error and links to the build, then return the error.
//!
//! If the very first post fails there is nothing to report to, so that
//! error is returned directly.

use serde_json::Value;
use tracing::{debug, info, warn, Instrument};

use crate::analysis::{
    benchmarks_with_errors, benchmarks_with_z_regressions, count_noun, regression_check_status,
    regression_commit_status, regression_details, regression_summary, short_sha,
    BenchmarkErrorInfo, RegressionInfo,
};
use crate::comparison::{get_comparisons_to_baseline, RunComparison};
use crate::conbench::ConbenchClient;
use crate::config::AlertSettings;
use crate::error::{AlertError, Result};
use crate::github::{
    CheckStatus, CheckUpdate, CommitStatus, GitHubRepoClient, PullRequestRef, StatusState,
};
use crate::obs::{emit_report_failed, emit_report_finished, emit_report_started, report_span};

/// Title of the commit status. Reposting overwrites the previous one.
pub const STATUS_TITLE: &str = "conbench";

/// Name of the check run. Reposting overwrites the previous one.
pub const CHECK_NAME: &str = "Conbench regression analysis";

/// Inputs shared by every workflow.
#[derive(Debug, Clone, PartialEq)]
pub struct RegressionOptions {
    /// Full SHA exactly as Conbench stores it; abbreviated SHAs don't match.
    pub contender_sha: String,
    /// Positive z-score threshold; `None` uses Conbench's default.
    pub z_score_threshold: Option<f64>,
    /// Warn in reports when the baseline isn't the contender's parent.
    /// Useful on the default branch, noisy on pull requests.
    pub warn_if_baseline_isnt_parent: bool,
    /// Linked from the status or check when the analysis errors.
    pub build_url: Option<String>,
}

impl RegressionOptions {
    pub fn new(contender_sha: &str) -> Self {
        RegressionOptions {
            contender_sha: contender_sha.to_string(),
            z_score_threshold: None,
            warn_if_baseline_isnt_parent: true,
            build_url: None,
        }
    }

    pub fn from_settings(contender_sha: &str, settings: &AlertSettings) -> Self {
        RegressionOptions {
            z_score_threshold: settings.z_score_threshold,
            build_url: settings.build_url.clone(),
            ..Self::new(contender_sha)
        }
    }

    pub fn with_z_score_threshold(mut self, z_score_threshold: Option<f64>) -> Self {
        self.z_score_threshold = z_score_threshold;
        self
    }

    pub fn with_build_url(mut self, build_url: Option<String>) -> Self {
        self.build_url = build_url;
        self
    }

    pub fn with_baseline_parent_warning(mut self, warn: bool) -> Self {
        self.warn_if_baseline_isnt_parent = warn;
        self
    }
}

/// Classified and rendered result of analyzing one contender commit.
#[derive(Debug, Clone, PartialEq)]
pub struct RegressionReport {
    pub comparisons: Vec<RunComparison>,
    pub regressions: Vec<RegressionInfo>,
    pub errors: Vec<BenchmarkErrorInfo>,
    pub check_status: CheckStatus,
    pub summary: String,
    pub details: Option<String>,
}

/// Fetch comparisons for the contender commit, classify them and render Markdown.
pub async fn analyze_regressions(
    conbench: &ConbenchClient,
    options: &RegressionOptions,
) -> Result<RegressionReport> {
    let comparisons = get_comparisons_to_baseline(
        conbench,
        &options.contender_sha,
        options.z_score_threshold,
    )
    .await?;

    let regressions = benchmarks_with_z_regressions(&comparisons);
    let errors = benchmarks_with_errors(&comparisons);
    info!("Found the following regressions: {regressions:?}");
    if !errors.is_empty() {
        warn!("Found the following benchmark errors: {errors:?}");
    }

    Ok(RegressionReport {
        check_status: regression_check_status(&comparisons),
        summary: regression_summary(&comparisons, options.warn_if_baseline_isnt_parent),
        details: regression_details(&comparisons),
        comparisons,
        regressions,
        errors,
    })
}

/// Report regressions on the contender commit as a commit status.
///
/// Returns GitHub's description of the final status.
pub async fn update_github_status_based_on_regressions(
    github: &GitHubRepoClient,
    conbench: &ConbenchClient,
    options: &RegressionOptions,
) -> Result<Value> {
    let sha = options.contender_sha.as_str();
    let status = |description: String, state: StatusState, details_url: Option<String>| {
        CommitStatus {
            commit_sha: sha.to_string(),
            title: STATUS_TITLE.to_string(),
            description,
            state,
            details_url,
        }
    };

    async {
        let res = github
            .update_commit_status(&status(
                "Finding possible regressions".to_string(),
                StatusState::Pending,
                options.build_url.clone(),
            ))
            .await?;
        debug!("{res}");
        emit_report_started("status", sha);

        let outcome = async {
            let report = analyze_regressions(conbench, options).await?;
            let (state, description) = regression_commit_status(&report.comparisons);
            let res = github
                .update_commit_status(&status(
                    description,
                    state,
                    Some(conbench.config().search_url(sha)),
                ))
                .await?;
            emit_report_finished(
                "status",
                state.as_str(),
                report.regressions.len(),
                report.errors.len(),
            );
            Ok::<_, AlertError>(res)
        }
        .await;

        match outcome {
            Ok(res) => {
                debug!("{res}");
                Ok(res)
            }
            Err(err) => {
                let fallback = github
                    .update_commit_status(&status(
                        format!("Failed finding regressions: {err}"),
                        StatusState::Error,
                        options.build_url.clone(),
                    ))
                    .await;
                log_fallback("status", fallback);
                emit_report_failed("status", &err);
                Err(err)
            }
        }
    }
    .instrument(report_span("status", sha))
    .await
}

/// Report regressions on the contender commit as a check run.
///
/// Check runs can only be created with GitHub App authentication. Returns
/// GitHub's description of the final check.
pub async fn update_github_check_based_on_regressions(
    github: &GitHubRepoClient,
    conbench: &ConbenchClient,
    options: &RegressionOptions,
) -> Result<Value> {
    let sha = options.contender_sha.as_str();
    let check = |status: CheckStatus,
                 title: String,
                 summary: String,
                 details: Option<String>,
                 details_url: Option<String>| CheckUpdate {
        name: CHECK_NAME.to_string(),
        commit_sha: sha.to_string(),
        status,
        title: Some(title),
        summary: Some(summary),
        details,
        details_url,
    };

    async {
        let res = github
            .update_check(&check(
                CheckStatus::InProgress,
                "Finding possible regressions".to_string(),
                format!("Analyzing `{}` for regressions...", short_sha(sha)),
                None,
                options.build_url.clone(),
            ))
            .await?;
        debug!("{res}");
        emit_report_started("check", sha);

        let outcome = async {
            let report = analyze_regressions(conbench, options).await?;
            let res = github
                .update_check(&check(
                    report.check_status,
                    format!("Found {}", count_noun(report.regressions.len(), "regression")),
                    report.summary.clone(),
                    report.details.clone(),
                    Some(conbench.config().search_url(sha)),
                ))
                .await?;
            emit_report_finished(
                "check",
                report.check_status.as_str(),
                report.regressions.len(),
                report.errors.len(),
            );
            Ok::<_, AlertError>(res)
        }
        .await;

        match outcome {
            Ok(res) => {
                debug!("{res}");
                Ok(res)
            }
            Err(err) => {
                let fallback = github
                    .update_check(&check(
                        CheckStatus::Neutral,
                        "Error when finding regressions".to_string(),
                        "The CI build running the regression analysis failed. This does not \
                         necessarily mean this commit has benchmark regressions, but there is \
                         an error that must be resolved before we can find out."
                            .to_string(),
                        Some(format!("Error: `{err}`\n\nSee build link below.")),
                        options.build_url.clone(),
                    ))
                    .await;
                log_fallback("check", fallback);
                emit_report_failed("check", &err);
                Err(err)
            }
        }
    }
    .instrument(report_span("check", sha))
    .await
}

/// Post the rendered regression report as a pull request comment.
///
/// Unlike the status and check workflows nothing is posted on failure.
pub async fn comment_regressions_on_pull_request(
    github: &GitHubRepoClient,
    conbench: &ConbenchClient,
    options: &RegressionOptions,
    target: &PullRequestRef,
) -> Result<Value> {
    let sha = options.contender_sha.as_str();
    async {
        let report = analyze_regressions(conbench, options).await?;
        let comment = render_comment(&report, &conbench.config().search_url(sha));
        github.create_pull_request_comment(&comment, target).await
    }
    .instrument(report_span("comment", sha))
    .await
}

fn render_comment(report: &RegressionReport, search_url: &str) -> String {
    let mut comment = format!("## Conbench regression analysis\n\n{}", report.summary);
    if let Some(details) = &report.details {
        comment.push('\n');
        comment.push_str(details);
    }
    comment.push_str(&format!("\n[See the results in Conbench]({search_url})\n"));
    comment
}

fn log_fallback(workflow: &str, fallback: Result<Value>) {
    match fallback {
        Ok(res) => debug!("{res}"),
        Err(err) => warn!("Could not post the {workflow} error report to GitHub: {err}"),
    }
}
