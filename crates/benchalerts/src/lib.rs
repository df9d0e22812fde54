//! benchalerts
//!
//! Post Conbench benchmark regression analysis to GitHub as commit statuses,
//! check runs and pull request comments.

pub mod analysis;
pub mod comparison;
pub mod conbench;
pub mod config;
pub mod error;
pub mod fakes;
pub mod github;
pub mod http;
pub mod obs;
pub mod telemetry;
pub mod workflows;

pub use analysis::{
    benchmarks_with_errors, benchmarks_with_z_regressions, regression_check_status,
    regression_commit_status, regression_details, regression_summary, BenchmarkErrorInfo,
    RegressionInfo,
};
pub use comparison::{get_comparisons_to_baseline, RunComparison};
pub use conbench::{BenchmarkResult, CaseComparison, ConbenchClient, RunInfo};
pub use config::{AlertSettings, ConbenchConfig, GitHubAuth};
pub use error::{AlertError, DataError, Result};
pub use github::{
    CheckStatus, CheckUpdate, CommitStatus, GitHubAppClient, GitHubRepoClient, PullRequestRef,
    StatusState,
};
pub use http::{HttpClient, JsonApi, RetryPolicy};
pub use telemetry::init_tracing;
pub use workflows::{
    analyze_regressions, comment_regressions_on_pull_request,
    update_github_check_based_on_regressions, update_github_status_based_on_regressions,
    RegressionOptions, RegressionReport, CHECK_NAME, STATUS_TITLE,
};
