//! Regression classification and report rendering over fixed comparisons.

use benchalerts::conbench::{BenchmarkResult, CaseComparison, RunInfo};
use benchalerts::{
    benchmarks_with_errors, benchmarks_with_z_regressions, regression_check_status,
    regression_commit_status, regression_details, regression_summary, CheckStatus,
    RunComparison, StatusState,
};
use serde_json::{json, Value};

const SHA: &str = "4c0e3f0d4d7f1a2b3c4d5e6f7a8b9c0d1e2f3a4b";
const PARENT: &str = "9a8b7c6d5e4f3a2b1c0d9e8f7a6b5c4d3e2f1a0b";
const URL: &str = "https://conbench.example";

fn run_info(id: &str, sha: &str, parent: &str) -> RunInfo {
    serde_json::from_value(json!({
        "id": id,
        "commit": {"sha": sha, "parent_sha": parent},
    }))
    .unwrap()
}

fn case(name: &str, regression: bool, error: Option<Value>) -> CaseComparison {
    let z_score = if regression { -10.0 } else { 0.5 };
    serde_json::from_value(json!({
        "benchmark": name,
        "contender_z_regression": regression,
        "contender_z_score": z_score,
        "threshold_z": 5,
        "contender_error": error,
    }))
    .unwrap()
}

fn compared(contender: &str, baseline_sha: &str, cases: Vec<CaseComparison>) -> RunComparison {
    RunComparison::with_baseline(
        run_info(contender, SHA, PARENT),
        run_info(&format!("{contender}-base"), baseline_sha, "older"),
        cases,
        format!("{URL}/runs/{contender}/"),
        format!("{URL}/compare/runs/{contender}-base...{contender}/"),
    )
}

fn no_baseline(contender: &str, results: Vec<BenchmarkResult>) -> RunComparison {
    RunComparison::without_baseline(
        run_info(contender, SHA, PARENT),
        results,
        format!("{URL}/runs/{contender}/"),
    )
}

// ===========================================================================
// Classification
// ===========================================================================

#[test]
fn no_flags_means_no_regressions() {
    let comparisons = vec![compared(
        "c1",
        PARENT,
        vec![case("file-read", false, None), case("file-write", false, None)],
    )];

    assert!(benchmarks_with_z_regressions(&comparisons).is_empty());
    assert!(benchmarks_with_errors(&comparisons).is_empty());
    assert_eq!(regression_check_status(&comparisons), CheckStatus::Success);
    assert_eq!(
        regression_commit_status(&comparisons),
        (
            StatusState::Success,
            "There were no benchmark regressions in this commit".to_string()
        )
    );

    let summary = regression_summary(&comparisons, true);
    assert!(summary.contains("Contender commit `4c0e3f0d` had 0 regressions"));
    assert!(!summary.contains("### Benchmarks with regressions"));
}

#[test]
fn regressions_across_runs_are_listed_in_order() {
    let comparisons = vec![
        compared("c1", PARENT, vec![case("file-read", true, None)]),
        compared("c2", PARENT, vec![case("file-write", true, None)]),
    ];

    let regressions = benchmarks_with_z_regressions(&comparisons);
    assert_eq!(regressions.len(), 2);
    assert_eq!(regressions[0].run_id, "c1");
    assert_eq!(regressions[0].case_name, "file-read");
    assert_eq!(
        regressions[1].run_link,
        "https://conbench.example/compare/runs/c2-base...c2/"
    );

    assert_eq!(regression_check_status(&comparisons), CheckStatus::Failure);
    let (state, description) = regression_commit_status(&comparisons);
    assert_eq!(state, StatusState::Failure);
    assert_eq!(description, "There were 2 benchmark regressions in this commit");

    let summary = regression_summary(&comparisons, true);
    assert!(summary.contains("had 2 regressions compared to its baseline commit"));
    assert!(summary.contains(
        "- Run ID [c1](https://conbench.example/compare/runs/c1-base...c1/)\n  - file-read\n"
    ));
    assert!(summary.contains(
        "- Run ID [c2](https://conbench.example/compare/runs/c2-base...c2/)\n  - file-write\n"
    ));
    assert!(!summary.contains("### Note"));
}

#[test]
fn missing_baseline_everywhere_is_skipped() {
    let comparisons = vec![no_baseline("c1", vec![]), no_baseline("c2", vec![])];

    assert_eq!(regression_check_status(&comparisons), CheckStatus::Skipped);
    assert_eq!(
        regression_commit_status(&comparisons),
        (
            StatusState::Success,
            "Could not find any baseline runs to compare to".to_string()
        )
    );
    let summary = regression_summary(&comparisons, true);
    assert!(summary
        .starts_with("Conbench could not find a baseline run for contender commit `4c0e3f0d`."));
    assert!(!summary.contains("regressions compared to"));
    assert!(regression_details(&comparisons).is_none());
}

#[test]
fn partial_baseline_lists_runs_without_one() {
    let comparisons = vec![
        compared("c1", PARENT, vec![case("file-read", false, None)]),
        no_baseline("c2", vec![]),
    ];

    assert_eq!(regression_check_status(&comparisons), CheckStatus::Success);
    let summary = regression_summary(&comparisons, true);
    assert!(summary.contains("### Runs without a baseline"));
    assert!(summary.contains("- Run ID [c2](https://conbench.example/runs/c2/)"));
}

#[test]
fn errors_take_precedence() {
    let errored = case("file-read", true, Some(json!({"error": "segfault"})));
    let comparisons = vec![compared("c1", PARENT, vec![errored])];

    let errors = benchmarks_with_errors(&comparisons);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].error, "segfault");
    assert_eq!(regression_check_status(&comparisons), CheckStatus::ActionRequired);
    assert_eq!(
        regression_commit_status(&comparisons),
        (
            StatusState::Failure,
            "There was 1 benchmark with an error in this commit".to_string()
        )
    );
    assert!(regression_summary(&comparisons, true).starts_with("### Benchmarks with errors"));
}

#[test]
fn errors_without_baseline_come_from_raw_results() {
    let result: BenchmarkResult = serde_json::from_value(json!({
        "id": "bm1",
        "tags": {"name": "file-write"},
        "error": "timeout",
    }))
    .unwrap();
    let comparisons = vec![no_baseline("c1", vec![result])];

    let errors = benchmarks_with_errors(&comparisons);
    assert_eq!(errors[0].case_name, "file-write");
    assert_eq!(errors[0].run_link, "https://conbench.example/runs/c1/");
    assert_eq!(regression_check_status(&comparisons), CheckStatus::ActionRequired);
}

// ===========================================================================
// Rendering
// ===========================================================================

#[test]
fn baseline_parent_note_respects_flag() {
    let comparisons = vec![compared("c1", "somewhere-else", vec![case("a", false, None)])];

    assert!(regression_summary(&comparisons, true).contains("### Note"));
    assert!(!regression_summary(&comparisons, false).contains("### Note"));

    let parent = vec![compared("c1", PARENT, vec![case("a", false, None)])];
    assert!(!regression_summary(&parent, true).contains("### Note"));
}

#[test]
fn rendering_is_deterministic() {
    let comparisons = vec![
        compared("c1", "elsewhere", vec![case("a", true, None), case("b", true, None)]),
        no_baseline("c2", vec![]),
    ];

    assert_eq!(
        regression_summary(&comparisons, true),
        regression_summary(&comparisons, true)
    );
    assert_eq!(
        regression_details(&comparisons),
        regression_details(&comparisons)
    );
}

#[test]
fn details_report_run_count_and_threshold() {
    let comparisons = vec![
        compared("c1", PARENT, vec![case("a", false, None)]),
        no_baseline("c2", vec![]),
    ];

    let details = regression_details(&comparisons).unwrap();
    assert!(details.contains("2 total runs"));
    assert!(details.contains("a z-score threshold of 5."));
}
