//! Regression classification and Markdown report rendering.
//!
//! Everything here is a pure function of the fetched [`RunComparison`]s, so
//! rendering the same comparisons twice gives identical text.

use serde::Serialize;
use serde_json::Value;

use crate::comparison::RunComparison;
use crate::github::{CheckStatus, StatusState};

/// A benchmark case that errored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BenchmarkErrorInfo {
    pub run_id: String,
    pub run_link: String,
    pub case_name: String,
    pub error: String,
}

/// A benchmark case whose z-score crossed the threshold in the bad direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegressionInfo {
    pub run_id: String,
    pub run_link: String,
    pub case_name: String,
}

// ── classification ────────────────────────────────────────────────────────

/// Every errored case, in comparison order then case order.
///
/// Uses the case comparisons when a baseline exists and the raw benchmark
/// results otherwise.
pub fn benchmarks_with_errors(comparisons: &[RunComparison]) -> Vec<BenchmarkErrorInfo> {
    let mut out = Vec::new();
    for comparison in comparisons {
        let info = |case_name: String, error: &Value| BenchmarkErrorInfo {
            run_id: comparison.contender_id().to_string(),
            run_link: comparison.link().to_string(),
            case_name,
            error: error_message(error),
        };

        if let Some(cases) = &comparison.compare_results {
            for case in cases {
                if let Some(error) = &case.contender_error {
                    out.push(info(case.display_name(), error));
                }
            }
        } else if let Some(results) = &comparison.benchmark_results {
            for result in results {
                if let Some(error) = &result.error {
                    out.push(info(result.display_name(), error));
                }
            }
        }
    }
    out
}

/// Every case flagged as a z-score regression, in comparison order then case order.
pub fn benchmarks_with_z_regressions(comparisons: &[RunComparison]) -> Vec<RegressionInfo> {
    comparisons
        .iter()
        .flat_map(|comparison| {
            comparison
                .compare_results
                .iter()
                .flatten()
                .filter(|case| case.contender_z_regression)
                .map(move |case| RegressionInfo {
                    run_id: comparison.contender_id().to_string(),
                    run_link: comparison.link().to_string(),
                    case_name: case.display_name(),
                })
        })
        .collect()
}

/// Overall check conclusion.
///
/// Precedence: errors, then missing baseline, then regressions.
pub fn regression_check_status(comparisons: &[RunComparison]) -> CheckStatus {
    if !benchmarks_with_errors(comparisons).is_empty() {
        CheckStatus::ActionRequired
    } else if !comparisons.iter().any(RunComparison::has_baseline) {
        CheckStatus::Skipped
    } else if !benchmarks_with_z_regressions(comparisons).is_empty() {
        CheckStatus::Failure
    } else {
        CheckStatus::Success
    }
}

/// Commit status state and one-line description, following the same
/// precedence as [`regression_check_status`].
pub fn regression_commit_status(comparisons: &[RunComparison]) -> (StatusState, String) {
    match regression_check_status(comparisons) {
        CheckStatus::ActionRequired => {
            let errors = benchmarks_with_errors(comparisons).len();
            (
                StatusState::Failure,
                format!(
                    "There {} with an error in this commit",
                    count_phrase(errors, "was", "were", "benchmark")
                ),
            )
        }
        CheckStatus::Skipped => (
            StatusState::Success,
            "Could not find any baseline runs to compare to".to_string(),
        ),
        CheckStatus::Failure => {
            let regressions = benchmarks_with_z_regressions(comparisons).len();
            (
                StatusState::Failure,
                format!(
                    "There {} in this commit",
                    count_phrase(regressions, "was", "were", "benchmark regression")
                ),
            )
        }
        _ => (
            StatusState::Success,
            "There were no benchmark regressions in this commit".to_string(),
        ),
    }
}

// ── rendering ─────────────────────────────────────────────────────────────

/// Markdown summary of the regression analysis.
pub fn regression_summary(
    comparisons: &[RunComparison],
    warn_if_baseline_isnt_parent: bool,
) -> String {
    let sha = comparisons
        .first()
        .map(|c| short_sha(c.contender_sha()))
        .unwrap_or("unknown");
    let errors = benchmarks_with_errors(comparisons);
    let regressions = benchmarks_with_z_regressions(comparisons);
    let mut md = String::new();

    if !errors.is_empty() {
        md.push_str("### Benchmarks with errors\n\n");
        md.push_str(&format!(
            "There {} with an error:\n\n",
            count_phrase(errors.len(), "was", "were", "benchmark")
        ));
        md.push_str(&list_cases(
            errors
                .iter()
                .map(|e| (e.run_id.as_str(), e.run_link.as_str(), e.case_name.as_str())),
        ));
        md.push('\n');
    }

    if !comparisons.iter().any(RunComparison::has_baseline) {
        md.push_str(&format!(
            "Conbench could not find a baseline run for contender commit `{sha}`. \
             A baseline run needs to be on the default branch in the same repository, \
             with the same hardware and context, and have at least one of the same \
             benchmark cases.\n"
        ));
        return md;
    }

    md.push_str(&format!(
        "Contender commit `{sha}` had {} compared to its baseline commit.\n",
        count_noun(regressions.len(), "regression")
    ));

    if !regressions.is_empty() {
        md.push_str("\n### Benchmarks with regressions:\n\n");
        md.push_str(&list_cases(
            regressions
                .iter()
                .map(|r| (r.run_id.as_str(), r.run_link.as_str(), r.case_name.as_str())),
        ));
    }

    let missing: Vec<&RunComparison> = comparisons.iter().filter(|c| !c.has_baseline()).collect();
    if !missing.is_empty() {
        md.push_str("\n### Runs without a baseline\n\n");
        md.push_str(&format!(
            "Conbench could not find a baseline run for {} of this commit:\n\n",
            count_noun(missing.len(), "run")
        ));
        for run in missing {
            md.push_str(&format!(
                "- Run ID [{}]({})\n",
                run.contender_id(),
                run.contender_link
            ));
        }
    }

    let not_parent = comparisons
        .iter()
        .any(|c| c.has_baseline() && !c.baseline_is_parent());
    if warn_if_baseline_isnt_parent && not_parent {
        md.push_str(
            "\n### Note\n\nThe baseline commit was not the immediate parent of the \
             contender commit. See the link below for details.\n",
        );
    }

    md
}

/// Secondary Markdown block with run count and z-score threshold.
///
/// `None` when no run has baseline data to report on.
pub fn regression_details(comparisons: &[RunComparison]) -> Option<String> {
    if !comparisons.iter().any(|c| c.compare_results.is_some()) {
        return None;
    }

    let threshold = comparisons
        .iter()
        .filter_map(|c| c.compare_results.as_ref())
        .flatten()
        .find_map(|case| case.threshold_z);
    let threshold = match threshold {
        Some(z) => format!("a z-score threshold of {z}"),
        None => "Conbench's default z-score threshold".to_string(),
    };

    Some(format!(
        "Conbench has details about {} on this commit.\n\n\
         This report was generated using {threshold}. A regression is defined as a \
         benchmark exhibiting a z-score higher than the threshold in the \"bad\" \
         direction (e.g. down for iterations per second; up for total time taken).\n",
        count_noun(comparisons.len(), "total run")
    ))
}

// ── helpers ───────────────────────────────────────────────────────────────

/// Render `- Run ID [id](link)` items with their case names nested below,
/// grouping by run in first-seen order.
fn list_cases<'a>(cases: impl Iterator<Item = (&'a str, &'a str, &'a str)>) -> String {
    let mut groups: Vec<(&str, &str, Vec<&str>)> = Vec::new();
    for (run_id, link, case_name) in cases {
        match groups.iter_mut().find(|(id, _, _)| *id == run_id) {
            Some((_, _, names)) => names.push(case_name),
            None => groups.push((run_id, link, vec![case_name])),
        }
    }

    let mut md = String::new();
    for (run_id, link, names) in groups {
        md.push_str(&format!("- Run ID [{run_id}]({link})\n"));
        for name in names {
            md.push_str(&format!("  - {name}\n"));
        }
    }
    md
}

fn error_message(error: &Value) -> String {
    match error {
        Value::String(s) => s.clone(),
        Value::Object(map) => match map.get("error").and_then(Value::as_str) {
            Some(s) => s.to_string(),
            None => error.to_string(),
        },
        other => other.to_string(),
    }
}

pub(crate) fn short_sha(sha: &str) -> &str {
    sha.get(..8).unwrap_or(sha)
}

pub(crate) fn count_noun(n: usize, noun: &str) -> String {
    if n == 1 {
        format!("1 {noun}")
    } else {
        format!("{n} {noun}s")
    }
}

fn count_phrase(n: usize, singular_verb: &str, plural_verb: &str, noun: &str) -> String {
    let verb = if n == 1 { singular_verb } else { plural_verb };
    format!("{verb} {}", count_noun(n, noun))
}
