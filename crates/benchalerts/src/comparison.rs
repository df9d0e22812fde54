//! Pairing contender runs with their baseline runs.

use serde::Serialize;
use tracing::{error, info, warn};

use crate::conbench::{BenchmarkResult, CaseComparison, ConbenchClient, RunInfo};
use crate::error::{DataError, Result};

/// One contender run and, when Conbench found one, its baseline run.
///
/// With a baseline, `compare_results` holds the case comparisons and
/// `benchmark_results` is `None`; without one it is the other way around.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunComparison {
    pub contender_info: RunInfo,
    pub baseline_info: Option<RunInfo>,
    pub compare_results: Option<Vec<CaseComparison>>,
    pub benchmark_results: Option<Vec<BenchmarkResult>>,
    /// Web UI page of the contender run.
    pub contender_link: String,
    /// Web UI page comparing baseline and contender.
    pub compare_link: Option<String>,
}

impl RunComparison {
    pub fn with_baseline(
        contender_info: RunInfo,
        baseline_info: RunInfo,
        compare_results: Vec<CaseComparison>,
        contender_link: String,
        compare_link: String,
    ) -> Self {
        RunComparison {
            contender_info,
            baseline_info: Some(baseline_info),
            compare_results: Some(compare_results),
            benchmark_results: None,
            contender_link,
            compare_link: Some(compare_link),
        }
    }

    pub fn without_baseline(
        contender_info: RunInfo,
        benchmark_results: Vec<BenchmarkResult>,
        contender_link: String,
    ) -> Self {
        RunComparison {
            contender_info,
            baseline_info: None,
            compare_results: None,
            benchmark_results: Some(benchmark_results),
            contender_link,
            compare_link: None,
        }
    }

    pub fn contender_id(&self) -> &str {
        &self.contender_info.id
    }

    pub fn contender_sha(&self) -> &str {
        &self.contender_info.commit.sha
    }

    pub fn has_baseline(&self) -> bool {
        self.baseline_info.is_some()
    }

    /// Whether the baseline run is on the contender's immediate parent commit.
    ///
    /// `false` when there is no baseline.
    pub fn baseline_is_parent(&self) -> bool {
        match (&self.baseline_info, &self.contender_info.commit.parent_sha) {
            (Some(baseline), Some(parent)) => &baseline.commit.sha == parent,
            _ => false,
        }
    }

    /// Link shown next to this run in reports.
    pub fn link(&self) -> &str {
        self.compare_link.as_deref().unwrap_or(&self.contender_link)
    }
}

/// Fetch a [`RunComparison`] for every Conbench run of `contender_sha`.
///
/// Runs without a baseline are kept (with their raw benchmark results) and
/// only logged. A commit with no runs at all is an error.
pub async fn get_comparisons_to_baseline(
    conbench: &ConbenchClient,
    contender_sha: &str,
    z_score_threshold: Option<f64>,
) -> Result<Vec<RunComparison>> {
    let runs = conbench.get_runs_for_commit(contender_sha).await?;
    if runs.is_empty() {
        error!("Contender commit '{contender_sha}' doesn't have any runs in conbench");
        return Err(DataError::NoRuns {
            sha: contender_sha.to_string(),
        }
        .into());
    }

    info!("Getting comparisons from {} run(s)", runs.len());
    let mut comparisons = Vec::with_capacity(runs.len());
    for run in &runs {
        let contender = conbench.get_run(&run.id).await?;
        let contender_link = conbench.run_link(&contender.id);

        let comparison = match contender.links.baseline.as_deref() {
            Some(baseline_link) => {
                let baseline = conbench.get_run_by_link(baseline_link).await?;
                let compare_results = conbench
                    .compare_runs(&baseline.id, &contender.id, z_score_threshold)
                    .await?;
                let compare_link = conbench.compare_link(&baseline.id, &contender.id);
                RunComparison::with_baseline(
                    contender,
                    baseline,
                    compare_results,
                    contender_link,
                    compare_link,
                )
            }
            None => {
                warn!(
                    "Conbench could not find a baseline run for contender run {}",
                    contender.id
                );
                let results = conbench.get_benchmark_results(&contender.id).await?;
                RunComparison::without_baseline(contender, results, contender_link)
            }
        };
        comparisons.push(comparison);
    }

    Ok(comparisons)
}
