//! Structured lifecycle events for regression reports.
//!
//! Every workflow runs instrumented with [`report_span`] so that its request
//! logs carry the contender SHA, and emits `report.*` events at start and end.

use tracing::{info, Span};

/// Span for one workflow invocation.
///
/// ```ignore
/// use tracing::Instrument;
/// run_workflow().instrument(report_span("status", "0123abcd")).await
/// ```
pub fn report_span(workflow: &str, contender_sha: &str) -> Span {
    tracing::info_span!(
        "benchalerts.report",
        workflow = %workflow,
        contender_sha = %contender_sha
    )
}

/// Emit event: the pending status or check was posted.
pub fn emit_report_started(workflow: &str, contender_sha: &str) {
    info!(event = "report.started", workflow = %workflow, contender_sha = %contender_sha);
}

/// Emit event: the terminal status or check was posted.
pub fn emit_report_finished(workflow: &str, state: &str, regressions: usize, errors: usize) {
    info!(
        event = "report.finished",
        workflow = %workflow,
        state = %state,
        regressions = regressions,
        errors = errors,
    );
}

/// Emit event: analysis failed and an error report was posted.
pub fn emit_report_failed(workflow: &str, error: &dyn std::fmt::Display) {
    tracing::error!(event = "report.failed", workflow = %workflow, error = %error);
}
