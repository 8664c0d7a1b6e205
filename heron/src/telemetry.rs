//! Tracing instrumentation for the engine.
//!
//! Span constructors and record helpers for the job execution and metering
//! lifecycle. Purely `tracing`-based; aggregate counting lives in the
//! engine's own meter registry.

use tracing::{info_span, Span};

use crate::job::{JobId, JobRecord};

/// Create a tracing span for one execution attempt.
///
/// The span carries the job id and kind as fields for observability.
#[must_use]
pub fn job_execution_span(job: &JobRecord) -> Span {
    info_span!(
        "heron.execute",
        job_id = %job.id,
        job_kind = %job.kind,
        tenant_id = job.tenant_id.as_deref().unwrap_or(""),
    )
}

/// Create a tracing span for the outcome-listener transaction.
///
/// `outcome` is either `"success"` or `"failure"`.
#[must_use]
pub fn listener_dispatch_span(job_id: JobId, outcome: &str) -> Span {
    info_span!(
        "heron.dispatch_listener",
        job_id = %job_id,
        outcome = %outcome,
    )
}

/// Create a tracing span for one reporter flush.
#[must_use]
pub fn reporter_flush_span(reporter_id: impl AsRef<str>) -> Span {
    info_span!(
        "heron.report_metrics",
        reporter = %reporter_id.as_ref(),
    )
}

/// Record a completed attempt in the log stream.
pub fn record_job_executed(job_id: JobId, kind: impl AsRef<str>) {
    tracing::info!(
        job_id = %job_id,
        job_kind = %kind.as_ref(),
        "job executed"
    );
}

/// Record a failed attempt in the log stream.
pub fn record_job_failed(job_id: JobId, kind: impl AsRef<str>, retries_left: u32) {
    tracing::warn!(
        job_id = %job_id,
        job_kind = %kind.as_ref(),
        retries_left,
        "job failed"
    );
}

/// Record an incident in the log stream.
pub fn record_incident_created(job_id: JobId, kind: impl AsRef<str>) {
    tracing::error!(
        job_id = %job_id,
        job_kind = %kind.as_ref(),
        "retry budget exhausted, incident created"
    );
}
