use thiserror::Error;

use crate::job::JobId;

/// Errors surfaced by [`crate::executor::JobCoordinator::execute`].
///
/// Retry bookkeeping and incident creation always happen before an
/// `Application` or `Unexpected` error reaches the caller; the remaining
/// variants are precondition failures raised before any attempt was made.
#[derive(Debug, Error)]
pub enum ExecuteError {
    /// A direct (non-worker) invocation named a job that does not exist.
    #[error("no job found with id '{0}'")]
    JobNotFound(JobId),

    /// The worker slot is already executing another job; logically nested
    /// re-entrant execution is rejected.
    #[error("worker '{worker}' is already executing job {running}, refusing nested execution of {requested}")]
    NestedExecution {
        worker: String,
        running: JobId,
        requested: JobId,
    },

    /// A configured [`crate::context::UpdateJobChecker`] rejected the direct
    /// caller's identity.
    #[error("caller is not authorized to update job {job_id}: {cause}")]
    NotAuthorized { job_id: JobId, cause: anyhow::Error },

    /// The job's own logic raised an ordinary fault. Passed through
    /// unchanged after bookkeeping.
    #[error(transparent)]
    Application(anyhow::Error),

    /// Any other fault during the attempt (handler panic, transaction
    /// plumbing), wrapped with the job identity after bookkeeping.
    #[error("unexpected failure while executing job {job_id}: {cause}")]
    Unexpected { job_id: JobId, cause: anyhow::Error },
}

/// No handler was registered for a job's kind. Raised inside the execution
/// transaction, so it counts as a failed attempt like any other fault of the
/// job's own configuration.
#[derive(Debug, Error)]
#[error("no handler registered for job kind '{0}'")]
pub struct HandlerNotFound(pub String);

/// Errors surfaced by the metrics query surface.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The requested row limit exceeds the engine ceiling. Raised before any
    /// storage access; the limit is never silently clamped.
    #[error("metrics interval query row limit can't be set larger than 200, got {requested}")]
    LimitExceeded { requested: usize },

    /// The bucket width must be a positive number of seconds.
    #[error("metrics interval must be positive, got {requested}")]
    InvalidInterval { requested: i64 },

    /// The meter log store failed while scanning.
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}
