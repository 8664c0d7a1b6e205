use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::Authentication;
use crate::meter::MeterRegistry;

/// Unique identifier of a persisted job.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl JobId {
    /// Create a new job ID using UUID v7.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier of an incident.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct IncidentId(pub Uuid);

impl Default for IncidentId {
    fn default() -> Self {
        Self::new()
    }
}

impl IncidentId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Display for IncidentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A persisted unit of asynchronous work: a timer, a retry, an async
/// continuation.
///
/// A job has no persisted "succeeded" state; success is represented by the
/// row being deleted. A job whose retry budget reached zero stays in the
/// table as a terminal failed record next to its [`Incident`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    /// Work-type discriminator; resolves the [`JobHandler`] to run.
    pub kind: String,
    /// Handler input, opaque to the engine.
    pub payload: serde_json::Value,
    /// When the job becomes due. `None` for a terminally failed job.
    pub due_date: Option<DateTime<Utc>>,
    /// Remaining retry budget.
    pub retries: u32,
    /// Failure detail of the last failed attempt.
    pub failure: Option<FailureDetail>,
    /// Exclusive-claim owner. Written by the acquisition subsystem; the
    /// coordinator only reads it for diagnostics.
    pub lock_owner: Option<String>,
    /// Optimistic version for the acquisition subsystem's compare-and-swap.
    pub lock_version: u32,
    pub tenant_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl JobRecord {
    /// Create a due job of the given kind with a fresh id.
    pub fn new(kind: impl Into<String>, payload: serde_json::Value, retries: u32) -> Self {
        Self {
            id: JobId::new(),
            kind: kind.into(),
            payload,
            due_date: Some(Utc::now()),
            retries,
            failure: None,
            lock_owner: None,
            lock_version: 0,
            tenant_id: None,
            created_at: Utc::now(),
        }
    }

    /// Set the due date.
    pub fn with_due_date(mut self, due: DateTime<Utc>) -> Self {
        self.due_date = Some(due);
        self
    }

    /// Set the tenant the job belongs to.
    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }
}

/// Structured detail of a failed execution attempt, persisted on the job and
/// carried into the incident once the budget is exhausted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FailureDetail {
    pub message: String,
    pub stack_trace: Option<String>,
}

impl FailureDetail {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack_trace: None,
        }
    }

    /// Capture message and cause chain from an attempt error.
    pub fn from_error(error: &anyhow::Error) -> Self {
        Self {
            message: error.to_string(),
            stack_trace: Some(format!("{error:?}")),
        }
    }
}

/// Terminal record of a job that exhausted its retry budget.
///
/// Created exactly once per exhausted job and never updated in place; a
/// manual re-attempt starts a fresh cycle with a fresh incident if it
/// exhausts again.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Incident {
    pub id: IncidentId,
    pub job_id: JobId,
    pub job_kind: String,
    pub tenant_id: Option<String>,
    pub failure: FailureDetail,
    pub created_at: DateTime<Utc>,
}

impl Incident {
    /// Build the incident for an exhausted job.
    pub fn for_job(job: &JobRecord, failure: FailureDetail, at: DateTime<Utc>) -> Self {
        Self {
            id: IncidentId::new(),
            job_id: job.id,
            job_kind: job.kind.clone(),
            tenant_id: job.tenant_id.clone(),
            failure,
            created_at: at,
        }
    }
}

/// Everything a handler gets to see for one attempt.
pub struct HandlerContext {
    /// Snapshot of the job being executed.
    pub job: JobRecord,
    /// The authentication in effect for this attempt: the job's tenant when
    /// running under a worker, the caller's own identity otherwise.
    pub auth: Option<Authentication>,
    /// The engine's meter registry, for counting execution activity.
    pub meters: Arc<MeterRegistry>,
}

/// The logic behind a job kind.
///
/// Runs inside a fresh transaction isolated from whatever triggered the
/// execution. Returning `Err` marks the attempt as an ordinary application
/// failure; panicking aborts the transaction and is surfaced as an
/// unexpected failure.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn execute(&self, ctx: &HandlerContext) -> anyhow::Result<()>;
}

/// Registry mapping job kinds to their handlers.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Arc<RwLock<HashMap<String, Arc<dyn JobHandler>>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a job kind, replacing any previous one.
    pub fn register(&self, kind: impl Into<String>, handler: Arc<dyn JobHandler>) {
        self.handlers.write().insert(kind.into(), handler);
    }

    /// Look up the handler for a job kind.
    pub fn get(&self, kind: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.read().get(kind).cloned()
    }

    /// Registered kinds, for diagnostics.
    pub fn kinds(&self) -> Vec<String> {
        self.handlers.read().keys().cloned().collect()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
