use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::ExecuteError;
use crate::job::{JobId, JobRecord};

/// Identity in effect for an operation.
///
/// During worker-driven execution of a tenant-owned job this carries the
/// job's tenant (and nothing else), so downstream authorization sees the
/// tenant rather than an anonymous system identity.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Authentication {
    pub user_id: Option<String>,
    pub groups: Vec<String>,
    pub tenants: Vec<String>,
}

impl Authentication {
    /// Identity of a named user.
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            groups: Vec::new(),
            tenants: Vec::new(),
        }
    }

    /// Tenant-scoped identity with no user, as established for the duration
    /// of a tenant-owned job's execution.
    pub fn for_tenant(tenant_id: impl Into<String>) -> Self {
        Self {
            user_id: None,
            groups: Vec::new(),
            tenants: vec![tenant_id.into()],
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.groups.push(group.into());
        self
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenants.push(tenant_id.into());
        self
    }

    pub fn can_access_tenant(&self, tenant_id: &str) -> bool {
        self.tenants.iter().any(|t| t == tenant_id)
    }
}

/// One acquisition worker's execution slot.
///
/// Tracks the job currently executing on that worker, used to reject
/// logically nested re-entrant execution and for diagnostics.
#[derive(Debug)]
pub struct WorkerSlot {
    worker_id: String,
    current: Mutex<Option<JobId>>,
}

impl WorkerSlot {
    pub fn new(worker_id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            worker_id: worker_id.into(),
            current: Mutex::new(None),
        })
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// The job currently executing on this slot, if any.
    pub fn current_job(&self) -> Option<JobId> {
        *self.current.lock()
    }

    /// Mark `job_id` as this slot's currently executing job. Normally driven
    /// by the coordinator.
    pub fn begin(&self, job_id: JobId) -> Result<(), ExecuteError> {
        let mut current = self.current.lock();
        if let Some(running) = *current {
            return Err(ExecuteError::NestedExecution {
                worker: self.worker_id.clone(),
                running,
                requested: job_id,
            });
        }
        *current = Some(job_id);
        Ok(())
    }

    /// Clear the currently-executing marker.
    pub fn finish(&self) {
        *self.current.lock() = None;
    }
}

/// Explicit execution context passed through the coordinator's call chain
/// instead of ambient thread-local state, so tests can construct contexts
/// directly.
#[derive(Clone, Debug, Default)]
pub struct ExecutionContext {
    /// Present when the call comes from the acquisition loop.
    pub worker: Option<Arc<WorkerSlot>>,
    /// The direct caller's own identity, consulted by update-job checkers.
    pub auth: Option<Authentication>,
}

impl ExecutionContext {
    /// Direct (administrative) invocation with no identity.
    pub fn direct() -> Self {
        Self::default()
    }

    /// Direct invocation as a specific identity.
    pub fn direct_as(auth: Authentication) -> Self {
        Self {
            worker: None,
            auth: Some(auth),
        }
    }

    /// Invocation from an acquisition worker.
    pub fn for_worker(slot: Arc<WorkerSlot>) -> Self {
        Self {
            worker: Some(slot),
            auth: None,
        }
    }
}

/// Authorization hook consulted before a direct (non-worker) invocation is
/// allowed to execute, and thereby mutate, a job.
pub trait UpdateJobChecker: Send + Sync {
    fn check_update_job(
        &self,
        job: &JobRecord,
        auth: Option<&Authentication>,
    ) -> anyhow::Result<()>;
}

/// Checker enforcing tenant isolation: an authenticated caller may only
/// touch a tenant-owned job if its identity includes that tenant.
/// Unauthenticated (system) callers pass.
#[derive(Clone, Copy, Debug, Default)]
pub struct TenantUpdateJobChecker;

impl UpdateJobChecker for TenantUpdateJobChecker {
    fn check_update_job(
        &self,
        job: &JobRecord,
        auth: Option<&Authentication>,
    ) -> anyhow::Result<()> {
        let Some(tenant_id) = &job.tenant_id else {
            return Ok(());
        };
        match auth {
            None => Ok(()),
            Some(auth) if auth.can_access_tenant(tenant_id) => Ok(()),
            Some(_) => anyhow::bail!("caller is not a member of tenant '{tenant_id}'"),
        }
    }
}
