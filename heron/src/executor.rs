use std::sync::Arc;

use tracing::{debug, error, warn, Instrument};

use crate::clock::Clock;
use crate::config::DispatchFailurePolicy;
use crate::context::{Authentication, ExecutionContext, UpdateJobChecker};
use crate::error::{ExecuteError, HandlerNotFound};
use crate::events::{EngineEventBus, JobLifecycleEvent};
use crate::job::{FailureDetail, HandlerContext, HandlerRegistry, Incident, JobId, JobRecord};
use crate::meter::{names, MeterRegistry};
use crate::retry::RetryPolicy;
use crate::store::{IncidentStore, JobStore};
use crate::telemetry;
use crate::transaction::{TransactionAborted, TransactionExecutor, TxWork};

/// Tagged outcome of one execution attempt, dispatched to exactly one
/// listener.
#[derive(Clone, Debug)]
pub enum JobOutcome {
    Success,
    Failure(FailureDetail),
}

/// The two kinds an attempt failure is classified into. Both drive the same
/// retry/incident bookkeeping; they differ only in how the error is
/// surfaced to a direct caller.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailureKind {
    /// Ordinary fault from the job's own logic; re-raised unchanged.
    Application,
    /// Anything else (handler panic, transaction plumbing); wrapped with
    /// the job identity before re-raise.
    Unexpected,
}

/// Classifies an attempt failure by its origin, independent of any error
/// hierarchy: a fault returned by the job's logic is an application
/// failure, an aborted transaction is not.
pub fn classify_failure(error: &anyhow::Error) -> FailureKind {
    if error.downcast_ref::<TransactionAborted>().is_some() {
        FailureKind::Unexpected
    } else {
        FailureKind::Application
    }
}

/// Collects the failure of one attempt so the outcome listener sees it even
/// though the execution transaction has already been torn down.
#[derive(Debug, Default)]
pub struct JobFailureCollector {
    failure: Option<FailureDetail>,
}

impl JobFailureCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, detail: FailureDetail) {
        self.failure = Some(detail);
    }

    pub fn outcome(self) -> JobOutcome {
        match self.failure {
            Some(detail) => JobOutcome::Failure(detail),
            None => JobOutcome::Success,
        }
    }
}

/// Executes jobs after acquisition: runs the handler in an isolated
/// transaction, classifies failures, and drives retry and incident
/// transitions through a second, independent listener transaction.
pub struct JobCoordinator {
    jobs: Arc<dyn JobStore>,
    incidents: Arc<dyn IncidentStore>,
    handlers: HandlerRegistry,
    tx: Arc<dyn TransactionExecutor>,
    retry_policy: Arc<dyn RetryPolicy>,
    checkers: Vec<Arc<dyn UpdateJobChecker>>,
    meters: Arc<MeterRegistry>,
    events: EngineEventBus,
    clock: Arc<dyn Clock>,
    dispatch_failure_policy: DispatchFailurePolicy,
}

impl JobCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        jobs: Arc<dyn JobStore>,
        incidents: Arc<dyn IncidentStore>,
        handlers: HandlerRegistry,
        tx: Arc<dyn TransactionExecutor>,
        retry_policy: Arc<dyn RetryPolicy>,
        checkers: Vec<Arc<dyn UpdateJobChecker>>,
        meters: Arc<MeterRegistry>,
        events: EngineEventBus,
        clock: Arc<dyn Clock>,
        dispatch_failure_policy: DispatchFailurePolicy,
    ) -> Self {
        Self {
            jobs,
            incidents,
            handlers,
            tx,
            retry_policy,
            checkers,
            meters,
            events,
            clock,
            dispatch_failure_policy,
        }
    }

    /// Execute one job by id.
    ///
    /// From a worker context a vanished job is a benign race (the job was
    /// deleted after acquisition, e.g. its owning activity was cancelled)
    /// and returns `Ok`. A direct invocation of a missing job fails with
    /// [`ExecuteError::JobNotFound`].
    ///
    /// Exactly one outcome listener runs per attempt, in a transaction
    /// independent of the execution transaction, before any failure is
    /// re-raised to the caller.
    pub async fn execute(
        &self,
        job_id: JobId,
        ctx: &ExecutionContext,
    ) -> Result<(), ExecuteError> {
        let job = self
            .jobs
            .find(job_id)
            .await
            .map_err(|cause| ExecuteError::Unexpected { job_id, cause })?;

        let Some(job) = job else {
            return match &ctx.worker {
                Some(worker) => {
                    // Acquired but gone again: deleted between acquisition
                    // and execution, e.g. the owning activity was cancelled.
                    debug!(
                        %job_id,
                        worker = worker.worker_id(),
                        "acquired job no longer exists, skipping"
                    );
                    Ok(())
                }
                None => Err(ExecuteError::JobNotFound(job_id)),
            };
        };

        let auth = match &ctx.worker {
            Some(worker) => {
                worker.begin(job.id)?;
                // Downstream authorization must see the job's tenant, not an
                // anonymous worker identity.
                job.tenant_id.as_deref().map(Authentication::for_tenant)
            }
            None => {
                for checker in &self.checkers {
                    if let Err(cause) = checker.check_update_job(&job, ctx.auth.as_ref()) {
                        return Err(ExecuteError::NotAuthorized {
                            job_id: job.id,
                            cause,
                        });
                    }
                }
                ctx.auth.clone()
            }
        };

        let mut collector = JobFailureCollector::new();
        let exec_result = self
            .run_in_new_transaction(&job, auth)
            .instrument(telemetry::job_execution_span(&job))
            .await;

        if let Err(failure) = &exec_result {
            error!(
                job_id = %job.id,
                job_kind = %job.kind,
                error = %failure,
                "exception while executing job"
            );
            collector.record(FailureDetail::from_error(failure));
        }

        // Listener dispatch and slot cleanup happen regardless of the
        // attempt outcome.
        let dispatched = self.dispatch_listener(&job, collector.outcome()).await;

        if let Some(worker) = &ctx.worker {
            worker.finish();
        }

        match exec_result {
            Err(failure) => {
                if let Err(dispatch_error) = dispatched {
                    error!(
                        job_id = %job.id,
                        error = %dispatch_error,
                        "outcome listener dispatch failed after execution failure"
                    );
                }
                Err(match classify_failure(&failure) {
                    FailureKind::Application => ExecuteError::Application(failure),
                    FailureKind::Unexpected => ExecuteError::Unexpected {
                        job_id: job.id,
                        cause: failure,
                    },
                })
            }
            Ok(()) => dispatched.map_err(|cause| ExecuteError::Unexpected {
                job_id: job.id,
                cause,
            }),
        }
    }

    /// Run the job's handler in a fresh transaction, isolated from whatever
    /// triggered the execution. Handler resolution happens inside the
    /// transaction, so a missing handler counts as a failed attempt.
    async fn run_in_new_transaction(
        &self,
        job: &JobRecord,
        auth: Option<Authentication>,
    ) -> anyhow::Result<()> {
        let handlers = self.handlers.clone();
        let handler_ctx = HandlerContext {
            job: job.clone(),
            auth,
            meters: Arc::clone(&self.meters),
        };
        let kind = job.kind.clone();

        let work: TxWork = Box::pin(async move {
            let handler = handlers
                .get(&kind)
                .ok_or_else(|| anyhow::Error::new(HandlerNotFound(kind.clone())))?;
            handler.execute(&handler_ctx).await
        });

        self.tx.in_new_transaction(work).await
    }

    /// Dispatch the single outcome listener for this attempt in its own
    /// transaction, retrying per the configured dispatch-failure policy.
    async fn dispatch_listener(
        &self,
        job: &JobRecord,
        outcome: JobOutcome,
    ) -> anyhow::Result<()> {
        let attempts = match self.dispatch_failure_policy {
            DispatchFailurePolicy::Surface => 1,
            DispatchFailurePolicy::Retry { attempts } => attempts.max(1),
        };

        let mut last_error = None;
        for attempt in 1..=attempts {
            let (work, label) = match &outcome {
                JobOutcome::Success => (self.success_listener_work(job), "success"),
                JobOutcome::Failure(detail) => {
                    (self.failure_listener_work(job, detail.clone()), "failure")
                }
            };
            let span = telemetry::listener_dispatch_span(job.id, label);
            match self.tx.in_new_transaction(work).instrument(span).await {
                Ok(()) => {
                    self.publish_outcome(job, &outcome);
                    return Ok(());
                }
                Err(err) => {
                    warn!(
                        job_id = %job.id,
                        attempt,
                        error = %err,
                        "outcome listener transaction failed"
                    );
                    last_error = Some(err);
                }
            }
        }
        Err(last_error.expect("at least one dispatch attempt"))
    }

    /// Success is represented by absence: the job row is removed.
    fn success_listener_work(&self, job: &JobRecord) -> TxWork {
        let jobs = Arc::clone(&self.jobs);
        let meters = Arc::clone(&self.meters);
        let job_id = job.id;

        Box::pin(async move {
            jobs.delete(job_id).await?;
            meters.mark(names::JOB_SUCCESSFUL);
            Ok(())
        })
    }

    /// Decrement the retry budget, persist the failure, and either
    /// reschedule through the retry policy or, on exhaustion, create the
    /// incident and leave the job terminally failed.
    fn failure_listener_work(&self, job: &JobRecord, detail: FailureDetail) -> TxWork {
        let jobs = Arc::clone(&self.jobs);
        let incidents = Arc::clone(&self.incidents);
        let retry_policy = Arc::clone(&self.retry_policy);
        let meters = Arc::clone(&self.meters);
        let clock = Arc::clone(&self.clock);
        let job_id = job.id;

        Box::pin(async move {
            let Some(mut current) = jobs.find(job_id).await? else {
                warn!(%job_id, "job vanished before failure bookkeeping");
                return Ok(());
            };

            current.retries = current.retries.saturating_sub(1);
            current.failure = Some(detail.clone());

            if current.retries == 0 {
                current.due_date = None;
                jobs.upsert(&current).await?;
                incidents
                    .insert(&Incident::for_job(&current, detail, clock.now()))
                    .await?;
            } else {
                current.due_date = Some(retry_policy.next_due(clock.now(), &current));
                jobs.upsert(&current).await?;
            }
            meters.mark(names::JOB_FAILED);
            Ok(())
        })
    }

    fn publish_outcome(&self, job: &JobRecord, outcome: &JobOutcome) {
        let event = match outcome {
            JobOutcome::Success => {
                telemetry::record_job_executed(job.id, &job.kind);
                JobLifecycleEvent::Executed {
                    job_id: job.id,
                    kind: job.kind.clone(),
                }
            }
            JobOutcome::Failure(_) => {
                let retries_left = job.retries.saturating_sub(1);
                if retries_left == 0 {
                    telemetry::record_incident_created(job.id, &job.kind);
                    JobLifecycleEvent::IncidentCreated {
                        job_id: job.id,
                        kind: job.kind.clone(),
                    }
                } else {
                    telemetry::record_job_failed(job.id, &job.kind, retries_left);
                    JobLifecycleEvent::Failed {
                        job_id: job.id,
                        kind: job.kind.clone(),
                        retries_left,
                    }
                }
            }
        };
        self.events.publish(self.clock.now(), event);
    }
}
