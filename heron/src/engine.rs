use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex, Notify};

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::context::{ExecutionContext, UpdateJobChecker};
use crate::error::ExecuteError;
use crate::events::{EngineEvent, EngineEventBus};
use crate::executor::JobCoordinator;
use crate::job::{HandlerRegistry, JobHandler, JobId};
use crate::meter::MeterRegistry;
use crate::persistence::memory::{InMemoryIncidentStore, InMemoryJobStore, InMemoryMeterLogStore};
use crate::query::{LiveCounters, MetricsQuery};
use crate::reporter::MetricsReporter;
use crate::retry::{ExponentialBackoffPolicy, RetryPolicy};
use crate::store::{IncidentStore, JobStore, MeterLogStore};
use crate::transaction::{SpawnedTransactionExecutor, TransactionExecutor};

/// Token for signaling graceful shutdown to background tasks.
#[derive(Clone, Debug)]
pub struct ShutdownToken {
    inner: Arc<ShutdownTokenInner>,
}

#[derive(Debug)]
struct ShutdownTokenInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl ShutdownToken {
    /// Create a new shutdown token.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ShutdownTokenInner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Signal cancellation.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Check if cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Wait until cancelled.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.inner.notify.notified().await;
    }
}

impl Default for ShutdownToken {
    fn default() -> Self {
        Self::new()
    }
}

/// The background work-execution core: job coordinator, meter registry,
/// metrics reporter and query surface wired together with an explicit
/// start/shutdown lifecycle.
pub struct JobEngine {
    config: EngineConfig,
    coordinator: JobCoordinator,
    jobs: Arc<dyn JobStore>,
    incidents: Arc<dyn IncidentStore>,
    meter_log: Arc<dyn MeterLogStore>,
    meters: Arc<MeterRegistry>,
    reporter: Arc<MetricsReporter>,
    events: EngineEventBus,
    clock: Arc<dyn Clock>,
    shutdown_token: ShutdownToken,
    reporter_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl JobEngine {
    /// Start building an engine. All collaborators default to in-process
    /// implementations.
    pub fn builder() -> JobEngineBuilder {
        JobEngineBuilder::new()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start background tasks: the periodic metrics reporter, when enabled.
    pub async fn start(&self) -> anyhow::Result<()> {
        if self.config.reporter.enabled {
            let handle = Arc::clone(&self.reporter).spawn(self.shutdown_token.clone());
            *self.reporter_handle.lock().await = Some(handle);
        }
        Ok(())
    }

    /// Gracefully shut down background tasks.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        tracing::info!("initiating engine shutdown");
        self.shutdown_token.cancel();

        let handle = self.reporter_handle.lock().await.take();
        if let Some(handle) = handle {
            match tokio::time::timeout(tokio::time::Duration::from_secs(30), handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!("reporter task failed: {:?}", e),
                Err(_) => tracing::warn!("reporter task timed out during shutdown"),
            }
        }

        tracing::info!("engine shutdown complete");
        Ok(())
    }

    /// Execute one job by id under the given context. See
    /// [`JobCoordinator::execute`] for the protocol.
    pub async fn execute(&self, job_id: JobId, ctx: &ExecutionContext) -> Result<(), ExecuteError> {
        self.coordinator.execute(job_id, ctx).await
    }

    /// New metrics query over this engine's durable rows and live counters.
    pub fn create_metrics_query(&self) -> MetricsQuery {
        MetricsQuery::new(Arc::clone(&self.meter_log), Arc::clone(&self.clock)).with_live(
            LiveCounters {
                registry: Arc::clone(&self.meters),
                reporter_id: self.config.reporter.reporter_id.clone(),
            },
        )
    }

    /// Flush the meter registry once, outside the periodic schedule.
    pub async fn report_metrics_now(&self) -> anyhow::Result<u64> {
        self.reporter.report_now().await
    }

    /// Administrative reset of the durable meter log, optionally narrowed to
    /// one reporter. Live counters are untouched.
    pub async fn delete_metrics(&self, reporter: Option<&str>) -> anyhow::Result<u64> {
        self.meter_log.delete_all(reporter).await
    }

    pub fn meters(&self) -> Arc<MeterRegistry> {
        Arc::clone(&self.meters)
    }

    pub fn job_store(&self) -> Arc<dyn JobStore> {
        Arc::clone(&self.jobs)
    }

    pub fn incident_store(&self) -> Arc<dyn IncidentStore> {
        Arc::clone(&self.incidents)
    }

    /// Subscribe to the attempt-outcome event stream.
    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}

impl std::fmt::Debug for JobEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobEngine")
            .field("config", &self.config)
            .field("shutdown_cancelled", &self.shutdown_token.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Builder for [`JobEngine`] with explicit collaborators and in-process
/// defaults for each.
pub struct JobEngineBuilder {
    config: EngineConfig,
    jobs: Option<Arc<dyn JobStore>>,
    incidents: Option<Arc<dyn IncidentStore>>,
    meter_log: Option<Arc<dyn MeterLogStore>>,
    tx: Option<Arc<dyn TransactionExecutor>>,
    retry_policy: Option<Arc<dyn RetryPolicy>>,
    clock: Option<Arc<dyn Clock>>,
    checkers: Vec<Arc<dyn UpdateJobChecker>>,
    handlers: HandlerRegistry,
}

impl JobEngineBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            jobs: None,
            incidents: None,
            meter_log: None,
            tx: None,
            retry_policy: None,
            clock: None,
            checkers: Vec::new(),
            handlers: HandlerRegistry::new(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_job_store(mut self, jobs: Arc<dyn JobStore>) -> Self {
        self.jobs = Some(jobs);
        self
    }

    pub fn with_incident_store(mut self, incidents: Arc<dyn IncidentStore>) -> Self {
        self.incidents = Some(incidents);
        self
    }

    pub fn with_meter_log_store(mut self, meter_log: Arc<dyn MeterLogStore>) -> Self {
        self.meter_log = Some(meter_log);
        self
    }

    pub fn with_transaction_executor(mut self, tx: Arc<dyn TransactionExecutor>) -> Self {
        self.tx = Some(tx);
        self
    }

    pub fn with_retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Add an authorization checker consulted on direct invocations.
    pub fn with_update_job_checker(mut self, checker: Arc<dyn UpdateJobChecker>) -> Self {
        self.checkers.push(checker);
        self
    }

    /// Register a handler for a job kind.
    pub fn with_handler(self, kind: impl Into<String>, handler: Arc<dyn JobHandler>) -> Self {
        self.handlers.register(kind, handler);
        self
    }

    pub fn build(self) -> JobEngine {
        let jobs = self
            .jobs
            .unwrap_or_else(|| Arc::new(InMemoryJobStore::new()));
        let incidents = self
            .incidents
            .unwrap_or_else(|| Arc::new(InMemoryIncidentStore::new()));
        let meter_log = self
            .meter_log
            .unwrap_or_else(|| Arc::new(InMemoryMeterLogStore::new()));
        let tx = self
            .tx
            .unwrap_or_else(|| Arc::new(SpawnedTransactionExecutor));
        let retry_policy = self.retry_policy.unwrap_or_else(|| {
            Arc::new(ExponentialBackoffPolicy {
                initial_retries: self.config.default_retries,
                ..ExponentialBackoffPolicy::default()
            })
        });
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let meters = Arc::new(MeterRegistry::new());
        let events = EngineEventBus::default();

        let reporter = Arc::new(MetricsReporter::new(
            Arc::clone(&meters),
            Arc::clone(&meter_log),
            self.config.reporter.clone(),
            Arc::clone(&clock),
        ));

        let coordinator = JobCoordinator::new(
            Arc::clone(&jobs),
            Arc::clone(&incidents),
            self.handlers,
            tx,
            retry_policy,
            self.checkers,
            Arc::clone(&meters),
            events.clone(),
            Arc::clone(&clock),
            self.config.dispatch_failure_policy,
        );

        JobEngine {
            config: self.config,
            coordinator,
            jobs,
            incidents,
            meter_log,
            meters,
            reporter,
            events,
            clock,
            shutdown_token: ShutdownToken::new(),
            reporter_handle: Mutex::new(None),
        }
    }
}

impl Default for JobEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for JobEngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobEngineBuilder")
            .field("config", &self.config)
            .field("jobs_set", &self.jobs.is_some())
            .field("incidents_set", &self.incidents.is_some())
            .field("meter_log_set", &self.meter_log.is_some())
            .field("tx_set", &self.tx.is_some())
            .field("retry_policy_set", &self.retry_policy.is_some())
            .field("clock_set", &self.clock.is_some())
            .field("checkers", &self.checkers.len())
            .field("handlers", &self.handlers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_shutdown_token_shared_state() {
        let token = ShutdownToken::new();
        let clone1 = token.clone();
        let clone2 = token.clone();

        token.cancel();

        assert!(clone1.is_cancelled());
        assert!(clone2.is_cancelled());

        // cancelled() should return immediately (not hang)
        timeout(Duration::from_secs(1), clone1.cancelled())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_token_default_not_cancelled() {
        let token = ShutdownToken::default();
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn test_engine_start_shutdown_round_trip() {
        let engine = JobEngine::builder().build();
        engine.start().await.unwrap();
        timeout(Duration::from_secs(5), engine.shutdown())
            .await
            .expect("shutdown did not complete within 5 seconds")
            .unwrap();
    }
}
