//! Heron - background job-execution core for process orchestration.
//!
//! A durable job queue whose entries represent asynchronous units of work
//! (timers, retries, async continuations) executed transactionally, retried
//! on failure with a shrinking budget, and escalated to a permanent
//! [`Incident`] once the budget is exhausted — coupled with a metering
//! subsystem that counts execution activity and answers time-bucketed
//! aggregate queries over it.
//!
//! # Core Concepts
//!
//! - **Job**: a persisted unit of work ([`JobRecord`]) with a due time and a
//!   retry budget. Its logic is a [`JobHandler`] registered by kind. Success
//!   is represented by the row's absence.
//!
//! - **Coordinator**: [`JobCoordinator`] executes one job inside a fresh
//!   transaction, classifies failures, and dispatches exactly one outcome
//!   listener in a second transaction so retry bookkeeping survives a
//!   rollback of the job's own side effects.
//!
//! - **Incident**: terminal failure record created when a job's retry budget
//!   reaches zero.
//!
//! - **Meters**: lock-free named counters ([`Meter`], [`MeterRegistry`])
//!   drained durably by the [`MetricsReporter`] and queried through
//!   [`MetricsQuery`], which also sees not-yet-flushed counter state.
//!
//! - **Engine**: [`JobEngine`] wires stores, registry, coordinator and
//!   reporter together with an explicit start/shutdown lifecycle.
//!
//! Job *acquisition* — selecting and locking due jobs — is deliberately out
//! of scope; acquisition loops call [`JobEngine::execute`] with a
//! [`context::WorkerSlot`] and get vanished-job tolerance in return.
//!
//! # Feature Flags
//!
//! - `postgres` - PostgreSQL persistence support via sqlx
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use heron::*;
//!
//! let engine = JobEngine::builder()
//!     .with_handler("send-mail", Arc::new(SendMailHandler))
//!     .build();
//! engine.start().await?;
//!
//! engine.execute(job_id, &ExecutionContext::direct()).await?;
//! let buckets = engine.create_metrics_query().limit(10).interval().await?;
//! ```

/// Engine time source.
///
/// The `clock` module defines the [`Clock`] trait and the wall-clock
/// [`SystemClock`]; every timestamp the engine writes flows through it.
pub mod clock;

/// Configuration structures for the engine and the metrics reporter.
pub mod config;

/// Explicit execution context: worker slots, authentication, and the
/// [`UpdateJobChecker`] authorization hook for direct invocations.
pub mod context;

/// The typed error taxonomy: [`ExecuteError`], [`QueryError`].
pub mod error;

/// Attempt-outcome event stream.
///
/// The `events` module provides [`JobLifecycleEvent`] and the in-process
/// broadcast [`EngineEventBus`].
pub mod events;

/// Job execution protocol.
///
/// The `executor` module provides the [`JobCoordinator`], the tagged
/// [`JobOutcome`], the [`FailureKind`] classification and the
/// [`JobFailureCollector`].
pub mod executor;

/// Core job data model and handler abstractions:
/// - [`JobRecord`] / [`JobId`] - the persisted job
/// - [`Incident`] / [`IncidentId`] - terminal failure records
/// - [`FailureDetail`] - persisted failure information
/// - [`JobHandler`] and [`HandlerRegistry`] - pluggable job logic
pub mod job;

/// In-process metering: [`Meter`], [`MeterRegistry`] and the well-known
/// [`meter::names`].
pub mod meter;

/// Interval-aggregation query engine over flushed and live counters.
pub mod query;

/// Periodic and manual flushing of meters into the durable log.
pub mod reporter;

/// Pluggable retry backoff policies.
pub mod retry;

/// Storage contracts: [`JobStore`], [`IncidentStore`], [`MeterLogStore`] and
/// the meter log row/filter types.
pub mod store;

/// Tracing span and record helpers.
pub mod telemetry;

/// The transactional-fabric contract and its default spawned-task executor.
pub mod transaction;

/// Store implementations: in-memory defaults, PostgreSQL behind the
/// `postgres` feature.
pub mod persistence;

/// Engine assembly and lifecycle: [`JobEngine`], [`engine::JobEngineBuilder`]
/// and [`engine::ShutdownToken`].
pub mod engine;

pub use clock::{Clock, SystemClock};
pub use config::{DispatchFailurePolicy, EngineConfig, ReporterConfig};
pub use context::{
    Authentication, ExecutionContext, TenantUpdateJobChecker, UpdateJobChecker, WorkerSlot,
};
pub use engine::{JobEngine, JobEngineBuilder, ShutdownToken};
pub use error::{ExecuteError, QueryError};
pub use events::{EngineEvent, EngineEventBus, JobLifecycleEvent};
pub use executor::{FailureKind, JobCoordinator, JobFailureCollector, JobOutcome};
pub use job::{
    FailureDetail, HandlerContext, HandlerRegistry, Incident, IncidentId, JobHandler, JobId,
    JobRecord,
};
pub use meter::{Meter, MeterRegistry};
pub use query::{MetricIntervalValue, MetricsQuery, DEFAULT_INTERVAL_SECS, MAX_INTERVAL_ROWS};
pub use reporter::MetricsReporter;
pub use retry::{ExponentialBackoffPolicy, FixedDelayPolicy, RetryPolicy};
pub use store::{IncidentStore, JobStore, MeterLogFilter, MeterLogRow, MeterLogStore};
pub use transaction::{SpawnedTransactionExecutor, TransactionAborted, TransactionExecutor, TxWork};
