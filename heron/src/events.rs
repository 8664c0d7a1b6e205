use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::job::JobId;

/// Outcome of one execution attempt, published after the outcome listener's
/// transaction has committed.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum JobLifecycleEvent {
    /// The job succeeded and its row was removed.
    Executed { job_id: JobId, kind: String },
    /// The attempt failed and the job was rescheduled.
    Failed {
        job_id: JobId,
        kind: String,
        retries_left: u32,
    },
    /// The attempt failed with an exhausted budget; an incident now exists.
    IncidentCreated { job_id: JobId, kind: String },
}

impl JobLifecycleEvent {
    pub fn job_id(&self) -> JobId {
        match self {
            Self::Executed { job_id, .. }
            | Self::Failed { job_id, .. }
            | Self::IncidentCreated { job_id, .. } => *job_id,
        }
    }
}

/// Envelope adding the observation time.
#[derive(Clone, Debug)]
pub struct EngineEvent {
    pub at: DateTime<Utc>,
    pub event: JobLifecycleEvent,
}

/// In-process fan-out bus for engine lifecycle events.
///
/// Non-blocking publish on a tokio broadcast channel; subscribers that lag
/// see `RecvError::Lagged` without ever blocking the execution path, and
/// publishing with no subscribers is a no-op.
#[derive(Clone, Debug)]
pub struct EngineEventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EngineEventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, at: DateTime<Utc>, event: JobLifecycleEvent) {
        let _ = self.tx.send(EngineEvent { at, event });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }
}

impl Default for EngineEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
