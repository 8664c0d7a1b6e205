use serde::{Deserialize, Serialize};

/// Behavior when the outcome-listener transaction itself fails (for example
/// storage unavailable while recording an incident).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum DispatchFailurePolicy {
    /// Surface the dispatch error to a direct caller — unless the execution
    /// itself failed, in which case the original failure takes precedence
    /// and the dispatch error is only logged.
    Surface,
    /// Re-run the dispatch transaction up to `attempts` times before
    /// surfacing.
    Retry { attempts: u32 },
}

impl Default for DispatchFailurePolicy {
    fn default() -> Self {
        Self::Surface
    }
}

/// Engine-wide configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Retry budget newly created jobs start with.
    pub default_retries: u32,
    pub dispatch_failure_policy: DispatchFailurePolicy,
    pub reporter: ReporterConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_retries: 3,
            dispatch_failure_policy: DispatchFailurePolicy::default(),
            reporter: ReporterConfig::default(),
        }
    }
}

/// Configuration of the metrics reporter.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReporterConfig {
    /// Whether the periodic flush task is started with the engine.
    pub enabled: bool,
    /// Identity written into every flushed row. Reporters with distinct
    /// identities may share one store without coordination.
    pub reporter_id: String,
    /// Period of the flush schedule in milliseconds.
    pub flush_interval_ms: u64,
    /// Granularity flushed row timestamps are floored to, in milliseconds.
    pub row_granularity_ms: i64,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            reporter_id: "default-reporter".to_string(),
            flush_interval_ms: 900_000, // 15 minutes
            row_granularity_ms: 1000,
        }
    }
}

impl ReporterConfig {
    pub fn with_reporter_id(mut self, reporter_id: impl Into<String>) -> Self {
        self.reporter_id = reporter_id.into();
        self
    }

    pub fn with_flush_interval_ms(mut self, ms: u64) -> Self {
        self.flush_interval_ms = ms;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}
