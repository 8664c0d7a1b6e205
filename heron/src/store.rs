use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::{Incident, JobId, JobRecord};

/// Durable storage for job rows.
///
/// The store itself is an external collaborator; this is the contract the
/// engine relies on: read, upsert, delete, and an atomic compare-and-swap on
/// the versioned row (used by the out-of-scope acquisition subsystem and
/// available to embedders).
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn find(&self, id: JobId) -> anyhow::Result<Option<JobRecord>>;

    /// Insert or replace the row for `job.id`.
    async fn upsert(&self, job: &JobRecord) -> anyhow::Result<()>;

    /// Delete the row. Returns whether a row existed.
    async fn delete(&self, id: JobId) -> anyhow::Result<bool>;

    /// Replace the row only if its `lock_version` still equals
    /// `expected_version`; the stored version is bumped on success. Returns
    /// whether the swap applied.
    async fn update_if_version(
        &self,
        job: &JobRecord,
        expected_version: u32,
    ) -> anyhow::Result<bool>;
}

/// Durable storage for incidents.
#[async_trait]
pub trait IncidentStore: Send + Sync {
    async fn insert(&self, incident: &Incident) -> anyhow::Result<()>;

    async fn find_for_job(&self, job_id: JobId) -> anyhow::Result<Vec<Incident>>;
}

/// One flushed counter observation.
///
/// Rows are logically additive: several rows may exist for the same
/// `(timestamp, name, reporter)` and must be summed, never overwritten.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeterLogRow {
    pub timestamp: DateTime<Utc>,
    pub name: String,
    pub reporter: String,
    pub value: i64,
}

/// Row predicate shared by the durable scan and the live-counter merge.
/// `start_date` is inclusive, `end_date` exclusive.
#[derive(Clone, Debug, Default)]
pub struct MeterLogFilter {
    pub name: Option<String>,
    pub reporter: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

impl MeterLogFilter {
    pub fn matches(&self, row: &MeterLogRow) -> bool {
        if let Some(name) = &self.name {
            if row.name != *name {
                return false;
            }
        }
        if let Some(reporter) = &self.reporter {
            if row.reporter != *reporter {
                return false;
            }
        }
        if let Some(start) = self.start_date {
            if row.timestamp < start {
                return false;
            }
        }
        if let Some(end) = self.end_date {
            if row.timestamp >= end {
                return false;
            }
        }
        true
    }
}

/// Append-only log of flushed counter values.
#[async_trait]
pub trait MeterLogStore: Send + Sync {
    /// Append one row. Never merges with existing rows.
    async fn insert(&self, row: &MeterLogRow) -> anyhow::Result<()>;

    /// All rows matching the filter, in no particular order.
    async fn scan(&self, filter: &MeterLogFilter) -> anyhow::Result<Vec<MeterLogRow>>;

    /// Administrative reset: delete one reporter's rows, or every row when
    /// `reporter` is `None`. Returns the number of rows removed. Live
    /// (unflushed) counters are not touched.
    async fn delete_all(&self, reporter: Option<&str>) -> anyhow::Result<u64>;
}
