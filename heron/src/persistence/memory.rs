use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::job::{Incident, JobId, JobRecord};
use crate::store::{IncidentStore, JobStore, MeterLogFilter, MeterLogRow, MeterLogStore};

/// In-memory job store, the engine default.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, JobRecord>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored jobs.
    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn find(&self, id: JobId) -> anyhow::Result<Option<JobRecord>> {
        Ok(self.jobs.read().get(&id).cloned())
    }

    async fn upsert(&self, job: &JobRecord) -> anyhow::Result<()> {
        self.jobs.write().insert(job.id, job.clone());
        Ok(())
    }

    async fn delete(&self, id: JobId) -> anyhow::Result<bool> {
        Ok(self.jobs.write().remove(&id).is_some())
    }

    async fn update_if_version(
        &self,
        job: &JobRecord,
        expected_version: u32,
    ) -> anyhow::Result<bool> {
        let mut jobs = self.jobs.write();
        match jobs.get_mut(&job.id) {
            Some(stored) if stored.lock_version == expected_version => {
                let mut updated = job.clone();
                updated.lock_version = expected_version + 1;
                *stored = updated;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// In-memory incident store, the engine default.
#[derive(Debug, Default)]
pub struct InMemoryIncidentStore {
    incidents: RwLock<Vec<Incident>>,
}

impl InMemoryIncidentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<Incident> {
        self.incidents.read().clone()
    }
}

#[async_trait]
impl IncidentStore for InMemoryIncidentStore {
    async fn insert(&self, incident: &Incident) -> anyhow::Result<()> {
        self.incidents.write().push(incident.clone());
        Ok(())
    }

    async fn find_for_job(&self, job_id: JobId) -> anyhow::Result<Vec<Incident>> {
        Ok(self
            .incidents
            .read()
            .iter()
            .filter(|incident| incident.job_id == job_id)
            .cloned()
            .collect())
    }
}

/// In-memory append-only meter log, the engine default.
#[derive(Debug, Default)]
pub struct InMemoryMeterLogStore {
    rows: RwLock<Vec<MeterLogRow>>,
}

impl InMemoryMeterLogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MeterLogStore for InMemoryMeterLogStore {
    async fn insert(&self, row: &MeterLogRow) -> anyhow::Result<()> {
        self.rows.write().push(row.clone());
        Ok(())
    }

    async fn scan(&self, filter: &MeterLogFilter) -> anyhow::Result<Vec<MeterLogRow>> {
        Ok(self
            .rows
            .read()
            .iter()
            .filter(|row| filter.matches(row))
            .cloned()
            .collect())
    }

    async fn delete_all(&self, reporter: Option<&str>) -> anyhow::Result<u64> {
        let mut rows = self.rows.write();
        match reporter {
            Some(reporter) => {
                let before = rows.len();
                rows.retain(|row| row.reporter != reporter);
                Ok((before - rows.len()) as u64)
            }
            None => {
                let removed = rows.len();
                rows.clear();
                Ok(removed as u64)
            }
        }
    }
}
