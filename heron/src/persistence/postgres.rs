use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::job::{FailureDetail, Incident, IncidentId, JobId, JobRecord};
use crate::store::{IncidentStore, JobStore, MeterLogFilter, MeterLogRow, MeterLogStore};

/// Create the engine tables if they do not exist yet.
pub async fn ensure_schema(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS heron_jobs (
            id UUID PRIMARY KEY,
            kind TEXT NOT NULL,
            payload JSONB NOT NULL,
            due_date TIMESTAMPTZ,
            retries INT NOT NULL,
            failure_message TEXT,
            failure_stack_trace TEXT,
            lock_owner TEXT,
            lock_version INT NOT NULL DEFAULT 0,
            tenant_id TEXT,
            created_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS heron_incidents (
            id UUID PRIMARY KEY,
            job_id UUID NOT NULL,
            job_kind TEXT NOT NULL,
            tenant_id TEXT,
            failure_message TEXT NOT NULL,
            failure_stack_trace TEXT,
            created_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS heron_meter_log (
            id BIGSERIAL PRIMARY KEY,
            ts TIMESTAMPTZ NOT NULL,
            name TEXT NOT NULL,
            reporter TEXT NOT NULL,
            value BIGINT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

fn job_from_row(row: &sqlx::postgres::PgRow) -> anyhow::Result<JobRecord> {
    let failure_message: Option<String> = row.try_get("failure_message")?;
    let failure_stack_trace: Option<String> = row.try_get("failure_stack_trace")?;
    let failure = failure_message.map(|message| FailureDetail {
        message,
        stack_trace: failure_stack_trace,
    });

    Ok(JobRecord {
        id: JobId(row.try_get("id")?),
        kind: row.try_get("kind")?,
        payload: row.try_get("payload")?,
        due_date: row.try_get("due_date")?,
        retries: row.try_get::<i32, _>("retries")? as u32,
        failure,
        lock_owner: row.try_get("lock_owner")?,
        lock_version: row.try_get::<i32, _>("lock_version")? as u32,
        tenant_id: row.try_get("tenant_id")?,
        created_at: row.try_get("created_at")?,
    })
}

/// PostgreSQL-backed job store.
#[derive(Clone, Debug)]
pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn find(&self, id: JobId) -> anyhow::Result<Option<JobRecord>> {
        let row = sqlx::query("SELECT * FROM heron_jobs WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn upsert(&self, job: &JobRecord) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO heron_jobs (
                id, kind, payload, due_date, retries, failure_message,
                failure_stack_trace, lock_owner, lock_version, tenant_id, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE SET
                kind = EXCLUDED.kind,
                payload = EXCLUDED.payload,
                due_date = EXCLUDED.due_date,
                retries = EXCLUDED.retries,
                failure_message = EXCLUDED.failure_message,
                failure_stack_trace = EXCLUDED.failure_stack_trace,
                lock_owner = EXCLUDED.lock_owner,
                lock_version = EXCLUDED.lock_version,
                tenant_id = EXCLUDED.tenant_id
            "#,
        )
        .bind(job.id.0)
        .bind(&job.kind)
        .bind(&job.payload)
        .bind(job.due_date)
        .bind(job.retries as i32)
        .bind(job.failure.as_ref().map(|f| f.message.clone()))
        .bind(job.failure.as_ref().and_then(|f| f.stack_trace.clone()))
        .bind(&job.lock_owner)
        .bind(job.lock_version as i32)
        .bind(&job.tenant_id)
        .bind(job.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, id: JobId) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM heron_jobs WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_if_version(
        &self,
        job: &JobRecord,
        expected_version: u32,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE heron_jobs
            SET kind = $2,
                payload = $3,
                due_date = $4,
                retries = $5,
                failure_message = $6,
                failure_stack_trace = $7,
                lock_owner = $8,
                lock_version = lock_version + 1,
                tenant_id = $9
            WHERE id = $1
              AND lock_version = $10
            "#,
        )
        .bind(job.id.0)
        .bind(&job.kind)
        .bind(&job.payload)
        .bind(job.due_date)
        .bind(job.retries as i32)
        .bind(job.failure.as_ref().map(|f| f.message.clone()))
        .bind(job.failure.as_ref().and_then(|f| f.stack_trace.clone()))
        .bind(&job.lock_owner)
        .bind(&job.tenant_id)
        .bind(expected_version as i32)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// PostgreSQL-backed incident store.
#[derive(Clone, Debug)]
pub struct PostgresIncidentStore {
    pool: PgPool,
}

impl PostgresIncidentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IncidentStore for PostgresIncidentStore {
    async fn insert(&self, incident: &Incident) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO heron_incidents (
                id, job_id, job_kind, tenant_id, failure_message,
                failure_stack_trace, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(incident.id.0)
        .bind(incident.job_id.0)
        .bind(&incident.job_kind)
        .bind(&incident.tenant_id)
        .bind(&incident.failure.message)
        .bind(&incident.failure.stack_trace)
        .bind(incident.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_for_job(&self, job_id: JobId) -> anyhow::Result<Vec<Incident>> {
        let rows =
            sqlx::query("SELECT * FROM heron_incidents WHERE job_id = $1 ORDER BY created_at ASC")
                .bind(job_id.0)
                .fetch_all(&self.pool)
                .await?;

        rows.iter()
            .map(|row| {
                Ok(Incident {
                    id: IncidentId(row.try_get("id")?),
                    job_id: JobId(row.try_get("job_id")?),
                    job_kind: row.try_get("job_kind")?,
                    tenant_id: row.try_get("tenant_id")?,
                    failure: FailureDetail {
                        message: row.try_get("failure_message")?,
                        stack_trace: row.try_get("failure_stack_trace")?,
                    },
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }
}

/// PostgreSQL-backed append-only meter log.
#[derive(Clone, Debug)]
pub struct PostgresMeterLogStore {
    pool: PgPool,
}

impl PostgresMeterLogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MeterLogStore for PostgresMeterLogStore {
    async fn insert(&self, row: &MeterLogRow) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO heron_meter_log (ts, name, reporter, value) VALUES ($1, $2, $3, $4)",
        )
        .bind(row.timestamp)
        .bind(&row.name)
        .bind(&row.reporter)
        .bind(row.value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn scan(&self, filter: &MeterLogFilter) -> anyhow::Result<Vec<MeterLogRow>> {
        let rows = sqlx::query(
            r#"
            SELECT ts, name, reporter, value
            FROM heron_meter_log
            WHERE ($1::TEXT IS NULL OR name = $1)
              AND ($2::TEXT IS NULL OR reporter = $2)
              AND ($3::TIMESTAMPTZ IS NULL OR ts >= $3)
              AND ($4::TIMESTAMPTZ IS NULL OR ts < $4)
            "#,
        )
        .bind(&filter.name)
        .bind(&filter.reporter)
        .bind(filter.start_date)
        .bind(filter.end_date)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(MeterLogRow {
                    timestamp: row.try_get("ts")?,
                    name: row.try_get("name")?,
                    reporter: row.try_get("reporter")?,
                    value: row.try_get("value")?,
                })
            })
            .collect()
    }

    async fn delete_all(&self, reporter: Option<&str>) -> anyhow::Result<u64> {
        let result = match reporter {
            Some(reporter) => {
                sqlx::query("DELETE FROM heron_meter_log WHERE reporter = $1")
                    .bind(reporter)
                    .execute(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("DELETE FROM heron_meter_log")
                    .execute(&self.pool)
                    .await?
            }
        };
        Ok(result.rows_affected())
    }
}
