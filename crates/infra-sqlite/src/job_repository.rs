// SQLite JobRepository Implementation

use async_trait::async_trait;
use photospec_core::domain::{
    ArtifactRef, ErrorKind, Job, JobError, JobId, JobMode, JobStatus, OutputArtifact, PhotoSpec,
};
use photospec_core::error::{AppError, Result};
use photospec_core::port::JobRepository;
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::map_sqlx_error;

pub struct SqliteJobRepository {
    pool: SqlitePool,
}

impl SqliteJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Explain why a conditional update touched no rows
    async fn missed_update(&self, id: &JobId, expected: JobStatus) -> AppError {
        let current: std::result::Result<Option<String>, _> =
            sqlx::query_scalar("SELECT status FROM jobs WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await;
        match current {
            Ok(None) => AppError::NotFound(format!("Job {} not found", id)),
            Ok(Some(status)) => AppError::InvalidState(format!(
                "Job {} is {}, expected {}",
                id, status, expected
            )),
            Err(e) => map_sqlx_error(e),
        }
    }
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    async fn insert(&self, job: &Job) -> Result<()> {
        let row = JobRow::from_job(job)?;

        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, country_id, spec, mode, input_ref, status,
                created_at, updated_at, expires_at,
                result, error_kind, error_detail
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.id)
        .bind(&row.country_id)
        .bind(&row.spec)
        .bind(&row.mode)
        .bind(&row.input_ref)
        .bind(&row.status)
        .bind(row.created_at)
        .bind(row.updated_at)
        .bind(row.expires_at)
        .bind(&row.result)
        .bind(&row.error_kind)
        .bind(&row.error_detail)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn find_by_id(&self, id: &JobId) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(JobRow::into_job).transpose()
    }

    async fn claim(&self, id: &JobId, now_millis: i64) -> Result<Option<Job>> {
        // Conditional update: only a PENDING job can be claimed
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET status = 'PROCESSING', updated_at = ?
            WHERE id = ? AND status = 'PENDING'
            RETURNING *
            "#,
        )
        .bind(now_millis)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(JobRow::into_job).transpose()
    }

    async fn claim_next(&self, now_millis: i64) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET status = 'PROCESSING', updated_at = ?
            WHERE id = (
                SELECT id FROM jobs
                WHERE status = 'PENDING'
                ORDER BY created_at ASC, id ASC
                LIMIT 1
            )
              AND status = 'PENDING'
            RETURNING *
            "#,
        )
        .bind(now_millis)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if let Some(r) = &row {
            debug!(job_id = %r.id, "Claimed next pending job");
        }
        row.map(JobRow::into_job).transpose()
    }

    async fn record_outcome(&self, job: &Job) -> Result<()> {
        if !job.is_terminal() {
            return Err(AppError::InvalidState(format!(
                "Job {} outcome must be terminal, got {}",
                job.id, job.status
            )));
        }
        let row = JobRow::from_job(job)?;

        // Conditional update: a terminal state is written exactly once
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?, updated_at = ?, result = ?, error_kind = ?, error_detail = ?
            WHERE id = ? AND status = 'PROCESSING'
            "#,
        )
        .bind(&row.status)
        .bind(row.updated_at)
        .bind(&row.result)
        .bind(&row.error_kind)
        .bind(&row.error_detail)
        .bind(&row.id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(self.missed_update(&job.id, JobStatus::Processing).await);
        }
        Ok(())
    }

    async fn find_by_status(&self, status: JobStatus) -> Result<Vec<Job>> {
        let rows: Vec<JobRow> = sqlx::query_as(
            r#"
            SELECT * FROM jobs
            WHERE status = ?
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(status.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(JobRow::into_job).collect()
    }

    async fn delete_expired(&self, now_millis: i64) -> Result<Vec<Job>> {
        let rows: Vec<JobRow> = sqlx::query_as(
            r#"
            DELETE FROM jobs
            WHERE expires_at <= ? AND status != 'PROCESSING'
            RETURNING *
            "#,
        )
        .bind(now_millis)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(JobRow::into_job).collect()
    }
}

/// SQLite row representation
#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: String,
    country_id: String,
    spec: String,
    mode: String,
    input_ref: String,
    status: String,
    created_at: i64,
    updated_at: i64,
    expires_at: i64,
    result: Option<String>,
    error_kind: Option<String>,
    error_detail: Option<String>,
}

impl JobRow {
    fn from_job(job: &Job) -> Result<Self> {
        Ok(Self {
            id: job.id.clone(),
            country_id: job.country_id.clone(),
            spec: serde_json::to_string(&job.spec)?,
            mode: serde_json::to_string(&job.mode)?,
            input_ref: job.input.as_str().to_string(),
            status: job.status.to_string(),
            created_at: job.created_at,
            updated_at: job.updated_at,
            expires_at: job.expires_at,
            result: job.result.as_ref().map(serde_json::to_string).transpose()?,
            error_kind: job.error.as_ref().map(|e| e.kind.to_string()),
            error_detail: job.error.as_ref().map(|e| e.detail.clone()),
        })
    }

    fn into_job(self) -> Result<Job> {
        let status: JobStatus = self.status.parse()?;
        let spec: PhotoSpec = serde_json::from_str(&self.spec)?;
        let mode: JobMode = serde_json::from_str(&self.mode)?;
        let result: Option<OutputArtifact> =
            self.result.as_deref().map(serde_json::from_str).transpose()?;

        let error = match self.error_kind {
            Some(kind) => Some(JobError::new(
                kind.parse::<ErrorKind>()?,
                self.error_detail.unwrap_or_default(),
            )),
            None => None,
        };

        Ok(Job {
            id: self.id,
            country_id: self.country_id,
            spec,
            mode,
            input: ArtifactRef::new(self.input_ref),
            status,
            created_at: self.created_at,
            updated_at: self.updated_at,
            expires_at: self.expires_at,
            result,
            error,
        })
    }
}
