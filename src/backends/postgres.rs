use crate::backend::{Backend, ClaimOutcome};
use crate::errors::PersistenceError;
use crate::schema::{Job, JobStatus, NewJob};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, PgPool};

const JOB_COLUMNS: &str =
    "id, name, args, queue, priority, run_at, attempts, max_attempts, status, last_error, locked_at, locked_by";

/// PostgreSQL-backed job store.
///
/// Claiming is a single conditional `UPDATE` on the lock columns, so two
/// workers racing for the same row can never both win, regardless of which
/// process they live in.
#[derive(Debug, Clone)]
pub struct PgBackend {
    pool: PgPool,
}

impl PgBackend {
    /// Create a backend on top of an existing connection pool.
    ///
    /// The `background_jobs` table must exist; see [`setup_database`].
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Run the bundled migrations, creating the `background_jobs` table.
pub async fn setup_database(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// Row shape of the `background_jobs` table.
#[derive(Debug, FromRow)]
struct JobRow {
    id: i64,
    name: String,
    args: Value,
    queue: String,
    priority: i16,
    run_at: DateTime<Utc>,
    attempts: i32,
    max_attempts: i32,
    status: String,
    last_error: Option<String>,
    locked_at: Option<DateTime<Utc>>,
    locked_by: Option<String>,
}

impl TryFrom<JobRow> for Job {
    type Error = PersistenceError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = JobStatus::parse(&row.status)
            .ok_or_else(|| PersistenceError::Other(format!("unknown job status `{}`", row.status)))?;

        Ok(Job {
            id: row.id,
            name: row.name,
            args: row.args,
            queue: row.queue,
            priority: row.priority,
            run_at: row.run_at,
            attempts: row.attempts,
            max_attempts: row.max_attempts,
            status,
            last_error: row.last_error,
            locked_at: row.locked_at,
            locked_by: row.locked_by,
        })
    }
}

#[async_trait]
impl Backend for PgBackend {
    async fn schedule(&self, job: NewJob) -> Result<i64, PersistenceError> {
        let id = sqlx::query_scalar::<_, i64>(
            r"
            INSERT INTO background_jobs (name, args, queue, priority, run_at, status, max_attempts)
            VALUES ($1, $2, $3, $4, $5, 'queued', $6)
            RETURNING id
            ",
        )
        .bind(&job.name)
        .bind(&job.args)
        .bind(&job.queue)
        .bind(job.priority)
        .bind(job.run_at)
        .bind(job.max_attempts)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn find_due(&self, queues: &[String], limit: usize) -> Result<Vec<Job>, PersistenceError> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            r"
            SELECT {JOB_COLUMNS}
            FROM background_jobs
            WHERE queue = ANY($1)
              AND status = 'queued'
              AND run_at <= NOW()
              AND locked_by IS NULL
            ORDER BY priority ASC, run_at ASC
            LIMIT $2
            ",
        ))
        .bind(queues)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Job::try_from).collect()
    }

    async fn claim(&self, job_id: i64, worker_id: &str) -> Result<ClaimOutcome, PersistenceError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            r"
            UPDATE background_jobs
            SET status = 'locked', locked_at = NOW(), locked_by = $2
            WHERE id = $1
              AND status = 'queued'
              AND run_at <= NOW()
              AND locked_by IS NULL
            RETURNING {JOB_COLUMNS}
            ",
        ))
        .bind(job_id)
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(ClaimOutcome::Claimed(row.try_into()?)),
            None => {
                let exists = sqlx::query_scalar::<_, bool>(
                    "SELECT EXISTS(SELECT 1 FROM background_jobs WHERE id = $1)",
                )
                .bind(job_id)
                .fetch_one(&self.pool)
                .await?;

                if exists {
                    Ok(ClaimOutcome::AlreadyClaimed)
                } else {
                    Ok(ClaimOutcome::NotFound)
                }
            }
        }
    }

    async fn succeed(&self, job_id: i64) -> Result<(), PersistenceError> {
        sqlx::query(
            r"
            UPDATE background_jobs
            SET status = 'completed', locked_at = NULL, locked_by = NULL
            WHERE id = $1
            ",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn reschedule(
        &self,
        job_id: i64,
        run_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), PersistenceError> {
        sqlx::query(
            r"
            UPDATE background_jobs
            SET status = 'queued',
                attempts = attempts + 1,
                last_error = $3,
                run_at = $2,
                locked_at = NULL,
                locked_by = NULL
            WHERE id = $1
            ",
        )
        .bind(job_id)
        .bind(run_at)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fail_permanently(&self, job_id: i64, error: &str) -> Result<(), PersistenceError> {
        sqlx::query(
            r"
            UPDATE background_jobs
            SET status = 'failed',
                attempts = attempts + 1,
                last_error = $2,
                locked_at = NULL,
                locked_by = NULL
            WHERE id = $1
            ",
        )
        .bind(job_id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, job_id: i64) -> Result<(), PersistenceError> {
        sqlx::query("DELETE FROM background_jobs WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
