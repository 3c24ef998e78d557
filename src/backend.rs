use crate::errors::PersistenceError;
use crate::schema::{Job, NewJob};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Result of a [`Backend::claim`] call.
///
/// Losing a claim race is an expected outcome, not an error, so it is
/// modeled as a variant rather than an `Err`.
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    /// The claim succeeded; the returned record reflects the locked state.
    Claimed(Job),
    /// The job exists but is not claimable: another worker holds the lock,
    /// its `run_at` is still in the future, or it has reached a terminal
    /// state.
    AlreadyClaimed,
    /// No job with the given id exists.
    NotFound,
}

/// Persistence contract for job storage.
///
/// The backend is the only shared mutable resource in the system; all
/// coordination between workers is mediated by [`claim`](Self::claim), which
/// must be a single atomic conditional update on the lock fields. In-memory
/// locking is never assumed to be sufficient, since multiple worker processes
/// may run against the same store.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Persist a new job and return its assigned id.
    async fn schedule(&self, job: NewJob) -> Result<i64, PersistenceError>;

    /// Return up to `limit` claimable jobs in the given queues.
    ///
    /// A job is claimable when its status is [`Queued`](crate::JobStatus::Queued),
    /// its `run_at` is not in the future, and no worker holds a lock on it.
    /// Results are ordered by `priority` ascending, then `run_at` ascending.
    async fn find_due(&self, queues: &[String], limit: usize) -> Result<Vec<Job>, PersistenceError>;

    /// Atomically claim a claimable job for `worker_id`.
    async fn claim(&self, job_id: i64, worker_id: &str) -> Result<ClaimOutcome, PersistenceError>;

    /// Mark a job completed and release its lock.
    async fn succeed(&self, job_id: i64) -> Result<(), PersistenceError>;

    /// Return a failed job to the queue: increment `attempts`, record the
    /// error, set the new `run_at`, and release the lock.
    async fn reschedule(
        &self,
        job_id: i64,
        run_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), PersistenceError>;

    /// Move a job to the terminal failed state: increment `attempts`,
    /// record the error, and release the lock.
    async fn fail_permanently(&self, job_id: i64, error: &str) -> Result<(), PersistenceError>;

    /// Remove a job record entirely.
    async fn delete(&self, job_id: i64) -> Result<(), PersistenceError>;
}
