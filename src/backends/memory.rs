use crate::backend::{Backend, ClaimOutcome};
use crate::errors::PersistenceError;
use crate::schema::{Job, JobStatus, NewJob};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

/// In-process, non-durable job store.
///
/// Useful for tests and for embedders that want background execution
/// without a database. The claim operation is atomic under the store's
/// mutex, so the concurrency contract matches the durable backends within
/// a single process.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    next_id: i64,
    jobs: BTreeMap<i64, Job>,
}

impl MemoryBackend {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a job record by id.
    ///
    /// Intended for tests and diagnostics; the worker only goes through
    /// the [`Backend`] trait.
    pub fn job(&self, job_id: i64) -> Option<Job> {
        let state = self.state.lock().ok()?;
        state.jobs.get(&job_id).cloned()
    }

    /// All job records currently in the store, in id order.
    pub fn jobs(&self) -> Vec<Job> {
        match self.state.lock() {
            Ok(state) => state.jobs.values().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, PersistenceError> {
        self.state
            .lock()
            .map_err(|_| PersistenceError::Other("memory backend mutex poisoned".to_owned()))
    }
}

fn claimable(job: &Job, now: DateTime<Utc>) -> bool {
    job.status == JobStatus::Queued && job.run_at <= now && job.locked_by.is_none()
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn schedule(&self, job: NewJob) -> Result<i64, PersistenceError> {
        let mut state = self.lock()?;
        state.next_id += 1;
        let id = state.next_id;
        state.jobs.insert(
            id,
            Job {
                id,
                name: job.name,
                args: job.args,
                queue: job.queue,
                priority: job.priority,
                run_at: job.run_at,
                attempts: 0,
                max_attempts: job.max_attempts,
                status: JobStatus::Queued,
                last_error: None,
                locked_at: None,
                locked_by: None,
            },
        );
        Ok(id)
    }

    async fn find_due(&self, queues: &[String], limit: usize) -> Result<Vec<Job>, PersistenceError> {
        let state = self.lock()?;
        let now = Utc::now();

        let mut due: Vec<Job> = state
            .jobs
            .values()
            .filter(|job| queues.contains(&job.queue) && claimable(job, now))
            .cloned()
            .collect();

        due.sort_by_key(|job| (job.priority, job.run_at));
        due.truncate(limit);
        Ok(due)
    }

    async fn claim(&self, job_id: i64, worker_id: &str) -> Result<ClaimOutcome, PersistenceError> {
        let mut state = self.lock()?;
        let now = Utc::now();

        let Some(job) = state.jobs.get_mut(&job_id) else {
            return Ok(ClaimOutcome::NotFound);
        };

        if !claimable(job, now) {
            return Ok(ClaimOutcome::AlreadyClaimed);
        }

        job.status = JobStatus::Locked;
        job.locked_at = Some(now);
        job.locked_by = Some(worker_id.to_owned());
        Ok(ClaimOutcome::Claimed(job.clone()))
    }

    async fn succeed(&self, job_id: i64) -> Result<(), PersistenceError> {
        let mut state = self.lock()?;
        if let Some(job) = state.jobs.get_mut(&job_id) {
            job.status = JobStatus::Completed;
            job.locked_at = None;
            job.locked_by = None;
        }
        Ok(())
    }

    async fn reschedule(
        &self,
        job_id: i64,
        run_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), PersistenceError> {
        let mut state = self.lock()?;
        if let Some(job) = state.jobs.get_mut(&job_id) {
            job.status = JobStatus::Queued;
            job.attempts += 1;
            job.last_error = Some(error.to_owned());
            job.run_at = run_at;
            job.locked_at = None;
            job.locked_by = None;
        }
        Ok(())
    }

    async fn fail_permanently(&self, job_id: i64, error: &str) -> Result<(), PersistenceError> {
        let mut state = self.lock()?;
        if let Some(job) = state.jobs.get_mut(&job_id) {
            job.status = JobStatus::Failed;
            job.attempts += 1;
            job.last_error = Some(error.to_owned());
            job.locked_at = None;
            job.locked_by = None;
        }
        Ok(())
    }

    async fn delete(&self, job_id: i64) -> Result<(), PersistenceError> {
        let mut state = self.lock()?;
        state.jobs.remove(&job_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use claims::assert_some;
    use serde_json::json;

    fn new_job(name: &str, queue: &str, priority: i16, run_at: DateTime<Utc>) -> NewJob {
        NewJob {
            name: name.to_owned(),
            args: json!([]),
            queue: queue.to_owned(),
            priority,
            run_at,
            max_attempts: 24,
        }
    }

    fn default_queues() -> Vec<String> {
        vec!["default".to_owned()]
    }

    #[tokio::test]
    async fn find_due_orders_by_priority_then_run_at() -> anyhow::Result<()> {
        let backend = MemoryBackend::new();
        let now = Utc::now();

        let earlier = now - Duration::minutes(10);
        let later = now - Duration::minutes(5);

        backend.schedule(new_job("a", "default", 10, later)).await?;
        backend.schedule(new_job("b", "default", 5, later)).await?;
        backend.schedule(new_job("c", "default", 20, later)).await?;
        backend.schedule(new_job("d", "default", 5, earlier)).await?;

        let due = backend.find_due(&default_queues(), 10).await?;
        let order: Vec<(&str, i16)> = due
            .iter()
            .map(|job| (job.name.as_str(), job.priority))
            .collect();

        assert_eq!(order, [("d", 5), ("b", 5), ("a", 10), ("c", 20)]);
        Ok(())
    }

    #[tokio::test]
    async fn future_jobs_are_not_due() -> anyhow::Result<()> {
        let backend = MemoryBackend::new();
        let in_an_hour = Utc::now() + Duration::hours(1);

        let id = backend
            .schedule(new_job("later", "default", 50, in_an_hour))
            .await?;

        assert!(backend.find_due(&default_queues(), 10).await?.is_empty());
        assert!(matches!(
            backend.claim(id, "w1").await?,
            ClaimOutcome::AlreadyClaimed
        ));

        // Once run_at passes the job becomes claimable.
        backend
            .reschedule(id, Utc::now() - Duration::seconds(1), "rewind")
            .await?;
        assert_eq!(backend.find_due(&default_queues(), 10).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn find_due_is_scoped_to_queues() -> anyhow::Result<()> {
        let backend = MemoryBackend::new();
        let past = Utc::now() - Duration::seconds(1);

        backend.schedule(new_job("a", "emails", 50, past)).await?;
        backend.schedule(new_job("b", "default", 50, past)).await?;

        let due = backend.find_due(&["emails".to_owned()], 10).await?;
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].name, "a");
        Ok(())
    }

    #[tokio::test]
    async fn only_one_concurrent_claim_wins() -> anyhow::Result<()> {
        use std::sync::Arc;

        let backend = Arc::new(MemoryBackend::new());
        let past = Utc::now() - Duration::seconds(1);
        let id = backend.schedule(new_job("contended", "default", 50, past)).await?;

        let mut tasks = Vec::new();
        for worker in 0..16 {
            let backend = Arc::clone(&backend);
            tasks.push(tokio::spawn(async move {
                backend.claim(id, &format!("worker-{worker}")).await
            }));
        }

        let mut claimed = 0;
        for task in tasks {
            if let ClaimOutcome::Claimed(_) = task.await?? {
                claimed += 1;
            }
        }

        assert_eq!(claimed, 1);
        Ok(())
    }

    #[tokio::test]
    async fn terminal_jobs_cannot_be_claimed() -> anyhow::Result<()> {
        let backend = MemoryBackend::new();
        let past = Utc::now() - Duration::seconds(1);

        let completed = backend.schedule(new_job("done", "default", 50, past)).await?;
        backend.succeed(completed).await?;
        assert!(matches!(
            backend.claim(completed, "w1").await?,
            ClaimOutcome::AlreadyClaimed
        ));

        let failed = backend.schedule(new_job("dead", "default", 50, past)).await?;
        backend.fail_permanently(failed, "gone").await?;
        assert!(matches!(
            backend.claim(failed, "w1").await?,
            ClaimOutcome::AlreadyClaimed
        ));

        assert!(matches!(
            backend.claim(9999, "w1").await?,
            ClaimOutcome::NotFound
        ));
        Ok(())
    }

    #[tokio::test]
    async fn reschedule_increments_attempts_and_releases_lock() -> anyhow::Result<()> {
        let backend = MemoryBackend::new();
        let past = Utc::now() - Duration::seconds(1);
        let id = backend.schedule(new_job("retry", "default", 50, past)).await?;

        let ClaimOutcome::Claimed(job) = backend.claim(id, "w1").await? else {
            panic!("claim should succeed");
        };
        assert_eq!(job.status, JobStatus::Locked);
        assert_eq!(job.locked_by.as_deref(), Some("w1"));

        let retry_at = Utc::now() + Duration::seconds(30);
        backend.reschedule(id, retry_at, "try again").await?;

        let job = assert_some!(backend.job(id));
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.last_error.as_deref(), Some("try again"));
        assert_eq!(job.run_at, retry_at);
        assert_eq!(job.locked_at, None);
        assert_eq!(job.locked_by, None);
        Ok(())
    }
}
