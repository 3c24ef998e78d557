use crate::backend::{Backend, ClaimOutcome};
use crate::backoff::BackoffPolicy;
use crate::errors::{JobNotFoundError, PersistenceError};
use crate::executor::{self, ExecutionOutcome};
use crate::job_registry::JobRegistry;
use crate::schema::Job;
use chrono::Utc;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{Instrument, debug, error, info_span, trace, warn};

/// How many due candidates to fetch per poll. Claim races with other
/// workers are resolved by moving on to the next candidate in the batch.
const CLAIM_BATCH_SIZE: usize = 5;

/// An execution outcome whose recording failed at the backend.
///
/// The job is still locked by this worker, so the outcome must not be
/// dropped; the worker keeps retrying on subsequent loop iterations until
/// the backend accepts it.
pub(crate) struct PendingReport {
    job: Job,
    outcome: ExecutionOutcome,
    failures: u32,
}

pub(crate) struct Worker<Context> {
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) context: Context,
    pub(crate) job_registry: Arc<JobRegistry<Context>>,
    pub(crate) name: String,
    pub(crate) queues: Vec<String>,
    pub(crate) shutdown_when_queue_empty: bool,
    pub(crate) poll_interval: Duration,
    pub(crate) jitter: Duration,
    pub(crate) backoff: BackoffPolicy,
    pub(crate) delete_failed_jobs: bool,
    pub(crate) shutdown: watch::Receiver<bool>,
    pub(crate) pending_report: Option<PendingReport>,
}

impl<Context: Clone + Send + Sync + 'static> Worker<Context> {
    /// Calculate the sleep duration with random jitter applied.
    fn sleep_duration_with_jitter(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.poll_interval;
        }

        let jitter_millis = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        let random_jitter = rand::thread_rng().gen_range(0..=jitter_millis);
        self.poll_interval + Duration::from_millis(random_jitter)
    }

    /// Run jobs until shutdown is requested, or until the queue is empty if
    /// `shutdown_when_queue_empty` is set.
    ///
    /// Errors inside a single job never escape this loop; storage errors
    /// are logged and polling continues.
    pub(crate) async fn run(mut self) {
        loop {
            if *self.shutdown.borrow() {
                debug!("Shutdown requested. Stopping the worker…");
                break;
            }

            // An unrecorded outcome takes priority over new work; the job
            // it belongs to is still locked by this worker.
            if self.pending_report.is_some() {
                self.retry_pending_report().await;
                if self.pending_report.is_some() {
                    if self.sleep_or_shutdown(self.sleep_duration_with_jitter()).await {
                        break;
                    }
                    continue;
                }
            }

            match self.run_next_job().await {
                Ok(Some(_)) => {}
                Ok(None) if self.shutdown_when_queue_empty => {
                    debug!("No pending background worker jobs found. Shutting down the worker…");
                    break;
                }
                Ok(None) => {
                    let sleep_duration = self.sleep_duration_with_jitter();
                    trace!(
                        "No pending background worker jobs found. Polling again in {sleep_duration:?}…",
                    );
                    if self.sleep_or_shutdown(sleep_duration).await {
                        break;
                    }
                }
                Err(error) => {
                    error!("Failed to poll for jobs: {error:#}");
                    if self.sleep_or_shutdown(self.sleep_duration_with_jitter()).await {
                        break;
                    }
                }
            }
        }

        // One last chance for an unrecorded outcome before exiting.
        if let Some(pending) = self.pending_report.take() {
            if let Err(error) = self.record_outcome(&pending.job, &pending.outcome).await {
                error!(
                    job.id = pending.job.id,
                    "Exiting with an unrecorded job outcome: {error}"
                );
            }
        }
    }

    /// Sleep for `duration`. Returns `true` if shutdown was requested while
    /// sleeping, so a stop never waits out a full poll interval.
    async fn sleep_or_shutdown(&mut self, duration: Duration) -> bool {
        tokio::select! {
            _ = sleep(duration) => false,
            _ = self.shutdown.changed() => true,
        }
    }

    /// Claim and run the next due job in this worker's queues, if any.
    ///
    /// Returns:
    /// - `Ok(Some(job_id))` if a job was run
    /// - `Ok(None)` if no jobs were claimable
    /// - `Err(...)` if the backend failed while finding or claiming
    async fn run_next_job(&mut self) -> anyhow::Result<Option<i64>> {
        trace!("Looking for next background worker job…");
        let candidates = self.backend.find_due(&self.queues, CLAIM_BATCH_SIZE).await?;

        for candidate in candidates {
            match self.backend.claim(candidate.id, &self.name).await? {
                ClaimOutcome::Claimed(job) => {
                    let span = info_span!("job", job.id = %job.id, job.name = %job.name);
                    let job_id = job.id;
                    self.process_claimed_job(job).instrument(span).await;
                    return Ok(Some(job_id));
                }
                ClaimOutcome::AlreadyClaimed | ClaimOutcome::NotFound => {
                    trace!(job.id = candidate.id, "Lost the claim race, trying next candidate…");
                }
            }
        }

        Ok(None)
    }

    async fn process_claimed_job(&mut self, job: Job) {
        debug!("Running job…");

        let outcome = match self.job_registry.get(&job.name) {
            Some(entry) => executor::execute(entry, self.context.clone(), job.args.clone()).await,
            None => {
                let error = JobNotFoundError {
                    name: job.name.clone(),
                };
                ExecutionOutcome::Permanent(error.to_string())
            }
        };

        if let Err(storage_error) = self.record_outcome(&job, &outcome).await {
            warn!(
                job.id = job.id,
                "Storage failure while recording job outcome, will retry: {storage_error}"
            );
            self.pending_report = Some(PendingReport {
                job,
                outcome,
                failures: 1,
            });
        }
    }

    /// Retry recording a previously failed outcome. A repeated failure on
    /// the same job escalates to error severity.
    async fn retry_pending_report(&mut self) {
        let Some(mut pending) = self.pending_report.take() else {
            return;
        };

        if let Err(storage_error) = self.record_outcome(&pending.job, &pending.outcome).await {
            pending.failures += 1;
            error!(
                job.id = pending.job.id,
                "Storage failure while recording job outcome ({} consecutive failures): {storage_error}",
                pending.failures
            );
            self.pending_report = Some(pending);
        }
    }

    /// Record the execution outcome with the backend.
    async fn record_outcome(
        &self,
        job: &Job,
        outcome: &ExecutionOutcome,
    ) -> Result<(), PersistenceError> {
        match outcome {
            ExecutionOutcome::Success => {
                debug!("Job completed");
                self.backend.succeed(job.id).await
            }
            ExecutionOutcome::Permanent(reason) => {
                warn!("Job failed permanently: {reason}");
                self.finalize_failure(job, reason).await
            }
            ExecutionOutcome::Retryable(reason) => self.retry_or_fail(job, reason).await,
            ExecutionOutcome::TimedOut => {
                self.retry_or_fail(job, "job exceeded its maximum runtime").await
            }
        }
    }

    async fn retry_or_fail(&self, job: &Job, reason: &str) -> Result<(), PersistenceError> {
        let attempts = job.attempts + 1;
        if attempts >= job.max_attempts {
            warn!(
                "Job failed and exhausted its {} attempts: {reason}",
                job.max_attempts
            );
            return self.finalize_failure(job, reason).await;
        }

        let delay = self.backoff.delay_for(attempts);
        let run_at = Utc::now() + delay;
        warn!(
            "Job failed on attempt {attempts} of {}, retrying in {delay:?}: {reason}",
            job.max_attempts
        );
        self.backend.reschedule(job.id, run_at, reason).await
    }

    async fn finalize_failure(&self, job: &Job, reason: &str) -> Result<(), PersistenceError> {
        if self.delete_failed_jobs {
            self.backend.delete(job.id).await
        } else {
            self.backend.fail_permanently(job.id, reason).await
        }
    }
}
