use crate::backend::Backend;
use crate::config::{
    DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_RUNTIME, DEFAULT_PRIORITY, DEFAULT_QUEUE,
};
use crate::errors::{EnqueueError, HandlerError};
use crate::schema::NewJob;
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::Duration;
use tracing::instrument;

/// Trait for defining background jobs that can be enqueued and executed
/// asynchronously.
pub trait BackgroundJob: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Unique name of the job type.
    ///
    /// This MUST be unique for the whole application.
    const JOB_NAME: &'static str;

    /// Default priority of the job. Lower values are claimed first.
    ///
    /// [`Self::enqueue_with`] can be used to override the priority per
    /// enqueue.
    const PRIORITY: i16 = DEFAULT_PRIORITY;

    /// Job queue where this job will be executed.
    const QUEUE: &'static str = DEFAULT_QUEUE;

    /// Ceiling on execution attempts before the job fails permanently.
    const MAX_ATTEMPTS: i32 = DEFAULT_MAX_ATTEMPTS;

    /// Wall-clock limit for a single execution of this job.
    const MAX_RUNTIME: Duration = DEFAULT_MAX_RUNTIME;

    /// The application data provided to this job at runtime.
    type Context: Clone + Send + 'static;

    /// Execute the job. This method should define its logic.
    fn run(&self, ctx: Self::Context) -> impl Future<Output = Result<(), HandlerError>> + Send;

    /// Enqueue this job for background execution with its default queue,
    /// priority, and an immediate run-at time.
    ///
    /// This is fire-and-forget: the job record is persisted and the
    /// assigned id returned, but nothing executes synchronously.
    #[instrument(name = "conveyor.enqueue", skip(self, backend), fields(job.name = Self::JOB_NAME))]
    fn enqueue<'a>(&'a self, backend: &'a dyn Backend) -> BoxFuture<'a, Result<i64, EnqueueError>> {
        self.enqueue_with(backend, EnqueueOptions::default())
    }

    /// Enqueue this job, overriding queue, priority, or run-at time.
    #[instrument(name = "conveyor.enqueue", skip(self, backend, options), fields(job.name = Self::JOB_NAME))]
    fn enqueue_with<'a>(
        &'a self,
        backend: &'a dyn Backend,
        options: EnqueueOptions,
    ) -> BoxFuture<'a, Result<i64, EnqueueError>> {
        let args = match serde_json::to_value(self) {
            Ok(args) => args,
            Err(err) => return async move { Err(EnqueueError::Serialization(err)) }.boxed(),
        };

        async move {
            if Self::JOB_NAME.is_empty() {
                return Err(EnqueueError::EmptyName);
            }

            let job = NewJob {
                name: Self::JOB_NAME.to_owned(),
                args,
                queue: options.queue.unwrap_or_else(|| Self::QUEUE.to_owned()),
                priority: options.priority.unwrap_or(Self::PRIORITY),
                run_at: options.run_at.unwrap_or_else(Utc::now),
                max_attempts: Self::MAX_ATTEMPTS,
            };

            Ok(backend.schedule(job).await?)
        }
        .boxed()
    }
}

/// Per-enqueue overrides for [`BackgroundJob::enqueue_with`].
///
/// Every `None` falls back to the job type's associated constants, or to
/// "now" for [`run_at`](Self::run_at).
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Target queue, overriding [`BackgroundJob::QUEUE`].
    pub queue: Option<String>,
    /// Priority, overriding [`BackgroundJob::PRIORITY`].
    pub priority: Option<i16>,
    /// Earliest execution time, for scheduled/delayed jobs.
    pub run_at: Option<DateTime<Utc>>,
}
