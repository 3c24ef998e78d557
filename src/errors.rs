use thiserror::Error;

/// Error type for job enqueueing operations.
#[derive(Debug, Error)]
pub enum EnqueueError {
    /// The job payload could not be serialized to JSON.
    #[error("failed to serialize job payload: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The job type declares an empty `JOB_NAME`.
    #[error("job name must not be empty")]
    EmptyName,

    /// The backend failed to persist the job.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// A storage-level failure reported by a persistence backend.
///
/// These are transient infrastructure errors. Workers log them and keep
/// polling; they never mark a job as failed because of one.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// The underlying database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A backend-specific failure that is not a database error.
    #[error("storage failure: {0}")]
    Other(String),
}

/// A claimed job names a handler that is not registered with the worker's
/// queue.
///
/// This never resolves without a code change, so the job is failed
/// permanently rather than retried.
#[derive(Debug, Error)]
#[error("no job registered with name `{name}`")]
pub struct JobNotFoundError {
    /// The unresolvable job name.
    pub name: String,
}

/// Error returned by job handlers.
///
/// Handlers distinguish failures that are worth retrying from those that
/// will never succeed. A plain [`anyhow::Error`] converts into the
/// [`Retryable`](Self::Retryable) variant, so `?` works for the common case:
///
/// ```
/// use conveyor::HandlerError;
///
/// async fn run() -> Result<(), HandlerError> {
///     let parsed: i64 = "42".parse().map_err(anyhow::Error::from)?;
///     if parsed < 0 {
///         return Err(HandlerError::permanent(anyhow::anyhow!("negative id")));
///     }
///     Ok(())
/// }
/// ```
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The failure is transient; the job will be rescheduled with backoff
    /// until its attempt budget is exhausted.
    #[error(transparent)]
    Retryable(anyhow::Error),

    /// The failure will never resolve on its own; the job is failed
    /// immediately without consuming further attempts.
    #[error("permanent failure: {0}")]
    Permanent(anyhow::Error),
}

impl HandlerError {
    /// Wrap an error as a retryable failure.
    pub fn retryable(error: impl Into<anyhow::Error>) -> Self {
        Self::Retryable(error.into())
    }

    /// Wrap an error as a permanent failure, skipping all remaining retries.
    pub fn permanent(error: impl Into<anyhow::Error>) -> Self {
        Self::Permanent(error.into())
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(error: anyhow::Error) -> Self {
        Self::Retryable(error)
    }
}
