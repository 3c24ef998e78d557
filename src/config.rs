//! Default configuration values for jobs, queues, and workers.
//!
//! Nothing in here is process-global state; the constants are the defaults
//! applied by the [`crate::BackgroundJob`] trait and the queue builder, and
//! every one of them can be overridden per job type or per queue.

use std::time::Duration;

/// Queue used when a job type does not override [`crate::BackgroundJob::QUEUE`].
pub const DEFAULT_QUEUE: &str = "default";

/// Default job priority. Lower values are claimed first.
pub const DEFAULT_PRIORITY: i16 = 50;

/// Default ceiling on execution attempts before a job fails permanently.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 24;

/// Default wall-clock limit for a single handler execution (4 hours).
pub const DEFAULT_MAX_RUNTIME: Duration = Duration::from_secs(4 * 60 * 60);

/// How long a worker sleeps between polls when no job is claimable.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Maximum random jitter added to the poll interval.
pub const DEFAULT_JITTER: Duration = Duration::from_millis(100);

/// Whether permanently failed jobs are deleted instead of kept with a
/// `Failed` status.
pub const DEFAULT_DELETE_FAILED_JOBS: bool = false;
