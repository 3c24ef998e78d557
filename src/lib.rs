#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod backend;
mod backends;
mod background_job;
mod backoff;
/// Default configuration values.
pub mod config;
mod errors;
mod executor;
mod job_registry;
mod runner;
/// Job record types.
pub mod schema;
mod worker;

/// The persistence contract and its claim result type.
pub use self::backend::{Backend, ClaimOutcome};
/// In-process job store for tests and non-durable embedders.
pub use self::backends::memory::MemoryBackend;
/// PostgreSQL job store and its schema setup helper.
pub use self::backends::postgres::{PgBackend, setup_database};
/// The main trait for defining background jobs, and its enqueue options.
pub use self::background_job::{BackgroundJob, EnqueueOptions};
/// Retry delay policy.
pub use self::backoff::BackoffPolicy;
/// Error types for enqueueing, handlers, and storage.
pub use self::errors::{EnqueueError, HandlerError, JobNotFoundError, PersistenceError};
/// The runner that spawns and supervises workers.
pub use self::runner::{Configured, Queue, RunHandle, Runner, Unconfigured};
/// Job record and lifecycle state, re-exported for convenience.
pub use self::schema::{Job, JobStatus, NewJob};
