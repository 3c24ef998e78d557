use crate::backend::Backend;
use crate::backoff::BackoffPolicy;
use crate::config::{
    DEFAULT_DELETE_FAILED_JOBS, DEFAULT_JITTER, DEFAULT_POLL_INTERVAL, DEFAULT_QUEUE,
};
use crate::job_registry::JobRegistry;
use crate::worker::Worker;
use crate::BackgroundJob;
use futures_util::future::join_all;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, info, info_span, warn};

/// Marker type for a configured runner
#[derive(Debug)]
#[allow(missing_copy_implementations)]
pub struct Configured;
/// Marker type for an unconfigured runner
#[derive(Debug)]
#[allow(missing_copy_implementations)]
pub struct Unconfigured;

/// The core runner responsible for spawning workers and running jobs.
///
/// A runner starts out `Unconfigured`; registering at least one job type
/// (directly or through [`configure_queue`](Self::configure_queue)) moves it
/// to `Configured`, which is what makes [`start`](Runner::start) available.
/// A runner with nothing to execute is therefore unrepresentable.
pub struct Runner<Context: Clone + Send + Sync + 'static, State = Unconfigured> {
    backend: Arc<dyn Backend>,
    queues: HashMap<String, Queue<Context, Configured>>,
    context: Context,
    shutdown_when_queue_empty: bool,
    _state: PhantomData<State>,
}

impl<Context: std::fmt::Debug + Clone + Sync + Send, State: std::fmt::Debug> std::fmt::Debug
    for Runner<Context, State>
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("queues", &self.queues.keys().collect::<Vec<_>>())
            .field("context", &self.context)
            .field("shutdown_when_queue_empty", &self.shutdown_when_queue_empty)
            .finish()
    }
}

impl<Context: Clone + Send + Sync + 'static> Runner<Context> {
    /// Create a new runner with the given backend and context.
    pub fn new(backend: Arc<dyn Backend>, context: Context) -> Self {
        Self {
            backend,
            queues: HashMap::new(),
            context,
            shutdown_when_queue_empty: false,
            _state: PhantomData,
        }
    }
}

impl<Context: Clone + Send + Sync + 'static, State> Runner<Context, State> {
    /// Configure a queue
    pub fn configure_queue(
        mut self,
        queue_name: &str,
        config_fn: impl FnOnce(Queue<Context>) -> Queue<Context, Configured>,
    ) -> Runner<Context, Configured> {
        self.queues
            .insert(queue_name.into(), config_fn(Queue::default()));

        Runner {
            backend: self.backend,
            queues: self.queues,
            context: self.context,
            shutdown_when_queue_empty: self.shutdown_when_queue_empty,
            _state: PhantomData,
        }
    }

    /// Configure the default queue
    pub fn configure_default_queue(
        self,
        config_fn: impl FnOnce(Queue<Context>) -> Queue<Context, Configured>,
    ) -> Runner<Context, Configured> {
        self.configure_queue(DEFAULT_QUEUE, config_fn)
    }

    /// Register a job type in the queue named by its
    /// [`QUEUE`](BackgroundJob::QUEUE) constant, creating the queue with
    /// default settings if it does not exist yet.
    pub fn register_job_type<J: BackgroundJob<Context = Context>>(
        mut self,
    ) -> Runner<Context, Configured> {
        let queue = match self.queues.remove(J::QUEUE) {
            Some(queue) => queue.register::<J>(),
            None => Queue::default().register::<J>(),
        };
        self.queues.insert(J::QUEUE.to_owned(), queue);

        Runner {
            backend: self.backend,
            queues: self.queues,
            context: self.context,
            shutdown_when_queue_empty: self.shutdown_when_queue_empty,
            _state: PhantomData,
        }
    }

    /// Set the runner to shut down when the background job queue is empty.
    pub fn shutdown_when_queue_empty(mut self) -> Self {
        self.shutdown_when_queue_empty = true;
        self
    }
}

impl<Context: Clone + Send + Sync + 'static> Runner<Context, Configured> {
    /// Start the background workers.
    ///
    /// This returns a [`RunHandle`] which can be used to request a graceful
    /// stop and to wait for the workers to shut down.
    pub fn start(&self) -> RunHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut handles = Vec::new();

        for (queue_name, queue) in &self.queues {
            for i in 1..=queue.num_workers {
                let name = format!("background-worker-{queue_name}-{i}-{}", process::id());
                info!(worker.name = %name, "Starting worker…");

                let worker = Worker {
                    backend: Arc::clone(&self.backend),
                    context: self.context.clone(),
                    job_registry: Arc::new(queue.job_registry.clone()),
                    name: name.clone(),
                    queues: vec![queue_name.clone()],
                    shutdown_when_queue_empty: self.shutdown_when_queue_empty,
                    poll_interval: queue.poll_interval,
                    jitter: queue.jitter,
                    backoff: queue.backoff,
                    delete_failed_jobs: queue.delete_failed_jobs,
                    shutdown: shutdown_rx.clone(),
                    pending_report: None,
                };

                let span = info_span!("worker", worker.name = %name);
                let handle = tokio::spawn(worker.run().instrument(span));

                handles.push(handle);
            }
        }

        RunHandle {
            shutdown_tx,
            handles,
        }
    }
}

/// Handle to a running background job processing system
#[derive(Debug)]
pub struct RunHandle {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl RunHandle {
    /// Request a graceful stop: workers stop claiming new jobs, let any
    /// in-flight handler finish (or time out) normally, then exit. The
    /// signal also interrupts idle poll sleeps.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Wait for all background workers to shut down.
    pub async fn wait_for_shutdown(self) {
        join_all(self.handles).await.into_iter().for_each(|result| {
            if let Err(error) = result {
                warn!(%error, "Background worker task panicked");
            }
        });
    }
}

/// Configuration and state for a job queue
pub struct Queue<Context: Clone + Send + Sync + 'static, State = Unconfigured> {
    job_registry: JobRegistry<Context>,
    num_workers: usize,
    poll_interval: Duration,
    jitter: Duration,
    backoff: BackoffPolicy,
    delete_failed_jobs: bool,
    _state: PhantomData<State>,
}

impl<Context: Clone + Send + Sync + 'static, State> std::fmt::Debug for Queue<Context, State> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("num_workers", &self.num_workers)
            .field("poll_interval", &self.poll_interval)
            .field("jitter", &self.jitter)
            .field("backoff", &self.backoff)
            .field("delete_failed_jobs", &self.delete_failed_jobs)
            .finish_non_exhaustive()
    }
}

impl<Context: Clone + Send + Sync + 'static> Default for Queue<Context, Unconfigured> {
    fn default() -> Self {
        Self {
            job_registry: JobRegistry::default(),
            num_workers: 1,
            poll_interval: DEFAULT_POLL_INTERVAL,
            jitter: DEFAULT_JITTER,
            backoff: BackoffPolicy::default(),
            delete_failed_jobs: DEFAULT_DELETE_FAILED_JOBS,
            _state: PhantomData,
        }
    }
}

impl<Context: Clone + Send + Sync + 'static, State> Queue<Context, State> {
    /// Set the number of worker tasks for this queue.
    pub fn num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    /// Set how often workers poll for new jobs.
    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Set the maximum random jitter to add to poll intervals.
    ///
    /// Jitter helps reduce thundering herd effects when multiple workers
    /// are polling for jobs simultaneously. The actual jitter applied will
    /// be a random value between 0 and the specified duration.
    pub fn jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Set the retry backoff policy for failed jobs in this queue.
    pub fn backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set whether permanently failed jobs are deleted instead of kept
    /// with a `Failed` status.
    pub fn delete_failed_jobs(mut self, delete_failed_jobs: bool) -> Self {
        self.delete_failed_jobs = delete_failed_jobs;
        self
    }

    /// Configure a job to run as part of this queue.
    pub fn register<J: BackgroundJob<Context = Context>>(mut self) -> Queue<Context, Configured> {
        self.job_registry.register::<J>();
        Queue {
            job_registry: self.job_registry,
            num_workers: self.num_workers,
            poll_interval: self.poll_interval,
            jitter: self.jitter,
            backoff: self.backoff,
            delete_failed_jobs: self.delete_failed_jobs,
            _state: PhantomData,
        }
    }
}
