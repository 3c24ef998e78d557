use crate::BackgroundJob;
use crate::errors::HandlerError;
use anyhow::anyhow;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Type-erased run function for a registered job type.
pub(crate) type RunJobFn<Context> =
    Arc<dyn Fn(Context, Value) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync>;

/// A resolved job handler together with its per-type execution limits.
pub(crate) struct RegisteredJob<Context> {
    pub(crate) run: RunJobFn<Context>,
    pub(crate) max_runtime: Duration,
}

impl<Context> Clone for RegisteredJob<Context> {
    fn clone(&self) -> Self {
        Self {
            run: Arc::clone(&self.run),
            max_runtime: self.max_runtime,
        }
    }
}

/// Maps job names to their handlers.
///
/// This is the resolver the worker consults for every claimed job; a name
/// with no entry is a permanent failure of that job instance. Registering
/// the same `JOB_NAME` twice replaces the earlier entry.
pub(crate) struct JobRegistry<Context> {
    jobs: HashMap<String, RegisteredJob<Context>>,
}

impl<Context> Default for JobRegistry<Context> {
    fn default() -> Self {
        Self {
            jobs: HashMap::new(),
        }
    }
}

impl<Context> Clone for JobRegistry<Context> {
    fn clone(&self) -> Self {
        Self {
            jobs: self.jobs.clone(),
        }
    }
}

impl<Context: Clone + Send + 'static> JobRegistry<Context> {
    pub(crate) fn register<J: BackgroundJob<Context = Context>>(&mut self) {
        let entry = RegisteredJob {
            run: Arc::new(runnable::<J>),
            max_runtime: J::MAX_RUNTIME,
        };
        self.jobs.insert(J::JOB_NAME.to_owned(), entry);
    }

    pub(crate) fn get(&self, name: &str) -> Option<&RegisteredJob<Context>> {
        self.jobs.get(name)
    }
}

/// Deserialize the payload back into the job type and run it.
///
/// A payload that no longer deserializes will never succeed, so it is
/// reported as a permanent failure rather than retried.
fn runnable<J: BackgroundJob>(
    context: J::Context,
    args: Value,
) -> BoxFuture<'static, Result<(), HandlerError>> {
    async move {
        let job: J = serde_json::from_value(args)
            .map_err(|err| HandlerError::Permanent(anyhow!("failed to deserialize job payload: {err}")))?;
        job.run(context).await
    }
    .boxed()
}
