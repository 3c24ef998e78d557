use crate::errors::HandlerError;
use crate::job_registry::RegisteredJob;
use futures_util::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use tokio::time::timeout;

/// Structured result of a single guarded handler execution.
#[derive(Debug)]
pub(crate) enum ExecutionOutcome {
    Success,
    Retryable(String),
    Permanent(String),
    TimedOut,
}

/// Run one handler invocation under the job type's wall-clock limit,
/// capturing panics and classifying the result.
///
/// Panics are treated like retryable handler errors; they must never take
/// down the worker loop.
pub(crate) async fn execute<Context>(
    entry: &RegisteredJob<Context>,
    context: Context,
    args: Value,
) -> ExecutionOutcome {
    let future = (entry.run)(context, args);
    let guarded = AssertUnwindSafe(future).catch_unwind();

    match timeout(entry.max_runtime, guarded).await {
        Err(_elapsed) => ExecutionOutcome::TimedOut,
        Ok(Err(panic)) => ExecutionOutcome::Retryable(panic_message(&*panic)),
        Ok(Ok(Ok(()))) => ExecutionOutcome::Success,
        Ok(Ok(Err(HandlerError::Retryable(error)))) => {
            ExecutionOutcome::Retryable(format!("{error:#}"))
        }
        Ok(Ok(Err(HandlerError::Permanent(error)))) => {
            ExecutionOutcome::Permanent(format!("{error:#}"))
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<String>() {
        format!("job panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<&str>() {
        format!("job panicked: {message}")
    } else {
        "job panicked".to_owned()
    }
}
