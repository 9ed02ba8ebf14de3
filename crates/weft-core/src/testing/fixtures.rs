//! Ready-made steps for engine tests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::workflow::{StepBuilder, StepSpec};
use crate::StepError;

/// Shared attempt counter.
pub type CallCounter = Arc<AtomicU32>;

/// Shared, ordered record of step ids.
pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn call_counter() -> CallCounter {
    Arc::new(AtomicU32::new(0))
}

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Snapshot of a call log.
pub fn logged(log: &CallLog) -> Vec<String> {
    log.lock().unwrap_or_else(|e| e.into_inner()).clone()
}

fn push(log: &CallLog, entry: String) {
    log.lock().unwrap_or_else(|e| e.into_inner()).push(entry);
}

/// Step that returns `"<id>:done"`.
pub fn succeeding_step(id: &str) -> StepBuilder<(), String> {
    let output = format!("{}:done", id);
    StepSpec::source(id, move |_ctx| {
        let output = output.clone();
        async move { Ok(output) }
    })
}

/// Step that always fails with a retryable or fatal error.
pub fn failing_step(id: &str, retryable: bool) -> StepBuilder<(), ()> {
    let message = format!("{} failed", id);
    StepSpec::source(id, move |_ctx| {
        let err = if retryable {
            StepError::transient(message.clone())
        } else {
            StepError::fatal(message.clone())
        };
        async move { Err(err) }
    })
}

/// Step that bumps `counter` on every attempt and then fails.
pub fn counting_failure(id: &str, counter: CallCounter) -> StepBuilder<(), ()> {
    let message = format!("{} failed", id);
    StepSpec::source(id, move |_ctx| {
        counter.fetch_add(1, Ordering::SeqCst);
        let err = StepError::transient(message.clone());
        async move { Err(err) }
    })
}

/// Step that fails transiently for its first `failures` attempts.
pub fn flaky_step(id: &str, failures: u32, counter: CallCounter) -> StepBuilder<(), u32> {
    StepSpec::source(id, move |_ctx| {
        let attempt = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            if attempt < failures {
                Err(StepError::transient(format!("attempt {} failed", attempt)))
            } else {
                Ok(attempt)
            }
        }
    })
}

/// Step that sleeps for `duration` and returns `"<id>:done"`.
pub fn sleeping_step(id: &str, duration: Duration) -> StepBuilder<(), String> {
    let output = format!("{}:done", id);
    StepSpec::source(id, move |_ctx| {
        let output = output.clone();
        async move {
            tokio::time::sleep(duration).await;
            Ok(output)
        }
    })
}

/// Step that appends its id to `log` when it runs and `"undo:<id>"` when it
/// is compensated.
pub fn logged_step(id: &str, log: CallLog) -> StepBuilder<(), String> {
    let step_id = id.to_string();
    let run_log = log.clone();
    StepSpec::source(id, move |_ctx| {
        push(&run_log, step_id.clone());
        let output = step_id.clone();
        async move { Ok(output) }
    })
    .compensate(move |output: String, _ctx| {
        push(&log, format!("undo:{}", output));
        async move { Ok(()) }
    })
}
