use std::any::Any;
use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use weft_core::StepError;

/// Aborts the wrapped task when dropped, so abandoning a wait also stops
/// the work.
pub(crate) struct AbortOnDrop<T>(pub(crate) JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Bounds the wall time of a unit of work.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeoutHandler;

impl TimeoutHandler {
    pub fn new() -> Self {
        Self
    }

    /// Run `work` in its own task with a deadline.
    ///
    /// On expiry the task is aborted and `StepError::TimedOut` returned. A
    /// panic inside the task becomes `StepError::Panicked`; ordinary errors
    /// come back unchanged.
    pub async fn run<T, Fut>(&self, timeout: Duration, work: Fut) -> Result<T, StepError>
    where
        T: Send + 'static,
        Fut: Future<Output = Result<T, StepError>> + Send + 'static,
    {
        let mut task = AbortOnDrop(tokio::spawn(work));

        match tokio::time::timeout(timeout, &mut task.0).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(join_error_to_step_error(join_error)),
            Err(_) => Err(StepError::timed_out(timeout)),
        }
    }

    /// Resolves once `deadline` has passed, or never when there is none.
    /// Raced against in-place work that borrows from the caller.
    pub async fn expiry(&self, deadline: Option<Instant>) {
        match deadline {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending().await,
        }
    }
}

pub(crate) fn join_error_to_step_error(error: tokio::task::JoinError) -> StepError {
    if error.is_panic() {
        StepError::Panicked {
            message: panic_message(error.into_panic()),
        }
    } else {
        StepError::Cancelled
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn test_fast_work_returns_value() {
        let result = TimeoutHandler::new()
            .run(Duration::from_secs(1), async { Ok::<_, StepError>(7) })
            .await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_yields_timed_out_and_stops_work() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();

        let result = TimeoutHandler::new()
            .run(Duration::from_millis(50), async move {
                tokio::time::sleep(Duration::from_secs(10)).await;
                flag.store(true, Ordering::SeqCst);
                Ok::<_, StepError>(())
            })
            .await;

        assert_eq!(result, Err(StepError::TimedOut { after_ms: 50 }));

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_original_error_is_preserved() {
        let result = TimeoutHandler::new()
            .run(Duration::from_secs(1), async {
                Err::<(), _>(StepError::fatal("upstream said no"))
            })
            .await;
        assert_eq!(result, Err(StepError::fatal("upstream said no")));
    }

    #[tokio::test]
    async fn test_panic_becomes_step_error() {
        let result = TimeoutHandler::new()
            .run(Duration::from_secs(1), async {
                if true {
                    panic!("boom");
                }
                Ok::<(), StepError>(())
            })
            .await;
        assert_eq!(
            result,
            Err(StepError::Panicked {
                message: "boom".into()
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_races_in_place_work() {
        let handler = TimeoutHandler::new();
        let deadline = Some(Instant::now() + Duration::from_millis(10));

        let raced = tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(1)) => "work",
            _ = handler.expiry(deadline) => "expired",
        };
        assert_eq!(raced, "expired");

        let unbounded = tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(1)) => "work",
            _ = handler.expiry(None) => "expired",
        };
        assert_eq!(unbounded, "work");
    }
}
