use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use uuid::Uuid;
use weft_core::{
    ContextValue, EventPublisher, NoopPublisher, StepError, StepResult, StepSpec, WorkflowContext,
    WorkflowEvent, DEFAULT_STEP_TIMEOUT,
};

use crate::events::publish_safely;
use crate::retry::RetryHandler;
use crate::timeout::{panic_message, TimeoutHandler};

/// Outcome of running a step's compensation action.
#[derive(Debug, Clone, PartialEq)]
pub enum CompensationOutcome {
    Compensated,
    Failed(StepError),
    /// The step declares no compensation action.
    NoAction,
}

/// Executes single steps: skip check, validation, hooks, and timed,
/// retried attempts.
pub struct StepExecutor {
    publisher: Arc<dyn EventPublisher>,
    retry: RetryHandler,
    timeout: TimeoutHandler,
    default_timeout: Duration,
    permits: Option<Arc<Semaphore>>,
}

impl Default for StepExecutor {
    fn default() -> Self {
        Self::new(Arc::new(NoopPublisher))
    }
}

impl StepExecutor {
    pub fn new(publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            publisher,
            retry: RetryHandler::new(),
            timeout: TimeoutHandler::new(),
            default_timeout: DEFAULT_STEP_TIMEOUT,
            permits: None,
        }
    }

    /// Timeout for steps that declare none.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Bound the number of attempts running at once.
    pub fn with_concurrency_limit(mut self, max_concurrent: usize) -> Self {
        self.permits = Some(Arc::new(Semaphore::new(max_concurrent.max(1))));
        self
    }

    fn emit(&self, event: WorkflowEvent) {
        publish_safely(self.publisher.as_ref(), event);
    }

    /// Run one step to a result. Never returns an error: every failure is
    /// folded into the returned [`StepResult`].
    pub async fn execute_step(
        &self,
        step: &StepSpec,
        input: Option<ContextValue>,
        ctx: &WorkflowContext,
        instance_id: Uuid,
    ) -> StepResult {
        let started_at = Utc::now();
        let step_id = step.id();

        self.emit(WorkflowEvent::StepStarted {
            instance_id,
            step_id: step_id.to_string(),
        });

        if step.should_skip(ctx) {
            tracing::debug!(%instance_id, step = step_id, "Skip predicate matched");
            self.emit(WorkflowEvent::StepSkipped {
                instance_id,
                step_id: step_id.to_string(),
            });
            return StepResult::skipped(step_id, started_at);
        }

        if let Err(error) = step.validate_input(input.as_ref()) {
            let result = StepResult::failed(step_id, error, started_at, 0);
            self.emit_failure(&result, instance_id);
            return result;
        }

        let timeout = step.timeout_or(self.default_timeout);
        let outcome = self
            .retry
            .execute(
                step.retry_policy(),
                |_attempt| self.attempt(step, input.clone(), ctx, timeout),
                |attempt, error| {
                    self.emit(WorkflowEvent::StepRetried {
                        instance_id,
                        step_id: step_id.to_string(),
                        attempt,
                        error: error.to_string(),
                    })
                },
            )
            .await;

        match outcome.result {
            Ok(output) => {
                let result = StepResult::completed(step_id, Some(output), started_at, outcome.attempt);
                self.emit(WorkflowEvent::StepCompleted {
                    instance_id,
                    step_id: step_id.to_string(),
                    attempt: result.attempt_number,
                    duration_ms: duration_ms(&result),
                });
                result
            }
            Err(error) => {
                let result = StepResult::failed(step_id, error, started_at, outcome.attempt);
                self.emit_failure(&result, instance_id);
                result
            }
        }
    }

    /// One timed attempt. Hooks and the step body run in the spawned task so
    /// a panic in either is contained; the error hook runs here so it also
    /// sees timeouts.
    async fn attempt(
        &self,
        step: &StepSpec,
        input: Option<ContextValue>,
        ctx: &WorkflowContext,
        timeout: Duration,
    ) -> Result<ContextValue, StepError> {
        let _permit = match &self.permits {
            Some(permits) => Some(
                permits
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| StepError::Cancelled)?,
            ),
            None => None,
        };

        let spec = step.clone();
        let task_ctx = ctx.clone();
        let work = async move {
            spec.run_before(&task_ctx);
            let output = spec.invoke(input, task_ctx.clone()).await?;
            spec.run_after(&task_ctx, &output);
            Ok::<_, StepError>(output)
        };

        let result = self.timeout.run(timeout, work).await;
        if let Err(error) = &result {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| step.run_on_error(ctx, error))) {
                tracing::warn!(
                    step = step.id(),
                    error = %panic_message(payload),
                    "Error hook panicked"
                );
            }
        }
        result
    }

    fn emit_failure(&self, result: &StepResult, instance_id: Uuid) {
        self.emit(WorkflowEvent::StepFailed {
            instance_id,
            step_id: result.step_id.clone(),
            attempt: result.attempt_number,
            error: result.error_message().unwrap_or_default(),
            timed_out: result.status == weft_core::StepStatus::TimedOut,
        });
    }

    /// Run a step's compensation action once against its recorded output.
    pub async fn execute_compensation(
        &self,
        step: &StepSpec,
        output: Option<ContextValue>,
        ctx: &WorkflowContext,
        instance_id: Uuid,
    ) -> CompensationOutcome {
        let Some(work) = step.compensate(output, ctx.clone()) else {
            return CompensationOutcome::NoAction;
        };

        let timeout = step.timeout_or(self.default_timeout);
        let outcome = match self.timeout.run(timeout, work).await {
            Ok(()) => CompensationOutcome::Compensated,
            Err(error) => CompensationOutcome::Failed(error),
        };

        let error = match &outcome {
            CompensationOutcome::Failed(error) => Some(error.to_string()),
            _ => None,
        };
        self.emit(WorkflowEvent::StepCompensated {
            instance_id,
            step_id: step.id().to_string(),
            success: error.is_none(),
            error,
        });

        outcome
    }
}

fn duration_ms(result: &StepResult) -> u64 {
    result.duration().num_milliseconds().max(0) as u64
}
