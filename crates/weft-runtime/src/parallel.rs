use std::sync::Arc;

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use uuid::Uuid;
use weft_core::{ContextValue, StepResult, StepSpec, WorkflowContext};

use crate::executor::StepExecutor;
use crate::timeout::{join_error_to_step_error, AbortOnDrop};

/// A step ready to run, with its prepared input.
#[derive(Debug, Clone)]
pub struct PreparedStep {
    pub spec: StepSpec,
    pub input: Option<ContextValue>,
}

/// Results of one layer, in the order the steps were given.
#[derive(Debug, Clone, Default)]
pub struct LayerResults {
    results: Vec<StepResult>,
}

impl LayerResults {
    pub fn all_successful(&self) -> bool {
        self.results.iter().all(StepResult::is_success)
    }

    pub fn failed_step_ids(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| r.is_failure())
            .map(|r| r.step_id.as_str())
            .collect()
    }

    /// First failure in step order.
    pub fn first_failure(&self) -> Option<&StepResult> {
        self.results.iter().find(|r| r.is_failure())
    }

    pub fn get(&self, step_id: &str) -> Option<&StepResult> {
        self.results.iter().find(|r| r.step_id == step_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &StepResult> {
        self.results.iter()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub(crate) fn push(&mut self, result: StepResult) {
        self.results.push(result);
    }

    fn order_by(&mut self, step_ids: &[String]) {
        self.results.sort_by_key(|r| {
            step_ids
                .iter()
                .position(|id| *id == r.step_id)
                .unwrap_or(step_ids.len())
        });
    }
}

impl From<Vec<StepResult>> for LayerResults {
    fn from(results: Vec<StepResult>) -> Self {
        Self { results }
    }
}

impl IntoIterator for LayerResults {
    type Item = StepResult;
    type IntoIter = std::vec::IntoIter<StepResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_iter()
    }
}

/// Fans a layer out to concurrent tasks and waits for all of them.
pub struct ParallelExecutionCoordinator {
    executor: Arc<StepExecutor>,
}

impl ParallelExecutionCoordinator {
    pub fn new(executor: Arc<StepExecutor>) -> Self {
        Self { executor }
    }

    /// Run every step concurrently and wait for all of them, whatever their
    /// outcome. A task that dies is reported as a failed result for its step.
    /// Dropping the returned future aborts the tasks still running.
    pub async fn execute_layer(
        &self,
        steps: Vec<PreparedStep>,
        ctx: &WorkflowContext,
        instance_id: Uuid,
    ) -> LayerResults {
        let mut results = LayerResults::default();
        self.execute_layer_into(steps, ctx, instance_id, &mut results)
            .await;
        results
    }

    /// Like [`execute_layer`](Self::execute_layer), pushing each result into
    /// `results` as its step finishes. If the future is dropped early,
    /// `results` holds exactly the steps that finished, in finishing order;
    /// otherwise they end in the order the steps were given.
    pub async fn execute_layer_into(
        &self,
        steps: Vec<PreparedStep>,
        ctx: &WorkflowContext,
        instance_id: Uuid,
        results: &mut LayerResults,
    ) {
        let mut ids = Vec::with_capacity(steps.len());
        let mut pending = FuturesUnordered::new();

        for (index, PreparedStep { spec, input }) in steps.into_iter().enumerate() {
            ids.push(spec.id().to_string());
            let executor = self.executor.clone();
            let ctx = ctx.clone();
            let mut task = AbortOnDrop(tokio::spawn(async move {
                executor.execute_step(&spec, input, &ctx, instance_id).await
            }));
            pending.push(async move { (index, (&mut task.0).await) });
        }

        tracing::debug!(%instance_id, steps = ids.len(), "Running layer in parallel");

        let started_at = Utc::now();
        while let Some((index, joined)) = pending.next().await {
            let result = match joined {
                Ok(result) => result,
                Err(join_error) => {
                    let step_id = ids[index].clone();
                    tracing::error!(
                        %instance_id,
                        step = %step_id,
                        error = %join_error,
                        "Step task failed"
                    );
                    StepResult::failed(step_id, join_error_to_step_error(join_error), started_at, 0)
                }
            };
            results.push(result);
        }

        results.order_by(&ids);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use weft_core::testing::*;
    use weft_core::StepStatus;

    use super::*;

    fn prepared(spec: StepSpec) -> PreparedStep {
        PreparedStep { spec, input: None }
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_concurrently_and_keeps_order() {
        let coordinator = ParallelExecutionCoordinator::new(Arc::new(StepExecutor::default()));
        let start = tokio::time::Instant::now();

        let results = coordinator
            .execute_layer(
                vec![
                    prepared(sleeping_step("slow", Duration::from_millis(300)).build()),
                    prepared(sleeping_step("fast", Duration::from_millis(100)).build()),
                    prepared(sleeping_step("medium", Duration::from_millis(200)).build()),
                ],
                &WorkflowContext::new(),
                Uuid::new_v4(),
            )
            .await;

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_millis(600));
        let ids: Vec<_> = results.iter().map(|r| r.step_id.as_str()).collect();
        assert_eq!(ids, vec!["slow", "fast", "medium"]);
        assert!(results.all_successful());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sibling_failures_do_not_abort_layer() {
        let coordinator = ParallelExecutionCoordinator::new(Arc::new(StepExecutor::default()));

        let results = coordinator
            .execute_layer(
                vec![
                    prepared(failing_step("broken", false).build()),
                    prepared(
                        sleeping_step("hangs", Duration::from_secs(30))
                            .timeout(Duration::from_millis(50))
                            .build(),
                    ),
                    prepared(sleeping_step("ok", Duration::from_millis(200)).build()),
                ],
                &WorkflowContext::new(),
                Uuid::new_v4(),
            )
            .await;

        assert!(!results.all_successful());
        assert_eq!(results.failed_step_ids(), vec!["broken", "hangs"]);
        assert_eq!(results.get("hangs").unwrap().status, StepStatus::TimedOut);
        assert_eq!(results.get("ok").unwrap().status, StepStatus::Completed);
        assert_eq!(results.first_failure().unwrap().step_id, "broken");
    }

    #[tokio::test]
    async fn test_panic_is_isolated() {
        let coordinator = ParallelExecutionCoordinator::new(Arc::new(StepExecutor::default()));
        let panicking = StepSpec::source("explodes", |_ctx| async move {
            if true {
                panic!("bad state");
            }
            Ok(())
        })
        .build();

        let results = coordinator
            .execute_layer(
                vec![prepared(panicking), prepared(succeeding_step("fine").build())],
                &WorkflowContext::new(),
                Uuid::new_v4(),
            )
            .await;

        assert_eq!(results.get("explodes").unwrap().status, StepStatus::Failed);
        assert!(results.get("fine").unwrap().is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_results_survive_an_abandoned_layer() {
        let coordinator = ParallelExecutionCoordinator::new(Arc::new(StepExecutor::default()));
        let mut results = LayerResults::default();
        let context = WorkflowContext::new();

        let layer = coordinator.execute_layer_into(
            vec![
                prepared(sleeping_step("slow", Duration::from_secs(30)).build()),
                prepared(sleeping_step("quick", Duration::from_millis(50)).build()),
            ],
            &context,
            Uuid::new_v4(),
            &mut results,
        );
        let abandoned = tokio::time::timeout(Duration::from_millis(500), layer)
            .await
            .is_err();

        assert!(abandoned);
        assert_eq!(results.len(), 1);
        assert_eq!(results.get("quick").unwrap().status, StepStatus::Completed);
        assert!(results.get("slow").is_none());
    }

    #[test]
    fn test_empty_results_are_successful() {
        let results = LayerResults::default();
        assert!(results.all_successful());
        assert!(results.is_empty());
    }
}
