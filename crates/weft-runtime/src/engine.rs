use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;
use weft_core::config::EngineConfig;
use weft_core::{
    EventPublisher, ExecutionMode, InstanceStore, NoopPublisher, Result, StepStatus,
    WeftError, WorkflowContext, WorkflowDefinition, WorkflowEvent, WorkflowInstance,
    WorkflowStatus, WorkflowTransition,
};

use crate::compensation::{CompensationHandler, CompletedStep};
use crate::control::{RunControl, RunGuard, RunRegistry};
use crate::events::publish_safely;
use crate::executor::StepExecutor;
use crate::parallel::{LayerResults, ParallelExecutionCoordinator, PreparedStep};
use crate::resolver::{DependencyResolver, ExecutionLayers};
use crate::timeout::TimeoutHandler;

/// How a run over the layers ended.
#[derive(Debug, Clone, PartialEq, Eq)]
enum RunOutcome {
    Completed,
    Failed(String),
    Paused,
    Cancelled,
}

/// Drives workflow instances through their definitions.
///
/// The engine owns the single coordinating loop per instance: it walks the
/// resolved layers, hands each layer to the executor or the parallel
/// coordinator, folds results into the instance between layers and persists
/// at every major transition.
pub struct WorkflowEngine {
    store: Arc<dyn InstanceStore>,
    publisher: Arc<dyn EventPublisher>,
    executor: Arc<StepExecutor>,
    coordinator: ParallelExecutionCoordinator,
    compensation: CompensationHandler,
    resolver: DependencyResolver,
    timeouts: TimeoutHandler,
    runs: RunRegistry,
    enforce_global_timeout: bool,
}

impl WorkflowEngine {
    pub fn builder(store: Arc<dyn InstanceStore>) -> WorkflowEngineBuilder {
        WorkflowEngineBuilder::new(store)
    }

    pub fn store(&self) -> &Arc<dyn InstanceStore> {
        &self.store
    }

    pub fn publisher(&self) -> &Arc<dyn EventPublisher> {
        &self.publisher
    }

    /// Runs currently executing on this engine.
    pub fn runs(&self) -> &RunRegistry {
        &self.runs
    }

    pub(crate) fn emit(&self, event: WorkflowEvent) {
        publish_safely(self.publisher.as_ref(), event);
    }

    /// Reserve the run slot for an instance before execution starts.
    pub fn register(&self, instance_id: Uuid) -> Result<RunGuard> {
        self.runs.register(instance_id).ok_or_else(|| {
            WeftError::InvalidTransition {
                from: WorkflowStatus::Running.as_str().to_string(),
                transition: WorkflowTransition::Start.as_str().to_string(),
            }
        })
    }

    /// Execute an instance to its next resting state.
    ///
    /// A PENDING instance is started; a RUNNING one (being resumed) continues
    /// from the steps it has not yet satisfied. Step failures end up in the
    /// returned instance; only structural and storage errors are returned as
    /// errors.
    pub async fn execute_workflow(
        &self,
        definition: &WorkflowDefinition,
        instance: WorkflowInstance,
    ) -> Result<WorkflowInstance> {
        let guard = self.register(instance.id())?;
        self.execute_registered(definition, instance, &guard).await
    }

    /// Like [`execute_workflow`](Self::execute_workflow), for a run whose slot
    /// is already held.
    pub async fn execute_registered(
        &self,
        definition: &WorkflowDefinition,
        mut instance: WorkflowInstance,
        guard: &RunGuard,
    ) -> Result<WorkflowInstance> {
        if instance.workflow_name() != definition.name() {
            return Err(WeftError::InvalidDefinition(format!(
                "instance {} belongs to workflow '{}', not '{}'",
                instance.id(),
                instance.workflow_name(),
                definition.name()
            )));
        }

        let layers = self.resolver.resolve(definition)?;

        match instance.status() {
            WorkflowStatus::Pending => {
                instance.start()?;
                self.store.save(&instance).await?;
                self.emit(WorkflowEvent::WorkflowStarted {
                    instance_id: instance.id(),
                    workflow: definition.name().to_string(),
                });
            }
            WorkflowStatus::Running => {}
            other => {
                return Err(WeftError::InvalidTransition {
                    from: other.as_str().to_string(),
                    transition: WorkflowTransition::Start.as_str().to_string(),
                })
            }
        }

        tracing::debug!(
            instance_id = %instance.id(),
            workflow = definition.name(),
            layers = layers.len(),
            "Executing workflow"
        );

        let control = guard.control();
        let deadline = definition
            .global_timeout()
            .filter(|_| self.enforce_global_timeout)
            .map(|limit| (Instant::now() + limit, limit));

        let outcome = self
            .run_layers(definition, &layers, &mut instance, control, deadline)
            .await?;

        match outcome {
            RunOutcome::Completed => {
                instance.complete()?;
                self.store.save(&instance).await?;
                self.emit(WorkflowEvent::WorkflowCompleted {
                    instance_id: instance.id(),
                    workflow: definition.name().to_string(),
                    duration_ms: instance
                        .duration()
                        .map(|d| d.num_milliseconds().max(0) as u64)
                        .unwrap_or_default(),
                });
            }
            RunOutcome::Failed(reason) => {
                self.fail(definition, &mut instance, reason).await?;
            }
            RunOutcome::Paused => {
                instance.pause()?;
                self.store.save(&instance).await?;
                self.emit(WorkflowEvent::WorkflowPaused {
                    instance_id: instance.id(),
                    workflow: definition.name().to_string(),
                });
            }
            RunOutcome::Cancelled => {
                instance.cancel()?;
                self.store.save(&instance).await?;
                self.emit(WorkflowEvent::WorkflowCancelled {
                    instance_id: instance.id(),
                    workflow: definition.name().to_string(),
                });
            }
        }

        Ok(instance)
    }

    async fn run_layers(
        &self,
        definition: &WorkflowDefinition,
        layers: &ExecutionLayers,
        instance: &mut WorkflowInstance,
        control: &RunControl,
        deadline: Option<(Instant, Duration)>,
    ) -> Result<RunOutcome> {
        let instance_id = instance.id();
        let timed_out = |limit: Duration| {
            tracing::warn!(
                %instance_id,
                workflow = definition.name(),
                timeout_ms = limit.as_millis() as u64,
                "Workflow exceeded its global timeout"
            );
            RunOutcome::Failed(format!("workflow timed out after {:?}", limit))
        };

        for (index, layer) in layers.iter().enumerate() {
            if control.is_cancelled() {
                return Ok(RunOutcome::Cancelled);
            }
            if control.is_pause_requested() {
                return Ok(RunOutcome::Paused);
            }
            if let Some((at, limit)) = deadline {
                if Instant::now() >= at {
                    return Ok(timed_out(limit));
                }
            }

            let prepared: Vec<PreparedStep> = layer
                .iter()
                .filter(|id| !instance.is_step_satisfied(id))
                .filter_map(|id| definition.step(id))
                .map(|spec| PreparedStep {
                    input: spec
                        .input_key()
                        .and_then(|key| instance.context().get_value(key))
                        .cloned(),
                    spec: spec.clone(),
                })
                .collect();

            if prepared.is_empty() {
                continue;
            }

            tracing::debug!(
                instance_id = %instance.id(),
                layer = index,
                steps = prepared.len(),
                "Executing layer"
            );

            let ctx = instance.context().clone();
            let mut results = LayerResults::default();
            let interrupted = tokio::select! {
                _ = self.execute_layer(definition, prepared, &ctx, instance_id, &mut results) => None,
                _ = control.cancellation_token().cancelled() => {
                    tracing::info!(%instance_id, layer = index, "Run cancelled mid-layer");
                    Some(RunOutcome::Cancelled)
                }
                _ = self.timeouts.expiry(deadline.map(|(at, _)| at)) => {
                    deadline.map(|(_, limit)| timed_out(limit))
                }
            };

            // Steps that finished before an interruption still count, so
            // they can be compensated.
            let mut context = instance.context().clone();
            for result in results.iter() {
                instance.record_step(result);
                if result.status != StepStatus::Completed {
                    continue;
                }
                let key = definition.step(&result.step_id).and_then(|s| s.output_key());
                if let (Some(key), Some(output)) = (key, &result.output) {
                    context = context.put_value(key, output.clone());
                }
            }
            instance.set_context(context);
            self.store.save(instance).await?;

            if let Some(outcome) = interrupted {
                return Ok(outcome);
            }

            if let Some(failed) = results.first_failure() {
                return Ok(RunOutcome::Failed(format!(
                    "step '{}' failed: {}",
                    failed.step_id,
                    failed.error_message().unwrap_or_default()
                )));
            }
        }

        Ok(RunOutcome::Completed)
    }

    /// Parallel only when the mode says so and there is more than one step;
    /// otherwise steps run in order and the layer halts at the first failure.
    /// Each result lands in `results` as soon as its step finishes.
    async fn execute_layer(
        &self,
        definition: &WorkflowDefinition,
        steps: Vec<PreparedStep>,
        ctx: &WorkflowContext,
        instance_id: Uuid,
        results: &mut LayerResults,
    ) {
        if definition.execution_mode() == ExecutionMode::Parallel && steps.len() > 1 {
            return self
                .coordinator
                .execute_layer_into(steps, ctx, instance_id, results)
                .await;
        }

        for PreparedStep { spec, input } in steps {
            let result = self.executor.execute_step(&spec, input, ctx, instance_id).await;
            let failed = result.is_failure();
            results.push(result);
            if failed {
                break;
            }
        }
    }

    async fn fail(
        &self,
        definition: &WorkflowDefinition,
        instance: &mut WorkflowInstance,
        reason: String,
    ) -> Result<()> {
        instance.fail(reason.clone())?;
        self.store.save(instance).await?;
        self.emit(WorkflowEvent::WorkflowFailed {
            instance_id: instance.id(),
            workflow: definition.name().to_string(),
            reason,
        });

        if definition.compensation_strategy().is_enabled() {
            self.compensate(definition, instance).await?;
        }
        Ok(())
    }

    /// Compensate a FAILED instance's completed steps in reverse completion
    /// order. The instance ends COMPENSATED when every action succeeded and
    /// stays COMPENSATING otherwise.
    pub async fn compensate(
        &self,
        definition: &WorkflowDefinition,
        instance: &mut WorkflowInstance,
    ) -> Result<()> {
        instance.begin_compensation()?;
        self.store.save(instance).await?;

        let completed: Vec<CompletedStep> = instance
            .completed_in_order()
            .into_iter()
            .map(|execution| CompletedStep {
                step_id: execution.step_id.clone(),
                output: execution.output.clone(),
            })
            .collect();

        self.emit(WorkflowEvent::CompensationStarted {
            instance_id: instance.id(),
            workflow: definition.name().to_string(),
            steps: completed.len(),
        });

        let ctx = instance.context().clone();
        let report = self
            .compensation
            .compensate(definition, &completed, &ctx, instance.id())
            .await;

        for step_id in &report.compensated {
            instance.mark_compensated(step_id);
        }
        let success = report.is_success();
        let failures = report.failures.len();
        for failure in report.failures {
            instance.record_compensation_failure(failure.step_id, failure.message);
        }

        if success {
            instance.finish_compensation()?;
        } else {
            tracing::error!(
                instance_id = %instance.id(),
                workflow = definition.name(),
                failures,
                "Instance left partially compensated"
            );
        }
        self.store.save(instance).await?;

        self.emit(WorkflowEvent::CompensationCompleted {
            instance_id: instance.id(),
            workflow: definition.name().to_string(),
            success,
            failures,
        });
        Ok(())
    }
}

/// Builder for [`WorkflowEngine`].
pub struct WorkflowEngineBuilder {
    store: Arc<dyn InstanceStore>,
    publisher: Arc<dyn EventPublisher>,
    config: EngineConfig,
}

impl WorkflowEngineBuilder {
    fn new(store: Arc<dyn InstanceStore>) -> Self {
        Self {
            store,
            publisher: Arc::new(NoopPublisher),
            config: EngineConfig::default(),
        }
    }

    pub fn publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn config(mut self, config: &EngineConfig) -> Self {
        self.config = config.clone();
        self
    }

    pub fn build(self) -> WorkflowEngine {
        let executor = Arc::new(
            StepExecutor::new(self.publisher.clone())
                .with_default_timeout(self.config.default_step_timeout())
                .with_concurrency_limit(self.config.max_concurrent_steps),
        );

        WorkflowEngine {
            store: self.store,
            publisher: self.publisher,
            coordinator: ParallelExecutionCoordinator::new(executor.clone()),
            compensation: CompensationHandler::new(executor.clone()),
            executor,
            resolver: DependencyResolver::new(),
            timeouts: TimeoutHandler::new(),
            runs: RunRegistry::new(),
            enforce_global_timeout: self.config.enforce_global_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use weft_core::testing::*;
    use weft_core::{CompensationStrategy, StepSpec};

    use super::*;
    use crate::store::InMemoryInstanceStore;

    fn engine() -> (WorkflowEngine, Arc<InMemoryInstanceStore>, Arc<RecordingPublisher>) {
        let store = Arc::new(InMemoryInstanceStore::new());
        let events = Arc::new(RecordingPublisher::new());
        let engine = WorkflowEngine::builder(store.clone())
            .publisher(events.clone())
            .build();
        (engine, store, events)
    }

    #[tokio::test]
    async fn test_outputs_flow_through_context() {
        let (engine, store, events) = engine();
        let definition = WorkflowDefinition::builder("double")
            .step(
                StepSpec::source("seed", |_ctx| async move { Ok(21u32) }).output_key("n"),
            )
            .step_after(
                StepSpec::new("double", |n: Option<u32>, _ctx| async move {
                    Ok(n.unwrap_or_default() * 2)
                })
                .input_key("n")
                .output_key("doubled"),
                ["seed"],
            )
            .build()
            .unwrap();

        let instance = engine
            .execute_workflow(&definition, WorkflowInstance::new("double", WorkflowContext::new()))
            .await
            .unwrap();

        assert_eq!(instance.status(), WorkflowStatus::Completed);
        assert_eq!(instance.context().get::<u32>("doubled").unwrap(), Some(42));
        assert_eq!(
            events.event_types().first().copied(),
            Some("workflow_started")
        );
        events.assert_published("workflow_completed");

        let stored = store.find_by_id(instance.id()).await.unwrap().unwrap();
        assert_eq!(stored, instance);
        assert!(!engine.runs().is_running(instance.id()));
    }

    #[tokio::test]
    async fn test_sequential_layer_halts_at_first_failure() {
        let (engine, _, _) = engine();
        let definition = WorkflowDefinition::builder("strict")
            .step(failing_step("first", false))
            .step(succeeding_step("second"))
            .build()
            .unwrap();

        let instance = engine
            .execute_workflow(&definition, WorkflowInstance::new("strict", WorkflowContext::new()))
            .await
            .unwrap();

        assert_eq!(instance.status(), WorkflowStatus::Failed);
        assert_step_status(&instance, "first", StepStatus::Failed);
        assert_step_not_run(&instance, "second");
        assert_eq!(
            instance.failure_reason(),
            Some("step 'first' failed: first failed")
        );
    }

    #[tokio::test]
    async fn test_failure_without_compensation_stays_failed() {
        let (engine, _, events) = engine();
        let log = call_log();
        let definition = WorkflowDefinition::builder("no_saga")
            .step(logged_step("reserve", log.clone()))
            .step_after(failing_step("charge", false), ["reserve"])
            .build()
            .unwrap();

        let instance = engine
            .execute_workflow(&definition, WorkflowInstance::new("no_saga", WorkflowContext::new()))
            .await
            .unwrap();

        assert_eq!(instance.status(), WorkflowStatus::Failed);
        assert_eq!(logged(&log), vec!["reserve"]);
        events.assert_not_published("compensation_started");
    }

    #[tokio::test]
    async fn test_failure_runs_compensation() {
        let (engine, store, events) = engine();
        let log = call_log();
        let definition = WorkflowDefinition::builder("saga")
            .compensation(CompensationStrategy::ReverseOrder)
            .step(logged_step("reserve", log.clone()))
            .step_after(failing_step("charge", false), ["reserve"])
            .build()
            .unwrap();

        let instance = engine
            .execute_workflow(&definition, WorkflowInstance::new("saga", WorkflowContext::new()))
            .await
            .unwrap();

        assert_eq!(instance.status(), WorkflowStatus::Compensated);
        assert_eq!(logged(&log), vec!["reserve", "undo:reserve"]);
        assert_step_status(&instance, "reserve", StepStatus::Compensated);
        assert!(instance.failure_reason().unwrap().contains("charge"));

        let types = events.event_types();
        let failed = types.iter().position(|t| *t == "workflow_failed").unwrap();
        let started = types.iter().position(|t| *t == "compensation_started").unwrap();
        let done = types.iter().position(|t| *t == "compensation_completed").unwrap();
        assert!(failed < started && started < done);

        let stored = store.find_by_id(instance.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), WorkflowStatus::Compensated);
    }

    #[tokio::test]
    async fn test_rejects_terminal_instance() {
        let (engine, _, _) = engine();
        let definition = WorkflowDefinition::builder("once")
            .step(succeeding_step("only"))
            .build()
            .unwrap();
        let done = engine
            .execute_workflow(&definition, WorkflowInstance::new("once", WorkflowContext::new()))
            .await
            .unwrap();

        let err = engine.execute_workflow(&definition, done).await.unwrap_err();
        assert!(matches!(err, WeftError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_rejects_instance_of_other_workflow() {
        let (engine, _, _) = engine();
        let definition = WorkflowDefinition::builder("mine")
            .step(succeeding_step("only"))
            .build()
            .unwrap();

        let err = engine
            .execute_workflow(&definition, WorkflowInstance::new("theirs", WorkflowContext::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, WeftError::InvalidDefinition(_)));
    }

    #[tokio::test]
    async fn test_double_registration_is_rejected() {
        let (engine, _, _) = engine();
        let id = Uuid::new_v4();
        let _guard = engine.register(id).unwrap();
        assert!(engine.register(id).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_global_timeout_disabled_by_config() {
        let store = Arc::new(InMemoryInstanceStore::new());
        let engine = WorkflowEngine::builder(store)
            .config(&EngineConfig {
                enforce_global_timeout: false,
                ..EngineConfig::default()
            })
            .build();
        let definition = WorkflowDefinition::builder("lenient")
            .global_timeout(Duration::from_millis(10))
            .step(sleeping_step("slow", Duration::from_millis(100)))
            .build()
            .unwrap();

        let instance = engine
            .execute_workflow(&definition, WorkflowInstance::new("lenient", WorkflowContext::new()))
            .await
            .unwrap();
        assert_eq!(instance.status(), WorkflowStatus::Completed);
    }
}
