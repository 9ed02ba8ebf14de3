//! Caller-facing workflow operations.
//!
//! [`WorkflowService`] wraps a [`WorkflowEngine`] with the use-case level
//! operations: start, resume, pause, cancel, compensate and status queries,
//! plus detached variants of start and resume that return immediately.

use std::sync::Arc;

use uuid::Uuid;
use weft_core::{
    InstanceStore, Result, WeftError, WorkflowContext, WorkflowDefinition, WorkflowEvent,
    WorkflowInstance, WorkflowStatus, WorkflowTransition,
};

use crate::control::RunGuard;
use crate::engine::WorkflowEngine;

/// Use-case level entry point to the engine.
#[derive(Clone)]
pub struct WorkflowService {
    engine: Arc<WorkflowEngine>,
}

impl WorkflowService {
    pub fn new(engine: Arc<WorkflowEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<WorkflowEngine> {
        &self.engine
    }

    fn store(&self) -> &Arc<dyn InstanceStore> {
        self.engine.store()
    }

    async fn load(&self, instance_id: Uuid) -> Result<WorkflowInstance> {
        self.store()
            .find_by_id(instance_id)
            .await?
            .ok_or_else(|| WeftError::NotFound(format!("Workflow instance {} not found", instance_id)))
    }

    /// Create an instance and run it to its next resting state.
    pub async fn start(
        &self,
        definition: &WorkflowDefinition,
        context: WorkflowContext,
    ) -> Result<WorkflowInstance> {
        let instance = WorkflowInstance::new(definition.name(), context);
        tracing::info!(
            instance_id = %instance.id(),
            workflow = definition.name(),
            "Starting workflow"
        );
        self.engine.execute_workflow(definition, instance).await
    }

    /// Persist a new instance, run it in the background and return its id.
    pub async fn start_detached(
        &self,
        definition: Arc<WorkflowDefinition>,
        context: WorkflowContext,
    ) -> Result<Uuid> {
        let instance = WorkflowInstance::new(definition.name(), context);
        let instance_id = instance.id();
        let guard = self.claim(instance_id, WorkflowTransition::Start)?;
        self.store().save(&instance).await?;
        self.spawn(definition, instance, guard);
        Ok(instance_id)
    }

    /// Resume a PAUSED instance. Steps already completed or skipped are not
    /// run again.
    pub async fn resume(
        &self,
        instance_id: Uuid,
        definition: &WorkflowDefinition,
    ) -> Result<WorkflowInstance> {
        let guard = self.claim(instance_id, WorkflowTransition::Resume)?;
        let instance = self.prepare_resume(instance_id, definition).await?;
        self.engine.execute_registered(definition, instance, &guard).await
    }

    /// Resume in the background and return immediately.
    pub async fn resume_detached(
        &self,
        instance_id: Uuid,
        definition: Arc<WorkflowDefinition>,
    ) -> Result<Uuid> {
        let guard = self.claim(instance_id, WorkflowTransition::Resume)?;
        let instance = self.prepare_resume(instance_id, &definition).await?;
        self.spawn(definition, instance, guard);
        Ok(instance_id)
    }

    /// Take the run slot before touching stored state, so two callers cannot
    /// both get past the status check.
    fn claim(&self, instance_id: Uuid, transition: WorkflowTransition) -> Result<RunGuard> {
        self.engine
            .runs()
            .register(instance_id)
            .ok_or_else(|| already_running(transition))
    }

    async fn prepare_resume(
        &self,
        instance_id: Uuid,
        definition: &WorkflowDefinition,
    ) -> Result<WorkflowInstance> {
        let mut instance = self.load(instance_id).await?;

        if instance.workflow_name() != definition.name() {
            return Err(WeftError::InvalidDefinition(format!(
                "instance {} belongs to workflow '{}', not '{}'",
                instance_id,
                instance.workflow_name(),
                definition.name()
            )));
        }

        instance.resume()?;
        self.store().save(&instance).await?;
        self.engine.emit(WorkflowEvent::WorkflowResumed {
            instance_id,
            workflow: definition.name().to_string(),
        });
        tracing::info!(%instance_id, workflow = definition.name(), "Resuming workflow");
        Ok(instance)
    }

    fn spawn(&self, definition: Arc<WorkflowDefinition>, instance: WorkflowInstance, guard: RunGuard) {
        let engine = self.engine.clone();

        tokio::spawn(async move {
            let instance_id = guard.instance_id();
            if let Err(e) = engine.execute_registered(&definition, instance, &guard).await {
                tracing::error!(
                    %instance_id,
                    workflow = definition.name(),
                    error = %e,
                    "Detached workflow run failed"
                );
            }
        });
    }

    /// Pause an instance.
    ///
    /// A run in progress is flagged and stops at its next layer boundary;
    /// the call does not wait for that. An idle RUNNING record, such as one
    /// left behind by a stopped process, is paused directly. Any other idle
    /// status, PENDING included, is rejected with `InvalidTransition`.
    pub async fn pause(&self, instance_id: Uuid) -> Result<WorkflowInstance> {
        if self.engine.runs().request_pause(instance_id) {
            tracing::info!(%instance_id, "Pause requested");
            return self.load(instance_id).await;
        }

        let mut instance = self.load(instance_id).await?;
        instance.pause()?;
        self.store().save(&instance).await?;
        self.engine.emit(WorkflowEvent::WorkflowPaused {
            instance_id,
            workflow: instance.workflow_name().to_string(),
        });
        Ok(instance)
    }

    /// Cancel an instance.
    ///
    /// A run in progress is stopped, including its in-flight layer, and the
    /// call returns once the run has recorded the cancellation.
    pub async fn cancel(&self, instance_id: Uuid) -> Result<WorkflowInstance> {
        if self.engine.runs().request_cancel(instance_id) {
            tracing::info!(%instance_id, "Cancellation requested");
            self.engine.runs().wait(instance_id).await;
            return self.load(instance_id).await;
        }

        let mut instance = self.load(instance_id).await?;
        instance.cancel()?;
        self.store().save(&instance).await?;
        self.engine.emit(WorkflowEvent::WorkflowCancelled {
            instance_id,
            workflow: instance.workflow_name().to_string(),
        });
        Ok(instance)
    }

    /// Run compensation for a FAILED instance.
    pub async fn compensate(
        &self,
        instance_id: Uuid,
        definition: &WorkflowDefinition,
    ) -> Result<WorkflowInstance> {
        if !definition.compensation_strategy().is_enabled() {
            return Err(WeftError::InvalidDefinition(format!(
                "workflow '{}' has no compensation strategy",
                definition.name()
            )));
        }

        let mut instance = self.load(instance_id).await?;
        if instance.workflow_name() != definition.name() {
            return Err(WeftError::InvalidDefinition(format!(
                "instance {} belongs to workflow '{}', not '{}'",
                instance_id,
                instance.workflow_name(),
                definition.name()
            )));
        }

        self.engine.compensate(definition, &mut instance).await?;
        Ok(instance)
    }

    /// Current stored state of an instance.
    pub async fn get_status(&self, instance_id: Uuid) -> Result<WorkflowInstance> {
        self.load(instance_id).await
    }

    pub async fn list_by_workflow(&self, workflow_name: &str) -> Result<Vec<WorkflowInstance>> {
        self.store().find_by_workflow_name(workflow_name).await
    }

    pub async fn list_by_status(&self, status: WorkflowStatus) -> Result<Vec<WorkflowInstance>> {
        self.store().find_by_status(status).await
    }

    /// Remove a stored instance. Refused while it is running.
    pub async fn delete(&self, instance_id: Uuid) -> Result<bool> {
        if self.engine.runs().is_running(instance_id) {
            return Err(WeftError::Internal(format!(
                "Workflow instance {} is running and cannot be deleted",
                instance_id
            )));
        }
        self.store().delete_by_id(instance_id).await
    }

    /// Wait for a running instance to finish its current run, then return
    /// its stored state.
    pub async fn wait_for(&self, instance_id: Uuid) -> Result<WorkflowInstance> {
        self.engine.runs().wait(instance_id).await;
        self.load(instance_id).await
    }
}

fn already_running(transition: WorkflowTransition) -> WeftError {
    WeftError::InvalidTransition {
        from: WorkflowStatus::Running.as_str().to_string(),
        transition: transition.as_str().to_string(),
    }
}
