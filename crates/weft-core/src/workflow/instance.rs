use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::context::WorkflowContext;
use super::snapshot::InstanceSnapshot;
use super::state::{WorkflowStatus, WorkflowTransition};
use super::step::{StepExecution, StepResult, StepStatus};
use crate::Result;

/// A compensation action that failed, kept for manual follow-up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationFailure {
    pub step_id: String,
    pub message: String,
}

/// Runtime record of one workflow execution.
///
/// Status changes go through [`WorkflowStatus::apply`]; the mutators here
/// add the timestamps and bookkeeping that accompany each transition.
/// Serialisation goes through [`InstanceSnapshot`],
/// so deserialising validates the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "InstanceSnapshot", try_from = "InstanceSnapshot")]
pub struct WorkflowInstance {
    pub(super) id: Uuid,
    pub(super) workflow_name: String,
    pub(super) status: WorkflowStatus,
    pub(super) created_at: DateTime<Utc>,
    pub(super) started_at: Option<DateTime<Utc>>,
    pub(super) completed_at: Option<DateTime<Utc>>,
    pub(super) context: WorkflowContext,
    pub(super) executions: HashMap<String, StepExecution>,
    pub(super) execution_order: Vec<String>,
    pub(super) failure_reason: Option<String>,
    pub(super) compensation_failures: Vec<CompensationFailure>,
}

impl WorkflowInstance {
    /// Create a pending instance.
    pub fn new(workflow_name: impl Into<String>, context: WorkflowContext) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_name: workflow_name.into(),
            status: WorkflowStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            context,
            executions: HashMap::new(),
            execution_order: Vec::new(),
            failure_reason: None,
            compensation_failures: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn workflow_name(&self) -> &str {
        &self.workflow_name
    }

    pub fn status(&self) -> WorkflowStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn context(&self) -> &WorkflowContext {
        &self.context
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn compensation_failures(&self) -> &[CompensationFailure] {
        &self.compensation_failures
    }

    pub fn executions(&self) -> &HashMap<String, StepExecution> {
        &self.executions
    }

    pub fn execution(&self, step_id: &str) -> Option<&StepExecution> {
        self.executions.get(step_id)
    }

    /// Step ids in the order they were first recorded.
    pub fn execution_order(&self) -> &[String] {
        &self.execution_order
    }

    /// Executions in first-recorded order.
    pub fn executions_in_order(&self) -> impl Iterator<Item = &StepExecution> {
        self.execution_order
            .iter()
            .filter_map(|id| self.executions.get(id))
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        let started = self.started_at?;
        Some(self.completed_at.unwrap_or_else(Utc::now) - started)
    }

    fn transition(&mut self, transition: WorkflowTransition) -> Result<()> {
        self.status = self.status.apply(transition)?;
        Ok(())
    }

    pub fn start(&mut self) -> Result<()> {
        self.transition(WorkflowTransition::Start)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn complete(&mut self) -> Result<()> {
        self.transition(WorkflowTransition::Complete)?;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<()> {
        self.transition(WorkflowTransition::Fail)?;
        self.failure_reason = Some(reason.into());
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn pause(&mut self) -> Result<()> {
        self.transition(WorkflowTransition::Pause)
    }

    pub fn resume(&mut self) -> Result<()> {
        self.transition(WorkflowTransition::Resume)
    }

    pub fn cancel(&mut self) -> Result<()> {
        self.transition(WorkflowTransition::Cancel)?;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn begin_compensation(&mut self) -> Result<()> {
        self.transition(WorkflowTransition::BeginCompensation)
    }

    pub fn finish_compensation(&mut self) -> Result<()> {
        self.transition(WorkflowTransition::FinishCompensation)
    }

    /// Replace the context wholesale.
    pub fn set_context(&mut self, context: WorkflowContext) {
        self.context = context;
    }

    /// Record a step result, overwriting any earlier execution of that step.
    pub fn record_step(&mut self, result: &StepResult) {
        self.record_execution(StepExecution::from(result));
    }

    pub fn record_execution(&mut self, execution: StepExecution) {
        if !self.executions.contains_key(&execution.step_id) {
            self.execution_order.push(execution.step_id.clone());
        }
        self.executions.insert(execution.step_id.clone(), execution);
    }

    /// Mark a completed step as compensated. Returns false if the step has
    /// no completed execution.
    pub fn mark_compensated(&mut self, step_id: &str) -> bool {
        match self.executions.get_mut(step_id) {
            Some(execution) if execution.status == StepStatus::Completed => {
                execution.compensate();
                true
            }
            _ => false,
        }
    }

    pub fn record_compensation_failure(
        &mut self,
        step_id: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.compensation_failures.push(CompensationFailure {
            step_id: step_id.into(),
            message: message.into(),
        });
    }

    /// Whether the step's latest execution lets dependents proceed.
    pub fn is_step_satisfied(&self, step_id: &str) -> bool {
        self.executions
            .get(step_id)
            .is_some_and(|e| e.status.is_success())
    }

    pub fn completed_step_ids(&self) -> Vec<&str> {
        self.ids_with(|e| e.status == StepStatus::Completed)
    }

    pub fn failed_step_ids(&self) -> Vec<&str> {
        self.ids_with(|e| e.status.is_failure())
    }

    fn ids_with(&self, predicate: impl Fn(&StepExecution) -> bool) -> Vec<&str> {
        self.executions_in_order()
            .filter(|e| predicate(e))
            .map(|e| e.step_id.as_str())
            .collect()
    }

    /// Completed executions ordered by completion time. Ties keep their
    /// recorded order.
    pub fn completed_in_order(&self) -> Vec<&StepExecution> {
        let mut completed: Vec<&StepExecution> = self
            .executions_in_order()
            .filter(|e| e.status == StepStatus::Completed)
            .collect();
        completed.sort_by_key(|e| e.completed_at);
        completed
    }

    pub fn average_step_duration(&self) -> Option<chrono::Duration> {
        let count = i32::try_from(self.executions.len()).ok().filter(|&n| n > 0)?;
        let total = self
            .executions
            .values()
            .fold(chrono::Duration::zero(), |acc, e| acc + e.duration());
        Some(total / count)
    }

    pub fn slowest_step(&self) -> Option<&StepExecution> {
        self.executions_in_order().max_by_key(|e| e.duration())
    }

    pub fn fastest_step(&self) -> Option<&StepExecution> {
        self.executions_in_order().min_by_key(|e| e.duration())
    }

    /// Fraction of recorded steps that needed more than one attempt.
    pub fn retry_rate(&self) -> f64 {
        if self.executions.is_empty() {
            return 0.0;
        }
        let retried = self.executions.values().filter(|e| e.was_retried()).count();
        retried as f64 / self.executions.len() as f64
    }

    /// Fraction of `total_steps` that completed or were skipped.
    pub fn progress(&self, total_steps: usize) -> f64 {
        if total_steps == 0 {
            return 0.0;
        }
        let done = self
            .executions
            .values()
            .filter(|e| e.status.is_success() || e.status == StepStatus::Compensated)
            .count();
        (done as f64 / total_steps as f64).min(1.0)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::TimeZone;

    use super::*;
    use crate::StepError;

    fn execution(id: &str, status: StepStatus, start_secs: i64, end_secs: i64, attempt: u32) -> StepExecution {
        StepExecution {
            step_id: id.to_string(),
            status,
            output: None,
            error_message: None,
            started_at: Utc.timestamp_opt(start_secs, 0).unwrap(),
            completed_at: Utc.timestamp_opt(end_secs, 0).unwrap(),
            attempt_number: attempt,
            compensated_at: None,
        }
    }

    #[test]
    fn test_lifecycle_stamps_timestamps() {
        let mut instance = WorkflowInstance::new("pipeline", WorkflowContext::new());
        assert_eq!(instance.status(), WorkflowStatus::Pending);
        assert!(instance.started_at().is_none());

        instance.start().unwrap();
        assert_eq!(instance.status(), WorkflowStatus::Running);
        assert!(instance.started_at().is_some());
        assert!(instance.completed_at().is_none());

        instance.fail("step 'b' failed").unwrap();
        assert_eq!(instance.status(), WorkflowStatus::Failed);
        assert_eq!(instance.failure_reason(), Some("step 'b' failed"));
        assert!(instance.completed_at().is_some());

        instance.begin_compensation().unwrap();
        instance.finish_compensation().unwrap();
        assert_eq!(instance.status(), WorkflowStatus::Compensated);
    }

    #[test]
    fn test_invalid_mutation_leaves_status_unchanged() {
        let mut instance = WorkflowInstance::new("pipeline", WorkflowContext::new());
        assert!(instance.complete().is_err());
        assert_eq!(instance.status(), WorkflowStatus::Pending);
        assert!(instance.completed_at().is_none());
    }

    #[test]
    fn test_record_overwrites_and_keeps_first_order() {
        let mut instance = WorkflowInstance::new("pipeline", WorkflowContext::new());
        instance.record_execution(execution("a", StepStatus::Failed, 0, 1, 0));
        instance.record_execution(execution("b", StepStatus::Completed, 1, 2, 0));
        instance.record_execution(execution("a", StepStatus::Completed, 3, 4, 1));

        assert_eq!(instance.execution_order(), ["a", "b"]);
        assert_eq!(instance.execution("a").unwrap().status, StepStatus::Completed);
        assert_eq!(instance.completed_step_ids(), vec!["a", "b"]);
    }

    #[test]
    fn test_completed_in_order_uses_completion_time() {
        let mut instance = WorkflowInstance::new("fan-in", WorkflowContext::new());
        instance.record_execution(execution("slow", StepStatus::Completed, 0, 9, 0));
        instance.record_execution(execution("fast", StepStatus::Completed, 0, 2, 0));
        instance.record_execution(execution("broken", StepStatus::Failed, 0, 3, 0));

        let ids: Vec<_> = instance
            .completed_in_order()
            .iter()
            .map(|e| e.step_id.as_str())
            .collect();
        assert_eq!(ids, vec!["fast", "slow"]);
        assert_eq!(instance.failed_step_ids(), vec!["broken"]);
    }

    #[test]
    fn test_statistics() {
        let mut instance = WorkflowInstance::new("stats", WorkflowContext::new());
        assert!(instance.average_step_duration().is_none());
        assert_eq!(instance.retry_rate(), 0.0);

        instance.record_execution(execution("a", StepStatus::Completed, 0, 2, 0));
        instance.record_execution(execution("b", StepStatus::Completed, 0, 6, 2));
        instance.record_execution(execution("c", StepStatus::Skipped, 0, 1, 0));

        assert_eq!(
            instance.average_step_duration(),
            Some(chrono::Duration::seconds(3))
        );
        assert_eq!(instance.slowest_step().unwrap().step_id, "b");
        assert_eq!(instance.fastest_step().unwrap().step_id, "c");
        assert!((instance.retry_rate() - 1.0 / 3.0).abs() < f64::EPSILON);
        assert_eq!(instance.progress(6), 0.5);
    }

    #[test]
    fn test_mark_compensated_requires_completed_step() {
        let mut instance = WorkflowInstance::new("saga", WorkflowContext::new());
        let failed = StepResult::failed(
            "charge",
            StepError::timed_out(Duration::from_secs(1)),
            Utc::now(),
            0,
        );
        instance.record_step(&failed);
        instance.record_execution(execution("reserve", StepStatus::Completed, 0, 1, 0));

        assert!(!instance.mark_compensated("charge"));
        assert!(!instance.mark_compensated("unknown"));
        assert!(instance.mark_compensated("reserve"));
        assert_eq!(
            instance.execution("reserve").unwrap().status,
            StepStatus::Compensated
        );
        assert!(instance.completed_in_order().is_empty());
    }
}
