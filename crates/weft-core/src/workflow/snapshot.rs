use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::context::WorkflowContext;
use super::instance::{CompensationFailure, WorkflowInstance};
use super::state::WorkflowStatus;
use super::step::StepExecution;
use crate::{Result, WeftError};

/// Persisted form of a [`WorkflowInstance`].
///
/// [`WorkflowInstance::from_snapshot`] is the only way back from this struct
/// to a live instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceSnapshot {
    pub id: Uuid,
    pub workflow_name: String,
    pub status: WorkflowStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub context: WorkflowContext,
    pub executions: BTreeMap<String, StepExecution>,
    #[serde(default)]
    pub execution_order: Vec<String>,
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub compensation_failures: Vec<CompensationFailure>,
}

impl InstanceSnapshot {
    /// Check that the recorded fields agree with the recorded status.
    pub fn validate(&self) -> Result<()> {
        use WorkflowStatus::*;

        if self.workflow_name.trim().is_empty() {
            return invalid("workflow name is empty");
        }

        let needs_start = !matches!(self.status, Pending | Cancelled);
        if needs_start && self.started_at.is_none() {
            return invalid(format!("{} instance has no start time", self.status));
        }
        if self.status == Pending && self.started_at.is_some() {
            return invalid("pending instance has a start time");
        }

        match self.status {
            Completed | Failed | Compensating | Compensated | Cancelled => {
                if self.completed_at.is_none() {
                    return invalid(format!("{} instance has no completion time", self.status));
                }
            }
            Pending | Running | Paused => {
                if self.completed_at.is_some() {
                    return invalid(format!("{} instance has a completion time", self.status));
                }
            }
        }

        if matches!(self.status, Failed | Compensating | Compensated)
            && self.failure_reason.is_none()
        {
            return invalid(format!("{} instance has no failure reason", self.status));
        }

        for (key, execution) in &self.executions {
            if key != &execution.step_id {
                return invalid(format!(
                    "execution stored under '{}' belongs to step '{}'",
                    key, execution.step_id
                ));
            }
        }

        let mut seen = HashSet::new();
        for step_id in &self.execution_order {
            if !self.executions.contains_key(step_id) || !seen.insert(step_id.as_str()) {
                return invalid(format!("execution order entry '{}' is inconsistent", step_id));
            }
        }
        if seen.len() != self.executions.len() {
            return invalid("execution order does not cover every execution");
        }

        Ok(())
    }
}

fn invalid<T>(message: impl Into<String>) -> Result<T> {
    Err(WeftError::InvalidSnapshot(message.into()))
}

impl WorkflowInstance {
    /// Restore an instance from a persisted snapshot.
    pub fn from_snapshot(snapshot: InstanceSnapshot) -> Result<Self> {
        snapshot.validate()?;
        Ok(Self {
            id: snapshot.id,
            workflow_name: snapshot.workflow_name,
            status: snapshot.status,
            created_at: snapshot.created_at,
            started_at: snapshot.started_at,
            completed_at: snapshot.completed_at,
            context: snapshot.context,
            executions: snapshot.executions.into_iter().collect(),
            execution_order: snapshot.execution_order,
            failure_reason: snapshot.failure_reason,
            compensation_failures: snapshot.compensation_failures,
        })
    }

    pub fn to_snapshot(&self) -> InstanceSnapshot {
        InstanceSnapshot::from(self.clone())
    }
}

impl From<WorkflowInstance> for InstanceSnapshot {
    fn from(instance: WorkflowInstance) -> Self {
        Self {
            id: instance.id,
            workflow_name: instance.workflow_name,
            status: instance.status,
            created_at: instance.created_at,
            started_at: instance.started_at,
            completed_at: instance.completed_at,
            context: instance.context,
            executions: instance.executions.into_iter().collect(),
            execution_order: instance.execution_order,
            failure_reason: instance.failure_reason,
            compensation_failures: instance.compensation_failures,
        }
    }
}

impl TryFrom<InstanceSnapshot> for WorkflowInstance {
    type Error = WeftError;

    fn try_from(snapshot: InstanceSnapshot) -> Result<Self> {
        Self::from_snapshot(snapshot)
    }
}
