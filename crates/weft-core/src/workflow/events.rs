//! Lifecycle notifications emitted while workflows run.
//!
//! Publishing is fire-and-forget: a publisher cannot fail a workflow, and the
//! engine never waits on delivery.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events emitted during workflow execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    WorkflowStarted {
        instance_id: Uuid,
        workflow: String,
    },

    WorkflowCompleted {
        instance_id: Uuid,
        workflow: String,
        duration_ms: u64,
    },

    WorkflowFailed {
        instance_id: Uuid,
        workflow: String,
        reason: String,
    },

    WorkflowPaused {
        instance_id: Uuid,
        workflow: String,
    },

    WorkflowResumed {
        instance_id: Uuid,
        workflow: String,
    },

    WorkflowCancelled {
        instance_id: Uuid,
        workflow: String,
    },

    CompensationStarted {
        instance_id: Uuid,
        workflow: String,
        /// Completed steps that are candidates for compensation.
        steps: usize,
    },

    CompensationCompleted {
        instance_id: Uuid,
        workflow: String,
        success: bool,
        failures: usize,
    },

    StepStarted {
        instance_id: Uuid,
        step_id: String,
    },

    StepCompleted {
        instance_id: Uuid,
        step_id: String,
        attempt: u32,
        duration_ms: u64,
    },

    StepFailed {
        instance_id: Uuid,
        step_id: String,
        attempt: u32,
        error: String,
        timed_out: bool,
    },

    /// Emitted before every attempt after the first.
    StepRetried {
        instance_id: Uuid,
        step_id: String,
        attempt: u32,
        error: String,
    },

    StepSkipped {
        instance_id: Uuid,
        step_id: String,
    },

    StepCompensated {
        instance_id: Uuid,
        step_id: String,
        success: bool,
        error: Option<String>,
    },
}

impl WorkflowEvent {
    pub fn instance_id(&self) -> Uuid {
        match self {
            Self::WorkflowStarted { instance_id, .. }
            | Self::WorkflowCompleted { instance_id, .. }
            | Self::WorkflowFailed { instance_id, .. }
            | Self::WorkflowPaused { instance_id, .. }
            | Self::WorkflowResumed { instance_id, .. }
            | Self::WorkflowCancelled { instance_id, .. }
            | Self::CompensationStarted { instance_id, .. }
            | Self::CompensationCompleted { instance_id, .. }
            | Self::StepStarted { instance_id, .. }
            | Self::StepCompleted { instance_id, .. }
            | Self::StepFailed { instance_id, .. }
            | Self::StepRetried { instance_id, .. }
            | Self::StepSkipped { instance_id, .. }
            | Self::StepCompensated { instance_id, .. } => *instance_id,
        }
    }

    /// Step the event concerns, for step-level events.
    pub fn step_id(&self) -> Option<&str> {
        match self {
            Self::StepStarted { step_id, .. }
            | Self::StepCompleted { step_id, .. }
            | Self::StepFailed { step_id, .. }
            | Self::StepRetried { step_id, .. }
            | Self::StepSkipped { step_id, .. }
            | Self::StepCompensated { step_id, .. } => Some(step_id),
            _ => None,
        }
    }

    /// Stable name matching the serialised `type` tag.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::WorkflowStarted { .. } => "workflow_started",
            Self::WorkflowCompleted { .. } => "workflow_completed",
            Self::WorkflowFailed { .. } => "workflow_failed",
            Self::WorkflowPaused { .. } => "workflow_paused",
            Self::WorkflowResumed { .. } => "workflow_resumed",
            Self::WorkflowCancelled { .. } => "workflow_cancelled",
            Self::CompensationStarted { .. } => "compensation_started",
            Self::CompensationCompleted { .. } => "compensation_completed",
            Self::StepStarted { .. } => "step_started",
            Self::StepCompleted { .. } => "step_completed",
            Self::StepFailed { .. } => "step_failed",
            Self::StepRetried { .. } => "step_retried",
            Self::StepSkipped { .. } => "step_skipped",
            Self::StepCompensated { .. } => "step_compensated",
        }
    }
}

/// Sink for workflow events.
///
/// Implementations must not block and must not panic. The engine guards
/// against panics anyway, but a slow publisher slows every step.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: WorkflowEvent);
}

impl<T: EventPublisher + ?Sized> EventPublisher for Arc<T> {
    fn publish(&self, event: WorkflowEvent) {
        (**self).publish(event)
    }
}

/// Publisher that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPublisher;

impl EventPublisher for NoopPublisher {
    fn publish(&self, _event: WorkflowEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = WorkflowEvent::StepRetried {
            instance_id: Uuid::nil(),
            step_id: "fetch".into(),
            attempt: 2,
            error: "503".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "step_retried");
        assert_eq!(json["type"], event.event_type());
        assert_eq!(json["attempt"], 2);
    }

    #[test]
    fn test_accessors() {
        let id = Uuid::new_v4();
        let step = WorkflowEvent::StepSkipped {
            instance_id: id,
            step_id: "optional".into(),
        };
        assert_eq!(step.instance_id(), id);
        assert_eq!(step.step_id(), Some("optional"));

        let workflow = WorkflowEvent::WorkflowPaused {
            instance_id: id,
            workflow: "wf".into(),
        };
        assert_eq!(workflow.step_id(), None);
    }
}
