//! Event publishers.
//!
//! [`EventBus`] fans events out over a `tokio::sync::broadcast` channel;
//! publishing with no active subscribers is a no-op.
//! [`TracingEventPublisher`] turns every event into a log line.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::broadcast;
use weft_core::{EventPublisher, WorkflowEvent};

use crate::timeout::panic_message;

/// Publish without letting a misbehaving publisher reach the caller.
pub(crate) fn publish_safely(publisher: &dyn EventPublisher, event: WorkflowEvent) {
    let event_type = event.event_type();
    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| publisher.publish(event))) {
        tracing::warn!(
            event_type,
            error = %panic_message(payload),
            "Event publisher panicked"
        );
    }
}

/// Multi-consumer event bus.
///
/// Cloning the bus clones the sender, allowing multiple producers and
/// consumers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<WorkflowEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Create a new subscriber that will receive all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl EventPublisher for EventBus {
    fn publish(&self, event: WorkflowEvent) {
        let _ = self.sender.send(event);
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}

/// Logs every event through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventPublisher;

impl EventPublisher for TracingEventPublisher {
    fn publish(&self, event: WorkflowEvent) {
        let instance_id = event.instance_id();
        match &event {
            WorkflowEvent::WorkflowStarted { workflow, .. } => {
                tracing::info!(%instance_id, workflow = %workflow, "Workflow started");
            }
            WorkflowEvent::WorkflowCompleted {
                workflow,
                duration_ms,
                ..
            } => {
                tracing::info!(%instance_id, workflow = %workflow, duration_ms, "Workflow completed");
            }
            WorkflowEvent::WorkflowFailed {
                workflow, reason, ..
            } => {
                tracing::warn!(%instance_id, workflow = %workflow, reason = %reason, "Workflow failed");
            }
            WorkflowEvent::WorkflowPaused { workflow, .. } => {
                tracing::info!(%instance_id, workflow = %workflow, "Workflow paused");
            }
            WorkflowEvent::WorkflowResumed { workflow, .. } => {
                tracing::info!(%instance_id, workflow = %workflow, "Workflow resumed");
            }
            WorkflowEvent::WorkflowCancelled { workflow, .. } => {
                tracing::info!(%instance_id, workflow = %workflow, "Workflow cancelled");
            }
            WorkflowEvent::CompensationStarted {
                workflow, steps, ..
            } => {
                tracing::info!(%instance_id, workflow = %workflow, steps, "Compensation started");
            }
            WorkflowEvent::CompensationCompleted {
                workflow,
                success,
                failures,
                ..
            } => {
                if *success {
                    tracing::info!(%instance_id, workflow = %workflow, "Compensation completed");
                } else {
                    tracing::error!(
                        %instance_id,
                        workflow = %workflow,
                        failures,
                        "Compensation incomplete, manual intervention required"
                    );
                }
            }
            WorkflowEvent::StepStarted { step_id, .. } => {
                tracing::debug!(%instance_id, step = %step_id, "Step started");
            }
            WorkflowEvent::StepCompleted {
                step_id,
                attempt,
                duration_ms,
                ..
            } => {
                tracing::info!(%instance_id, step = %step_id, attempt, duration_ms, "Step completed");
            }
            WorkflowEvent::StepFailed {
                step_id,
                attempt,
                error,
                timed_out,
                ..
            } => {
                tracing::warn!(
                    %instance_id,
                    step = %step_id,
                    attempt,
                    timed_out,
                    error = %error,
                    "Step failed"
                );
            }
            WorkflowEvent::StepRetried {
                step_id,
                attempt,
                error,
                ..
            } => {
                tracing::info!(%instance_id, step = %step_id, attempt, error = %error, "Retrying step");
            }
            WorkflowEvent::StepSkipped { step_id, .. } => {
                tracing::info!(%instance_id, step = %step_id, "Step skipped");
            }
            WorkflowEvent::StepCompensated {
                step_id,
                success,
                error,
                ..
            } => {
                if *success {
                    tracing::info!(%instance_id, step = %step_id, "Step compensated");
                } else {
                    tracing::error!(
                        %instance_id,
                        step = %step_id,
                        error = error.as_deref().unwrap_or("unknown"),
                        "Step compensation failed"
                    );
                }
            }
        }
    }
}

/// Sends every event to each inner publisher. A panicking publisher does
/// not stop delivery to the rest.
#[derive(Clone, Default)]
pub struct FanoutPublisher {
    publishers: Vec<Arc<dyn EventPublisher>>,
}

impl FanoutPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publishers.push(publisher);
        self
    }

    pub fn len(&self) -> usize {
        self.publishers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.publishers.is_empty()
    }
}

impl EventPublisher for FanoutPublisher {
    fn publish(&self, event: WorkflowEvent) {
        for publisher in &self.publishers {
            publish_safely(publisher.as_ref(), event.clone());
        }
    }
}
