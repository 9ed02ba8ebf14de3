use std::sync::RwLock;

use crate::workflow::{EventPublisher, WorkflowEvent};

/// Publisher that keeps every event for later inspection.
///
/// ```ignore
/// let events = Arc::new(RecordingPublisher::new());
/// let engine = WorkflowEngine::builder(store).publisher(events.clone()).build();
/// engine.execute_workflow(&definition, instance).await?;
///
/// events.assert_published("workflow_completed");
/// assert_eq!(events.count("step_retried"), 2);
/// ```
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    events: RwLock<Vec<WorkflowEvent>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events in publication order.
    pub fn events(&self) -> Vec<WorkflowEvent> {
        self.events
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn event_types(&self) -> Vec<&'static str> {
        self.events().iter().map(|e| e.event_type()).collect()
    }

    /// Number of events with the given `type` tag.
    pub fn count(&self, event_type: &str) -> usize {
        self.events()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .count()
    }

    /// Event types concerning `step_id`, in order.
    pub fn step_event_types(&self, step_id: &str) -> Vec<&'static str> {
        self.events()
            .iter()
            .filter(|e| e.step_id() == Some(step_id))
            .map(|e| e.event_type())
            .collect()
    }

    /// Step ids of events with the given `type` tag, in order.
    pub fn steps_for(&self, event_type: &str) -> Vec<String> {
        self.events()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .filter_map(|e| e.step_id().map(str::to_string))
            .collect()
    }

    pub fn clear(&self) {
        self.events
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub fn assert_published(&self, event_type: &str) {
        let types = self.event_types();
        assert!(
            types.contains(&event_type),
            "Expected event '{}' to be published. Published events: {:?}",
            event_type,
            types
        );
    }

    pub fn assert_not_published(&self, event_type: &str) {
        let types = self.event_types();
        assert!(
            !types.contains(&event_type),
            "Expected event '{}' not to be published. Published events: {:?}",
            event_type,
            types
        );
    }
}

impl EventPublisher for RecordingPublisher {
    fn publish(&self, event: WorkflowEvent) {
        self.events
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}
