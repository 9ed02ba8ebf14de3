#![allow(dead_code)]

use std::sync::Arc;

use weft_core::config::EngineConfig;
use weft_core::testing::RecordingPublisher;
use weft_runtime::{InMemoryInstanceStore, WorkflowEngine, WorkflowService};

pub struct Harness {
    pub service: WorkflowService,
    pub store: Arc<InMemoryInstanceStore>,
    pub events: Arc<RecordingPublisher>,
}

pub fn harness() -> Harness {
    harness_with(EngineConfig::default())
}

pub fn harness_with(config: EngineConfig) -> Harness {
    let store = Arc::new(InMemoryInstanceStore::new());
    let events = Arc::new(RecordingPublisher::new());
    let engine = WorkflowEngine::builder(store.clone())
        .publisher(events.clone())
        .config(&config)
        .build();

    Harness {
        service: WorkflowService::new(Arc::new(engine)),
        store,
        events,
    }
}
