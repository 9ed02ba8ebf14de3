//! Wiring of store, publishers and engine from a [`WeftConfig`].

use std::sync::Arc;

use tokio::sync::broadcast;

use weft_core::config::WeftConfig;
use weft_core::error::Result;
use weft_core::{EventPublisher, InstanceStore, RetryPolicy, WorkflowEvent};
use weft_runtime::{EventBus, FanoutPublisher, TracingEventPublisher, WorkflowEngine, WorkflowService};

/// Prelude module for common imports.
pub mod prelude {
    pub use chrono::{DateTime, Utc};
    pub use uuid::Uuid;

    pub use weft_core::config::WeftConfig;
    pub use weft_core::error::{Result, StepError, WeftError};
    pub use weft_core::{
        CompensationCoverage, CompensationStrategy, EventPublisher, ExecutionMode, InstanceStore,
        RetryPolicy, StepSpec, StepStatus, WorkflowContext, WorkflowDefinition, WorkflowEvent,
        WorkflowInstance, WorkflowStatus,
    };
    pub use weft_runtime::{InMemoryInstanceStore, WorkflowEngine, WorkflowService};

    pub use crate::{Weft, WeftBuilder};
}

/// A configured weft runtime: one store, one engine, one service.
pub struct Weft {
    config: WeftConfig,
    service: WorkflowService,
    bus: EventBus,
}

impl Weft {
    pub fn builder() -> WeftBuilder {
        WeftBuilder::new()
    }

    pub fn config(&self) -> &WeftConfig {
        &self.config
    }

    pub fn service(&self) -> &WorkflowService {
        &self.service
    }

    pub fn engine(&self) -> &Arc<WorkflowEngine> {
        self.service.engine()
    }

    /// Retry policy built from the `[retry]` section, for steps that do not
    /// declare their own.
    pub fn default_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_config(&self.config.retry)
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.bus.subscribe()
    }
}

/// Builder for [`Weft`].
pub struct WeftBuilder {
    config: Option<WeftConfig>,
    store: Option<Arc<dyn InstanceStore>>,
    publishers: Vec<Arc<dyn EventPublisher>>,
}

impl WeftBuilder {
    fn new() -> Self {
        Self {
            config: None,
            store: None,
            publishers: Vec::new(),
        }
    }

    pub fn config(mut self, config: WeftConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use this store instead of the one selected by `store.backend`.
    pub fn store(mut self, store: Arc<dyn InstanceStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Add a publisher next to the built-in tracing publisher and event bus.
    pub fn publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publishers.push(publisher);
        self
    }

    pub async fn build(self) -> Result<Weft> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let store = match self.store {
            Some(store) => store,
            None => weft_runtime::store::connect(&config.store).await?,
        };

        let bus = EventBus::new(config.engine.event_channel_capacity);
        let publisher = self.publishers.into_iter().fold(
            FanoutPublisher::new()
                .with(Arc::new(TracingEventPublisher))
                .with(Arc::new(bus.clone())),
            FanoutPublisher::with,
        );

        let engine = WorkflowEngine::builder(store)
            .publisher(Arc::new(publisher))
            .config(&config.engine)
            .build();

        tracing::debug!(
            backend = ?config.store.backend,
            max_concurrent_steps = config.engine.max_concurrent_steps,
            "Weft runtime built"
        );

        Ok(Weft {
            config,
            service: WorkflowService::new(Arc::new(engine)),
            bus,
        })
    }
}
