//! Workflow execution runtime for weft.
//!
//! Resolves definitions into layers, runs steps with retry and timeout
//! policies, fans parallel layers out to tasks, compensates failed runs and
//! persists instances through an [`InstanceStore`](weft_core::InstanceStore).

pub mod compensation;
pub mod control;
pub mod engine;
pub mod events;
pub mod executor;
pub mod parallel;
pub mod resolver;
pub mod retry;
pub mod service;
pub mod store;
pub mod timeout;

pub use compensation::{CompensationHandler, CompensationReport, CompletedStep};
pub use control::{RunControl, RunGuard, RunRegistry};
pub use engine::{WorkflowEngine, WorkflowEngineBuilder};
pub use events::{EventBus, FanoutPublisher, TracingEventPublisher};
pub use executor::{CompensationOutcome, StepExecutor};
pub use parallel::{LayerResults, ParallelExecutionCoordinator, PreparedStep};
pub use resolver::{DependencyResolver, ExecutionLayers};
pub use retry::{Attempted, RetryHandler};
pub use service::WorkflowService;
pub use store::{InMemoryInstanceStore, PgInstanceStore};
pub use timeout::TimeoutHandler;
