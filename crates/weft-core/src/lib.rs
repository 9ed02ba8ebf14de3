//! Core types for the weft workflow engine.
//!
//! Everything here is plain data plus the ports the runtime plugs into:
//! contexts and value envelopes, step specs, validated definitions, instances
//! and their state machine, events, the persistence trait and configuration.

pub mod config;
pub mod error;
pub mod store;
pub mod workflow;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::WeftConfig;
pub use error::{Result, StepError, WeftError};
pub use store::{InstanceStore, StoreFuture};
pub use workflow::{
    Backoff, CompensationCoverage, CompensationFailure, CompensationStrategy, ContextValue,
    EventPublisher, ExecutionMode, InstanceSnapshot, NoopPublisher, RetryPolicy, StepBuilder,
    StepExecution, StepResult, StepSpec, StepStatus, WorkflowContext, WorkflowDefinition,
    WorkflowEvent, WorkflowInstance, WorkflowStatus, WorkflowTransition, DEFAULT_STEP_TIMEOUT,
};
