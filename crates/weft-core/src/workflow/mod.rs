mod context;
mod definition;
mod events;
mod instance;
mod retry;
mod snapshot;
mod spec;
mod state;
mod step;

pub use context::{ContextValue, WorkflowContext};
pub use definition::{
    CompensationCoverage, CompensationStrategy, ExecutionMode, WorkflowDefinition,
    WorkflowDefinitionBuilder,
};
pub use events::{EventPublisher, NoopPublisher, WorkflowEvent};
pub use instance::{CompensationFailure, WorkflowInstance};
pub use retry::{Backoff, RetryPolicy, RetryPredicate};
pub use snapshot::InstanceSnapshot;
pub use spec::{StepBuilder, StepFuture, StepSpec, DEFAULT_STEP_TIMEOUT};
pub use state::{WorkflowStatus, WorkflowTransition};
pub use step::{StepExecution, StepResult, StepStatus};
