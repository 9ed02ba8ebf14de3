use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Core error type for weft operations.
///
/// Structural and configuration problems surface through this type. Failures
/// raised while a step runs are captured as [`StepError`] values instead and
/// recorded on the step's result.
#[derive(Error, Debug)]
pub enum WeftError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid workflow definition: {0}")]
    InvalidDefinition(String),

    #[error("Step '{0}' is defined more than once")]
    DuplicateStep(String),

    #[error("Step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    #[error("Step '{step}' cannot depend on itself")]
    SelfDependency { step: String },

    #[error("Cycle detected in workflow involving steps: {cycle:?}")]
    CyclicDependency { cycle: Vec<String> },

    #[error("Dependency graph cannot be resolved, stuck steps: {remaining:?}")]
    UnresolvableGraph { remaining: Vec<String> },

    #[error("Type mismatch for '{key}': expected {expected}, found {actual}")]
    TypeMismatch {
        key: String,
        expected: String,
        actual: String,
    },

    #[error("Required context key '{0}' is missing")]
    MissingContextKey(String),

    #[error("Invalid transition: cannot {transition} a workflow in {from} state")]
    InvalidTransition { from: String, transition: String },

    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for WeftError {
    fn from(e: serde_json::Error) -> Self {
        WeftError::Serialization(e.to_string())
    }
}

/// Result type alias using WeftError.
pub type Result<T> = std::result::Result<T, WeftError>;

/// Failure raised by a single step attempt.
///
/// These never escape the engine as errors; the step executor folds them into
/// the step's result so the final instance explains what happened.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepError {
    /// Input did not satisfy the step's precondition. Never retried.
    #[error("Validation failed: {message}")]
    Validation { message: String },

    /// The step body returned an error.
    #[error("{message}")]
    Failed { message: String, retryable: bool },

    /// The attempt exceeded its time bound and was cancelled.
    #[error("Step timed out after {after_ms}ms")]
    TimedOut { after_ms: u64 },

    /// The step body panicked.
    #[error("Step panicked: {message}")]
    Panicked { message: String },

    /// The attempt was cancelled by the workflow.
    #[error("Step cancelled")]
    Cancelled,
}

impl StepError {
    /// Transient failure that a retry policy may re-attempt.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            retryable: true,
        }
    }

    /// Definite failure that no retry will fix.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn timed_out(after: Duration) -> Self {
        Self::TimedOut {
            after_ms: after.as_millis() as u64,
        }
    }

    /// Default retry classification used when a policy has no predicate.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Failed { retryable, .. } => *retryable,
            Self::TimedOut { .. } => true,
            Self::Validation { .. } | Self::Panicked { .. } | Self::Cancelled => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }
}

impl From<WeftError> for StepError {
    fn from(e: WeftError) -> Self {
        match e {
            WeftError::TypeMismatch { .. } | WeftError::MissingContextKey(_) => {
                StepError::validation(e.to_string())
            }
            WeftError::Timeout(message) => StepError::transient(message),
            other => StepError::fatal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_error_retry_classification() {
        assert!(StepError::transient("network").is_retryable());
        assert!(!StepError::fatal("bad request").is_retryable());
        assert!(StepError::timed_out(Duration::from_millis(10)).is_retryable());
        assert!(!StepError::validation("missing").is_retryable());
        assert!(!StepError::Cancelled.is_retryable());
    }

    #[test]
    fn test_step_error_display() {
        let err = StepError::timed_out(Duration::from_millis(250));
        assert_eq!(err.to_string(), "Step timed out after 250ms");
        assert!(err.is_timeout());
    }

    #[test]
    fn test_type_mismatch_becomes_validation_failure() {
        let err: StepError = WeftError::TypeMismatch {
            key: "k".into(),
            expected: "u32".into(),
            actual: "String".into(),
        }
        .into();
        assert!(matches!(err, StepError::Validation { .. }));
    }

    #[test]
    fn test_step_error_serializes_with_kind_tag() {
        let json = serde_json::to_value(StepError::fatal("boom")).unwrap();
        assert_eq!(json["kind"], "failed");
        assert_eq!(json["retryable"], false);
    }
}
