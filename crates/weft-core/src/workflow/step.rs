use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::context::ContextValue;
use crate::StepError;

/// Outcome of a step execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Step body returned a value.
    Completed,
    /// Step body failed, or its input was rejected.
    Failed,
    /// The final attempt exceeded the step timeout.
    TimedOut,
    /// Skip predicate matched; the body never ran.
    Skipped,
    /// Step completed earlier and its compensation has since run.
    Compensated,
}

impl StepStatus {
    /// Convert to string for storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Skipped => "skipped",
            Self::Compensated => "compensated",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::TimedOut)
    }
}

impl FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "timed_out" => Ok(Self::TimedOut),
            "skipped" => Ok(Self::Skipped),
            "compensated" => Ok(Self::Compensated),
            other => Err(format!("unknown step status '{}'", other)),
        }
    }
}

/// Result of executing one step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    pub step_id: String,
    pub status: StepStatus,
    pub output: Option<ContextValue>,
    pub error: Option<StepError>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// Zero-based index of the attempt that produced this result.
    pub attempt_number: u32,
}

impl StepResult {
    pub fn completed(
        step_id: impl Into<String>,
        output: Option<ContextValue>,
        started_at: DateTime<Utc>,
        attempt_number: u32,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Completed,
            output,
            error: None,
            started_at,
            completed_at: Utc::now(),
            attempt_number,
        }
    }

    /// A failure result. Timeouts map to `TimedOut`, everything else to `Failed`.
    pub fn failed(
        step_id: impl Into<String>,
        error: StepError,
        started_at: DateTime<Utc>,
        attempt_number: u32,
    ) -> Self {
        let status = if error.is_timeout() {
            StepStatus::TimedOut
        } else {
            StepStatus::Failed
        };
        Self {
            step_id: step_id.into(),
            status,
            output: None,
            error: Some(error),
            started_at,
            completed_at: Utc::now(),
            attempt_number,
        }
    }

    pub fn skipped(step_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Skipped,
            output: None,
            error: None,
            started_at,
            completed_at: Utc::now(),
            attempt_number: 0,
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        self.completed_at - self.started_at
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn is_failure(&self) -> bool {
        self.status.is_failure()
    }

    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(|e| e.to_string())
    }
}

/// Recorded snapshot of a step result, kept on the workflow instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecution {
    pub step_id: String,
    pub status: StepStatus,
    pub output: Option<ContextValue>,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub attempt_number: u32,
    /// When the step's compensation ran, if it did.
    pub compensated_at: Option<DateTime<Utc>>,
}

impl StepExecution {
    pub fn duration(&self) -> chrono::Duration {
        self.completed_at - self.started_at
    }

    /// Whether more than one attempt was needed.
    pub fn was_retried(&self) -> bool {
        self.attempt_number > 0
    }

    /// Mark as compensated.
    pub fn compensate(&mut self) {
        self.status = StepStatus::Compensated;
        self.compensated_at = Some(Utc::now());
    }
}

impl From<&StepResult> for StepExecution {
    fn from(result: &StepResult) -> Self {
        Self {
            step_id: result.step_id.clone(),
            status: result.status,
            output: result.output.clone(),
            error_message: result.error_message(),
            started_at: result.started_at,
            completed_at: result.completed_at,
            attempt_number: result.attempt_number,
            compensated_at: None,
        }
    }
}
