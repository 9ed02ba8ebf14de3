use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Result, WeftError};

/// Workflow instance status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Created but not started.
    Pending,
    /// Layers are executing.
    Running,
    /// Stopped at a layer boundary, resumable.
    Paused,
    /// Every layer succeeded.
    Completed,
    /// A layer failed.
    Failed,
    /// Compensation started. Stays here if any compensation failed.
    Compensating,
    /// Every completed step was compensated.
    Compensated,
    /// Cancelled before finishing.
    Cancelled,
}

/// Event driving a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowTransition {
    Start,
    Complete,
    Fail,
    Pause,
    Resume,
    Cancel,
    BeginCompensation,
    FinishCompensation,
}

impl WorkflowTransition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Complete => "complete",
            Self::Fail => "fail",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Cancel => "cancel",
            Self::BeginCompensation => "begin compensation of",
            Self::FinishCompensation => "finish compensation of",
        }
    }
}

impl fmt::Display for WorkflowTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl WorkflowStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [WorkflowStatus; 8] = [
        Self::Pending,
        Self::Running,
        Self::Paused,
        Self::Completed,
        Self::Failed,
        Self::Compensating,
        Self::Compensated,
        Self::Cancelled,
    ];

    /// Convert to string for storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Compensating => "compensating",
            Self::Compensated => "compensated",
            Self::Cancelled => "cancelled",
        }
    }

    /// Terminal for scheduling. A failed instance may still be compensated.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Compensated | Self::Cancelled
        )
    }

    pub fn can_start(&self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Pure transition function.
    pub fn apply(self, transition: WorkflowTransition) -> Result<WorkflowStatus> {
        use WorkflowStatus::*;
        use WorkflowTransition as T;

        let next = match (self, transition) {
            (Pending, T::Start) => Running,
            (Running, T::Complete) => Completed,
            (Running, T::Fail) => Failed,
            (Running, T::Pause) => Paused,
            (Paused, T::Resume) => Running,
            (Failed, T::BeginCompensation) => Compensating,
            (Compensating, T::FinishCompensation) => Compensated,
            (Pending | Running | Paused | Compensating, T::Cancel) => Cancelled,
            (from, transition) => {
                return Err(WeftError::InvalidTransition {
                    from: from.to_string(),
                    transition: transition.to_string(),
                })
            }
        };
        Ok(next)
    }

    pub fn can_apply(self, transition: WorkflowTransition) -> bool {
        self.apply(transition).is_ok()
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "compensating" => Ok(Self::Compensating),
            "compensated" => Ok(Self::Compensated),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown workflow status '{}'", other)),
        }
    }
}
