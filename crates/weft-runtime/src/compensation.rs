use std::sync::Arc;

use uuid::Uuid;
use weft_core::{
    CompensationCoverage, CompensationFailure, CompensationStrategy, ContextValue,
    WorkflowContext, WorkflowDefinition,
};

use crate::executor::{CompensationOutcome, StepExecutor};

/// A completed step eligible for compensation.
#[derive(Debug, Clone)]
pub struct CompletedStep {
    pub step_id: String,
    pub output: Option<ContextValue>,
}

/// What a compensation pass did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompensationReport {
    /// Steps whose action ran successfully, in invocation order.
    pub compensated: Vec<String>,
    /// Steps passed over because they declare no action.
    pub skipped: Vec<String>,
    pub failures: Vec<CompensationFailure>,
}

impl CompensationReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Runs saga compensation over completed steps.
pub struct CompensationHandler {
    executor: Arc<StepExecutor>,
}

impl CompensationHandler {
    pub fn new(executor: Arc<StepExecutor>) -> Self {
        Self { executor }
    }

    /// Compensate `completed` (given in completion order) according to the
    /// definition's strategy.
    ///
    /// Every compensable step is attempted exactly once; a failure is
    /// recorded and the pass moves on.
    pub async fn compensate(
        &self,
        definition: &WorkflowDefinition,
        completed: &[CompletedStep],
        ctx: &WorkflowContext,
        instance_id: Uuid,
    ) -> CompensationReport {
        let mut report = CompensationReport::default();

        if definition.compensation_strategy() == CompensationStrategy::None {
            return report;
        }

        let strict = definition.compensation_coverage() == CompensationCoverage::Strict;

        for step in completed.iter().rev() {
            let Some(spec) = definition.step(&step.step_id) else {
                report.failures.push(CompensationFailure {
                    step_id: step.step_id.clone(),
                    message: "step is not part of the definition".to_string(),
                });
                continue;
            };

            match self
                .executor
                .execute_compensation(spec, step.output.clone(), ctx, instance_id)
                .await
            {
                CompensationOutcome::Compensated => report.compensated.push(step.step_id.clone()),
                CompensationOutcome::Failed(error) => {
                    tracing::error!(
                        %instance_id,
                        step = %step.step_id,
                        error = %error,
                        "Compensation failed, continuing with remaining steps"
                    );
                    report.failures.push(CompensationFailure {
                        step_id: step.step_id.clone(),
                        message: error.to_string(),
                    });
                }
                CompensationOutcome::NoAction if strict => {
                    report.failures.push(CompensationFailure {
                        step_id: step.step_id.clone(),
                        message: "no compensation action".to_string(),
                    });
                }
                CompensationOutcome::NoAction => report.skipped.push(step.step_id.clone()),
            }
        }

        tracing::debug!(
            %instance_id,
            compensated = report.compensated.len(),
            skipped = report.skipped.len(),
            failures = report.failures.len(),
            "Compensation pass finished"
        );

        report
    }
}
