//! Sample workflows used by `weft demo`.
//!
//! Both run against whatever store the runtime was built with and declare
//! reverse-order compensation, so forcing a failure shows completed steps
//! being undone.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use weft_core::error::{Result, StepError, WeftError};
use weft_core::{CompensationStrategy, RetryPolicy, StepSpec, WorkflowContext, WorkflowDefinition};

/// Step ids of the pipeline demo, in execution order.
pub const PIPELINE_STEPS: [&str; 3] = ["scrape", "analyze", "report"];

/// Root step ids of the fan-in demo.
pub const FAN_IN_ROOTS: [&str; 3] = ["fast", "medium", "slow"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub url: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub words: usize,
    pub mentions_rust: bool,
}

fn forced(step_id: &str, fail_at: Option<&str>) -> std::result::Result<(), StepError> {
    if fail_at == Some(step_id) {
        return Err(StepError::fatal(format!("forced failure at '{}'", step_id)));
    }
    Ok(())
}

/// Initial context for the pipeline demo.
pub fn pipeline_context(url: &str) -> Result<WorkflowContext> {
    WorkflowContext::new().put("url", url.to_string())
}

/// Sequential scrape, analyze, report workflow.
///
/// `fail_at` names a step that fails instead of doing its work. `retry`
/// applies to the scrape step, the only one that talks to the outside.
pub fn pipeline(fail_at: Option<&str>, retry: RetryPolicy) -> Result<WorkflowDefinition> {
    if let Some(step) = fail_at {
        if !PIPELINE_STEPS.contains(&step) {
            return Err(WeftError::InvalidDefinition(format!(
                "unknown pipeline step '{}', expected one of {:?}",
                step, PIPELINE_STEPS
            )));
        }
    }
    let fail_at = fail_at.map(str::to_string);

    let scrape_fail = fail_at.clone();
    let scrape = StepSpec::source("scrape", move |ctx| {
        let fail_at = scrape_fail.clone();
        async move {
            forced("scrape", fail_at.as_deref())?;
            let url: String = ctx
                .get_required("url")
                .map_err(|e| StepError::validation(e.to_string()))?;
            Ok::<_, StepError>(Page {
                body: format!("fetched {} with rust inside", url),
                url,
            })
        }
    })
    .output_key("scraped_data")
    .retry(retry)
    .compensate(|page: Page, _ctx| async move {
        tracing::info!(url = %page.url, "Discarding scraped page");
        Ok(())
    });

    let analyze_fail = fail_at.clone();
    let analyze = StepSpec::new("analyze", move |page: Option<Page>, _ctx| {
        let fail_at = analyze_fail.clone();
        async move {
            forced("analyze", fail_at.as_deref())?;
            let page = page.ok_or_else(|| StepError::validation("nothing scraped"))?;
            Ok::<_, StepError>(Analysis {
                words: page.body.split_whitespace().count(),
                mentions_rust: page.body.contains("rust"),
            })
        }
    })
    .input_key("scraped_data")
    .require_input()
    .output_key("analysis_results")
    .compensate(|analysis: Analysis, _ctx| async move {
        tracing::info!(words = analysis.words, "Dropping analysis results");
        Ok(())
    });

    let report = StepSpec::new("report", move |analysis: Option<Analysis>, _ctx| {
        let fail_at = fail_at.clone();
        async move {
            forced("report", fail_at.as_deref())?;
            let analysis = analysis.ok_or_else(|| StepError::validation("no analysis"))?;
            Ok::<_, StepError>(format!(
                "{} words, rust: {}",
                analysis.words, analysis.mentions_rust
            ))
        }
    })
    .input_key("analysis_results")
    .require_input()
    .output_key("report");

    WorkflowDefinition::builder("content_pipeline")
        .compensation(CompensationStrategy::ReverseOrder)
        .step(scrape)
        .step_after(analyze, ["scrape"])
        .step_after(report, ["analyze"])
        .build()
}

/// Three parallel roots of different speed feeding one aggregation step.
/// The slowest root sleeps for `slow`.
pub fn fan_in(slow: Duration) -> Result<WorkflowDefinition> {
    let delays = [slow / 4, slow / 2, slow];

    let mut builder = WorkflowDefinition::builder("fan_in")
        .parallel()
        .compensation(CompensationStrategy::ReverseOrder);

    for (id, delay) in FAN_IN_ROOTS.into_iter().zip(delays) {
        let root = StepSpec::source(id, move |_ctx| async move {
            tokio::time::sleep(delay).await;
            Ok(delay.as_millis() as u64)
        })
        .output_key(id)
        .compensate(move |millis: u64, _ctx| async move {
            tracing::info!(step = id, millis, "Releasing root result");
            Ok(())
        });
        builder = builder.step(root);
    }

    let aggregate = StepSpec::source("aggregate", |ctx| async move {
        let mut total = 0u64;
        for key in FAN_IN_ROOTS {
            total += ctx
                .get_required::<u64>(key)
                .map_err(|e| StepError::fatal(e.to_string()))?;
        }
        Ok::<_, StepError>(total)
    })
    .output_key("total");

    builder.step_after(aggregate, FAN_IN_ROOTS).build()
}
