use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use weft::{demo, logging, Weft};
use weft_core::config::StoreConfig;
use weft_core::{WorkflowContext, WorkflowInstance};

use super::load_config;

/// Run a sample workflow and print the final instance as JSON.
#[derive(Parser)]
pub struct DemoCommand {
    /// Configuration file path. Engine and logging settings are used; the
    /// store is always in-memory.
    #[arg(short, long, default_value = "weft.toml")]
    pub config: String,

    #[command(subcommand)]
    pub workflow: DemoWorkflow,
}

#[derive(Subcommand)]
pub enum DemoWorkflow {
    /// Sequential scrape, analyze, report pipeline.
    Pipeline {
        /// Step to fail on purpose (scrape, analyze or report).
        #[arg(long)]
        fail_at: Option<String>,

        /// URL placed in the initial context.
        #[arg(long, default_value = "https://example.com")]
        url: String,
    },

    /// Three parallel roots feeding an aggregation step.
    FanIn {
        /// Duration of the slowest root.
        #[arg(long, default_value_t = 300)]
        slow_ms: u64,
    },
}

impl DemoCommand {
    pub async fn execute(self) -> Result<()> {
        let mut config = load_config(&self.config, false)?;
        config.store = StoreConfig::default();
        logging::init(&config.logging)?;

        let weft = Weft::builder().config(config).build().await?;
        let instance = self.run(&weft).await?;

        println!("{}", serde_json::to_string_pretty(&instance)?);
        Ok(())
    }

    async fn run(&self, weft: &Weft) -> Result<WorkflowInstance> {
        let (definition, context) = match &self.workflow {
            DemoWorkflow::Pipeline { fail_at, url } => (
                demo::pipeline(fail_at.as_deref(), weft.default_retry_policy())?,
                demo::pipeline_context(url)?,
            ),
            DemoWorkflow::FanIn { slow_ms } => (
                demo::fan_in(Duration::from_millis(*slow_ms))?,
                WorkflowContext::new(),
            ),
        };

        tracing::info!(
            workflow = definition.name(),
            steps = definition.step_count(),
            "Running demo workflow"
        );
        Ok(weft.service().start(&definition, context).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::WorkflowStatus;

    fn command(workflow: DemoWorkflow) -> DemoCommand {
        DemoCommand {
            config: "weft.toml".into(),
            workflow,
        }
    }

    #[tokio::test]
    async fn test_pipeline_demo_with_forced_failure() {
        let weft = Weft::builder().build().await.unwrap();
        let cmd = command(DemoWorkflow::Pipeline {
            fail_at: Some("analyze".into()),
            url: "https://example.com".into(),
        });

        let instance = cmd.run(&weft).await.unwrap();

        assert_eq!(instance.status(), WorkflowStatus::Compensated);
        let json = serde_json::to_value(&instance).unwrap();
        assert_eq!(json["workflow_name"], "content_pipeline");
    }

    #[tokio::test]
    async fn test_fan_in_demo_completes() {
        let weft = Weft::builder().build().await.unwrap();
        let cmd = command(DemoWorkflow::FanIn { slow_ms: 20 });

        let instance = cmd.run(&weft).await.unwrap();

        assert_eq!(instance.status(), WorkflowStatus::Completed);
        assert_eq!(instance.context().get::<u64>("total").unwrap(), Some(35));
    }

    #[tokio::test]
    async fn test_unknown_fail_step_is_an_error() {
        let weft = Weft::builder().build().await.unwrap();
        let cmd = command(DemoWorkflow::Pipeline {
            fail_at: Some("deploy".into()),
            url: "https://example.com".into(),
        });

        assert!(cmd.run(&weft).await.is_err());
    }
}
