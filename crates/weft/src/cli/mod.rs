mod check_config;
mod demo;

pub use check_config::CheckConfigCommand;
pub use demo::DemoCommand;

use std::path::Path;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use weft_core::config::WeftConfig;

/// weft - workflow orchestration engine
#[derive(Parser)]
#[command(name = "weft")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Load and validate a configuration file.
    CheckConfig(CheckConfigCommand),

    /// Run a sample workflow against the in-memory store.
    Demo(DemoCommand),
}

impl Cli {
    /// Execute the CLI command.
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::CheckConfig(cmd) => cmd.execute(),
            Commands::Demo(cmd) => cmd.execute().await,
        }
    }
}

/// Load the configuration file, falling back to defaults when an optional
/// path does not exist.
pub(crate) fn load_config(path: &str, required: bool) -> Result<WeftConfig> {
    if !Path::new(path).exists() {
        if required {
            anyhow::bail!("Configuration file not found: {}", path);
        }
        return Ok(WeftConfig::default());
    }

    WeftConfig::from_file(path).with_context(|| format!("Failed to load {}", path))
}
