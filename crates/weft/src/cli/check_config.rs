use anyhow::Result;
use clap::Parser;

use super::load_config;

/// Load and validate a configuration file.
#[derive(Parser)]
pub struct CheckConfigCommand {
    /// Configuration file path.
    #[arg(short, long, default_value = "weft.toml")]
    pub config: String,
}

impl CheckConfigCommand {
    pub fn execute(self) -> Result<()> {
        let config = load_config(&self.config, true)?;
        config.validate()?;

        println!("{}: ok", self.config);
        println!(
            "  store: {:?}, max concurrent steps: {}, default step timeout: {}s",
            config.store.backend,
            config.engine.max_concurrent_steps,
            config.engine.default_step_timeout_secs
        );
        Ok(())
    }
}
