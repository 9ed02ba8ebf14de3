//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;
use weft_core::config::LoggingConfig;
use weft_core::error::{Result, WeftError};

/// Filter from `RUST_LOG` when set, otherwise from the configured level.
pub fn env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.trim().is_empty() => EnvFilter::try_new(directives)
            .map_err(|e| WeftError::Config(format!("Invalid RUST_LOG filter: {}", e))),
        _ => EnvFilter::try_new(&config.level)
            .map_err(|e| WeftError::Config(format!("Invalid logging.level '{}': {}", config.level, e))),
    }
}

/// Install the global subscriber. Plain text unless `json_format` is set.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = env_filter(config)?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let installed = if config.json_format {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| WeftError::Internal(format!("Failed to install subscriber: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_directives_parse() {
        let config = LoggingConfig {
            level: "weft_runtime=debug,info".into(),
            json_format: false,
        };
        if std::env::var(EnvFilter::DEFAULT_ENV).is_err() {
            assert!(env_filter(&config).is_ok());
        }
    }

    #[test]
    fn test_bad_level_is_config_error() {
        let config = LoggingConfig {
            level: "weft=loud".into(),
            json_format: false,
        };
        if std::env::var(EnvFilter::DEFAULT_ENV).is_err() {
            assert!(matches!(env_filter(&config), Err(WeftError::Config(_))));
        }
    }
}
