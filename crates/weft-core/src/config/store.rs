use serde::{Deserialize, Serialize};

use crate::error::{Result, WeftError};

/// Where workflow instances are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local map. Lost on restart.
    #[default]
    Memory,
    Postgres,
}

/// Instance store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Connection URL, required for the postgres backend.
    #[serde(default)]
    pub url: Option<String>,

    /// Connection pool size.
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: None,
            pool_size: default_pool_size(),
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> Result<()> {
        if self.backend == StoreBackend::Postgres
            && self.url.as_deref().map_or(true, |u| u.trim().is_empty())
        {
            return Err(WeftError::Config(
                "store.url is required for the postgres backend".into(),
            ));
        }
        if self.pool_size == 0 {
            return Err(WeftError::Config(
                "store.pool_size must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

fn default_pool_size() -> u32 {
    10
}
