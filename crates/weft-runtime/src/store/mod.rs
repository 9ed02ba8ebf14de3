//! Instance store implementations.

mod memory;
mod postgres;

pub use memory::InMemoryInstanceStore;
pub use postgres::PgInstanceStore;

use std::sync::Arc;

use weft_core::config::{StoreBackend, StoreConfig};
use weft_core::{InstanceStore, Result, WeftError};

/// Build the store selected by configuration. The postgres schema is
/// created if missing.
pub async fn connect(config: &StoreConfig) -> Result<Arc<dyn InstanceStore>> {
    match config.backend {
        StoreBackend::Memory => Ok(Arc::new(InMemoryInstanceStore::new())),
        StoreBackend::Postgres => {
            let url = config
                .url
                .as_deref()
                .ok_or_else(|| WeftError::Config("store.url is required for postgres".into()))?;
            let store = PgInstanceStore::connect(url, config.pool_size).await?;
            store.migrate().await?;
            Ok(Arc::new(store))
        }
    }
}
