pub mod memory;
pub mod redis_store;

use crate::core::config::AppConfig;
use crate::core::store::RateStore;
use anyhow::{Context, Result};
use memory::MemoryRateStore;
use std::sync::Arc;
use tracing::info;

/// Opens the process-wide rate store handle. An unreachable Redis does not
/// fail here; store calls report it as `StoreUnavailable`.
pub async fn open_store(config: &AppConfig, in_memory: bool) -> Result<Arc<dyn RateStore>> {
    if in_memory {
        info!("Using in-memory rate store");
        return Ok(Arc::new(MemoryRateStore::new()));
    }

    let store = redis_store::RedisRateStore::connect(&config.redis)
        .await
        .with_context(|| format!("Invalid rate store address {}", config.redis.url()))?;
    Ok(Arc::new(store))
}
