//! Rate store abstraction over an external key-value cache

use super::error::Result;
use async_trait::async_trait;

/// Latest rate per currency code. Last write wins, no expiry.
#[async_trait]
pub trait RateStore: Send + Sync {
    async fn set(&self, code: &str, value: f64) -> Result<()>;

    async fn get(&self, code: &str) -> Result<Option<f64>>;

    /// Every code currently held by the store, in no particular order.
    async fn list_keys(&self) -> Result<Vec<String>>;
}
