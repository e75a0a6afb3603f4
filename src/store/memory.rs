use crate::core::error::Result;
use crate::core::store::RateStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// In-process rate store for tests and local runs without Redis
#[derive(Clone, Default)]
pub struct MemoryRateStore {
    inner: Arc<Mutex<HashMap<String, f64>>>,
}

impl MemoryRateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-filled with the given rates
    pub fn with_rates<'a, I>(rates: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        let map = rates
            .into_iter()
            .map(|(code, value)| (code.to_string(), value))
            .collect();
        Self {
            inner: Arc::new(Mutex::new(map)),
        }
    }
}

#[async_trait]
impl RateStore for MemoryRateStore {
    async fn set(&self, code: &str, value: f64) -> Result<()> {
        let mut rates = self.inner.lock().await;
        debug!("Store SET for key: {code}");
        rates.insert(code.to_string(), value);
        Ok(())
    }

    async fn get(&self, code: &str) -> Result<Option<f64>> {
        let rates = self.inner.lock().await;
        let value = rates.get(code).copied();
        if value.is_some() {
            debug!("Store HIT for key: {code}");
        } else {
            debug!("Store MISS for key: {code}");
        }
        Ok(value)
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        let rates = self.inner.lock().await;
        Ok(rates.keys().cloned().collect())
    }
}
