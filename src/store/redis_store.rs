use crate::core::config::RedisConfig;
use crate::core::error::{RateError, Result};
use crate::core::store::RateStore;
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::future::Future;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Rate store backed by a Redis logical database.
///
/// Codes are plain string keys and rates are decimal strings without expiry.
/// The connection is opened on first use and every call is bounded by
/// `timeout`, so an unreachable server surfaces as `StoreUnavailable`.
#[derive(Clone)]
pub struct RedisRateStore {
    client: redis::Client,
    conn: std::sync::Arc<OnceCell<ConnectionManager>>,
    timeout: Duration,
}

impl RedisRateStore {
    /// Creates the store handle without touching the network.
    pub fn new(config: &RedisConfig) -> Result<Self> {
        let client = redis::Client::open(config.url()).map_err(store_error)?;
        Ok(Self {
            client,
            conn: Default::default(),
            timeout: Duration::from_millis(config.timeout_ms),
        })
    }

    /// Creates the store and tries to connect once. A failed attempt is
    /// logged and retried by the next store call.
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let store = Self::new(config)?;
        match store.connection().await {
            Ok(_) => info!(
                host = %config.host,
                port = config.port,
                db = config.db,
                "Connected to Redis"
            ),
            Err(e) => warn!(error = %e, url = %config.url(), "Redis not reachable yet"),
        }
        Ok(store)
    }

    async fn connection(&self) -> Result<ConnectionManager> {
        let conn = self
            .bounded(
                "connect",
                self.conn.get_or_try_init(|| async {
                    ConnectionManager::new(self.client.clone())
                        .await
                        .map_err(store_error)
                }),
            )
            .await??;
        Ok(conn.clone())
    }

    async fn bounded<T>(&self, op: &str, fut: impl Future<Output = T>) -> Result<T> {
        tokio::time::timeout(self.timeout, fut).await.map_err(|_| {
            RateError::StoreUnavailable(format!("Redis {op} timed out after {:?}", self.timeout))
        })
    }
}

fn store_error(err: redis::RedisError) -> RateError {
    RateError::StoreUnavailable(err.to_string())
}

fn decode_rate(code: &str, raw: &str) -> Result<f64> {
    raw.trim().parse::<f64>().map_err(|_| {
        RateError::StoreUnavailable(format!("Non-numeric value stored for {code}: {raw:?}"))
    })
}

#[async_trait]
impl RateStore for RedisRateStore {
    async fn set(&self, code: &str, value: f64) -> Result<()> {
        let mut conn = self.connection().await?;
        self.bounded("SET", conn.set::<_, _, ()>(code, value.to_string()))
            .await?
            .map_err(store_error)?;
        debug!("Redis SET for key: {code}");
        Ok(())
    }

    async fn get(&self, code: &str) -> Result<Option<f64>> {
        let mut conn = self.connection().await?;
        let raw = self
            .bounded("GET", conn.get::<_, Option<String>>(code))
            .await?
            .map_err(store_error)?;
        raw.map(|value| decode_rate(code, &value)).transpose()
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        let mut conn = self.connection().await?;
        self.bounded("KEYS", conn.keys::<_, Vec<String>>("*"))
            .await?
            .map_err(store_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_rate() {
        assert_eq!(decode_rate("USD", "90.25").unwrap(), 90.25);
        assert_eq!(decode_rate("RUB", "1").unwrap(), 1.0);
    }

    #[test]
    fn test_decode_rate_rejects_garbage() {
        let err = decode_rate("USD", "ninety").unwrap_err();
        assert!(matches!(err, RateError::StoreUnavailable(_)));
    }

    fn unreachable_config() -> RedisConfig {
        RedisConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            db: 0,
            timeout_ms: 200,
        }
    }

    #[tokio::test]
    async fn test_unreachable_server_is_store_unavailable() {
        let store = tokio::time::timeout(
            Duration::from_secs(5),
            RedisRateStore::connect(&unreachable_config()),
        )
        .await
        .expect("connect must not hang")
        .expect("handle is created even when the server is down");

        let result = tokio::time::timeout(Duration::from_secs(5), store.get("USD"))
            .await
            .expect("read must not hang");
        assert!(matches!(result, Err(RateError::StoreUnavailable(_))));

        let result = tokio::time::timeout(Duration::from_secs(5), store.set("USD", 90.0))
            .await
            .expect("write must not hang");
        assert!(matches!(result, Err(RateError::StoreUnavailable(_))));
    }
}
