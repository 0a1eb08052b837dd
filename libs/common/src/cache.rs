//! Redis connectivity for snapshot fan-out
//!
//! Thin wrapper over a Redis client exposing the publish/subscribe
//! primitives the session broadcast is built on.

use futures::StreamExt;
use futures::stream::BoxStream;
use redis::{AsyncCommands, Client};
use tracing::{info, warn};

use crate::error::{CacheError, CacheResult};

/// Configuration for Redis connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    pub url: String,
}

impl RedisConfig {
    /// Create a new RedisConfig from environment variables
    ///
    /// # Environment Variables
    /// - `REDIS_URL`: Redis connection URL (default: "redis://localhost:6379")
    pub fn from_env() -> CacheResult<Self> {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        if !url.starts_with("redis://") && !url.starts_with("rediss://") {
            return Err(CacheError::Configuration(format!(
                "REDIS_URL must use the redis:// or rediss:// scheme, got {url}"
            )));
        }
        Ok(RedisConfig { url })
    }
}

/// Shared Redis client; cheap to clone
#[derive(Debug, Clone)]
pub struct RedisPool {
    client: Client,
}

impl RedisPool {
    pub async fn new(config: &RedisConfig) -> CacheResult<Self> {
        let client = Client::open(config.url.clone()).map_err(CacheError::Connection)?;
        info!("Redis client initialized with URL: {}", config.url);
        Ok(RedisPool { client })
    }

    async fn get_connection(&self) -> CacheResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(CacheError::Connection)
    }

    /// Publishes `payload` on `channel`, returning how many subscribers got it
    pub async fn publish(&self, channel: &str, payload: &str) -> CacheResult<u64> {
        let mut conn = self.get_connection().await?;
        let receivers: u64 = conn
            .publish(channel, payload)
            .await
            .map_err(CacheError::Command)?;
        Ok(receivers)
    }

    /// Subscribes to `channel` on a dedicated connection.
    ///
    /// The stream yields message payloads and ends when the connection drops.
    pub async fn subscribe(&self, channel: &str) -> CacheResult<BoxStream<'static, String>> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(CacheError::Connection)?;
        pubsub.subscribe(channel).await.map_err(CacheError::Command)?;

        let channel = channel.to_string();
        let payloads = pubsub.into_on_message().filter_map(move |msg| {
            let payload = msg.get_payload::<String>();
            let channel = channel.clone();
            async move {
                match payload {
                    Ok(payload) => Some(payload),
                    Err(e) => {
                        warn!(%channel, "dropping non-text message: {}", e);
                        None
                    }
                }
            }
        });
        Ok(payloads.boxed())
    }

    /// Check if Redis is reachable
    pub async fn health_check(&self) -> CacheResult<bool> {
        let mut conn = self.get_connection().await?;
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(CacheError::Command)?;
        Ok(pong == "PONG")
    }
}
