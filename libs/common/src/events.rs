//! Lab-scoped push notifications over Redis pub/sub
//!
//! Every mutation that changes what a lab looks like is published on the
//! channel `lab:{id}:events`. Subscribers treat these messages as hints to
//! refresh; polling remains the source of record.

use anyhow::Result;
use redis::{AsyncCommands, Client};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Configuration for Redis connection
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    pub url: String,
}

impl RedisConfig {
    /// Create a new RedisConfig from environment variables
    ///
    /// # Environment Variables
    /// - `REDIS_URL`: Redis connection URL (default: "redis://localhost:6379")
    pub fn from_env() -> Result<Self> {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());

        Ok(RedisConfig { url })
    }
}

/// Name of the pub/sub channel carrying a lab's events
pub fn lab_channel(lab_id: i32) -> String {
    format!("lab:{}:events", lab_id)
}

/// Publishes lab events to Redis
#[derive(Clone)]
pub struct LabEventPublisher {
    client: Client,
}

impl LabEventPublisher {
    pub fn new(config: &RedisConfig) -> Result<Self> {
        let client = Client::open(config.url.clone())?;
        info!("Redis client initialized with URL: {}", config.url);
        Ok(LabEventPublisher { client })
    }

    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        let conn = self.client.get_multiplexed_async_connection().await?;
        Ok(conn)
    }

    /// Publish an event, returning the number of subscribers that received it
    pub async fn publish<E: Serialize>(&self, lab_id: i32, event: &E) -> Result<u64> {
        let payload = serde_json::to_string(event)?;
        let mut conn = self.get_connection().await?;
        let receivers: u64 = conn.publish(lab_channel(lab_id), payload).await?;
        debug!("Lab {} event delivered to {} subscribers", lab_id, receivers);
        Ok(receivers)
    }

    /// Publish without surfacing failures to the caller
    pub async fn publish_quietly<E: Serialize>(&self, lab_id: i32, event: &E) {
        if let Err(e) = self.publish(lab_id, event).await {
            warn!("Failed to publish lab {} event: {}", lab_id, e);
        }
    }

    /// Check if Redis is reachable
    pub async fn health_check(&self) -> Result<bool> {
        let mut conn = self.get_connection().await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(pong == "PONG")
    }
}
