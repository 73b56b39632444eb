//! Cross-instance relay
//!
//! A relay carries [`RelayEnvelope`]s between broker instances. Every instance
//! publishes what it produced and listens for everything; the broker drops
//! envelopes stamped with its own origin so local subscribers see each event
//! exactly once.

use std::sync::Arc;

use async_trait::async_trait;
use deadpool_redis::{Config as PoolConfig, Pool, Runtime};
use futures::stream::{BoxStream, StreamExt};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use super::BroadcastEvent;
use crate::config::{RelayBackend, RelayConfig};

/// Broadcast tagged with the instance that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayEnvelope {
    pub origin: Uuid,
    pub event: BroadcastEvent,
}

/// Incoming envelopes from every instance, including this one
pub type RelayStream = BoxStream<'static, RelayEnvelope>;

/// Relay errors
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Redis pool error: {0}")]
    Pool(String),

    #[error("Envelope encoding error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Pub/sub transport shared by all broker instances
#[async_trait]
pub trait Relay: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    async fn publish(&self, envelope: &RelayEnvelope) -> Result<(), RelayError>;

    async fn subscribe(&self) -> Result<RelayStream, RelayError>;
}

// ============================================================================
// In-process relay
// ============================================================================

/// Relay over a tokio broadcast channel
///
/// Cloning shares the channel, so brokers built from clones of one
/// `LocalRelay` behave like instances sharing a Redis channel.
#[derive(Clone)]
pub struct LocalRelay {
    tx: broadcast::Sender<RelayEnvelope>,
}

impl LocalRelay {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }
}

impl Default for LocalRelay {
    fn default() -> Self {
        Self::new(RelayConfig::default().memory_capacity)
    }
}

#[async_trait]
impl Relay for LocalRelay {
    fn name(&self) -> &str {
        "memory"
    }

    async fn publish(&self, envelope: &RelayEnvelope) -> Result<(), RelayError> {
        // No listeners is not an error; there is simply nobody to reach.
        let _ = self.tx.send(envelope.clone());
        Ok(())
    }

    async fn subscribe(&self) -> Result<RelayStream, RelayError> {
        let stream = BroadcastStream::new(self.tx.subscribe()).filter_map(|item| async move {
            match item {
                Ok(envelope) => Some(envelope),
                Err(e) => {
                    tracing::warn!(error = %e, "Local relay listener lagged");
                    None
                }
            }
        });
        Ok(stream.boxed())
    }
}

// ============================================================================
// Redis relay
// ============================================================================

/// Relay over a Redis pub/sub channel
pub struct RedisRelay {
    /// Pooled connections for PUBLISH
    pool: Pool,
    /// Dedicated client for SUBSCRIBE connections
    client: redis::Client,
    channel: String,
}

impl RedisRelay {
    /// Connect and verify the server answers PING
    pub async fn connect(config: &RelayConfig) -> Result<Self, RelayError> {
        let pool = PoolConfig::from_url(&config.redis_url)
            .builder()
            .map_err(|e| RelayError::Pool(format!("Failed to create pool builder: {e}")))?
            .max_size(config.pool_size)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| RelayError::Pool(format!("Failed to create Redis pool: {e}")))?;

        let mut conn = pool
            .get()
            .await
            .map_err(|e| RelayError::Pool(e.to_string()))?;

        let _: String = redis::cmd("PING").query_async(&mut *conn).await?;

        let client = redis::Client::open(config.redis_url.as_str())?;

        tracing::info!(url = %config.redis_url, channel = %config.channel, "Connected Redis relay");

        Ok(Self {
            pool,
            client,
            channel: config.channel.clone(),
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

#[async_trait]
impl Relay for RedisRelay {
    fn name(&self) -> &str {
        "redis"
    }

    async fn publish(&self, envelope: &RelayEnvelope) -> Result<(), RelayError> {
        let payload = serde_json::to_string(envelope)?;
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| RelayError::Pool(e.to_string()))?;

        let receivers: i64 = conn.publish(&self.channel, payload).await?;
        tracing::trace!(channel = %self.channel, receivers, "Relayed broadcast");
        Ok(())
    }

    async fn subscribe(&self) -> Result<RelayStream, RelayError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(&self.channel).await?;

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let payload: String = match msg.get_payload() {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!(error = %e, "Unreadable relay message");
                    return None;
                }
            };

            match serde_json::from_str::<RelayEnvelope>(&payload) {
                Ok(envelope) => Some(envelope),
                Err(e) => {
                    tracing::warn!(error = %e, "Discarding malformed relay envelope");
                    None
                }
            }
        });

        Ok(stream.boxed())
    }
}

/// Build the relay selected by configuration
pub async fn connect(config: &RelayConfig) -> Result<Arc<dyn Relay>, RelayError> {
    match config.backend {
        RelayBackend::Memory => Ok(Arc::new(LocalRelay::new(config.memory_capacity))),
        RelayBackend::Redis => Ok(Arc::new(RedisRelay::connect(config).await?)),
    }
}
