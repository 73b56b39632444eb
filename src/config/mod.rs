//! Configuration management for shiftboard
//!
//! Configuration is layered: defaults, then an optional TOML file, then
//! `SHIFTBOARD_*` environment variables, then command-line flags applied by
//! the binary.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

use crate::client::BackoffConfig;
use crate::server::ServerConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,

    /// Realtime broker configuration
    pub broker: BrokerConfig,

    /// Notification and webhook dispatcher configuration
    pub dispatcher: DispatcherConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Realtime broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Per-subscriber buffer; the oldest buffered event is dropped on overflow
    pub subscriber_buffer: usize,

    /// Identity used to suppress relay echoes (random when unset)
    pub instance_id: Option<Uuid>,

    /// Cross-instance relay
    pub relay: RelayConfig,

    /// Envelopes waiting for the relay; overflow is dropped and counted
    pub relay_queue: usize,

    /// Delays between attempts to re-subscribe after the relay stream ends
    pub resubscribe: BackoffConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: 64,
            instance_id: None,
            relay: RelayConfig::default(),
            relay_queue: 1024,
            // Keeps retrying at the cap once the attempts run out
            resubscribe: BackoffConfig::with_delays(500, 30_000, 10),
        }
    }
}

/// Relay backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayBackend {
    /// Process-local relay, suitable for a single instance
    #[default]
    Memory,
    /// Redis pub/sub, shared by every instance pointed at the same channel
    Redis,
}

impl std::str::FromStr for RelayBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            other => anyhow::bail!("Unknown relay backend '{other}' (expected memory or redis)"),
        }
    }
}

/// Relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub backend: RelayBackend,

    /// Redis connection URL
    pub redis_url: String,

    /// Pub/sub channel name
    pub channel: String,

    /// Maximum pooled publish connections
    pub pool_size: usize,

    /// Capacity of the in-process relay channel
    pub memory_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            backend: RelayBackend::Memory,
            redis_url: String::from("redis://localhost:6379"),
            channel: String::from("shiftboard:realtime"),
            pool_size: 8,
            memory_capacity: 1024,
        }
    }
}

/// Dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Jobs waiting beyond this are dropped with a warning
    pub queue_capacity: usize,

    /// Jobs fanned out at once; further jobs wait in the queue
    pub max_in_flight: usize,

    /// Per-request webhook timeout in milliseconds
    pub webhook_timeout_ms: u64,

    /// How long a draining shutdown waits for in-flight jobs
    pub shutdown_grace_secs: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            max_in_flight: 32,
            webhook_timeout_ms: 5_000,
            shutdown_grace_secs: 10,
        }
    }
}

impl DispatcherConfig {
    #[must_use]
    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_millis(self.webhook_timeout_ms)
    }

    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse::<T>().ok())
}

impl Config {
    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Load configuration from a TOML file; missing sections take their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load from `path` when given, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Override fields from `SHIFTBOARD_*` environment variables
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("SHIFTBOARD_BIND") {
            self.server.bind_address = addr
                .parse()
                .with_context(|| format!("Invalid SHIFTBOARD_BIND address: {addr}"))?;
        }

        if let Some(buffer) = env_parse("SHIFTBOARD_SUBSCRIBER_BUFFER") {
            self.broker.subscriber_buffer = buffer;
        }

        if let Some(instance_id) = env_parse("SHIFTBOARD_INSTANCE_ID") {
            self.broker.instance_id = Some(instance_id);
        }

        if let Ok(backend) = std::env::var("SHIFTBOARD_RELAY") {
            self.broker.relay.backend = backend.parse()?;
        }

        if let Ok(url) = std::env::var("REDIS_URL") {
            self.broker.relay.redis_url = url;
        }

        if let Ok(channel) = std::env::var("SHIFTBOARD_RELAY_CHANNEL") {
            self.broker.relay.channel = channel;
        }

        if let Some(capacity) = env_parse("SHIFTBOARD_QUEUE_CAPACITY") {
            self.dispatcher.queue_capacity = capacity;
        }

        if let Some(in_flight) = env_parse("SHIFTBOARD_MAX_IN_FLIGHT") {
            self.dispatcher.max_in_flight = in_flight;
        }

        if let Some(timeout) = env_parse("SHIFTBOARD_WEBHOOK_TIMEOUT_MS") {
            self.dispatcher.webhook_timeout_ms = timeout;
        }

        if let Ok(level) = std::env::var("SHIFTBOARD_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(format) = std::env::var("SHIFTBOARD_LOG_FORMAT") {
            self.logging.format = format;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.server.validate()?;

        if self.broker.subscriber_buffer == 0 {
            anyhow::bail!("subscriber_buffer must be greater than 0");
        }

        if self.broker.relay_queue == 0 {
            anyhow::bail!("relay_queue must be greater than 0");
        }

        if self.broker.relay.backend == RelayBackend::Redis {
            url::Url::parse(&self.broker.relay.redis_url)
                .with_context(|| format!("Invalid redis_url: {}", self.broker.relay.redis_url))?;
            if self.broker.relay.pool_size == 0 {
                anyhow::bail!("relay pool_size must be greater than 0");
            }
        }

        if self.broker.relay.channel.trim().is_empty() {
            anyhow::bail!("relay channel must not be empty");
        }

        if self.dispatcher.queue_capacity == 0 {
            anyhow::bail!("queue_capacity must be greater than 0");
        }

        if self.dispatcher.max_in_flight == 0 {
            anyhow::bail!("max_in_flight must be greater than 0");
        }

        if self.dispatcher.webhook_timeout_ms == 0 {
            anyhow::bail!("webhook_timeout_ms must be greater than 0");
        }

        if !matches!(self.logging.format.as_str(), "text" | "json" | "pretty") {
            anyhow::bail!("log format must be one of text, json, pretty");
        }

        Ok(())
    }
}
