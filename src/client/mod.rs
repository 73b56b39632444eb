//! Realtime subscription client
//!
//! Keeps one server-sent-event connection per view open against
//! `GET /api/realtime`, translates each message into query-cache
//! invalidations, and reconnects with exponential backoff when the stream
//! drops.
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use shiftboard::client::{ClientConfig, LoggingCache, SubscriptionManager};
//!
//! let config = ClientConfig::new("http://localhost:8080").for_event("lan-2025");
//! let mut manager = SubscriptionManager::new(config, Arc::new(LoggingCache))?;
//! manager.run_until(tokio::signal::ctrl_c().map(|_| ())).await?;
//! ```

pub mod backoff;
pub mod cache;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::Client;
use tokio::sync::watch;
use url::Url;

use crate::realtime::Scope;

pub use backoff::{BackoffConfig, ReconnectBackoff};
pub use cache::{
    invalidations_for, ClientMessage, LoggingCache, QueryCache, QueryKey, RecordingCache,
};

// ============================================================================
// Client Configuration
// ============================================================================

/// Configuration for a subscription
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server base URL
    pub base_url: String,

    /// Event slug or everything
    pub scope: Scope,

    /// TCP/TLS connect timeout; the stream itself has no timeout
    pub connect_timeout: Duration,

    pub backoff: BackoffConfig,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            scope: Scope::All,
            connect_timeout: Duration::from_secs(10),
            backoff: BackoffConfig::default(),
        }
    }

    /// Scope the subscription to one event
    pub fn for_event(mut self, slug: impl Into<String>) -> Self {
        self.scope = Scope::Event(slug.into());
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn view_slug(&self) -> Option<&str> {
        match &self.scope {
            Scope::All => None,
            Scope::Event(slug) => Some(slug),
        }
    }

    /// Stream endpoint for this scope
    pub fn stream_url(&self) -> Result<Url, ClientError> {
        let base = Url::parse(&self.base_url)
            .map_err(|e| ClientError::InvalidUrl(format!("{}: {e}", self.base_url)))?;
        let mut url = base
            .join("/api/realtime")
            .map_err(|e| ClientError::InvalidUrl(e.to_string()))?;

        if let Some(slug) = self.view_slug() {
            url.query_pairs_mut().append_pair("event", slug);
        }
        Ok(url)
    }
}

/// Connection lifecycle, observable through [`SubscriptionManager::state`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Reconnecting { attempt: u32, delay: Duration },
    Closed,
}

// ============================================================================
// Subscription Manager
// ============================================================================

/// One streaming connection feeding a query cache
pub struct SubscriptionManager {
    config: ClientConfig,
    http_client: Client,
    cache: Arc<dyn QueryCache>,
    backoff: ReconnectBackoff,
    state: watch::Sender<ConnectionState>,
    opened_before: bool,
}

impl SubscriptionManager {
    pub fn new(config: ClientConfig, cache: Arc<dyn QueryCache>) -> Result<Self, ClientError> {
        let http_client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| ClientError::InitError(e.to_string()))?;

        let (state, _) = watch::channel(ConnectionState::Closed);
        let backoff = ReconnectBackoff::new(config.backoff.clone());

        Ok(Self {
            config,
            http_client,
            cache,
            backoff,
            state,
            opened_before: false,
        })
    }

    /// Watch connection state changes
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    /// Connect and keep reconnecting until the attempt ceiling is reached
    pub async fn run(&mut self) -> Result<(), ClientError> {
        let url = self.config.stream_url()?;

        loop {
            self.set_state(ConnectionState::Connecting);

            match self.open(&url).await {
                Ok(response) => {
                    self.backoff.reset();
                    self.set_state(ConnectionState::Open);
                    tracing::info!(url = %url, "Realtime stream open");

                    if self.opened_before {
                        self.invalidate_view();
                    }
                    self.opened_before = true;

                    match self.consume(response).await {
                        Ok(()) => tracing::info!("Realtime stream closed by server"),
                        Err(e) => tracing::warn!(error = %e, "Realtime stream failed"),
                    }
                }
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "Failed to open realtime stream");
                }
            }

            let Some(delay) = self.backoff.next_delay() else {
                self.set_state(ConnectionState::Closed);
                return Err(ClientError::RetriesExhausted {
                    attempts: self.backoff.attempts(),
                });
            };

            let attempt = self.backoff.attempts();
            tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting");
            self.set_state(ConnectionState::Reconnecting { attempt, delay });
            tokio::time::sleep(delay).await;
        }
    }

    /// Run until `shutdown` resolves
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<(), ClientError>
    where
        F: Future<Output = ()>,
    {
        let result = tokio::select! {
            result = self.run() => result,
            _ = shutdown => Ok(()),
        };
        self.set_state(ConnectionState::Closed);
        result
    }

    async fn open(&self, url: &Url) -> Result<reqwest::Response, ClientError> {
        let response = self
            .http_client
            .get(url.clone())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| ClientError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ClientError::HttpError {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }

    async fn consume(&self, response: reqwest::Response) -> Result<(), ClientError> {
        let mut events = response.bytes_stream().eventsource();

        while let Some(event) = events.next().await {
            let event = event.map_err(|e| ClientError::StreamError(e.to_string()))?;
            if event.data.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<ClientMessage>(&event.data) {
                Ok(message) => self.apply(&message),
                Err(e) => {
                    tracing::debug!(error = %e, data = %event.data, "Skipping undecodable message");
                }
            }
        }
        Ok(())
    }

    /// Invalidate the queries `message` affects
    pub fn apply(&self, message: &ClientMessage) {
        for key in invalidations_for(message, self.config.view_slug()) {
            self.cache.invalidate(&key);
        }
    }

    /// Messages may have been missed while disconnected
    fn invalidate_view(&self) {
        if let Some(slug) = self.config.view_slug() {
            self.cache.invalidate(&QueryKey::Grid {
                slug: slug.to_string(),
            });
            self.cache.invalidate(&QueryKey::EventMeta {
                slug: slug.to_string(),
            });
        }
        self.cache.invalidate(&QueryKey::UnreadNotifications);
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Subscription client errors
#[derive(Debug)]
pub enum ClientError {
    /// Initialization error
    InitError(String),

    /// Base URL could not be turned into a stream URL
    InvalidUrl(String),

    /// Network error
    NetworkError(String),

    /// HTTP error
    HttpError { status: u16, message: String },

    /// Stream broke mid-read
    StreamError(String),

    /// Gave up reconnecting
    RetriesExhausted { attempts: u32 },
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InitError(msg) => write!(f, "Initialization error: {msg}"),
            Self::InvalidUrl(msg) => write!(f, "Invalid URL: {msg}"),
            Self::NetworkError(msg) => write!(f, "Network error: {msg}"),
            Self::HttpError { status, message } => {
                write!(f, "HTTP error ({status}): {message}")
            }
            Self::StreamError(msg) => write!(f, "Stream error: {msg}"),
            Self::RetriesExhausted { attempts } => {
                write!(f, "Gave up after {attempts} reconnect attempts")
            }
        }
    }
}

impl std::error::Error for ClientError {}

// ============================================================================
// Tests
// ============================================================================
