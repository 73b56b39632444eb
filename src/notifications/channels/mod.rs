//! Outbound webhook channel
//!
//! Delivery is split in two: a [`PayloadFormatter`] turns a
//! [`WebhookPayload`](crate::notifications::WebhookPayload) into the bytes and
//! headers one receiver family expects, and [`webhook::WebhookChannel`] POSTs
//! the result.

pub mod formatter;
pub mod webhook;

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::models::{WebhookConfig, WebhookFormat};
use crate::notifications::WebhookPayload;

pub use formatter::{sign_payload, ChatEmbedFormatter, SignedJsonFormatter};

/// Result type for channel operations
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Errors that can occur during channel operations
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Invalid channel configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Receiver answered with a non-success status
    #[error("Receiver rejected delivery: HTTP {status}")]
    Rejected { status: u16 },

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Outcome of a single delivery attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryStatus {
    /// Whether the receiver accepted the delivery
    pub success: bool,
    /// Webhook configuration the attempt was made for
    pub webhook_id: Uuid,
    /// HTTP status returned, if the request got that far
    pub status_code: Option<u16>,
    pub message: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl DeliveryStatus {
    pub fn success(webhook_id: Uuid, status_code: u16) -> Self {
        Self {
            success: true,
            webhook_id,
            status_code: Some(status_code),
            message: None,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn failure(webhook_id: Uuid, error: &ChannelError) -> Self {
        let status_code = match error {
            ChannelError::Rejected { status } => Some(*status),
            _ => None,
        };
        Self {
            success: false,
            webhook_id,
            status_code,
            message: Some(error.to_string()),
            timestamp: chrono::Utc::now(),
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.success { "SUCCESS" } else { "FAILED" };
        write!(f, "[{status}] {}", self.webhook_id)?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

/// Request body and extra headers ready to POST
#[derive(Debug, Clone)]
pub struct RenderedRequest {
    pub body: Vec<u8>,
    pub headers: Vec<(&'static str, String)>,
}

/// Renders a payload in the shape one receiver family expects
///
/// Implement this to support another receiver format.
pub trait PayloadFormatter: Send + Sync {
    /// Format name for logs and metrics
    fn name(&self) -> &'static str;

    fn render(
        &self,
        payload: &WebhookPayload,
        config: &WebhookConfig,
    ) -> ChannelResult<RenderedRequest>;
}

/// Formatter registered for a configuration's format
pub fn formatter_for(format: WebhookFormat) -> &'static dyn PayloadFormatter {
    match format {
        WebhookFormat::Default => &SignedJsonFormatter,
        WebhookFormat::ChatEmbed => &ChatEmbedFormatter,
    }
}
