//! Webhook delivery over HTTP POST

use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::time::{Duration, Instant};

use super::{formatter_for, ChannelError, ChannelResult, DeliveryStatus};
use crate::metrics;
use crate::models::WebhookConfig;
use crate::notifications::WebhookPayload;

/// Header identifying the configuration a delivery belongs to
pub const WEBHOOK_ID_HEADER: &str = "X-Webhook-ID";

/// Posts formatted payloads to configured receivers
///
/// Each delivery is a single attempt bounded by the client timeout. Failed
/// deliveries are reported and never retried.
#[derive(Clone)]
pub struct WebhookChannel {
    client: Client,
    timeout: Duration,
}

impl WebhookChannel {
    /// Create a channel whose requests give up after `timeout`
    pub fn new(timeout: Duration) -> ChannelResult<Self> {
        if timeout.is_zero() {
            return Err(ChannelError::InvalidConfig(
                "Timeout must be greater than 0".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("shiftboard/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Deliver `payload` to `config`, reporting the outcome instead of failing
    pub async fn deliver(&self, config: &WebhookConfig, payload: &WebhookPayload) -> DeliveryStatus {
        let started = Instant::now();
        let format = formatter_for(config.format).name();
        let result = self.send(config, payload).await;
        let elapsed = started.elapsed().as_secs_f64();

        metrics::record_webhook_delivery(format, result.is_ok(), elapsed);

        match result {
            Ok(status) => {
                tracing::info!(
                    webhook_id = %config.id,
                    trigger = %payload.trigger,
                    status,
                    "Webhook delivered"
                );
                DeliveryStatus::success(config.id, status)
            }
            Err(e) => {
                tracing::warn!(
                    webhook_id = %config.id,
                    url = %config.url,
                    trigger = %payload.trigger,
                    error = %e,
                    "Webhook delivery failed"
                );
                DeliveryStatus::failure(config.id, &e)
            }
        }
    }

    async fn send(&self, config: &WebhookConfig, payload: &WebhookPayload) -> ChannelResult<u16> {
        let rendered = formatter_for(config.format).render(payload, config)?;

        let mut request = self
            .client
            .post(&config.url)
            .header(CONTENT_TYPE, "application/json")
            .header(WEBHOOK_ID_HEADER, config.id.to_string());

        for (name, value) in rendered.headers {
            request = request.header(name, value);
        }

        let response = request.body(rendered.body).send().await?;
        let status = response.status();

        if status.is_success() {
            Ok(status.as_u16())
        } else {
            Err(ChannelError::Rejected {
                status: status.as_u16(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TriggerType, WebhookFormat, WebhookScope};
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn test_zero_timeout_rejected() {
        assert!(WebhookChannel::new(Duration::ZERO).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_receiver_reports_failure() {
        let channel = WebhookChannel::new(Duration::from_millis(200)).unwrap();
        let config = WebhookConfig {
            id: Uuid::new_v4(),
            scope: WebhookScope::Global,
            url: "http://127.0.0.1:9/hook".into(),
            secret: None,
            triggers: vec![TriggerType::SettingsUpdated],
            format: WebhookFormat::ChatEmbed,
            enabled: true,
        };
        let payload = WebhookPayload {
            trigger: TriggerType::SettingsUpdated,
            event_id: None,
            timestamp: Utc::now(),
            data: serde_json::json!({}),
        };

        let status = channel.deliver(&config, &payload).await;
        assert!(!status.success);
        assert_eq!(status.webhook_id, config.id);
    }
}
