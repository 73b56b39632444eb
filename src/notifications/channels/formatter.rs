//! Webhook payload formatters

use hmac::{Hmac, Mac};
use serde_json::{json, Map, Value};
use sha2::Sha256;

use super::{ChannelError, ChannelResult, PayloadFormatter, RenderedRequest};
use crate::models::WebhookConfig;
use crate::notifications::WebhookPayload;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying `sha256=<hex digest>` of the raw body
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

/// Chat services truncate longer field values
const EMBED_FIELD_LIMIT: usize = 1024;

/// Hex-encoded HMAC-SHA256 of `body` keyed by `secret`
pub fn sign_payload(secret: &str, body: &[u8]) -> ChannelResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ChannelError::InvalidConfig(format!("Unusable signing secret: {e}")))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// JSON body signed with the configuration's shared secret
///
/// ```json
/// {
///   "type": "shift.created",
///   "event_id": "6f1c...",
///   "timestamp": "2025-01-15T18:00:00Z",
///   "data": { "...": "..." }
/// }
/// ```
pub struct SignedJsonFormatter;

impl PayloadFormatter for SignedJsonFormatter {
    fn name(&self) -> &'static str {
        "default"
    }

    fn render(
        &self,
        payload: &WebhookPayload,
        config: &WebhookConfig,
    ) -> ChannelResult<RenderedRequest> {
        let secret = config
            .secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ChannelError::InvalidConfig("Signed webhook has no secret".into()))?;

        let body = serde_json::to_vec(payload)?;
        let signature = sign_payload(secret, &body)?;

        Ok(RenderedRequest {
            body,
            headers: vec![(SIGNATURE_HEADER, format!("sha256={signature}"))],
        })
    }
}

/// Single embed for chat-service incoming webhooks, unsigned
pub struct ChatEmbedFormatter;

impl ChatEmbedFormatter {
    fn color(payload: &WebhookPayload) -> u32 {
        match payload.trigger.prefix() {
            "shift" => 0x3B82F6,
            "event" => 0xF59E0B,
            "coverage" => 0x10B981,
            _ => 0x6B7280,
        }
    }

    fn fields(data: &Value) -> Vec<Value> {
        let Value::Object(map) = data else {
            return Vec::new();
        };

        map.iter()
            .filter_map(|(key, value)| {
                let text = match value {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    _ => return None,
                };
                let text: String = text.chars().take(EMBED_FIELD_LIMIT).collect();
                Some(json!({ "name": key, "value": text, "inline": true }))
            })
            .collect()
    }
}

impl PayloadFormatter for ChatEmbedFormatter {
    fn name(&self) -> &'static str {
        "chat-embed"
    }

    fn render(
        &self,
        payload: &WebhookPayload,
        _config: &WebhookConfig,
    ) -> ChannelResult<RenderedRequest> {
        let mut embed = Map::new();
        embed.insert("title".into(), json!(payload.trigger.as_str()));
        embed.insert("color".into(), json!(Self::color(payload)));
        embed.insert("fields".into(), Value::Array(Self::fields(&payload.data)));
        embed.insert("timestamp".into(), json!(payload.timestamp.to_rfc3339()));

        let body = serde_json::to_vec(&json!({ "embeds": [Value::Object(embed)] }))?;

        Ok(RenderedRequest {
            body,
            headers: Vec::new(),
        })
    }
}
