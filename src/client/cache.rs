//! Query-cache invalidation driven by realtime messages

use parking_lot::Mutex;
use serde::Deserialize;
use uuid::Uuid;

/// Locally cached query a message can make stale
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryKey {
    /// Shift grid and coverage bars of one event
    Grid { slug: String },
    /// Event metadata (lock state, name, window)
    EventMeta { slug: String },
    /// Unread notification counter
    UnreadNotifications,
}

/// Cache the subscription manager invalidates
pub trait QueryCache: Send + Sync {
    fn invalidate(&self, key: &QueryKey);
}

/// Decoded realtime message
///
/// `kind` stays a string so message types this client does not know yet
/// still refresh the notification counter.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClientMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub event_id: Option<Uuid>,
    #[serde(default)]
    pub event_slug: Option<String>,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

/// Queries made stale by `message`
///
/// `view_slug` is the slug the connection is scoped to, used when the message
/// itself carries none.
pub fn invalidations_for(message: &ClientMessage, view_slug: Option<&str>) -> Vec<QueryKey> {
    let mut keys = Vec::with_capacity(2);
    let slug = message.event_slug.as_deref().or(view_slug);

    if let Some(slug) = slug {
        let kind = message.kind.as_str();
        if kind.starts_with("shift.") || kind == "coverage.updated" {
            keys.push(QueryKey::Grid {
                slug: slug.to_string(),
            });
        } else if kind.starts_with("event.") {
            keys.push(QueryKey::EventMeta {
                slug: slug.to_string(),
            });
        }
    }

    keys.push(QueryKey::UnreadNotifications);
    keys
}

/// Cache that only remembers what it was told to invalidate
#[derive(Debug, Default)]
pub struct RecordingCache {
    invalidated: Mutex<Vec<QueryKey>>,
}

impl RecordingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys invalidated so far, in order
    pub fn invalidated(&self) -> Vec<QueryKey> {
        self.invalidated.lock().clone()
    }

    pub fn take(&self) -> Vec<QueryKey> {
        std::mem::take(&mut *self.invalidated.lock())
    }
}

impl QueryCache for RecordingCache {
    fn invalidate(&self, key: &QueryKey) {
        self.invalidated.lock().push(key.clone());
    }
}

/// Cache that logs invalidations, for command-line watching
#[derive(Debug, Default)]
pub struct LoggingCache;

impl QueryCache for LoggingCache {
    fn invalidate(&self, key: &QueryKey) {
        match key {
            QueryKey::Grid { slug } => tracing::info!(%slug, "Grid stale"),
            QueryKey::EventMeta { slug } => tracing::info!(%slug, "Event metadata stale"),
            QueryKey::UnreadNotifications => tracing::debug!("Unread counter stale"),
        }
    }
}
