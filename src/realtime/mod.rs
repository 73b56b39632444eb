//! Realtime change propagation
//!
//! Every committed mutation becomes a [`BroadcastEvent`] that is delivered to
//! the subscribers connected to this instance and, through a [`Relay`], to the
//! subscribers of every other instance.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────── instance A ────────────────┐      ┌──── instance B ────┐
//! │ engine ──publish──▶ RealtimeBroker          │      │ RealtimeBroker      │
//! │                      ├─▶ local subscribers  │      │  ├─▶ subscribers    │
//! │                      └─▶ Relay::publish ────┼─────▶│  └─ relay listener  │
//! │ relay listener ◀─ own envelopes skipped     │      │                     │
//! └─────────────────────────────────────────────┘      └─────────────────────┘
//! ```
//!
//! Delivery is at-most-once and best-effort. A subscriber that falls behind
//! its buffer loses the oldest buffered events; clients recover by refetching
//! whatever their cache marks stale.

pub mod broker;
pub mod relay;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::models::TriggerType;

pub use broker::{BrokerError, RealtimeBroker, Subscription};
pub use relay::{
    connect, LocalRelay, RedisRelay, Relay, RelayEnvelope, RelayError, RelayStream,
};

/// Kind of change carried by a broadcast
///
/// The event-scoped subset of [`TriggerType`], with the same wire names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BroadcastKind {
    #[serde(rename = "shift.created")]
    ShiftCreated,
    #[serde(rename = "shift.updated")]
    ShiftUpdated,
    #[serde(rename = "shift.deleted")]
    ShiftDeleted,
    #[serde(rename = "event.locked")]
    EventLocked,
    #[serde(rename = "event.unlocked")]
    EventUnlocked,
    #[serde(rename = "coverage.updated")]
    CoverageUpdated,
}

impl BroadcastKind {
    pub fn as_str(&self) -> &'static str {
        self.trigger().as_str()
    }

    /// Trigger used for the notification and webhook side of the same change
    pub fn trigger(&self) -> TriggerType {
        match self {
            Self::ShiftCreated => TriggerType::ShiftCreated,
            Self::ShiftUpdated => TriggerType::ShiftUpdated,
            Self::ShiftDeleted => TriggerType::ShiftDeleted,
            Self::EventLocked => TriggerType::EventLocked,
            Self::EventUnlocked => TriggerType::EventUnlocked,
            Self::CoverageUpdated => TriggerType::CoverageUpdated,
        }
    }
}

impl TryFrom<TriggerType> for BroadcastKind {
    type Error = TriggerType;

    /// Global-only triggers have no broadcast counterpart
    fn try_from(trigger: TriggerType) -> Result<Self, Self::Error> {
        match trigger {
            TriggerType::ShiftCreated => Ok(Self::ShiftCreated),
            TriggerType::ShiftUpdated => Ok(Self::ShiftUpdated),
            TriggerType::ShiftDeleted => Ok(Self::ShiftDeleted),
            TriggerType::EventLocked => Ok(Self::EventLocked),
            TriggerType::EventUnlocked => Ok(Self::EventUnlocked),
            TriggerType::CoverageUpdated => Ok(Self::CoverageUpdated),
            TriggerType::SettingsUpdated | TriggerType::UserCreated | TriggerType::UserUpdated => {
                Err(trigger)
            }
        }
    }
}

impl fmt::Display for BroadcastKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Change announcement delivered to subscribers
///
/// Serialized as `{"type", "event_id"?, "event_slug"?, "payload"?, "timestamp"}`
/// both on the SSE stream and in relay envelopes. `event_slug` lets clients
/// subscribed to every event route invalidations; `timestamp` tells repeated
/// toggles apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastEvent {
    #[serde(rename = "type")]
    pub kind: BroadcastKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<Uuid>,

    /// Slug of the owning event, used for subscriber routing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_slug: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,

    pub timestamp: DateTime<Utc>,
}

impl BroadcastEvent {
    pub fn new(kind: BroadcastKind) -> Self {
        Self {
            kind,
            event_id: None,
            event_slug: None,
            payload: None,
            timestamp: Utc::now(),
        }
    }

    /// Attach the owning event
    pub fn for_event(mut self, event_id: Uuid, slug: impl Into<String>) -> Self {
        self.event_id = Some(event_id);
        self.event_slug = Some(slug.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// What a subscriber listens to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Every broadcast on the instance
    All,
    /// Broadcasts for one event, addressed by slug
    Event(String),
}

impl Scope {
    pub fn event(slug: impl Into<String>) -> Self {
        Self::Event(slug.into())
    }

    pub fn matches(&self, event: &BroadcastEvent) -> bool {
        match self {
            Self::All => true,
            Self::Event(slug) => event.event_slug.as_deref() == Some(slug.as_str()),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("*"),
            Self::Event(slug) => f.write_str(slug),
        }
    }
}
