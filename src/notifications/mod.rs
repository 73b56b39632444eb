//! Notification and webhook fan-out
//!
//! Committed changes are handed to the [`Dispatcher`], which turns each one
//! into in-app notifications for the people affected and HTTP deliveries to
//! every webhook subscribed to the change's trigger.
//!
//! # Architecture
//!
//! ```text
//!   SchedulingEngine ──dispatch(Change)──▶ bounded queue
//!                                              │
//!                                     Dispatcher worker
//!                                              │
//!                         ┌────────────────────┴───────────────────┐
//!                         ▼                                        ▼
//!              recipients + preferences                  matching webhook configs
//!                         │                                        │
//!                  Store::create_notification          PayloadFormatter ─▶ POST
//! ```
//!
//! Everything here runs after the triggering request has already answered;
//! nothing in this module can fail a mutation.

pub mod channels;
mod dispatcher;
pub mod summary;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::models::{CoverageRequirement, Event, ShiftView, Team, TriggerType};

pub use channels::webhook::WebhookChannel;
pub use channels::{DeliveryStatus, PayloadFormatter};
pub use dispatcher::{Dispatcher, ShutdownMode};

/// What a change was about
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeSubject {
    Shift(ShiftView),
    Lock { locked: bool },
    Coverage {
        team: Team,
        requirements: Vec<CoverageRequirement>,
    },
    /// Free-form data for changes outside the scheduling core
    Data(serde_json::Value),
}

/// Snapshot of a committed change, queued for fan-out
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub trigger: TriggerType,
    pub event: Option<Event>,
    pub actor_id: Option<Uuid>,
    pub subject: ChangeSubject,
    pub occurred_at: DateTime<Utc>,
}

impl Change {
    pub fn shift(trigger: TriggerType, event: &Event, actor_id: Uuid, shift: ShiftView) -> Self {
        Self {
            trigger,
            event: Some(event.clone()),
            actor_id: Some(actor_id),
            subject: ChangeSubject::Shift(shift),
            occurred_at: Utc::now(),
        }
    }

    /// Lock toggle; `event` must already carry the new state
    pub fn lock(event: &Event, actor_id: Uuid) -> Self {
        let trigger = if event.is_locked {
            TriggerType::EventLocked
        } else {
            TriggerType::EventUnlocked
        };
        Self {
            trigger,
            event: Some(event.clone()),
            actor_id: Some(actor_id),
            subject: ChangeSubject::Lock {
                locked: event.is_locked,
            },
            occurred_at: Utc::now(),
        }
    }

    pub fn coverage(
        event: &Event,
        actor_id: Uuid,
        team: Team,
        requirements: Vec<CoverageRequirement>,
    ) -> Self {
        Self {
            trigger: TriggerType::CoverageUpdated,
            event: Some(event.clone()),
            actor_id: Some(actor_id),
            subject: ChangeSubject::Coverage { team, requirements },
            occurred_at: Utc::now(),
        }
    }

    /// Change that belongs to no event (settings, user management)
    pub fn global(trigger: TriggerType, actor_id: Option<Uuid>, data: serde_json::Value) -> Self {
        Self {
            trigger,
            event: None,
            actor_id,
            subject: ChangeSubject::Data(data),
            occurred_at: Utc::now(),
        }
    }

    pub fn event_id(&self) -> Option<Uuid> {
        self.event.as_ref().map(|e| e.id)
    }

    /// User whose own shift the change touched
    pub fn affected_user(&self) -> Option<Uuid> {
        match &self.subject {
            ChangeSubject::Shift(view) => Some(view.shift.assignee_id),
            _ => None,
        }
    }

    /// JSON rendering shared by broadcasts and webhook payloads
    pub fn data(&self) -> serde_json::Value {
        match &self.subject {
            ChangeSubject::Shift(view) => serde_json::to_value(view).unwrap_or_default(),
            ChangeSubject::Lock { locked } => {
                let (slug, name) = self
                    .event
                    .as_ref()
                    .map(|e| (e.slug.clone(), e.name.clone()))
                    .unwrap_or_default();
                json!({ "is_locked": locked, "slug": slug, "name": name })
            }
            ChangeSubject::Coverage { team, requirements } => json!({
                "team_id": team.id,
                "team_name": team.name,
                "requirements": requirements,
            }),
            ChangeSubject::Data(value) => value.clone(),
        }
    }

    pub fn webhook_payload(&self) -> WebhookPayload {
        WebhookPayload {
            trigger: self.trigger,
            event_id: self.event_id(),
            timestamp: self.occurred_at,
            data: self.data(),
        }
    }
}

/// Body of a default-format webhook delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookPayload {
    #[serde(rename = "type")]
    pub trigger: TriggerType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}
