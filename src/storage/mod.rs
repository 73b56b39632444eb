//! Storage collaborator interface
//!
//! The scheduling core never talks to a database directly. It consumes the
//! narrow set of reads and writes below, each named after the question the
//! engine asks ("overlapping shifts for assignee in window", "is this user an
//! administrator of this event").
//!
//! [`InMemoryStore`] is the bundled implementation. It backs single-node
//! deployments, development servers seeded from a JSON fixture, and tests.

mod memory;

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{
    CoverageRequirement, Event, Notification, NotificationChannel, Shift, Team, TimeWindow,
    TriggerType, User, WebhookConfig, WebhookScope,
};

pub use memory::{EventAdmin, Fixture, InMemoryStore};

/// Result type for storage operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by a storage backend
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Row addressed by a write does not exist
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    /// Row violates a data-model invariant
    #[error("Invalid {entity}: {reason}")]
    InvalidRecord { entity: &'static str, reason: String },

    /// Backend failure (connection, query, ...)
    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn invalid(entity: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidRecord {
            entity,
            reason: reason.into(),
        }
    }
}

/// Operations the scheduling core, dispatcher and HTTP layer consume
#[async_trait]
pub trait Store: Send + Sync {
    // Events, teams, users

    async fn event_by_slug(&self, slug: &str) -> StoreResult<Option<Event>>;

    async fn set_event_locked(&self, event_id: Uuid, locked: bool) -> StoreResult<Event>;

    async fn team(&self, team_id: Uuid) -> StoreResult<Option<Team>>;

    async fn user(&self, user_id: Uuid) -> StoreResult<Option<User>>;

    async fn is_event_admin(&self, event_id: Uuid, user_id: Uuid) -> StoreResult<bool>;

    // Shifts

    async fn shift(&self, shift_id: Uuid) -> StoreResult<Option<Shift>>;

    async fn insert_shift(&self, shift: Shift) -> StoreResult<Shift>;

    async fn update_shift(&self, shift: Shift) -> StoreResult<Shift>;

    async fn delete_shift(&self, shift_id: Uuid) -> StoreResult<Option<Shift>>;

    /// Shifts of `assignee_id` in the event whose window intersects `window`
    async fn overlapping_shifts_for_assignee(
        &self,
        event_id: Uuid,
        assignee_id: Uuid,
        window: TimeWindow,
        exclude: Option<Uuid>,
    ) -> StoreResult<Vec<Shift>>;

    async fn shifts_for_team(&self, event_id: Uuid, team_id: Uuid) -> StoreResult<Vec<Shift>>;

    /// Distinct assignees holding at least one shift in the event
    async fn event_assignees(&self, event_id: Uuid) -> StoreResult<Vec<Uuid>>;

    // Coverage

    async fn coverage_requirements(
        &self,
        event_id: Uuid,
        team_id: Uuid,
    ) -> StoreResult<Vec<CoverageRequirement>>;

    async fn replace_coverage_requirements(
        &self,
        event_id: Uuid,
        team_id: Uuid,
        requirements: Vec<CoverageRequirement>,
    ) -> StoreResult<Vec<CoverageRequirement>>;

    // Notifications

    /// Stored preference for `(trigger, channel)`, `None` when the user never set one
    async fn notification_preference(
        &self,
        user_id: Uuid,
        trigger: TriggerType,
        channel: NotificationChannel,
    ) -> StoreResult<Option<bool>>;

    async fn create_notification(&self, notification: Notification) -> StoreResult<Notification>;

    async fn notifications_for(&self, user_id: Uuid) -> StoreResult<Vec<Notification>>;

    /// Marks a notification read; `None` when it does not belong to `user_id`
    async fn mark_notification_read(
        &self,
        user_id: Uuid,
        notification_id: Uuid,
    ) -> StoreResult<Option<Notification>>;

    // Webhooks

    async fn webhook_configs(&self, scope: WebhookScope) -> StoreResult<Vec<WebhookConfig>>;
}
