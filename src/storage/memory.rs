//! In-memory storage backend

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Store, StoreError, StoreResult};
use crate::models::{
    CoverageRequirement, Event, Notification, NotificationChannel, NotificationPreference, Shift,
    Team, TimeWindow, TriggerType, User, WebhookConfig, WebhookScope,
};

/// Event administrator membership row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventAdmin {
    pub event_id: Uuid,
    pub user_id: Uuid,
}

/// Seed data loaded at startup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Fixture {
    pub events: Vec<Event>,
    pub teams: Vec<Team>,
    pub users: Vec<User>,
    pub event_admins: Vec<EventAdmin>,
    pub coverage: Vec<CoverageRequirement>,
    pub shifts: Vec<Shift>,
    pub webhooks: Vec<WebhookConfig>,
    pub preferences: Vec<NotificationPreference>,
}

type PreferenceKey = (Uuid, TriggerType, NotificationChannel);

/// HashMap-backed store; all data is lost on restart
#[derive(Default)]
pub struct InMemoryStore {
    events: RwLock<HashMap<Uuid, Event>>,
    teams: RwLock<HashMap<Uuid, Team>>,
    users: RwLock<HashMap<Uuid, User>>,
    event_admins: RwLock<HashSet<(Uuid, Uuid)>>,
    shifts: RwLock<HashMap<Uuid, Shift>>,
    coverage: RwLock<HashMap<Uuid, CoverageRequirement>>,
    notifications: RwLock<Vec<Notification>>,
    preferences: RwLock<HashMap<PreferenceKey, bool>>,
    webhooks: RwLock<HashMap<Uuid, WebhookConfig>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from fixture rows, validating each one
    pub async fn from_fixture(fixture: Fixture) -> StoreResult<Self> {
        let store = Self::new();

        for event in fixture.events {
            store.insert_event(event).await?;
        }
        for team in fixture.teams {
            store.insert_team(team).await?;
        }
        for user in fixture.users {
            store.insert_user(user).await;
        }
        for admin in fixture.event_admins {
            store.add_event_admin(admin.event_id, admin.user_id).await;
        }
        for requirement in fixture.coverage {
            store.insert_coverage(requirement).await?;
        }
        for shift in fixture.shifts {
            store.insert_shift(shift).await?;
        }
        for webhook in fixture.webhooks {
            store.insert_webhook(webhook).await?;
        }
        for pref in fixture.preferences {
            store
                .set_preference(pref.user_id, pref.trigger, pref.channel, pref.enabled)
                .await;
        }

        Ok(store)
    }

    /// Load a JSON fixture file
    pub async fn load_fixture(path: &Path) -> StoreResult<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let fixture: Fixture = serde_json::from_str(&content)?;

        tracing::info!(
            path = %path.display(),
            events = fixture.events.len(),
            teams = fixture.teams.len(),
            users = fixture.users.len(),
            "Loaded store fixture"
        );

        Self::from_fixture(fixture).await
    }

    // ========================================================================
    // Seeding
    // ========================================================================

    pub async fn insert_event(&self, event: Event) -> StoreResult<Event> {
        event
            .validate()
            .map_err(|reason| StoreError::invalid("event", reason))?;

        let mut events = self.events.write().await;
        if events
            .values()
            .any(|e| e.slug == event.slug && e.id != event.id)
        {
            return Err(StoreError::invalid(
                "event",
                format!("slug '{}' already exists", event.slug),
            ));
        }
        events.insert(event.id, event.clone());
        Ok(event)
    }

    /// Remove an event together with its shifts and coverage requirements
    pub async fn delete_event(&self, event_id: Uuid) -> Option<Event> {
        let removed = self.events.write().await.remove(&event_id)?;
        self.shifts.write().await.retain(|_, s| s.event_id != event_id);
        self.coverage.write().await.retain(|_, c| c.event_id != event_id);
        self.event_admins
            .write()
            .await
            .retain(|(event, _)| *event != event_id);
        Some(removed)
    }

    pub async fn insert_team(&self, team: Team) -> StoreResult<Team> {
        team.validate()
            .map_err(|reason| StoreError::invalid("team", reason))?;

        let mut teams = self.teams.write().await;
        let clash = teams.values().any(|t| {
            t.id != team.id && (t.name == team.name || t.abbreviation == team.abbreviation)
        });
        if clash {
            return Err(StoreError::invalid(
                "team",
                format!("name or abbreviation of '{}' already in use", team.name),
            ));
        }
        teams.insert(team.id, team.clone());
        Ok(team)
    }

    pub async fn insert_user(&self, user: User) -> User {
        self.users.write().await.insert(user.id, user.clone());
        user
    }

    pub async fn add_event_admin(&self, event_id: Uuid, user_id: Uuid) {
        self.event_admins.write().await.insert((event_id, user_id));
    }

    pub async fn insert_coverage(
        &self,
        requirement: CoverageRequirement,
    ) -> StoreResult<CoverageRequirement> {
        requirement
            .validate()
            .map_err(|reason| StoreError::invalid("coverage requirement", reason))?;
        self.coverage
            .write()
            .await
            .insert(requirement.id, requirement.clone());
        Ok(requirement)
    }

    pub async fn insert_webhook(&self, webhook: WebhookConfig) -> StoreResult<WebhookConfig> {
        webhook
            .validate()
            .map_err(|reason| StoreError::invalid("webhook", reason))?;
        self.webhooks
            .write()
            .await
            .insert(webhook.id, webhook.clone());
        Ok(webhook)
    }

    pub async fn set_preference(
        &self,
        user_id: Uuid,
        trigger: TriggerType,
        channel: NotificationChannel,
        enabled: bool,
    ) {
        self.preferences
            .write()
            .await
            .insert((user_id, trigger, channel), enabled);
    }

    pub async fn event(&self, event_id: Uuid) -> Option<Event> {
        self.events.read().await.get(&event_id).cloned()
    }

    pub async fn all_shifts(&self, event_id: Uuid) -> Vec<Shift> {
        let mut shifts: Vec<Shift> = self
            .shifts
            .read()
            .await
            .values()
            .filter(|s| s.event_id == event_id)
            .cloned()
            .collect();
        shifts.sort_by_key(|s| (s.start, s.id));
        shifts
    }

    async fn ensure_event(&self, event_id: Uuid) -> StoreResult<Event> {
        self.events
            .read()
            .await
            .get(&event_id)
            .cloned()
            .ok_or(StoreError::NotFound {
                entity: "event",
                id: event_id,
            })
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn event_by_slug(&self, slug: &str) -> StoreResult<Option<Event>> {
        Ok(self
            .events
            .read()
            .await
            .values()
            .find(|e| e.slug == slug)
            .cloned())
    }

    async fn set_event_locked(&self, event_id: Uuid, locked: bool) -> StoreResult<Event> {
        let mut events = self.events.write().await;
        let event = events.get_mut(&event_id).ok_or(StoreError::NotFound {
            entity: "event",
            id: event_id,
        })?;
        event.is_locked = locked;
        Ok(event.clone())
    }

    async fn team(&self, team_id: Uuid) -> StoreResult<Option<Team>> {
        Ok(self.teams.read().await.get(&team_id).cloned())
    }

    async fn user(&self, user_id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.users.read().await.get(&user_id).cloned())
    }

    async fn is_event_admin(&self, event_id: Uuid, user_id: Uuid) -> StoreResult<bool> {
        Ok(self
            .event_admins
            .read()
            .await
            .contains(&(event_id, user_id)))
    }

    async fn shift(&self, shift_id: Uuid) -> StoreResult<Option<Shift>> {
        Ok(self.shifts.read().await.get(&shift_id).cloned())
    }

    async fn insert_shift(&self, shift: Shift) -> StoreResult<Shift> {
        let event = self.ensure_event(shift.event_id).await?;
        if !shift.window().is_valid() || !event.window().contains_window(&shift.window()) {
            return Err(StoreError::invalid(
                "shift",
                "window must be non-empty and inside its event",
            ));
        }
        self.shifts.write().await.insert(shift.id, shift.clone());
        Ok(shift)
    }

    async fn update_shift(&self, shift: Shift) -> StoreResult<Shift> {
        let mut shifts = self.shifts.write().await;
        let slot = shifts.get_mut(&shift.id).ok_or(StoreError::NotFound {
            entity: "shift",
            id: shift.id,
        })?;
        *slot = shift.clone();
        Ok(shift)
    }

    async fn delete_shift(&self, shift_id: Uuid) -> StoreResult<Option<Shift>> {
        Ok(self.shifts.write().await.remove(&shift_id))
    }

    async fn overlapping_shifts_for_assignee(
        &self,
        event_id: Uuid,
        assignee_id: Uuid,
        window: TimeWindow,
        exclude: Option<Uuid>,
    ) -> StoreResult<Vec<Shift>> {
        let mut overlapping: Vec<Shift> = self
            .shifts
            .read()
            .await
            .values()
            .filter(|s| {
                s.event_id == event_id
                    && s.assignee_id == assignee_id
                    && Some(s.id) != exclude
                    && s.window().overlaps(&window)
            })
            .cloned()
            .collect();
        overlapping.sort_by_key(|s| s.start);
        Ok(overlapping)
    }

    async fn shifts_for_team(&self, event_id: Uuid, team_id: Uuid) -> StoreResult<Vec<Shift>> {
        Ok(self
            .shifts
            .read()
            .await
            .values()
            .filter(|s| s.event_id == event_id && s.team_id == team_id)
            .cloned()
            .collect())
    }

    async fn event_assignees(&self, event_id: Uuid) -> StoreResult<Vec<Uuid>> {
        let assignees: BTreeSet<Uuid> = self
            .shifts
            .read()
            .await
            .values()
            .filter(|s| s.event_id == event_id)
            .map(|s| s.assignee_id)
            .collect();
        Ok(assignees.into_iter().collect())
    }

    async fn coverage_requirements(
        &self,
        event_id: Uuid,
        team_id: Uuid,
    ) -> StoreResult<Vec<CoverageRequirement>> {
        let mut requirements: Vec<CoverageRequirement> = self
            .coverage
            .read()
            .await
            .values()
            .filter(|c| c.event_id == event_id && c.team_id == team_id)
            .cloned()
            .collect();
        requirements.sort_by_key(|c| (c.start, c.end));
        Ok(requirements)
    }

    async fn replace_coverage_requirements(
        &self,
        event_id: Uuid,
        team_id: Uuid,
        requirements: Vec<CoverageRequirement>,
    ) -> StoreResult<Vec<CoverageRequirement>> {
        for requirement in &requirements {
            requirement
                .validate()
                .map_err(|reason| StoreError::invalid("coverage requirement", reason))?;
        }

        let mut coverage = self.coverage.write().await;
        coverage.retain(|_, c| !(c.event_id == event_id && c.team_id == team_id));
        for requirement in &requirements {
            coverage.insert(requirement.id, requirement.clone());
        }
        Ok(requirements)
    }

    async fn notification_preference(
        &self,
        user_id: Uuid,
        trigger: TriggerType,
        channel: NotificationChannel,
    ) -> StoreResult<Option<bool>> {
        Ok(self
            .preferences
            .read()
            .await
            .get(&(user_id, trigger, channel))
            .copied())
    }

    async fn create_notification(&self, notification: Notification) -> StoreResult<Notification> {
        self.notifications.write().await.push(notification.clone());
        Ok(notification)
    }

    async fn notifications_for(&self, user_id: Uuid) -> StoreResult<Vec<Notification>> {
        let mut notifications: Vec<Notification> = self
            .notifications
            .read()
            .await
            .iter()
            .filter(|n| n.recipient_id == user_id)
            .cloned()
            .collect();
        notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(notifications)
    }

    async fn mark_notification_read(
        &self,
        user_id: Uuid,
        notification_id: Uuid,
    ) -> StoreResult<Option<Notification>> {
        let mut notifications = self.notifications.write().await;
        Ok(notifications
            .iter_mut()
            .find(|n| n.id == notification_id && n.recipient_id == user_id)
            .map(|n| {
                n.is_read = true;
                n.clone()
            }))
    }

    async fn webhook_configs(&self, scope: WebhookScope) -> StoreResult<Vec<WebhookConfig>> {
        Ok(self
            .webhooks
            .read()
            .await
            .values()
            .filter(|w| w.scope == scope)
            .cloned()
            .collect())
    }
}
