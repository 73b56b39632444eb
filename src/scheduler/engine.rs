//! Shift lifecycle
//!
//! Every mutation follows the same pipeline: permission checks, structural
//! validation, staffing rules, commit, then announcement (broker publish
//! before returning, dispatcher hand-off without waiting).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

use super::coverage::{CoverageEvaluator, CoverageStatus};
use super::error::{SchedulerError, SchedulerResult};
use super::permissions::{self, Access};
use crate::metrics;
use crate::models::{
    Actor, CoverageRequirement, Event, Shift, ShiftView, Team, TimeWindow, TriggerType, User,
};
use crate::notifications::summary::format_time_range;
use crate::notifications::{Change, Dispatcher};
use crate::realtime::{BroadcastEvent, BroadcastKind, RealtimeBroker};
use crate::storage::Store;

// ============================================================================
// Inputs and outputs
// ============================================================================

/// Request to create a shift
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewShift {
    pub team_id: Uuid,
    pub assignee_id: Uuid,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Partial update; absent fields keep their current value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShiftChanges {
    #[serde(default)]
    pub team_id: Option<Uuid>,
    #[serde(default)]
    pub assignee_id: Option<Uuid>,
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
}

/// One staffing window in a coverage replacement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub required: u32,
}

/// Committed shift plus advisory warnings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShiftOutcome {
    pub shift: ShiftView,
    pub warnings: Vec<String>,
}

// ============================================================================
// Staffing locks
// ============================================================================

/// Serializes the staffing check and insert for one `(event, team)` pair
///
/// Holds across instances only as far as the store is shared in-process; a
/// multi-instance database backend needs its own transaction or advisory lock.
#[derive(Default)]
struct TeamLocks {
    slots: parking_lot::Mutex<HashMap<(Uuid, Uuid), Arc<AsyncMutex<()>>>>,
}

impl TeamLocks {
    async fn acquire(&self, event_id: Uuid, team_id: Uuid) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = self.slots.lock();
            Arc::clone(slots.entry((event_id, team_id)).or_default())
        };
        slot.lock_owned().await
    }
}

// ============================================================================
// Engine
// ============================================================================

fn record<T>(operation: &str, result: &SchedulerResult<T>) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(e) => e.code(),
    };
    metrics::record_shift_operation(operation, outcome);
}

/// Owns the shift lifecycle for every event
pub struct SchedulingEngine {
    store: Arc<dyn Store>,
    broker: RealtimeBroker,
    dispatcher: Dispatcher,
    team_locks: TeamLocks,
}

impl SchedulingEngine {
    pub fn new(store: Arc<dyn Store>, broker: RealtimeBroker, dispatcher: Dispatcher) -> Self {
        Self {
            store,
            broker,
            dispatcher,
            team_locks: TeamLocks::default(),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn broker(&self) -> &RealtimeBroker {
        &self.broker
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    // ------------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------------

    async fn event(&self, slug: &str) -> SchedulerResult<Event> {
        self.store
            .event_by_slug(slug)
            .await?
            .ok_or_else(|| SchedulerError::not_found("event", slug))
    }

    async fn team(&self, team_id: Uuid) -> SchedulerResult<Team> {
        self.store
            .team(team_id)
            .await?
            .ok_or_else(|| SchedulerError::not_found("team", team_id))
    }

    async fn user(&self, user_id: Uuid) -> SchedulerResult<User> {
        self.store
            .user(user_id)
            .await?
            .ok_or_else(|| SchedulerError::not_found("user", user_id))
    }

    async fn event_shift(&self, event: &Event, shift_id: Uuid) -> SchedulerResult<Shift> {
        match self.store.shift(shift_id).await? {
            Some(shift) if shift.event_id == event.id => Ok(shift),
            _ => Err(SchedulerError::not_found("shift", shift_id)),
        }
    }

    async fn access(&self, event: &Event, actor: Actor) -> SchedulerResult<Access> {
        let event_admin = if actor.is_super_admin() {
            false
        } else {
            self.store.is_event_admin(event.id, actor.id).await?
        };
        Ok(Access::new(actor, event_admin))
    }

    /// Role check, event resolution and lock check, in that order
    async fn open_event(&self, slug: &str, actor: Actor) -> SchedulerResult<Event> {
        permissions::ensure_may_write(&actor)?;
        let event = self.event(slug).await?;
        permissions::ensure_unlocked(&event, &actor)?;
        Ok(event)
    }

    // ------------------------------------------------------------------------
    // Rules
    // ------------------------------------------------------------------------

    fn validate_window(event: &Event, window: &TimeWindow) -> SchedulerResult<()> {
        if !window.is_valid() {
            return Err(SchedulerError::invalid("shift must end after it starts"));
        }
        if !event.window().contains_window(window) {
            return Err(SchedulerError::invalid(format!(
                "shift must fall within the event ({})",
                event.window()
            )));
        }
        Ok(())
    }

    /// One warning per existing shift of the assignee intersecting `window`
    async fn overlap_warnings(
        &self,
        event: &Event,
        assignee: &User,
        window: TimeWindow,
        exclude: Option<Uuid>,
    ) -> SchedulerResult<Vec<String>> {
        let overlapping = self
            .store
            .overlapping_shifts_for_assignee(event.id, assignee.id, window, exclude)
            .await?;

        let mut warnings = Vec::with_capacity(overlapping.len());
        for shift in overlapping {
            let team = match self.store.team(shift.team_id).await? {
                Some(team) => team.name,
                None => String::from("another team"),
            };
            warnings.push(format!(
                "{} is already scheduled for {} ({})",
                assignee.name,
                team,
                format_time_range(shift.start, shift.end)
            ));
        }
        Ok(warnings)
    }

    async fn ensure_capacity(
        &self,
        event: &Event,
        team: &Team,
        window: &TimeWindow,
    ) -> SchedulerResult<()> {
        let requirements = self.store.coverage_requirements(event.id, team.id).await?;
        if requirements.is_empty() {
            return Ok(());
        }
        let shifts = self.store.shifts_for_team(event.id, team.id).await?;

        let evaluator = CoverageEvaluator::new(team.id, &requirements, &shifts);
        if let Some(full) = evaluator.saturated_requirement(window) {
            tracing::debug!(
                event = %event.slug,
                team = %team.name,
                requirement_id = %full.id,
                required = full.required,
                "Staffing limit reached"
            );
            return Err(SchedulerError::conflict("team fully staffed for this period"));
        }
        Ok(())
    }

    async fn describe(&self, shift: Shift) -> SchedulerResult<ShiftView> {
        let team = self.team(shift.team_id).await?;
        let assignee = self.user(shift.assignee_id).await?;
        Ok(ShiftView::new(shift, &team, &assignee))
    }

    /// Publish to the broker, then hand the change to the dispatcher
    fn announce(&self, change: Change) {
        let kind = BroadcastKind::try_from(change.trigger).ok();
        if let (Some(kind), Some(event)) = (kind, &change.event) {
            let mut broadcast = BroadcastEvent::new(kind)
                .for_event(event.id, event.slug.clone())
                .with_payload(change.data());
            broadcast.timestamp = change.occurred_at;
            self.broker.publish(broadcast);
        }
        self.dispatcher.dispatch(change);
    }

    // ------------------------------------------------------------------------
    // Shift mutations
    // ------------------------------------------------------------------------

    /// Create a shift in the event addressed by `slug`
    pub async fn create_shift(
        &self,
        slug: &str,
        actor: Actor,
        input: NewShift,
    ) -> SchedulerResult<ShiftOutcome> {
        let result = self.try_create_shift(slug, actor, input).await;
        record("create", &result);
        result
    }

    async fn try_create_shift(
        &self,
        slug: &str,
        actor: Actor,
        input: NewShift,
    ) -> SchedulerResult<ShiftOutcome> {
        let event = self.open_event(slug, actor).await?;
        let access = self.access(&event, actor).await?;
        access.ensure_owner(input.assignee_id, "create")?;

        let window = TimeWindow::new(input.start, input.end);
        Self::validate_window(&event, &window)?;

        let team = self.team(input.team_id).await?;
        let assignee = self.user(input.assignee_id).await?;

        let (shift, warnings) = {
            let _guard = self.team_locks.acquire(event.id, team.id).await;

            if access.enforces_staffing_limits() {
                self.ensure_capacity(&event, &team, &window).await?;
            }

            let warnings = self.overlap_warnings(&event, &assignee, window, None).await?;

            let now = Utc::now();
            let shift = self
                .store
                .insert_shift(Shift {
                    id: Uuid::new_v4(),
                    event_id: event.id,
                    team_id: team.id,
                    assignee_id: assignee.id,
                    start: window.start,
                    end: window.end,
                    created_by: actor.id,
                    created_at: now,
                    updated_at: now,
                })
                .await?;
            (shift, warnings)
        };

        let view = ShiftView::new(shift, &team, &assignee);

        tracing::info!(
            event = %event.slug,
            shift_id = %view.shift.id,
            team = %team.name,
            assignee = %assignee.name,
            actor = %actor.id,
            warnings = warnings.len(),
            "Shift created"
        );

        self.announce(Change::shift(
            TriggerType::ShiftCreated,
            &event,
            actor.id,
            view.clone(),
        ));

        Ok(ShiftOutcome {
            shift: view,
            warnings,
        })
    }

    /// Update a shift; reassignment is limited to administrators
    pub async fn update_shift(
        &self,
        slug: &str,
        actor: Actor,
        shift_id: Uuid,
        changes: ShiftChanges,
    ) -> SchedulerResult<ShiftOutcome> {
        let result = self.try_update_shift(slug, actor, shift_id, changes).await;
        record("update", &result);
        result
    }

    async fn try_update_shift(
        &self,
        slug: &str,
        actor: Actor,
        shift_id: Uuid,
        changes: ShiftChanges,
    ) -> SchedulerResult<ShiftOutcome> {
        let event = self.open_event(slug, actor).await?;
        let existing = self.event_shift(&event, shift_id).await?;

        let access = self.access(&event, actor).await?;
        access.ensure_owner(existing.assignee_id, "update")?;

        let assignee_id = changes.assignee_id.unwrap_or(existing.assignee_id);
        access.ensure_may_reassign(existing.assignee_id, assignee_id)?;

        let window = TimeWindow::new(
            changes.start.unwrap_or(existing.start),
            changes.end.unwrap_or(existing.end),
        );
        Self::validate_window(&event, &window)?;

        let team = self.team(changes.team_id.unwrap_or(existing.team_id)).await?;
        let assignee = self.user(assignee_id).await?;

        let warnings = self
            .overlap_warnings(&event, &assignee, window, Some(existing.id))
            .await?;

        let shift = self
            .store
            .update_shift(Shift {
                team_id: team.id,
                assignee_id: assignee.id,
                start: window.start,
                end: window.end,
                updated_at: Utc::now(),
                ..existing
            })
            .await?;

        let view = ShiftView::new(shift, &team, &assignee);

        tracing::info!(
            event = %event.slug,
            shift_id = %view.shift.id,
            actor = %actor.id,
            warnings = warnings.len(),
            "Shift updated"
        );

        self.announce(Change::shift(
            TriggerType::ShiftUpdated,
            &event,
            actor.id,
            view.clone(),
        ));

        Ok(ShiftOutcome {
            shift: view,
            warnings,
        })
    }

    /// Delete a shift, returning its last state
    pub async fn delete_shift(
        &self,
        slug: &str,
        actor: Actor,
        shift_id: Uuid,
    ) -> SchedulerResult<ShiftView> {
        let result = self.try_delete_shift(slug, actor, shift_id).await;
        record("delete", &result);
        result
    }

    async fn try_delete_shift(
        &self,
        slug: &str,
        actor: Actor,
        shift_id: Uuid,
    ) -> SchedulerResult<ShiftView> {
        let event = self.open_event(slug, actor).await?;
        let existing = self.event_shift(&event, shift_id).await?;

        let access = self.access(&event, actor).await?;
        access.ensure_owner(existing.assignee_id, "delete")?;

        let view = self.describe(existing).await?;

        if self.store.delete_shift(shift_id).await?.is_none() {
            // Lost a race with another delete
            return Err(SchedulerError::not_found("shift", shift_id));
        }

        tracing::info!(
            event = %event.slug,
            shift_id = %shift_id,
            actor = %actor.id,
            "Shift deleted"
        );

        self.announce(Change::shift(
            TriggerType::ShiftDeleted,
            &event,
            actor.id,
            view.clone(),
        ));

        Ok(view)
    }

    // ------------------------------------------------------------------------
    // Event administration
    // ------------------------------------------------------------------------

    /// Lock or unlock an event
    ///
    /// Requesting the state the event is already in changes nothing and
    /// announces nothing.
    pub async fn set_event_lock(
        &self,
        slug: &str,
        actor: Actor,
        locked: bool,
    ) -> SchedulerResult<Event> {
        permissions::ensure_may_write(&actor)?;
        let event = self.event(slug).await?;
        self.access(&event, actor).await?.ensure_event_admin()?;

        if event.is_locked == locked {
            return Ok(event);
        }

        let event = self.store.set_event_locked(event.id, locked).await?;
        metrics::record_lock_change(locked);

        tracing::info!(event = %event.slug, locked, actor = %actor.id, "Event lock changed");

        self.announce(Change::lock(&event, actor.id));

        Ok(event)
    }

    /// Replace every coverage requirement of `team_id` in the event
    pub async fn replace_coverage(
        &self,
        slug: &str,
        actor: Actor,
        team_id: Uuid,
        windows: Vec<CoverageWindow>,
    ) -> SchedulerResult<Vec<CoverageRequirement>> {
        permissions::ensure_may_write(&actor)?;
        let event = self.event(slug).await?;
        self.access(&event, actor).await?.ensure_event_admin()?;
        let team = self.team(team_id).await?;

        let event_window = event.window();
        let mut requirements = Vec::with_capacity(windows.len());
        for window in windows {
            let requirement = CoverageRequirement {
                id: Uuid::new_v4(),
                event_id: event.id,
                team_id: team.id,
                start: window.start,
                end: window.end,
                required: window.required,
            };
            requirement
                .validate()
                .map_err(|reason| SchedulerError::invalid(reason))?;
            if !event_window.contains_window(&requirement.window()) {
                return Err(SchedulerError::invalid(
                    "coverage window must fall within the event",
                ));
            }
            requirements.push(requirement);
        }

        let requirements = {
            let _guard = self.team_locks.acquire(event.id, team.id).await;
            self.store
                .replace_coverage_requirements(event.id, team.id, requirements)
                .await?
        };

        tracing::info!(
            event = %event.slug,
            team = %team.name,
            windows = requirements.len(),
            "Coverage replaced"
        );

        self.announce(Change::coverage(
            &event,
            actor.id,
            team,
            requirements.clone(),
        ));

        Ok(requirements)
    }

    /// Staffing level of each requirement of a team
    pub async fn coverage_summary(
        &self,
        slug: &str,
        actor: Actor,
        team_id: Uuid,
    ) -> SchedulerResult<Vec<CoverageStatus>> {
        permissions::ensure_may_read(&actor)?;
        let event = self.event(slug).await?;
        let team = self.team(team_id).await?;

        let requirements = self.store.coverage_requirements(event.id, team.id).await?;
        let shifts = self.store.shifts_for_team(event.id, team.id).await?;

        Ok(CoverageEvaluator::new(team.id, &requirements, &shifts).summary())
    }
}
