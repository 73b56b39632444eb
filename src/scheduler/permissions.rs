//! Permission checks for shift mutations
//!
//! Checks run in a fixed order and the first failure wins:
//!
//! 1. read-only (and placeholder) accounts never write
//! 2. a locked event only accepts super-admin writes
//! 3. ordinary users only touch their own shifts, unless they administer the event
//! 4. only super-admins and event administrators may reassign a shift

use uuid::Uuid;

use super::error::{SchedulerError, SchedulerResult};
use crate::models::{Actor, Event, Role};

/// Step 1
pub fn ensure_may_write(actor: &Actor) -> SchedulerResult<()> {
    match actor.role {
        Role::ReadOnly => Err(SchedulerError::forbidden("read-only accounts cannot modify shifts")),
        Role::Dummy => Err(SchedulerError::forbidden("placeholder accounts cannot act")),
        Role::SuperAdmin | Role::User => Ok(()),
    }
}

/// Reads only exclude placeholder accounts
pub fn ensure_may_read(actor: &Actor) -> SchedulerResult<()> {
    if actor.role == Role::Dummy {
        return Err(SchedulerError::forbidden("placeholder accounts cannot act"));
    }
    Ok(())
}

/// Step 2
pub fn ensure_unlocked(event: &Event, actor: &Actor) -> SchedulerResult<()> {
    if event.is_locked && !actor.is_super_admin() {
        return Err(SchedulerError::forbidden("event is locked"));
    }
    Ok(())
}

/// What an actor may do inside one event
#[derive(Debug, Clone, Copy)]
pub struct Access {
    actor: Actor,
    event_admin: bool,
}

impl Access {
    pub fn new(actor: Actor, event_admin: bool) -> Self {
        Self { actor, event_admin }
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    /// Super-admin, or administrator of this event
    pub fn is_admin(&self) -> bool {
        self.actor.is_super_admin() || self.event_admin
    }

    /// Step 3
    pub fn ensure_owner(&self, assignee_id: Uuid, action: &str) -> SchedulerResult<()> {
        if self.is_admin() || assignee_id == self.actor.id {
            return Ok(());
        }
        Err(SchedulerError::forbidden(format!(
            "users may only {action} their own shifts"
        )))
    }

    /// Step 4
    pub fn ensure_may_reassign(&self, from: Uuid, to: Uuid) -> SchedulerResult<()> {
        if from == to || self.is_admin() {
            return Ok(());
        }
        Err(SchedulerError::forbidden(
            "only administrators may reassign shifts",
        ))
    }

    /// Event lock changes and coverage edits
    pub fn ensure_event_admin(&self) -> SchedulerResult<()> {
        if self.is_admin() {
            return Ok(());
        }
        Err(SchedulerError::forbidden(
            "only event administrators may manage this event",
        ))
    }

    /// Ordinary users without an administrative role are held to staffing limits
    pub fn enforces_staffing_limits(&self) -> bool {
        !self.is_admin()
    }
}
