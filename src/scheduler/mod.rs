//! Shift scheduling core
//!
//! This module owns the shift lifecycle and the staffing rules around it.
//!
//! # Overview
//!
//! [`SchedulingEngine`] is the single entry point for shift mutations. Every
//! call carries the acting user's id and role and runs the same pipeline:
//!
//! ```text
//!   permissions ──▶ validation ──▶ staffing limit ──▶ commit ──▶ announce
//!   (role, lock,     (end > start,   (ordinary users     (store)    (broker publish,
//!    ownership,       inside event)   only, per team                 dispatcher queue)
//!    reassignment)                    requirement)
//! ```
//!
//! Overlapping shifts for the same assignee never fail a mutation; they come
//! back as warnings next to the committed shift.
//!
//! # Modules
//!
//! - [`engine`] - shift create/update/delete, event lock, coverage replacement
//! - [`coverage`] - pure coverage arithmetic over fetched requirements and shifts
//! - [`permissions`] - ordered permission checks
//! - [`error`] - error taxonomy shared with the HTTP layer

pub mod coverage;
pub mod engine;
pub mod error;
pub mod permissions;

pub use coverage::{CoverageEvaluator, CoverageStatus, StaffingLevel};
pub use engine::{CoverageWindow, NewShift, SchedulingEngine, ShiftChanges, ShiftOutcome};
pub use error::{SchedulerError, SchedulerResult};
