//! shiftboard - Volunteer shift scheduling with live updates
//!
//! Schedules volunteers into team shifts during an event, checks staffing
//! against per-team coverage requirements, and pushes every committed change
//! to connected clients, user inboxes and outgoing webhooks.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`scheduler`] - Shift lifecycle, permissions and coverage evaluation
//! - [`realtime`] - Subscriber registry with cross-instance relay
//! - [`notifications`] - Background fan-out to inboxes and signed webhooks
//! - [`client`] - Streaming subscription client with reconnect backoff
//! - [`server`] - HTTP API and server-sent-event endpoint
//! - [`storage`] - Storage collaborator interface and in-memory backend
//! - [`models`] - Core data structures and types
//! - [`config`] - Configuration management and settings
//! - [`metrics`] - Prometheus metrics
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use shiftboard::config::Config;
//! use shiftboard::server::ShiftboardServer;
//! use shiftboard::storage::InMemoryStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let server = ShiftboardServer::new(config, Arc::new(InMemoryStore::new())).await?;
//!     server
//!         .start_with_shutdown(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod notifications;
pub mod realtime;
pub mod scheduler;
pub mod server;
pub mod storage;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, ErrorCategory, Result, ShiftboardErrorTrait};
    pub use crate::models::{Actor, Event, Role, Shift, ShiftView, Team, TriggerType, User};
    pub use crate::realtime::{BroadcastEvent, BroadcastKind, RealtimeBroker, Scope};
    pub use crate::scheduler::{SchedulerError, SchedulingEngine};
    pub use crate::server::ShiftboardServer;
    pub use crate::storage::{InMemoryStore, Store};
}

// Direct re-exports for convenience
pub use models::{Actor, Role, TimeWindow, TriggerType};
