//! HTTP surface
//!
//! Exposes the scheduling engine over a JSON API, the realtime broker as a
//! server-sent-event stream, and the notification inbox.
//!
//! # Endpoints
//!
//! - `POST   /api/events/{slug}/shifts` - create a shift
//! - `PUT    /api/events/{slug}/shifts/{shift_id}` - update a shift
//! - `DELETE /api/events/{slug}/shifts/{shift_id}` - delete a shift
//! - `POST   /api/events/{slug}/lock`, `/unlock` - toggle the event lock
//! - `PUT    /api/events/{slug}/teams/{team_id}/coverage` - replace requirements
//! - `GET    /api/events/{slug}/teams/{team_id}/coverage` - staffing summary
//! - `GET    /api/realtime?event={slug}` - realtime stream
//! - `GET    /api/notifications`, `POST /api/notifications/{id}/read`
//! - `GET    /api/health`, `GET /metrics`

pub mod api;
mod app;
mod config;

pub use app::{AppState, ServerError, ServerInfo, ShiftboardServer};
pub use config::{ConfigError, ServerConfig, ServerConfigBuilder};
