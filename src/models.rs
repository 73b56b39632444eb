// Core data structures for shiftboard

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use uuid::Uuid;

// ============================================================================
// Time Window
// ============================================================================

/// Half-open time interval `[start, end)` in UTC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// `end > start`
    pub fn is_valid(&self) -> bool {
        self.end > self.start
    }

    /// Half-open intersection test; touching windows do not overlap
    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Whether `other` lies entirely inside this window
    pub fn contains_window(&self, other: &TimeWindow) -> bool {
        other.start >= self.start && other.end <= self.end
    }

    pub fn contains_instant(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant < self.end
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - {}",
            self.start.format("%Y-%m-%d %H:%M"),
            self.end.format("%Y-%m-%d %H:%M")
        )
    }
}

// ============================================================================
// Trigger Types
// ============================================================================

/// Kind of committed change, shared by broadcasts, notifications and webhooks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriggerType {
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
    #[serde(rename = "settings.updated")]
    SettingsUpdated,
    #[serde(rename = "user.created")]
    UserCreated,
    #[serde(rename = "user.updated")]
    UserUpdated,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ShiftCreated => "shift.created",
            Self::ShiftUpdated => "shift.updated",
            Self::ShiftDeleted => "shift.deleted",
            Self::EventLocked => "event.locked",
            Self::EventUnlocked => "event.unlocked",
            Self::CoverageUpdated => "coverage.updated",
            Self::SettingsUpdated => "settings.updated",
            Self::UserCreated => "user.created",
            Self::UserUpdated => "user.updated",
        }
    }

    /// Part before the first dot (`shift`, `event`, ...)
    pub fn prefix(&self) -> &'static str {
        self.as_str().split('.').next().unwrap_or_default()
    }

    /// Triggers that are not tied to a single event
    pub fn is_global_only(&self) -> bool {
        matches!(
            self,
            Self::SettingsUpdated | Self::UserCreated | Self::UserUpdated
        )
    }

    /// Triggers that produce in-app notifications for event participants
    pub fn notifies_users(&self) -> bool {
        matches!(
            self,
            Self::ShiftCreated
                | Self::ShiftUpdated
                | Self::ShiftDeleted
                | Self::EventLocked
                | Self::EventUnlocked
        )
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::all().into_iter().find(|t| t.as_str() == s)
    }

    pub fn all() -> Vec<Self> {
        vec![
            Self::ShiftCreated,
            Self::ShiftUpdated,
            Self::ShiftDeleted,
            Self::EventLocked,
            Self::EventUnlocked,
            Self::CoverageUpdated,
            Self::SettingsUpdated,
            Self::UserCreated,
            Self::UserUpdated,
        ]
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Event
// ============================================================================

/// Grid granularity of an event in minutes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum Granularity {
    Quarter,
    Half,
    Hour,
}

impl Granularity {
    pub fn minutes(&self) -> u32 {
        match self {
            Self::Quarter => 15,
            Self::Half => 30,
            Self::Hour => 60,
        }
    }
}

impl TryFrom<u32> for Granularity {
    type Error = String;

    fn try_from(minutes: u32) -> Result<Self, Self::Error> {
        match minutes {
            15 => Ok(Self::Quarter),
            30 => Ok(Self::Half),
            60 => Ok(Self::Hour),
            other => Err(format!("granularity must be 15, 30 or 60 minutes, got {other}")),
        }
    }
}

impl From<Granularity> for u32 {
    fn from(g: Granularity) -> Self {
        g.minutes()
    }
}

/// A multi-day event that owns shifts and coverage requirements
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub granularity: Granularity,
    #[serde(default)]
    pub is_locked: bool,
    #[serde(default)]
    pub is_public: bool,
}

impl Event {
    pub fn window(&self) -> TimeWindow {
        TimeWindow::new(self.start, self.end)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !is_valid_slug(&self.slug) {
            return Err(format!("Event slug '{}' is not URL-safe", self.slug));
        }
        if !self.window().is_valid() {
            return Err(format!("Event '{}' must end after it starts", self.slug));
        }
        Ok(())
    }
}

fn is_valid_slug(slug: &str) -> bool {
    static SLUG_RE: OnceLock<Regex> = OnceLock::new();

    let re = SLUG_RE
        .get_or_init(|| Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").expect("Invalid regex pattern"));

    re.is_match(slug)
}

// ============================================================================
// Team
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Team {
    pub id: Uuid,
    pub name: String,
    pub abbreviation: String,
    pub color: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

impl Team {
    pub fn validate(&self) -> Result<(), String> {
        static COLOR_RE: OnceLock<Regex> = OnceLock::new();

        if self.name.trim().is_empty() {
            return Err("Team name cannot be empty".to_string());
        }
        if self.abbreviation.is_empty() || self.abbreviation.chars().count() > 10 {
            return Err(format!(
                "Team abbreviation '{}' must be 1-10 characters",
                self.abbreviation
            ));
        }

        let re = COLOR_RE
            .get_or_init(|| Regex::new(r"^#?[0-9A-Fa-f]{6}$").expect("Invalid regex pattern"));
        if !re.is_match(&self.color) {
            return Err(format!("Team color '{}' is not a 6-digit hex color", self.color));
        }

        Ok(())
    }
}

// ============================================================================
// Users
// ============================================================================

/// Global role of a user; event administration is a separate membership
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SuperAdmin,
    User,
    ReadOnly,
    /// Placeholder assignee that cannot sign in
    Dummy,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SuperAdmin => "super_admin",
            Self::User => "user",
            Self::ReadOnly => "read_only",
            Self::Dummy => "dummy",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub role: Role,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

/// The user on whose behalf a mutation runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: Uuid,
    pub role: Role,
}

impl Actor {
    pub fn new(id: Uuid, role: Role) -> Self {
        Self { id, role }
    }

    pub fn is_super_admin(&self) -> bool {
        self.role == Role::SuperAdmin
    }
}

impl From<&User> for Actor {
    fn from(user: &User) -> Self {
        Self::new(user.id, user.role)
    }
}

// ============================================================================
// Shifts
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shift {
    pub id: Uuid,
    pub event_id: Uuid,
    pub team_id: Uuid,
    pub assignee_id: Uuid,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Shift {
    pub fn window(&self) -> TimeWindow {
        TimeWindow::new(self.start, self.end)
    }
}

/// Shift joined with the team and assignee display fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShiftView {
    #[serde(flatten)]
    pub shift: Shift,
    pub team_name: String,
    pub team_abbreviation: String,
    pub team_color: String,
    pub assignee_name: String,
}

impl ShiftView {
    pub fn new(shift: Shift, team: &Team, assignee: &User) -> Self {
        Self {
            shift,
            team_name: team.name.clone(),
            team_abbreviation: team.abbreviation.clone(),
            team_color: team.color.clone(),
            assignee_name: assignee.name.clone(),
        }
    }
}

// ============================================================================
// Coverage
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageRequirement {
    pub id: Uuid,
    pub event_id: Uuid,
    pub team_id: Uuid,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub required: u32,
}

impl CoverageRequirement {
    pub fn window(&self) -> TimeWindow {
        TimeWindow::new(self.start, self.end)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.window().is_valid() {
            return Err("Coverage window must end after it starts".to_string());
        }
        if self.required == 0 {
            return Err("Required count must be at least 1".to_string());
        }
        Ok(())
    }
}

// ============================================================================
// Notifications
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub recipient_id: Uuid,
    pub event_id: Option<Uuid>,
    pub title: String,
    pub body: String,
    pub trigger: TriggerType,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    InApp,
    Email,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPreference {
    pub user_id: Uuid,
    pub trigger: TriggerType,
    pub channel: NotificationChannel,
    pub enabled: bool,
}

// ============================================================================
// Webhooks
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookScope {
    Global,
    Event { event_id: Uuid },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum WebhookFormat {
    /// HMAC-signed JSON body
    #[default]
    #[serde(rename = "default")]
    Default,
    /// Single chat embed object, unsigned
    #[serde(rename = "chat-embed")]
    ChatEmbed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub id: Uuid,
    pub scope: WebhookScope,
    pub url: String,
    #[serde(default)]
    pub secret: Option<String>,
    pub triggers: Vec<TriggerType>,
    #[serde(default)]
    pub format: WebhookFormat,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl WebhookConfig {
    pub fn accepts(&self, trigger: TriggerType) -> bool {
        self.enabled && self.triggers.contains(&trigger)
    }

    pub fn validate(&self) -> Result<(), String> {
        let parsed = url::Url::parse(&self.url).map_err(|e| format!("Invalid webhook URL: {e}"))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err("Webhook URL must start with http:// or https://".to_string());
        }
        if self.format == WebhookFormat::Default && self.secret.is_none() {
            return Err("Signed webhooks require a shared secret".to_string());
        }
        Ok(())
    }
}
