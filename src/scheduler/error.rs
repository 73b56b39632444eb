//! Error types for the scheduling core

use std::fmt;

use crate::storage::StoreError;

/// Result type for scheduling operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Scheduling errors
///
/// Each variant maps to one HTTP status at the API boundary.
#[derive(Debug)]
pub enum SchedulerError {
    /// Event, shift, team or user does not exist
    NotFound { entity: &'static str, key: String },

    /// Actor lacks permission, or the event is locked
    Forbidden { reason: String },

    /// Time window or field values are invalid
    InvalidInput { reason: String },

    /// Staffing limit reached
    Conflict { reason: String },

    /// Storage failure
    Storage(StoreError),
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { entity, key } => write!(f, "{} not found: {}", entity, key),
            Self::Forbidden { reason } => write!(f, "Forbidden: {}", reason),
            Self::InvalidInput { reason } => write!(f, "Invalid input: {}", reason),
            Self::Conflict { reason } => write!(f, "Conflict: {}", reason),
            Self::Storage(err) => write!(f, "Storage error: {}", err),
        }
    }
}

impl std::error::Error for SchedulerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for SchedulerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => Self::NotFound {
                entity,
                key: id.to_string(),
            },
            StoreError::InvalidRecord { reason, .. } => Self::InvalidInput { reason },
            other => Self::Storage(other),
        }
    }
}

impl SchedulerError {
    pub fn not_found(entity: &'static str, key: impl fmt::Display) -> Self {
        Self::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::Forbidden {
            reason: reason.into(),
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }

    pub fn conflict(reason: impl Into<String>) -> Self {
        Self::Conflict {
            reason: reason.into(),
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Forbidden { .. } => "forbidden",
            Self::InvalidInput { .. } => "invalid_input",
            Self::Conflict { .. } => "conflict",
            Self::Storage(_) => "storage",
        }
    }

    /// Message safe to show the caller
    pub fn public_message(&self) -> String {
        match self {
            Self::Storage(_) => "Internal storage error".to_string(),
            Self::Forbidden { reason }
            | Self::InvalidInput { reason }
            | Self::Conflict { reason } => reason.clone(),
            Self::NotFound { .. } => self.to_string(),
        }
    }

    /// Check if retrying the same request could succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Storage(StoreError::Backend(_) | StoreError::Io(_)))
    }
}
