//! Unified error handling for the shiftboard crate
//!
//! Each component keeps its own error type. [`Error`] wraps them so the
//! binary and embedding applications can cross module boundaries with `?`
//! and still decide, per error, whether a retry makes sense.
//!
//! # Usage
//!
//! ```rust,ignore
//! use shiftboard::error::{Error, ShiftboardErrorTrait};
//!
//! fn handle_error(err: Error) {
//!     if err.is_recoverable() {
//!         tracing::warn!(category = ?err.category(), "Retrying: {err}");
//!     } else {
//!         tracing::error!("Fatal error: {err}");
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

pub use crate::client::ClientError;
pub use crate::notifications::channels::ChannelError;
pub use crate::realtime::{BrokerError, RelayError};
pub use crate::scheduler::SchedulerError;
pub use crate::server::ServerError;
pub use crate::storage::StoreError;

/// Common interface of every shiftboard error type
pub trait ShiftboardErrorTrait: std::error::Error {
    /// Check if this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Rejected scheduling request (permissions, validation, staffing)
    Scheduling,
    /// Storage and I/O errors
    Storage,
    /// Realtime broker and relay errors
    Realtime,
    /// Outbound HTTP (webhooks, stream client)
    Network,
    /// Configuration and validation errors
    Config,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduling => "scheduling",
            Self::Storage => "storage",
            Self::Realtime => "realtime",
            Self::Network => "network",
            Self::Config => "config",
            Self::Other => "other",
        }
    }
}

/// Unified error type for the shiftboard crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    /// Notification or webhook channel errors
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Realtime subscription client errors
    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl ShiftboardErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Scheduler(e) => e.is_recoverable(),
            Self::Store(e) => matches!(e, StoreError::Backend(_) | StoreError::Io(_)),
            Self::Broker(e) => matches!(e, BrokerError::Relay(_)),
            Self::Relay(e) => !matches!(e, RelayError::Serialization(_)),
            Self::Channel(e) => matches!(e, ChannelError::HttpError(_)),
            Self::Client(e) => matches!(
                e,
                ClientError::NetworkError(_) | ClientError::StreamError(_)
            ),
            Self::Server(e) => matches!(e, ServerError::BindError(_)),
            Self::Io(_) => true,
            Self::Json(_) => false,
            Self::Config(_) => false,
            Self::Other { .. } => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Scheduler(SchedulerError::Storage(_)) | Self::Store(_) | Self::Io(_) => {
                ErrorCategory::Storage
            }
            Self::Scheduler(_) => ErrorCategory::Scheduling,
            Self::Broker(_) | Self::Relay(_) => ErrorCategory::Realtime,
            Self::Channel(ChannelError::InvalidConfig(_)) => ErrorCategory::Config,
            Self::Channel(_) | Self::Client(_) => ErrorCategory::Network,
            Self::Server(ServerError::ConfigError(_)) | Self::Config(_) => ErrorCategory::Config,
            Self::Server(_) => ErrorCategory::Network,
            Self::Json(_) | Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: format!("{err:#}"),
            source: None,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
