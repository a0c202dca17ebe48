//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to
//! handle the kinds of errors that can occur, from registry misconfiguration to
//! hardware write failures in the middle of a run.
//!
//! ## Error Hierarchy
//!
//! - **Registry errors** (`DuplicateChannel`, `UnknownChannel`, `TypeMismatch`,
//!   `ChannelAccessDenied`): permanent configuration errors. Never retried.
//! - **Endpoint errors** (`Endpoint`): a live or simulated endpoint refused or
//!   failed a read/write. Aborts the active run.
//! - **Plan construction errors** (`SourceNotFound`, `EmptyPlan`, `InvalidPlan`):
//!   surfaced before any hardware write, so a bad plan never partially executes.
//! - **Run errors** (`RunFailed`, `RunInProgress`): a run aborted at a given
//!   step (carrying the partial summary), or a second run tried to start while
//!   the registry was busy.
//! - **Configuration errors** (`Config`, `Configuration`) and plain `Io`.
//!
//! Per-row parse failures in an action table are not errors; they are reported
//! as `SkippedRow` diagnostics by the plan loader.

use std::path::PathBuf;

use thiserror::Error;

use crate::experiment::document::RunSummary;
use crate::hardware::capabilities::{ChannelValue, ValueType};

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Every error the library raises.
#[derive(Error, Debug)]
pub enum DaqError {
    /// A channel name was registered twice.
    #[error("Channel '{0}' is already registered")]
    DuplicateChannel(String),

    /// No channel with this name is registered.
    #[error("Unknown channel '{0}'")]
    UnknownChannel(String),

    /// The value cannot be coerced to the channel's declared type.
    #[error("Type mismatch on channel '{channel}': expected {expected}, got {value}")]
    TypeMismatch {
        /// Channel name
        channel: String,
        /// Declared type
        expected: ValueType,
        /// Rejected value
        value: ChannelValue,
    },

    /// The channel does not allow this operation.
    #[error("Channel '{channel}' does not permit {operation}")]
    ChannelAccessDenied {
        /// Channel name
        channel: String,
        /// "read" or "write"
        operation: &'static str,
    },

    /// The endpoint failed a read or write.
    #[error("Endpoint error on channel '{channel}': {message}")]
    Endpoint {
        /// Channel name
        channel: String,
        /// Endpoint error, rendered with its context chain
        message: String,
    },

    /// The plan source could not be opened or read.
    #[error("Action source '{}' could not be read: {source}", path.display())]
    SourceNotFound {
        /// Path that was tried
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The plan would contain no actions.
    #[error("Plan has no actions: {0}")]
    EmptyPlan(String),

    /// The plan source is malformed as a whole.
    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    /// A run aborted part way through.
    #[error("Run failed at step {step}: {source}")]
    RunFailed {
        /// 0-based index of the failed action
        step: usize,
        /// Error that aborted the run
        #[source]
        source: Box<DaqError>,
        /// Partial summary, rest state already applied
        summary: Box<RunSummary>,
    },

    /// `try_run` found another run holding the registry.
    #[error("Another run is already in progress on this registry")]
    RunInProgress,

    /// Configuration could not be extracted.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Configuration was extracted but failed validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Plain I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DaqError {
    /// Errors raised while building a plan, before any hardware was touched.
    pub fn is_construction_error(&self) -> bool {
        matches!(
            self,
            DaqError::SourceNotFound { .. } | DaqError::EmptyPlan(_) | DaqError::InvalidPlan(_)
        )
    }

    /// Partial run summary for an aborted run.
    pub fn run_summary(&self) -> Option<&RunSummary> {
        match self {
            DaqError::RunFailed { summary, .. } => Some(summary),
            _ => None,
        }
    }

    pub(crate) fn endpoint(channel: &str, message: impl Into<String>) -> Self {
        DaqError::Endpoint {
            channel: channel.to_string(),
            message: message.into(),
        }
    }
}
