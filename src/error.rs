//! Error types for Scrapeflow.
//!
//! Two layers of errors exist:
//! - [`ScrapeflowError`] for engine-level failures (configuration, storage, pool, queue).
//! - [`ActionError`] for failures raised while a pipeline tree is being interpreted,
//!   carrying a [`Severity`] that decides how far the failure propagates.

use std::{io::ErrorKind, string::FromUtf8Error};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for all Scrapeflow operations.
///
/// Each variant represents a specific category of error that can occur
/// while loading pipelines, running them, or talking to collaborators.
#[derive(Deserialize, Serialize, Error, Debug, Clone, PartialEq)]
pub enum ScrapeflowError {
    /// Engine-level errors (startup, shutdown, wiring).
    #[error("{0}")]
    Engine(String),

    /// Configuration parsing or validation errors.
    #[error("{0}")]
    Config(String),

    /// Data conversion errors (JSON, YAML, TOML).
    #[error("{0}")]
    Convert(String),

    /// Runtime execution errors.
    #[error("{0}")]
    Runtime(String),

    /// Storage operation errors.
    #[error("{0}")]
    Store(String),

    /// Pipeline definition errors (unknown kinds, malformed trees).
    #[error("{0}")]
    Pipeline(String),

    /// Action configuration errors.
    #[error("{0}")]
    Action(String),

    /// Worker pool errors.
    #[error("{0}")]
    Pool(String),

    /// Message queue errors.
    #[error("{0}")]
    Queue(String),

    /// Report merge errors.
    #[error("{0}")]
    Merge(String),

    /// HTTP fetch errors.
    #[error("{0}")]
    Fetch(String),

    /// Browser driver errors.
    #[error("{0}")]
    Browser(String),

    /// Mail delivery errors.
    #[error("{0}")]
    Mail(String),

    /// I/O operation errors.
    #[error("{0}")]
    IoError(String),
}

impl From<ScrapeflowError> for String {
    fn from(val: ScrapeflowError) -> Self {
        val.to_string()
    }
}

impl From<std::io::Error> for ScrapeflowError {
    fn from(error: std::io::Error) -> Self {
        ScrapeflowError::IoError(error.to_string())
    }
}

impl From<ScrapeflowError> for std::io::Error {
    fn from(val: ScrapeflowError) -> Self {
        #[allow(clippy::io_other_error)]
        std::io::Error::new(ErrorKind::Other, val.to_string())
    }
}

impl From<FromUtf8Error> for ScrapeflowError {
    fn from(_: FromUtf8Error) -> Self {
        ScrapeflowError::Runtime("Error with utf-8 string convert".to_string())
    }
}

impl From<serde_json::Error> for ScrapeflowError {
    fn from(error: serde_json::Error) -> Self {
        ScrapeflowError::Convert(error.to_string())
    }
}

impl From<serde_yaml::Error> for ScrapeflowError {
    fn from(error: serde_yaml::Error) -> Self {
        ScrapeflowError::Convert(error.to_string())
    }
}

impl From<toml::de::Error> for ScrapeflowError {
    fn from(error: toml::de::Error) -> Self {
        ScrapeflowError::Config(error.to_string())
    }
}

impl From<regex::Error> for ScrapeflowError {
    fn from(error: regex::Error) -> Self {
        ScrapeflowError::Action(error.to_string())
    }
}

impl From<jsonschema::ValidationError<'_>> for ScrapeflowError {
    fn from(error: jsonschema::ValidationError<'_>) -> Self {
        ScrapeflowError::Action(error.to_string())
    }
}

/// Classification of a failure raised inside a pipeline.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr, strum::EnumString, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Severity {
    /// Unrecoverable; terminates the whole run.
    Fatal,
    /// Recorded, persisted as an error marker, escalated to `Abort`.
    Error,
    /// Recorded and persisted as a warning marker; execution continues.
    Warning,
    /// Recorded only.
    Info,
    /// Terminates the current sub-tree unless an enclosing boundary swallows it.
    Abort,
}

/// A failure travelling up the action tree.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ActionError {
    /// A classified failure raised by an action.
    #[error("{severity}: {message}")]
    Raised {
        severity: Severity,
        message: String,
    },

    /// User-requested stop. Never swallowed by a boundary.
    #[error("process aborted")]
    ProcessAbort,

    /// Anything that was not classified at the raise site.
    #[error("{0}")]
    Unexpected(String),
}

impl ActionError {
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::raised(Severity::Fatal, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::raised(Severity::Error, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::raised(Severity::Warning, message)
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::raised(Severity::Info, message)
    }

    pub fn abort(message: impl Into<String>) -> Self {
        Self::raised(Severity::Abort, message)
    }

    pub fn raised(
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self::Raised {
            severity,
            message: message.into(),
        }
    }

    /// Returns the severity for classified failures.
    pub fn severity(&self) -> Option<Severity> {
        match self {
            ActionError::Raised {
                severity,
                ..
            } => Some(*severity),
            _ => None,
        }
    }
}

impl From<ScrapeflowError> for ActionError {
    fn from(error: ScrapeflowError) -> Self {
        ActionError::Unexpected(error.to_string())
    }
}

impl From<serde_json::Error> for ActionError {
    fn from(error: serde_json::Error) -> Self {
        ActionError::Unexpected(error.to_string())
    }
}
