use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::model::ParseEnumError;
use crate::remote::RemoteError;
use crate::status::Status;

/// Machine-readable error codes for agent-friendly decision making.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotInitialized,
    ConfigParseError,
    NotAuthenticated,
    NoProjectSelected,
    PermissionDenied,
    RecordNotFound,
    InvalidStatusTransition,
    ValidationFailed,
    InvalidEnumValue,
    DuplicateRecord,
    RemoteTimeout,
    RemoteUnavailable,
    RemoteRejected,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NotInitialized => "E1001",
            Self::ConfigParseError => "E1002",
            Self::NotAuthenticated => "E1003",
            Self::NoProjectSelected => "E1004",
            Self::PermissionDenied => "E1005",
            Self::RecordNotFound => "E2001",
            Self::InvalidStatusTransition => "E2002",
            Self::ValidationFailed => "E2003",
            Self::InvalidEnumValue => "E2004",
            Self::DuplicateRecord => "E3001",
            Self::RemoteTimeout => "E5001",
            Self::RemoteUnavailable => "E5002",
            Self::RemoteRejected => "E5003",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::NotInitialized => "Workspace not initialized",
            Self::ConfigParseError => "Config file parse error",
            Self::NotAuthenticated => "No signed-in user",
            Self::NoProjectSelected => "No project selected",
            Self::PermissionDenied => "Admin rights required",
            Self::RecordNotFound => "Record not found",
            Self::InvalidStatusTransition => "Invalid status transition",
            Self::ValidationFailed => "Validation failed",
            Self::InvalidEnumValue => "Invalid status/priority/category value",
            Self::DuplicateRecord => "Record already exists",
            Self::RemoteTimeout => "Remote store timed out",
            Self::RemoteUnavailable => "Remote store unavailable",
            Self::RemoteRejected => "Remote store rejected the request",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators and agents.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::NotInitialized => Some("Run `td init` to initialize this directory."),
            Self::ConfigParseError => Some("Fix syntax in .taskdeck/config.toml and retry."),
            Self::NotAuthenticated => Some("Pass --user, set TASKDECK_USER, or set `user` in config."),
            Self::NoProjectSelected => Some("Run `td project use <code>` or pass --project."),
            Self::PermissionDenied => Some("Ask a project admin to run this command."),
            Self::RecordNotFound => None,
            Self::InvalidStatusTransition => {
                Some("Done tasks need an explicit `td task confirm <id> revert|delete`.")
            }
            Self::ValidationFailed => Some("Fix the named field and retry."),
            Self::InvalidEnumValue => {
                Some("Use one of the documented status/priority/category values.")
            }
            Self::DuplicateRecord => None,
            Self::RemoteTimeout => Some("Retry once the remote store responds again."),
            Self::RemoteUnavailable => Some("Check the remote store and retry."),
            Self::RemoteRejected => Some("The request violates a store constraint; adjust input."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Errors surfaced by the session, membership, and task layers.
#[derive(Debug, thiserror::Error)]
pub enum TaskDeckError {
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("{operation} timed out after {waited:?}")]
    Timeout {
        operation: &'static str,
        waited: Duration,
    },

    #[error("{operation} failed after {attempts} attempt(s): {source}")]
    Transient {
        operation: &'static str,
        attempts: u32,
        #[source]
        source: RemoteError,
    },

    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("cannot move task from {from} to {to}: {reason}")]
    InvalidTransition {
        from: Status,
        to: Status,
        reason: &'static str,
    },

    #[error("workspace not initialized at {}", .0.display())]
    NotInitialized(PathBuf),

    #[error("no acting user: {0}")]
    NotAuthenticated(String),

    #[error("no project selected")]
    NoProjectSelected,

    #[error("{actor} may not {action}")]
    Forbidden { actor: String, action: String },

    #[error("{entity} already exists: {detail}")]
    Conflict { entity: &'static str, detail: String },

    #[error("remote store rejected {operation}: {detail}")]
    Rejected {
        operation: &'static str,
        detail: String,
    },

    #[error(transparent)]
    Parse(#[from] ParseEnumError),
}

impl TaskDeckError {
    /// Shorthand for a validation failure on `field`.
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }

    /// Wrap a remote failure that happened during `operation`.
    #[must_use]
    pub fn from_remote(operation: &'static str, attempts: u32, err: RemoteError) -> Self {
        match err {
            RemoteError::NotFound { entity, id } => Self::NotFound { entity, id },
            RemoteError::Duplicate { entity, detail } => Self::Conflict { entity, detail },
            RemoteError::Rejected(detail) => Self::Rejected { operation, detail },
            err @ RemoteError::Transient(_) => Self::Transient {
                operation,
                attempts,
                source: err,
            },
        }
    }

    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound { .. } => ErrorCode::RecordNotFound,
            Self::Timeout { .. } => ErrorCode::RemoteTimeout,
            Self::Transient { .. } => ErrorCode::RemoteUnavailable,
            Self::Validation { .. } => ErrorCode::ValidationFailed,
            Self::InvalidTransition { .. } => ErrorCode::InvalidStatusTransition,
            Self::NotInitialized(_) => ErrorCode::NotInitialized,
            Self::NotAuthenticated(_) => ErrorCode::NotAuthenticated,
            Self::NoProjectSelected => ErrorCode::NoProjectSelected,
            Self::Forbidden { .. } => ErrorCode::PermissionDenied,
            Self::Conflict { .. } => ErrorCode::DuplicateRecord,
            Self::Rejected { .. } => ErrorCode::RemoteRejected,
            Self::Parse(_) => ErrorCode::InvalidEnumValue,
        }
    }

    /// Optional remediation hint for operators and agents.
    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }

    /// True for `NotFound`, which callers treat as an expected empty result.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
