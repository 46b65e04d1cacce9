use thiserror::Error;

use crate::field::ScheduleField;

/// Errors that can occur while declaring or reconciling cron jobs.
#[derive(Debug, Error)]
pub enum CronError {
    /// A schedule field value is outside its domain or is not a recognised alias.
    #[error("Invalid {field} value {value:?}: {reason}")]
    Validation {
        field: ScheduleField,
        value: String,
        reason: String,
    },

    /// An identity name contains characters other than letters, digits, `-` and `_`.
    #[error("Invalid cron name {name:?}: only letters, digits, '-' and '_' are allowed")]
    InvalidName { name: String },

    /// A command that cannot be written back as the tail of one schedule line.
    #[error("Invalid command {command:?}: {reason}")]
    InvalidCommand {
        command: String,
        reason: &'static str,
    },

    /// An environment line that is not a single `NAME = value` assignment.
    #[error("Invalid environment line {line:?}: expected a single NAME = value assignment")]
    InvalidEnvironment { line: String },

    /// A declared job was built without a required attribute.
    #[error("Missing required attribute: {0}")]
    MissingAttribute(&'static str),

    /// A batch for one user contained an entry owned by someone else.
    #[error("Entry belongs to user {found}, expected {expected}")]
    UserMismatch { expected: String, found: String },

    /// A batch declared the same identity name twice.
    #[error("Cron name {name:?} is declared more than once")]
    DuplicateName { name: String },

    /// The user has no schedule document and the backend requires one.
    #[error("No crontab for user {user}")]
    NotFound { user: String },

    /// The backend refused to read or write the user's document.
    #[error("Access denied to crontab of {user}: {reason}")]
    AccessDenied { user: String, reason: String },

    /// Any other backend failure, e.g. the crontab program exiting non-zero.
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CronError {
    /// Short, stable error code for machine-readable output.
    pub fn code(&self) -> &'static str {
        match self {
            CronError::Validation { .. } => "VALIDATION_ERROR",
            CronError::InvalidName { .. } => "NAME_ERROR",
            CronError::InvalidCommand { .. } => "INVALID_COMMAND",
            CronError::InvalidEnvironment { .. } => "INVALID_ENVIRONMENT",
            CronError::MissingAttribute(_) => "MISSING_ATTRIBUTE",
            CronError::UserMismatch { .. } => "USER_MISMATCH",
            CronError::DuplicateName { .. } => "DUPLICATE_NAME",
            CronError::NotFound { .. } => "NOT_FOUND",
            CronError::AccessDenied { .. } => "ACCESS_DENIED",
            CronError::Backend(_) => "BACKEND_ERROR",
            CronError::Io(_) => "IO_ERROR",
        }
    }

    pub(crate) fn validation(
        field: ScheduleField,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        CronError::Validation {
            field,
            value: value.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CronError>;
