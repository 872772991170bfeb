//! Error types for board operations
//!
//! Errors are classified by recoverability:
//! - Retryable: store busy/locked, identity provider unreachable
//! - NonRetryable: missing documents, invalid input, permission denials, bad config
//! - RequiresUserAction: not signed in, database not initialized

use thiserror::Error;

use crate::db::DbError;

#[derive(Debug, Error)]
pub enum BoardError {
    // Retryable errors
    #[error("Database error: {0}")]
    Store(#[from] DbError),

    #[error("Identity provider error: {0}")]
    Identity(String),

    // Non-retryable errors
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // Requires user action
    #[error("You must be signed in to do that")]
    NotSignedIn,

    #[error("Database unavailable: {0}")]
    Unavailable(String),
}

impl BoardError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        BoardError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn permission(message: impl Into<String>) -> Self {
        BoardError::PermissionDenied(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        BoardError::Validation(message.into())
    }

    /// Returns true if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            BoardError::Store(e) => e.is_busy(),
            BoardError::Identity(_) => true,
            _ => false,
        }
    }

    /// Returns true if this error requires user action to resolve
    pub fn requires_user_action(&self) -> bool {
        matches!(self, BoardError::NotSignedIn | BoardError::Unavailable(_))
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            BoardError::Store(DbError::InvalidCursor(_)) => "invalid_cursor",
            BoardError::Store(_) => "store",
            BoardError::Identity(_) => "identity",
            BoardError::NotFound { .. } => "not_found",
            BoardError::PermissionDenied(_) => "permission_denied",
            BoardError::Validation(_) => "validation",
            BoardError::Config(_) => "config",
            BoardError::NotSignedIn => "not_signed_in",
            BoardError::Unavailable(_) => "unavailable",
        }
    }

    /// Get a user-friendly recovery suggestion
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            BoardError::Store(DbError::InvalidCursor(_)) => "Reload the list from the first page.",
            BoardError::Store(e) if e.is_busy() => "The board is busy. Try again in a moment.",
            BoardError::Store(_) => "Check the database file and disk space.",
            BoardError::Identity(_) => "Check your internet connection and sign in again.",
            BoardError::NotFound { .. } => "It may have been deleted. Refresh and try again.",
            BoardError::PermissionDenied(_) => "Ask an administrator for access.",
            BoardError::Validation(_) => "Correct the highlighted fields and resubmit.",
            BoardError::Config(_) => "Check ~/.featureboard/config.json for syntax errors.",
            BoardError::NotSignedIn => "Sign in and try again.",
            BoardError::Unavailable(_) => {
                "Check the database path in ~/.featureboard/config.json"
            }
        }
    }
}

impl From<rusqlite::Error> for BoardError {
    fn from(err: rusqlite::Error) -> Self {
        BoardError::Store(DbError::Sqlite(err))
    }
}

/// Serializable error representation returned by commands
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandError {
    pub message: String,
    pub code: &'static str,
    pub error_type: ErrorType,
    pub can_retry: bool,
    pub recovery_suggestion: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorType {
    Retryable,
    NonRetryable,
    RequiresUserAction,
}

impl From<&BoardError> for CommandError {
    fn from(err: &BoardError) -> Self {
        let error_type = if err.requires_user_action() {
            ErrorType::RequiresUserAction
        } else if err.is_retryable() {
            ErrorType::Retryable
        } else {
            ErrorType::NonRetryable
        };

        CommandError {
            message: err.to_string(),
            code: err.code(),
            error_type,
            can_retry: err.is_retryable(),
            recovery_suggestion: err.recovery_suggestion().to_string(),
        }
    }
}

impl From<BoardError> for CommandError {
    fn from(err: BoardError) -> Self {
        CommandError::from(&err)
    }
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}
