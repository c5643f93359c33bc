use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::types::{PermissionLevel, SnapshotStatus};

/// Entity kinds that can be missing or guarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    File,
    Workspace,
    Organization,
    Group,
    User,
    Invitation,
    Snapshot,
    Task,
}

impl Entity {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Workspace => "workspace",
            Self::Organization => "organization",
            Self::Group => "group",
            Self::User => "user",
            Self::Invitation => "invitation",
            Self::Snapshot => "snapshot",
            Self::Task => "task",
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("{0} not found")]
    NotFound(Entity),

    #[error("user is missing the {1} permission on the {0}")]
    MissingPermission(Entity, PermissionLevel),

    #[error("forbidden: {message}")]
    Forbidden { code: &'static str, message: String },

    #[error("bad request: {message}")]
    BadRequest { code: &'static str, message: String },

    #[error("conflict: {message}")]
    Conflict { code: &'static str, message: String },

    #[error("snapshot status conflict: expected {expected}, found {actual}")]
    StatusConflict {
        expected: SnapshotStatus,
        actual: SnapshotStatus,
    },

    #[error("object storage error: {0}")]
    S3(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("search error: {0}")]
    Search(String),

    #[error("remote service error: {0}")]
    Remote(String),

    /// An error envelope returned by another voltcore service.
    #[error("{message}")]
    Api {
        status: u16,
        code: String,
        message: String,
        user_message: String,
    },

    #[error("command timed out after {:?}", .0)]
    Timeout(Duration),

    #[error("command failed: {0}")]
    Command(String),

    #[error("snapshot {0} is already being processed")]
    AlreadyProcessing(String),

    #[error("task {0} was cancelled")]
    Cancelled(String),

    #[error("service is shutting down")]
    Unavailable,

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    #[must_use]
    pub fn forbidden(code: &'static str, message: impl Into<String>) -> Self {
        Self::Forbidden {
            code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::BadRequest {
            code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        Self::Conflict {
            code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn similar_name_exists() -> Self {
        Self::conflict(
            "file_with_similar_name_exists",
            "a file with a similar name already exists",
        )
    }

    /// Stable machine readable code.
    #[must_use]
    pub fn code(&self) -> String {
        match self {
            Self::Database(_) | Self::Io(_) | Self::Serialization(_) | Self::Internal(_) => {
                "internal_server_error".to_string()
            }
            Self::Config(_) => "invalid_configuration".to_string(),
            Self::Unauthorized => "unauthorized".to_string(),
            Self::NotFound(entity) => format!("{entity}_not_found"),
            Self::MissingPermission(entity, _) => format!("missing_{entity}_permission"),
            Self::Forbidden { code, .. }
            | Self::BadRequest { code, .. }
            | Self::Conflict { code, .. } => (*code).to_string(),
            Self::StatusConflict { .. } => "snapshot_status_conflict".to_string(),
            Self::S3(_) => "s3_error".to_string(),
            Self::Cache(_) => "cache_error".to_string(),
            Self::Search(_) => "search_error".to_string(),
            Self::Remote(_) => "remote_service_error".to_string(),
            Self::Api { code, .. } => code.clone(),
            Self::Timeout(_) => "timeout".to_string(),
            Self::Command(_) => "command_failed".to_string(),
            Self::AlreadyProcessing(_) => "already_processing".to_string(),
            Self::Cancelled(_) => "task_cancelled".to_string(),
            Self::Unavailable => "service_unavailable".to_string(),
        }
    }

    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::Unauthorized => 401,
            Self::NotFound(_) => 404,
            Self::MissingPermission(..) | Self::Forbidden { .. } => 403,
            Self::BadRequest { .. } => 400,
            Self::Conflict { .. } | Self::StatusConflict { .. } | Self::AlreadyProcessing(_) => {
                409
            }
            Self::Unavailable => 503,
            Self::Api { status, .. } => *status,
            _ => 500,
        }
    }

    /// Message that is safe to show to end users.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::NotFound(entity) => format!("The {entity} could not be found."),
            Self::MissingPermission(entity, level) => {
                format!("You need the {level} permission on this {entity}.")
            }
            Self::Unauthorized => "Authentication is required.".to_string(),
            Self::Forbidden { message, .. }
            | Self::BadRequest { message, .. }
            | Self::Conflict { message, .. } => capitalize(message),
            Self::StatusConflict { .. } => "The snapshot was modified concurrently.".to_string(),
            Self::AlreadyProcessing(_) => "The snapshot is already being processed.".to_string(),
            Self::Cancelled(_) => "Processing was cancelled.".to_string(),
            Self::Api { user_message, .. } => user_message.clone(),
            Self::Unavailable => "The service is unavailable.".to_string(),
            _ => "An internal error has occurred.".to_string(),
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Api { status: 404, .. })
    }
}

fn capitalize(message: &str) -> String {
    let mut chars = message.chars();
    match chars.next() {
        Some(first) => {
            let mut out: String = first.to_uppercase().collect();
            out.push_str(chars.as_str());
            if !out.ends_with('.') {
                out.push('.');
            }
            out
        }
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_code_and_status() {
        let err = Error::NotFound(Entity::File);
        assert_eq!(err.code(), "file_not_found");
        assert_eq!(err.status(), 404);
    }

    #[test]
    fn test_missing_permission_is_forbidden() {
        let err = Error::MissingPermission(Entity::Workspace, PermissionLevel::Editor);
        assert_eq!(err.code(), "missing_workspace_permission");
        assert_eq!(err.status(), 403);
        assert!(err.user_message().contains("editor"));
    }

    #[test]
    fn test_internal_errors_are_sanitized() {
        let err = Error::Internal("connection refused to 10.0.0.3".into());
        assert_eq!(err.status(), 500);
        assert!(!err.user_message().contains("10.0.0.3"));
    }

    #[test]
    fn test_similar_name_code() {
        let err = Error::similar_name_exists();
        assert_eq!(err.code(), "file_with_similar_name_exists");
        assert_eq!(err.status(), 409);
    }
}
