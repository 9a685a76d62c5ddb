//! Error taxonomy surfaced to the host layer
//!
//! Every variant carries a stable code (see [`SyncError::code`]) and a
//! human-readable message. Conflicts and failed pushes are not errors: they are
//! reported as [`SyncStatus`](crate::status::SyncStatus) values inside a
//! successful [`SyncResult`](crate::status::SyncResult).

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors produced by the synchronization engine
#[derive(Error, Debug)]
pub enum SyncError {
    /// Bad migration target or bad configuration values
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not a git repository: {}", .0.display())]
    NotARepository(PathBuf),

    /// The version-control tool could not be started at all
    #[error("Git is not available: {0}")]
    ToolUnavailable(String),

    #[error("{operation} failed: {message}")]
    Network {
        operation: &'static str,
        message: String,
    },

    #[error("Commit failed: {0}")]
    Commit(String),

    #[error("Git command failed: {0}")]
    GitCommand(String),

    #[error("`{command}` timed out after {}s", .after.as_secs())]
    Timeout { command: String, after: Duration },

    /// Another sync pass or a migration holds the exclusive-run guard
    #[error("A sync pass is already running")]
    AlreadySyncing,

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Reindex failed: {0}")]
    Reindex(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// The history database could not be opened, read or written
    #[error("History error: {0}")]
    History(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Stable identifier for the host boundary
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::Validation(_) => "VALIDATION_ERROR",
            SyncError::NotARepository(_) => "NOT_A_REPOSITORY",
            SyncError::ToolUnavailable(_) => "TOOL_UNAVAILABLE",
            SyncError::Network { .. } => "NETWORK_ERROR",
            SyncError::Commit(_) => "COMMIT_FAILED",
            SyncError::GitCommand(_) => "GIT_COMMAND_FAILED",
            SyncError::Timeout { .. } => "TIMEOUT",
            SyncError::AlreadySyncing => "ALREADY_SYNCING",
            SyncError::Migration(_) => "MIGRATION_ERROR",
            SyncError::Reindex(_) => "REINDEX_FAILED",
            SyncError::Config(_) => "CONFIG_ERROR",
            SyncError::History(_) => "HISTORY_ERROR",
            SyncError::Io(_) => "IO_ERROR",
        }
    }

    pub fn history(err: anyhow::Error) -> SyncError {
        SyncError::History(format!("{:#}", err))
    }

    /// Wrap a failure that happened after migration validation passed
    pub fn into_migration(self) -> SyncError {
        match self {
            SyncError::Migration(_) | SyncError::AlreadySyncing => self,
            other => SyncError::Migration(other.to_string()),
        }
    }
}

impl From<anyhow::Error> for SyncError {
    fn from(err: anyhow::Error) -> Self {
        SyncError::Config(format!("{:#}", err))
    }
}
