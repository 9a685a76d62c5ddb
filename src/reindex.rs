//! Search index rebuild trigger
//!
//! Indexing itself belongs to the host application. The engine only asks for a
//! rebuild after the data directory moved, or when the host requests one.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::SyncError;
use crate::executor::CommandExecutor;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Reindexer: Send + Sync {
    /// Rebuild the index for the documents under `data_dir`
    async fn reindex(&self, data_dir: &Path) -> Result<(), SyncError>;
}

/// Used when the host has no index to rebuild
#[derive(Debug, Default, Clone)]
pub struct NoopReindexer;

#[async_trait]
impl Reindexer for NoopReindexer {
    async fn reindex(&self, data_dir: &Path) -> Result<(), SyncError> {
        info!("No reindex command configured, skipping reindex of {}", data_dir.display());
        Ok(())
    }
}

/// Runs a configured command inside the data directory
pub struct CommandReindexer {
    executor: Arc<dyn CommandExecutor>,
    program: String,
    args: Vec<String>,
}

impl std::fmt::Debug for CommandReindexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandReindexer")
            .field("program", &self.program)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

impl CommandReindexer {
    /// Split `command_line` on whitespace into program and arguments
    pub fn parse(executor: Arc<dyn CommandExecutor>, command_line: &str) -> Result<Self, SyncError> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| SyncError::Validation("reindex command is empty".to_string()))?;
        Ok(Self {
            executor,
            program,
            args: parts.collect(),
        })
    }
}

#[async_trait]
impl Reindexer for CommandReindexer {
    async fn reindex(&self, data_dir: &Path) -> Result<(), SyncError> {
        info!("Reindexing {} with `{}`", data_dir.display(), self.program);
        let output = self
            .executor
            .run(data_dir, &self.program, &self.args)
            .await
            .map_err(|e| SyncError::Reindex(e.to_string()))?;

        if !output.success() {
            warn!("Reindex command failed: {}", output.summary());
            return Err(SyncError::Reindex(output.summary()));
        }
        Ok(())
    }
}
