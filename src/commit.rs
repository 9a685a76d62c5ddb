use chrono::{DateTime, Local};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::git::{CommitOutcome, GitClient, WorkingTreeStatus};

/// Who started the pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Timer tick; honours the auto-commit policy
    Scheduled,
    /// User request; always commits
    Manual,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Scheduled => "scheduled",
            Trigger::Manual => "manual",
        }
    }
}

/// Result of trying to commit pending changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitStep {
    Committed { files_changed: usize },
    NothingToCommit,
    /// Auto-commit is off for scheduled passes
    Skipped { pending: usize },
}

/// Hook producing commit messages
pub trait CommitMessagePolicy: Send + Sync {
    fn message(&self, tree: &WorkingTreeStatus, now: DateTime<Local>) -> String;
}

/// Subject with the file count and timestamp, body listing the first paths
#[derive(Debug, Clone)]
pub struct TimestampedMessage {
    pub max_listed: usize,
}

impl Default for TimestampedMessage {
    fn default() -> Self {
        Self { max_listed: 10 }
    }
}

impl CommitMessagePolicy for TimestampedMessage {
    fn message(&self, tree: &WorkingTreeStatus, now: DateTime<Local>) -> String {
        let paths = tree.changed_paths();
        let noun = if paths.len() == 1 { "file" } else { "files" };
        let mut message = format!(
            "Sync: {} {} changed ({})",
            paths.len(),
            noun,
            now.format("%Y-%m-%d %H:%M:%S")
        );

        if !paths.is_empty() {
            message.push_str("\n\n");
            for path in paths.iter().take(self.max_listed) {
                message.push_str("- ");
                message.push_str(path);
                message.push('\n');
            }
            if paths.len() > self.max_listed {
                message.push_str(&format!("- ... and {} more\n", paths.len() - self.max_listed));
            }
        }

        message
    }
}

/// Stages and commits pending changes when policy allows
#[derive(Clone)]
pub struct CommitOrchestrator {
    git: GitClient,
    policy: Arc<dyn CommitMessagePolicy>,
}

impl CommitOrchestrator {
    pub fn new(git: GitClient, policy: Arc<dyn CommitMessagePolicy>) -> Self {
        Self { git, policy }
    }

    pub async fn commit_pending(
        &self,
        path: &Path,
        tree: &WorkingTreeStatus,
        trigger: Trigger,
        policy: &SyncConfig,
    ) -> Result<CommitStep, SyncError> {
        if tree.is_clean() {
            return Ok(CommitStep::NothingToCommit);
        }
        let pending = tree.changed_paths().len();

        if trigger == Trigger::Scheduled && !policy.auto_commit {
            debug!("Auto-commit disabled, leaving {} pending change(s)", pending);
            return Ok(CommitStep::Skipped { pending });
        }

        self.git.add_all(path).await?;
        let message = self.policy.message(tree, Local::now());

        match self.git.commit(path, &message).await? {
            CommitOutcome::Committed => {
                info!("Committed {} file(s) in {}", pending, path.display());
                Ok(CommitStep::Committed { files_changed: pending })
            }
            CommitOutcome::NothingToCommit => Ok(CommitStep::NothingToCommit),
        }
    }

    /// Conclude a pending merge after the user removed all markers
    pub async fn conclude_merge(&self, path: &Path, tree: &WorkingTreeStatus) -> Result<CommitStep, SyncError> {
        self.git.add_all(path).await?;
        let message = format!(
            "Merge remote changes ({} file(s) resolved)",
            tree.changed_paths().len()
        );
        match self.git.commit(path, &message).await? {
            CommitOutcome::Committed => Ok(CommitStep::Committed {
                files_changed: tree.changed_paths().len(),
            }),
            CommitOutcome::NothingToCommit => Ok(CommitStep::NothingToCommit),
        }
    }
}
