//! Sync Engine - runs one sync pass at a time against the journal repository
//!
//! A full pass goes preflight, pull, classify, commit, push, finalize. Every step
//! may end the pass early with a terminal [`SyncResult`]. The separate pull
//! and push passes run only their own step inside the same preflight and
//! classify framing.

use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::commit::{CommitMessagePolicy, CommitOrchestrator, CommitStep, TimestampedMessage, Trigger};
use crate::config::ConfigStore;
use crate::conflict::{ConflictDetector, ConflictReport, MarkerConflictDetector};
use crate::error::SyncError;
use crate::git::{GitClient, Remote, RemoteOutcome, WorkingTreeStatus};
use crate::guard::{SyncGuard, SyncPermit};
use crate::notify::{NoticeLevel, Notifier};
use crate::state::{History, Operation, SyncEventBuilder};
use crate::status::{classify, PassFacts, SyncResult, SyncStatus};

/// Orchestrates sync passes; cheap to clone, all clones share one guard
#[derive(Clone)]
pub struct SyncEngine {
    git: GitClient,
    committer: CommitOrchestrator,
    detector: Arc<dyn ConflictDetector>,
    config: ConfigStore,
    guard: SyncGuard,
    notifier: Arc<dyn Notifier>,
    history: Option<History>,
}

/// Mutable bookkeeping for one pass
#[derive(Default)]
struct Pass {
    facts: PassFacts,
    files_changed: Option<usize>,
    notes: Vec<String>,
    /// Set when the pull step failed; surfaces as the error if nothing else happened
    pull_error: Option<SyncError>,
}

impl Pass {
    fn note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }

    fn finish(self, default_message: &str) -> SyncResult {
        let status = classify(&self.facts);
        let mut parts = Vec::new();
        match (status, self.files_changed) {
            (SyncStatus::Committed, Some(n)) => parts.push(format!("{} file(s) committed", n)),
            (SyncStatus::Synced, Some(n)) => parts.push(format!("{} file(s) committed and pushed", n)),
            (SyncStatus::Synced, None) => parts.push("local commits pushed".to_string()),
            _ => {}
        }
        parts.extend(self.notes);
        if parts.is_empty() {
            parts.push(default_message.to_string());
        }
        SyncResult::new(status, Some(parts.join("; ")), self.files_changed)
    }
}

fn conflict_result(report: &ConflictReport) -> SyncResult {
    SyncResult::new(
        SyncStatus::Conflict,
        Some(report.describe()),
        (!report.files.is_empty()).then_some(report.files.len()),
    )
}

fn notice_level(status: SyncStatus) -> NoticeLevel {
    match status {
        SyncStatus::PushFailed | SyncStatus::Conflict => NoticeLevel::Error,
        SyncStatus::Committed | SyncStatus::Synced => NoticeLevel::Success,
        SyncStatus::NoChanges | SyncStatus::UpToDate => NoticeLevel::Info,
    }
}

impl SyncEngine {
    /// Create an engine with the default commit message and conflict policies
    pub fn new(git: GitClient, config: ConfigStore, guard: SyncGuard, notifier: Arc<dyn Notifier>) -> Self {
        let committer = CommitOrchestrator::new(git.clone(), Arc::new(TimestampedMessage::default()));
        Self {
            git,
            committer,
            detector: Arc::new(MarkerConflictDetector),
            config,
            guard,
            notifier,
            history: None,
        }
    }

    pub fn with_detector(mut self, detector: Arc<dyn ConflictDetector>) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_message_policy(mut self, policy: Arc<dyn CommitMessagePolicy>) -> Self {
        self.committer = CommitOrchestrator::new(self.git.clone(), policy);
        self
    }

    pub fn with_history(mut self, history: History) -> Self {
        self.history = Some(history);
        self
    }

    pub fn git(&self) -> &GitClient {
        &self.git
    }

    pub fn guard(&self) -> &SyncGuard {
        &self.guard
    }

    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    pub fn history(&self) -> Option<&History> {
        self.history.as_ref()
    }

    /// Manual full pass; rejected while another pass or a migration runs
    pub async fn sync_now(&self) -> Result<SyncResult, SyncError> {
        let permit = self.try_permit()?;
        self.run_pass(Trigger::Manual, &permit).await
    }

    /// Timer-driven full pass; `None` when the tick was dropped
    pub async fn scheduled_pass(&self) -> Option<Result<SyncResult, SyncError>> {
        let Some(permit) = self.guard.try_acquire() else {
            debug!("Sync pass already running, dropping scheduled tick");
            return None;
        };
        Some(self.run_pass(Trigger::Scheduled, &permit).await)
    }

    /// Manual pull-only pass
    pub async fn pull(&self) -> Result<SyncResult, SyncError> {
        let _permit = self.try_permit()?;
        let path = self.git.root().await;
        let outcome = self.pull_pass(&path).await;
        self.finish(Operation::Pull, Trigger::Manual, &path, &outcome).await;
        outcome
    }

    /// Manual push-only pass
    pub async fn push(&self) -> Result<SyncResult, SyncError> {
        let _permit = self.try_permit()?;
        let path = self.git.root().await;
        let outcome = self.push_pass(&path).await;
        self.finish(Operation::Push, Trigger::Manual, &path, &outcome).await;
        outcome
    }

    /// Full pass for a caller that already holds the guard
    pub async fn run_pass(&self, trigger: Trigger, _permit: &SyncPermit) -> Result<SyncResult, SyncError> {
        let path = self.git.root().await;
        info!("Starting {} sync pass in {}", trigger.as_str(), path.display());

        let outcome = self.full_pass(&path, trigger).await;
        match &outcome {
            Ok(result) => info!("Sync pass finished: {}", result),
            Err(e) => warn!("Sync pass failed: {}", e),
        }

        self.finish(Operation::Sync, trigger, &path, &outcome).await;
        outcome
    }

    fn try_permit(&self) -> Result<SyncPermit, SyncError> {
        self.guard.try_acquire().ok_or_else(|| {
            debug!("Rejecting manual request, a sync pass is already running");
            SyncError::AlreadySyncing
        })
    }

    /// Emit a notice and, when enabled, a history row
    pub(crate) async fn announce(&self, level: NoticeLevel, message: &str, event: SyncEventBuilder) {
        self.notifier.notify(level, message);
        if let Some(history) = &self.history {
            history.record(event).await;
        }
    }

    async fn finish(
        &self,
        operation: Operation,
        trigger: Trigger,
        path: &Path,
        outcome: &Result<SyncResult, SyncError>,
    ) {
        let event = SyncEventBuilder::new(operation, path).trigger(trigger.as_str());
        match outcome {
            Ok(result) => {
                let message = format!("{} {}", capitalize(operation.as_str()), result);
                self.announce(notice_level(result.status()), &message, event.result(result))
                    .await
            }
            Err(e) => {
                let message = format!("{} failed: {}", capitalize(operation.as_str()), e);
                self.announce(NoticeLevel::Error, &message, event.error(e)).await
            }
        }
    }

    /// Tool present and `path` is a repository root; nothing is touched otherwise
    async fn preflight(&self, path: &Path) -> Result<(), SyncError> {
        if let Err(e) = self.git.tool_version().await {
            return Err(match e {
                SyncError::ToolUnavailable(_) => e,
                other => SyncError::ToolUnavailable(other.to_string()),
            });
        }
        if !self.git.is_repository(path).await? {
            return Err(SyncError::NotARepository(path.to_path_buf()));
        }
        Ok(())
    }

    async fn remote(&self, path: &Path) -> Result<Option<Remote>, SyncError> {
        self.git.remote(path, self.git.remote_name()).await
    }

    /// Re-read the conflict state left behind by earlier passes
    async fn conflict_state(&self, path: &Path, tree: &WorkingTreeStatus) -> Result<ConflictReport, SyncError> {
        let merging = self.git.merge_in_progress(path).await?;
        Ok(self.detector.detect(None, tree, merging, path))
    }

    async fn full_pass(&self, path: &Path, trigger: Trigger) -> Result<SyncResult, SyncError> {
        self.preflight(path).await?;
        let settings = self.config.sync_config();
        let remote = self.remote(path).await?;
        let mut tree = self.git.status(path).await?;
        let mut pass = Pass {
            facts: PassFacts {
                has_remote: remote.is_some(),
                ..Default::default()
            },
            ..Default::default()
        };

        // A merge left over from an earlier pass blocks everything until the
        // user resolves it. Only a manual pass may conclude it.
        let report = self.conflict_state(path, &tree).await?;
        let mut merge_concluded = false;
        if report.is_conflicted() {
            if trigger != Trigger::Manual || !report.resolvable_by_commit() {
                info!("Repository still conflicted: {}", report.describe());
                return Ok(conflict_result(&report));
            }

            if let CommitStep::Committed { files_changed } = self
                .committer
                .conclude_merge(path, &tree)
                .await
                .map_err(into_commit_error)?
            {
                pass.facts.committed = true;
                pass.files_changed = Some(files_changed);
            }
            pass.note("merge concluded");
            merge_concluded = true;
            tree = self.git.status(path).await?;
        }

        // Pull
        if let Some(remote) = remote.as_ref().filter(|_| !merge_concluded) {
            match tree.branch.clone() {
                Some(branch) => {
                    let transfer = self.git.pull(path, &remote.name, &branch).await?;
                    match transfer.outcome {
                        RemoteOutcome::Success => {
                            info!("Pulled remote changes from {}", remote.name);
                            pass.note("pulled remote changes");
                            tree = self.git.status(path).await?;
                        }
                        RemoteOutcome::NothingToDo => debug!("Nothing to pull from {}", remote.name),
                        RemoteOutcome::Conflict => {
                            let tree = self.git.status(path).await?;
                            let merging = self.git.merge_in_progress(path).await?;
                            let report = self.detector.detect(Some(&transfer.output), &tree, merging, path);
                            warn!("Pull stopped with conflicts: {}", report.describe());
                            return Ok(conflict_result(&report));
                        }
                        RemoteOutcome::NetworkFailure(message) => {
                            warn!("Pull skipped, remote unreachable: {}", message);
                            pass.note(format!("pull failed: {}", message));
                            pass.facts.pull_failed = true;
                            pass.pull_error = Some(SyncError::Network {
                                operation: "Pull",
                                message,
                            });
                        }
                        RemoteOutcome::Failed(message) => {
                            warn!("Pull failed: {}", message);
                            pass.note(format!("pull failed: {}", message));
                            pass.facts.pull_failed = true;
                            pass.pull_error = Some(SyncError::GitCommand(format!("pull: {}", message)));
                        }
                    }
                }
                None => pass.note("detached HEAD, pull skipped"),
            }
        }

        // Commit
        match self
            .committer
            .commit_pending(path, &tree, trigger, &settings)
            .await
            .map_err(into_commit_error)?
        {
            CommitStep::Committed { files_changed } => {
                pass.facts.committed = true;
                pass.files_changed = Some(pass.files_changed.unwrap_or(0) + files_changed);
            }
            CommitStep::Skipped { pending } => {
                pass.note(format!("auto-commit disabled, {} uncommitted change(s) left", pending));
            }
            CommitStep::NothingToCommit => {}
        }

        let unpushed = pass.facts.committed || tree.has_unpushed_commits();
        pass.facts.unpushed_commits = remote.is_some() && unpushed;

        // Push
        if let Some(remote) = remote.as_ref() {
            if settings.auto_push && unpushed {
                self.push_step(path, remote, &tree, &mut pass).await?;
            } else if unpushed {
                debug!("Auto-push disabled, leaving local commits unpublished");
            }
        }

        // A failed pull with no local progress is the outcome of the pass
        if let Some(err) = pass.pull_error.take() {
            let facts = &pass.facts;
            if !(facts.committed || facts.pushed || facts.push_failed) {
                return Err(err);
            }
        }

        let default_message = if remote.is_some() {
            "up to date with remote"
        } else {
            "working tree clean"
        };
        Ok(pass.finish(default_message))
    }

    async fn push_step(
        &self,
        path: &Path,
        remote: &Remote,
        tree: &WorkingTreeStatus,
        pass: &mut Pass,
    ) -> Result<(), SyncError> {
        let Some(branch) = tree.branch.as_deref() else {
            pass.note("detached HEAD, push skipped");
            return Ok(());
        };

        let transfer = self.git.push(path, &remote.name, branch).await?;
        match transfer.outcome {
            RemoteOutcome::Success => {
                info!("Pushed {} to {}", branch, remote.name);
                pass.facts.pushed = true;
                pass.facts.unpushed_commits = false;
            }
            RemoteOutcome::NothingToDo => {
                debug!("Nothing to push to {}", remote.name);
                pass.facts.unpushed_commits = false;
            }
            RemoteOutcome::NetworkFailure(message) | RemoteOutcome::Failed(message) => {
                warn!("Push failed, local commits kept: {}", message);
                pass.facts.push_failed = true;
                pass.note(format!("{} (local commits kept)", message));
            }
            RemoteOutcome::Conflict => {
                pass.facts.push_failed = true;
                pass.note("push failed (local commits kept)");
            }
        }
        Ok(())
    }

    async fn pull_pass(&self, path: &Path) -> Result<SyncResult, SyncError> {
        self.preflight(path).await?;
        let Some(remote) = self.remote(path).await? else {
            return Ok(SyncResult::new(
                SyncStatus::NoChanges,
                Some("no remote configured".to_string()),
                None,
            ));
        };

        let tree = self.git.status(path).await?;
        let report = self.conflict_state(path, &tree).await?;
        if report.is_conflicted() {
            return Ok(conflict_result(&report));
        }
        let Some(branch) = tree.branch.clone() else {
            return Err(SyncError::GitCommand("detached HEAD, nothing to pull into".to_string()));
        };

        let transfer = self.git.pull(path, &remote.name, &branch).await?;
        let message = match transfer.outcome {
            RemoteOutcome::Success => "pulled remote changes",
            RemoteOutcome::NothingToDo => "already up to date",
            RemoteOutcome::Conflict => {
                let tree = self.git.status(path).await?;
                let merging = self.git.merge_in_progress(path).await?;
                let report = self.detector.detect(Some(&transfer.output), &tree, merging, path);
                return Ok(conflict_result(&report));
            }
            RemoteOutcome::NetworkFailure(message) => {
                return Err(SyncError::Network {
                    operation: "Pull",
                    message,
                })
            }
            RemoteOutcome::Failed(message) => return Err(SyncError::GitCommand(format!("pull: {}", message))),
        };

        // Classify
        let tree = self.git.status(path).await?;
        let facts = PassFacts {
            has_remote: true,
            unpushed_commits: tree.has_unpushed_commits(),
            ..Default::default()
        };
        Ok(SyncResult::new(classify(&facts), Some(message.to_string()), None))
    }

    async fn push_pass(&self, path: &Path) -> Result<SyncResult, SyncError> {
        self.preflight(path).await?;
        let Some(remote) = self.remote(path).await? else {
            return Ok(SyncResult::new(
                SyncStatus::NoChanges,
                Some("no remote configured".to_string()),
                None,
            ));
        };

        let tree = self.git.status(path).await?;
        let report = self.conflict_state(path, &tree).await?;
        if report.is_conflicted() {
            return Ok(conflict_result(&report));
        }
        if !tree.has_commits {
            return Ok(SyncResult::new(
                SyncStatus::NoChanges,
                Some("nothing to push".to_string()),
                None,
            ));
        }

        let mut pass = Pass {
            facts: PassFacts {
                has_remote: true,
                unpushed_commits: tree.has_unpushed_commits(),
                ..Default::default()
            },
            ..Default::default()
        };
        self.push_step(path, &remote, &tree, &mut pass).await?;
        Ok(pass.finish("up to date with remote"))
    }
}

// Staging problems surface as commit failures to the host
fn into_commit_error(err: SyncError) -> SyncError {
    match err {
        SyncError::GitCommand(message) => SyncError::Commit(message),
        other => other,
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
