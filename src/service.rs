//! Host-facing facade
//!
//! [`SyncService`] is the single object a host binds to. It owns the config
//! store, the engine, the scheduler and the migration manager, and exposes
//! each host operation as one async method.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::commit::CommitMessagePolicy;
use crate::config::{ConfigStore, SyncConfig};
use crate::conflict::ConflictDetector;
use crate::error::SyncError;
use crate::executor::{CommandExecutor, SystemExecutor};
use crate::git::{GitClient, RepositoryState, WorkingTreeStatus};
use crate::guard::SyncGuard;
use crate::health::HealthCheck;
use crate::migration::MigrationManager;
use crate::notify::{NoticeLevel, Notifier, TracingNotifier};
use crate::reindex::{CommandReindexer, NoopReindexer, Reindexer};
use crate::scheduler::{Scheduler, SchedulerStatus};
use crate::state::{History, HistoryDb, Operation, SyncEvent, SyncEventBuilder};
use crate::status::SyncResult;
use crate::sync::SyncEngine;

/// Builder for [`SyncService`]; every collaborator has a default
pub struct SyncServiceBuilder {
    config: ConfigStore,
    executor: Option<Arc<dyn CommandExecutor>>,
    notifier: Option<Arc<dyn Notifier>>,
    reindexer: Option<Arc<dyn Reindexer>>,
    detector: Option<Arc<dyn ConflictDetector>>,
    message_policy: Option<Arc<dyn CommitMessagePolicy>>,
    history: Option<History>,
}

impl SyncServiceBuilder {
    pub fn executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn reindexer(mut self, reindexer: Arc<dyn Reindexer>) -> Self {
        self.reindexer = Some(reindexer);
        self
    }

    pub fn conflict_detector(mut self, detector: Arc<dyn ConflictDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn message_policy(mut self, policy: Arc<dyn CommitMessagePolicy>) -> Self {
        self.message_policy = Some(policy);
        self
    }

    /// Use this history instead of the database named in the config
    pub fn history(mut self, history: History) -> Self {
        self.history = Some(history);
        self
    }

    pub fn build(self) -> Result<SyncService, SyncError> {
        let config = self.config.config();
        config.sync.validate()?;

        let executor = self
            .executor
            .unwrap_or_else(|| Arc::new(SystemExecutor::new(config.git.timeout())));

        let reindexer: Arc<dyn Reindexer> = match (self.reindexer, &config.migration.reindex_command) {
            (Some(reindexer), _) => reindexer,
            (None, Some(command)) => Arc::new(CommandReindexer::parse(executor.clone(), command)?),
            (None, None) => Arc::new(NoopReindexer),
        };

        let history = match self.history {
            Some(history) => Some(history),
            None if config.history.enabled => {
                let path = crate::config::expand_path(&config.history.database)?;
                Some(History::new(HistoryDb::open_at(&path).map_err(SyncError::history)?))
            }
            None => None,
        };

        let git = GitClient::new(executor, config.git.clone(), config.data_path());
        let notifier = self.notifier.unwrap_or_else(|| Arc::new(TracingNotifier));
        let mut engine = SyncEngine::new(git, self.config.clone(), SyncGuard::new(), notifier);
        if let Some(detector) = self.detector {
            engine = engine.with_detector(detector);
        }
        if let Some(policy) = self.message_policy {
            engine = engine.with_message_policy(policy);
        }
        if let Some(history) = history {
            engine = engine.with_history(history);
        }

        Ok(SyncService {
            config: self.config,
            migration: MigrationManager::new(engine.clone(), reindexer.clone()),
            scheduler: Scheduler::new(engine.clone()),
            engine,
            reindexer,
        })
    }
}

/// The operations a host layer calls
pub struct SyncService {
    config: ConfigStore,
    engine: SyncEngine,
    migration: MigrationManager,
    scheduler: Scheduler,
    reindexer: Arc<dyn Reindexer>,
}

impl SyncService {
    pub fn builder(config: ConfigStore) -> SyncServiceBuilder {
        SyncServiceBuilder {
            config,
            executor: None,
            notifier: None,
            reindexer: None,
            detector: None,
            message_policy: None,
            history: None,
        }
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    pub fn get_sync_config(&self) -> SyncConfig {
        self.config.sync_config()
    }

    /// Validate, persist and publish a new sync policy
    pub fn set_sync_config(&self, sync: SyncConfig) -> Result<(), SyncError> {
        self.config.set_sync_config(sync)?;
        info!("Sync configuration updated");
        Ok(())
    }

    pub async fn sync_now(&self) -> Result<SyncResult, SyncError> {
        self.engine.sync_now().await
    }

    pub async fn git_pull(&self) -> Result<SyncResult, SyncError> {
        self.engine.pull().await
    }

    pub async fn git_push(&self) -> Result<SyncResult, SyncError> {
        self.engine.push().await
    }

    pub async fn check_tool_installed(&self) -> bool {
        self.engine.git().tool_installed().await
    }

    pub async fn current_data_directory(&self) -> PathBuf {
        self.engine.git().root().await
    }

    pub async fn validate_migration_target(&self, target: &Path) -> Result<(), SyncError> {
        self.migration.validate_target(target).await.map(|_| ())
    }

    pub async fn migrate_to_directory(&self, target: &Path, force: bool) -> Result<(), SyncError> {
        self.migration.migrate(target, force).await.map(|_| ())
    }

    /// Ask the host's indexer to rebuild from the current data directory
    pub async fn reindex_database(&self) -> Result<(), SyncError> {
        let path = self.current_data_directory().await;
        let outcome = self.reindexer.reindex(&path).await;

        let event = SyncEventBuilder::new(Operation::Reindex, &path);
        match &outcome {
            Ok(()) => {
                self.engine
                    .announce(NoticeLevel::Success, "Search index rebuilt", event.summary("Search index rebuilt"))
                    .await
            }
            Err(e) => {
                let message = format!("Reindex failed: {}", e);
                self.engine.announce(NoticeLevel::Error, &message, event.error(e)).await
            }
        }
        outcome
    }

    /// Initialize the data directory as a repository and optionally set the remote
    pub async fn init_repository(&self, remote_url: Option<&str>) -> Result<RepositoryState, SyncError> {
        let _permit = self.engine.guard().try_acquire().ok_or(SyncError::AlreadySyncing)?;
        let git = self.engine.git();
        let path = git.root().await;

        if !git.tool_installed().await {
            return Err(SyncError::ToolUnavailable("git --version failed".to_string()));
        }
        git.init(&path).await?;
        if let Some(url) = remote_url {
            git.set_remote(&path, git.remote_name(), url).await?;
        }
        git.describe(&path).await
    }

    pub async fn repository_state(&self) -> Result<RepositoryState, SyncError> {
        let git = self.engine.git();
        git.describe(&git.root().await).await
    }

    pub async fn working_tree_status(&self) -> Result<WorkingTreeStatus, SyncError> {
        let git = self.engine.git();
        let path = git.root().await;
        if !git.is_repository(&path).await? {
            return Err(SyncError::NotARepository(path));
        }
        git.status(&path).await
    }

    /// Most recent history events, newest first; empty when history is off
    pub async fn history(&self, limit: usize) -> Result<Vec<SyncEvent>, SyncError> {
        match self.engine.history() {
            Some(history) => history.recent(limit).await,
            None => Ok(Vec::new()),
        }
    }

    pub async fn health(&self) -> HealthCheck {
        let git = self.engine.git();
        HealthCheck::run(git, &git.root().await).await
    }

    pub fn start_scheduler(&self) {
        self.scheduler.start();
    }

    pub async fn shutdown(&self, wait: Option<Duration>) -> bool {
        self.scheduler.shutdown(wait).await
    }

    pub fn scheduler_status(&self) -> SchedulerStatus {
        self.scheduler.status()
    }
}
