//! Data directory migration
//!
//! Relocates the journal to a new directory without ever giving up the old
//! one early. The source stays authoritative until every step succeeded; the
//! new path is adopted last. The exclusive-run guard is held for the whole
//! migration, which pauses scheduled and manual sync passes.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::commit::Trigger;
use crate::error::SyncError;
use crate::guard::SyncPermit;
use crate::notify::NoticeLevel;
use crate::reindex::Reindexer;
use crate::state::{Operation, SyncEventBuilder};
use crate::status::SyncStatus;
use crate::sync::SyncEngine;

const GIT_DIR: &str = ".git";
const WRITE_CHECK: &str = ".journalsync-write-check";

/// What the target directory holds before the copy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Empty,
    /// A repository sharing a root commit with the source
    RelatedRepository,
}

/// A validated relocation, alive for one migration call
#[derive(Debug, Clone)]
pub struct MigrationRequest {
    pub source: PathBuf,
    pub target: PathBuf,
    pub kind: TargetKind,
}

/// Validates and performs data directory relocation
#[derive(Clone)]
pub struct MigrationManager {
    engine: SyncEngine,
    reindexer: Arc<dyn Reindexer>,
}

impl MigrationManager {
    pub fn new(engine: SyncEngine, reindexer: Arc<dyn Reindexer>) -> Self {
        Self { engine, reindexer }
    }

    /// Check that `target` can receive the current data directory
    pub async fn validate_target(&self, target: &Path) -> Result<MigrationRequest, SyncError> {
        let source = self.engine.git().root().await;
        self.inspect(&source, target).await
    }

    /// Move the journal to `target`
    ///
    /// With `force`, pending changes are committed by a sync pass first;
    /// otherwise a dirty tree aborts the migration. Returns the adopted path.
    pub async fn migrate(&self, target: &Path, force: bool) -> Result<PathBuf, SyncError> {
        let permit = self.engine.guard().acquire().await;
        let source = self.engine.git().root().await;
        info!("Migrating data directory {} -> {}", source.display(), target.display());

        let outcome = self.run(&source, target, force, &permit).await;

        let event = SyncEventBuilder::new(Operation::Migration, &source);
        match &outcome {
            Ok(adopted) => {
                let message = format!("Data directory moved to {}", adopted.display());
                info!("{}", message);
                self.engine
                    .announce(NoticeLevel::Success, &message, event.summary(message.clone()))
                    .await;
            }
            Err(e) => {
                warn!("Migration failed, keeping {}: {}", source.display(), e);
                let message = format!("Migration failed: {}", e);
                self.engine
                    .announce(NoticeLevel::Error, &message, event.error(e))
                    .await;
            }
        }

        outcome
    }

    async fn run(
        &self,
        source: &Path,
        target: &Path,
        force: bool,
        permit: &SyncPermit,
    ) -> Result<PathBuf, SyncError> {
        let request = self.inspect(source, target).await?;
        let git = self.engine.git();

        self.ensure_clean(source, force, permit)
            .await
            .map_err(SyncError::into_migration)?;

        let source_head = git.head(source).await.map_err(SyncError::into_migration)?;
        if request.kind == TargetKind::RelatedRepository {
            let target_head = git.head(&request.target).await.map_err(SyncError::into_migration)?;
            if target_head != source_head {
                return Err(SyncError::Migration(
                    "target repository is not at the same commit as the current data directory".to_string(),
                ));
            }
        }

        // Copy
        let include_git = request.kind == TargetKind::Empty;
        let from = request.source.clone();
        let to = request.target.clone();
        let copied = tokio::task::spawn_blocking(move || copy_tree(&from, &to, include_git))
            .await
            .map_err(|e| SyncError::Migration(format!("copy task failed: {}", e)))?
            .map_err(|e| SyncError::Migration(format!("copy failed: {}", e)))?;
        info!("Copied {} file(s) to {}", copied, request.target.display());

        // Init or verify
        if !git.is_repository(&request.target).await.map_err(SyncError::into_migration)? {
            git.init(&request.target).await.map_err(SyncError::into_migration)?;
        }
        let copied_head = git.head(&request.target).await.map_err(SyncError::into_migration)?;
        if copied_head != source_head {
            return Err(SyncError::Migration(format!(
                "repository at {} does not match the source history",
                request.target.display()
            )));
        }

        // Reindex
        self.reindexer
            .reindex(&request.target)
            .await
            .map_err(SyncError::into_migration)?;

        // Adopt
        self.engine
            .config()
            .set_data_directory(&request.target)
            .map_err(SyncError::into_migration)?;
        git.repoint(request.target.clone()).await;

        Ok(request.target)
    }

    /// Commit or refuse pending changes before the copy
    async fn ensure_clean(&self, source: &Path, force: bool, permit: &SyncPermit) -> Result<(), SyncError> {
        let git = self.engine.git();
        let tree = git.status(source).await?;
        let merging = git.merge_in_progress(source).await?;

        if !merging && tree.conflicted.is_empty() && tree.is_clean() {
            return Ok(());
        }
        if !force {
            return Err(SyncError::Migration(format!(
                "{} uncommitted change(s) in the data directory; sync first or force the migration",
                tree.changed_paths().len()
            )));
        }

        info!("Committing pending changes before migration");
        let result = self.engine.run_pass(Trigger::Manual, permit).await?;
        if result.status() == SyncStatus::Conflict {
            return Err(SyncError::Migration(
                "the data directory has unresolved conflicts".to_string(),
            ));
        }

        let tree = git.status(source).await?;
        if !tree.is_clean() || git.merge_in_progress(source).await? {
            return Err(SyncError::Migration(
                "the data directory is still not clean after committing".to_string(),
            ));
        }
        Ok(())
    }

    async fn inspect(&self, source: &Path, target: &Path) -> Result<MigrationRequest, SyncError> {
        if target.as_os_str().is_empty() {
            return Err(SyncError::Validation("target path is empty".to_string()));
        }
        if !target.exists() {
            return Err(SyncError::Validation(format!(
                "target does not exist: {}",
                target.display()
            )));
        }
        if !target.is_dir() {
            return Err(SyncError::Validation(format!(
                "target is not a directory: {}",
                target.display()
            )));
        }

        let target = target.canonicalize()?;
        let source = source
            .canonicalize()
            .unwrap_or_else(|_| path_clean::clean(source));

        if target == source {
            return Err(SyncError::Validation(
                "target is the current data directory".to_string(),
            ));
        }
        if target.starts_with(&source) {
            return Err(SyncError::Validation(
                "target is inside the current data directory".to_string(),
            ));
        }
        if source.starts_with(&target) {
            return Err(SyncError::Validation(
                "target contains the current data directory".to_string(),
            ));
        }

        check_writable(&target)?;

        let kind = if is_empty_dir(&target)? {
            TargetKind::Empty
        } else if self.engine.git().is_repository(&target).await? {
            let git = self.engine.git();
            let source_roots = git.root_commits(&source).await?;
            let target_roots = git.root_commits(&target).await?;
            debug!("Root commits: source {:?}, target {:?}", source_roots, target_roots);

            if !source_roots.iter().any(|root| target_roots.contains(root)) {
                return Err(SyncError::Validation(format!(
                    "{} holds a repository with unrelated history",
                    target.display()
                )));
            }
            TargetKind::RelatedRepository
        } else {
            return Err(SyncError::Validation(format!(
                "{} is not empty and is not a repository",
                target.display()
            )));
        };

        Ok(MigrationRequest { source, target, kind })
    }
}

fn check_writable(dir: &Path) -> Result<(), SyncError> {
    let marker = dir.join(WRITE_CHECK);
    fs::write(&marker, b"")
        .and_then(|_| fs::remove_file(&marker))
        .map_err(|e| SyncError::Validation(format!("target is not writable: {}", e)))
}

fn is_empty_dir(dir: &Path) -> io::Result<bool> {
    Ok(fs::read_dir(dir)?.next().is_none())
}

/// Copy `source` into `target`, returning the number of files copied
///
/// Existing files are overwritten. The source is never modified.
fn copy_tree(source: &Path, target: &Path, include_git: bool) -> io::Result<usize> {
    let mut copied = 0;
    let walker = WalkDir::new(source)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| include_git || !(entry.depth() == 1 && entry.file_name() == GIT_DIR));

    for entry in walker {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let destination = target.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&destination)?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &destination)?;
        } else {
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &destination)?;
            copied += 1;
        }
    }

    Ok(copied)
}

#[cfg(unix)]
fn copy_symlink(link: &Path, destination: &Path) -> io::Result<()> {
    let points_to = fs::read_link(link)?;
    if destination.symlink_metadata().is_ok() {
        fs::remove_file(destination)?;
    }
    std::os::unix::fs::symlink(points_to, destination)
}

#[cfg(not(unix))]
fn copy_symlink(link: &Path, _destination: &Path) -> io::Result<()> {
    warn!("Skipping symbolic link {}", link.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, ConfigStore, GitConfig};
    use crate::executor::scripted::{fail, ok, ScriptedExecutor};
    use crate::git::GitClient;
    use crate::guard::SyncGuard;
    use crate::notify::TracingNotifier;
    use crate::reindex::MockReindexer;
    use assert_matches::assert_matches;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        source: TempDir,
        executor: Arc<ScriptedExecutor>,
        engine: SyncEngine,
    }

    fn fixture() -> Fixture {
        let source = TempDir::new().unwrap();
        fs::create_dir_all(source.path().join(".git")).unwrap();
        fs::write(source.path().join(".git").join("HEAD"), "ref: refs/heads/main\n").unwrap();
        fs::create_dir_all(source.path().join("2026").join("10")).unwrap();
        fs::write(source.path().join("2026").join("10").join("16.md"), "# Friday\n").unwrap();
        fs::write(source.path().join("ideas.md"), "- sync\n").unwrap();

        let executor = Arc::new(ScriptedExecutor::new());
        executor.on("rev-parse --git-dir", ok(".git\n"));
        executor.on("rev-parse -q --verify MERGE_HEAD", fail(1, "", ""));
        executor.on("rev-parse -q --verify HEAD", ok("4b825dc642cb6eb9a060e54bf8d69288fbee4904\n"));
        executor.on("remote get-url", fail(2, "", ""));
        executor.on("status", ok("## main\n"));

        let config = ConfigStore::new(Config {
            data_directory: source.path().to_string_lossy().into_owned(),
            ..Config::default()
        });
        let git = GitClient::new(executor.clone(), GitConfig::default(), source.path().to_path_buf());
        let engine = SyncEngine::new(git, config, SyncGuard::new(), Arc::new(TracingNotifier));
        Fixture {
            source,
            executor,
            engine,
        }
    }

    fn reindex_once(target: &Path) -> Arc<MockReindexer> {
        let expected = target.canonicalize().unwrap();
        let mut reindexer = MockReindexer::new();
        reindexer
            .expect_reindex()
            .withf(move |dir| dir == expected.as_path())
            .times(1)
            .returning(|_| Ok(()));
        Arc::new(reindexer)
    }

    fn untouched() -> Arc<MockReindexer> {
        let mut reindexer = MockReindexer::new();
        reindexer.expect_reindex().never();
        Arc::new(reindexer)
    }

    #[tokio::test]
    async fn test_migrate_to_empty_target() {
        let f = fixture();
        let target = TempDir::new().unwrap();
        let manager = MigrationManager::new(f.engine.clone(), reindex_once(target.path()));

        let adopted = manager.migrate(target.path(), false).await.unwrap();
        let expected = target.path().canonicalize().unwrap();

        assert_eq!(adopted, expected);
        assert_eq!(f.engine.config().data_directory(), expected);
        assert_eq!(f.engine.git().root().await, expected);
        assert!(expected.join("2026/10/16.md").exists());
        assert!(expected.join(".git/HEAD").exists());
        assert!(!expected.join(WRITE_CHECK).exists());
        // source is never deleted
        assert!(f.source.path().join("ideas.md").exists());
    }

    #[tokio::test]
    async fn test_rejects_equal_and_nested_targets() {
        let f = fixture();
        let manager = MigrationManager::new(f.engine.clone(), untouched());

        assert_matches!(
            manager.validate_target(f.source.path()).await,
            Err(SyncError::Validation(msg)) if msg.contains("current data directory")
        );

        let nested = f.source.path().join("archive");
        fs::create_dir_all(&nested).unwrap();
        assert_matches!(
            manager.validate_target(&nested).await,
            Err(SyncError::Validation(msg)) if msg.contains("inside")
        );

        let parent = f.source.path().parent().unwrap();
        assert_matches!(
            manager.validate_target(parent).await,
            Err(SyncError::Validation(_))
        );
    }

    #[tokio::test]
    async fn test_rejects_missing_and_non_directory_targets() {
        let f = fixture();
        let manager = MigrationManager::new(f.engine.clone(), untouched());
        let scratch = TempDir::new().unwrap();

        assert_matches!(
            manager.validate_target(&scratch.path().join("missing")).await,
            Err(SyncError::Validation(msg)) if msg.contains("does not exist")
        );

        let file = scratch.path().join("journal.md");
        fs::write(&file, "not a directory").unwrap();
        assert_matches!(
            manager.validate_target(&file).await,
            Err(SyncError::Validation(msg)) if msg.contains("not a directory")
        );
        assert_matches!(
            manager.validate_target(Path::new("")).await,
            Err(SyncError::Validation(_))
        );
    }

    #[tokio::test]
    async fn test_rejects_non_empty_plain_directory() {
        let f = fixture();
        let manager = MigrationManager::new(f.engine.clone(), untouched());
        let target = TempDir::new().unwrap();
        fs::write(target.path().join("photo.jpg"), b"\xff\xd8").unwrap();
        f.executor.once("rev-parse --git-dir", fail(128, "", "fatal: not a git repository\n"));

        assert_matches!(
            manager.validate_target(target.path()).await,
            Err(SyncError::Validation(msg)) if msg.contains("not empty")
        );
    }

    #[tokio::test]
    async fn test_repository_history_must_be_related() {
        let f = fixture();
        let manager = MigrationManager::new(f.engine.clone(), untouched());
        let target = TempDir::new().unwrap();
        fs::create_dir_all(target.path().join(".git")).unwrap();

        f.executor.once("rev-list --max-parents=0", ok("aaaa\n"));
        f.executor.once("rev-list --max-parents=0", ok("bbbb\n"));
        assert_matches!(
            manager.validate_target(target.path()).await,
            Err(SyncError::Validation(msg)) if msg.contains("unrelated")
        );

        f.executor.on("rev-list --max-parents=0", ok("aaaa\n"));
        let request = manager.validate_target(target.path()).await.unwrap();
        assert_eq!(request.kind, TargetKind::RelatedRepository);
    }

    #[tokio::test]
    async fn test_dirty_tree_needs_force() {
        let f = fixture();
        let target = TempDir::new().unwrap();
        f.executor.once("status", ok("## main\n M ideas.md\n"));

        let manager = MigrationManager::new(f.engine.clone(), untouched());
        let result = manager.migrate(target.path(), false).await;
        assert_matches!(result, Err(SyncError::Migration(msg)) if msg.contains("uncommitted"));
        assert!(is_empty_dir(target.path()).unwrap());
        assert_eq!(f.engine.git().root().await, f.source.path());

        // clean check, then the forced pass
        f.executor.once("status", ok("## main\n M ideas.md\n"));
        f.executor.once("status", ok("## main\n M ideas.md\n"));
        let manager = MigrationManager::new(f.engine.clone(), reindex_once(target.path()));
        manager.migrate(target.path(), true).await.unwrap();
        assert_eq!(f.executor.count("commit"), 1);
    }

    #[tokio::test]
    async fn test_failed_reindex_keeps_source_authoritative() {
        let f = fixture();
        let target = TempDir::new().unwrap();
        let mut reindexer = MockReindexer::new();
        reindexer
            .expect_reindex()
            .times(1)
            .returning(|_| Err(SyncError::Reindex("index locked".to_string())));
        let manager = MigrationManager::new(f.engine.clone(), Arc::new(reindexer));

        let result = manager.migrate(target.path(), false).await;
        assert_matches!(&result, Err(e) if e.code() == "MIGRATION_ERROR");
        assert_eq!(f.engine.config().data_directory(), f.source.path());
        assert_eq!(f.engine.git().root().await, f.source.path());
        assert!(f.source.path().join("ideas.md").exists());
    }

    #[tokio::test]
    async fn test_head_mismatch_is_not_adopted() {
        let f = fixture();
        let target = TempDir::new().unwrap();
        f.executor.once("rev-parse -q --verify HEAD", ok("1111\n"));
        f.executor.once("rev-parse -q --verify HEAD", ok("2222\n"));
        let manager = MigrationManager::new(f.engine.clone(), untouched());

        let result = manager.migrate(target.path(), false).await;
        assert_matches!(result, Err(SyncError::Migration(msg)) if msg.contains("does not match"));
        assert_eq!(f.engine.git().root().await, f.source.path());
    }

    #[tokio::test]
    async fn test_migration_holds_the_guard() {
        let f = fixture();
        let target = TempDir::new().unwrap();
        f.executor.delay(Duration::from_millis(20));
        let manager = MigrationManager::new(f.engine.clone(), reindex_once(target.path()));

        let engine = f.engine.clone();
        let (migrated, synced) = tokio::join!(manager.migrate(target.path(), false), async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            engine.sync_now().await
        });

        migrated.unwrap();
        assert_matches!(synced, Err(SyncError::AlreadySyncing));
    }

    #[test]
    fn test_copy_tree_can_skip_git_dir() {
        let source = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        fs::create_dir_all(source.path().join(".git/objects")).unwrap();
        fs::write(source.path().join(".git/config"), "[core]\n").unwrap();
        fs::create_dir_all(source.path().join("notes/.git-like")).unwrap();
        fs::write(source.path().join("notes/a.md"), "a").unwrap();

        let copied = copy_tree(source.path(), target.path(), false).unwrap();
        assert_eq!(copied, 1);
        assert!(target.path().join("notes/a.md").exists());
        assert!(target.path().join("notes/.git-like").is_dir());
        assert!(!target.path().join(".git").exists());

        let copied = copy_tree(source.path(), target.path(), true).unwrap();
        assert_eq!(copied, 2);
        assert!(target.path().join(".git/config").exists());
    }
}
