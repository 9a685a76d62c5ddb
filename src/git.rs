use regex::RegexSet;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::GitConfig;
use crate::error::SyncError;
use crate::executor::{CommandExecutor, CommandOutput};

/// Git operations against the journal working tree
///
/// The client owns the current data directory path. Every other field of the
/// repository state (initialized flag, remote) is read fresh from git because
/// it can change outside the application.
#[derive(Clone)]
pub struct GitClient {
    executor: Arc<dyn CommandExecutor>,
    settings: GitConfig,
    root: Arc<RwLock<PathBuf>>,
}

/// A configured remote
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remote {
    pub name: String,
    pub url: String,
}

/// Snapshot of the repository at the current data directory
#[derive(Debug, Clone)]
pub struct RepositoryState {
    pub path: PathBuf,
    pub initialized: bool,
    pub remote: Option<Remote>,
}

/// Working tree status, parsed from `git status --porcelain --branch`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkingTreeStatus {
    pub branch: Option<String>,
    pub upstream: Option<String>,
    pub ahead: u32,
    pub behind: u32,
    /// False on an unborn branch
    pub has_commits: bool,
    pub staged: Vec<String>,
    pub modified: Vec<String>,
    pub untracked: Vec<String>,
    /// Unmerged paths
    pub conflicted: Vec<String>,
}

/// Result of `git commit`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    NothingToCommit,
}

/// Direction of a remote transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Pull,
    Push,
}

/// Classified outcome of a pull or push
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteOutcome {
    /// Data was transferred
    Success,
    /// Already up to date, or nothing exists to transfer yet
    NothingToDo,
    /// The merge stopped with conflicts
    Conflict,
    /// The remote could not be reached or refused our credentials
    NetworkFailure(String),
    /// Any other failure (rejected push, local changes in the way, ...)
    Failed(String),
}

/// A pull or push together with the raw tool output
#[derive(Debug, Clone)]
pub struct Transfer {
    pub outcome: RemoteOutcome,
    pub output: CommandOutput,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Pull => "Pull",
            Direction::Push => "Push",
        }
    }
}

impl WorkingTreeStatus {
    pub fn is_clean(&self) -> bool {
        self.staged.is_empty()
            && self.modified.is_empty()
            && self.untracked.is_empty()
            && self.conflicted.is_empty()
    }

    /// Every path with a pending change, each listed once
    pub fn changed_paths(&self) -> Vec<String> {
        let paths: BTreeSet<&String> = self
            .staged
            .iter()
            .chain(&self.modified)
            .chain(&self.untracked)
            .chain(&self.conflicted)
            .collect();
        paths.into_iter().cloned().collect()
    }

    /// Local commits the remote has not seen yet
    ///
    /// Without an upstream every existing commit counts as unpublished.
    pub fn has_unpushed_commits(&self) -> bool {
        if self.upstream.is_some() {
            self.ahead > 0
        } else {
            self.has_commits
        }
    }

    /// Parse `git status --porcelain=v1 --branch` output
    pub fn parse(porcelain: &str) -> Self {
        let mut status = WorkingTreeStatus {
            has_commits: true,
            ..Default::default()
        };

        for line in porcelain.lines() {
            if let Some(header) = line.strip_prefix("## ") {
                status.parse_branch_header(header);
                continue;
            }
            if line.len() < 4 {
                continue;
            }

            let (code, rest) = line.split_at(2);
            let path = unquote(rest[1..].rsplit(" -> ").next().unwrap_or(&rest[1..]));
            let mut chars = code.chars();
            let x = chars.next().unwrap_or(' ');
            let y = chars.next().unwrap_or(' ');

            match (x, y) {
                ('?', '?') => status.untracked.push(path),
                ('!', '!') => {}
                ('U', _) | (_, 'U') | ('A', 'A') | ('D', 'D') => status.conflicted.push(path),
                _ => {
                    if x != ' ' {
                        status.staged.push(path.clone());
                    }
                    if y != ' ' {
                        status.modified.push(path);
                    }
                }
            }
        }

        status
    }

    fn parse_branch_header(&mut self, header: &str) {
        let unborn = header
            .strip_prefix("No commits yet on ")
            .or_else(|| header.strip_prefix("Initial commit on "));
        if let Some(branch) = unborn {
            self.has_commits = false;
            self.branch = Some(branch.split("...").next().unwrap_or(branch).trim().to_string());
            return;
        }
        if header.starts_with("HEAD (no branch)") {
            return;
        }

        let (refs, tracking) = match header.find(" [") {
            Some(pos) => (&header[..pos], Some(&header[pos + 2..])),
            None => (header, None),
        };

        match refs.split_once("...") {
            Some((branch, upstream)) => {
                self.branch = Some(branch.to_string());
                self.upstream = Some(upstream.to_string());
            }
            None => self.branch = Some(refs.trim().to_string()),
        }

        if let Some(tracking) = tracking {
            for part in tracking.trim_end_matches(']').split(", ") {
                if let Some(n) = part.strip_prefix("ahead ") {
                    self.ahead = n.trim().parse().unwrap_or(0);
                } else if let Some(n) = part.strip_prefix("behind ") {
                    self.behind = n.trim().parse().unwrap_or(0);
                }
            }
        }
    }
}

// Porcelain v1 C-quotes paths with unusual characters
fn unquote(raw: &str) -> String {
    let raw = raw.trim();
    match raw.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        Some(inner) => inner
            .replace("\\\"", "\"")
            .replace("\\t", "\t")
            .replace("\\\\", "\\"),
        None => raw.to_string(),
    }
}

fn network_patterns() -> &'static RegexSet {
    static PATTERNS: OnceLock<RegexSet> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        RegexSet::new([
            r"(?i)could not resolve host",
            r"(?i)authentication failed",
            r"(?i)permission denied",
            r"(?i)could not read from remote repository",
            r"(?i)could not read (username|password)",
            r"(?i)unable to access",
            r"(?i)connection (refused|reset|timed out)",
            r"(?i)operation timed out",
            r"(?i)network is unreachable",
            r"(?i)does not appear to be a git repository",
            r"(?i)repository .* not found",
            r"(?i)the remote end hung up unexpectedly",
            r"(?i)timed out after",
        ])
        .expect("static network patterns are valid")
    })
}

fn nothing_to_do_patterns() -> &'static RegexSet {
    static PATTERNS: OnceLock<RegexSet> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        RegexSet::new([
            r"(?i)already up[ -]to[ -]date",
            r"(?i)everything up-to-date",
            r"(?i)couldn't find remote ref",
            r"(?i)src refspec .* does not match any",
        ])
        .expect("static no-op patterns are valid")
    })
}

/// Map the exit status and text of a pull or push to an outcome
pub fn classify_transfer(direction: Direction, output: &CommandOutput) -> RemoteOutcome {
    let text = output.combined();

    if direction == Direction::Pull
        && (text.contains("CONFLICT (") || text.contains("Automatic merge failed"))
    {
        return RemoteOutcome::Conflict;
    }

    if nothing_to_do_patterns().is_match(&text) {
        return RemoteOutcome::NothingToDo;
    }

    if output.success() {
        return RemoteOutcome::Success;
    }

    if network_patterns().is_match(&text) {
        RemoteOutcome::NetworkFailure(output.summary())
    } else {
        RemoteOutcome::Failed(output.summary())
    }
}

impl GitClient {
    /// Create a new Git client rooted at `root`
    pub fn new(executor: Arc<dyn CommandExecutor>, settings: GitConfig, root: PathBuf) -> Self {
        Self {
            executor,
            settings,
            root: Arc::new(RwLock::new(root)),
        }
    }

    /// Current data directory
    pub async fn root(&self) -> PathBuf {
        self.root.read().await.clone()
    }

    /// Point the client at a new data directory
    pub async fn repoint(&self, path: PathBuf) {
        let mut root = self.root.write().await;
        info!("Repository path re-pointed: {} -> {}", root.display(), path.display());
        *root = path;
    }

    pub fn remote_name(&self) -> &str {
        &self.settings.remote_name
    }

    async fn run(&self, path: &Path, args: &[&str]) -> Result<CommandOutput, SyncError> {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        self.executor.run(path, &self.settings.binary, &args).await
    }

    /// `args` prefixed with the configured identity, for commands that may create commits
    fn with_identity(&self, args: &[&str]) -> Vec<String> {
        let mut full = Vec::with_capacity(args.len() + 4);
        if let Some(name) = &self.settings.author_name {
            full.push("-c".to_string());
            full.push(format!("user.name={}", name));
        }
        if let Some(email) = &self.settings.author_email {
            full.push("-c".to_string());
            full.push(format!("user.email={}", email));
        }
        full.extend(args.iter().map(|a| a.to_string()));
        full
    }

    /// Run and treat a non-zero exit as an error
    async fn run_checked(&self, path: &Path, args: &[&str]) -> Result<CommandOutput, SyncError> {
        let output = self.run(path, args).await?;
        if !output.success() {
            return Err(SyncError::GitCommand(format!(
                "git {}: {}",
                args.first().copied().unwrap_or_default(),
                output.summary()
            )));
        }
        Ok(output)
    }

    /// Check that the git binary can be started
    pub async fn tool_installed(&self) -> bool {
        self.tool_version().await.is_ok()
    }

    pub async fn tool_version(&self) -> Result<String, SyncError> {
        let output = self.run_checked(&std::env::temp_dir(), &["--version"]).await?;
        Ok(output.stdout.trim().to_string())
    }

    /// True only when `path` is the top level of a working tree
    pub async fn is_repository(&self, path: &Path) -> Result<bool, SyncError> {
        if !path.is_dir() {
            return Ok(false);
        }
        let output = self.run(path, &["rev-parse", "--git-dir"]).await?;
        Ok(output.success() && output.stdout.trim() == ".git")
    }

    /// Describe the repository at `path`
    pub async fn describe(&self, path: &Path) -> Result<RepositoryState, SyncError> {
        let initialized = self.is_repository(path).await?;
        let remote = if initialized {
            self.remote(path, self.remote_name()).await?
        } else {
            None
        };
        Ok(RepositoryState {
            path: path.to_path_buf(),
            initialized,
            remote,
        })
    }

    /// Initialize a repository; an existing one is left untouched
    pub async fn init(&self, path: &Path) -> Result<(), SyncError> {
        tokio::fs::create_dir_all(path).await?;

        if self.is_repository(path).await? {
            debug!("Repository already initialized at {}", path.display());
            return Ok(());
        }

        self.run_checked(path, &["init"]).await?;
        info!("Initialized repository at {}", path.display());
        Ok(())
    }

    /// Stage every change, including deletions and new files
    pub async fn add_all(&self, path: &Path) -> Result<(), SyncError> {
        self.run_checked(path, &["add", "-A"]).await?;
        Ok(())
    }

    /// Commit staged changes
    pub async fn commit(&self, path: &Path, message: &str) -> Result<CommitOutcome, SyncError> {
        let args = self.with_identity(&["commit", "-m", message]);
        let output = self.executor.run(path, &self.settings.binary, &args).await?;
        let text = output.combined();

        if text.contains("nothing to commit") || text.contains("nothing added to commit") {
            debug!("Nothing to commit in {}", path.display());
            return Ok(CommitOutcome::NothingToCommit);
        }
        if !output.success() {
            return Err(SyncError::Commit(output.summary()));
        }

        Ok(CommitOutcome::Committed)
    }

    /// Add the remote, or change its URL if it already exists
    pub async fn set_remote(&self, path: &Path, name: &str, url: &str) -> Result<(), SyncError> {
        if self.remote(path, name).await?.is_some() {
            self.run_checked(path, &["remote", "set-url", name, url]).await?;
        } else {
            self.run_checked(path, &["remote", "add", name, url]).await?;
        }
        info!("Remote {} set to {}", name, url);
        Ok(())
    }

    pub async fn remote(&self, path: &Path, name: &str) -> Result<Option<Remote>, SyncError> {
        let output = self.run(path, &["remote", "get-url", name]).await?;
        let url = output.stdout.trim();

        if output.success() && !url.is_empty() {
            Ok(Some(Remote {
                name: name.to_string(),
                url: url.to_string(),
            }))
        } else {
            Ok(None)
        }
    }

    /// Fresh working tree status
    pub async fn status(&self, path: &Path) -> Result<WorkingTreeStatus, SyncError> {
        let output = self
            .run_checked(
                path,
                &["status", "--porcelain=v1", "--branch", "--untracked-files=all"],
            )
            .await?;
        Ok(WorkingTreeStatus::parse(&output.stdout))
    }

    /// A merge stopped half way and waits for a commit
    pub async fn merge_in_progress(&self, path: &Path) -> Result<bool, SyncError> {
        let output = self.run(path, &["rev-parse", "-q", "--verify", "MERGE_HEAD"]).await?;
        Ok(output.success())
    }

    pub async fn head(&self, path: &Path) -> Result<Option<String>, SyncError> {
        let output = self.run(path, &["rev-parse", "-q", "--verify", "HEAD"]).await?;
        let head = output.stdout.trim();
        Ok((output.success() && !head.is_empty()).then(|| head.to_string()))
    }

    /// Parentless commits reachable from HEAD
    pub async fn root_commits(&self, path: &Path) -> Result<Vec<String>, SyncError> {
        let output = self.run(path, &["rev-list", "--max-parents=0", "HEAD"]).await?;
        if !output.success() {
            return Ok(Vec::new());
        }
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Fetch and merge `branch` from `remote`
    pub async fn pull(&self, path: &Path, remote: &str, branch: &str) -> Result<Transfer, SyncError> {
        // a merging pull writes a commit and needs the identity too
        let args = self.with_identity(&["pull", "--no-rebase", "--no-edit", remote, branch]);
        self.transfer(Direction::Pull, path, &args).await
    }

    /// Push `branch` to `remote`, setting the upstream
    pub async fn push(&self, path: &Path, remote: &str, branch: &str) -> Result<Transfer, SyncError> {
        let args: Vec<String> = ["push", "--set-upstream", remote, branch]
            .iter()
            .map(|a| a.to_string())
            .collect();
        self.transfer(Direction::Push, path, &args).await
    }

    async fn transfer(&self, direction: Direction, path: &Path, args: &[String]) -> Result<Transfer, SyncError> {
        let output = match self.executor.run(path, &self.settings.binary, args).await {
            Ok(output) => output,
            Err(err @ SyncError::Timeout { .. }) => {
                warn!("{} timed out: {}", direction.as_str(), err);
                return Ok(Transfer {
                    outcome: RemoteOutcome::NetworkFailure(err.to_string()),
                    output: CommandOutput::default(),
                });
            }
            Err(err) => return Err(err),
        };

        let outcome = classify_transfer(direction, &output);
        debug!("{} outcome: {:?}", direction.as_str(), outcome);
        Ok(Transfer { outcome, output })
    }
}
