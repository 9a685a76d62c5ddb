//! System health checks for journalsync
//!
//! Preflight checks behind `journalsync doctor`: everything a sync pass needs
//! before it can do useful work.

use std::path::Path;

use crate::git::GitClient;

/// Result of system health checks
#[derive(Debug, Clone)]
pub struct HealthCheck {
    /// Git installation status
    pub git: CheckResult,
    /// Data directory status
    pub data_dir: CheckResult,
    /// Repository at the data directory
    pub repository: CheckResult,
    /// Remote configuration (warning only, local-only journals are valid)
    pub remote: CheckResult,
    /// Pending merge or unmerged paths
    pub conflicts: CheckResult,
}

/// Result of an individual health check
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub passed: bool,
    pub message: String,
    pub details: Option<String>,
    pub is_warning: bool,
}

impl CheckResult {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: None,
            is_warning: false,
        }
    }

    fn ok_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            details: Some(details.into()),
            ..Self::ok(message)
        }
    }

    fn error_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            details: Some(details.into()),
            is_warning: false,
        }
    }

    fn warning_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: Some(details.into()),
            is_warning: true,
        }
    }

    fn skipped(message: impl Into<String>) -> Self {
        Self::warning_with_details(message, "Fix the checks above first")
    }
}

impl HealthCheck {
    /// Run all health checks against the data directory at `path`
    pub async fn run(git: &GitClient, path: &Path) -> Self {
        let git_check = Self::check_git(git).await;
        let data_dir = Self::check_data_dir(path);

        if !git_check.passed || !data_dir.passed {
            return Self {
                git: git_check,
                data_dir,
                repository: CheckResult::skipped("Repository not checked"),
                remote: CheckResult::skipped("Remote not checked"),
                conflicts: CheckResult::skipped("Conflicts not checked"),
            };
        }

        let repository = Self::check_repository(git, path).await;
        if !repository.passed {
            return Self {
                git: git_check,
                data_dir,
                repository,
                remote: CheckResult::skipped("Remote not checked"),
                conflicts: CheckResult::skipped("Conflicts not checked"),
            };
        }

        Self {
            git: git_check,
            data_dir,
            repository,
            remote: Self::check_remote(git, path).await,
            conflicts: Self::check_conflicts(git, path).await,
        }
    }

    /// Check if all required checks passed (excludes warnings)
    pub fn all_passed(&self) -> bool {
        self.all_checks().iter().all(|(_, check)| check.passed)
    }

    /// Get list of failed checks (errors only, not warnings)
    pub fn errors(&self) -> Vec<&CheckResult> {
        self.all_checks()
            .into_iter()
            .map(|(_, check)| check)
            .filter(|r| !r.passed && !r.is_warning)
            .collect()
    }

    /// Get list of warnings
    pub fn warnings(&self) -> Vec<&CheckResult> {
        self.all_checks()
            .into_iter()
            .map(|(_, check)| check)
            .filter(|r| r.is_warning)
            .collect()
    }

    async fn check_git(git: &GitClient) -> CheckResult {
        match git.tool_version().await {
            Ok(version) => CheckResult::ok_with_details("Git installed", version),
            Err(e) => CheckResult::error_with_details(
                "Git not available",
                format!("{}\nInstall git: https://git-scm.com/downloads", e),
            ),
        }
    }

    fn check_data_dir(path: &Path) -> CheckResult {
        if path.is_dir() {
            CheckResult::ok_with_details("Data directory exists", path.display().to_string())
        } else if path.exists() {
            CheckResult::error_with_details("Data directory is not a directory", path.display().to_string())
        } else {
            CheckResult::error_with_details(
                "Data directory does not exist",
                format!("Run: journalsync init   (creates {})", path.display()),
            )
        }
    }

    async fn check_repository(git: &GitClient, path: &Path) -> CheckResult {
        match git.is_repository(path).await {
            Ok(true) => match git.head(path).await {
                Ok(Some(head)) => CheckResult::ok_with_details("Repository initialized", format!("HEAD {}", head)),
                _ => CheckResult::ok("Repository initialized (no commits yet)"),
            },
            Ok(false) => CheckResult::error_with_details(
                "Data directory is not a git repository",
                "Run: journalsync init",
            ),
            Err(e) => CheckResult::error_with_details("Could not inspect repository", e.to_string()),
        }
    }

    async fn check_remote(git: &GitClient, path: &Path) -> CheckResult {
        match git.remote(path, git.remote_name()).await {
            Ok(Some(remote)) => CheckResult::ok_with_details(
                format!("Remote '{}' configured", remote.name),
                remote.url,
            ),
            Ok(None) => CheckResult::warning_with_details(
                format!("No remote '{}' configured", git.remote_name()),
                "Changes are committed locally only. Run: journalsync init --remote <url>",
            ),
            Err(e) => CheckResult::warning_with_details("Could not read remote", e.to_string()),
        }
    }

    async fn check_conflicts(git: &GitClient, path: &Path) -> CheckResult {
        let merging = git.merge_in_progress(path).await.unwrap_or(false);
        match git.status(path).await {
            Ok(tree) if tree.conflicted.is_empty() && !merging => CheckResult::ok_with_details(
                "No conflicts",
                format!("{} uncommitted change(s)", tree.changed_paths().len()),
            ),
            Ok(tree) => CheckResult::error_with_details(
                "Repository has unresolved conflicts",
                if tree.conflicted.is_empty() {
                    "A merge is in progress; commit it with: journalsync sync".to_string()
                } else {
                    format!("Resolve: {}", tree.conflicted.join(", "))
                },
            ),
            Err(e) => CheckResult::error_with_details("Could not read working tree status", e.to_string()),
        }
    }

    /// Get all checks as a slice for iteration
    pub fn all_checks(&self) -> [(&'static str, &CheckResult); 5] {
        [
            ("Git Installation", &self.git),
            ("Data Directory", &self.data_dir),
            ("Repository", &self.repository),
            ("Remote", &self.remote),
            ("Conflicts", &self.conflicts),
        ]
    }
}
