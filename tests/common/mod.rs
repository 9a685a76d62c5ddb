//! Common test utilities and helpers for journalsync tests
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use assert_fs::TempDir;
use journalsync::config::{Config, ConfigStore, GitConfig};
use journalsync::notify::BroadcastNotifier;
use journalsync::SyncService;

pub const AUTHOR_NAME: &str = "Journal Tester";
pub const AUTHOR_EMAIL: &str = "tester@example.com";

/// Integration tests drive the real git binary and skip when it is missing
pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Run git in `dir` with a fixed identity and return stdout
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_AUTHOR_NAME", AUTHOR_NAME)
        .env("GIT_AUTHOR_EMAIL", AUTHOR_EMAIL)
        .env("GIT_COMMITTER_NAME", AUTHOR_NAME)
        .env("GIT_COMMITTER_EMAIL", AUTHOR_EMAIL)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .expect("Failed to run git");

    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

pub fn commit_count(dir: &Path) -> usize {
    git(dir, &["rev-list", "--count", "HEAD"]).trim().parse().unwrap_or(0)
}

pub fn head(dir: &Path) -> String {
    git(dir, &["rev-parse", "HEAD"]).trim().to_string()
}

/// A sandbox holding a journal directory and a bare remote
pub struct TestEnvironment {
    pub temp_dir: TempDir,
    pub journal: PathBuf,
    pub remote: PathBuf,
}

impl TestEnvironment {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let journal = temp_dir.path().join("Journal");
        let remote = temp_dir.path().join("remote.git");
        std::fs::create_dir_all(&remote).expect("Failed to create remote dir");
        git(&remote, &["init", "--bare", "--quiet"]);

        Self {
            temp_dir,
            journal,
            remote,
        }
    }

    /// Config pointing at `data_dir` with sync on and history off
    pub fn config_for(&self, data_dir: &Path) -> Config {
        let mut config = Config {
            data_directory: data_dir.to_string_lossy().into_owned(),
            git: GitConfig {
                author_name: Some(AUTHOR_NAME.to_string()),
                author_email: Some(AUTHOR_EMAIL.to_string()),
                timeout: 30,
                ..GitConfig::default()
            },
            ..Config::default()
        };
        config.sync.enabled = true;
        config.history.enabled = false;
        config
    }

    pub fn service(&self) -> SyncService {
        self.service_with(self.config_for(&self.journal))
    }

    pub fn service_with(&self, config: Config) -> SyncService {
        SyncService::builder(ConfigStore::new(config))
            .notifier(Arc::new(BroadcastNotifier::new(16)))
            .build()
            .expect("Failed to build service")
    }

    pub fn remote_url(&self) -> String {
        self.remote.to_string_lossy().into_owned()
    }

    /// Clone the remote into a second working copy
    pub fn clone_remote(&self, name: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        git(
            self.temp_dir.path(),
            &["clone", "--quiet", &self.remote_url(), &path.to_string_lossy()],
        );
        path
    }

    pub fn write(&self, relative: &str, content: &str) {
        write_file(&self.journal, relative, content);
    }
}

pub fn write_file(dir: &Path, relative: &str, content: &str) {
    let path = dir.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("Failed to create parent dir");
    }
    std::fs::write(path, content).expect("Failed to write file");
}
