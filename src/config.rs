use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::error::SyncError;

/// Shortest accepted scheduler period
pub const MIN_COMMIT_INTERVAL: Duration = Duration::from_secs(1);
/// Longest accepted scheduler period (one week)
pub const MAX_COMMIT_INTERVAL: Duration = Duration::from_secs(7 * 86400);

/// Main configuration structure for journalsync
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    /// Journal data directory, also the git working tree
    #[serde(default = "default_data_directory")]
    pub data_directory: String,

    /// Synchronization policy
    #[serde(default)]
    pub sync: SyncConfig,

    /// Git invocation settings
    #[serde(default)]
    pub git: GitConfig,

    /// Data directory migration settings
    #[serde(default)]
    pub migration: MigrationConfig,

    /// Sync history database
    #[serde(default)]
    pub history: HistoryConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Synchronization policy read by the scheduler and the orchestrator
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    /// Run the background scheduler
    #[serde(default)]
    pub enabled: bool,

    /// Commit pending changes on scheduled passes
    #[serde(default = "default_true")]
    pub auto_commit: bool,

    /// Push after committing
    #[serde(default)]
    pub auto_push: bool,

    /// Period between scheduled passes
    #[serde(
        default = "default_commit_interval",
        serialize_with = "serialize_duration",
        deserialize_with = "deserialize_duration"
    )]
    pub commit_interval: Duration,
}

/// Git invocation settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct GitConfig {
    /// Git executable name or path
    #[serde(default = "default_git_binary")]
    pub binary: String,

    /// Remote used for pull and push
    #[serde(default = "default_remote_name")]
    pub remote_name: String,

    /// Timeout for a single git invocation in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Commit author name, passed as `-c user.name=...` when set
    #[serde(default)]
    pub author_name: Option<String>,

    /// Commit author email, passed as `-c user.email=...` when set
    #[serde(default)]
    pub author_email: Option<String>,
}

/// Data directory migration settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq, Default)]
pub struct MigrationConfig {
    /// Command run in the new data directory to rebuild the search index
    #[serde(default)]
    pub reindex_command: Option<String>,
}

/// Sync history database settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct HistoryConfig {
    /// Record pass outcomes in SQLite
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Database location
    #[serde(default = "default_history_database")]
    pub database: String,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String, // "info"

    /// Enable colored output
    #[serde(default = "default_true")]
    pub color: bool,
}

// Default value functions
fn default_true() -> bool {
    true
}
fn default_data_directory() -> String {
    "${HOME}/Journal".to_string()
}
fn default_commit_interval() -> Duration {
    Duration::from_secs(300)
}
fn default_git_binary() -> String {
    "git".to_string()
}
fn default_remote_name() -> String {
    "origin".to_string()
}
fn default_timeout() -> u64 {
    120
}
fn default_history_database() -> String {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        format!("{}/journalsync/history.db", data_home)
    } else if let Ok(home) = std::env::var("HOME") {
        format!("{}/.local/share/journalsync/history.db", home)
    } else {
        "/tmp/journalsync-history.db".to_string()
    }
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            auto_commit: default_true(),
            auto_push: false,
            commit_interval: default_commit_interval(),
        }
    }
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            binary: default_git_binary(),
            remote_name: default_remote_name(),
            timeout: default_timeout(),
            author_name: None,
            author_email: None,
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            database: default_history_database(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            color: default_true(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_directory: default_data_directory(),
            sync: SyncConfig::default(),
            git: GitConfig::default(),
            migration: MigrationConfig::default(),
            history: HistoryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Reject values the scheduler cannot run with
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.commit_interval < MIN_COMMIT_INTERVAL {
            return Err(SyncError::Validation(format!(
                "commit interval must be at least {}s",
                MIN_COMMIT_INTERVAL.as_secs()
            )));
        }
        if self.commit_interval > MAX_COMMIT_INTERVAL {
            return Err(SyncError::Validation(format!(
                "commit interval must be at most {}",
                format_duration(MAX_COMMIT_INTERVAL)
            )));
        }
        Ok(())
    }
}

impl GitConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout.max(1))
    }
}

impl Config {
    /// Load configuration from the default location or create a default config
    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            let mut config = Self::default();

            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
            }

            config.save(&config_path)?;
            config.expand_paths()?;

            tracing::info!("Created default configuration at: {:?}", config_path);
            Ok(config)
        }
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.expand_paths()?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("journalsync").join("config.yml"))
    }

    /// Expand environment variables and `~` in configuration paths
    pub fn expand_paths(&mut self) -> Result<()> {
        self.data_directory = expand_path(&self.data_directory)
            .context("Failed to expand data_directory path")?
            .to_string_lossy()
            .into_owned();

        self.history.database = shellexpand::full(&self.history.database)
            .context("Failed to expand history database path")?
            .into_owned();

        Ok(())
    }

    /// The data directory as a normalized path
    pub fn data_path(&self) -> PathBuf {
        path_clean::clean(&self.data_directory)
    }
}

/// Expand `~` and `${VAR}` and normalize `.`/`..` components
pub fn expand_path(raw: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(raw).with_context(|| format!("Failed to expand {}", raw))?;
    Ok(path_clean::clean(expanded.as_ref()))
}

/// Parse duration strings like "30s", "5m", "1h", "2d" or raw seconds
pub fn parse_duration(duration_str: &str) -> Result<Duration> {
    let duration_str = duration_str.trim().to_lowercase();

    let (value, unit, multiplier) = if let Some(value) = duration_str.strip_suffix('s') {
        (value, "seconds", 1)
    } else if let Some(value) = duration_str.strip_suffix('m') {
        (value, "minutes", 60)
    } else if let Some(value) = duration_str.strip_suffix('h') {
        (value, "hours", 3600)
    } else if let Some(value) = duration_str.strip_suffix('d') {
        (value, "days", 86400)
    } else {
        let secs = duration_str
            .parse::<u64>()
            .context("Invalid duration format. Use format like '30s', '5m', '1h', '2d'")?;
        return Ok(Duration::from_secs(secs));
    };

    let count = value
        .trim()
        .parse::<u64>()
        .with_context(|| format!("Invalid {} value", unit))?;
    let secs = count
        .checked_mul(multiplier)
        .ok_or_else(|| anyhow::anyhow!("Duration too large: {}", duration_str))?;

    Ok(Duration::from_secs(secs))
}

/// Render a duration with the largest unit that divides it evenly
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    match secs {
        0 => "0s".to_string(),
        s if s % 86400 == 0 => format!("{}d", s / 86400),
        s if s % 3600 == 0 => format!("{}h", s / 3600),
        s if s % 60 == 0 => format!("{}m", s / 60),
        s => format!("{}s", s),
    }
}

fn serialize_duration<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_duration(*duration))
}

fn deserialize_duration<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
        Raw::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}

/// Process-wide holder of the configuration
///
/// Readers take a snapshot; the scheduler subscribes to changes. Writes go
/// through the setters, which validate and persist when the store is backed
/// by a file.
#[derive(Clone)]
pub struct ConfigStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    sender: watch::Sender<Config>,
    path: Option<PathBuf>,
    // serializes read-modify-write so concurrent setters never drop a change
    write_lock: std::sync::Mutex<()>,
}

impl ConfigStore {
    /// In-memory store, nothing is written to disk
    pub fn new(config: Config) -> Self {
        Self::build(config, None)
    }

    /// Store that saves every accepted change to `path`
    pub fn with_file(config: Config, path: impl Into<PathBuf>) -> Self {
        Self::build(config, Some(path.into()))
    }

    fn build(config: Config, path: Option<PathBuf>) -> Self {
        let (sender, _) = watch::channel(config);
        Self {
            inner: Arc::new(StoreInner {
                sender,
                path,
                write_lock: std::sync::Mutex::new(()),
            }),
        }
    }

    /// Snapshot of the whole configuration
    pub fn config(&self) -> Config {
        self.inner.sender.borrow().clone()
    }

    pub fn sync_config(&self) -> SyncConfig {
        self.inner.sender.borrow().sync.clone()
    }

    pub fn git_config(&self) -> GitConfig {
        self.inner.sender.borrow().git.clone()
    }

    pub fn data_directory(&self) -> PathBuf {
        self.inner.sender.borrow().data_path()
    }

    /// Replace the sync policy
    pub fn set_sync_config(&self, sync: SyncConfig) -> Result<(), SyncError> {
        sync.validate()?;
        self.update(|config| config.sync = sync)
    }

    /// Record a new data directory (used by migration only)
    pub fn set_data_directory(&self, path: &Path) -> Result<(), SyncError> {
        let path = path.to_string_lossy().into_owned();
        self.update(|config| config.data_directory = path)
    }

    /// Receive every configuration change
    pub fn subscribe(&self) -> watch::Receiver<Config> {
        self.inner.sender.subscribe()
    }

    fn update(&self, apply: impl FnOnce(&mut Config)) -> Result<(), SyncError> {
        let _guard = self
            .inner
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut next = self.config();
        apply(&mut next);

        if let Some(path) = &self.inner.path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            next.save(path)?;
        }

        self.inner.sender.send_replace(next);
        Ok(())
    }
}
