//! journalsync - Git-backed synchronization engine for a journal data directory
//!
//! journalsync keeps a directory of journal documents committed and in step
//! with a remote repository, on a schedule or on demand, and relocates that
//! directory without losing history.
//!
//! ## Core Features
//!
//! - **Sync passes**: preflight, pull, commit, push, with exactly one status per pass
//! - **Conflict reporting**: conflicts are detected and surfaced, never auto-merged
//! - **Scheduling**: background timer that never overlaps manual passes
//! - **Migration**: validated, atomic relocation of the data directory
//! - **Configuration Management**: YAML-based configuration with XDG compliance
//!
//! ## Modules
//!
//! - [`service`]: the host-facing operations
//! - [`sync`]: the pass orchestrator
//! - [`git`]: git invocation and output parsing
//! - [`config`]: configuration management and the sync policy store

pub mod commit;
pub mod config;
pub mod conflict;
pub mod error;
pub mod executor;
pub mod git;
pub mod guard;
pub mod health;
pub mod migration;
pub mod notify;
pub mod reindex;
pub mod scheduler;
pub mod service;
pub mod state;
pub mod status;
pub mod sync;

pub use config::{Config, ConfigStore, SyncConfig};
pub use error::SyncError;
pub use git::{GitClient, RepositoryState, WorkingTreeStatus};
pub use notify::{NoticeLevel, Notifier};
pub use service::SyncService;
pub use status::{SyncResult, SyncStatus};
pub use sync::SyncEngine;
