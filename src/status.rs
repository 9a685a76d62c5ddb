//! Sync status model
//!
//! [`SyncStatus`] is a closed enum internally. The integer codes exist only for
//! the host boundary: [`SyncStatus::code`], `TryFrom<u8>`, and the serde
//! representation, which is the bare integer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of one sync pass, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum SyncStatus {
    /// Nothing to commit and nothing to exchange
    NoChanges,
    /// Clean and in step with the remote
    UpToDate,
    /// Local commit made, not published
    Committed,
    /// Committed and pushed
    Synced,
    /// Push was attempted and failed; local commits are kept
    PushFailed,
    /// Unresolved merge conflicts block the pipeline
    Conflict,
}

impl SyncStatus {
    pub const ALL: [SyncStatus; 6] = [
        SyncStatus::NoChanges,
        SyncStatus::UpToDate,
        SyncStatus::Committed,
        SyncStatus::Synced,
        SyncStatus::PushFailed,
        SyncStatus::Conflict,
    ];

    /// Stable integer code used at the host boundary
    pub fn code(self) -> u8 {
        match self {
            SyncStatus::NoChanges => 0,
            SyncStatus::UpToDate => 1,
            SyncStatus::Committed => 2,
            SyncStatus::Synced => 3,
            SyncStatus::PushFailed => 4,
            SyncStatus::Conflict => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SyncStatus::NoChanges => "no_changes",
            SyncStatus::UpToDate => "up_to_date",
            SyncStatus::Committed => "committed",
            SyncStatus::Synced => "synced",
            SyncStatus::PushFailed => "push_failed",
            SyncStatus::Conflict => "conflict",
        }
    }

    /// Conflict and failed pushes need the user before the next pass proceeds normally
    pub fn needs_attention(self) -> bool {
        matches!(self, SyncStatus::PushFailed | SyncStatus::Conflict)
    }
}

impl From<SyncStatus> for u8 {
    fn from(status: SyncStatus) -> u8 {
        status.code()
    }
}

impl TryFrom<u8> for SyncStatus {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        SyncStatus::ALL
            .into_iter()
            .find(|status| status.code() == code)
            .ok_or_else(|| format!("unknown sync status code {}", code))
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SyncStatus::NoChanges => "No changes",
            SyncStatus::UpToDate => "Up to date",
            SyncStatus::Committed => "Committed",
            SyncStatus::Synced => "Synced",
            SyncStatus::PushFailed => "Push failed",
            SyncStatus::Conflict => "Conflict",
        };
        f.write_str(text)
    }
}

/// The value handed back to callers after a pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    status: SyncStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    files_changed: Option<usize>,
}

impl SyncResult {
    pub fn new(status: SyncStatus, message: Option<String>, files_changed: Option<usize>) -> Self {
        Self {
            status,
            message,
            files_changed,
        }
    }

    pub fn status(&self) -> SyncStatus {
        self.status
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn files_changed(&self) -> Option<usize> {
        self.files_changed
    }
}

impl fmt::Display for SyncResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.status)?;
        if let Some(message) = &self.message {
            write!(f, ": {}", message)?;
        }
        Ok(())
    }
}

/// What happened during a pass, as far as status is concerned
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassFacts {
    pub conflict: bool,
    pub push_failed: bool,
    pub committed: bool,
    pub pushed: bool,
    pub has_remote: bool,
    /// Local commits remain that the remote has not received
    pub unpushed_commits: bool,
    /// The pull step could not reach or merge from the remote
    pub pull_failed: bool,
}

/// Map pass facts to exactly one status
///
/// A pass is reported by its worst outcome: a conflict overrides everything
/// and a failed push overrides the commit that preceded it. A pass that did
/// nothing is `UpToDate` only when the remote has every local commit and
/// the pull actually confirmed it.
pub fn classify(facts: &PassFacts) -> SyncStatus {
    if facts.conflict {
        SyncStatus::Conflict
    } else if facts.push_failed {
        SyncStatus::PushFailed
    } else if facts.pushed {
        SyncStatus::Synced
    } else if facts.committed {
        SyncStatus::Committed
    } else if facts.has_remote && !facts.unpushed_commits && !facts.pull_failed {
        SyncStatus::UpToDate
    } else {
        SyncStatus::NoChanges
    }
}
