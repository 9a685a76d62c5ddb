//! Conflict detection policy
//!
//! The engine never resolves conflicts. It only needs to know whether the
//! working tree is in a conflicted state and whether the user has already
//! removed the markers, so a manual commit may conclude the merge.

use regex::Regex;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, warn};

use crate::executor::CommandOutput;
use crate::git::WorkingTreeStatus;

/// What the detector found
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConflictReport {
    /// Paths git reports as conflicted
    pub files: Vec<String>,
    /// Subset of `files` that still contain conflict markers
    pub unresolved: Vec<String>,
    /// A merge is waiting to be concluded with a commit
    pub merge_in_progress: bool,
}

impl ConflictReport {
    pub fn is_conflicted(&self) -> bool {
        !self.files.is_empty() || self.merge_in_progress
    }

    /// True when only a commit is missing to conclude the merge
    pub fn resolvable_by_commit(&self) -> bool {
        self.is_conflicted() && self.unresolved.is_empty()
    }

    pub fn describe(&self) -> String {
        match self.files.len() {
            0 => "A merge is in progress; commit it to continue syncing".to_string(),
            1 => format!("Conflict in {}", self.files[0]),
            n => format!("{} files have conflicts", n),
        }
    }
}

/// Hook deciding whether the tree is conflicted after a pull or merge
pub trait ConflictDetector: Send + Sync {
    fn detect(
        &self,
        pull_output: Option<&CommandOutput>,
        tree: &WorkingTreeStatus,
        merge_in_progress: bool,
        root: &Path,
    ) -> ConflictReport;
}

/// Default detector: git's unmerged paths plus a scan for marker lines
///
/// Only `<<<<<<< ` and `>>>>>>> ` lines count as markers. A bare `=======`
/// line is a valid Markdown heading underline and is ignored.
#[derive(Debug, Default, Clone)]
pub struct MarkerConflictDetector;

fn marker_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?m)^(<{7}|>{7})( |$)").expect("static marker pattern is valid"))
}

fn conflict_line_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?m)^CONFLICT \([^)]*\): .*?(?:Merge conflict in |deleted in \S+ and modified in \S+\.\s+Version \S+ of )(.+?)(?: left in tree\.)?\s*$")
            .expect("static conflict line pattern is valid")
    })
}

/// Paths named in `CONFLICT (...)` lines of merge output
pub fn conflicted_paths_from_output(output: &str) -> Vec<String> {
    conflict_line_pattern()
        .captures_iter(output)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .collect()
}

/// True when `content` still holds conflict markers
pub fn has_conflict_markers(content: &str) -> bool {
    marker_pattern().is_match(content)
}

impl ConflictDetector for MarkerConflictDetector {
    fn detect(
        &self,
        pull_output: Option<&CommandOutput>,
        tree: &WorkingTreeStatus,
        merge_in_progress: bool,
        root: &Path,
    ) -> ConflictReport {
        let mut files: BTreeSet<String> = tree.conflicted.iter().cloned().collect();
        if let Some(output) = pull_output {
            files.extend(conflicted_paths_from_output(&output.combined()));
        }

        let unresolved = files
            .iter()
            .filter(|file| match std::fs::read(root.join(file)) {
                Ok(bytes) => has_conflict_markers(&String::from_utf8_lossy(&bytes)),
                // deleted on one side; nothing to scan
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
                Err(e) => {
                    warn!("Could not scan {} for conflict markers: {}", file, e);
                    true
                }
            })
            .cloned()
            .collect::<Vec<_>>();

        let report = ConflictReport {
            files: files.into_iter().collect(),
            unresolved,
            merge_in_progress,
        };
        if report.is_conflicted() {
            debug!("Conflict report: {:?}", report);
        }
        report
    }
}
