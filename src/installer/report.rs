use std::fmt;
use std::path::PathBuf;

use crate::error::InstallError;
use crate::package::Package;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueKind {
    /// A packaging artifact or library variant could not be deleted.
    Cleanup,
    /// A special content folder could not be moved to its destination.
    Relocation,
    /// An extracted file could not be marked read-only.
    ReadOnly,
}

/// A partial failure that did not stop the operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub kind: IssueKind,
    pub package: String,
    pub path: PathBuf,
    pub message: String,
}

impl Issue {
    pub fn new(kind: IssueKind, package: &str, path: PathBuf, error: &anyhow::Error) -> Self {
        Self {
            kind,
            package: package.to_string(),
            path,
            message: format!("{:#}", error),
        }
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let action = match self.kind {
            IssueKind::Cleanup => "clean up",
            IssueKind::Relocation => "relocate",
            IssueKind::ReadOnly => "mark read-only",
        };
        write!(
            f,
            "{}: could not {} {}: {}",
            self.package,
            action,
            self.path.display(),
            self.message
        )
    }
}

/// A package of a batch (restore, update) that failed while the batch
/// went on.
#[derive(Debug)]
pub struct Failure {
    pub package: String,
    pub error: InstallError,
}

/// What an install or uninstall run changed.
#[derive(Debug, Default)]
pub struct InstallReport {
    pub installed: Vec<Package>,
    pub uninstalled: Vec<Package>,
    pub issues: Vec<Issue>,
    pub failures: Vec<Failure>,
}

impl InstallReport {
    /// Nothing changed on disk.
    pub fn is_unchanged(&self) -> bool {
        self.installed.is_empty() && self.uninstalled.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.is_unchanged() && self.issues.is_empty() && self.failures.is_empty()
    }
}
