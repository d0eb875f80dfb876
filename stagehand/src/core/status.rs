//! Task, run and release status enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of a task on one host, or of a task across its hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Completed successfully.
    Success,
    /// Failed.
    Failure,
    /// Not dispatched (dry run or no targets).
    Skipped,
}

impl TaskStatus {
    /// Returns true if the status indicates failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure)
    }

    /// Folds per-host statuses into a task status.
    ///
    /// Any failure wins; otherwise any success; otherwise skipped.
    #[must_use]
    pub fn aggregate<'a>(statuses: impl IntoIterator<Item = &'a Self>) -> Self {
        let mut result = Self::Skipped;
        for status in statuses {
            match status {
                Self::Failure => return Self::Failure,
                Self::Success => result = Self::Success,
                Self::Skipped => {}
            }
        }
        result
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// Lifecycle phase of a deployment run.
///
/// Phases only move forward; `Failed` is absorbing and `Done` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// Not started.
    #[default]
    Pending,
    /// Fetching and building the artifact.
    Building,
    /// Switching the `current` symlink.
    Activating,
    /// Restarting services against the new release.
    Restarting,
    /// Pruning old releases and fixing up.
    Cleanup,
    /// Completed successfully.
    Done,
    /// Stopped on a fatal failure.
    Failed,
}

impl RunPhase {
    /// Returns true for `Done` and `Failed`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Returns true if the machine may move from `self` to `next`.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            Self::Failed | Self::Done => true,
            Self::Pending => false,
            _ => next >= *self,
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Building => write!(f, "building"),
            Self::Activating => write!(f, "activating"),
            Self::Restarting => write!(f, "restarting"),
            Self::Cleanup => write!(f, "cleanup"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Status of a release directory in a host's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseStatus {
    /// Created, not yet activated.
    Pending,
    /// Target of the `current` symlink.
    Active,
    /// The run failed before activation; kept for inspection.
    Failed,
    /// A previous release kept for rollback.
    Retained,
    /// Removed from disk.
    Purged,
}

impl fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Active => write!(f, "active"),
            Self::Failed => write!(f, "failed"),
            Self::Retained => write!(f, "retained"),
            Self::Purged => write!(f, "purged"),
        }
    }
}
