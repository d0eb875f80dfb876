//! Per-host and per-task execution records.

use super::{RunPhase, TaskStatus};
use crate::errors::{FailureKind, SessionError};
use crate::inventory::Host;
use crate::pipeline::TaskId;
use serde::{Deserialize, Serialize};

/// What went wrong on a single host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostErrorKind {
    /// The session could not be established.
    ConnectionFailure,
    /// The command exited non-zero.
    RemoteCommandFailed,
    /// The command exceeded its time ceiling.
    Timeout,
    /// The run was cancelled while the command was in flight.
    Cancelled,
    /// Release bookkeeping failed on this host (e.g. nothing to roll back to).
    Release,
}

impl HostErrorKind {
    /// Maps to the run-level failure classification.
    #[must_use]
    pub const fn failure_kind(self) -> FailureKind {
        match self {
            Self::ConnectionFailure => FailureKind::ConnectionFailure,
            Self::RemoteCommandFailed | Self::Timeout | Self::Release => FailureKind::TaskFailure,
            Self::Cancelled => FailureKind::Cancelled,
        }
    }
}

/// Error detail attached to a failed host result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostError {
    /// Error classification.
    pub kind: HostErrorKind,
    /// Human readable message.
    pub message: String,
}

impl From<&SessionError> for HostError {
    fn from(err: &SessionError) -> Self {
        let kind = match err {
            SessionError::ConnectionFailed { .. } => HostErrorKind::ConnectionFailure,
            SessionError::RemoteCommandFailed { .. } => HostErrorKind::RemoteCommandFailed,
            SessionError::Timeout { .. } => HostErrorKind::Timeout,
            SessionError::Cancelled { .. } => HostErrorKind::Cancelled,
        };
        Self {
            kind,
            message: err.to_string(),
        }
    }
}

/// Outcome of one task on one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostResult {
    /// The host.
    pub host: Host,
    /// Outcome.
    pub status: TaskStatus,
    /// Exit code of the last command run, if any ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Captured combined stdout/stderr.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output: String,
    /// Rendered commands that were (or in a dry run, would have been) sent.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<String>,
    /// Error detail when failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<HostError>,
}

impl HostResult {
    /// A successful result.
    #[must_use]
    pub fn success(host: Host, exit_code: i32, output: impl Into<String>) -> Self {
        Self {
            host,
            status: TaskStatus::Success,
            exit_code: Some(exit_code),
            output: output.into(),
            commands: Vec::new(),
            error: None,
        }
    }

    /// A failed result.
    #[must_use]
    pub fn failure(host: Host, error: HostError) -> Self {
        Self {
            host,
            status: TaskStatus::Failure,
            exit_code: None,
            output: String::new(),
            commands: Vec::new(),
            error: Some(error),
        }
    }

    /// A failed result built from a session error, keeping its exit code and output.
    #[must_use]
    pub fn from_session_error(host: Host, err: &SessionError) -> Self {
        let mut result = Self::failure(host, HostError::from(err));
        if let SessionError::RemoteCommandFailed {
            exit_code, output, ..
        } = err
        {
            result.exit_code = Some(*exit_code);
            result.output.clone_from(output);
        }
        result
    }

    /// A skipped result carrying the commands that would have run.
    #[must_use]
    pub fn skipped(host: Host, commands: Vec<String>) -> Self {
        Self {
            host,
            status: TaskStatus::Skipped,
            exit_code: None,
            output: String::new(),
            commands,
            error: None,
        }
    }

    /// Records the commands sent.
    #[must_use]
    pub fn with_commands(mut self, commands: Vec<String>) -> Self {
        self.commands = commands;
        self
    }
}

/// Outcome of one task across its target hosts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    /// The task.
    pub task: TaskId,
    /// Run phase the task belonged to.
    pub phase: RunPhase,
    /// Aggregated status.
    pub status: TaskStatus,
    /// Whether failures were tolerated.
    #[serde(default)]
    pub best_effort: bool,
    /// Per-host outcomes, ordered by host.
    pub hosts: Vec<HostResult>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: f64,
}

impl TaskResult {
    /// Builds a task result, sorting hosts and aggregating their status.
    #[must_use]
    pub fn new(task: TaskId, phase: RunPhase, mut hosts: Vec<HostResult>, duration_ms: f64) -> Self {
        hosts.sort_by(|a, b| a.host.cmp(&b.host));
        let status = TaskStatus::aggregate(hosts.iter().map(|h| &h.status));
        Self {
            task,
            phase,
            status,
            best_effort: false,
            hosts,
            duration_ms,
        }
    }

    /// Marks the task as best-effort.
    #[must_use]
    pub fn best_effort(mut self, best_effort: bool) -> Self {
        self.best_effort = best_effort;
        self
    }

    /// Hosts that failed.
    pub fn failed_hosts(&self) -> impl Iterator<Item = &HostResult> {
        self.hosts.iter().filter(|h| h.status.is_failure())
    }

    /// Result for a given host.
    #[must_use]
    pub fn host(&self, host: &str) -> Option<&HostResult> {
        self.hosts.iter().find(|h| h.host.as_str() == host)
    }

    /// The first failing host error, by host order.
    #[must_use]
    pub fn first_error(&self) -> Option<(&Host, &HostError)> {
        self.failed_hosts()
            .find_map(|h| h.error.as_ref().map(|e| (&h.host, e)))
    }
}
