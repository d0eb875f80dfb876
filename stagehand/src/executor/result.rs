//! Run outcome records.

use crate::config::StageId;
use crate::core::{HostErrorKind, ReleaseStatus, RunPhase, TaskResult, TaskStatus};
use crate::errors::FailureKind;
use crate::inventory::Host;
use crate::pipeline::TaskId;
use crate::release::Release;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use uuid::Uuid;

/// The first fatal failure of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunFailure {
    /// Failure classification.
    pub kind: FailureKind,
    /// The task that failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskId>,
    /// The first failing host.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<Host>,
    /// Human readable message.
    pub message: String,
}

impl RunFailure {
    /// The failure of a settled task, taken from its first failing host.
    ///
    /// A connection failure anywhere outranks command failures so the run is
    /// classified by the most basic problem.
    #[must_use]
    pub fn from_task(result: &TaskResult) -> Option<Self> {
        let connection = result.failed_hosts().find(|h| {
            h.error
                .as_ref()
                .is_some_and(|e| e.kind == HostErrorKind::ConnectionFailure)
        });
        let host = connection.or_else(|| result.failed_hosts().next())?;
        let error = host.error.as_ref()?;
        Some(Self {
            kind: error.kind.failure_kind(),
            task: Some(result.task.clone()),
            host: Some(host.host.clone()),
            message: error.message.clone(),
        })
    }

    /// A run cancelled between tasks.
    #[must_use]
    pub fn cancelled(reason: Option<String>, task: Option<TaskId>) -> Self {
        Self {
            kind: FailureKind::Cancelled,
            task,
            host: None,
            message: reason.unwrap_or_else(|| "Run cancelled".to_string()),
        }
    }
}

/// The outcome of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    /// Unique run id.
    pub run_id: Uuid,
    /// The stage deployed to.
    pub stage: StageId,
    /// Final phase, `Done` or `Failed`.
    pub phase: RunPhase,
    /// Commands were rendered but not sent.
    pub dry_run: bool,
    /// The release created (or rolled back to) by this run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release: Option<Release>,
    /// Status of that release on each dispatched host.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub release_hosts: BTreeMap<Host, ReleaseStatus>,
    /// The first fatal failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<RunFailure>,
    /// Results of the dispatched tasks, in order.
    pub tasks: Vec<TaskResult>,
    /// Wall clock duration in milliseconds.
    pub duration_ms: f64,
}

impl RunResult {
    /// Whether the run reached `Done`.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.phase == RunPhase::Done
    }

    /// Process exit code: 0 on success, otherwise by failure kind.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match &self.failure {
            None if self.is_success() => 0,
            None => FailureKind::TaskFailure.exit_code(),
            Some(failure) => failure.kind.exit_code(),
        }
    }

    /// Looks up a task result.
    #[must_use]
    pub fn task(&self, id: &str) -> Option<&TaskResult> {
        self.tasks.iter().find(|t| t.task.as_str() == id)
    }

    /// Tasks that completed without a failure.
    pub fn completed_tasks(&self) -> impl Iterator<Item = &TaskResult> {
        self.tasks
            .iter()
            .filter(|t| t.status != TaskStatus::Failure)
    }

    /// One line per task plus the failure, for logs and terminals.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Run {} on {}: {}{} ({:.0}ms)",
            self.run_id,
            self.stage,
            self.phase,
            if self.dry_run { " [dry run]" } else { "" },
            self.duration_ms
        );
        for task in &self.tasks {
            let _ = writeln!(
                out,
                "  {:<24} {:<10} {:<8} {} host(s)",
                task.task.as_str(),
                task.phase.to_string(),
                task.status.to_string(),
                task.hosts.len()
            );
        }
        if let Some(failure) = &self.failure {
            let _ = write!(out, "{}: {}", failure.kind, failure.message);
            if let Some(task) = &failure.task {
                let _ = write!(out, " (task {task}");
                if let Some(host) = &failure.host {
                    let _ = write!(out, " on {host}");
                }
                out.push(')');
            }
            out.push('\n');
        }
        out
    }
}
