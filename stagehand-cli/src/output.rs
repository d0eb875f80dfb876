//! Terminal and JSON rendering.

use stagehand::config::StageContext;
use stagehand::core::TaskStatus;
use stagehand::errors::StagehandError;
use stagehand::executor::RunResult;
use stagehand::pipeline::TaskGraph;
use std::fmt::Write as _;

/// Renders a run for the terminal: the task table, per-host detail of
/// failed tasks and the failure line.
pub fn run_table(result: &RunResult) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<24} {:<11} {:<8} {:>9}  HOSTS",
        "TASK", "PHASE", "STATUS", "TIME"
    );
    for task in &result.tasks {
        let _ = writeln!(
            out,
            "{:<24} {:<11} {:<8} {:>7.0}ms  {}",
            task.task.as_str(),
            task.phase.to_string(),
            status_label(task.status, task.best_effort),
            task.duration_ms,
            task.hosts.len()
        );
        if task.status == TaskStatus::Failure {
            for host in task.failed_hosts() {
                let message = host.error.as_ref().map_or("", |e| e.message.as_str());
                let _ = writeln!(out, "    {}: {}", host.host, message);
                for line in host.output.lines().rev().take(5).collect::<Vec<_>>().into_iter().rev() {
                    let _ = writeln!(out, "      | {line}");
                }
            }
        }
        if result.dry_run {
            for host in &task.hosts {
                for command in &host.commands {
                    let _ = writeln!(out, "    {} $ {command}", host.host);
                }
            }
        }
    }

    let _ = writeln!(out);
    if let Some(release) = &result.release {
        let _ = writeln!(out, "Release {} ({})", release.id, release.status);
        if result
            .release_hosts
            .values()
            .any(|status| *status != release.status)
        {
            for (host, status) in &result.release_hosts {
                let _ = writeln!(out, "    {host}: {status}");
            }
        }
    }
    match &result.failure {
        Some(failure) => {
            let _ = write!(out, "{}: {}", failure.kind, failure.message);
            if let Some(task) = &failure.task {
                let _ = write!(out, " [task {task}");
                if let Some(host) = &failure.host {
                    let _ = write!(out, ", host {host}");
                }
                out.push(']');
            }
            let _ = writeln!(
                out,
                "\nCompleted: {}",
                result
                    .completed_tasks()
                    .map(|t| t.task.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
        None => {
            let _ = writeln!(
                out,
                "Stage {} {} in {:.1}s",
                result.stage,
                if result.dry_run { "planned" } else { "deployed" },
                result.duration_ms / 1000.0
            );
        }
    }
    out
}

fn status_label(status: TaskStatus, best_effort: bool) -> String {
    if status == TaskStatus::Failure && best_effort {
        "failed*".to_string()
    } else {
        status.to_string()
    }
}

/// Renders the task order, with target hosts when a stage was resolved.
pub fn task_list(graph: &TaskGraph, context: Option<&StageContext>) -> String {
    let mut out = String::new();
    for ((i, task), phase) in graph.tasks().iter().enumerate().zip(graph.phases()) {
        let _ = write!(
            out,
            "{:>2}. {:<24} {:<11} {:<9}",
            i + 1,
            task.id.as_str(),
            phase.to_string(),
            task.action.label()
        );
        if !task.roles.is_empty() {
            let _ = write!(out, " roles={}", task.roles.join(","));
        }
        if let Some(hosts) = context.and_then(|c| c.hosts_for_roles(&task.roles).ok()) {
            let hosts: Vec<&str> = hosts.iter().map(|h| h.as_str()).collect();
            let _ = write!(out, " hosts={}", hosts.join(","));
        }
        if task.best_effort {
            out.push_str(" (best effort)");
        }
        if !task.description.is_empty() {
            let _ = write!(out, "  # {}", task.description);
        }
        out.push('\n');
    }
    out
}

/// JSON for an error, as printed with `--json`.
pub fn error_json(err: &anyhow::Error) -> serde_json::Value {
    match err.downcast_ref::<StagehandError>() {
        Some(err) => err.to_json(),
        None => serde_json::json!({ "code": "INTERNAL", "message": format!("{err:#}") }),
    }
}
