//! The run engine.
//!
//! Tasks run one after another in graph order. Within a task every target
//! host runs concurrently and the task settles only once every host branch
//! is back. A failed task stops the run unless it is best-effort.

use super::{RunFailure, RunResult};
use crate::cancellation::CancellationToken;
use crate::config::StageContext;
use crate::core::{HostError, HostErrorKind, HostResult, ReleaseStatus, RunPhase, TaskResult, TaskStatus};
use crate::errors::{ReleaseError, Result};
use crate::events::{event_types, EventSink, NoOpEventSink};
use crate::inventory::Host;
use crate::pipeline::{Task, TaskAction, TaskGraph};
use crate::release::{Release, ReleaseCoordinator, ReleaseStep};
use crate::session::{Session, SessionManager, SessionOptions, Transport};
use crate::template::TemplateVars;
use crate::utils::{generate_run_id, now_utc};
use futures::future::join_all;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// A task with its phase and the rendered commands of each target host.
#[derive(Debug)]
struct PlannedTask<'a> {
    task: &'a Task,
    phase: RunPhase,
    hosts: Vec<PlannedHost>,
}

#[derive(Debug)]
struct PlannedHost {
    host: Host,
    commands: Vec<String>,
}

/// Executes task graphs against a stage.
///
/// ```rust,ignore
/// let executor = Executor::new(Arc::new(SshTransport::default()))
///     .with_event_sink(Arc::new(LoggingEventSink::default()));
/// let result = executor.run(&graph, &context, &[]).await?;
/// std::process::exit(i32::from(result.exit_code()));
/// ```
pub struct Executor {
    transport: Arc<dyn Transport>,
    events: Arc<dyn EventSink>,
    cancel: Arc<CancellationToken>,
    dry_run: bool,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("transport", &self.transport)
            .field("cancel", &self.cancel)
            .field("dry_run", &self.dry_run)
            .finish_non_exhaustive()
    }
}

impl Executor {
    /// Creates an executor over a transport.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            events: Arc::new(NoOpEventSink),
            cancel: Arc::new(CancellationToken::new()),
            dry_run: false,
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Uses an externally owned cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: Arc<CancellationToken>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Renders commands without opening sessions or dispatching anything.
    #[must_use]
    pub const fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// The token that cancels runs of this executor.
    #[must_use]
    pub fn cancellation_token(&self) -> Arc<CancellationToken> {
        Arc::clone(&self.cancel)
    }

    /// Runs `graph` on the hosts of `context`.
    ///
    /// `role_filter` narrows every task to hosts of the named roles; empty
    /// means no narrowing.
    ///
    /// # Errors
    ///
    /// Returns configuration errors (unknown role, unresolvable template)
    /// before anything remote happens. Remote failures are reported in the
    /// returned [`RunResult`].
    pub async fn run(
        &self,
        graph: &TaskGraph,
        context: &StageContext,
        role_filter: &[String],
    ) -> Result<RunResult> {
        let started = Instant::now();
        let run_id = generate_run_id();
        let coordinator = ReleaseCoordinator::new(context);
        let release = graph
            .tasks()
            .iter()
            .any(|t| matches!(t.action, TaskAction::Activate))
            .then(|| coordinator.begin_release(now_utc()));
        let plan = plan(graph, context, role_filter, release.as_ref())?;

        let host_count = plan
            .iter()
            .flat_map(|p| p.hosts.iter().map(|h| &h.host))
            .collect::<BTreeSet<_>>()
            .len();
        info!(
            run_id = %run_id,
            stage = %context.stage,
            tasks = plan.len(),
            hosts = host_count,
            dry_run = self.dry_run,
            "Starting run"
        );
        self.events
            .emit(
                event_types::RUN_STARTED,
                Some(serde_json::json!({
                    "run_id": run_id.to_string(),
                    "stage": context.stage,
                    "tasks": plan.len(),
                    "hosts": host_count,
                    "dry_run": self.dry_run,
                    "release": release.as_ref().map(|r| r.id.clone()),
                })),
            )
            .await;

        let sessions = SessionManager::new(
            Arc::clone(&self.transport),
            SessionOptions::from_context(context),
            Arc::clone(&self.cancel),
        );

        let mut phase = RunPhase::Pending;
        let mut tasks = Vec::with_capacity(plan.len());
        let mut failure = None;
        let mut activated = false;
        let mut dispatched = BTreeSet::new();

        for planned in &plan {
            if self.cancel.is_cancelled() {
                failure = Some(RunFailure::cancelled(
                    self.cancel.reason(),
                    Some(planned.task.id.clone()),
                ));
                break;
            }
            advance(&mut phase, planned.phase);

            let result = self
                .dispatch(planned, &sessions, &coordinator, release.as_ref())
                .await;
            if !self.dry_run {
                dispatched.extend(planned.hosts.iter().map(|h| h.host.clone()));
            }

            let failed = result.status == TaskStatus::Failure;
            let fatal = failed && (!planned.task.best_effort || self.cancel.is_cancelled());
            self.events
                .emit(
                    if failed {
                        event_types::TASK_FAILED
                    } else {
                        event_types::TASK_COMPLETED
                    },
                    Some(task_event(&result)),
                )
                .await;

            if fatal {
                failure = if self.cancel.is_cancelled() {
                    Some(RunFailure::cancelled(
                        self.cancel.reason(),
                        Some(result.task.clone()),
                    ))
                } else {
                    RunFailure::from_task(&result)
                };
                tasks.push(result);
                break;
            }
            if failed {
                warn!(
                    task = %result.task,
                    failed_hosts = result.failed_hosts().count(),
                    "Best-effort task failed, continuing"
                );
            } else if matches!(planned.task.action, TaskAction::Activate) && !self.dry_run {
                activated = true;
            }
            tasks.push(result);
        }

        advance(
            &mut phase,
            if failure.is_some() {
                RunPhase::Failed
            } else {
                RunPhase::Done
            },
        );

        let (release, release_hosts) = self
            .settle_release(release, &coordinator, &sessions, &dispatched, failure.is_some(), activated, graph)
            .await;
        sessions.release_all().await;

        let result = RunResult {
            run_id,
            stage: context.stage,
            phase,
            dry_run: self.dry_run,
            release,
            release_hosts,
            failure,
            tasks,
            duration_ms: started.elapsed().as_secs_f64() * 1000.0,
        };
        info!(
            run_id = %run_id,
            phase = %result.phase,
            tasks = result.tasks.len(),
            duration_ms = result.duration_ms,
            "Run finished"
        );
        self.events
            .emit(
                event_types::RUN_COMPLETED,
                Some(serde_json::json!({
                    "run_id": run_id.to_string(),
                    "phase": result.phase,
                    "exit_code": result.exit_code(),
                    "failure": result.failure,
                    "duration_ms": result.duration_ms,
                })),
            )
            .await;
        Ok(result)
    }

    async fn dispatch(
        &self,
        planned: &PlannedTask<'_>,
        sessions: &SessionManager,
        coordinator: &ReleaseCoordinator,
        release: Option<&Release>,
    ) -> TaskResult {
        let task = planned.task;
        let started = Instant::now();
        info!(
            task = %task.id,
            phase = %planned.phase,
            hosts = planned.hosts.len(),
            "Running task"
        );
        self.events.try_emit(
            event_types::TASK_STARTED,
            Some(serde_json::json!({
                "task": task.id,
                "phase": planned.phase,
                "hosts": planned.hosts.iter().map(|h| h.host.as_str()).collect::<Vec<_>>(),
            })),
        );

        let hosts = if self.dry_run {
            planned
                .hosts
                .iter()
                .map(|h| HostResult::skipped(h.host.clone(), preview(task, h, coordinator, release)))
                .collect()
        } else {
            join_all(
                planned
                    .hosts
                    .iter()
                    .map(|h| run_on_host(task, h, sessions, coordinator, release)),
            )
            .await
        };

        TaskResult::new(
            task.id.clone(),
            planned.phase,
            hosts,
            started.elapsed().as_secs_f64() * 1000.0,
        )
        .best_effort(task.best_effort)
    }

    /// Final ledger updates, the release reported for the run and its status
    /// on each dispatched host.
    ///
    /// A run that failed without completing activation fails its release on
    /// every dispatched host; hosts that already switched are pointed back.
    #[allow(clippy::too_many_arguments)]
    async fn settle_release(
        &self,
        release: Option<Release>,
        coordinator: &ReleaseCoordinator,
        sessions: &SessionManager,
        dispatched: &BTreeSet<Host>,
        failed: bool,
        activated: bool,
        graph: &TaskGraph,
    ) -> (Option<Release>, BTreeMap<Host, ReleaseStatus>) {
        if self.dry_run {
            return (release, BTreeMap::new());
        }
        let release = match release {
            Some(release) if activated => Some(release.with_status(ReleaseStatus::Active)),
            Some(release) if failed => {
                join_all(
                    dispatched
                        .iter()
                        .map(|host| fail_release_on(host, &release, coordinator, sessions)),
                )
                .await;
                Some(release.with_status(ReleaseStatus::Failed))
            }
            Some(release) => Some(release),
            None if graph.switches_release() && !failed => dispatched
                .iter()
                .find_map(|host| coordinator.history(host).active().cloned()),
            None => None,
        };

        let hosts: BTreeMap<Host, ReleaseStatus> = release
            .as_ref()
            .map(|release| {
                dispatched
                    .iter()
                    .filter_map(|host| {
                        coordinator
                            .status_on(host, &release.id)
                            .map(|status| (host.clone(), status))
                    })
                    .collect()
            })
            .unwrap_or_default();

        if let Some(release) = release.as_ref().filter(|r| r.status == ReleaseStatus::Failed) {
            let still_active: Vec<&str> = hosts
                .iter()
                .filter(|(_, status)| **status == ReleaseStatus::Active)
                .map(|(host, _)| host.as_str())
                .collect();
            if still_active.is_empty() {
                warn!(release = %release.id, "Release marked failed; previous release stays active");
            } else {
                warn!(
                    release = %release.id,
                    hosts = %still_active.join(","),
                    "Release failed but is still active on some hosts"
                );
            }
        }
        (release, hosts)
    }
}

/// Fails `release` on one host, restoring the previous release if the host
/// already switched. Remote errors leave the ledger as the host really is.
async fn fail_release_on(
    host: &Host,
    release: &Release,
    coordinator: &ReleaseCoordinator,
    sessions: &SessionManager,
) {
    let step = coordinator.plan_fail(host, release);
    let Some(command) = step.command.clone() else {
        coordinator.commit(host, step);
        return;
    };
    let outcome = match sessions.acquire(host).await {
        Ok(session) => sessions.run(&session, &command).await.map(|_| ()),
        Err(err) => Err(err),
    };
    match outcome {
        Ok(()) => coordinator.commit(host, step),
        Err(err) => {
            warn!(host = %host, release = %release.id, error = %err, "Could not record failed release");
            if coordinator.status_on(host, &release.id) != Some(ReleaseStatus::Active) {
                coordinator.mark_failed(host, release);
            }
        }
    }
}

/// Resolves target hosts and renders every command before anything runs.
fn plan<'a>(
    graph: &'a TaskGraph,
    context: &StageContext,
    role_filter: &[String],
    release: Option<&Release>,
) -> Result<Vec<PlannedTask<'a>>> {
    let allowed = if role_filter.is_empty() {
        None
    } else {
        Some(context.roles.resolve_hosts(role_filter)?)
    };
    let vars = release_vars(context, release);
    let mut probe = vars.clone();
    probe.insert(TemplateVars::HOST.to_string(), String::new());

    let mut planned = Vec::with_capacity(graph.len());
    for (task, phase) in graph.tasks().iter().zip(graph.phases()) {
        for template in task.templates() {
            template.validate(&probe)?;
        }

        let mut targets = context.hosts_for_roles(&task.roles)?;
        if let Some(allowed) = &allowed {
            targets.retain(|h| allowed.contains(h));
        }
        let mut hosts = Vec::with_capacity(targets.len());
        for host in targets {
            let mut host_vars = vars.clone();
            host_vars.insert(TemplateVars::HOST.to_string(), host.to_string());
            let commands = task
                .templates()
                .iter()
                .map(|t| t.render(&host_vars))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            hosts.push(PlannedHost { host, commands });
        }
        planned.push(PlannedTask { task, phase, hosts });
    }
    debug!(tasks = planned.len(), "Planned run");
    Ok(planned)
}

/// Stage variables plus `release_path` and `release_name`.
///
/// Without a new release (rollbacks, ad hoc task runs) these point at
/// `current`.
fn release_vars(context: &StageContext, release: Option<&Release>) -> BTreeMap<String, String> {
    let mut vars = context.template_vars();
    let (path, name) = match release {
        Some(release) => (release.path.clone(), release.id.clone()),
        None => (context.current_path(), "current".to_string()),
    };
    vars.insert(TemplateVars::RELEASE_PATH.to_string(), path);
    vars.insert(TemplateVars::RELEASE_NAME.to_string(), name);
    vars
}

fn advance(phase: &mut RunPhase, next: RunPhase) {
    if *phase != next && phase.can_transition_to(next) {
        debug!(from = %phase, to = %next, "Run phase changed");
        *phase = next;
    }
}

fn task_event(result: &TaskResult) -> serde_json::Value {
    serde_json::json!({
        "task": result.task,
        "phase": result.phase,
        "status": result.status,
        "best_effort": result.best_effort,
        "failed_hosts": result.failed_hosts().map(|h| h.host.as_str()).collect::<Vec<_>>(),
        "duration_ms": result.duration_ms,
    })
}

/// Commands a dry run reports for one host.
fn preview(
    task: &Task,
    planned: &PlannedHost,
    coordinator: &ReleaseCoordinator,
    release: Option<&Release>,
) -> Vec<String> {
    let layout = coordinator.layout();
    match (&task.action, release) {
        (TaskAction::Commands(_), _) => planned.commands.clone(),
        (TaskAction::Activate, Some(release)) => vec![layout.activate_command(&release.path)],
        _ => vec![layout.discover_command()],
    }
}

async fn run_on_host(
    task: &Task,
    planned: &PlannedHost,
    sessions: &SessionManager,
    coordinator: &ReleaseCoordinator,
    release: Option<&Release>,
) -> HostResult {
    let host = &planned.host;
    let session = match sessions.acquire(host).await {
        Ok(session) => session,
        Err(err) => return HostResult::from_session_error(host.clone(), &err),
    };

    match &task.action {
        TaskAction::Commands(_) => run_commands(sessions, &session, &planned.commands).await,
        TaskAction::Activate => match release {
            Some(release) => {
                release_step(sessions, &session, coordinator, || {
                    coordinator.plan_activate(host, release)
                })
                .await
            }
            None => HostResult::failure(
                host.clone(),
                HostError {
                    kind: HostErrorKind::Release,
                    message: "No release to activate".to_string(),
                },
            ),
        },
        TaskAction::Rollback => {
            release_step(sessions, &session, coordinator, || coordinator.plan_rollback(host)).await
        }
        TaskAction::Prune => {
            release_step(sessions, &session, coordinator, || Ok(coordinator.plan_prune(host))).await
        }
    }
}

async fn run_commands(sessions: &SessionManager, session: &Session, commands: &[String]) -> HostResult {
    let host = session.host();
    let mut output = String::new();
    let mut exit_code = 0;
    for (i, command) in commands.iter().enumerate() {
        match sessions.run(session, command).await {
            Ok(out) => {
                output.push_str(&out.output);
                exit_code = out.exit_code;
            }
            Err(err) => {
                return HostResult::from_session_error(host.clone(), &err)
                    .with_commands(commands[..=i].to_vec());
            }
        }
    }
    HostResult::success(host.clone(), exit_code, output).with_commands(commands.to_vec())
}

/// Discovers the host's releases if needed, then runs and commits a step.
async fn release_step<F>(
    sessions: &SessionManager,
    session: &Session,
    coordinator: &ReleaseCoordinator,
    plan: F,
) -> HostResult
where
    F: FnOnce() -> std::result::Result<ReleaseStep, ReleaseError>,
{
    let host = session.host();
    let mut commands = Vec::new();

    if !coordinator.is_discovered(host) {
        let discover = coordinator.layout().discover_command();
        commands.push(discover.clone());
        match sessions.run(session, &discover).await {
            Ok(out) => coordinator.record_discovery(host, &out.output),
            Err(err) => {
                return HostResult::from_session_error(host.clone(), &err).with_commands(commands)
            }
        }
    }

    let step = match plan() {
        Ok(step) => step,
        Err(err) => {
            return HostResult::failure(
                host.clone(),
                HostError {
                    kind: HostErrorKind::Release,
                    message: err.to_string(),
                },
            )
            .with_commands(commands);
        }
    };

    let mut output = String::new();
    if let Some(command) = &step.command {
        commands.push(command.clone());
        match sessions.run(session, command).await {
            Ok(out) => output = out.output,
            Err(err) => {
                return HostResult::from_session_error(host.clone(), &err).with_commands(commands)
            }
        }
    }
    coordinator.commit(host, step);
    HostResult::success(host.clone(), 0, output).with_commands(commands)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeployConfig, DEPLOY_FILE};
    use crate::errors::{ConfigError, FailureKind, StagehandError};
    use crate::events::CollectingEventSink;
    use crate::pipeline::recipe;
    use crate::testing::{command_graph, multi_host_context, staging_context, MockTransport, SAMPLE_DEPLOY_TOML};
    use pretty_assertions::assert_eq;
    use std::path::Path;
    use std::time::Duration;

    const STAGING_HOST: &str = "service-staging.timejust.com";
    const RELEASES: &str = "/opt/timejust/service-geo/releases";

    fn sample_graph(rollback: bool) -> TaskGraph {
        DeployConfig::from_toml_str(SAMPLE_DEPLOY_TOML, Path::new(DEPLOY_FILE))
            .unwrap()
            .task_graph(rollback)
            .unwrap()
    }

    fn executor(transport: &Arc<MockTransport>) -> Executor {
        Executor::new(Arc::clone(transport) as Arc<dyn Transport>)
    }

    /// Discovery output for releases on the first `count` days of 2012.
    fn discovery(count: u32) -> String {
        let mut out = String::new();
        for day in 1..=count {
            out.push_str(&format!("201201{day:02}000000\n"));
        }
        if count > 0 {
            out.push_str(&format!("current:{RELEASES}/201201{count:02}000000\n"));
        } else {
            out.push_str("current:\n");
        }
        out
    }

    fn ids(result: &RunResult) -> Vec<&str> {
        result.tasks.iter().map(|t| t.task.as_str()).collect()
    }

    #[tokio::test]
    async fn test_session_reused_across_tasks() {
        let transport = Arc::new(MockTransport::new());
        let graph = command_graph(&[("a:one", "uptime"), ("a:two", "whoami"), ("a:three", "hostname")]);

        let result = executor(&transport)
            .run(&graph, &staging_context(), &[])
            .await
            .unwrap();

        assert!(result.is_success());
        assert_eq!(result.exit_code(), 0);
        assert_eq!(transport.connect_count(), 1);
        assert_eq!(transport.commands_for(STAGING_HOST), vec!["uptime", "whoami", "hostname"]);
        assert_eq!(transport.disconnect_count(), 1);
    }

    #[tokio::test]
    async fn test_full_deploy() {
        let transport = Arc::new(MockTransport::new());
        transport.respond("ls -1", discovery(2));

        let result = executor(&transport)
            .run(&sample_graph(false), &staging_context(), &[])
            .await
            .unwrap();

        assert!(result.is_success(), "{}", result.summary());
        assert_eq!(
            ids(&result),
            vec![
                "deploy:update_code",
                "sbt:build",
                "deploy:symlink",
                "deploy:start",
                "deploy:restart",
                "deploy:cleanup",
                "chown:start",
            ]
        );
        let phases: Vec<RunPhase> = result.tasks.iter().map(|t| t.phase).collect();
        assert_eq!(
            phases,
            vec![
                RunPhase::Building,
                RunPhase::Building,
                RunPhase::Activating,
                RunPhase::Restarting,
                RunPhase::Restarting,
                RunPhase::Cleanup,
                RunPhase::Cleanup,
            ]
        );

        let release = result.release.clone().unwrap();
        assert_eq!(release.status, ReleaseStatus::Active);
        let commands = transport.commands_for(STAGING_HOST);
        assert!(commands.contains(&format!("cd {} && sudo sbt clean update package", release.path)));
        assert!(commands.contains(&format!(
            "cp {}/target/service-geo-1.0.war /opt/jetty/webapps/service-geo.war",
            release.path
        )));
        assert!(commands.contains(&"sudo /etc/init.d/jetty restart".to_string()));
        assert!(commands.iter().any(|c| c.starts_with(&format!("ln -sfn {}", release.path))));

        let dispatch = transport.dispatches().pop().unwrap();
        assert_eq!(dispatch.env["RAILS_ENV"], "staging");
    }

    #[tokio::test]
    async fn test_connection_failure_on_second_of_three_hosts() {
        let transport = Arc::new(MockTransport::new());
        transport.fail_connect("h2", "Permission denied (publickey)");
        let graph = command_graph(&[
            ("deploy:update_code", "git clone repo {release_path}"),
            ("deploy:restart", "restart"),
        ]);

        let result = executor(&transport)
            .run(&graph, &multi_host_context(&["h1", "h2", "h3"]), &[])
            .await
            .unwrap();

        assert_eq!(result.phase, RunPhase::Failed);
        assert_eq!(result.tasks.len(), 1);
        let task = &result.tasks[0];
        assert_eq!(task.status, TaskStatus::Failure);
        assert_eq!(
            task.host("h2").unwrap().error.as_ref().unwrap().kind,
            HostErrorKind::ConnectionFailure
        );
        assert_eq!(task.host("h1").unwrap().status, TaskStatus::Success);

        let failure = result.failure.as_ref().unwrap();
        assert_eq!(failure.kind, FailureKind::ConnectionFailure);
        assert_eq!(failure.host, Some(Host::new("h2")));
        assert_eq!(result.exit_code(), 3);
        assert!(transport.dispatches().iter().all(|d| d.command != "restart"));
        assert_eq!(transport.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_fail_fast_stops_at_failing_task() {
        let transport = Arc::new(MockTransport::new());
        transport.fail_command("step-2", 1, "boom");
        let graph = command_graph(&[
            ("t:one", "step-1"),
            ("t:two", "step-2"),
            ("t:three", "step-3"),
            ("t:four", "step-4"),
        ]);

        let result = executor(&transport)
            .run(&graph, &multi_host_context(&["h1", "h2"]), &[])
            .await
            .unwrap();

        assert_eq!(ids(&result), vec!["t:one", "t:two"]);
        assert_eq!(result.failure.as_ref().unwrap().kind, FailureKind::TaskFailure);
        assert_eq!(result.exit_code(), 4);
        assert_eq!(transport.dispatch_count(), 4);
    }

    #[tokio::test]
    async fn test_failure_before_activation_marks_release_failed() {
        let transport = Arc::new(MockTransport::new());
        transport.fail_command("sbt clean", 1, "[error] compilation failed");

        let result = executor(&transport)
            .run(&sample_graph(false), &staging_context(), &[])
            .await
            .unwrap();

        assert_eq!(ids(&result), vec!["deploy:update_code", "sbt:build"]);
        let release = result.release.clone().unwrap();
        assert_eq!(release.status, ReleaseStatus::Failed);
        assert_eq!(result.release_hosts[&Host::new(STAGING_HOST)], ReleaseStatus::Failed);
        assert!(transport.dispatches().iter().all(|d| !d.command.starts_with("ln -sfn")));
        assert_eq!(
            transport.commands_for(STAGING_HOST).last().unwrap(),
            &format!("if [ -d {0} ]; then touch {0}.failed; fi", release.path)
        );
        let failed = result.tasks[1].host(STAGING_HOST).unwrap();
        assert_eq!(failed.output, "[error] compilation failed");
        assert_eq!(failed.exit_code, Some(1));
    }

    fn switch_graph() -> TaskGraph {
        DeployConfig {
            backbone: Some(vec![recipe::SYMLINK.to_string(), recipe::RESTART.to_string()]),
            ..DeployConfig::default()
        }
        .task_graph(false)
        .unwrap()
    }

    #[tokio::test]
    async fn test_partial_activation_restores_switched_hosts() {
        let transport = Arc::new(MockTransport::new());
        transport.respond("ls -1", discovery(1));
        transport.fail_command_on("h2", "ln -sfn", 1, "Operation not permitted");

        let result = executor(&transport)
            .run(&switch_graph(), &multi_host_context(&["h1", "h2"]), &[])
            .await
            .unwrap();

        assert_eq!(ids(&result), vec!["deploy:symlink"]);
        let release = result.release.clone().unwrap();
        assert_eq!(release.status, ReleaseStatus::Failed);
        assert_eq!(result.release_hosts[&Host::new("h1")], ReleaseStatus::Failed);
        assert_eq!(result.release_hosts[&Host::new("h2")], ReleaseStatus::Failed);

        let h1 = transport.commands_for("h1");
        assert_eq!(h1.len(), 3);
        assert!(h1[1].starts_with(&format!("ln -sfn {}", release.path)));
        assert!(h1[2].starts_with(&format!("ln -sfn {RELEASES}/20120101000000 ")));
        assert!(h1[2].ends_with(&format!("touch {}.failed; fi", release.path)));
        assert!(transport.commands_for("h2").iter().all(|c| !c.contains("restart")));
    }

    #[tokio::test]
    async fn test_partial_first_activation_is_reported_per_host() {
        let transport = Arc::new(MockTransport::new());
        transport.respond("ls -1", discovery(0));
        transport.fail_command_on("h2", "ln -sfn", 1, "Operation not permitted");

        let result = executor(&transport)
            .run(&switch_graph(), &multi_host_context(&["h1", "h2"]), &[])
            .await
            .unwrap();

        assert_eq!(result.release.as_ref().unwrap().status, ReleaseStatus::Failed);
        assert_eq!(result.release_hosts[&Host::new("h1")], ReleaseStatus::Active);
        assert_eq!(result.release_hosts[&Host::new("h2")], ReleaseStatus::Failed);
    }

    #[tokio::test]
    async fn test_rollback_after_failed_deploy_skips_failed_release() {
        let transport = Arc::new(MockTransport::new());
        transport.fail_command("sbt clean", 1, "[error] compilation failed");
        let failed = executor(&transport)
            .run(&sample_graph(false), &staging_context(), &[])
            .await
            .unwrap()
            .release
            .unwrap();

        let transport = Arc::new(MockTransport::new());
        transport.respond(
            "ls -1",
            format!("{}{id}\n{id}.failed\n", discovery(2), id = failed.id),
        );
        let result = executor(&transport)
            .run(&sample_graph(true), &staging_context(), &[])
            .await
            .unwrap();

        assert!(result.is_success(), "{}", result.summary());
        assert_eq!(result.release.unwrap().id, "20120101000000");
        let commands = transport.commands_for(STAGING_HOST);
        assert!(commands[1].starts_with(&format!("ln -sfn {RELEASES}/20120101000000")));
        assert!(commands[1].ends_with(&format!("rm -rf {RELEASES}/20120102000000")));
        assert!(commands.iter().all(|c| !c.contains(&failed.id)));
    }

    #[tokio::test]
    async fn test_best_effort_cleanup_does_not_stop_run() {
        let transport = Arc::new(MockTransport::new());
        transport.respond("ls -1", discovery(7));
        transport.fail_command("rm -rf", 1, "Permission denied");

        let result = executor(&transport)
            .run(&sample_graph(false), &staging_context(), &[])
            .await
            .unwrap();

        assert!(result.is_success());
        let cleanup = result.task("deploy:cleanup").unwrap();
        assert_eq!(cleanup.status, TaskStatus::Failure);
        assert!(cleanup.best_effort);
        assert_eq!(
            cleanup.hosts[0].commands.last().unwrap(),
            &format!("rm -rf {RELEASES}/20120101000000 {RELEASES}/20120102000000")
        );
        assert_eq!(result.task("chown:start").unwrap().status, TaskStatus::Success);
    }

    #[tokio::test]
    async fn test_rollback() {
        let transport = Arc::new(MockTransport::new());
        transport.respond("ls -1", discovery(2));

        let result = executor(&transport)
            .run(&sample_graph(true), &staging_context(), &[])
            .await
            .unwrap();

        assert!(result.is_success());
        assert_eq!(ids(&result), vec!["deploy:rollback", "deploy:restart"]);
        let release = result.release.unwrap();
        assert_eq!(release.id, "20120101000000");
        assert_eq!(release.status, ReleaseStatus::Active);
        let commands = transport.commands_for(STAGING_HOST);
        assert!(commands[1].starts_with(&format!("ln -sfn {RELEASES}/20120101000000")));
        assert!(commands[1].ends_with(&format!("rm -rf {RELEASES}/20120102000000")));
    }

    #[tokio::test]
    async fn test_rollback_without_previous_release() {
        let transport = Arc::new(MockTransport::new());
        transport.respond("ls -1", discovery(1));

        let result = executor(&transport)
            .run(&sample_graph(true), &staging_context(), &[])
            .await
            .unwrap();

        assert_eq!(result.tasks.len(), 1);
        let error = result.tasks[0].hosts[0].error.clone().unwrap();
        assert_eq!(error.kind, HostErrorKind::Release);
        assert_eq!(result.exit_code(), 4);
    }

    #[tokio::test]
    async fn test_dry_run_dispatches_nothing() {
        let transport = Arc::new(MockTransport::new());

        let result = executor(&transport)
            .dry_run(true)
            .run(&sample_graph(false), &staging_context(), &[])
            .await
            .unwrap();

        assert!(result.is_success());
        assert!(result.dry_run);
        assert_eq!(transport.connect_count(), 0);
        assert_eq!(transport.dispatch_count(), 0);
        assert_eq!(result.release.as_ref().unwrap().status, ReleaseStatus::Pending);
        for task in &result.tasks {
            assert_eq!(task.status, TaskStatus::Skipped);
            assert!(!task.hosts[0].commands.is_empty());
        }
        assert_eq!(
            result.task("deploy:restart").unwrap().hosts[0].commands,
            vec!["sudo /etc/init.d/jetty restart"]
        );
    }

    #[tokio::test]
    async fn test_cancellation_fails_run_and_releases_sessions() {
        let transport = Arc::new(MockTransport::new());
        transport.delay_command("sbt clean", Duration::from_secs(30));
        let executor = executor(&transport);
        let cancel = executor.cancellation_token();

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel("Interrupted");
        });
        let result = executor
            .run(&sample_graph(false), &staging_context(), &[])
            .await
            .unwrap();
        canceller.await.unwrap();

        assert_eq!(result.phase, RunPhase::Failed);
        assert_eq!(ids(&result), vec!["deploy:update_code", "sbt:build"]);
        let failure = result.failure.as_ref().unwrap();
        assert_eq!(failure.kind, FailureKind::Cancelled);
        assert_eq!(failure.message, "Interrupted");
        assert_eq!(result.exit_code(), 5);
        assert_eq!(transport.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_role_filter() {
        let transport = Arc::new(MockTransport::new());
        let mut context = multi_host_context(&["h1", "h2", "h3"]);
        context.roles.register("web", ["h1", "h3"]);
        let graph = command_graph(&[("web:reload", "nginx -s reload")]);

        let result = executor(&transport)
            .run(&graph, &context, &["web".to_string()])
            .await
            .unwrap();

        let hosts: Vec<&str> = result.tasks[0].hosts.iter().map(|h| h.host.as_str()).collect();
        assert_eq!(hosts, vec!["h1", "h3"]);
        assert!(transport.commands_for("h2").is_empty());
    }

    #[tokio::test]
    async fn test_config_errors_before_any_remote_action() {
        let transport = Arc::new(MockTransport::new());
        let graph = command_graph(&[("a:one", "uptime")]);
        let err = executor(&transport)
            .run(&graph, &staging_context(), &["db".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, StagehandError::Config(ConfigError::UnknownRole { .. })));

        let graph = command_graph(&[("a:one", "uptime"), ("a:two", "echo {nope}")]);
        let err = executor(&transport)
            .run(&graph, &staging_context(), &[])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::Config);
        assert_eq!(transport.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_events() {
        let transport = Arc::new(MockTransport::new());
        let sink = Arc::new(CollectingEventSink::new());
        let graph = command_graph(&[("a:one", "uptime"), ("a:two", "whoami")]);

        executor(&transport)
            .with_event_sink(Arc::clone(&sink) as Arc<dyn EventSink>)
            .run(&graph, &staging_context(), &[])
            .await
            .unwrap();

        assert_eq!(
            sink.event_types(),
            vec![
                event_types::RUN_STARTED,
                event_types::TASK_STARTED,
                event_types::TASK_COMPLETED,
                event_types::TASK_STARTED,
                event_types::TASK_COMPLETED,
                event_types::RUN_COMPLETED,
            ]
        );
    }
}
