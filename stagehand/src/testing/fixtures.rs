//! Shared configuration fixtures.

use crate::config::{StageContext, StageId, StageParams, StageResolver};
use crate::pipeline::{PipelineBuilder, Task, TaskGraph, TaskId};
use std::collections::BTreeMap;

/// A deploy file for a servlet application with a staging stage inline.
pub const SAMPLE_DEPLOY_TOML: &str = r#"
application = "service-geo"
repository = "git@github.com:timejust/service-geo.git"
default_stage = "development"

[defaults]
user = "timejust"
app_version = "1.0"
use_sudo = true
pty = true
forward_agent = true

[defaults.variables]
scala_version = "2.9.1"

[stages.staging]
user = "deploy"
branch = "staging"
host = "service-staging.timejust.com"
deploy_to = "/opt/timejust/service-geo"
container_home = "/opt/jetty"
container_ctl = "/etc/init.d/jetty"
ssh_keys = ["/home/hudson/.ssh/id_rsa"]

[stages.staging.default_environment]
RAILS_ENV = "staging"
PATH = "$PATH:/usr/local/lib/ruby/gems/1.9.1/bin/"

[stages.staging.roles]
app = ["service-staging.timejust.com"]
web = ["service-staging.timejust.com"]
job = ["service-staging.timejust.com"]
notification = ["service-staging.timejust.com"]

[tasks."sbt:build"]
run = "cd {release_path} && {sudo}sbt clean update package"
description = "Build the project with sbt"

[tasks."deploy:start"]
run = "cp {release_path}/target/{artifact_name} {container_home}/webapps/{application}.war"
description = "Install the built war into the container"

[tasks."chown:start"]
run = "{sudo}chown -R {user}:{user} {release_path}"
description = "Hand the release over to the deploy user"

[[hooks]]
after = "deploy:update_code"
task = "sbt:build"

[[hooks]]
after = "deploy:symlink"
task = "deploy:start"

[[hooks]]
after = "deploy:cleanup"
task = "chown:start"
"#;

/// A complete staging layer with a single host and no role tables.
#[must_use]
pub fn staging_params() -> StageParams {
    StageParams {
        application: Some("service-geo".to_string()),
        user: Some("deploy".to_string()),
        branch: Some("staging".to_string()),
        repository: Some("git@github.com:timejust/service-geo.git".to_string()),
        host: Some("service-staging.timejust.com".to_string()),
        deploy_root: Some("/opt/timejust/service-geo".to_string()),
        container_home: Some("/opt/jetty".to_string()),
        container_ctl: Some("/etc/init.d/jetty".to_string()),
        ssh_keys: Some(vec!["/home/hudson/.ssh/id_rsa".to_string()]),
        runtime_environment: BTreeMap::from([
            ("RAILS_ENV".to_string(), "staging".to_string()),
            (
                "PATH".to_string(),
                "$PATH:/usr/local/lib/ruby/gems/1.9.1/bin/".to_string(),
            ),
        ]),
        variables: BTreeMap::from([("scala_version".to_string(), "2.9.1".to_string())]),
        ..StageParams::default()
    }
}

/// A resolver with shared defaults and the staging layer.
#[must_use]
pub fn staging_resolver() -> StageResolver {
    let defaults = StageParams {
        user: Some("timejust".to_string()),
        ..StageParams::default()
    };
    StageResolver::new(defaults).with_stage(StageId::Staging, staging_params())
}

/// The resolved staging context.
///
/// # Panics
///
/// Panics if the staging fixture stops resolving.
#[must_use]
pub fn staging_context() -> StageContext {
    match staging_resolver().resolve(StageId::Staging, &StageParams::default()) {
        Ok(context) => context,
        Err(err) => panic!("staging fixture does not resolve: {err}"),
    }
}

/// The staging context spread over several hosts in the `app` role.
///
/// # Panics
///
/// Panics if the fixture stops resolving.
#[must_use]
pub fn multi_host_context(hosts: &[&str]) -> StageContext {
    let mut params = staging_params();
    params.host = None;
    params.hosts = Some(hosts.iter().map(ToString::to_string).collect());
    let resolver = StageResolver::default().with_stage(StageId::Staging, params);
    match resolver.resolve(StageId::Staging, &StageParams::default()) {
        Ok(context) => context,
        Err(err) => panic!("multi-host fixture does not resolve: {err}"),
    }
}

/// A graph of command tasks run in the given order.
///
/// Each `(id, command)` pair becomes a task targeting every host.
///
/// # Panics
///
/// Panics on a malformed task id.
#[must_use]
pub fn command_graph(tasks: &[(&str, &str)]) -> TaskGraph {
    let mut builder = PipelineBuilder::new();
    let mut backbone = Vec::new();
    for (id, command) in tasks {
        let task = match TaskId::parse(id) {
            Ok(task_id) => Task::commands(task_id, [*command]),
            Err(err) => panic!("bad fixture task id: {err}"),
        };
        builder = match builder.task(task) {
            Ok(builder) => builder,
            Err(err) => panic!("fixture task rejected: {err}"),
        };
        backbone.push(*id);
    }
    match builder.backbone(backbone).and_then(|b| b.build()) {
        Ok(graph) => graph,
        Err(err) => panic!("fixture graph does not build: {err}"),
    }
}
