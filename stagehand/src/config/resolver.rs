//! Stage resolution: layered parameters to an immutable [`StageContext`].

use super::{StageContext, StageId, StageParams};
use crate::errors::ConfigError;
use crate::inventory::{Host, RoleRegistry};
use crate::template::{Template, TemplateVars};
use crate::utils::is_env_name;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::debug;

/// Role that collects hosts listed outside any role table.
pub const DEFAULT_ROLE: &str = "app";

/// Resolves a named stage against global defaults and caller overrides.
///
/// Merge order is builtin defaults, global defaults, stage parameters, then
/// overrides. Resolution is pure: the same inputs always give the same context.
#[derive(Debug, Clone, Default)]
pub struct StageResolver {
    defaults: StageParams,
    stages: BTreeMap<StageId, StageParams>,
}

impl StageResolver {
    /// Creates a resolver with the given global defaults.
    #[must_use]
    pub fn new(defaults: StageParams) -> Self {
        Self {
            defaults,
            stages: BTreeMap::new(),
        }
    }

    /// Adds (or merges into) a stage's parameters.
    #[must_use]
    pub fn with_stage(mut self, stage: StageId, params: StageParams) -> Self {
        self.add_stage(stage, &params);
        self
    }

    /// Adds (or merges into) a stage's parameters in place.
    pub fn add_stage(&mut self, stage: StageId, params: &StageParams) {
        self.stages.entry(stage).or_default().merge(params);
    }

    /// Configured stages in promotion order.
    pub fn stages(&self) -> impl Iterator<Item = StageId> + '_ {
        self.stages.keys().copied()
    }

    /// The merged (but unvalidated) parameters of a stage.
    ///
    /// # Errors
    ///
    /// Returns `UnknownStage` if the stage has no configuration.
    pub fn layered(&self, stage: StageId, overrides: &StageParams) -> Result<StageParams, ConfigError> {
        let stage_params = self.stages.get(&stage).ok_or_else(|| ConfigError::UnknownStage {
            stage: stage.to_string(),
        })?;
        Ok(StageParams::builtin()
            .merged(&self.defaults)
            .merged(stage_params)
            .merged(overrides))
    }

    /// Resolves a stage.
    ///
    /// # Errors
    ///
    /// Returns `UnknownStage`, `IncompleteStageConfig` naming every missing
    /// mandatory key, or `InvalidValue` for an unusable value.
    pub fn resolve(&self, stage: StageId, overrides: &StageParams) -> Result<StageContext, ConfigError> {
        let params = self.layered(stage, overrides)?;
        let declared = params.declared_hosts();

        let mut missing = Vec::new();
        if declared.is_empty() {
            missing.push("host");
        }
        if blank(params.deploy_root.as_deref()) {
            missing.push("deploy_root");
        }
        if blank(params.branch.as_deref()) {
            missing.push("branch");
        }
        if blank(params.application.as_deref()) {
            missing.push("application");
        }
        if !missing.is_empty() {
            return Err(ConfigError::IncompleteStageConfig {
                stage: stage.to_string(),
                missing: missing.into_iter().map(String::from).collect(),
            });
        }

        let timeout_secs = params.command_timeout_secs.unwrap_or_default();
        if timeout_secs == 0 {
            return Err(ConfigError::invalid_value(
                "command_timeout_secs",
                "0",
                "must be at least one second",
            ));
        }
        let connect_attempts = params.connect_attempts.unwrap_or(1);
        if connect_attempts == 0 {
            return Err(ConfigError::invalid_value(
                "connect_attempts",
                "0",
                "must be at least 1",
            ));
        }

        if let Some(name) = params
            .runtime_environment
            .keys()
            .find(|name| !is_env_name(name))
        {
            return Err(ConfigError::invalid_value(
                "runtime_environment",
                name.as_str(),
                "variable names must match [A-Za-z_][A-Za-z0-9_]*",
            ));
        }

        let roles = build_roles(&params);
        let hosts: BTreeSet<Host> = declared.into_iter().map(Host::new).collect();

        let context = StageContext {
            stage,
            application: params.application.unwrap_or_default(),
            user: params.user,
            branch: params.branch.unwrap_or_default(),
            repository: params.repository,
            version: params.version.unwrap_or_default(),
            hosts,
            roles,
            runtime_environment: params.runtime_environment,
            deploy_root: params
                .deploy_root
                .unwrap_or_default()
                .trim_end_matches('/')
                .to_string(),
            container_home: params.container_home,
            container_ctl: params.container_ctl,
            artifact_name_template: Template::parse(
                params.artifact_name_template.unwrap_or_default(),
            ),
            ssh_keys: params.ssh_keys.unwrap_or_default(),
            keep_releases: params.keep_releases.unwrap_or_default(),
            command_timeout: Duration::from_secs(timeout_secs),
            connect_attempts,
            use_sudo: params.use_sudo.unwrap_or_default(),
            pty: params.pty.unwrap_or_default(),
            forward_agent: params.forward_agent.unwrap_or_default(),
            port: params.port.unwrap_or(22),
            variables: params.variables,
        };

        let mut vars = context.template_vars();
        vars.remove(TemplateVars::ARTIFACT_NAME);
        context
            .artifact_name_template
            .validate(&vars)
            .map_err(|e| {
                ConfigError::invalid_value(
                    "artifact_name_template",
                    context.artifact_name_template.as_str(),
                    e.to_string(),
                )
            })?;

        debug!(
            stage = %stage,
            hosts = context.hosts.len(),
            deploy_root = %context.deploy_root,
            "Resolved stage"
        );
        Ok(context)
    }
}

fn blank(value: Option<&str>) -> bool {
    value.map_or(true, |v| v.trim().is_empty())
}

fn build_roles(params: &StageParams) -> RoleRegistry {
    let mut roles = RoleRegistry::new();
    for (role, members) in &params.roles {
        roles.register(role.clone(), members.iter().map(String::as_str));
    }
    let loose: Vec<&str> = params
        .host
        .iter()
        .chain(params.hosts.iter().flatten())
        .map(String::as_str)
        .filter(|h| !h.trim().is_empty())
        .collect();
    if !loose.is_empty() || roles.is_empty() {
        roles.register(DEFAULT_ROLE, loose);
    }
    roles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures::{staging_params, staging_resolver};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_resolve_staging() {
        let ctx = staging_resolver()
            .resolve(StageId::Staging, &StageParams::default())
            .unwrap();
        assert_eq!(ctx.user.as_deref(), Some("deploy"));
        assert_eq!(ctx.branch, "staging");
        assert_eq!(ctx.deploy_root, "/opt/timejust/service-geo");
        assert_eq!(ctx.keep_releases, 5);
        assert_eq!(ctx.command_timeout, Duration::from_secs(600));
        assert_eq!(
            ctx.roles.members(DEFAULT_ROLE).map(BTreeSet::len),
            Some(1)
        );
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let resolver = staging_resolver();
        let overrides = StageParams::from_overrides(["branch=release-1"]).unwrap();
        let a = resolver.resolve(StageId::Staging, &overrides).unwrap();
        let b = resolver.resolve(StageId::Staging, &overrides).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_overrides_win() {
        let overrides =
            StageParams::from_overrides(["branch=hotfix", "env.RAILS_ENV=production"]).unwrap();
        let ctx = staging_resolver()
            .resolve(StageId::Staging, &overrides)
            .unwrap();
        assert_eq!(ctx.branch, "hotfix");
        assert_eq!(ctx.runtime_environment["RAILS_ENV"], "production");
        assert!(ctx.runtime_environment.contains_key("PATH"));
    }

    #[test]
    fn test_unknown_stage() {
        let err = staging_resolver()
            .resolve(StageId::Production, &StageParams::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownStage { stage } if stage == "production"));
    }

    #[test]
    fn test_incomplete_stage_names_every_missing_key() {
        let resolver = StageResolver::new(StageParams {
            application: Some("service-geo".into()),
            ..StageParams::default()
        })
        .with_stage(StageId::Staging, StageParams::default());

        let err = resolver
            .resolve(StageId::Staging, &StageParams::default())
            .unwrap_err();
        match err {
            ConfigError::IncompleteStageConfig { stage, missing } => {
                assert_eq!(stage, "staging");
                assert_eq!(missing, vec!["host", "deploy_root", "branch"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_bad_artifact_template() {
        let overrides =
            StageParams::from_overrides(["artifact_name_template={application}_{versuib}.war"])
                .unwrap();
        let err = staging_resolver()
            .resolve(StageId::Staging, &overrides)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key, .. } if key == "artifact_name_template"));
    }

    #[test]
    fn test_roles_configured() {
        let mut params = staging_params();
        params.host = None;
        params
            .roles
            .insert("web".into(), vec!["w1".into(), "w2".into()]);
        params.roles.insert("job".into(), vec!["w1".into()]);
        let ctx = StageResolver::default()
            .with_stage(StageId::Production, params)
            .resolve(StageId::Production, &StageParams::default())
            .unwrap();
        assert_eq!(ctx.hosts.len(), 2);
        assert!(ctx.roles.members(DEFAULT_ROLE).is_none());
        assert_eq!(ctx.roles.resolve_hosts(["job"]).unwrap().len(), 1);
    }

    #[test]
    fn test_bad_environment_name_rejected() {
        let overrides = StageParams::from_overrides(["env.RAILS_ENV;id=staging"]).unwrap();
        let err = staging_resolver()
            .resolve(StageId::Staging, &overrides)
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { key, value, .. }
                if key == "runtime_environment" && value == "RAILS_ENV;id"
        ));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let overrides = StageParams::from_overrides(["command_timeout_secs=0"]).unwrap();
        assert!(matches!(
            staging_resolver().resolve(StageId::Staging, &overrides),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
