//! Deploy file loading.
//!
//! A project is described by `deploy.toml`:
//!
//! ```toml
//! application = "service-geo"
//! repository = "git@github.com:timejust/service-geo.git"
//! default_stage = "development"
//!
//! [defaults]
//! user = "timejust"
//! branch = "master"
//!
//! [stages.staging]
//! host = "service.timejust.com"
//!
//! [tasks."sbt:build"]
//! run = "cd {release_path} && sudo sbt clean update package"
//!
//! [[hooks]]
//! after = "deploy:update_code"
//! task = "sbt:build"
//! ```
//!
//! Stage files under `deploy/<stage>.toml`, next to the deploy file, are
//! merged over the inline `[stages.<stage>]` tables.

use super::{StageId, StageParams, StageResolver};
use crate::errors::{ConfigError, GraphError, Result};
use crate::pipeline::{recipe, Hook, Task, TaskGraph, TaskId, TaskRegistry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default deploy file name.
pub const DEPLOY_FILE: &str = "deploy.toml";
/// Directory holding per-stage files.
pub const STAGE_DIR: &str = "deploy";

/// One command or a list of commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RunSpec {
    /// A single command.
    One(String),
    /// Commands run in order.
    Many(Vec<String>),
}

impl RunSpec {
    fn commands(&self) -> Vec<String> {
        match self {
            Self::One(command) => vec![command.clone()],
            Self::Many(commands) => commands.clone(),
        }
    }
}

/// A task declared in the deploy file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskDef {
    /// Command templates.
    pub run: RunSpec,
    /// Target roles; every host when empty.
    #[serde(default)]
    pub roles: Vec<String>,
    /// Failures do not stop the run.
    #[serde(default)]
    pub best_effort: bool,
    /// Description shown in task listings.
    #[serde(default)]
    pub description: Option<String>,
}

/// A hook declared in the deploy file; exactly one of `before` or `after`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HookDef {
    /// Anchor for a before hook.
    #[serde(default)]
    pub before: Option<String>,
    /// Anchor for an after hook.
    #[serde(default)]
    pub after: Option<String>,
    /// The hooked task.
    pub task: String,
}

impl HookDef {
    fn to_hook(&self) -> Result<Hook> {
        let task = TaskId::parse(&self.task)?;
        match (&self.before, &self.after) {
            (Some(anchor), None) => Ok(Hook::before(TaskId::parse(anchor)?, task)),
            (None, Some(anchor)) => Ok(Hook::after(TaskId::parse(anchor)?, task)),
            _ => Err(ConfigError::invalid_value(
                "hooks",
                &self.task,
                "a hook needs exactly one of 'before' or 'after'",
            )
            .into()),
        }
    }
}

/// The parsed deploy file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeployConfig {
    /// Application name.
    pub application: Option<String>,
    /// Source repository URL.
    pub repository: Option<String>,
    /// Stage used when none is given.
    pub default_stage: Option<StageId>,
    /// Replaces the default deploy backbone.
    pub backbone: Option<Vec<String>>,
    /// Parameters shared by every stage.
    pub defaults: StageParams,
    /// Inline stage tables.
    pub stages: BTreeMap<StageId, StageParams>,
    /// Declared tasks; a built-in id redefines the built-in.
    pub tasks: BTreeMap<String, TaskDef>,
    /// Hooks in registration order.
    pub hooks: Vec<HookDef>,
}

impl DeployConfig {
    /// Parses deploy file text. `path` is only used in error messages.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Parse` on invalid TOML or unknown keys.
    pub fn from_toml_str(text: &str, path: &Path) -> std::result::Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.message().to_string(),
        })
    }

    /// Loads a deploy file and any `deploy/<stage>.toml` files beside it.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Read` or `ConfigError::Parse`.
    pub fn load(path: &Path) -> std::result::Result<Self, ConfigError> {
        debug!("Loading deploy file from: {}", path.display());
        let mut config = Self::from_toml_str(&read(path)?, path)?;

        let stage_dir = path
            .parent()
            .map_or_else(|| PathBuf::from(STAGE_DIR), |dir| dir.join(STAGE_DIR));
        for stage in StageId::ALL {
            let stage_file = stage_dir.join(format!("{stage}.toml"));
            if !stage_file.is_file() {
                continue;
            }
            debug!("Loading stage file from: {}", stage_file.display());
            let params: StageParams =
                toml::from_str(&read(&stage_file)?).map_err(|e| ConfigError::Parse {
                    path: stage_file.clone(),
                    message: e.message().to_string(),
                })?;
            config.stages.entry(stage).or_default().merge(&params);
        }
        Ok(config)
    }

    /// The stage to use when none is requested.
    #[must_use]
    pub fn default_stage(&self) -> StageId {
        self.default_stage.unwrap_or_default()
    }

    /// A resolver over the configured defaults and stages.
    ///
    /// Top-level `application` and `repository` sit below `[defaults]`.
    #[must_use]
    pub fn resolver(&self) -> StageResolver {
        let top = StageParams {
            application: self.application.clone(),
            repository: self.repository.clone(),
            ..StageParams::default()
        };
        let mut resolver = StageResolver::new(top.merged(&self.defaults));
        for (stage, params) in &self.stages {
            resolver.add_stage(*stage, params);
        }
        resolver
    }

    /// Built-in tasks plus the declared ones.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTaskId` for a malformed task name.
    pub fn registry(&self) -> std::result::Result<TaskRegistry, GraphError> {
        let mut registry = recipe::builtin_registry()?;
        for (raw, def) in &self.tasks {
            let mut task = Task::commands(TaskId::parse(raw)?, def.run.commands())
                .with_roles(def.roles.iter().cloned())
                .best_effort(def.best_effort);
            if let Some(description) = &def.description {
                task = task.with_description(description.clone());
            }
            if registry.redefine(task).is_some() {
                debug!(task = %raw, "Redefined built-in task");
            }
        }
        Ok(registry)
    }

    /// Declared hooks in registration order.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed hooks.
    pub fn hooks(&self) -> Result<Vec<Hook>> {
        self.hooks.iter().map(HookDef::to_hook).collect()
    }

    /// The task graph of a deploy, or of a rollback.
    ///
    /// # Errors
    ///
    /// Returns graph or configuration errors; nothing remote has happened yet.
    pub fn task_graph(&self, rollback: bool) -> Result<TaskGraph> {
        let backbone = if rollback {
            recipe::parse_backbone(recipe::ROLLBACK_BACKBONE)?
        } else if let Some(custom) = &self.backbone {
            recipe::parse_backbone(custom)?
        } else {
            recipe::parse_backbone(recipe::DEPLOY_BACKBONE)?
        };
        Ok(TaskGraph::build(&backbone, &self.hooks()?, &self.registry()?)?)
    }
}

fn read(path: &Path) -> std::result::Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StagehandError;
    use crate::testing::fixtures::SAMPLE_DEPLOY_TOML;
    use pretty_assertions::assert_eq;

    fn sample() -> DeployConfig {
        DeployConfig::from_toml_str(SAMPLE_DEPLOY_TOML, Path::new(DEPLOY_FILE)).unwrap()
    }

    #[test]
    fn test_parse_sample() {
        let config = sample();
        assert_eq!(config.application.as_deref(), Some("service-geo"));
        assert_eq!(config.default_stage(), StageId::Development);
        assert_eq!(config.tasks.len(), 3);
        assert_eq!(config.hooks.len(), 3);
    }

    #[test]
    fn test_sample_task_graph() {
        let graph = sample().task_graph(false).unwrap();
        let ids: Vec<_> = graph.ids().map(TaskId::as_str).collect();
        assert_eq!(
            ids,
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
        let rollback = sample().task_graph(true).unwrap();
        assert_eq!(rollback.len(), 2);
    }

    #[test]
    fn test_sample_resolves_staging() {
        let ctx = sample()
            .resolver()
            .resolve(StageId::Staging, &StageParams::default())
            .unwrap();
        assert_eq!(ctx.application, "service-geo");
        assert_eq!(ctx.user.as_deref(), Some("deploy"));
        assert_eq!(ctx.hosts.len(), 1);
    }

    #[test]
    fn test_bad_hook() {
        let config = DeployConfig::from_toml_str(
            r#"
            [[hooks]]
            before = "deploy:symlink"
            after = "deploy:symlink"
            task = "deploy:restart"
            "#,
            Path::new(DEPLOY_FILE),
        )
        .unwrap();
        assert!(matches!(
            config.task_graph(false),
            Err(StagehandError::Config(ConfigError::InvalidValue { .. }))
        ));
    }

    #[test]
    fn test_hook_cycle_rejected_for_deploy_and_rollback() {
        let config = DeployConfig::from_toml_str(
            r#"
            [tasks."sbt:build"]
            run = "sbt package"

            [tasks."sbt:test"]
            run = "sbt test"

            [[hooks]]
            after = "deploy:update_code"
            task = "sbt:build"

            [[hooks]]
            after = "sbt:build"
            task = "sbt:test"

            [[hooks]]
            after = "sbt:test"
            task = "sbt:build"
            "#,
            Path::new(DEPLOY_FILE),
        )
        .unwrap();
        for rollback in [false, true] {
            assert!(matches!(
                config.task_graph(rollback),
                Err(StagehandError::Graph(GraphError::CyclicHook(_)))
            ));
        }
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = DeployConfig::from_toml_str("stagez = 1", Path::new(DEPLOY_FILE)).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_load_merges_stage_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEPLOY_FILE);
        std::fs::write(&path, SAMPLE_DEPLOY_TOML).unwrap();
        std::fs::create_dir(dir.path().join(STAGE_DIR)).unwrap();
        std::fs::write(
            dir.path().join(STAGE_DIR).join("production.toml"),
            "host = \"service.timejust.com\"\nbranch = \"production\"\ndeploy_to = \"/opt/timejust/service-geo\"\n",
        )
        .unwrap();

        let config = DeployConfig::load(&path).unwrap();
        let ctx = config
            .resolver()
            .resolve(StageId::Production, &StageParams::default())
            .unwrap();
        assert_eq!(ctx.branch, "production");
        assert_eq!(ctx.user.as_deref(), Some("timejust"));
        assert_eq!(ctx.hosts.iter().next().unwrap().as_str(), "service.timejust.com");
    }

    #[test]
    fn test_demo_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../demos")
            .join(DEPLOY_FILE);
        let config = DeployConfig::load(&path).unwrap();
        let resolver = config.resolver();
        for stage in [StageId::Staging, StageId::Production] {
            let ctx = resolver.resolve(stage, &StageParams::default()).unwrap();
            assert_eq!(ctx.branch, stage.as_str());
            assert_eq!(ctx.user.as_deref(), Some("deploy"));
        }
        assert!(resolver
            .resolve(StageId::Development, &StageParams::default())
            .is_err());
        assert_eq!(config.task_graph(false).unwrap().len(), 7);
    }

    #[test]
    fn test_missing_file() {
        let err = DeployConfig::load(Path::new("/nonexistent/deploy.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
