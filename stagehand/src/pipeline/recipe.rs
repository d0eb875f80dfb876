//! The built-in deploy recipe.

use super::{Task, TaskAction, TaskId, TaskRegistry};
use crate::errors::GraphError;

/// Fetches the source into a fresh release directory.
pub const UPDATE_CODE: &str = "deploy:update_code";
/// Switches `current` to the new release.
pub const SYMLINK: &str = "deploy:symlink";
/// Restarts the servlet container.
pub const RESTART: &str = "deploy:restart";
/// Purges old releases.
pub const CLEANUP: &str = "deploy:cleanup";
/// Points `current` back at the previous release.
pub const ROLLBACK: &str = "deploy:rollback";

/// Default deploy backbone.
pub const DEPLOY_BACKBONE: [&str; 4] = [UPDATE_CODE, SYMLINK, RESTART, CLEANUP];
/// Rollback backbone.
pub const ROLLBACK_BACKBONE: [&str; 2] = [ROLLBACK, RESTART];

/// The built-in tasks.
///
/// # Errors
///
/// Never in practice; identifiers are constants.
pub fn builtin_tasks() -> Result<Vec<Task>, GraphError> {
    Ok(vec![
        Task::commands(
            TaskId::parse(UPDATE_CODE)?,
            ["mkdir -p {releases_path} && git clone -q --depth 1 --branch {branch} {repository} {release_path}"],
        )
        .with_description("Check out the branch into a new release directory"),
        Task::new(TaskId::parse(SYMLINK)?, TaskAction::Activate)
            .with_description("Point current at the new release"),
        Task::commands(TaskId::parse(RESTART)?, ["{sudo}{container_ctl} restart"])
            .with_description("Restart the servlet container"),
        Task::new(TaskId::parse(CLEANUP)?, TaskAction::Prune)
            .with_description("Remove releases beyond keep_releases")
            .best_effort(true),
        Task::new(TaskId::parse(ROLLBACK)?, TaskAction::Rollback)
            .with_description("Point current back at the previous release"),
    ])
}

/// A registry holding the built-in tasks.
///
/// # Errors
///
/// Never in practice; identifiers are constants.
pub fn builtin_registry() -> Result<TaskRegistry, GraphError> {
    let mut registry = TaskRegistry::new();
    for task in builtin_tasks()? {
        registry.register(task)?;
    }
    Ok(registry)
}

/// Parses a backbone given as raw identifiers.
///
/// # Errors
///
/// Returns `InvalidTaskId` for a malformed identifier.
pub fn parse_backbone<I, S>(ids: I) -> Result<Vec<TaskId>, GraphError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    ids.into_iter().map(|raw| TaskId::parse(raw.as_ref())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Hook, TaskGraph};
    use pretty_assertions::assert_eq;

    fn id(raw: &str) -> TaskId {
        TaskId::parse(raw).unwrap()
    }

    #[test]
    fn test_builtin_registry() {
        let registry = builtin_registry().unwrap();
        assert_eq!(registry.len(), 5);
        assert!(registry.get(&id(CLEANUP)).unwrap().best_effort);
        assert_eq!(
            registry.get(&id(SYMLINK)).unwrap().action,
            TaskAction::Activate
        );
    }

    #[test]
    fn test_recipe_with_original_hooks() {
        let mut registry = builtin_registry().unwrap();
        for (name, command) in [
            ("sbt:build", "cd {release_path} && sudo sbt clean update package"),
            ("deploy:start", "cp {release_path}/target/{artifact_name} {container_home}/webapps/{application}.war"),
            ("chown:start", "sudo chown -R deploy:deploy {release_path}"),
        ] {
            registry.register(Task::commands(id(name), [command])).unwrap();
        }
        let hooks = [
            Hook::after(id(UPDATE_CODE), id("sbt:build")),
            Hook::after(id(SYMLINK), id("deploy:start")),
            Hook::after(id(CLEANUP), id("chown:start")),
        ];

        let deploy =
            TaskGraph::build(&parse_backbone(DEPLOY_BACKBONE).unwrap(), &hooks, &registry).unwrap();
        let ids: Vec<_> = deploy.ids().map(TaskId::as_str).collect();
        assert_eq!(
            ids,
            vec![
                UPDATE_CODE,
                "sbt:build",
                SYMLINK,
                "deploy:start",
                RESTART,
                CLEANUP,
                "chown:start",
            ]
        );

        let rollback =
            TaskGraph::build(&parse_backbone(ROLLBACK_BACKBONE).unwrap(), &hooks, &registry)
                .unwrap();
        let ids: Vec<_> = rollback.ids().map(TaskId::as_str).collect();
        assert_eq!(ids, vec![ROLLBACK, RESTART]);
    }
}
