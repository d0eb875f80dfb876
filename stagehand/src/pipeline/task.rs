//! Task identifiers, actions and definitions.

use crate::errors::GraphError;
use crate::template::Template;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A namespace-qualified task identifier such as `deploy:symlink`.
///
/// The namespace is everything before the last colon; an identifier with no
/// colon lives in the root namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaskId(String);

impl TaskId {
    /// Parses and validates an identifier.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTaskId` for empty segments or characters outside
    /// `[A-Za-z0-9_-]`.
    pub fn parse(raw: &str) -> Result<Self, GraphError> {
        let raw = raw.trim();
        let invalid = |reason: &str| GraphError::InvalidTaskId {
            id: raw.to_string(),
            reason: reason.to_string(),
        };

        if raw.is_empty() {
            return Err(invalid("identifier is empty"));
        }
        for segment in raw.split(':') {
            if segment.is_empty() {
                return Err(invalid("empty namespace segment"));
            }
            if !segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            {
                return Err(invalid("only letters, digits, '_' and '-' are allowed"));
            }
        }
        Ok(Self(raw.to_string()))
    }

    /// The namespace, empty for root-namespace tasks.
    #[must_use]
    pub fn namespace(&self) -> &str {
        self.0.rsplit_once(':').map_or("", |(ns, _)| ns)
    }

    /// The name within the namespace.
    #[must_use]
    pub fn name(&self) -> &str {
        self.0.rsplit_once(':').map_or(self.0.as_str(), |(_, name)| name)
    }

    /// The full identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TaskId {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TaskId {
    type Error = GraphError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TaskId> for String {
    fn from(value: TaskId) -> Self {
        value.0
    }
}

/// What a task does on each of its hosts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskAction {
    /// Remote shell commands, run in order.
    Commands(Vec<Template>),
    /// Switch `current` to the release being deployed.
    Activate,
    /// Purge retained releases beyond the retention count.
    Prune,
    /// Point `current` back at the previous release.
    Rollback,
}

impl TaskAction {
    /// Whether this action moves the `current` symlink.
    #[must_use]
    pub const fn switches_release(&self) -> bool {
        matches!(self, Self::Activate | Self::Rollback)
    }

    /// Short label for listings.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Commands(_) => "commands",
            Self::Activate => "activate",
            Self::Prune => "prune",
            Self::Rollback => "rollback",
        }
    }
}

/// A named unit of remote work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    /// Unique identifier.
    pub id: TaskId,
    /// Human readable description.
    pub description: String,
    /// The action.
    pub action: TaskAction,
    /// Roles the task targets; empty means every host.
    pub roles: Vec<String>,
    /// A failing best-effort task does not stop the run.
    pub best_effort: bool,
}

impl Task {
    /// Creates a task with the given action.
    #[must_use]
    pub fn new(id: TaskId, action: TaskAction) -> Self {
        Self {
            id,
            description: String::new(),
            action,
            roles: Vec::new(),
            best_effort: false,
        }
    }

    /// Creates a task running the given command templates.
    #[must_use]
    pub fn commands<I, T>(id: TaskId, commands: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Template>,
    {
        Self::new(
            id,
            TaskAction::Commands(commands.into_iter().map(Into::into).collect()),
        )
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Restricts the task to the given roles.
    #[must_use]
    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    /// Marks the task best-effort.
    #[must_use]
    pub const fn best_effort(mut self, best_effort: bool) -> Self {
        self.best_effort = best_effort;
        self
    }

    /// The command templates, empty for release actions.
    #[must_use]
    pub fn templates(&self) -> &[Template] {
        match &self.action {
            TaskAction::Commands(commands) => commands,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_namespaced() {
        let id = TaskId::parse("deploy:symlink").unwrap();
        assert_eq!(id.namespace(), "deploy");
        assert_eq!(id.name(), "symlink");
        assert_eq!(id.to_string(), "deploy:symlink");
    }

    #[test]
    fn test_parse_root_and_nested() {
        let root = TaskId::parse("restart").unwrap();
        assert_eq!(root.namespace(), "");
        assert_eq!(root.name(), "restart");

        let nested = TaskId::parse("deploy:web:disable").unwrap();
        assert_eq!(nested.namespace(), "deploy:web");
        assert_eq!(nested.name(), "disable");
    }

    #[test]
    fn test_parse_invalid() {
        for raw in ["", "deploy:", ":build", "sbt build", "a::b"] {
            assert!(
                matches!(TaskId::parse(raw), Err(GraphError::InvalidTaskId { .. })),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_serde_round_trip_rejects_invalid() {
        let id: TaskId = serde_json::from_str("\"sbt:build\"").unwrap();
        assert_eq!(id.as_str(), "sbt:build");
        assert!(serde_json::from_str::<TaskId>("\"bad id\"").is_err());
    }

    #[test]
    fn test_task_builders() {
        let task = Task::commands(
            TaskId::parse("chown:start").unwrap(),
            ["sudo chown -R deploy:deploy {release_path}"],
        )
        .with_roles(["app"])
        .best_effort(true);
        assert_eq!(task.templates().len(), 1);
        assert_eq!(task.roles, vec!["app".to_string()]);
        assert!(task.best_effort);
        assert!(!task.action.switches_release());
        assert!(TaskAction::Rollback.switches_release());
    }
}
