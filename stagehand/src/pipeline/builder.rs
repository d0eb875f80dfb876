//! Fluent pipeline assembly.

use super::{Hook, Task, TaskGraph, TaskId, TaskRegistry};
use crate::errors::GraphError;

/// Builder for a validated [`TaskGraph`].
///
/// Hooks accumulate as an immutable list consumed by [`build`](Self::build);
/// nothing is global.
#[derive(Debug, Clone, Default)]
pub struct PipelineBuilder {
    registry: TaskRegistry,
    backbone: Vec<TaskId>,
    hooks: Vec<Hook>,
}

impl PipelineBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from an existing registry.
    #[must_use]
    pub fn with_registry(registry: TaskRegistry) -> Self {
        Self {
            registry,
            ..Self::default()
        }
    }

    /// Registers a task.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateTaskId` if the identifier is taken.
    pub fn task(mut self, task: Task) -> Result<Self, GraphError> {
        self.registry.register(task)?;
        Ok(self)
    }

    /// Appends tasks to the backbone.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTaskId` for a malformed identifier.
    pub fn backbone<I, S>(mut self, ids: I) -> Result<Self, GraphError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for raw in ids {
            self.backbone.push(TaskId::parse(raw.as_ref())?);
        }
        Ok(self)
    }

    /// Hooks `task` before `anchor`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTaskId` for a malformed identifier.
    pub fn before(self, anchor: &str, task: &str) -> Result<Self, GraphError> {
        let hook = Hook::before(TaskId::parse(anchor)?, TaskId::parse(task)?);
        Ok(self.hook(hook))
    }

    /// Hooks `task` after `anchor`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTaskId` for a malformed identifier.
    pub fn after(self, anchor: &str, task: &str) -> Result<Self, GraphError> {
        let hook = Hook::after(TaskId::parse(anchor)?, TaskId::parse(task)?);
        Ok(self.hook(hook))
    }

    /// Adds a parsed hook.
    #[must_use]
    pub fn hook(mut self, hook: Hook) -> Self {
        self.hooks.push(hook);
        self
    }

    /// The registered tasks.
    #[must_use]
    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Builds the graph.
    ///
    /// # Errors
    ///
    /// See [`TaskGraph::build`].
    pub fn build(&self) -> Result<TaskGraph, GraphError> {
        TaskGraph::build(&self.backbone, &self.hooks, &self.registry)
    }
}
