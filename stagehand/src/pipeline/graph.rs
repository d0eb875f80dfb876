//! Task registry and hook splicing.

use super::{Hook, HookPosition, Task, TaskAction, TaskId};
use crate::core::RunPhase;
use crate::errors::{CyclicHookError, GraphError};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Every task known to a run, by identifier.
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    tasks: BTreeMap<TaskId, Task>,
}

impl TaskRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a task.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateTaskId` if the identifier is taken.
    pub fn register(&mut self, task: Task) -> Result<(), GraphError> {
        if self.tasks.contains_key(&task.id) {
            return Err(GraphError::DuplicateTaskId {
                id: task.id.to_string(),
            });
        }
        self.tasks.insert(task.id.clone(), task);
        Ok(())
    }

    /// Registers a task, replacing any existing task with the same id.
    pub fn redefine(&mut self, task: Task) -> Option<Task> {
        self.tasks.insert(task.id.clone(), task)
    }

    /// Looks up a task.
    #[must_use]
    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.get(id)
    }

    /// Whether a task is registered.
    #[must_use]
    pub fn contains(&self, id: &TaskId) -> bool {
        self.tasks.contains_key(id)
    }

    /// Registered tasks in identifier order.
    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    /// Number of registered tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// The ordered task list of one run: a backbone with hooks spliced in.
#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    tasks: Vec<Task>,
}

struct Splicer<'a> {
    registry: &'a TaskRegistry,
    before: HashMap<&'a TaskId, Vec<&'a TaskId>>,
    after: HashMap<&'a TaskId, Vec<&'a TaskId>>,
    placed: HashSet<&'a TaskId>,
    stack: Vec<&'a TaskId>,
    order: Vec<Task>,
}

impl<'a> Splicer<'a> {
    fn expand(&mut self, id: &'a TaskId) -> Result<(), GraphError> {
        if let Some(start) = self.stack.iter().position(|t| *t == id) {
            let mut cycle: Vec<String> = self.stack[start..].iter().map(ToString::to_string).collect();
            cycle.push(id.to_string());
            return Err(CyclicHookError::new(cycle).into());
        }
        self.stack.push(id);

        for hooked in self.before.get(id).cloned().unwrap_or_default() {
            self.expand(hooked)?;
        }

        if !self.placed.insert(id) {
            return Err(GraphError::DuplicateTaskId { id: id.to_string() });
        }
        let task = self.registry.get(id).ok_or_else(|| GraphError::UnknownTask {
            id: id.to_string(),
            referenced_by: "task graph".to_string(),
        })?;
        self.order.push(task.clone());

        for hooked in self.after.get(id).cloned().unwrap_or_default() {
            self.expand(hooked)?;
        }

        self.stack.pop();
        Ok(())
    }
}

/// Rejects cycles anywhere in the hook edges, whether or not the anchors
/// are reachable from the backbone.
fn check_hook_cycles(hooks: &[Hook]) -> Result<(), GraphError> {
    let mut edges: HashMap<&TaskId, Vec<&TaskId>> = HashMap::new();
    for hook in hooks {
        edges.entry(&hook.anchor).or_default().push(&hook.task);
    }
    let mut visited = HashSet::new();
    let mut path = Vec::new();
    for hook in hooks {
        visit_hooks(&hook.anchor, &edges, &mut visited, &mut path)?;
    }
    Ok(())
}

fn visit_hooks<'a>(
    id: &'a TaskId,
    edges: &HashMap<&'a TaskId, Vec<&'a TaskId>>,
    visited: &mut HashSet<&'a TaskId>,
    path: &mut Vec<&'a TaskId>,
) -> Result<(), GraphError> {
    if let Some(start) = path.iter().position(|t| *t == id) {
        let mut cycle: Vec<String> = path[start..].iter().map(ToString::to_string).collect();
        cycle.push(id.to_string());
        return Err(CyclicHookError::new(cycle).into());
    }
    if visited.contains(id) {
        return Ok(());
    }
    path.push(id);
    for next in edges.get(id).into_iter().flatten() {
        visit_hooks(next, edges, visited, path)?;
    }
    path.pop();
    visited.insert(id);
    Ok(())
}

impl TaskGraph {
    /// Splices hooks into the backbone.
    ///
    /// Each hook places its task immediately before or after its anchor.
    /// Several hooks on one anchor keep registration order, and hooked tasks
    /// may carry hooks of their own. Hooks whose anchor never appears in the
    /// result are inert.
    ///
    /// # Errors
    ///
    /// Returns `EmptyBackbone`, `UnknownTask` for unregistered references,
    /// `CyclicHook` when hooks form a cycle, or `DuplicateTaskId` when a task
    /// would be placed twice.
    pub fn build(
        backbone: &[TaskId],
        hooks: &[Hook],
        registry: &TaskRegistry,
    ) -> Result<Self, GraphError> {
        if backbone.is_empty() {
            return Err(GraphError::EmptyBackbone);
        }
        for id in backbone {
            if !registry.contains(id) {
                return Err(GraphError::UnknownTask {
                    id: id.to_string(),
                    referenced_by: "backbone".to_string(),
                });
            }
        }

        let mut before: HashMap<&TaskId, Vec<&TaskId>> = HashMap::new();
        let mut after: HashMap<&TaskId, Vec<&TaskId>> = HashMap::new();
        for hook in hooks {
            for id in [&hook.anchor, &hook.task] {
                if !registry.contains(id) {
                    return Err(GraphError::UnknownTask {
                        id: id.to_string(),
                        referenced_by: format!("hook '{hook}'"),
                    });
                }
            }
            let slot = match hook.position {
                HookPosition::Before => &mut before,
                HookPosition::After => &mut after,
            };
            slot.entry(&hook.anchor).or_default().push(&hook.task);
        }

        check_hook_cycles(hooks)?;

        let mut splicer = Splicer {
            registry,
            before,
            after,
            placed: HashSet::new(),
            stack: Vec::new(),
            order: Vec::with_capacity(backbone.len() + hooks.len()),
        };
        for id in backbone {
            splicer.expand(id)?;
        }

        Ok(Self {
            tasks: splicer.order,
        })
    }

    /// Tasks in execution order.
    #[must_use]
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Task identifiers in execution order.
    pub fn ids(&self) -> impl Iterator<Item = &TaskId> {
        self.tasks.iter().map(|t| &t.id)
    }

    /// Number of tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the graph has no tasks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Whether any task moves the `current` symlink.
    #[must_use]
    pub fn switches_release(&self) -> bool {
        self.tasks.iter().any(|t| t.action.switches_release())
    }

    /// The run phase of each task, by position.
    ///
    /// Tasks before the first release switch are `Building`, the switch is
    /// `Activating`, later tasks are `Restarting`, and everything from the
    /// first prune on is `Cleanup`. Phases never move backwards.
    #[must_use]
    pub fn phases(&self) -> Vec<RunPhase> {
        let switch = self.tasks.iter().position(|t| t.action.switches_release());
        let prune = self
            .tasks
            .iter()
            .position(|t| matches!(t.action, TaskAction::Prune));

        let mut current = RunPhase::Building;
        (0..self.tasks.len())
            .map(|i| {
                let raw = if prune.is_some_and(|p| i >= p) {
                    RunPhase::Cleanup
                } else {
                    match switch {
                        Some(s) if i == s => RunPhase::Activating,
                        Some(s) if i > s => RunPhase::Restarting,
                        _ => RunPhase::Building,
                    }
                };
                current = current.max(raw);
                current
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn id(raw: &str) -> TaskId {
        TaskId::parse(raw).unwrap()
    }

    fn registry(names: &[&str]) -> TaskRegistry {
        let mut registry = TaskRegistry::new();
        for name in names {
            registry
                .register(Task::commands(id(name), [format!("echo {name}")]))
                .unwrap();
        }
        registry
    }

    fn order(graph: &TaskGraph) -> Vec<&str> {
        graph.ids().map(TaskId::as_str).collect()
    }

    #[test]
    fn test_before_and_after_splice() {
        let registry = registry(&["a", "b", "c", "h1", "h2"]);
        let graph = TaskGraph::build(
            &[id("a"), id("b"), id("c")],
            &[Hook::before(id("b"), id("h1")), Hook::after(id("b"), id("h2"))],
            &registry,
        )
        .unwrap();
        assert_eq!(order(&graph), vec!["a", "h1", "b", "h2", "c"]);
    }

    #[test]
    fn test_chained_hooks_ignore_registration_order() {
        let registry = registry(&["a", "b", "c"]);
        let forward = [Hook::after(id("a"), id("b")), Hook::after(id("b"), id("c"))];
        let reverse = [Hook::after(id("b"), id("c")), Hook::after(id("a"), id("b"))];

        for hooks in [&forward[..], &reverse[..]] {
            let graph = TaskGraph::build(&[id("a")], hooks, &registry).unwrap();
            assert_eq!(order(&graph), vec!["a", "b", "c"]);
        }
    }

    #[test]
    fn test_same_anchor_keeps_registration_order() {
        let registry = registry(&["a", "x", "y", "p", "q"]);
        let graph = TaskGraph::build(
            &[id("a")],
            &[
                Hook::after(id("a"), id("x")),
                Hook::before(id("a"), id("p")),
                Hook::after(id("a"), id("y")),
                Hook::before(id("a"), id("q")),
            ],
            &registry,
        )
        .unwrap();
        assert_eq!(order(&graph), vec!["p", "q", "a", "x", "y"]);
    }

    #[test]
    fn test_cycle_rejected() {
        let registry = registry(&["a", "b", "c"]);
        let err = TaskGraph::build(
            &[id("a")],
            &[
                Hook::after(id("a"), id("b")),
                Hook::after(id("b"), id("c")),
                Hook::before(id("c"), id("b")),
            ],
            &registry,
        )
        .unwrap_err();
        match err {
            GraphError::CyclicHook(cycle) => assert_eq!(cycle.cycle_path, vec!["b", "c", "b"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_cycle_off_the_backbone_rejected() {
        let registry = registry(&["a", "x", "y"]);
        let err = TaskGraph::build(
            &[id("a")],
            &[Hook::after(id("x"), id("y")), Hook::after(id("y"), id("x"))],
            &registry,
        )
        .unwrap_err();
        match err {
            GraphError::CyclicHook(cycle) => assert_eq!(cycle.cycle_path, vec!["x", "y", "x"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_self_hook_is_a_cycle() {
        let registry = registry(&["a"]);
        let err = TaskGraph::build(&[id("a")], &[Hook::after(id("a"), id("a"))], &registry)
            .unwrap_err();
        assert!(matches!(err, GraphError::CyclicHook(_)));
    }

    #[test]
    fn test_task_placed_twice() {
        let registry = registry(&["a", "b"]);
        let err = TaskGraph::build(
            &[id("a"), id("b")],
            &[Hook::after(id("a"), id("b"))],
            &registry,
        )
        .unwrap_err();
        assert!(matches!(err, GraphError::DuplicateTaskId { id } if id == "b"));
    }

    #[test]
    fn test_unknown_tasks() {
        let registry = registry(&["a"]);
        assert!(matches!(
            TaskGraph::build(&[id("a"), id("missing")], &[], &registry),
            Err(GraphError::UnknownTask { referenced_by, .. }) if referenced_by == "backbone"
        ));
        assert!(matches!(
            TaskGraph::build(&[id("a")], &[Hook::after(id("a"), id("missing"))], &registry),
            Err(GraphError::UnknownTask { .. })
        ));
        assert!(matches!(
            TaskGraph::build(&[], &[], &registry),
            Err(GraphError::EmptyBackbone)
        ));
    }

    #[test]
    fn test_inert_hook() {
        let registry = registry(&["a", "b", "h"]);
        let graph =
            TaskGraph::build(&[id("a")], &[Hook::after(id("b"), id("h"))], &registry).unwrap();
        assert_eq!(order(&graph), vec!["a"]);
    }

    #[test]
    fn test_registry_duplicate() {
        let mut registry = registry(&["a"]);
        assert!(matches!(
            registry.register(Task::new(id("a"), TaskAction::Activate)),
            Err(GraphError::DuplicateTaskId { .. })
        ));
        assert!(registry
            .redefine(Task::new(id("a"), TaskAction::Activate))
            .is_some());
        assert_eq!(registry.get(&id("a")).unwrap().action, TaskAction::Activate);
    }

    #[test]
    fn test_phases() {
        let mut registry = registry(&["build", "restart", "chown"]);
        registry
            .register(Task::new(id("switch"), TaskAction::Activate))
            .unwrap();
        registry
            .register(Task::new(id("prune"), TaskAction::Prune))
            .unwrap();
        let graph = TaskGraph::build(
            &[id("build"), id("switch"), id("restart"), id("prune"), id("chown")],
            &[],
            &registry,
        )
        .unwrap();
        assert_eq!(
            graph.phases(),
            vec![
                RunPhase::Building,
                RunPhase::Activating,
                RunPhase::Restarting,
                RunPhase::Cleanup,
                RunPhase::Cleanup,
            ]
        );
    }
}
