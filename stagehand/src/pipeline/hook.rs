//! Before/after hooks.

use super::TaskId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a hooked task is placed relative to its anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookPosition {
    /// Immediately before the anchor.
    Before,
    /// Immediately after the anchor.
    After,
}

impl fmt::Display for HookPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Before => write!(f, "before"),
            Self::After => write!(f, "after"),
        }
    }
}

/// Places `task` before or after `anchor`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hook {
    /// The task the hook attaches to.
    pub anchor: TaskId,
    /// Before or after.
    pub position: HookPosition,
    /// The hooked task.
    pub task: TaskId,
}

impl Hook {
    /// `before anchor → task`.
    #[must_use]
    pub fn before(anchor: TaskId, task: TaskId) -> Self {
        Self {
            anchor,
            position: HookPosition::Before,
            task,
        }
    }

    /// `after anchor → task`.
    #[must_use]
    pub fn after(anchor: TaskId, task: TaskId) -> Self {
        Self {
            anchor,
            position: HookPosition::After,
            task,
        }
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} -> {}", self.position, self.anchor, self.task)
    }
}
