//! Run events for observability.
//!
//! The executor reports run progress to an [`EventSink`]. Event types are
//! dotted names (`run.started`, `task.failed`, ...) with a JSON payload.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// Event type names emitted by the executor.
pub mod event_types {
    /// A run began; payload carries run id, stage, task and host counts.
    pub const RUN_STARTED: &str = "run.started";
    /// A task was dispatched to its hosts.
    pub const TASK_STARTED: &str = "task.started";
    /// A task settled without a fatal failure.
    pub const TASK_COMPLETED: &str = "task.completed";
    /// A task failed on at least one host.
    pub const TASK_FAILED: &str = "task.failed";
    /// A run reached a terminal phase.
    pub const RUN_COMPLETED: &str = "run.completed";
}
