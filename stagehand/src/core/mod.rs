//! Core domain types for stagehand.
//!
//! - Task, run and release status enums
//! - Per-host and per-task result records

mod output;
mod status;

pub use output::{HostError, HostErrorKind, HostResult, TaskResult};
pub use status::{ReleaseStatus, RunPhase, TaskStatus};
