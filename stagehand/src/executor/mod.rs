//! Runs task graphs against the hosts of a stage.
//!
//! The [`Executor`] owns nothing between runs. Each run gets its own
//! session manager and release coordinator, and every session is closed
//! before the run result is returned.

mod engine;
mod result;

pub use engine::Executor;
pub use result::{RunFailure, RunResult};
