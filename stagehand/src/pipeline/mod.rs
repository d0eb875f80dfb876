//! Task graph assembly.
//!
//! This module provides:
//! - Namespaced task identifiers and task definitions
//! - Before/after hooks and their splicing into a backbone
//! - A fluent builder and the built-in deploy recipe

mod builder;
mod graph;
mod hook;
pub mod recipe;
mod task;

pub use builder::PipelineBuilder;
pub use graph::{TaskGraph, TaskRegistry};
pub use hook::{Hook, HookPosition};
pub use task::{Task, TaskAction, TaskId};
