//! Testing utilities for stagehand runs.
//!
//! This module provides:
//! - A scripted [`MockTransport`](mocks::MockTransport) that records every
//!   connection and command
//! - Stage, context and task graph fixtures

pub mod fixtures;
pub mod mocks;

pub use fixtures::{command_graph, multi_host_context, staging_context, SAMPLE_DEPLOY_TOML};
pub use mocks::{Dispatch, MockTransport};
