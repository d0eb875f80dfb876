//! Stage configuration.
//!
//! This module provides:
//! - The closed set of stages
//! - Layered stage parameters and caller overrides
//! - The stage resolver producing an immutable [`StageContext`]
//! - Deploy file loading

mod context;
mod load;
mod params;
mod resolver;
mod stage;

pub use context::StageContext;
pub use load::{DeployConfig, HookDef, RunSpec, TaskDef, DEPLOY_FILE, STAGE_DIR};
pub use params::StageParams;
pub use resolver::{StageResolver, DEFAULT_ROLE};
pub use stage::StageId;
