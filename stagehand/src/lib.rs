//! # Stagehand
//!
//! Staged deployment orchestration.
//!
//! Stagehand deploys an application to named stages (development, staging,
//! production) with support for:
//!
//! - **Stage resolution**: layered parameters merged from defaults, stage
//!   files and caller overrides
//! - **Roles**: hosts grouped by function, with overlapping membership
//! - **Hooked task pipelines**: a deploy backbone with tasks spliced in
//!   before or after any anchor
//! - **Atomic releases**: timestamped release directories, an atomically
//!   switched `current` link, rollback and pruning
//! - **Remote sessions**: one multiplexed SSH session per host per run
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stagehand::prelude::*;
//!
//! let config = DeployConfig::load(Path::new("deploy.toml"))?;
//! let context = config
//!     .resolver()
//!     .resolve(StageId::Staging, &StageParams::default())?;
//! let graph = config.task_graph(false)?;
//!
//! let executor = Executor::new(Arc::new(SshTransport::default()));
//! let result = executor.run(&graph, &context, &[]).await?;
//! println!("{}", result.summary());
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod executor;
pub mod inventory;
pub mod pipeline;
pub mod release;
pub mod session;
pub mod template;
pub mod utils;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{DeployConfig, StageContext, StageId, StageParams, StageResolver};
    pub use crate::core::{
        HostError, HostErrorKind, HostResult, ReleaseStatus, RunPhase, TaskResult, TaskStatus,
    };
    pub use crate::errors::{
        ConfigError, FailureKind, GraphError, ReleaseError, SessionError, StagehandError,
        TemplateError,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::executor::{Executor, RunFailure, RunResult};
    pub use crate::inventory::{Host, RoleRegistry};
    pub use crate::pipeline::{Hook, PipelineBuilder, Task, TaskAction, TaskGraph, TaskId, TaskRegistry};
    pub use crate::release::{Release, ReleaseCoordinator, ReleaseHistory, ReleaseLayout};
    pub use crate::session::{SessionManager, SshTransport, Transport};
    pub use crate::template::Template;
    pub use crate::utils::Timestamp;
}
