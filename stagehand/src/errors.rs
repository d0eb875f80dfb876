//! Error types for the stagehand orchestrator.
//!
//! Errors are grouped by the component that raises them. Every error maps to
//! a [`FailureKind`], which is what the command line surface turns into an
//! exit code.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification of a fatal failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Unknown stage/role, missing mandatory key, bad graph or template.
    Config,
    /// A remote session could not be established.
    ConnectionFailure,
    /// A remote command failed or timed out.
    TaskFailure,
    /// The run was cancelled.
    Cancelled,
}

impl FailureKind {
    /// Process exit code for this failure kind.
    #[must_use]
    pub const fn exit_code(self) -> u8 {
        match self {
            Self::Config => 2,
            Self::ConnectionFailure => 3,
            Self::TaskFailure => 4,
            Self::Cancelled => 5,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config => write!(f, "ConfigError"),
            Self::ConnectionFailure => write!(f, "ConnectionFailure"),
            Self::TaskFailure => write!(f, "TaskFailure"),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// The main error type for stagehand operations.
#[derive(Debug, Error)]
pub enum StagehandError {
    /// Stage, role or configuration file problem.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// Task graph could not be built.
    #[error("{0}")]
    Graph(#[from] GraphError),

    /// Remote session or command failure.
    #[error("{0}")]
    Session(#[from] SessionError),

    /// Release bookkeeping failure.
    #[error("{0}")]
    Release(#[from] ReleaseError),

    /// Template rendering failure.
    #[error("{0}")]
    Template(#[from] TemplateError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StagehandError {
    /// Stable machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(e) => e.code(),
            Self::Graph(e) => e.code(),
            Self::Session(e) => e.code(),
            Self::Release(e) => e.code(),
            Self::Template(_) => "TEMPLATE-UNKNOWN-PLACEHOLDER",
            Self::Io(_) => "IO",
        }
    }

    /// Failure classification used for exit codes.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Config(_) | Self::Graph(_) | Self::Template(_) => FailureKind::Config,
            Self::Session(e) => e.kind(),
            Self::Release(_) | Self::Io(_) => FailureKind::TaskFailure,
        }
    }

    /// A short hint for fixing the error, when one is known.
    #[must_use]
    pub fn fix_hint(&self) -> Option<&'static str> {
        match self.code() {
            "CONFIG-UNKNOWN-STAGE" => {
                Some("Add a [stages.<name>] table or a deploy/<name>.toml stage file.")
            }
            "CONFIG-INCOMPLETE-STAGE" => {
                Some("Set the missing keys in [defaults], the stage file, or with --set key=value.")
            }
            "GRAPH-CYCLIC-HOOK" => Some("Remove one of the hooks in the cycle to break it."),
            "GRAPH-UNKNOWN-TASK" => Some("Declare the task under [tasks.\"namespace:name\"]."),
            "SESSION-CONNECTION-FAILED" => {
                Some("Check the host address, the ssh user and the configured ssh_keys.")
            }
            "RELEASE-NO-RETAINED" => Some("Nothing to roll back to; deploy at least twice first."),
            _ => None,
        }
    }

    /// Converts to a JSON object for machine-readable output.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert("code".to_string(), serde_json::json!(self.code()));
        map.insert("kind".to_string(), serde_json::json!(self.kind()));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        if let Some(hint) = self.fix_hint() {
            map.insert("fix_hint".to_string(), serde_json::json!(hint));
        }
        serde_json::Value::Object(map)
    }
}

/// Convenience result alias.
pub type Result<T, E = StagehandError> = std::result::Result<T, E>;

/// Errors raised while loading or resolving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The stage name is not one of the known stages, or has no configuration.
    #[error("Unknown stage: {stage}")]
    UnknownStage {
        /// The requested stage name.
        stage: String,
    },

    /// Mandatory keys are missing after merging all layers.
    #[error("Incomplete configuration for stage '{stage}': missing {}", missing.join(", "))]
    IncompleteStageConfig {
        /// The stage being resolved.
        stage: String,
        /// Every missing key.
        missing: Vec<String>,
    },

    /// A role name has no registered members.
    #[error("Unknown role: {role}")]
    UnknownRole {
        /// The role name.
        role: String,
    },

    /// An override names a parameter that does not exist.
    #[error("Unknown parameter: {key}")]
    UnknownParameter {
        /// The offending key.
        key: String,
    },

    /// A parameter value could not be interpreted.
    #[error("Invalid value '{value}' for '{key}': {reason}")]
    InvalidValue {
        /// The parameter key.
        key: String,
        /// The raw value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A configuration file could not be read.
    #[error("Cannot read {}: {source}", path.display())]
    Read {
        /// The file path.
        path: PathBuf,
        /// The IO error.
        #[source]
        source: std::io::Error,
    },

    /// A configuration file could not be parsed.
    #[error("Cannot parse {}: {message}", path.display())]
    Parse {
        /// The file path.
        path: PathBuf,
        /// Parser message.
        message: String,
    },
}

impl ConfigError {
    /// Stable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::UnknownStage { .. } => "CONFIG-UNKNOWN-STAGE",
            Self::IncompleteStageConfig { .. } => "CONFIG-INCOMPLETE-STAGE",
            Self::UnknownRole { .. } => "CONFIG-UNKNOWN-ROLE",
            Self::UnknownParameter { .. } => "CONFIG-UNKNOWN-PARAMETER",
            Self::InvalidValue { .. } => "CONFIG-INVALID-VALUE",
            Self::Read { .. } => "CONFIG-READ",
            Self::Parse { .. } => "CONFIG-PARSE",
        }
    }

    /// Creates an invalid value error.
    #[must_use]
    pub fn invalid_value(
        key: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            key: key.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// Error raised when hooks form a cycle.
#[derive(Debug, Clone, Error)]
#[error("Cyclic hook detected: {}", cycle_path.join(" -> "))]
pub struct CyclicHookError {
    /// The tasks forming the cycle, first task repeated at the end.
    pub cycle_path: Vec<String>,
}

impl CyclicHookError {
    /// Creates a new cyclic hook error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        Self { cycle_path }
    }
}

/// Errors raised while assembling the task graph.
#[derive(Debug, Clone, Error)]
pub enum GraphError {
    /// Hooks form a cycle.
    #[error("{0}")]
    CyclicHook(#[from] CyclicHookError),

    /// A task identifier is registered or placed twice.
    #[error("Duplicate task id: {id}")]
    DuplicateTaskId {
        /// The duplicated identifier.
        id: String,
    },

    /// The backbone or a hook references a task that is not registered.
    #[error("Unknown task '{id}' referenced by {referenced_by}")]
    UnknownTask {
        /// The missing identifier.
        id: String,
        /// Where it was referenced from.
        referenced_by: String,
    },

    /// A task identifier is malformed.
    #[error("Invalid task id '{id}': {reason}")]
    InvalidTaskId {
        /// The raw identifier.
        id: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The backbone has no tasks.
    #[error("Task graph has an empty backbone")]
    EmptyBackbone,
}

impl GraphError {
    /// Stable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::CyclicHook(_) => "GRAPH-CYCLIC-HOOK",
            Self::DuplicateTaskId { .. } => "GRAPH-DUPLICATE-TASK",
            Self::UnknownTask { .. } => "GRAPH-UNKNOWN-TASK",
            Self::InvalidTaskId { .. } => "GRAPH-INVALID-TASK-ID",
            Self::EmptyBackbone => "GRAPH-EMPTY-BACKBONE",
        }
    }
}

/// Errors raised by the session layer.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// Authentication or network failure while opening the session.
    #[error("Connection to {host} failed: {reason}")]
    ConnectionFailed {
        /// The target host.
        host: String,
        /// Transport diagnostic.
        reason: String,
    },

    /// The remote command exited non-zero.
    #[error("Command on {host} exited with status {exit_code}")]
    RemoteCommandFailed {
        /// The target host.
        host: String,
        /// Remote exit code.
        exit_code: i32,
        /// Captured combined output.
        output: String,
    },

    /// The remote command exceeded its time ceiling.
    #[error("Command on {host} timed out after {after_secs}s")]
    Timeout {
        /// The target host.
        host: String,
        /// The configured ceiling.
        after_secs: u64,
    },

    /// The run was cancelled while the command was in flight.
    #[error("Command on {host} cancelled")]
    Cancelled {
        /// The target host.
        host: String,
    },
}

impl SessionError {
    /// Stable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::ConnectionFailed { .. } => "SESSION-CONNECTION-FAILED",
            Self::RemoteCommandFailed { .. } => "SESSION-REMOTE-COMMAND-FAILED",
            Self::Timeout { .. } => "SESSION-TIMEOUT",
            Self::Cancelled { .. } => "SESSION-CANCELLED",
        }
    }

    /// Failure classification.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::ConnectionFailed { .. } => FailureKind::ConnectionFailure,
            Self::RemoteCommandFailed { .. } | Self::Timeout { .. } => FailureKind::TaskFailure,
            Self::Cancelled { .. } => FailureKind::Cancelled,
        }
    }

    /// Creates a connection failure.
    #[must_use]
    pub fn connection_failed(host: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            host: host.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by release bookkeeping.
#[derive(Debug, Clone, Error)]
pub enum ReleaseError {
    /// Rollback requested with no retained release to return to.
    #[error("No retained release to roll back to on {host}")]
    NoRetainedRelease {
        /// The host whose history is empty.
        host: String,
    },

    /// A release id is not present in the history.
    #[error("Unknown release: {id}")]
    UnknownRelease {
        /// The release id.
        id: String,
    },
}

impl ReleaseError {
    /// Stable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NoRetainedRelease { .. } => "RELEASE-NO-RETAINED",
            Self::UnknownRelease { .. } => "RELEASE-UNKNOWN",
        }
    }
}

/// Error raised when a template names a placeholder with no value.
#[derive(Debug, Clone, Error)]
#[error("Unknown placeholder '{{{name}}}' in template \"{template}\"")]
pub struct TemplateError {
    /// The placeholder name.
    pub name: String,
    /// The template source.
    pub template: String,
}
