//! The remote execution seam.

use crate::config::StageContext;
use crate::errors::SessionError;
use crate::inventory::Host;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// How to authenticate against a host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Login user; the client default when absent.
    pub user: Option<String>,
    /// Port used when the host address carries none.
    pub port: u16,
    /// Private keys offered, in order.
    pub ssh_keys: Vec<String>,
    /// Forward the local agent.
    pub forward_agent: bool,
    /// Allocate a pseudo terminal for commands.
    pub pty: bool,
    /// Ceiling for establishing a connection.
    pub connect_timeout: Duration,
}

impl Credentials {
    /// Credentials for every host of a stage.
    #[must_use]
    pub fn from_context(context: &StageContext) -> Self {
        Self {
            user: context.user.clone(),
            port: context.port,
            ssh_keys: context.ssh_keys.clone(),
            forward_agent: context.forward_agent,
            pty: context.pty,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl Default for Credentials {
    fn default() -> Self {
        Self {
            user: None,
            port: 22,
            ssh_keys: Vec::new(),
            forward_agent: false,
            pty: false,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// An open transport connection to one host.
///
/// `handle` is transport specific, such as an ssh control socket path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    /// The connected host.
    pub host: Host,
    /// Transport specific handle.
    pub handle: String,
}

/// Exit status and combined output of a remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code.
    pub exit_code: i32,
    /// Combined stdout and stderr.
    pub output: String,
}

impl CommandOutput {
    /// Whether the command exited zero.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Opens connections and runs shell commands on hosts.
///
/// A non-zero exit is reported as `Ok` with the exit code; errors are
/// reserved for connection problems and timeouts.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Opens a connection.
    async fn connect(
        &self,
        host: &Host,
        credentials: &Credentials,
    ) -> Result<Connection, SessionError>;

    /// Runs `command` with `env` exported, within `timeout`.
    async fn run_remote_command(
        &self,
        connection: &Connection,
        command: &str,
        env: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<CommandOutput, SessionError>;

    /// Closes a connection. Never fails.
    async fn disconnect(&self, connection: &Connection);
}
