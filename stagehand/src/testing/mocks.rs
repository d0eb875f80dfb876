//! A scripted in-memory transport.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use crate::errors::SessionError;
use crate::inventory::Host;
use crate::session::{CommandOutput, Connection, Credentials, Transport};

/// A command observed by [`MockTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    /// Target host.
    pub host: Host,
    /// The command as rendered.
    pub command: String,
    /// Environment passed with it.
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
struct CommandRule {
    host: Option<Host>,
    pattern: String,
    outcome: Outcome,
}

#[derive(Debug, Clone)]
enum Outcome {
    Exit { code: i32, output: String },
    Delay(Duration),
}

impl CommandRule {
    fn matches(&self, host: &Host, command: &str) -> bool {
        self.host.as_ref().map_or(true, |h| h == host) && command.contains(&self.pattern)
    }
}

/// A transport that runs nothing and records everything.
///
/// Commands succeed with empty output unless a rule matches. Rules match
/// on a substring of the command, optionally limited to one host; the
/// first matching rule of each kind applies.
#[derive(Debug, Default)]
pub struct MockTransport {
    connect_failures: Mutex<HashMap<Host, String>>,
    rules: Mutex<Vec<CommandRule>>,
    connects: Mutex<Vec<Host>>,
    dispatches: Mutex<Vec<Dispatch>>,
    disconnects: Mutex<Vec<Host>>,
}

impl MockTransport {
    /// Creates a transport where every host is reachable.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every connection attempt to `host` fails with `reason`.
    pub fn fail_connect(&self, host: impl Into<Host>, reason: impl Into<String>) {
        self.connect_failures.lock().insert(host.into(), reason.into());
    }

    /// Commands containing `pattern` exit with `code` on every host.
    pub fn fail_command(&self, pattern: impl Into<String>, code: i32, output: impl Into<String>) {
        self.push_rule(None, pattern, Outcome::Exit {
            code,
            output: output.into(),
        });
    }

    /// Commands containing `pattern` exit with `code` on `host` only.
    pub fn fail_command_on(
        &self,
        host: impl Into<Host>,
        pattern: impl Into<String>,
        code: i32,
        output: impl Into<String>,
    ) {
        self.push_rule(Some(host.into()), pattern, Outcome::Exit {
            code,
            output: output.into(),
        });
    }

    /// Commands containing `pattern` succeed with `output` on `host`.
    pub fn respond_on(&self, host: impl Into<Host>, pattern: impl Into<String>, output: impl Into<String>) {
        self.push_rule(Some(host.into()), pattern, Outcome::Exit {
            code: 0,
            output: output.into(),
        });
    }

    /// Commands containing `pattern` succeed with `output` on every host.
    pub fn respond(&self, pattern: impl Into<String>, output: impl Into<String>) {
        self.push_rule(None, pattern, Outcome::Exit {
            code: 0,
            output: output.into(),
        });
    }

    /// Commands containing `pattern` take `delay` before completing.
    pub fn delay_command(&self, pattern: impl Into<String>, delay: Duration) {
        self.push_rule(None, pattern, Outcome::Delay(delay));
    }

    fn push_rule(&self, host: Option<Host>, pattern: impl Into<String>, outcome: Outcome) {
        self.rules.lock().push(CommandRule {
            host,
            pattern: pattern.into(),
            outcome,
        });
    }

    /// Connection attempts, successful or not.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.connects.lock().len()
    }

    /// Hosts in the order connection attempts were made.
    #[must_use]
    pub fn connects(&self) -> Vec<Host> {
        self.connects.lock().clone()
    }

    /// Every dispatched command.
    #[must_use]
    pub fn dispatches(&self) -> Vec<Dispatch> {
        self.dispatches.lock().clone()
    }

    /// Number of dispatched commands.
    #[must_use]
    pub fn dispatch_count(&self) -> usize {
        self.dispatches.lock().len()
    }

    /// Commands dispatched to one host, in order.
    #[must_use]
    pub fn commands_for(&self, host: &str) -> Vec<String> {
        self.dispatches
            .lock()
            .iter()
            .filter(|d| d.host.as_str() == host)
            .map(|d| d.command.clone())
            .collect()
    }

    /// Number of disconnects.
    #[must_use]
    pub fn disconnect_count(&self) -> usize {
        self.disconnects.lock().len()
    }

    /// Successful connections not yet closed.
    #[must_use]
    pub fn open_connections(&self) -> usize {
        let failed = self.connect_failures.lock();
        let opened = self
            .connects
            .lock()
            .iter()
            .filter(|h| !failed.contains_key(*h))
            .count();
        opened.saturating_sub(self.disconnect_count())
    }

    fn outcome(&self, host: &Host, command: &str) -> (Option<Duration>, CommandOutput) {
        let rules = self.rules.lock();
        let delay = rules.iter().find_map(|rule| match rule.outcome {
            Outcome::Delay(delay) if rule.matches(host, command) => Some(delay),
            _ => None,
        });
        let output = rules
            .iter()
            .find_map(|rule| match &rule.outcome {
                Outcome::Exit { code, output } if rule.matches(host, command) => {
                    Some(CommandOutput {
                        exit_code: *code,
                        output: output.clone(),
                    })
                }
                _ => None,
            })
            .unwrap_or_default();
        (delay, output)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(
        &self,
        host: &Host,
        _credentials: &Credentials,
    ) -> Result<Connection, SessionError> {
        self.connects.lock().push(host.clone());
        if let Some(reason) = self.connect_failures.lock().get(host) {
            return Err(SessionError::connection_failed(host.as_str(), reason.clone()));
        }
        Ok(Connection {
            host: host.clone(),
            handle: format!("mock://{host}"),
        })
    }

    async fn run_remote_command(
        &self,
        connection: &Connection,
        command: &str,
        env: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<CommandOutput, SessionError> {
        self.dispatches.lock().push(Dispatch {
            host: connection.host.clone(),
            command: command.to_string(),
            env: env.clone(),
        });

        let (delay, output) = self.outcome(&connection.host, command);
        if let Some(delay) = delay {
            if delay > timeout {
                tokio::time::sleep(timeout).await;
                return Err(SessionError::Timeout {
                    host: connection.host.to_string(),
                    after_secs: timeout.as_secs(),
                });
            }
            tokio::time::sleep(delay).await;
        }
        Ok(output)
    }

    async fn disconnect(&self, connection: &Connection) {
        self.disconnects.lock().push(connection.host.clone());
    }
}
