//! Per-run session ownership.

use super::{CommandOutput, Connection, Credentials, Transport};
use crate::cancellation::CancellationToken;
use crate::config::StageContext;
use crate::core::HostResult;
use crate::errors::SessionError;
use crate::inventory::Host;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Delays before connection retries 1, 2, 3...; the last entry repeats.
const CONNECT_BACKOFF_SECS: [u64; 3] = [0, 2, 5];

/// An authenticated channel to one host, shared by every task of a run.
#[derive(Debug)]
pub struct Session {
    host: Host,
    connection: Connection,
    commands: AtomicUsize,
}

impl Session {
    /// The host.
    #[must_use]
    pub fn host(&self) -> &Host {
        &self.host
    }

    /// The underlying transport connection.
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Number of commands run through this session.
    #[must_use]
    pub fn command_count(&self) -> usize {
        self.commands.load(Ordering::Relaxed)
    }
}

/// Connection and dispatch settings for a run.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Authentication.
    pub credentials: Credentials,
    /// Environment exported before every command.
    pub env: BTreeMap<String, String>,
    /// Per-command time ceiling.
    pub command_timeout: Duration,
    /// Connection attempts per host.
    pub connect_attempts: u32,
    /// Delays between connection attempts.
    pub connect_backoff: Vec<Duration>,
}

impl SessionOptions {
    /// Options for a stage.
    #[must_use]
    pub fn from_context(context: &StageContext) -> Self {
        Self {
            credentials: Credentials::from_context(context),
            env: context.runtime_environment.clone(),
            command_timeout: context.command_timeout,
            connect_attempts: context.connect_attempts,
            ..Self::default()
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            credentials: Credentials::default(),
            env: BTreeMap::new(),
            command_timeout: Duration::from_secs(600),
            connect_attempts: 1,
            connect_backoff: CONNECT_BACKOFF_SECS
                .iter()
                .map(|s| Duration::from_secs(*s))
                .collect(),
        }
    }
}

/// Opens at most one session per host for the lifetime of a run.
///
/// A host whose connection failed is not retried within the run; later
/// requests get the recorded failure.
pub struct SessionManager {
    transport: Arc<dyn Transport>,
    options: SessionOptions,
    cancel: Arc<CancellationToken>,
    sessions: DashMap<Host, Arc<Session>>,
    failures: DashMap<Host, SessionError>,
    connecting: DashMap<Host, Arc<tokio::sync::Mutex<()>>>,
    opened: AtomicUsize,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("transport", &self.transport)
            .field("open", &self.sessions.len())
            .field("failed", &self.failures.len())
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Creates a manager.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        options: SessionOptions,
        cancel: Arc<CancellationToken>,
    ) -> Self {
        Self {
            transport,
            options,
            cancel,
            sessions: DashMap::new(),
            failures: DashMap::new(),
            connecting: DashMap::new(),
            opened: AtomicUsize::new(0),
        }
    }

    /// Returns the session for `host`, connecting on first use.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionFailed` (also for every later call on a host that
    /// failed) or `Cancelled`.
    pub async fn acquire(&self, host: &Host) -> Result<Arc<Session>, SessionError> {
        if let Some(session) = self.cached(host)? {
            return Ok(session);
        }

        let lock = Arc::clone(self.connecting.entry(host.clone()).or_default().value());
        let _guard = lock.lock().await;
        if let Some(session) = self.cached(host)? {
            return Ok(session);
        }

        match self.connect_with_retry(host).await {
            Ok(connection) => {
                let session = Arc::new(Session {
                    host: host.clone(),
                    connection,
                    commands: AtomicUsize::new(0),
                });
                self.opened.fetch_add(1, Ordering::Relaxed);
                self.sessions.insert(host.clone(), Arc::clone(&session));
                info!(host = %host, "Session opened");
                Ok(session)
            }
            Err(err) => {
                if matches!(err, SessionError::ConnectionFailed { .. }) {
                    warn!(host = %host, error = %err, "Connection failed");
                    self.failures.insert(host.clone(), err.clone());
                }
                Err(err)
            }
        }
    }

    fn cached(&self, host: &Host) -> Result<Option<Arc<Session>>, SessionError> {
        if let Some(session) = self.sessions.get(host) {
            return Ok(Some(Arc::clone(session.value())));
        }
        if let Some(err) = self.failures.get(host) {
            return Err(err.value().clone());
        }
        Ok(None)
    }

    async fn connect_with_retry(&self, host: &Host) -> Result<Connection, SessionError> {
        let attempts = self.options.connect_attempts.max(1);
        let mut last_error = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = self
                    .options
                    .connect_backoff
                    .get(attempt as usize - 1)
                    .or_else(|| self.options.connect_backoff.last())
                    .copied()
                    .unwrap_or_default();
                warn!(
                    host = %host,
                    "Connection failed (attempt {}/{}), retrying in {:?}",
                    attempt,
                    attempts,
                    delay
                );
                tokio::select! {
                    () = self.cancel.cancelled() => return Err(self.cancelled(host)),
                    () = tokio::time::sleep(delay) => {}
                }
            }

            let result = tokio::select! {
                () = self.cancel.cancelled() => return Err(self.cancelled(host)),
                result = self.transport.connect(host, &self.options.credentials) => result,
            };
            match result {
                Ok(connection) => return Ok(connection),
                Err(err @ SessionError::ConnectionFailed { .. }) => last_error = Some(err),
                Err(err) => return Err(err),
            }
        }

        Err(last_error
            .unwrap_or_else(|| SessionError::connection_failed(host.as_str(), "no attempt made")))
    }

    fn cancelled(&self, host: &Host) -> SessionError {
        SessionError::Cancelled {
            host: host.to_string(),
        }
    }

    /// Runs a command, turning a non-zero exit into `RemoteCommandFailed`.
    ///
    /// # Errors
    ///
    /// Returns `RemoteCommandFailed`, `Timeout`, `Cancelled` or
    /// `ConnectionFailed` if the connection dropped.
    pub async fn run(&self, session: &Session, command: &str) -> Result<CommandOutput, SessionError> {
        session.commands.fetch_add(1, Ordering::Relaxed);
        debug!(host = %session.host, command = %command, "Dispatching");

        let output = tokio::select! {
            () = self.cancel.cancelled() => return Err(self.cancelled(&session.host)),
            output = self.transport.run_remote_command(
                &session.connection,
                command,
                &self.options.env,
                self.options.command_timeout,
            ) => output?,
        };

        if output.success() {
            Ok(output)
        } else {
            Err(SessionError::RemoteCommandFailed {
                host: session.host.to_string(),
                exit_code: output.exit_code,
                output: output.output,
            })
        }
    }

    /// Runs a command and records the outcome as a host result.
    pub async fn execute(&self, session: &Session, command: &str) -> HostResult {
        let result = match self.run(session, command).await {
            Ok(output) => HostResult::success(session.host.clone(), output.exit_code, output.output),
            Err(err) => HostResult::from_session_error(session.host.clone(), &err),
        };
        result.with_commands(vec![command.to_string()])
    }

    /// Closes every open session. Safe to call more than once.
    pub async fn release_all(&self) {
        let sessions: Vec<Arc<Session>> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        self.sessions.clear();
        if sessions.is_empty() {
            return;
        }

        futures::future::join_all(
            sessions
                .iter()
                .map(|session| self.transport.disconnect(&session.connection)),
        )
        .await;
        info!(count = sessions.len(), "Released sessions");
    }

    /// Sessions currently open.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.sessions.len()
    }

    /// Connections opened over the manager's lifetime.
    #[must_use]
    pub fn opened_count(&self) -> usize {
        self.opened.load(Ordering::Relaxed)
    }
}
