//! OpenSSH transport.
//!
//! Shells out to the system `ssh` client. `connect` starts a persistent
//! multiplexing master (`ControlMaster`, `ControlPersist`), commands reuse its
//! control socket, and `disconnect` asks the master to exit. Local addresses
//! run through `sh -c`.

use super::{CommandOutput, Connection, Credentials, Transport};
use crate::errors::SessionError;
use crate::inventory::Host;
use crate::utils::env_prefix;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

const LOCAL_HANDLE: &str = "local";
const CONTROL_PERSIST_SECS: u64 = 600;
const SSH_CONNECTION_ERROR: i32 = 255;

/// Transport over the system `ssh` client with connection multiplexing.
#[derive(Debug)]
pub struct SshTransport {
    control_dir: PathBuf,
    credentials: DashMap<Host, Credentials>,
}

impl Default for SshTransport {
    fn default() -> Self {
        Self::new(std::env::temp_dir().join(format!("stagehand-{}", std::process::id())))
    }
}

impl SshTransport {
    /// Creates a transport keeping control sockets in `control_dir`.
    #[must_use]
    pub fn new(control_dir: impl Into<PathBuf>) -> Self {
        Self {
            control_dir: control_dir.into(),
            credentials: DashMap::new(),
        }
    }

    fn control_path(&self) -> String {
        self.control_dir.join("%C").to_string_lossy().into_owned()
    }

    /// Options shared by the master and every multiplexed command.
    fn base_args(&self, host: &Host, credentials: &Credentials) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", credentials.connect_timeout.as_secs().max(1)),
            "-o".to_string(),
            "ServerAliveInterval=15".to_string(),
            "-o".to_string(),
            "ServerAliveCountMax=3".to_string(),
            "-o".to_string(),
            format!("ControlPath={}", self.control_path()),
        ];

        let port = host.port().unwrap_or(credentials.port);
        if port != 22 {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        for key in &credentials.ssh_keys {
            args.push("-i".to_string());
            args.push(shellexpand::tilde(key).into_owned());
        }
        if let Some(user) = &credentials.user {
            args.push("-l".to_string());
            args.push(user.clone());
        }
        args
    }

    fn master_args(&self, host: &Host, credentials: &Credentials, log_path: &Path) -> Vec<String> {
        let mut args = self.base_args(host, credentials);
        args.extend([
            "-o".to_string(),
            "ControlMaster=auto".to_string(),
            "-o".to_string(),
            format!("ControlPersist={CONTROL_PERSIST_SECS}"),
            "-E".to_string(),
            log_path.to_string_lossy().into_owned(),
            host.name().to_string(),
            "true".to_string(),
        ]);
        args
    }

    fn command_args(&self, host: &Host, credentials: &Credentials, remote: &str) -> Vec<String> {
        let mut args = self.base_args(host, credentials);
        if credentials.forward_agent {
            args.push("-A".to_string());
        }
        if credentials.pty {
            args.push("-tt".to_string());
        }
        args.push(host.name().to_string());
        args.push(remote.to_string());
        args
    }
}

/// Wraps a command so the environment is exported and stderr is merged.
fn wrap_command(command: &str, env: &BTreeMap<String, String>) -> String {
    format!("({}{}) 2>&1", env_prefix(env), command)
}

fn normalize_exit(status: ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(code) = status.code() {
            code
        } else if let Some(sig) = status.signal() {
            128 + sig
        } else {
            1
        }
    }
    #[cfg(not(unix))]
    {
        status.code().unwrap_or(1)
    }
}

/// Spawns `command`, streams its stdout line by line and waits for it.
async fn run_streaming(
    mut command: Command,
    host: &Host,
    timeout: Duration,
) -> Result<(CommandOutput, String), SessionError> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    let mut child = command
        .spawn()
        .map_err(|e| SessionError::connection_failed(host.as_str(), e.to_string()))?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let collect = async {
        let read_stdout = async {
            let mut output = String::new();
            if let Some(stdout) = stdout {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(host = %host, "{line}");
                    output.push_str(&line);
                    output.push('\n');
                }
            }
            output
        };
        let read_stderr = async {
            let mut diagnostics = String::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_string(&mut diagnostics).await;
            }
            diagnostics
        };
        let (output, diagnostics) = tokio::join!(read_stdout, read_stderr);
        let status = child.wait().await;
        (output, diagnostics, status)
    };

    let result = tokio::time::timeout(timeout, collect).await;
    match result {
        Ok((output, diagnostics, Ok(status))) => Ok((
            CommandOutput {
                exit_code: normalize_exit(status),
                output,
            },
            diagnostics,
        )),
        Ok((_, _, Err(e))) => Err(SessionError::connection_failed(host.as_str(), e.to_string())),
        Err(_) => {
            let _ = child.kill().await;
            Err(SessionError::Timeout {
                host: host.to_string(),
                after_secs: timeout.as_secs(),
            })
        }
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn connect(
        &self,
        host: &Host,
        credentials: &Credentials,
    ) -> Result<Connection, SessionError> {
        self.credentials.insert(host.clone(), credentials.clone());
        if host.is_local() {
            debug!(host = %host, "Using local execution");
            return Ok(Connection {
                host: host.clone(),
                handle: LOCAL_HANDLE.to_string(),
            });
        }

        tokio::fs::create_dir_all(&self.control_dir)
            .await
            .map_err(|e| SessionError::connection_failed(host.as_str(), e.to_string()))?;

        // The persisted master keeps running in the background, so its stdio
        // must not be piped; diagnostics go to a log file instead.
        let log_path = self.control_dir.join(format!("{}.log", host.name()));
        let _ = tokio::fs::remove_file(&log_path).await;
        let mut command = Command::new("ssh");
        command
            .args(self.master_args(host, credentials, &log_path))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        let mut child = command
            .spawn()
            .map_err(|e| SessionError::connection_failed(host.as_str(), e.to_string()))?;

        let waited =
            tokio::time::timeout(credentials.connect_timeout + Duration::from_secs(5), child.wait())
                .await;
        let status = match waited {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => return Err(SessionError::connection_failed(host.as_str(), e.to_string())),
            Err(_) => {
                let _ = child.kill().await;
                return Err(SessionError::connection_failed(
                    host.as_str(),
                    "connection timed out",
                ));
            }
        };

        if !status.success() {
            let log = tokio::fs::read_to_string(&log_path).await.unwrap_or_default();
            let reason = log.trim();
            return Err(SessionError::connection_failed(
                host.as_str(),
                if reason.is_empty() {
                    format!("ssh exited with status {}", normalize_exit(status))
                } else {
                    reason.to_string()
                },
            ));
        }
        debug!(host = %host, "Opened ssh master connection");
        Ok(Connection {
            host: host.clone(),
            handle: self.control_path(),
        })
    }

    async fn run_remote_command(
        &self,
        connection: &Connection,
        command: &str,
        env: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<CommandOutput, SessionError> {
        let host = &connection.host;
        let remote = wrap_command(command, env);

        let process = if connection.handle == LOCAL_HANDLE {
            let mut process = Command::new("sh");
            process.arg("-c").arg(&remote);
            process
        } else {
            let credentials = self
                .credentials
                .get(host)
                .map(|c| c.value().clone())
                .unwrap_or_default();
            let mut process = Command::new("ssh");
            process.args(self.command_args(host, &credentials, &remote));
            process
        };

        let (output, diagnostics) = run_streaming(process, host, timeout).await?;
        if connection.handle != LOCAL_HANDLE
            && output.exit_code == SSH_CONNECTION_ERROR
            && !diagnostics.trim().is_empty()
        {
            return Err(SessionError::connection_failed(
                host.as_str(),
                diagnostics.trim(),
            ));
        }
        Ok(output)
    }

    async fn disconnect(&self, connection: &Connection) {
        self.credentials.remove(&connection.host);
        if connection.handle == LOCAL_HANDLE {
            return;
        }
        let host = &connection.host;
        let mut command = Command::new("ssh");
        command
            .arg("-o")
            .arg(format!("ControlPath={}", connection.handle))
            .arg("-O")
            .arg("exit")
            .arg(host.name())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        match command.status().await {
            Ok(status) if status.success() => debug!(host = %host, "Closed ssh master connection"),
            Ok(status) => warn!(host = %host, status = %status, "ssh master did not exit cleanly"),
            Err(e) => warn!(host = %host, error = %e, "Failed to close ssh master connection"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local() -> Host {
        Host::new("localhost")
    }

    #[test]
    fn test_command_args() {
        let transport = SshTransport::new("/tmp/stagehand-test");
        let credentials = Credentials {
            user: Some("deploy".into()),
            ssh_keys: vec!["/home/hudson/.ssh/id_rsa".into()],
            forward_agent: true,
            pty: true,
            ..Credentials::default()
        };
        let args = transport.command_args(
            &Host::new("service.timejust.com:2222"),
            &credentials,
            "uptime",
        );

        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(args.contains(&"ControlPath=/tmp/stagehand-test/%C".to_string()));
        assert!(args.windows(2).any(|w| w == ["-p", "2222"]));
        assert!(args.windows(2).any(|w| w == ["-i", "/home/hudson/.ssh/id_rsa"]));
        assert!(args.windows(2).any(|w| w == ["-l", "deploy"]));
        assert!(args.contains(&"-A".to_string()));
        assert!(args.contains(&"-tt".to_string()));
        assert_eq!(
            &args[args.len() - 2..],
            ["service.timejust.com".to_string(), "uptime".to_string()]
        );
    }

    #[test]
    fn test_master_args() {
        let transport = SshTransport::new("/tmp/stagehand-test");
        let args = transport.master_args(
            &Host::new("h1"),
            &Credentials::default(),
            Path::new("/tmp/stagehand-test/h1.log"),
        );
        assert!(args.contains(&"ControlMaster=auto".to_string()));
        assert!(args.windows(2).any(|w| w == ["-E", "/tmp/stagehand-test/h1.log"]));
        assert!(!args.contains(&"-p".to_string()));
        assert_eq!(&args[args.len() - 2..], ["h1".to_string(), "true".to_string()]);
    }

    #[test]
    fn test_wrap_command() {
        let mut env = BTreeMap::new();
        env.insert("RAILS_ENV".to_string(), "staging".to_string());
        assert_eq!(
            wrap_command("uptime", &env),
            "(export RAILS_ENV=\"staging\"; uptime) 2>&1"
        );
    }

    #[tokio::test]
    async fn test_local_command() {
        let transport = SshTransport::default();
        let conn = transport.connect(&local(), &Credentials::default()).await.unwrap();
        let mut env = BTreeMap::new();
        env.insert("STAGE".to_string(), "staging".to_string());

        let out = transport
            .run_remote_command(&conn, "echo \"$STAGE\"; echo oops >&2", &env, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(out.success());
        assert_eq!(out.output, "staging\noops\n");
        transport.disconnect(&conn).await;
    }

    #[tokio::test]
    async fn test_local_exit_code() {
        let transport = SshTransport::default();
        let conn = transport.connect(&local(), &Credentials::default()).await.unwrap();
        let out = transport
            .run_remote_command(&conn, "exit 3", &BTreeMap::new(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.exit_code, 3);
    }

    #[tokio::test]
    async fn test_local_timeout() {
        let transport = SshTransport::default();
        let conn = transport.connect(&local(), &Credentials::default()).await.unwrap();
        let err = transport
            .run_remote_command(&conn, "sleep 5", &BTreeMap::new(), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Timeout { .. }));
    }
}
