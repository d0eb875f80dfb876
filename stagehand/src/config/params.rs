//! One layer of stage parameters.
//!
//! Layers are merged in order (builtin defaults, `[defaults]`, the stage,
//! caller overrides); the later layer wins on every key it sets.

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A partial set of stage parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StageParams {
    /// Application name.
    pub application: Option<String>,
    /// Remote login user.
    pub user: Option<String>,
    /// Branch to deploy.
    pub branch: Option<String>,
    /// Source repository URL.
    pub repository: Option<String>,
    /// Application version used in artifact names.
    #[serde(alias = "app_version")]
    pub version: Option<String>,
    /// A single target host.
    pub host: Option<String>,
    /// Target hosts.
    pub hosts: Option<Vec<String>>,
    /// Role name to host list.
    pub roles: BTreeMap<String, Vec<String>>,
    /// Environment exported before every remote command.
    #[serde(alias = "default_environment")]
    pub runtime_environment: BTreeMap<String, String>,
    /// Root directory holding `releases/`, `shared/` and `current`.
    #[serde(alias = "deploy_to")]
    pub deploy_root: Option<String>,
    /// Servlet container home.
    pub container_home: Option<String>,
    /// Servlet container control script.
    pub container_ctl: Option<String>,
    /// Artifact file name template.
    pub artifact_name_template: Option<String>,
    /// SSH private keys.
    pub ssh_keys: Option<Vec<String>>,
    /// Number of previous releases kept for rollback.
    pub keep_releases: Option<usize>,
    /// Per-command time ceiling.
    pub command_timeout_secs: Option<u64>,
    /// Connection attempts per host before giving up.
    pub connect_attempts: Option<u32>,
    /// Prefix privileged commands with `sudo`.
    pub use_sudo: Option<bool>,
    /// Allocate a pseudo terminal for remote commands.
    pub pty: Option<bool>,
    /// Forward the local SSH agent.
    pub forward_agent: Option<bool>,
    /// Default SSH port.
    pub port: Option<u16>,
    /// Free-form template variables.
    pub variables: BTreeMap<String, String>,
}

impl StageParams {
    /// Values used when no layer sets a key.
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            version: Some("1.0".to_string()),
            artifact_name_template: Some("{application}-{version}.war".to_string()),
            keep_releases: Some(5),
            command_timeout_secs: Some(600),
            connect_attempts: Some(1),
            use_sudo: Some(true),
            pty: Some(true),
            forward_agent: Some(true),
            port: Some(22),
            ..Self::default()
        }
    }

    /// Merges `other` over `self`.
    pub fn merge(&mut self, other: &Self) {
        fn over<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
            if value.is_some() {
                slot.clone_from(value);
            }
        }

        over(&mut self.application, &other.application);
        over(&mut self.user, &other.user);
        over(&mut self.branch, &other.branch);
        over(&mut self.repository, &other.repository);
        over(&mut self.version, &other.version);
        over(&mut self.host, &other.host);
        over(&mut self.hosts, &other.hosts);
        over(&mut self.deploy_root, &other.deploy_root);
        over(&mut self.container_home, &other.container_home);
        over(&mut self.container_ctl, &other.container_ctl);
        over(&mut self.artifact_name_template, &other.artifact_name_template);
        over(&mut self.ssh_keys, &other.ssh_keys);
        over(&mut self.keep_releases, &other.keep_releases);
        over(&mut self.command_timeout_secs, &other.command_timeout_secs);
        over(&mut self.connect_attempts, &other.connect_attempts);
        over(&mut self.use_sudo, &other.use_sudo);
        over(&mut self.pty, &other.pty);
        over(&mut self.forward_agent, &other.forward_agent);
        over(&mut self.port, &other.port);

        for (role, hosts) in &other.roles {
            let merged = self.roles.entry(role.clone()).or_default();
            for host in hosts {
                if !merged.contains(host) {
                    merged.push(host.clone());
                }
            }
        }
        self.runtime_environment.extend(
            other
                .runtime_environment
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        self.variables
            .extend(other.variables.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    /// Returns `self` with `other` merged over it.
    #[must_use]
    pub fn merged(mut self, other: &Self) -> Self {
        self.merge(other);
        self
    }

    /// Sets one parameter from its string form.
    ///
    /// Map entries use dotted keys: `env.NAME`, `roles.NAME` (comma separated
    /// hosts) and `vars.NAME`. List keys (`hosts`, `ssh_keys`) are comma separated.
    ///
    /// # Errors
    ///
    /// Returns `UnknownParameter` for unknown keys and `InvalidValue` for
    /// values that do not parse.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        if let Some((prefix, name)) = key.split_once('.') {
            match prefix {
                "env" => {
                    self.runtime_environment
                        .insert(name.to_string(), value.to_string());
                }
                "roles" => {
                    self.roles.insert(name.to_string(), split_list(value));
                }
                "vars" => {
                    self.variables.insert(name.to_string(), value.to_string());
                }
                _ => {
                    return Err(ConfigError::UnknownParameter {
                        key: key.to_string(),
                    })
                }
            }
            return Ok(());
        }

        let text = || Some(value.to_string());
        match key {
            "application" => self.application = text(),
            "user" => self.user = text(),
            "branch" => self.branch = text(),
            "repository" => self.repository = text(),
            "version" | "app_version" => self.version = text(),
            "host" => self.host = text(),
            "hosts" => self.hosts = Some(split_list(value)),
            "deploy_root" | "deploy_to" => self.deploy_root = text(),
            "container_home" => self.container_home = text(),
            "container_ctl" => self.container_ctl = text(),
            "artifact_name_template" => self.artifact_name_template = text(),
            "ssh_keys" => self.ssh_keys = Some(split_list(value)),
            "keep_releases" => self.keep_releases = Some(parse_value(key, value)?),
            "command_timeout_secs" => self.command_timeout_secs = Some(parse_value(key, value)?),
            "connect_attempts" => self.connect_attempts = Some(parse_value(key, value)?),
            "use_sudo" => self.use_sudo = Some(parse_value(key, value)?),
            "pty" => self.pty = Some(parse_value(key, value)?),
            "forward_agent" => self.forward_agent = Some(parse_value(key, value)?),
            "port" => self.port = Some(parse_value(key, value)?),
            _ => {
                return Err(ConfigError::UnknownParameter {
                    key: key.to_string(),
                })
            }
        }
        Ok(())
    }

    /// Builds an override layer from `key=value` strings.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed pairs, unknown keys or bad values.
    pub fn from_overrides<I, S>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut params = Self::default();
        for pair in pairs {
            let pair = pair.as_ref();
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                ConfigError::invalid_value(pair, pair, "expected key=value")
            })?;
            params.set(key.trim(), value.trim())?;
        }
        Ok(params)
    }

    /// All hosts named by `host`, `hosts` and role members, deduplicated.
    #[must_use]
    pub fn declared_hosts(&self) -> BTreeSet<String> {
        self.host
            .iter()
            .chain(self.hosts.iter().flatten())
            .chain(self.roles.values().flatten())
            .filter(|h| !h.trim().is_empty())
            .cloned()
            .collect()
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e: T::Err| ConfigError::invalid_value(key, value, e.to_string()))
}
