//! The resolved, immutable parameter context of one run.

use super::StageId;
use crate::inventory::{Host, RoleRegistry};
use crate::template::{Template, TemplateVars};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// Fully resolved parameters for one stage.
///
/// Produced by [`StageResolver::resolve`](super::StageResolver::resolve) and
/// never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageContext {
    /// The stage being deployed.
    pub stage: StageId,
    /// Application name.
    pub application: String,
    /// Remote login user; the ssh client default when absent.
    pub user: Option<String>,
    /// Branch to deploy.
    pub branch: String,
    /// Source repository URL.
    pub repository: Option<String>,
    /// Application version.
    pub version: String,
    /// Every target host.
    pub hosts: BTreeSet<Host>,
    /// Role membership.
    #[serde(skip)]
    pub roles: RoleRegistry,
    /// Environment exported before every remote command.
    pub runtime_environment: BTreeMap<String, String>,
    /// Root directory holding `releases/`, `shared/` and `current`.
    pub deploy_root: String,
    /// Servlet container home.
    pub container_home: Option<String>,
    /// Servlet container control script.
    pub container_ctl: Option<String>,
    /// Artifact file name template.
    pub artifact_name_template: Template,
    /// SSH private keys.
    pub ssh_keys: Vec<String>,
    /// Number of previous releases kept for rollback.
    pub keep_releases: usize,
    /// Per-command time ceiling.
    pub command_timeout: Duration,
    /// Connection attempts per host.
    pub connect_attempts: u32,
    /// Prefix privileged commands with `sudo`.
    pub use_sudo: bool,
    /// Allocate a pseudo terminal.
    pub pty: bool,
    /// Forward the local SSH agent.
    pub forward_agent: bool,
    /// Default SSH port.
    pub port: u16,
    /// Free-form template variables.
    pub variables: BTreeMap<String, String>,
}

impl StageContext {
    /// `<deploy_root>/releases`.
    #[must_use]
    pub fn releases_path(&self) -> String {
        format!("{}/releases", self.deploy_root)
    }

    /// `<deploy_root>/shared`.
    #[must_use]
    pub fn shared_path(&self) -> String {
        format!("{}/shared", self.deploy_root)
    }

    /// `<deploy_root>/current`.
    #[must_use]
    pub fn current_path(&self) -> String {
        format!("{}/current", self.deploy_root)
    }

    /// Template variables shared by every host and task of the run.
    ///
    /// Release-specific variables (`release_path`, `release_name`) and `host`
    /// are added by the executor at dispatch. Custom variables never shadow
    /// the built-in ones.
    #[must_use]
    pub fn template_vars(&self) -> BTreeMap<String, String> {
        let mut vars = self.variables.clone();
        let mut set = |key: &str, value: String| {
            vars.insert(key.to_string(), value);
        };

        set(TemplateVars::APPLICATION, self.application.clone());
        set(TemplateVars::VERSION, self.version.clone());
        set(TemplateVars::STAGE, self.stage.to_string());
        set(TemplateVars::BRANCH, self.branch.clone());
        set(TemplateVars::DEPLOY_TO, self.deploy_root.clone());
        set(TemplateVars::RELEASES_PATH, self.releases_path());
        set(TemplateVars::SHARED_PATH, self.shared_path());
        set(TemplateVars::CURRENT_PATH, self.current_path());
        set(
            TemplateVars::SUDO,
            if self.use_sudo { "sudo " } else { "" }.to_string(),
        );
        if let Some(user) = &self.user {
            set(TemplateVars::USER, user.clone());
        }
        if let Some(repository) = &self.repository {
            set(TemplateVars::REPOSITORY, repository.clone());
        }
        if let Some(home) = &self.container_home {
            set(TemplateVars::CONTAINER_HOME, home.clone());
        }
        if let Some(ctl) = &self.container_ctl {
            set(TemplateVars::CONTAINER_CTL, ctl.clone());
        }

        // Validated by the resolver; an unresolvable template leaves the
        // variable unset so dispatch-time validation reports it.
        if let Ok(artifact) = self.artifact_name_template.render(&vars) {
            vars.insert(TemplateVars::ARTIFACT_NAME.to_string(), artifact);
        }
        vars
    }

    /// Hosts of the given roles, or every host when `roles` is empty.
    ///
    /// # Errors
    ///
    /// Returns `UnknownRole` when a role has no members.
    pub fn hosts_for_roles(
        &self,
        roles: &[String],
    ) -> Result<BTreeSet<Host>, crate::errors::ConfigError> {
        if roles.is_empty() {
            Ok(self.hosts.clone())
        } else {
            self.roles.resolve_hosts(roles)
        }
    }
}
