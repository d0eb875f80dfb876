//! Role registry: role name to host set.

use super::Host;
use crate::errors::ConfigError;
use std::collections::{BTreeMap, BTreeSet};

/// Maps logical role names to host sets.
///
/// Registration accumulates: registering a role again merges the host sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleRegistry {
    roles: BTreeMap<String, BTreeSet<Host>>,
}

impl RoleRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds hosts to a role.
    pub fn register<I, H>(&mut self, role: impl Into<String>, hosts: I)
    where
        I: IntoIterator<Item = H>,
        H: Into<Host>,
    {
        self.roles
            .entry(role.into())
            .or_default()
            .extend(hosts.into_iter().map(Into::into));
    }

    /// Union of the hosts of every named role.
    ///
    /// # Errors
    ///
    /// Returns `UnknownRole` for the first name with no registered members.
    pub fn resolve_hosts<I, S>(&self, role_names: I) -> Result<BTreeSet<Host>, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut hosts = BTreeSet::new();
        for name in role_names {
            let name = name.as_ref();
            match self.roles.get(name) {
                Some(members) if !members.is_empty() => hosts.extend(members.iter().cloned()),
                _ => {
                    return Err(ConfigError::UnknownRole {
                        role: name.to_string(),
                    })
                }
            }
        }
        Ok(hosts)
    }

    /// Every host in any role.
    #[must_use]
    pub fn all_hosts(&self) -> BTreeSet<Host> {
        self.roles.values().flatten().cloned().collect()
    }

    /// Registered role names.
    pub fn role_names(&self) -> impl Iterator<Item = &str> {
        self.roles.keys().map(String::as_str)
    }

    /// Members of one role.
    #[must_use]
    pub fn members(&self, role: &str) -> Option<&BTreeSet<Host>> {
        self.roles.get(role)
    }

    /// Returns true if no role has members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.roles.values().all(BTreeSet::is_empty)
    }
}
