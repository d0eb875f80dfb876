//! Per-host release ledger.

use super::FAILED_MARKER;
use crate::core::ReleaseStatus;
use crate::errors::ReleaseError;
use crate::utils::{format_release_id, parse_release_id, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One versioned deployed copy of the application on a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    /// Timestamp id, `YYYYmmddHHMMSS`.
    pub id: String,
    /// Absolute path of the release directory.
    pub path: String,
    /// Creation time.
    pub created_at: Timestamp,
    /// Lifecycle status.
    pub status: ReleaseStatus,
}

impl Release {
    /// Creates a pending release under `releases_path`.
    #[must_use]
    pub fn pending(releases_path: &str, created_at: Timestamp) -> Self {
        let id = format_release_id(created_at);
        Self {
            path: format!("{releases_path}/{id}"),
            id,
            created_at,
            status: ReleaseStatus::Pending,
        }
    }

    /// Returns the release with another status.
    #[must_use]
    pub fn with_status(mut self, status: ReleaseStatus) -> Self {
        self.status = status;
        self
    }
}

/// The release history of one host, ordered oldest first.
///
/// At most one release is `Active`. Releases that were active before are
/// `Retained` until pruned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseHistory {
    releases: Vec<Release>,
}

impl ReleaseHistory {
    /// Creates an empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a history from the output of the discovery command.
    ///
    /// The release `current` points at becomes `Active`. A release with a
    /// `<id>.failed` marker is `Failed`, and so is any release newer than
    /// `current` (or every release when nothing is active): those were never
    /// activated. The rest are `Retained`. Entries that are not release ids
    /// are ignored.
    #[must_use]
    pub fn from_discovery(output: &str, releases_path: &str) -> Self {
        let mut active = None;
        let mut ids = Vec::new();
        let mut markers = HashSet::new();
        for line in output.lines().map(str::trim) {
            if let Some(target) = line.strip_prefix("current:") {
                active = target
                    .trim_end_matches('/')
                    .rsplit('/')
                    .next()
                    .filter(|id| parse_release_id(id).is_ok())
                    .map(ToString::to_string);
            } else if let Some(id) = line.strip_suffix(FAILED_MARKER) {
                markers.insert(id.to_string());
            } else if let Ok(created_at) = parse_release_id(line) {
                ids.push((line.to_string(), created_at));
            }
        }

        let mut history = Self::new();
        for (id, created_at) in ids {
            let status = match active.as_deref() {
                Some(current) if id == current => ReleaseStatus::Active,
                _ if markers.contains(&id) => ReleaseStatus::Failed,
                Some(current) if id.as_str() < current => ReleaseStatus::Retained,
                _ => ReleaseStatus::Failed,
            };
            history.insert(Release {
                path: format!("{releases_path}/{id}"),
                id,
                created_at,
                status,
            });
        }
        history
    }

    /// Adds or replaces a release, keeping id order.
    pub fn insert(&mut self, release: Release) {
        match self.releases.binary_search_by(|r| r.id.cmp(&release.id)) {
            Ok(index) => self.releases[index] = release,
            Err(index) => self.releases.insert(index, release),
        }
    }

    /// Every release, oldest first.
    #[must_use]
    pub fn releases(&self) -> &[Release] {
        &self.releases
    }

    /// Looks up a release.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Release> {
        self.releases.iter().find(|r| r.id == id)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut Release> {
        self.releases.iter_mut().find(|r| r.id == id)
    }

    /// The active release.
    #[must_use]
    pub fn active(&self) -> Option<&Release> {
        self.releases
            .iter()
            .find(|r| r.status == ReleaseStatus::Active)
    }

    /// Retained releases, oldest first.
    pub fn retained(&self) -> impl Iterator<Item = &Release> {
        self.releases
            .iter()
            .filter(|r| r.status == ReleaseStatus::Retained)
    }

    /// Makes `id` the active release; the previous active one is retained.
    ///
    /// # Errors
    ///
    /// Returns `UnknownRelease` if `id` is not in the history.
    pub fn activate(&mut self, id: &str) -> Result<(), ReleaseError> {
        if self.get(id).is_none() {
            return Err(ReleaseError::UnknownRelease { id: id.to_string() });
        }
        for release in &mut self.releases {
            if release.id == id {
                release.status = ReleaseStatus::Active;
            } else if release.status == ReleaseStatus::Active {
                release.status = ReleaseStatus::Retained;
            }
        }
        Ok(())
    }

    /// Points back at the most recent retained release older than the
    /// active one.
    ///
    /// The release rolled back from is purged. Returns the new active release
    /// and the purged one, if there was an active release.
    ///
    /// # Errors
    ///
    /// Returns `NoRetainedRelease` when there is nothing to return to.
    pub fn rollback(&mut self, host: &str) -> Result<(Release, Option<Release>), ReleaseError> {
        let active = self.active().map(|r| r.id.clone());
        let target = self
            .retained()
            .filter(|r| active.as_ref().map_or(true, |id| r.id < *id))
            .last()
            .map(|r| r.id.clone())
            .ok_or_else(|| ReleaseError::NoRetainedRelease {
                host: host.to_string(),
            })?;

        let mut previous = None;
        for release in &mut self.releases {
            if release.status == ReleaseStatus::Active {
                release.status = ReleaseStatus::Purged;
                previous = Some(release.clone());
            } else if release.id == target {
                release.status = ReleaseStatus::Active;
            }
        }
        let active = self
            .get(&target)
            .cloned()
            .ok_or(ReleaseError::UnknownRelease { id: target })?;
        Ok((active, previous))
    }

    /// Purges the oldest retained releases beyond `retention`.
    ///
    /// The active release and failed releases are never touched. Returns the
    /// purged releases, oldest first.
    pub fn prune(&mut self, retention: usize) -> Vec<Release> {
        let retained: Vec<String> = self.retained().map(|r| r.id.clone()).collect();
        let excess = retained.len().saturating_sub(retention);
        let mut purged = Vec::with_capacity(excess);
        for id in retained.iter().take(excess) {
            if let Some(release) = self.get_mut(id) {
                release.status = ReleaseStatus::Purged;
                purged.push(release.clone());
            }
        }
        purged
    }

    /// Records a release as failed, adding it if needed.
    pub fn mark_failed(&mut self, release: &Release) {
        self.insert(release.clone().with_status(ReleaseStatus::Failed));
    }
}
