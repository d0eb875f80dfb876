//! Release coordination across the hosts of one run.

use super::{Release, ReleaseHistory, ReleaseLayout};
use crate::config::StageContext;
use crate::core::ReleaseStatus;
use crate::errors::ReleaseError;
use crate::inventory::Host;
use crate::utils::Timestamp;
use dashmap::DashMap;
use tracing::{debug, info, warn};

/// A planned ledger change and the remote command that realises it.
///
/// Nothing is recorded until [`ReleaseCoordinator::commit`] is called with
/// the step, after the command succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseStep {
    /// The history after the command succeeds.
    pub history: ReleaseHistory,
    /// The remote command, if any work is needed.
    pub command: Option<String>,
}

/// Owns release paths and per-host release ledgers for one run.
#[derive(Debug)]
pub struct ReleaseCoordinator {
    layout: ReleaseLayout,
    keep_releases: usize,
    histories: DashMap<Host, ReleaseHistory>,
}

impl ReleaseCoordinator {
    /// Creates a coordinator for a stage.
    #[must_use]
    pub fn new(context: &StageContext) -> Self {
        Self::with_layout(ReleaseLayout::new(&context.deploy_root), context.keep_releases)
    }

    /// Creates a coordinator from an explicit layout.
    #[must_use]
    pub fn with_layout(layout: ReleaseLayout, keep_releases: usize) -> Self {
        Self {
            layout,
            keep_releases,
            histories: DashMap::new(),
        }
    }

    /// The directory layout.
    #[must_use]
    pub fn layout(&self) -> &ReleaseLayout {
        &self.layout
    }

    /// Starts a new pending release stamped with `now`.
    #[must_use]
    pub fn begin_release(&self, now: Timestamp) -> Release {
        let release = Release::pending(&self.layout.releases_path(), now);
        info!(release = %release.id, path = %release.path, "Beginning release");
        release
    }

    /// Whether a host's history is already known.
    #[must_use]
    pub fn is_discovered(&self, host: &Host) -> bool {
        self.histories.contains_key(host)
    }

    /// Records the output of the discovery command for a host.
    pub fn record_discovery(&self, host: &Host, output: &str) {
        let history = ReleaseHistory::from_discovery(output, &self.layout.releases_path());
        debug!(
            host = %host,
            releases = history.releases().len(),
            active = history.active().map(|r| r.id.as_str()),
            "Discovered release history"
        );
        self.histories.insert(host.clone(), history);
    }

    /// A copy of a host's history; empty if never discovered.
    #[must_use]
    pub fn history(&self, host: &Host) -> ReleaseHistory {
        self.histories
            .get(host)
            .map(|h| h.value().clone())
            .unwrap_or_default()
    }

    /// Plans switching `current` to `release`.
    ///
    /// # Errors
    ///
    /// Never in practice; the release is added before activation.
    pub fn plan_activate(&self, host: &Host, release: &Release) -> Result<ReleaseStep, ReleaseError> {
        let mut history = self.history(host);
        history.insert(release.clone());
        history.activate(&release.id)?;
        Ok(ReleaseStep {
            history,
            command: Some(self.layout.activate_command(&release.path)),
        })
    }

    /// Plans pointing `current` back at the previous release and purging the
    /// one rolled back from.
    ///
    /// # Errors
    ///
    /// Returns `NoRetainedRelease` when the host has nothing to return to.
    pub fn plan_rollback(&self, host: &Host) -> Result<ReleaseStep, ReleaseError> {
        let mut history = self.history(host);
        let (target, previous) = history.rollback(host.as_str())?;
        let mut command = self.layout.activate_command(&target.path);
        if let Some(purge) = previous
            .as_ref()
            .and_then(|p| self.layout.purge_command([p.path.as_str()]))
        {
            command = format!("{command} && {purge}");
        }
        info!(host = %host, target = %target.id, "Rolling back");
        Ok(ReleaseStep {
            history,
            command: Some(command),
        })
    }

    /// Plans purging retained releases beyond the retention count.
    #[must_use]
    pub fn plan_prune(&self, host: &Host) -> ReleaseStep {
        let mut history = self.history(host);
        let purged = history.prune(self.keep_releases);
        let command = self
            .layout
            .purge_command(purged.iter().map(|r| r.path.as_str()));
        ReleaseStep { history, command }
    }

    /// Records a step whose command succeeded.
    pub fn commit(&self, host: &Host, step: ReleaseStep) {
        self.histories.insert(host.clone(), step.history);
    }

    /// Records `release` as failed on a host; its directory is kept.
    pub fn mark_failed(&self, host: &Host, release: &Release) {
        self.histories
            .entry(host.clone())
            .or_default()
            .mark_failed(release);
    }

    /// Plans failing `release` on a host after an unsuccessful run.
    ///
    /// A host that already switched to the release is pointed back at the
    /// release active before it. The release is then marked failed on disk.
    /// A host with nothing to return to keeps the release active.
    #[must_use]
    pub fn plan_fail(&self, host: &Host, release: &Release) -> ReleaseStep {
        let mut history = self.history(host);
        let mut commands = Vec::new();

        if history.active().is_some_and(|r| r.id == release.id) {
            let previous = history
                .retained()
                .filter(|r| r.id < release.id)
                .last()
                .cloned();
            match previous {
                Some(previous) if history.activate(&previous.id).is_ok() => {
                    info!(host = %host, release = %previous.id, "Restoring previous release");
                    commands.push(self.layout.activate_command(&previous.path));
                }
                _ => {
                    warn!(host = %host, release = %release.id, "No previous release to restore");
                    return ReleaseStep {
                        history,
                        command: None,
                    };
                }
            }
        }

        history.mark_failed(release);
        commands.push(self.layout.fail_marker_command(&release.path));
        ReleaseStep {
            history,
            command: Some(commands.join(" && ")),
        }
    }

    /// The status of a release on a host, if known.
    #[must_use]
    pub fn status_on(&self, host: &Host, id: &str) -> Option<ReleaseStatus> {
        self.histories
            .get(host)
            .and_then(|h| h.get(id).map(|r| r.status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn coordinator() -> ReleaseCoordinator {
        ReleaseCoordinator::with_layout(ReleaseLayout::new("/srv/app"), 1)
    }

    #[test]
    fn test_begin_release() {
        let release = coordinator().begin_release(Utc.with_ymd_and_hms(2012, 3, 14, 9, 26, 53).unwrap());
        assert_eq!(release.id, "20120314092653");
        assert_eq!(release.path, "/srv/app/releases/20120314092653");
        assert_eq!(release.status, ReleaseStatus::Pending);
    }

    #[test]
    fn test_activate_then_prune() {
        let coordinator = coordinator();
        let host = Host::new("h1");
        coordinator.record_discovery(
            &host,
            "20120101000000\n20120201000000\ncurrent:/srv/app/releases/20120201000000\n",
        );
        let release = coordinator.begin_release(Utc.with_ymd_and_hms(2012, 3, 1, 0, 0, 0).unwrap());

        let step = coordinator.plan_activate(&host, &release).unwrap();
        assert_eq!(coordinator.status_on(&host, &release.id), None);
        coordinator.commit(&host, step);
        assert_eq!(coordinator.status_on(&host, &release.id), Some(ReleaseStatus::Active));

        let step = coordinator.plan_prune(&host);
        assert_eq!(
            step.command.as_deref(),
            Some("rm -rf /srv/app/releases/20120101000000")
        );
        coordinator.commit(&host, step);
        assert_eq!(coordinator.history(&host).retained().count(), 1);
    }

    #[test]
    fn test_rollback_plan() {
        let coordinator = coordinator();
        let host = Host::new("h1");
        coordinator.record_discovery(
            &host,
            "20120101000000\n20120201000000\ncurrent:/srv/app/releases/20120201000000\n",
        );
        let step = coordinator.plan_rollback(&host).unwrap();
        assert_eq!(
            step.command.as_deref(),
            Some("ln -sfn /srv/app/releases/20120101000000 /srv/app/current.tmp && mv -Tf /srv/app/current.tmp /srv/app/current && rm -rf /srv/app/releases/20120201000000")
        );
    }

    #[test]
    fn test_rollback_undiscovered_host() {
        assert!(matches!(
            coordinator().plan_rollback(&Host::new("h1")),
            Err(ReleaseError::NoRetainedRelease { .. })
        ));
    }

    #[test]
    fn test_mark_failed() {
        let coordinator = coordinator();
        let host = Host::new("h1");
        let release = coordinator.begin_release(Utc.with_ymd_and_hms(2012, 3, 1, 0, 0, 0).unwrap());
        coordinator.mark_failed(&host, &release);
        assert_eq!(coordinator.status_on(&host, &release.id), Some(ReleaseStatus::Failed));
    }

    #[test]
    fn test_fail_before_activation_leaves_marker() {
        let coordinator = coordinator();
        let host = Host::new("h1");
        coordinator.record_discovery(&host, "20120101000000\ncurrent:/srv/app/releases/20120101000000\n");
        let release = coordinator.begin_release(Utc.with_ymd_and_hms(2012, 3, 1, 0, 0, 0).unwrap());

        let step = coordinator.plan_fail(&host, &release);
        assert_eq!(
            step.command.as_deref(),
            Some("if [ -d /srv/app/releases/20120301000000 ]; then touch /srv/app/releases/20120301000000.failed; fi")
        );
        coordinator.commit(&host, step);
        assert_eq!(coordinator.status_on(&host, &release.id), Some(ReleaseStatus::Failed));
        assert_eq!(coordinator.history(&host).active().unwrap().id, "20120101000000");
    }

    #[test]
    fn test_fail_after_switch_restores_previous() {
        let coordinator = coordinator();
        let host = Host::new("h1");
        coordinator.record_discovery(&host, "20120101000000\ncurrent:/srv/app/releases/20120101000000\n");
        let release = coordinator.begin_release(Utc.with_ymd_and_hms(2012, 3, 1, 0, 0, 0).unwrap());
        let step = coordinator.plan_activate(&host, &release).unwrap();
        coordinator.commit(&host, step);

        let step = coordinator.plan_fail(&host, &release);
        assert_eq!(
            step.command.as_deref(),
            Some("ln -sfn /srv/app/releases/20120101000000 /srv/app/current.tmp && mv -Tf /srv/app/current.tmp /srv/app/current && if [ -d /srv/app/releases/20120301000000 ]; then touch /srv/app/releases/20120301000000.failed; fi")
        );
        coordinator.commit(&host, step);
        assert_eq!(coordinator.status_on(&host, &release.id), Some(ReleaseStatus::Failed));
        assert_eq!(coordinator.history(&host).active().unwrap().id, "20120101000000");
    }

    #[test]
    fn test_fail_after_first_switch_keeps_release() {
        let coordinator = coordinator();
        let host = Host::new("h1");
        coordinator.record_discovery(&host, "current:\n");
        let release = coordinator.begin_release(Utc.with_ymd_and_hms(2012, 3, 1, 0, 0, 0).unwrap());
        let step = coordinator.plan_activate(&host, &release).unwrap();
        coordinator.commit(&host, step);

        let step = coordinator.plan_fail(&host, &release);
        assert_eq!(step.command, None);
        coordinator.commit(&host, step);
        assert_eq!(coordinator.status_on(&host, &release.id), Some(ReleaseStatus::Active));
    }
}
