//! Remote directory layout and the commands that manipulate it.

use crate::utils::quote;

/// Suffix of the marker file left beside a failed release directory.
pub const FAILED_MARKER: &str = ".failed";

/// Paths under a deploy root: `releases/<id>`, `shared/` and `current`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseLayout {
    deploy_root: String,
}

impl ReleaseLayout {
    /// Creates a layout rooted at `deploy_root`.
    #[must_use]
    pub fn new(deploy_root: impl Into<String>) -> Self {
        let deploy_root: String = deploy_root.into();
        Self {
            deploy_root: deploy_root.trim_end_matches('/').to_string(),
        }
    }

    /// The deploy root.
    #[must_use]
    pub fn deploy_root(&self) -> &str {
        &self.deploy_root
    }

    /// `<deploy_root>/releases`.
    #[must_use]
    pub fn releases_path(&self) -> String {
        format!("{}/releases", self.deploy_root)
    }

    /// `<deploy_root>/current`.
    #[must_use]
    pub fn current_path(&self) -> String {
        format!("{}/current", self.deploy_root)
    }

    /// Lists release directories and reads the `current` target.
    ///
    /// Output is one release directory per line followed by
    /// `current:<target>`; see [`ReleaseHistory::from_discovery`](super::ReleaseHistory::from_discovery).
    #[must_use]
    pub fn discover_command(&self) -> String {
        format!(
            "ls -1 {} 2>/dev/null; printf 'current:%s\\n' \"$(readlink {} 2>/dev/null)\"",
            quote(&self.releases_path()),
            quote(&self.current_path())
        )
    }

    /// Atomically points `current` at `release_path`.
    ///
    /// The new link is created beside `current` and renamed over it, so a
    /// concurrent reader sees either the old or the new target.
    #[must_use]
    pub fn activate_command(&self, release_path: &str) -> String {
        let current = self.current_path();
        let staging = format!("{current}.tmp");
        format!(
            "ln -sfn {} {} && mv -Tf {} {}",
            quote(release_path),
            quote(&staging),
            quote(&staging),
            quote(&current)
        )
    }

    /// Leaves a `<release>.failed` marker beside an existing release
    /// directory; a no-op when the directory was never created.
    #[must_use]
    pub fn fail_marker_command(&self, release_path: &str) -> String {
        format!(
            "if [ -d {} ]; then touch {}; fi",
            quote(release_path),
            quote(&format!("{release_path}{FAILED_MARKER}"))
        )
    }

    /// Removes release directories.
    #[must_use]
    pub fn purge_command<'a, I>(&self, release_paths: I) -> Option<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let paths: Vec<String> = release_paths.into_iter().map(quote).collect();
        if paths.is_empty() {
            None
        } else {
            Some(format!("rm -rf {}", paths.join(" ")))
        }
    }
}
