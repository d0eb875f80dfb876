//! Release bookkeeping.
//!
//! Releases live in `<deploy_root>/releases/<id>` and `<deploy_root>/current`
//! points at the active one.

mod coordinator;
mod history;
mod layout;

pub use coordinator::{ReleaseCoordinator, ReleaseStep};
pub use history::{Release, ReleaseHistory};
pub use layout::{ReleaseLayout, FAILED_MARKER};
