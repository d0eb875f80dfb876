//! Hosts and the role registry.

mod host;
mod roles;

pub use host::Host;
pub use roles::RoleRegistry;
