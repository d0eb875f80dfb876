//! Remote sessions.
//!
//! A [`Transport`] knows how to reach hosts; the [`SessionManager`] makes
//! sure each host is connected at most once per run and that every
//! connection is closed when the run ends.

mod manager;
mod ssh;
mod transport;

pub use manager::{Session, SessionManager, SessionOptions};
pub use ssh::SshTransport;
pub use transport::{CommandOutput, Connection, Credentials, Transport};
