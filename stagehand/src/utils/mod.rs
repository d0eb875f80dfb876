//! Utility functions for release timestamps, run ids and shell quoting.

pub mod shell;
pub mod timestamps;
mod uuid_utils;

pub use shell::{env_prefix, is_env_name, quote};
pub use timestamps::{format_release_id, now_utc, parse_release_id, Timestamp, RELEASE_ID_FORMAT};
pub use uuid_utils::generate_run_id;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_run_id_is_time_ordered() {
        let id = generate_run_id();
        assert_eq!(id.get_version_num(), 7);
    }

    #[test]
    fn test_release_id_round_trip() {
        let now = now_utc();
        let id = format_release_id(now);
        assert_eq!(id.len(), 14);
        assert_eq!(format_release_id(parse_release_id(&id).unwrap()), id);
    }
}
