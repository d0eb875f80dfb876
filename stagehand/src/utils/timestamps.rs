//! Release timestamps.
//!
//! Release ids are UTC timestamps `YYYYmmddHHMMSS`, so lexical order is
//! chronological order.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use thiserror::Error;

/// A UTC timestamp.
pub type Timestamp = DateTime<Utc>;

/// `strftime` format of a release id.
pub const RELEASE_ID_FORMAT: &str = "%Y%m%d%H%M%S";

/// Errors that can occur while parsing a release id.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimestampError {
    /// The id is not fourteen digits.
    #[error("Invalid release id: {0}")]
    InvalidFormat(String),
}

/// Returns the current UTC timestamp.
#[must_use]
pub fn now_utc() -> Timestamp {
    Utc::now()
}

/// Formats a release id.
///
/// # Examples
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use stagehand::utils::format_release_id;
///
/// let at = Utc.with_ymd_and_hms(2012, 3, 14, 9, 26, 53).unwrap();
/// assert_eq!(format_release_id(at), "20120314092653");
/// ```
#[must_use]
pub fn format_release_id(at: Timestamp) -> String {
    at.format(RELEASE_ID_FORMAT).to_string()
}

/// Parses a release id back into its timestamp.
///
/// # Errors
///
/// Returns `TimestampError::InvalidFormat` unless `id` is exactly fourteen
/// digits forming a valid date and time.
pub fn parse_release_id(id: &str) -> Result<Timestamp, TimestampError> {
    let id = id.trim();
    if id.len() != 14 || !id.bytes().all(|b| b.is_ascii_digit()) {
        return Err(TimestampError::InvalidFormat(id.to_string()));
    }
    NaiveDateTime::parse_from_str(id, RELEASE_ID_FORMAT)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|_| TimestampError::InvalidFormat(id.to_string()))
}
