//! Run identifier generation.

use uuid::Uuid;

/// Generates a new run id (UUID v7, time-ordered).
#[must_use]
pub fn generate_run_id() -> Uuid {
    Uuid::now_v7()
}
