//! Shared primitive types used across the generator and the trainer.

/// A stable synthetic user identifier, e.g. `U0042`.
pub type UserId = String;

/// The canonical run identifier.
pub type RunId = String;

/// Minute-resolution wall-clock time of a synthetic transaction.
pub type Timestamp = chrono::NaiveDateTime;

/// ISO-8601 layout used for timestamps in the dataset file.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Format a user index as its stable identifier.
pub fn user_id(index: usize) -> UserId {
    format!("U{index:04}")
}
