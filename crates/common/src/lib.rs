//! Shared types and utilities used across all courier crates.

pub mod activity;
pub mod key;
pub mod types;

pub use {
    activity::{ActivityEvent, ActivityLog, NullActivityLog, TracingActivityLog},
    key::SessionKey,
    types::Turn,
};

/// Current unix timestamp in seconds.
#[must_use]
pub fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
