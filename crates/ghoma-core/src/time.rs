//! Timing utilities
//!
//! Device timestamps are wall-clock microseconds since the Unix epoch so they
//! can be serialized and compared across tasks without an `Instant` origin.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Timestamp type (microseconds)
pub type Timestamp = u64;

/// Get current Unix timestamp in microseconds
pub fn now() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as Timestamp
}

/// Convert microseconds to Duration
pub fn to_duration(micros: Timestamp) -> Duration {
    Duration::from_micros(micros)
}

/// Convert Duration to microseconds
pub fn from_duration(duration: Duration) -> Timestamp {
    duration.as_micros() as Timestamp
}

/// Time between `earlier` and `later`, zero if the clock went backwards
pub fn elapsed(earlier: Timestamp, later: Timestamp) -> Duration {
    to_duration(later.saturating_sub(earlier))
}
