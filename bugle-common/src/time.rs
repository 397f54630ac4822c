//! Time helpers for snapshot timestamps
//!
//! Snapshots and exported views carry wall-clock timestamps in epoch
//! milliseconds so they serialize portably; internal pacing uses
//! `std::time::Instant` and never round-trips through these helpers.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in milliseconds since the Unix epoch.
///
/// A clock set before 1970 yields 0 rather than an error; timestamps are
/// diagnostic data, not control inputs.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Convert a sample count at a given rate to seconds.
pub fn samples_to_seconds(samples: u64, sample_rate_hz: u32) -> f64 {
    if sample_rate_hz == 0 {
        return 0.0;
    }
    samples as f64 / sample_rate_hz as f64
}
