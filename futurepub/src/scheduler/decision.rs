// Delay resolution: publish now or hold in the pending queue for another cycle

use chrono::{DateTime, Utc};

/// Largest per-message expiration the broker accepts: a signed 32-bit
/// millisecond count, just under 24.9 days.
pub const MAX_TTL_MS: u32 = i32::MAX as u32;

/// Envelopes due within this window are published rather than requeued
pub const DEFAULT_THRESHOLD_MS: u64 = 5_000;

/// Outcome of measuring an envelope's remaining time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Release the payload to its destination
    Publish,
    /// Hold the envelope in the pending queue for `ttl_ms`
    Requeue { ttl_ms: u32 },
}

/// Whole milliseconds from `now` until `wake_time`; negative once it has passed
pub fn remaining_millis(wake_time: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (wake_time - now).num_milliseconds()
}

/// Clamp a remaining time into a valid per-message TTL
pub fn clamp_ttl(remaining_ms: i64, max_ttl_ms: u32) -> u32 {
    remaining_ms.clamp(0, i64::from(max_ttl_ms)) as u32
}

/// Publish when the unclamped remaining time is strictly under the threshold,
/// otherwise requeue with the clamped TTL. Wake times further out than
/// `max_ttl_ms` take several cycles, each one re-measuring from the new `now`.
pub fn decide(
    wake_time: DateTime<Utc>,
    now: DateTime<Utc>,
    threshold_ms: u64,
    max_ttl_ms: u32,
) -> Decision {
    let remaining = remaining_millis(wake_time, now);

    // i128 keeps thresholds above i64::MAX from wrapping
    if i128::from(remaining) < i128::from(threshold_ms) {
        Decision::Publish
    } else {
        Decision::Requeue {
            ttl_ms: clamp_ttl(remaining, max_ttl_ms),
        }
    }
}
