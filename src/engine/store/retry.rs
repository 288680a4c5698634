// ── Ledger Store: Write Retry ────────────────────────────────────────────────
//
// Bounded exponential backoff for SQLITE_BUSY / SQLITE_LOCKED on the write
// path. Delays double from `initial_backoff_ms` up to `max_backoff_ms` with
// ±25% jitter so competing writer processes do not retry in lock-step.

use crate::atoms::ledger_types::StoreConfig;
use std::time::{Duration, SystemTime};

/// Backoff delay for a 0-based retry attempt (before jitter).
pub(crate) fn backoff_ms(attempt: u32, config: &StoreConfig) -> u64 {
    let base = config
        .initial_backoff_ms
        .saturating_mul(2u64.saturating_pow(attempt.min(16)));
    base.min(config.max_backoff_ms)
}

/// Sleep for the jittered backoff of `attempt`. Returns the slept duration.
pub(crate) fn backoff_sleep(attempt: u32, config: &StoreConfig) -> Duration {
    let delay = Duration::from_millis(apply_jitter(backoff_ms(attempt, config)));
    std::thread::sleep(delay);
    delay
}

/// Apply ±25% jitter.
fn apply_jitter(base_ms: u64) -> u64 {
    let jitter_range = (base_ms / 4) as i64;
    if jitter_range == 0 {
        return base_ms;
    }
    let offset = (rand_jitter() % (2 * jitter_range + 1)) - jitter_range;
    (base_ms as i64 + offset).max(1) as u64
}

/// Jitter source using system clock nanos.
fn rand_jitter() -> i64 {
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as i64
}
