//! Exponential backoff with jitter for restarting event sources.

use std::time::Duration;

use rand::Rng;

/// Delay before restart attempt `attempt` (1-based): `base_ms * 2^(attempt-1)`
/// capped at `max_ms`, plus up to 10% jitter.
#[must_use]
pub fn retry_delay(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let factor = 2u64.saturating_pow(attempt - 1);
    let capped = base_ms.saturating_mul(factor).min(max_ms);

    let jitter_range = capped / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped + jitter)
}
