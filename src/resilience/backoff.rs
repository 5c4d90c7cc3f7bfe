//! Exponential backoff with jitter.
//!
//! Equal jitter: half of the exponential step is fixed, the other half is
//! random, so delays never exceed the cap and never collapse to zero.

use std::time::Duration;

use rand::Rng;

/// Delay before re-attempt `retry` (1-based). Retry 0 waits nothing.
pub fn calculate_backoff(retry: u32, base_ms: u64, max_ms: u64) -> Duration {
    if retry == 0 {
        return Duration::ZERO;
    }

    let step = 2u64
        .checked_pow(retry - 1)
        .and_then(|factor| base_ms.checked_mul(factor))
        .unwrap_or(u64::MAX)
        .min(max_ms);

    let fixed = step / 2;
    let spread = step - fixed;
    let jitter = if spread > 0 {
        rand::thread_rng().gen_range(0..=spread)
    } else {
        0
    };
    Duration::from_millis(fixed + jitter)
}
