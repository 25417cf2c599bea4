use std::time::Duration;

use rand::Rng;

/// Delay between typed characters for the given nominal rate, with ±20%
/// jitter so the cadence does not look machine-perfect.
pub(crate) fn typing_delay(chars_per_second: u32) -> Duration {
    let cps = chars_per_second.max(1);
    let base_ms = 1_000.0 / f64::from(cps);
    let jitter = rand::rng().random_range(0.8..1.2);
    Duration::from_secs_f64(base_ms * jitter / 1_000.0)
}

/// Exponential back-off schedule with jitter: 200ms → 400ms → 800ms → ...
pub(crate) fn backoff(attempt: u64) -> Duration {
    let base_delay_ms = 200u64 * (1u64 << (attempt.saturating_sub(1)));
    let jitter = rand::rng().random_range(0.8..1.2);
    let delay_ms = (base_delay_ms as f64 * jitter) as u64;
    Duration::from_millis(delay_ms)
}
