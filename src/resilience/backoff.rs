//! Capped exponential backoff.

use std::time::Duration;

/// Default base delay for webhook retries.
pub const WEBHOOK_BACKOFF_BASE: Duration = Duration::from_secs(60);
/// Default ceiling for webhook retries.
pub const WEBHOOK_BACKOFF_CAP: Duration = Duration::from_secs(16 * 60);

/// Delay after the `attempt`-th failure: `min(base * 2^(attempt-1), max)`.
///
/// Attempt 0 yields no delay.
pub fn calculate_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let base_ms = base.as_millis().min(u64::MAX as u128) as u64;
    let exponential_base = 2u64.saturating_pow(attempt - 1);
    let delay_ms = base_ms.saturating_mul(exponential_base);

    Duration::from_millis(delay_ms).min(max)
}

/// Webhook retry delay with the default schedule: 1, 2, 4, 8, 16, 16, ... minutes.
pub fn webhook_backoff(attempt: u32) -> Duration {
    calculate_backoff(attempt, WEBHOOK_BACKOFF_BASE, WEBHOOK_BACKOFF_CAP)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_webhook_schedule_in_minutes() {
        let minutes: Vec<u64> = (1..=6).map(|n| webhook_backoff(n).as_secs() / 60).collect();
        assert_eq!(minutes, vec![1, 2, 4, 8, 16, 16]);
    }

    #[test]
    fn test_zero_attempt() {
        assert_eq!(webhook_backoff(0), Duration::ZERO);
    }

    #[test]
    fn test_large_attempts_saturate_at_cap() {
        assert_eq!(webhook_backoff(64), WEBHOOK_BACKOFF_CAP);
        assert_eq!(webhook_backoff(u32::MAX), WEBHOOK_BACKOFF_CAP);
    }

    #[test]
    fn test_custom_base() {
        let d = calculate_backoff(3, Duration::from_millis(100), Duration::from_secs(2));
        assert_eq!(d, Duration::from_millis(400));
    }
}
