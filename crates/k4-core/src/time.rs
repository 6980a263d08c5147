//! Time helpers shared by the resolver and its cluster adapters

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current Unix timestamp in milliseconds.
///
/// Returns 0 on a clock set before the Unix epoch.
pub fn current_time_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Time elapsed since a millisecond timestamp, zero for timestamps in the future
pub fn elapsed_duration(since_millis: u64) -> Duration {
    Duration::from_millis(current_time_millis().saturating_sub(since_millis))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_time_millis_is_positive() {
        assert!(current_time_millis() > 0);
    }

    #[test]
    fn test_elapsed_duration() {
        let ten_seconds_ago = current_time_millis() - 10_000;
        assert!(elapsed_duration(ten_seconds_ago) >= Duration::from_secs(10));
    }

    #[test]
    fn test_elapsed_duration_future_time() {
        let future = current_time_millis() + 1_000_000;
        assert_eq!(elapsed_duration(future), Duration::ZERO);
    }
}
