//! Timestamp utilities

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Convert fractional seconds to a duration
///
/// Negatives, NaN and infinity clamp to zero; values too large for a
/// `Duration` saturate to `Duration::MAX`.
pub fn secs_to_duration(secs: f64) -> Duration {
    if secs.is_finite() && secs > 0.0 {
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    } else {
        Duration::ZERO
    }
}

/// Whole seconds left until a deadline, rounded up (what a countdown shows)
pub fn ceil_secs(remaining: Duration) -> u64 {
    let whole = remaining.as_secs();
    if remaining.subsec_nanos() > 0 {
        whole + 1
    } else {
        whole
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_returns_valid_timestamp() {
        let timestamp = now();
        assert!(timestamp.timestamp() > 946_684_800); // 2000-01-01 00:00:00 UTC
    }

    #[test]
    fn test_secs_to_duration_fractional() {
        assert_eq!(secs_to_duration(4.5), Duration::from_millis(4500));
        assert_eq!(secs_to_duration(3.0), Duration::from_secs(3));
    }

    #[test]
    fn test_secs_to_duration_rejects_garbage() {
        assert_eq!(secs_to_duration(-1.0), Duration::ZERO);
        assert_eq!(secs_to_duration(f64::NAN), Duration::ZERO);
        assert_eq!(secs_to_duration(f64::INFINITY), Duration::ZERO);
    }

    #[test]
    fn test_secs_to_duration_saturates_huge_values() {
        assert_eq!(secs_to_duration(1e20), Duration::MAX);
        assert_eq!(secs_to_duration(f64::MAX), Duration::MAX);
    }

    #[test]
    fn test_ceil_secs() {
        assert_eq!(ceil_secs(Duration::ZERO), 0);
        assert_eq!(ceil_secs(Duration::from_millis(1)), 1);
        assert_eq!(ceil_secs(Duration::from_secs(3)), 3);
        assert_eq!(ceil_secs(Duration::from_millis(4500)), 5);
    }
}
