//! Pure time and retry/lease math. No I/O, no database access.

use chrono::{DateTime, Duration, Utc};

/// Current UTC instant.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// `max(value or default, 1)`.
pub fn normalize_max_attempts(value: Option<i32>, default: i32) -> i32 {
    value.unwrap_or(default).max(1)
}

/// `now + max(lease_seconds, 1)s`.
pub fn lease_expires_at(now: DateTime<Utc>, lease_seconds: i64) -> DateTime<Utc> {
    now + Duration::seconds(lease_seconds.max(1))
}

/// Exponential backoff capped at `retry_max_seconds`:
/// `min(max(max, base), base * 2^max(0, attempt_count-1))`.
pub fn compute_retry_delay_seconds(attempt_count: i32, base: i64, max: i64) -> i64 {
    let max = max.max(base);
    let exponent = (attempt_count - 1).max(0);
    let scaled = base.saturating_mul(1_i64 << exponent.min(32));
    scaled.min(max)
}

/// `now + compute_retry_delay_seconds(...)`.
pub fn compute_next_retry_at(
    now: DateTime<Utc>,
    attempt_count: i32,
    base: i64,
    max: i64,
) -> DateTime<Utc> {
    now + Duration::seconds(compute_retry_delay_seconds(attempt_count, base, max))
}

/// `attempt_count >= max(max_attempts, 1)`.
pub fn should_dead_letter(attempt_count: i32, max_attempts: i32) -> bool {
    attempt_count >= max_attempts.max(1)
}

/// Staleness check for a `running` task.
///
/// If `lease_expires_at` is set, staleness is `lease_expires_at <= now`.
/// Otherwise, if `started_at` is set, staleness is
/// `started_at <= now - max(stale_timeout, 1)s`. Absent both, never stale.
pub fn is_stale_running_task(
    now: DateTime<Utc>,
    lease_expires_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    stale_timeout_seconds: i64,
) -> bool {
    if let Some(expires) = lease_expires_at {
        return expires <= now;
    }
    if let Some(started) = started_at {
        return started <= now - Duration::seconds(stale_timeout_seconds.max(1));
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_max_attempts_floors_at_one() {
        assert_eq!(normalize_max_attempts(None, 3), 3);
        assert_eq!(normalize_max_attempts(Some(0), 3), 1);
        assert_eq!(normalize_max_attempts(Some(-5), 3), 1);
        assert_eq!(normalize_max_attempts(Some(7), 3), 7);
    }

    #[test]
    fn lease_expires_at_floors_at_one_second() {
        let t = Utc::now();
        assert_eq!(lease_expires_at(t, 0), t + Duration::seconds(1));
        assert_eq!(lease_expires_at(t, 30), t + Duration::seconds(30));
    }

    #[test]
    fn retry_delay_is_exponential_and_capped() {
        assert_eq!(compute_retry_delay_seconds(1, 2, 60), 2);
        assert_eq!(compute_retry_delay_seconds(2, 2, 60), 4);
        assert_eq!(compute_retry_delay_seconds(3, 2, 60), 8);
        assert_eq!(compute_retry_delay_seconds(10, 2, 60), 60);
    }

    #[test]
    fn retry_delay_max_floors_at_base() {
        assert_eq!(compute_retry_delay_seconds(1, 10, 5), 10);
    }

    #[test]
    fn retry_delay_is_monotonically_nondecreasing() {
        let mut prev = compute_retry_delay_seconds(1, 3, 120);
        for attempt in 2..20 {
            let next = compute_retry_delay_seconds(attempt, 3, 120);
            assert!(next >= prev);
            prev = next;
        }
    }

    #[test]
    fn should_dead_letter_respects_floor() {
        assert!(!should_dead_letter(0, 0));
        assert!(should_dead_letter(1, 0));
        assert!(should_dead_letter(3, 3));
        assert!(!should_dead_letter(2, 3));
    }

    #[test]
    fn stale_via_lease_expiry() {
        let now = Utc::now();
        assert!(is_stale_running_task(now, Some(now - Duration::seconds(1)), None, 30));
        assert!(!is_stale_running_task(now, Some(now + Duration::seconds(1)), None, 30));
    }

    #[test]
    fn stale_via_started_at_fallback() {
        let now = Utc::now();
        assert!(is_stale_running_task(now, None, Some(now - Duration::seconds(60)), 30));
        assert!(!is_stale_running_task(now, None, Some(now - Duration::seconds(5)), 30));
    }

    #[test]
    fn stale_false_when_neither_set() {
        assert!(!is_stale_running_task(Utc::now(), None, None, 30));
    }
}
