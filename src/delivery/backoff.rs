use std::time::Duration;

/// Exponential backoff between in-process delivery attempts.
///
/// `delay_for(i) = min(base * 2^(i-1), ceiling)` for attempt index `i >= 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base: Duration,
    ceiling: Duration,
}

impl BackoffPolicy {
    pub fn new(base: Duration, ceiling: Duration) -> Self {
        Self {
            base,
            ceiling: ceiling.max(base),
        }
    }

    pub fn ceiling(&self) -> Duration {
        self.ceiling
    }

    /// Sleep before attempt `attempt`; zero for the first attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        1u32.checked_shl(attempt - 1)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.ceiling, |d| d.min(self.ceiling))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule_doubles() {
        let policy = BackoffPolicy::default();
        let delays: Vec<u64> = (1..=5).map(|i| policy.delay_for(i).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16]);
        assert_eq!(policy.delay_for(0), Duration::ZERO);
    }

    #[test]
    fn test_ceiling_applies() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for(6), Duration::from_secs(30));
        assert_eq!(policy.delay_for(40), Duration::from_secs(30));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_monotonic_and_bounded() {
        let policy = BackoffPolicy::new(Duration::from_millis(250), Duration::from_secs(10));
        let mut prev = Duration::ZERO;
        for i in 1..64 {
            let d = policy.delay_for(i);
            assert!(d >= prev);
            assert!(d <= policy.ceiling());
            prev = d;
        }
    }
}
