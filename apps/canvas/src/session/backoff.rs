use std::time::Duration;

pub const BASE_DELAY: Duration = Duration::from_millis(1_000);
pub const BACKOFF_FACTOR: u32 = 2;
pub const MAX_DELAY: Duration = Duration::from_millis(30_000);
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Exponential backoff between reconnect attempts, capped in both delay and count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub factor: u32,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: BASE_DELAY,
            factor: BACKOFF_FACTOR,
            max_delay: MAX_DELAY,
            max_attempts: MAX_RECONNECT_ATTEMPTS,
        }
    }
}

impl ReconnectPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Delay before retry number `attempt` (1-based), or `None` once the cap
    /// is reached.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let multiplier = self.factor.saturating_pow(attempt - 1);
        Some(self.base_delay.saturating_mul(multiplier).min(self.max_delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn default_schedule_doubles_until_cap() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<u128> = (1..=5)
            .map(|attempt| policy.delay_for(attempt).unwrap().as_millis())
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000]);
        assert_eq!(policy.delay_for(6), None);
        assert_eq!(policy.delay_for(0), None);
    }

    #[test_timeout::timeout]
    fn delay_is_clamped_to_max() {
        let policy = ReconnectPolicy::default().with_max_attempts(40);
        assert_eq!(policy.delay_for(6), Some(MAX_DELAY));
        assert_eq!(policy.delay_for(40), Some(MAX_DELAY));
    }
}
