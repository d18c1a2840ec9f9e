// =============================================================================
// Bounded exponential backoff for feed reconnects
// =============================================================================

use std::time::Duration;

use crate::runtime_config::EngineConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl ReconnectPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_attempts: config.reconnect_max_attempts,
            base_delay: Duration::from_millis(config.reconnect_base_delay_ms),
            max_delay: Duration::from_millis(config.reconnect_max_delay_ms),
        }
    }

    /// Delay before reconnect `attempt` (1-based), or `None` once attempts
    /// are exhausted. Doubles from `base_delay`, capped at `max_delay`.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        Some(self.base_delay.saturating_mul(factor).min(self.max_delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(5000),
        }
    }

    #[test]
    fn doubles_then_caps() {
        let p = policy();
        let delays: Vec<u128> = (1..=5).map(|a| p.next_delay(a).unwrap().as_millis()).collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 5000, 5000]);
    }

    #[test]
    fn exhausted_after_max_attempts() {
        let p = policy();
        assert!(p.next_delay(6).is_none());
        assert!(p.next_delay(0).is_none());
    }

    #[test]
    fn huge_attempt_counts_do_not_overflow() {
        let p = ReconnectPolicy { max_attempts: u32::MAX, ..policy() };
        assert_eq!(p.next_delay(64), Some(Duration::from_millis(5000)));
    }

    #[test]
    fn built_from_config_defaults() {
        let p = ReconnectPolicy::from_config(&EngineConfig::default());
        assert_eq!(p.max_attempts, 5);
        assert_eq!(p.next_delay(1), Some(Duration::from_millis(1000)));
    }
}
