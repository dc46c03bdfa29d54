//! Supervised-restart policy for monitor-style deployments.
//!
//! Replaces an unconditional respawn-on-exit loop with bounded retries,
//! exponential backoff, and a circuit break after consecutive failures.

use std::time::Duration;

/// Restart policy for a monitored capture process.
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    /// Maximum restart attempts before giving up entirely.
    pub max_attempts: u32,
    /// Delay before the first restart.
    pub base_delay: Duration,
    /// Ceiling for the backoff delay.
    pub max_delay: Duration,
    /// Consecutive failures that trip the circuit breaker.
    pub circuit_break_after: u32,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            circuit_break_after: 5,
        }
    }
}

impl RestartPolicy {
    /// Delay before restart attempt `attempt` (0-based), doubling each time
    /// up to `max_delay`. `None` when the policy is exhausted.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let shift = attempt.min(16);
        let delay = self
            .base_delay
            .checked_mul(1u32 << shift)
            .unwrap_or(self.max_delay);
        Some(delay.min(self.max_delay))
    }
}

/// Tracks restart attempts against a policy.
#[derive(Debug)]
pub struct RestartTracker {
    policy: RestartPolicy,
    attempts: u32,
    consecutive_failures: u32,
}

/// Decision after a process exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    /// Restart after the given delay.
    Retry(Duration),
    /// Policy exhausted or circuit broken; stop restarting.
    GiveUp,
}

impl RestartTracker {
    pub fn new(policy: RestartPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            consecutive_failures: 0,
        }
    }

    /// Record a clean exit; resets the failure streak but still counts
    /// toward total attempts.
    pub fn on_success(&mut self) -> RestartDecision {
        self.consecutive_failures = 0;
        self.next()
    }

    /// Record a failed exit.
    pub fn on_failure(&mut self) -> RestartDecision {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.policy.circuit_break_after {
            tracing::warn!(
                target: "scribe::restart",
                "Circuit break after {} consecutive failures",
                self.consecutive_failures
            );
            return RestartDecision::GiveUp;
        }
        self.next()
    }

    fn next(&mut self) -> RestartDecision {
        match self.policy.delay_for(self.attempts) {
            Some(delay) => {
                self.attempts += 1;
                RestartDecision::Retry(delay)
            }
            None => RestartDecision::GiveUp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RestartPolicy {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
            circuit_break_after: 100,
        };
        assert_eq!(policy.delay_for(0), Some(Duration::from_secs(1)));
        assert_eq!(policy.delay_for(1), Some(Duration::from_secs(2)));
        assert_eq!(policy.delay_for(2), Some(Duration::from_secs(4)));
        assert_eq!(policy.delay_for(3), Some(Duration::from_secs(8)));
        assert_eq!(policy.delay_for(4), Some(Duration::from_secs(8)));
        assert_eq!(policy.delay_for(10), None);
    }

    #[test]
    fn test_circuit_break_on_consecutive_failures() {
        let policy = RestartPolicy {
            circuit_break_after: 3,
            ..Default::default()
        };
        let mut tracker = RestartTracker::new(policy);
        assert!(matches!(tracker.on_failure(), RestartDecision::Retry(_)));
        assert!(matches!(tracker.on_failure(), RestartDecision::Retry(_)));
        assert_eq!(tracker.on_failure(), RestartDecision::GiveUp);
    }

    #[test]
    fn test_success_resets_failure_streak() {
        let policy = RestartPolicy {
            circuit_break_after: 2,
            ..Default::default()
        };
        let mut tracker = RestartTracker::new(policy);
        assert!(matches!(tracker.on_failure(), RestartDecision::Retry(_)));
        assert!(matches!(tracker.on_success(), RestartDecision::Retry(_)));
        // Streak restarted: one more failure is below the threshold.
        assert!(matches!(tracker.on_failure(), RestartDecision::Retry(_)));
        assert_eq!(tracker.on_failure(), RestartDecision::GiveUp);
    }

    #[test]
    fn test_exhausted_attempts_give_up() {
        let policy = RestartPolicy {
            max_attempts: 2,
            circuit_break_after: 100,
            ..Default::default()
        };
        let mut tracker = RestartTracker::new(policy);
        assert!(matches!(tracker.on_success(), RestartDecision::Retry(_)));
        assert!(matches!(tracker.on_success(), RestartDecision::Retry(_)));
        assert_eq!(tracker.on_success(), RestartDecision::GiveUp);
    }
}
