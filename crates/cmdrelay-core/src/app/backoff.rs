//! Backoff policy: decides retry delays for the prober and the polling worker.

use std::time::Duration;

/// Exponential backoff policy.
///
/// Both the readiness prober and the polling worker use this type; they
/// differ only in their constants.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delay after the first failure.
    pub base_delay: Duration,

    /// Growth factor per additional failure.
    pub multiplier: u32,

    /// Highest exponent applied (`None` = uncapped growth).
    pub max_exponent: Option<u32>,

    /// Absolute ceiling on the delay (`None` = no ceiling).
    pub max_delay: Option<Duration>,
}

impl BackoffPolicy {
    /// Startup probe: 5s, 10s, 20s, ... uncapped within the retry budget.
    pub fn probe_default() -> Self {
        Self {
            base_delay: Duration::from_secs(5),
            multiplier: 2,
            max_exponent: None,
            max_delay: None,
        }
    }

    /// Steady-state polling errors: 5s, 10s, 20s, 40s, then 40s.
    pub fn polling_default() -> Self {
        Self {
            base_delay: Duration::from_secs(5),
            multiplier: 2,
            max_exponent: Some(3),
            max_delay: None,
        }
    }

    /// Calculate the delay after `consecutive_errors` failures (1-indexed).
    ///
    /// delay = base_delay * multiplier^min(consecutive_errors - 1, max_exponent),
    /// then clamped to `max_delay`. Zero errors yields `base_delay`.
    ///
    /// Example with base_delay=5s, multiplier=2, max_exponent=3:
    /// - 1 error: 5s
    /// - 2 errors: 10s
    /// - 3 errors: 20s
    /// - 4 errors: 40s
    /// - 5+ errors: 40s
    pub fn next_delay(&self, consecutive_errors: u32) -> Duration {
        let mut exponent = consecutive_errors.saturating_sub(1);
        if let Some(max) = self.max_exponent {
            exponent = exponent.min(max);
        }
        let factor = self.multiplier.max(1).saturating_pow(exponent);
        let delay = self.base_delay.saturating_mul(factor);
        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }
}

/// Failure streak for one subsystem.
///
/// Each subsystem owns its own instance; nothing is shared globally.
#[derive(Debug, Clone)]
pub struct BackoffState {
    policy: BackoffPolicy,
    consecutive_errors: u32,
    max_consecutive_errors: u32,
    escalated_delay: Duration,
}

impl BackoffState {
    pub fn new(
        policy: BackoffPolicy,
        max_consecutive_errors: u32,
        escalated_delay: Duration,
    ) -> Self {
        Self {
            policy,
            consecutive_errors: 0,
            max_consecutive_errors,
            escalated_delay,
        }
    }

    /// Worker defaults: threshold 5, then a fixed 30s delay.
    pub fn polling_default() -> Self {
        Self::new(BackoffPolicy::polling_default(), 5, Duration::from_secs(30))
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// At or above the threshold the streak uses the fixed escalated delay.
    pub fn is_escalated(&self) -> bool {
        self.consecutive_errors >= self.max_consecutive_errors
    }

    /// Record a failure and return how long to wait before retrying.
    pub fn record_failure(&mut self) -> Duration {
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        self.current_delay()
    }

    pub fn record_success(&mut self) {
        self.consecutive_errors = 0;
    }

    /// Delay for the current streak (base delay when there is none).
    pub fn current_delay(&self) -> Duration {
        if self.is_escalated() {
            self.escalated_delay
        } else {
            self.policy.next_delay(self.consecutive_errors)
        }
    }
}
