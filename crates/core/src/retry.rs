//! Bounded retry policies.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry policy: how many attempts in total, and how long to wait between them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts allowed, including the first one (minimum 1)
    pub max_attempts: u32,
    /// Wait after each failed attempt
    pub delay: Duration,
}

impl RetryPolicy {
    /// Authentication: 30 attempts, 1 second apart.
    pub const AUTH_ATTEMPTS: u32 = 30;
    /// Submission: the failure counter may exceed 35 once, i.e. 36 attempts, 5 seconds apart.
    pub const SUBMISSION_ATTEMPTS: u32 = 36;

    /// A single attempt, never retried.
    pub fn no_retry() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    pub fn authentication() -> Self {
        Self::fixed(Self::AUTH_ATTEMPTS, Duration::from_secs(1))
    }

    pub fn submission() -> Self {
        Self::fixed(Self::SUBMISSION_ATTEMPTS, Duration::from_secs(5))
    }

    /// Delay to wait after failed attempt number `attempt` (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            Duration::ZERO
        } else {
            self.delay
        }
    }

    /// True when another attempt is allowed after `failed_attempts` failures.
    pub fn should_retry(&self, failed_attempts: u32) -> bool {
        failed_attempts < self.max_attempts.max(1)
    }
}

/// Tagged result of a bounded retry loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T, E> {
    Succeeded { value: T, attempts: u32 },
    Exhausted { attempts: u32, last_error: E },
}
