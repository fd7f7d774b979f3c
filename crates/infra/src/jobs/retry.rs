//! Bounded async retry loop over a [`RetryPolicy`].

use std::fmt::Display;
use std::future::Future;

use tracing::{info, warn};

use simflow_core::{RetryOutcome, RetryPolicy};

/// Run `attempt` until it succeeds or the policy is exhausted.
///
/// `attempt` receives the 1-indexed attempt number. Every failure is logged;
/// the loop sleeps `policy.delay_for_attempt(n)` between attempts.
pub async fn retry_with<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut attempt: F,
) -> RetryOutcome<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut n = 0;
    loop {
        n += 1;
        match attempt(n).await {
            Ok(value) => {
                if n > 1 {
                    info!(operation, attempts = n, "succeeded after retries");
                }
                return RetryOutcome::Succeeded { value, attempts: n };
            }
            Err(err) if !policy.should_retry(n) => {
                warn!(operation, attempts = n, error = %err, "retries exhausted");
                return RetryOutcome::Exhausted {
                    attempts: n,
                    last_error: err,
                };
            }
            Err(err) => {
                let delay = policy.delay_for_attempt(n);
                warn!(
                    operation,
                    attempt = n,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "attempt failed; retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::Instant;

    use super::*;

    async fn fail_first(n: u32, failures: u32) -> Result<u32, String> {
        if n <= failures {
            Err(format!("failure {n}"))
        } else {
            Ok(n)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let started = Instant::now();
        let outcome = retry_with(&RetryPolicy::submission(), "submit", |n| fail_first(n, 34)).await;

        assert_eq!(
            outcome,
            RetryOutcome::Succeeded {
                value: 35,
                attempts: 35
            }
        );
        assert_eq!(started.elapsed(), Duration::from_secs(34 * 5));
    }

    #[tokio::test(start_paused = true)]
    async fn submission_policy_gives_up_after_36_attempts() {
        let mut calls = 0;
        let outcome = retry_with(&RetryPolicy::submission(), "submit", |n| {
            calls += 1;
            fail_first(n, u32::MAX)
        })
        .await;

        assert_eq!(calls, 36);
        assert_eq!(
            outcome,
            RetryOutcome::Exhausted {
                attempts: 36,
                last_error: "failure 36".to_string()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn no_retry_makes_a_single_attempt() {
        let started = Instant::now();
        let outcome = retry_with(&RetryPolicy::no_retry(), "once", |n| fail_first(n, 1)).await;

        assert!(matches!(outcome, RetryOutcome::Exhausted { attempts: 1, .. }));
        assert_eq!(started.elapsed(), Duration::ZERO);
    }
}
