//! Bounded retry combinator.
//!
//! Attempts are bounded both by count and by a cumulative wall-clock budget; whichever limit
//! is hit first ends the loop. The result is always a value: either what an attempt produced
//! or the caller-supplied fallback.

use std::{
    thread,
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};

use crate::{cancel::CancelToken, error::AgentError};

/// Limits applied to one logical agent request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Hard timeout of a single call.
    pub call_timeout: Duration,
    /// Maximum number of attempts, first one included. Never zero.
    pub max_attempts: u32,
    /// Pause between two attempts.
    pub delay: Duration,
    /// Cumulative budget across all attempts.
    pub budget: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            max_attempts: 5,
            delay: Duration::from_millis(500),
            budget: Duration::from_secs(60),
        }
    }
}

/// Whether a decision came from the agent or was substituted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// Produced by the model.
    Genuine,
    /// Substituted after the model failed.
    Fallback,
}

/// A value tagged with its provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decided<T> {
    /// Produced by a successful attempt.
    Genuine(T),
    /// Substituted after the retry bounds were exhausted.
    Fallback(T),
}

impl<T> Decided<T> {
    /// Where the value comes from.
    pub fn provenance(&self) -> Provenance {
        match self {
            Decided::Genuine(_) => Provenance::Genuine,
            Decided::Fallback(_) => Provenance::Fallback,
        }
    }

    /// True for a substituted value.
    pub fn is_fallback(&self) -> bool {
        matches!(self, Decided::Fallback(_))
    }

    /// The value, whatever its origin.
    pub fn value(&self) -> &T {
        match self {
            Decided::Genuine(v) | Decided::Fallback(v) => v,
        }
    }

    /// Unwraps the value.
    pub fn into_value(self) -> T {
        match self {
            Decided::Genuine(v) | Decided::Fallback(v) => v,
        }
    }
}

/// Result of [`retry_or_fallback`].
#[derive(Debug, Clone)]
pub struct RetryOutcome<T> {
    /// The decision, genuine or fallback.
    pub decision: Decided<T>,
    /// Number of attempts actually issued.
    pub attempts: u32,
    /// Why the last failed attempt failed; `ExhaustedRetries` when no attempt could be issued.
    pub last_error: Option<AgentError>,
}

/// Runs `attempt` until it succeeds or the policy is exhausted.
///
/// `attempt` receives the attempt number (starting at 1) and the time it may take, which is
/// the per-call timeout clamped to the remaining budget. `on_failure` sees every failed
/// attempt.
pub fn retry_or_fallback<T, F, E>(
    policy: &RetryPolicy,
    cancel: &CancelToken,
    fallback: T,
    mut attempt: F,
    mut on_failure: E,
) -> RetryOutcome<T>
where
    F: FnMut(u32, Duration) -> Result<T, AgentError>,
    E: FnMut(u32, &AgentError),
{
    let start = Instant::now();
    let mut last_error = None;
    let mut attempts = 0;

    while attempts < policy.max_attempts.max(1) {
        if cancel.is_cancelled() {
            last_error = Some(AgentError::Cancelled);
            break;
        }
        let remaining = policy.budget.saturating_sub(start.elapsed());
        if remaining.is_zero() {
            break;
        }

        attempts += 1;
        match attempt(attempts, policy.call_timeout.min(remaining)) {
            Ok(value) => {
                return RetryOutcome {
                    decision: Decided::Genuine(value),
                    attempts,
                    last_error,
                }
            }
            Err(e) => {
                on_failure(attempts, &e);
                last_error = Some(e);
            }
        }

        if attempts < policy.max_attempts && !policy.delay.is_zero() {
            let remaining = policy.budget.saturating_sub(start.elapsed());
            thread::sleep(policy.delay.min(remaining));
        }
    }

    RetryOutcome {
        decision: Decided::Fallback(fallback),
        attempts,
        last_error: last_error.or(Some(AgentError::ExhaustedRetries { attempts })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            call_timeout: Duration::from_millis(50),
            max_attempts,
            delay: Duration::ZERO,
            budget: Duration::from_secs(5),
        }
    }

    #[test]
    fn first_success_is_genuine() {
        let out = retry_or_fallback(&quick(3), &CancelToken::new(), 0, |_, _| Ok(7), |_, _| {});
        assert_eq!(out.decision, Decided::Genuine(7));
        assert_eq!(out.attempts, 1);
    }

    #[test]
    fn succeeds_after_failures() {
        let mut failures = 0;
        let out = retry_or_fallback(
            &quick(5),
            &CancelToken::new(),
            0,
            |n, _| {
                if n < 3 {
                    Err(AgentError::Timeout(Duration::ZERO))
                } else {
                    Ok(n)
                }
            },
            |_, _| failures += 1,
        );
        assert_eq!(out.decision, Decided::Genuine(3));
        assert_eq!(failures, 2);
    }

    #[test]
    fn exhaustion_returns_fallback() {
        let out = retry_or_fallback(
            &quick(4),
            &CancelToken::new(),
            "safe",
            |_, _| Err(AgentError::Timeout(Duration::ZERO)),
            |_, _| {},
        );
        assert_eq!(out.decision, Decided::Fallback("safe"));
        assert_eq!(out.attempts, 4);
        assert!(matches!(out.last_error, Some(AgentError::Timeout(_))));
    }

    #[test]
    fn budget_stops_before_attempt_limit() {
        let policy = RetryPolicy {
            call_timeout: Duration::from_secs(1),
            max_attempts: 100,
            delay: Duration::from_millis(20),
            budget: Duration::from_millis(100),
        };
        let out = retry_or_fallback(
            &policy,
            &CancelToken::new(),
            (),
            |_, _| Err::<(), _>(AgentError::Timeout(Duration::ZERO)),
            |_, _| {},
        );
        assert!(out.decision.is_fallback());
        assert!(out.attempts < 100);
    }

    #[test]
    fn per_call_timeout_is_clamped_to_budget() {
        let policy = RetryPolicy {
            call_timeout: Duration::from_secs(30),
            max_attempts: 1,
            delay: Duration::ZERO,
            budget: Duration::from_secs(2),
        };
        let mut seen = Duration::ZERO;
        retry_or_fallback(
            &policy,
            &CancelToken::new(),
            (),
            |_, timeout| {
                seen = timeout;
                Ok(())
            },
            |_, _| {},
        );
        assert!(seen <= Duration::from_secs(2));
    }

    #[test]
    fn cancelled_issues_nothing() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let out = retry_or_fallback(&quick(3), &cancel, 1, |_, _| Ok(2), |_, _| {});
        assert_eq!(out.decision, Decided::Fallback(1));
        assert_eq!(out.attempts, 0);
        assert_eq!(out.last_error, Some(AgentError::Cancelled));
    }
}
