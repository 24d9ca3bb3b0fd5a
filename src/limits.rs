//! Time and retry limits applied to agents and matches.
//!
//! The main entry point is [`LimitsBuilder`], a chainable builder producing [`Limits`]:
//!
//! - **Per call**: hard timeout of a single agent request
//! - **Retries**: maximum attempts, pause between attempts, cumulative budget
//! - **Per match**: maximum rounds and wall-clock duration
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use deduction_arena::limits::LimitsBuilder;
//!
//! let limits = LimitsBuilder::new()
//!     .with_call_timeout(Duration::from_secs(20))
//!     .with_max_attempts(3)
//!     .with_max_rounds(30)
//!     .build()
//!     .unwrap();
//! assert_eq!(limits.retry_policy().max_attempts, 3);
//! ```
//!
//! Limits can also be read from environment variables with [`LimitsBuilder::from_env()`].

use std::{env, time::Duration};

use anyhow::bail;
use tracing::warn;

use crate::retry::RetryPolicy;

/// A builder for the limits of a batch.
///
/// Defaults: 30 s per call, 5 attempts, 500 ms between attempts, 60 s retry budget, 50 rounds
/// and one hour per match.
#[derive(Debug, Default)]
pub struct LimitsBuilder {
    call_timeout: Option<Duration>,
    max_attempts: Option<u32>,
    retry_delay: Option<Duration>,
    retry_budget: Option<Duration>,
    max_rounds: Option<u32>,
    max_match_duration: Option<Duration>,
}

impl LimitsBuilder {
    /// Creates a builder with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder configured from environment variables.
    ///
    /// Read environment variables are:
    /// - `CALL_TIMEOUT_SECS` (u64): timeout of one agent call
    /// - `MAX_ATTEMPTS` (u32): attempts per request, first one included
    /// - `RETRY_DELAY_MS` (u64): pause between two attempts
    /// - `RETRY_BUDGET_SECS` (u64): cumulative time allowed for all attempts of a request
    /// - `MAX_ROUNDS` (u32): rounds before a match is stopped
    /// - `MAX_MATCH_SECS` (u64): wall-clock time before a match is stopped
    #[must_use]
    pub fn from_env() -> Self {
        fn parse_u32(var: &str) -> Option<u32> {
            env::var(var).ok()?.parse().ok()
        }

        fn parse_duration_secs(var: &str) -> Option<Duration> {
            env::var(var)
                .ok()?
                .parse::<u64>()
                .ok()
                .map(Duration::from_secs)
        }

        fn parse_duration_millis(var: &str) -> Option<Duration> {
            env::var(var)
                .ok()?
                .parse::<u64>()
                .ok()
                .map(Duration::from_millis)
        }

        LimitsBuilder {
            call_timeout: parse_duration_secs("CALL_TIMEOUT_SECS"),
            max_attempts: parse_u32("MAX_ATTEMPTS"),
            retry_delay: parse_duration_millis("RETRY_DELAY_MS"),
            retry_budget: parse_duration_secs("RETRY_BUDGET_SECS"),
            max_rounds: parse_u32("MAX_ROUNDS"),
            max_match_duration: parse_duration_secs("MAX_MATCH_SECS"),
        }
    }

    /// Sets the hard timeout of a single agent call.
    #[must_use]
    pub fn with_call_timeout(self, duration: Duration) -> Self {
        Self {
            call_timeout: Some(duration),
            ..self
        }
    }

    /// Sets the number of attempts per request, first one included.
    #[must_use]
    pub fn with_max_attempts(self, attempts: u32) -> Self {
        Self {
            max_attempts: Some(attempts),
            ..self
        }
    }

    /// Sets the pause between two attempts.
    #[must_use]
    pub fn with_retry_delay(self, duration: Duration) -> Self {
        Self {
            retry_delay: Some(duration),
            ..self
        }
    }

    /// Sets the cumulative time allowed for all attempts of one request.
    #[must_use]
    pub fn with_retry_budget(self, duration: Duration) -> Self {
        Self {
            retry_budget: Some(duration),
            ..self
        }
    }

    /// Sets the number of rounds after which a match is stopped.
    #[must_use]
    pub fn with_max_rounds(self, rounds: u32) -> Self {
        Self {
            max_rounds: Some(rounds),
            ..self
        }
    }

    /// Sets the wall-clock time after which a match is stopped.
    #[must_use]
    pub fn with_max_match_duration(self, duration: Duration) -> Self {
        Self {
            max_match_duration: Some(duration),
            ..self
        }
    }

    /// Consumes the builder and returns the constructed [`Limits`].
    ///
    /// # Errors
    ///
    /// Returns an error when the limits are impossible, e.g. zero attempts or a zero timeout.
    pub fn build(self) -> anyhow::Result<Limits> {
        let defaults = RetryPolicy::default();
        let call_timeout = self.call_timeout.unwrap_or(defaults.call_timeout);
        let max_attempts = self.max_attempts.unwrap_or(defaults.max_attempts);
        let retry_delay = self.retry_delay.unwrap_or(defaults.delay);
        let retry_budget = self.retry_budget.unwrap_or(defaults.budget);
        let max_rounds = self.max_rounds.unwrap_or(50);
        let max_match_duration = self
            .max_match_duration
            .unwrap_or(Duration::from_secs(3600));

        if max_attempts == 0 {
            bail!("at least one attempt per request is required");
        }
        if call_timeout.is_zero() {
            bail!("call timeout must be greater than zero");
        }
        if retry_budget.is_zero() {
            bail!("retry budget must be greater than zero");
        }
        if max_rounds == 0 {
            bail!("matches need at least one round");
        }
        if retry_budget < call_timeout {
            warn!(
                ?retry_budget,
                ?call_timeout,
                "retry budget is shorter than one call, calls will be cut short"
            );
        }

        Ok(Limits {
            call_timeout,
            max_attempts,
            retry_delay,
            retry_budget,
            max_rounds,
            max_match_duration,
        })
    }
}

/// Obtained using [`LimitsBuilder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub(crate) call_timeout: Duration,
    pub(crate) max_attempts: u32,
    pub(crate) retry_delay: Duration,
    pub(crate) retry_budget: Duration,
    pub(crate) max_rounds: u32,
    pub(crate) max_match_duration: Duration,
}

impl Limits {
    /// create a LimitsBuilder
    pub fn builder() -> LimitsBuilder {
        LimitsBuilder::new()
    }

    /// Retry bounds of one agent request.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            call_timeout: self.call_timeout,
            max_attempts: self.max_attempts,
            delay: self.retry_delay,
            budget: self.retry_budget,
        }
    }

    /// Rounds before a match is stopped.
    pub fn max_rounds(&self) -> u32 {
        self.max_rounds
    }

    /// Wall clock before a match is stopped.
    pub fn max_match_duration(&self) -> Duration {
        self.max_match_duration
    }
}

impl Default for Limits {
    fn default() -> Self {
        let defaults = RetryPolicy::default();
        Self {
            call_timeout: defaults.call_timeout,
            max_attempts: defaults.max_attempts,
            retry_delay: defaults.delay,
            retry_budget: defaults.budget,
            max_rounds: 50,
            max_match_duration: Duration::from_secs(3600),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let limits = LimitsBuilder::new().build().unwrap();
        assert_eq!(limits, Limits::default());
        assert_eq!(limits.retry_policy(), RetryPolicy::default());
        assert_eq!(limits.max_rounds(), 50);
    }

    #[test]
    fn impossible_limits() {
        assert!(LimitsBuilder::new().with_max_attempts(0).build().is_err());
        assert!(LimitsBuilder::new()
            .with_call_timeout(Duration::ZERO)
            .build()
            .is_err());
        assert!(LimitsBuilder::new().with_max_rounds(0).build().is_err());
    }

    #[test]
    fn builder_overrides() {
        let limits = Limits::builder()
            .with_retry_delay(Duration::ZERO)
            .with_retry_budget(Duration::from_secs(5))
            .with_max_match_duration(Duration::from_secs(60))
            .build()
            .unwrap();
        let policy = limits.retry_policy();
        assert_eq!(policy.delay, Duration::ZERO);
        assert_eq!(policy.budget, Duration::from_secs(5));
        assert_eq!(limits.max_match_duration(), Duration::from_secs(60));
    }
}
