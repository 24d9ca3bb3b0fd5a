//! Config for the batch scheduler behaviors
//!
//! Configuration can be created programmatically using [`Configuration::new()`] or by reading
//! environment variables using [`Configuration::from_env()`].
//!
//! # Environment Variables
//!
//! All values are optional. Flags are case-insensitive: set them to `"true"` to enable them.
//!
//! - `ARENA_VERBOSE`: print running matches and results to stdout (default: `true`)
//! - `ARENA_LOG`: enable logging to a file (default: `false`)
//! - `ARENA_REFLECTION`: ask agents for updated opinions after each round (default: `false`)
//! - `ARENA_PARALLEL_MATCHES`: matches run at once (default: physical CPU count)
//! - `ARENA_SEATS_PER_MATCH`: seats per match (default: the variant's maximum)
//! - `ARENA_SEED`: batch seed, for reproducible deals (default: random)

use std::env;

/// Configuration for batch behaviors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Configuration {
    pub(crate) verbose: bool,
    pub(crate) log: bool,
    pub(crate) reflection: bool,
    pub(crate) parallel_matches: usize,
    pub(crate) seats_per_match: Option<usize>,
    pub(crate) seed: Option<u64>,
}

impl Configuration {
    /// Create a new configuration with default parameters.
    ///
    /// By default:
    /// - Match progress is printed to stdout.
    /// - Logging to file is disabled.
    /// - No reflection step between rounds.
    /// - One match per physical CPU runs at once.
    /// - Matches seat as many players as the variant allows.
    /// - The batch seed is random.
    pub fn new() -> Self {
        Self {
            verbose: true,
            log: false,
            reflection: false,
            parallel_matches: num_cpus::get_physical(),
            seats_per_match: None,
            seed: None,
        }
    }

    /// Create configuration from environment variables.
    ///
    /// Unset or unparsable variables keep their default value.
    pub fn from_env() -> Self {
        fn get_env_flag(var: &str, default: bool) -> bool {
            match env::var(var) {
                Ok(val) => val.eq_ignore_ascii_case("true"),
                Err(_) => default,
            }
        }

        fn parse_usize(var: &str) -> Option<usize> {
            env::var(var).ok()?.trim().parse().ok()
        }

        let default = Self::new();
        Self {
            verbose: get_env_flag("ARENA_VERBOSE", true),
            log: get_env_flag("ARENA_LOG", false),
            reflection: get_env_flag("ARENA_REFLECTION", false),
            parallel_matches: parse_usize("ARENA_PARALLEL_MATCHES")
                .filter(|n| *n > 0)
                .unwrap_or(default.parallel_matches),
            seats_per_match: parse_usize("ARENA_SEATS_PER_MATCH"),
            seed: env::var("ARENA_SEED").ok().and_then(|s| s.trim().parse().ok()),
        }
    }

    /// Enable or disable console progress.
    pub fn with_verbose(mut self, value: bool) -> Self {
        self.verbose = value;
        self
    }

    /// Enable or disable logging to file.
    pub fn with_log(mut self, value: bool) -> Self {
        self.log = value;
        self
    }

    /// Enable or disable the end-of-round reflection step.
    pub fn with_reflection(mut self, value: bool) -> Self {
        self.reflection = value;
        self
    }

    /// Number of matches running at once. Zero is treated as one.
    pub fn with_parallel_matches(mut self, value: usize) -> Self {
        self.parallel_matches = value.max(1);
        self
    }

    /// Seats per match, clamped to the variant bounds and the pool size at launch.
    pub fn with_seats_per_match(mut self, value: usize) -> Self {
        self.seats_per_match = Some(value);
        self
    }

    /// Fixes the batch seed. Match `i` is seeded from this seed and `i`.
    pub fn with_seed(mut self, value: u64) -> Self {
        self.seed = Some(value);
        self
    }

    /// Matches running at once.
    pub fn parallel_matches(&self) -> usize {
        self.parallel_matches.max(1)
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setters_override_defaults() {
        let config = Configuration::new()
            .with_verbose(false)
            .with_log(true)
            .with_reflection(true)
            .with_seats_per_match(6)
            .with_seed(42);

        assert!(!config.verbose);
        assert!(config.log);
        assert!(config.reflection);
        assert_eq!(config.seats_per_match, Some(6));
        assert_eq!(config.seed, Some(42));
    }

    #[test]
    fn at_least_one_match_runs() {
        assert_eq!(Configuration::new().with_parallel_matches(0).parallel_matches(), 1);
        assert!(Configuration::default().parallel_matches() >= 1);
    }
}
