//! Batch orchestration.
//!
//! This module defines the [`BatchScheduler`], which runs many matches of one variant
//! back-to-back so that every model of a pool gets its share of games. Its responsibilities
//! include:
//!
//! - Picking rosters biased toward under-used models (see [`UsageTracker`])
//! - Running up to [`Configuration::parallel_matches`] matches at once, each on its own thread
//! - Booking appearances and deciding whether another match is needed
//! - Reporting per-model counts and the models short of the target
//!
//! # Fairness
//!
//! Each new roster first seats the models that did not play for more than `threshold_rounds`
//! matches (never used first, then longest idle), then fills the remaining seats with the least
//! used models. Models of matches still running count as used at their launch round, so
//! parallel launches do not all pick the same idle models.
//!
//! # Failures
//!
//! - A pool smaller than the variant's minimum roster fails before any match runs.
//! - A match aborted by a [`ConfigurationError`] books no appearance and stops all launches.
//! - A panicking match is reported as crashed and books no appearance.

use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::{
        mpsc::{self, Sender},
        Arc, Mutex,
    },
    thread,
};

use rand::Rng;
use serde::Serialize;
use tracing::{info, instrument, trace, warn};

use crate::{
    agent_proxy::{AgentProxy, AttemptObserver},
    cancel::CancelToken,
    configuration::Configuration,
    engine::StopReason,
    error::ConfigurationError,
    limits::Limits,
    logger::init_logger,
    match_runner::{run_match, MatchOutcome, MatchReport, MatchSettings},
    model::ModelEntry,
    planner::{MatchPlanner, Targets},
    record::RecordStore,
    rules::{RuleSet, Winner},
    transport::ModelRouter,
    usage::{Clock, SystemClock, UsageTracker},
};

/// One line of the batch report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchRecord {
    /// Launch order, also the batch round of the match.
    pub index: u64,
    /// Identifier of the match record.
    pub match_id: String,
    /// Seat names, in seat order.
    pub roster: Vec<String>,
    /// `None` when the match was aborted or crashed.
    pub winner: Option<Winner>,
    /// `None` when the match never finished.
    pub stop_reason: Option<StopReason>,
}

/// What a batch produced.
#[derive(Debug)]
pub struct BatchReport {
    /// Every match that ran, in launch order.
    pub matches: Vec<MatchRecord>,
    /// Appearances per model, in pool order.
    pub appearances: Vec<(String, u32)>,
    /// Models with fewer appearances than requested.
    pub short_of_target: Vec<String>,
    /// The error that stopped the batch, if any.
    pub aborted: Option<ConfigurationError>,
    /// Matches whose thread panicked.
    pub crashed: Vec<String>,
    /// Usage state at the end of the batch, to resume from.
    pub tracker: UsageTracker,
}

impl BatchReport {
    /// Every model reached its target and nothing aborted the batch.
    pub fn is_complete(&self) -> bool {
        self.short_of_target.is_empty() && self.aborted.is_none()
    }

    /// Appearances of `model`.
    pub fn appearances_of(&self, model: &str) -> u32 {
        self.appearances
            .iter()
            .find(|(m, _)| m == model)
            .map_or(0, |(_, n)| *n)
    }
}

/// Runs batches of matches of one variant.
///
/// # Type Parameters
/// - `R`: the variant, implementing [`RuleSet`]
pub struct BatchScheduler<R: RuleSet> {
    rules: Arc<R>,
    proxy: AgentProxy,
    store: Arc<dyn RecordStore>,
    config: Configuration,
    limits: Limits,
    clock: Arc<dyn Clock>,
}

impl<R: RuleSet> BatchScheduler<R> {
    /// Create a [`BatchScheduler`]. Installs the file logger when the configuration asks for
    /// it.
    ///
    /// # Errors
    /// When the log file or the global subscriber cannot be set up.
    #[instrument(skip_all)]
    pub fn new(
        rules: Arc<R>,
        router: Arc<dyn ModelRouter>,
        store: Arc<dyn RecordStore>,
        config: Configuration,
        limits: Limits,
    ) -> anyhow::Result<Self> {
        if config.log {
            init_logger()?;
        }
        trace!(?config, ?limits, variant = rules.variant());

        Ok(BatchScheduler {
            rules,
            proxy: AgentProxy::new(router),
            store,
            config,
            limits,
            clock: Arc::new(SystemClock),
        })
    }

    /// Timestamps usage with `clock` instead of the system clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Reports every agent attempt to `observer` instead of the log.
    pub fn with_observer(mut self, observer: Arc<dyn AttemptObserver>) -> Self {
        self.proxy = self.proxy.with_observer(observer);
        self
    }

    /// Token stopping the batch: no new agent call, no new match. Running matches end as
    /// cancelled.
    pub fn cancel_token(&self) -> CancelToken {
        self.proxy.cancel_token().clone()
    }

    /// Runs matches until every model of `pool` appeared `min_appearances` times or
    /// `max_games` matches were launched.
    ///
    /// # Errors
    /// [`ConfigurationError::PoolTooSmall`] before anything runs. Errors raised by a match are
    /// reported in [`BatchReport::aborted`] instead.
    pub fn run_batch(
        &self,
        pool: &[ModelEntry],
        min_appearances: u32,
        threshold_rounds: u64,
        max_games: u64,
    ) -> Result<BatchReport, ConfigurationError> {
        let mut models: Vec<String> = vec![];
        for entry in pool {
            if !models.iter().any(|m| m == entry.model.id()) {
                models.push(entry.model.id().to_owned());
            }
        }
        let tracker = UsageTracker::new(models, threshold_rounds, self.clock.clone());
        self.resume_batch(tracker, pool, min_appearances, threshold_rounds, max_games)
    }

    /// Same as [`run_batch`](Self::run_batch), counting the appearances already in `tracker`
    /// (e.g. rebuilt with [`UsageTracker::replay`]). Match indices continue after the
    /// tracker's latest round.
    ///
    /// # Errors
    /// See [`run_batch`](Self::run_batch).
    #[instrument(skip_all, fields(variant = self.rules.variant()))]
    pub fn resume_batch(
        &self,
        tracker: UsageTracker,
        pool: &[ModelEntry],
        min_appearances: u32,
        threshold_rounds: u64,
        max_games: u64,
    ) -> Result<BatchReport, ConfigurationError> {
        let seed = self.config.seed.unwrap_or_else(|| rand::rng().random());
        let mut planner = MatchPlanner::new(
            tracker,
            pool.to_vec(),
            self.rules.variant(),
            self.rules.seat_bounds(),
            self.config.seats_per_match,
            self.config.parallel_matches(),
            Targets {
                min_appearances,
                threshold_rounds,
                max_games,
            },
            seed,
        )?;
        info!(seed, pool = pool.len(), min_appearances, max_games, "batch started");

        let _wrap = self.config.verbose.then(LineWrapGuard::new);
        let proxy = Arc::new(self.proxy.clone());
        let cancel = self.cancel_token();
        let (tx_result, rx_result) = mpsc::channel();
        let running = Arc::new(Mutex::new(vec![]));

        for m in planner.advance() {
            self.launch_match(m, &proxy, tx_result.clone(), &running);
        }

        while !planner.is_finished() {
            // not finished <=> match running <=> result to receive
            let Ok(report) = rx_result.recv() else {
                warn!("result channel closed with matches still running");
                break;
            };
            if cancel.is_cancelled() {
                planner.stop_launching();
            }
            for new_match in planner.on_result(report) {
                self.launch_match(new_match, &proxy, tx_result.clone(), &running);
            }
        }

        Ok(planner.report())
    }

    fn launch_match(
        &self,
        settings: MatchSettings,
        proxy: &Arc<AgentProxy>,
        tx_result: Sender<MatchReport>,
        running: &Arc<Mutex<Vec<MatchSettings>>>,
    ) {
        let verbose = self.config.verbose;
        if let Ok(mut guard) = running.lock() {
            guard.push(settings.clone());
            if verbose {
                print_running_matches(&guard);
            }
        }

        let rules = self.rules.clone();
        let proxy = proxy.clone();
        let store = self.store.clone();
        let limits = self.limits;
        let reflection = self.config.reflection;
        let mutex = running.clone();
        let (spare_tx, spare_settings) = (tx_result.clone(), settings.clone());

        let spawned = thread::Builder::new()
            .name(format!("match-{}", settings.index))
            .spawn(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    run_match(&settings, rules, proxy, store.as_ref(), &limits, reflection)
                }))
                .unwrap_or_else(|payload| MatchOutcome::Crashed(panic_message(payload.as_ref())));

                if verbose {
                    print_match_outcome(&settings, &outcome);
                }
                remove_running_match(&mutex, &settings);
                // the batch loop owns the receiver until every match reported
                let _ = tx_result.send(MatchReport { settings, outcome });
            });

        if let Err(e) = spawned {
            warn!(error = %e, "could not spawn match thread");
            remove_running_match(running, &spare_settings);
            let _ = spare_tx.send(MatchReport {
                settings: spare_settings,
                outcome: MatchOutcome::Crashed(format!("could not spawn match thread: {e}")),
            });
        }
    }
}

fn remove_running_match(mutex: &Mutex<Vec<MatchSettings>>, settings: &MatchSettings) {
    if let Ok(mut guard) = mutex.lock() {
        if let Some(pos) = guard.iter().position(|s| s == settings) {
            guard.remove(pos);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}

fn print_match_outcome(settings: &MatchSettings, outcome: &MatchOutcome) {
    // clear line, green match, result, red problems, start of line
    match outcome {
        MatchOutcome::Finished(summary) => {
            let fallbacks = summary.seats.iter().map(|s| s.fallbacks).sum::<u32>();
            println!(
                "\x1b[2K\x1b[32m{settings}: \x1b[39m{} ({}, {} rounds) \x1b[31m{}\x1b[39m\x1b[0G",
                summary.winner,
                summary.stop_reason,
                summary.rounds,
                if fallbacks > 0 {
                    format!("{fallbacks} fallbacks")
                } else {
                    String::new()
                }
            );
        }
        MatchOutcome::Aborted(e) => {
            println!("\x1b[2K\x1b[32m{settings}: \x1b[31maborted: {e}\x1b[39m\x1b[0G");
        }
        MatchOutcome::Crashed(reason) => {
            println!("\x1b[2K\x1b[32m{settings}: \x1b[31mcrashed: {reason}\x1b[39m\x1b[0G");
        }
    }
}

fn print_running_matches(running: &[MatchSettings]) {
    // clear, green, default, start of line
    print!(
        "\x1b[2K\x1b[32mRunning...:\x1b[39m {}\x1b[0G",
        running
            .iter()
            .map(MatchSettings::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    );
    let _ = std::io::Write::flush(&mut std::io::stdout());
}

/// Disables terminal line wrapping while alive.
struct LineWrapGuard;

impl LineWrapGuard {
    fn new() -> Self {
        print!("\x1b[?7l");
        LineWrapGuard
    }
}

impl Drop for LineWrapGuard {
    fn drop(&mut self) {
        print!("\x1b[?7h");
        let _ = std::io::Write::flush(&mut std::io::stdout());
    }
}
