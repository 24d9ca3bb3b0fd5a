use std::{cmp::Reverse, collections::BTreeMap, ops::RangeInclusive};

use tracing::{info, trace, warn};

use crate::{
    batch::{BatchReport, MatchRecord},
    error::ConfigurationError,
    match_runner::{MatchOutcome, MatchReport, MatchSettings},
    model::ModelEntry,
    usage::UsageTracker,
};

/// Batch-level targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Targets {
    pub min_appearances: u32,
    pub threshold_rounds: u64,
    pub max_games: u64,
}

/// Picks rosters and decides when the batch is over. Lives on the coordination thread only.
pub(crate) struct MatchPlanner {
    tracker: UsageTracker,
    pool: Vec<ModelEntry>,
    variant: &'static str,
    seats: usize,
    parallel: usize,
    targets: Targets,
    seed: u64,
    first_round: u64,
    launched: u64,
    running: BTreeMap<u64, Vec<String>>,
    matches: Vec<MatchRecord>,
    aborted: Option<ConfigurationError>,
    crashed: Vec<String>,
    stopped: bool,
}

impl MatchPlanner {
    /// Fails fast when the pool cannot fill the smallest roster of the variant.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tracker: UsageTracker,
        pool: Vec<ModelEntry>,
        variant: &'static str,
        bounds: RangeInclusive<usize>,
        seats_per_match: Option<usize>,
        parallel: usize,
        targets: Targets,
        seed: u64,
    ) -> Result<Self, ConfigurationError> {
        let (min, max) = (*bounds.start(), *bounds.end());
        if pool.len() < min {
            return Err(ConfigurationError::PoolTooSmall {
                variant: variant.to_owned(),
                pool: pool.len(),
                required: min,
            });
        }
        let seats = seats_per_match.unwrap_or(max).clamp(min, max).min(pool.len());
        let first_round = tracker.latest_round().map_or(0, |r| r + 1);
        trace!(seats, first_round, ?targets, "planner ready");

        Ok(MatchPlanner {
            tracker,
            pool,
            variant,
            seats,
            parallel: parallel.max(1),
            targets,
            seed,
            first_round,
            launched: 0,
            running: BTreeMap::new(),
            matches: vec![],
            aborted: None,
            crashed: vec![],
            stopped: false,
        })
    }

    /// Matches to launch now, as long as there are free slots and the targets are not met.
    pub fn advance(&mut self) -> Vec<MatchSettings> {
        let mut matches_to_run = vec![];
        while self.running.len() < self.parallel && !self.done_launching() {
            let settings = self.next_match();
            self.running.insert(
                settings.index,
                settings.roster.iter().map(|e| e.model.id().to_owned()).collect(),
            );
            self.launched += 1;
            matches_to_run.push(settings);
        }
        matches_to_run
    }

    /// Books the result of a match and returns the matches to launch next.
    pub fn on_result(&mut self, report: MatchReport) -> Vec<MatchSettings> {
        let MatchReport { settings, outcome } = report;
        self.running.remove(&settings.index);

        let mut record = MatchRecord {
            index: settings.index,
            match_id: settings.match_id.clone(),
            roster: settings.roster.iter().map(|e| e.seat_name().to_owned()).collect(),
            winner: None,
            stop_reason: None,
        };
        match outcome {
            MatchOutcome::Finished(summary) => {
                for seat in summary.participants() {
                    self.tracker.record_appearance(&seat.model, settings.index);
                }
                record.winner = Some(summary.winner);
                record.stop_reason = Some(summary.stop_reason);
            }
            MatchOutcome::Aborted(e) => {
                warn!(match_id = %settings.match_id, error = %e, "match aborted, no more launches");
                if self.aborted.is_none() {
                    self.aborted = Some(e);
                }
            }
            MatchOutcome::Crashed(reason) => {
                warn!(match_id = %settings.match_id, %reason, "match crashed");
                self.crashed.push(format!("{}: {reason}", settings.match_id));
            }
        }
        self.matches.push(record);
        self.advance()
    }

    /// No more launches, whatever the targets say.
    pub fn stop_launching(&mut self) {
        self.stopped = true;
    }

    /// Nothing running and nothing left to launch.
    pub fn is_finished(&self) -> bool {
        self.running.is_empty() && self.done_launching()
    }

    /// Final per-model counts.
    pub fn report(mut self) -> BatchReport {
        let mut seen = vec![];
        let appearances = self
            .pool
            .iter()
            .map(|e| e.model.id().to_owned())
            .filter(|id| {
                let new = !seen.contains(id);
                seen.push(id.clone());
                new
            })
            .map(|id| {
                let n = self.tracker.appearances_of(&id);
                (id, n)
            })
            .collect::<Vec<_>>();
        let short_of_target = appearances
            .iter()
            .filter(|(_, n)| *n < self.targets.min_appearances)
            .map(|(id, _)| id.clone())
            .collect();
        self.matches.sort_by_key(|m| m.index);
        info!(matches = self.matches.len(), ?appearances, "batch finished");

        BatchReport {
            matches: self.matches,
            appearances,
            short_of_target,
            aborted: self.aborted,
            crashed: self.crashed,
            tracker: self.tracker,
        }
    }

    fn done_launching(&self) -> bool {
        self.stopped
            || self.aborted.is_some()
            || self.launched >= self.targets.max_games
            || self.pool.iter().all(|e| {
                self.effective_total(e.model.id()) >= u64::from(self.targets.min_appearances)
            })
    }

    /// Appearances booked plus seats in matches still running.
    fn effective_total(&self, model: &str) -> u64 {
        let running = self
            .running
            .values()
            .map(|roster| roster.iter().filter(|m| *m == model).count() as u64)
            .sum::<u64>();
        u64::from(self.tracker.appearances_of(model)) + running
    }

    /// Last round `model` played or was launched in.
    fn last_round(&self, model: &str) -> Option<u64> {
        let launched = self
            .running
            .iter()
            .filter(|(_, roster)| roster.iter().any(|m| m == model))
            .map(|(index, _)| *index)
            .max();
        let played = self.tracker.usage_of(model).and_then(|u| u.last_round);
        launched.max(played)
    }

    fn next_match(&mut self) -> MatchSettings {
        let index = self.first_round + self.launched;
        let overdue_models = self
            .tracker
            .models_below_threshold(self.targets.threshold_rounds, index);

        // (pool position, rounds since last appearance, effective total)
        let candidates = self
            .pool
            .iter()
            .enumerate()
            .map(|(i, e)| {
                let id = e.model.id();
                let since = self.last_round(id).map(|last| index.saturating_sub(last));
                (i, since, self.effective_total(id))
            })
            .collect::<Vec<_>>();

        let mut overdue = candidates
            .iter()
            .filter(|(i, since, _)| {
                let id = self.pool[*i].model.id();
                overdue_models.iter().any(|m| m == id)
                    && since.map_or(true, |s| s > self.targets.threshold_rounds)
            })
            .copied()
            .collect::<Vec<_>>();
        overdue.sort_by_key(|(i, since, total)| (Reverse(since.unwrap_or(u64::MAX)), *total, *i));

        let mut rest = candidates
            .iter()
            .filter(|c| !overdue.iter().any(|o| o.0 == c.0))
            .copied()
            .collect::<Vec<_>>();
        rest.sort_by_key(|(i, _, total)| (*total, *i));

        let mut picked = overdue
            .into_iter()
            .chain(rest)
            .take(self.seats)
            .map(|(i, _, _)| i)
            .collect::<Vec<_>>();
        // seat order follows the pool order
        picked.sort_unstable();

        let roster = picked.into_iter().map(|i| self.pool[i].clone()).collect();
        MatchSettings {
            index,
            match_id: format!("{}-{index:05}", self.variant),
            roster,
            seed: self.seed ^ index.wrapping_mul(0x9E37_79B9_7F4A_7C15),
        }
    }
}
