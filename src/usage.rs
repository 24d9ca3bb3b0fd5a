//! Per-model appearance bookkeeping used for fair roster selection.
//!
//! A "round" here is a batch round: the index of the match in the batch. The tracker is only
//! touched from the scheduler's coordination thread, between match launches, so it needs no
//! locking.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
};

use time::OffsetDateTime;

use crate::record::RecordEntry;

/// Source of wall-clock timestamps.
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> OffsetDateTime;
}

/// Real time, in the local offset when available.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
    }
}

/// Clock moved by hand, for tests and replays.
#[derive(Debug, Clone, Default)]
pub struct ManualClock(Arc<AtomicI64>);

impl ManualClock {
    /// Clock stopped at `unix_seconds`.
    pub fn at(unix_seconds: i64) -> Self {
        Self(Arc::new(AtomicI64::new(unix_seconds)))
    }

    /// Moves every clone of this clock forward.
    pub fn advance(&self, seconds: i64) {
        self.0.fetch_add(seconds, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(self.0.load(Ordering::Relaxed))
            .unwrap_or(OffsetDateTime::UNIX_EPOCH)
    }
}

/// Usage of one model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageRecord {
    /// All appearances since the tracker was created.
    pub total: u32,
    /// Appearances within the rolling window. Never above `total`.
    pub in_window: u32,
    /// Batch round of the latest appearance.
    pub last_round: Option<u64>,
    /// Wall-clock time of the latest appearance.
    pub last_seen: Option<OffsetDateTime>,
}

/// Process-wide record of which model played when.
pub struct UsageTracker {
    models: Vec<String>,
    window: u64,
    records: HashMap<String, UsageRecord>,
    history: HashMap<String, VecDeque<u64>>,
    clock: Arc<dyn Clock>,
}

impl UsageTracker {
    /// Tracker for `models` (configuration order matters for tie-breaking) with a rolling
    /// window of `window` rounds.
    pub fn new(models: Vec<String>, window: u64, clock: Arc<dyn Clock>) -> Self {
        let records = models
            .iter()
            .map(|m| (m.clone(), UsageRecord::default()))
            .collect();
        Self {
            models,
            window,
            records,
            history: HashMap::new(),
            clock,
        }
    }

    /// Rebuilds a tracker by replaying the `Appearance` entries of game records.
    pub fn replay<'a>(
        models: Vec<String>,
        window: u64,
        clock: Arc<dyn Clock>,
        entries: impl IntoIterator<Item = &'a RecordEntry>,
    ) -> Self {
        let mut tracker = Self::new(models, window, clock);
        for entry in entries {
            if let RecordEntry::Appearance { model, round, .. } = entry {
                tracker.record_appearance(model, *round);
            }
        }
        tracker
    }

    /// Configured models, in configuration order.
    pub fn models(&self) -> &[String] {
        &self.models
    }

    /// Counts one appearance of `model` in batch round `round`.
    ///
    /// Unknown models are added at the end of the configuration order.
    pub fn record_appearance(&mut self, model: &str, round: u64) {
        if !self.records.contains_key(model) {
            self.models.push(model.to_owned());
        }
        let now = self.clock.now();
        let record = self.records.entry(model.to_owned()).or_default();
        record.total += 1;
        record.last_round = Some(record.last_round.map_or(round, |r| r.max(round)));
        record.last_seen = Some(now);
        self.history.entry(model.to_owned()).or_default().push_back(round);

        let latest = self.latest_round().unwrap_or(round);
        self.prune(latest);
    }

    /// Total appearances of `model`.
    pub fn appearances_of(&self, model: &str) -> u32 {
        self.records.get(model).map_or(0, |r| r.total)
    }

    /// Usage of `model`, if configured.
    pub fn usage_of(&self, model: &str) -> Option<&UsageRecord> {
        self.records.get(model)
    }

    /// Models whose last appearance is more than `threshold` rounds behind `current_round`,
    /// or which never appeared. Configuration order.
    ///
    /// Also rolls the window forward so that it ends on the round before `current_round`.
    pub fn models_below_threshold(&mut self, threshold: u64, current_round: u64) -> Vec<String> {
        if let Some(last_played) = current_round.checked_sub(1) {
            self.prune(self.latest_round().map_or(last_played, |r| r.max(last_played)));
        }
        self.models
            .iter()
            .filter(|m| match self.records.get(*m).and_then(|r| r.last_round) {
                None => true,
                Some(last) => current_round.saturating_sub(last) > threshold,
            })
            .cloned()
            .collect()
    }

    /// Rounds since `model` last appeared, `None` if it never did.
    pub fn rounds_since(&self, model: &str, current_round: u64) -> Option<u64> {
        self.records
            .get(model)
            .and_then(|r| r.last_round)
            .map(|last| current_round.saturating_sub(last))
    }

    /// Most recent batch round any model appeared in.
    pub fn latest_round(&self) -> Option<u64> {
        self.records.values().filter_map(|r| r.last_round).max()
    }

    /// Keeps the appearances of the `window` rounds ending on `last_played`, inclusive.
    fn prune(&mut self, last_played: u64) {
        for (model, rounds) in self.history.iter_mut() {
            match self.window.checked_sub(1) {
                // matches finish out of order, so the history is not sorted
                Some(span) => rounds.retain(|r| *r >= last_played.saturating_sub(span)),
                None => rounds.clear(),
            }
            if let Some(record) = self.records.get_mut(model) {
                record.in_window = rounds.len() as u32;
            }
        }
    }
}

impl std::fmt::Debug for UsageTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsageTracker")
            .field("window", &self.window)
            .field("records", &self.records)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(window: u64) -> (UsageTracker, ManualClock) {
        let clock = ManualClock::at(1_700_000_000);
        let models = ["A", "B", "C"].map(String::from).to_vec();
        (UsageTracker::new(models, window, Arc::new(clock.clone())), clock)
    }

    #[test]
    fn counts_and_timestamps() {
        let (mut t, clock) = tracker(10);
        t.record_appearance("A", 1);
        clock.advance(60);
        t.record_appearance("A", 2);
        assert_eq!(t.appearances_of("A"), 2);
        assert_eq!(t.appearances_of("B"), 0);
        let usage = t.usage_of("A").unwrap();
        assert_eq!(usage.last_round, Some(2));
        assert_eq!(usage.last_seen.unwrap().unix_timestamp(), 1_700_000_060);
    }

    #[test]
    fn never_used_models_are_below_threshold() {
        let (mut t, _) = tracker(3);
        t.record_appearance("B", 0);
        assert_eq!(t.models_below_threshold(3, 1), vec!["A", "C"]);
    }

    #[test]
    fn overdue_models() {
        let (mut t, _) = tracker(3);
        t.record_appearance("A", 0);
        t.record_appearance("B", 2);
        t.record_appearance("C", 4);
        // A is 5 behind, B is 3 behind (not more than 3)
        assert_eq!(t.models_below_threshold(3, 5), vec!["A"]);
        assert_eq!(t.rounds_since("B", 5), Some(3));
    }

    #[test]
    fn window_rolls_over() {
        let (mut t, _) = tracker(2);
        for round in 0..5 {
            t.record_appearance("A", round);
        }
        let usage = t.usage_of("A").unwrap();
        assert_eq!(usage.total, 5);
        assert!(usage.in_window <= usage.total);
        assert_eq!(usage.in_window, 2); // rounds 3 and 4

        // querying the next round does not move the window
        t.models_below_threshold(2, 5);
        assert_eq!(t.usage_of("A").unwrap().in_window, 2);

        t.models_below_threshold(2, 10);
        assert_eq!(t.usage_of("A").unwrap().in_window, 0);
        assert_eq!(t.appearances_of("A"), 5);
    }

    #[test]
    fn late_results_stay_in_the_window() {
        let (mut t, _) = tracker(3);
        t.record_appearance("A", 4);
        t.record_appearance("A", 2);
        t.record_appearance("A", 1);
        assert_eq!(t.usage_of("A").unwrap().in_window, 2); // rounds 4 and 2
        assert_eq!(t.usage_of("A").unwrap().last_round, Some(4));
    }

    #[test]
    fn unknown_models_are_appended() {
        let (mut t, _) = tracker(2);
        t.record_appearance("D", 0);
        assert_eq!(t.models(), ["A", "B", "C", "D"]);
    }
}
