//! Runs one match of a batch, from roster to appearance entries.

use std::{fmt::Display, sync::Arc};

use tracing::{instrument, warn};

use crate::{
    agent_proxy::AgentProxy,
    engine::{EngineConfig, GameEngine, MatchSummary},
    error::ConfigurationError,
    limits::Limits,
    model::ModelEntry,
    record::{NullSink, RecordEntry, RecordSink, RecordStore},
    rules::RuleSet,
    seat::SeatSpec,
};

/// Everything needed to launch one match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchSettings {
    /// Launch order in the batch, also the batch round of the match.
    pub index: u64,
    /// Identifier of the match record.
    pub match_id: String,
    /// Seated models, in seat order.
    pub roster: Vec<ModelEntry>,
    /// Seed of the match RNG.
    pub seed: u64,
}

impl Display for MatchSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names = self
            .roster
            .iter()
            .map(ModelEntry::seat_name)
            .collect::<Vec<_>>()
            .join(" VS ");
        write!(f, "[{names}]")
    }
}

/// How a match went.
#[derive(Debug, Clone)]
pub enum MatchOutcome {
    /// Played to a winner, a draw, or a forced stop.
    Finished(MatchSummary),
    /// Rejected by the rule set before or during play.
    Aborted(ConfigurationError),
    /// The match thread panicked.
    Crashed(String),
}

/// Sent back to the batch loop once a match is over.
#[derive(Debug, Clone)]
pub struct MatchReport {
    /// What was launched.
    pub settings: MatchSettings,
    /// How it ended.
    pub outcome: MatchOutcome,
}

/// Seats the roster, plays the match and appends one `Appearance` entry per participant.
///
/// A record store that cannot be opened does not prevent the match from running.
#[instrument(skip_all, fields(match_id = %settings.match_id))]
pub fn run_match<R: RuleSet>(
    settings: &MatchSettings,
    rules: Arc<R>,
    proxy: Arc<AgentProxy>,
    store: &dyn RecordStore,
    limits: &Limits,
    reflection: bool,
) -> MatchOutcome {
    let record: Box<dyn RecordSink> = match store.open(&settings.match_id) {
        Ok(sink) => sink,
        Err(e) => {
            warn!(error = %e, "could not open game record, playing without one");
            Box::new(NullSink)
        }
    };
    let roster = settings
        .roster
        .iter()
        .map(|entry| SeatSpec {
            name: entry.seat_name().to_owned(),
            model: entry.model.clone(),
        })
        .collect();
    let config = EngineConfig {
        policy: limits.retry_policy(),
        reflection,
        seed: settings.seed,
    };

    let mut engine = match GameEngine::start(&settings.match_id, roster, rules, proxy, record, config) {
        Ok(engine) => engine,
        Err(e) => return MatchOutcome::Aborted(e),
    };
    let summary = match engine.run(limits.max_rounds(), limits.max_match_duration()) {
        Ok(summary) => summary,
        Err(e) => return MatchOutcome::Aborted(e),
    };

    let mut record = engine.into_record();
    for seat in summary.participants() {
        let entry = RecordEntry::Appearance {
            model: seat.model.clone(),
            seat: seat.name.clone(),
            round: settings.index,
        };
        if let Err(e) = record.append(&entry) {
            warn!(error = %e, "could not write appearance");
        }
    }
    MatchOutcome::Finished(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::TransportError,
        record::MemoryStore,
        rules::mafia::MafiaRules,
        transport::{ChatMessage, Completion, ProviderRouter},
    };

    fn settings(models: &[&str]) -> MatchSettings {
        MatchSettings {
            index: 7,
            match_id: "mafia-00007".to_owned(),
            roster: models.iter().map(|m| ModelEntry::new(*m)).collect(),
            seed: 1,
        }
    }

    fn silent() -> Arc<AgentProxy> {
        Arc::new(AgentProxy::new(Arc::new(ProviderRouter::single(Arc::new(
            |_: &str, _: &[ChatMessage]| -> Result<Completion, TransportError> {
                Ok(Completion::text(""))
            },
        )))))
    }

    fn limits() -> Limits {
        Limits::builder()
            .with_max_attempts(1)
            .with_retry_delay(std::time::Duration::ZERO)
            .with_max_rounds(2)
            .build()
            .unwrap()
    }

    #[test]
    fn display_lists_seat_names() {
        let mut s = settings(&["llama3", "openai/gpt-4o"]);
        s.roster[1] = s.roster[1].clone().with_seat_name("Gus");
        assert_eq!(s.to_string(), "[llama3 VS Gus]");
    }

    #[test]
    fn finished_match_books_appearances_at_its_index() {
        let store = MemoryStore::new();
        let outcome = run_match(
            &settings(&["a", "b", "c", "d", "e"]),
            Arc::new(MafiaRules::new()),
            silent(),
            &store,
            &limits(),
            false,
        );

        let summary = match outcome {
            MatchOutcome::Finished(summary) => summary,
            other => panic!("match did not finish: {other:?}"),
        };
        let booked = store
            .entries("mafia-00007")
            .into_iter()
            .filter_map(|e| match e {
                RecordEntry::Appearance { model, round, .. } => Some((model, round)),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(booked.len(), summary.participants().count());
        assert!(booked.iter().all(|(_, round)| *round == 7));
    }

    #[test]
    fn roster_outside_bounds_is_aborted() {
        let outcome = run_match(
            &settings(&["a", "b"]),
            Arc::new(MafiaRules::new()),
            silent(),
            &MemoryStore::new(),
            &limits(),
            false,
        );
        assert!(matches!(
            outcome,
            MatchOutcome::Aborted(ConfigurationError::SeatCount { got: 2, .. })
        ));
    }
}
