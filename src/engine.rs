//! Match state machine.
//!
//! A [`GameEngine`] owns the seats and variant state of one match and drives a [`RuleSet`]
//! through its phase cycle. Each [`advance`](GameEngine::advance) runs exactly one phase:
//! actors are asked concurrently through the [`AgentProxy`], every answer (genuine or
//! fallback) is resolved at once, then damage, notices and the phase transition are applied.
//!
//! ```text
//! start ─► phases[0] ─► phases[1] ─► … ─► phases[n-1] ─┐
//!              ▲                                       │ round + 1
//!              └───────────────────────────────────────┘
//!          any phase ─► Ended (terminal, round/time limit, cancelled)
//! ```

use std::{
    collections::BTreeSet,
    fmt::Display,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use rand::{rngs::SmallRng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::{
    agent_proxy::{AgentProxy, Answer, CallContext},
    error::ConfigurationError,
    record::{RecordEntry, RecordSink, SeatRecord},
    retry::{Decided, Provenance, RetryPolicy},
    rules::{Action, LegalSet, Move, PhaseId, RuleSet, SeatId, Setup, Transition, Winner},
    schema::{OpinionSchema, ResponseSchema},
    seat::{living_others, Seat, SeatSpec},
    transport::ChatMessage,
};

/// Private notes shown at the top of every prompt.
const RECENT_NOTES: usize = 5;
/// Public events shown at the top of every prompt.
const RECENT_EVENTS: usize = 8;

/// Per-match knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Retry bounds of every agent call.
    pub policy: RetryPolicy,
    /// Ask every living seat for updated opinions at the end of each round.
    pub reflection: bool,
    /// Seed of the match RNG (roles, decks, chambers...).
    pub seed: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            policy: RetryPolicy::default(),
            reflection: false,
            seed: 0,
        }
    }
}

/// Why a match ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopReason {
    /// The rule set declared a winner.
    Completed,
    /// More rounds than allowed.
    RoundLimit,
    /// Wall-clock limit reached.
    TimeLimit,
    /// The batch (or the caller) cancelled the match.
    Cancelled,
}

impl Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            StopReason::Completed => "completed",
            StopReason::RoundLimit => "round-limit",
            StopReason::TimeLimit => "time-limit",
            StopReason::Cancelled => "cancelled",
        })
    }
}

/// How one seat fared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeatSummary {
    /// Display name, after deduplication.
    pub name: String,
    /// Model identifier.
    pub model: String,
    /// Role name.
    pub role: String,
    /// Faction the role plays for.
    pub faction: String,
    /// Lives left at the end.
    pub life: u32,
    /// Actions taken, fallbacks included.
    pub actions: u32,
    /// Actions that were fallbacks.
    pub fallbacks: u32,
}

/// Result of a finished match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchSummary {
    /// Identifier of the match record.
    pub match_id: String,
    /// Winner, forced by life totals when a limit stopped the match.
    pub winner: Winner,
    /// Why the match ended.
    pub stop_reason: StopReason,
    /// Rounds actually played.
    pub rounds: u32,
    /// Seats in roster order.
    pub seats: Vec<SeatSummary>,
}

impl MatchSummary {
    /// Seats that took at least one action.
    pub fn participants(&self) -> impl Iterator<Item = &SeatSummary> {
        self.seats.iter().filter(|s| s.actions > 0)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Tally {
    actions: u32,
    fallbacks: u32,
}

struct Request<S: ResponseSchema> {
    seat: SeatId,
    schema: S,
    fallback: S::Output,
    messages: Vec<ChatMessage>,
    call: CallContext,
}

/// One match in progress.
pub struct GameEngine<R: RuleSet> {
    match_id: String,
    rules: Arc<R>,
    proxy: Arc<AgentProxy>,
    record: Box<dyn RecordSink>,
    config: EngineConfig,
    seats: Vec<Seat>,
    state: R::State,
    rng: SmallRng,
    phase_index: usize,
    round: u32,
    rounds_played: u32,
    started: Instant,
    events: Vec<String>,
    tallies: Vec<Tally>,
    ended: Option<(Winner, StopReason)>,
}

impl<R: RuleSet> GameEngine<R> {
    /// Seats `roster`, deals roles and enters the first phase.
    ///
    /// Duplicate display names get a numeric suffix so every seat stays addressable.
    ///
    /// # Errors
    /// [`ConfigurationError`] when the roster does not fit the rules, the phase cycle is
    /// empty, or setup deals the wrong number of roles.
    pub fn start(
        match_id: impl Into<String>,
        roster: Vec<SeatSpec>,
        rules: Arc<R>,
        proxy: Arc<AgentProxy>,
        record: Box<dyn RecordSink>,
        config: EngineConfig,
    ) -> Result<Self, ConfigurationError> {
        let match_id = match_id.into();

        let bounds = rules.seat_bounds();
        if !bounds.contains(&roster.len()) {
            return Err(ConfigurationError::SeatCount {
                variant: rules.variant().to_owned(),
                got: roster.len(),
                min: *bounds.start(),
                max: *bounds.end(),
            });
        }
        if rules.phases().is_empty() {
            return Err(ConfigurationError::EmptyPhaseCycle {
                variant: rules.variant().to_owned(),
            });
        }

        let mut seats = unique_names(roster)
            .into_iter()
            .enumerate()
            .map(|(i, spec)| Seat::new(SeatId(i), spec, rules.initial_lives()))
            .collect::<Vec<_>>();

        let mut rng = SmallRng::seed_from_u64(config.seed);
        let Setup { roles, state } = rules.setup(&seats, &mut rng)?;
        if roles.len() != seats.len() {
            return Err(ConfigurationError::RoleCount {
                roles: roles.len(),
                seats: seats.len(),
            });
        }
        for (seat, role) in seats.iter_mut().zip(roles) {
            seat.assign_role(role);
        }

        let tallies = vec![Tally::default(); seats.len()];
        let mut engine = GameEngine {
            match_id,
            rules,
            proxy,
            record,
            config,
            seats,
            state,
            rng,
            phase_index: 0,
            round: 1,
            rounds_played: 0,
            started: Instant::now(),
            events: vec![],
            tallies,
            ended: None,
        };

        engine.write(RecordEntry::MatchStarted {
            match_id: engine.match_id.clone(),
            variant: engine.rules.variant().to_owned(),
            seed: config.seed,
            seats: engine
                .seats
                .iter()
                .map(|s| SeatRecord {
                    id: s.id().0,
                    name: s.name().to_owned(),
                    model: s.model().id().to_owned(),
                    role: s.role().name.clone(),
                    faction: s.role().faction.clone(),
                })
                .collect(),
        });
        info!(
            match_id = %engine.match_id,
            variant = engine.rules.variant(),
            seats = engine.seats.len(),
            seed = config.seed,
            "match started"
        );

        if let Some(winner) = engine.rules.is_terminal(&engine.seats, &engine.state) {
            engine.finish(winner, StopReason::Completed);
        }
        Ok(engine)
    }

    /// Identifier of the match record.
    pub fn match_id(&self) -> &str {
        &self.match_id
    }

    /// Current round, starting at 1.
    pub fn round(&self) -> u32 {
        self.round
    }

    /// The active phase.
    pub fn phase(&self) -> PhaseId {
        self.rules.phases()[self.phase_index]
    }

    /// Seats in roster order.
    pub fn seats(&self) -> &[Seat] {
        &self.seats
    }

    /// Variant state.
    pub fn state(&self) -> &R::State {
        &self.state
    }

    /// True once a winner is known or a limit was hit.
    pub fn is_ended(&self) -> bool {
        self.ended.is_some()
    }

    /// Winner and stop reason once ended.
    pub fn outcome(&self) -> Option<(&Winner, StopReason)> {
        self.ended.as_ref().map(|(w, r)| (w, *r))
    }

    /// Runs one phase. Does nothing once the match has ended.
    ///
    /// # Errors
    /// [`ConfigurationError`] when the rules ask a seat to act with nothing legal to do, give a
    /// fallback outside the legal set, or jump to an undeclared phase.
    #[instrument(skip_all, fields(match_id = %self.match_id, round = self.round))]
    pub fn advance(&mut self) -> Result<(), ConfigurationError> {
        if self.ended.is_some() {
            return Ok(());
        }
        let phase = self.phase();
        let round = self.round;
        self.rounds_played = round;
        self.write(RecordEntry::PhaseStarted {
            round,
            phase: phase.name().to_owned(),
        });
        debug!(%phase, "phase started");

        let mut requests = vec![];
        for id in self.actors(phase) {
            let seat = &self.seats[id.0];
            let legal = self
                .rules
                .legal_actions(phase, seat, &self.seats, &self.state);
            if legal.is_empty() {
                return Err(ConfigurationError::NoLegalActions {
                    phase: phase.name().to_owned(),
                    seat: seat.name().to_owned(),
                });
            }
            let fallback = self
                .rules
                .fallback(phase, seat, &legal)
                .filter(|m| legal.admits(m))
                .ok_or_else(|| ConfigurationError::IllegalFallback {
                    phase: phase.name().to_owned(),
                    seat: seat.name().to_owned(),
                })?;
            let prompt = self.rules.prompt(phase, seat, &self.seats, &self.state);
            requests.push(Request {
                seat: id,
                messages: self.messages(seat, prompt),
                call: self.call(seat, phase.name()),
                schema: legal,
                fallback,
            });
        }

        let answers = ask_all(&self.proxy, &self.config.policy, &requests);
        let mut actions = Vec::with_capacity(answers.len());
        for (request, answer) in requests.into_iter().zip(answers) {
            let action = self.to_action(phase, request, answer);
            let tally = &mut self.tallies[action.seat.0];
            tally.actions += 1;
            if action.provenance == Provenance::Fallback {
                tally.fallbacks += 1;
            }
            self.write(RecordEntry::Action(action.clone()));
            actions.push(action);
        }

        let resolution =
            self.rules
                .resolve(phase, &actions, &self.seats, &mut self.state, &mut self.rng);

        let mut eliminated = vec![];
        for (id, amount) in &resolution.damage {
            if let Some(seat) = self.seats.get_mut(id.0) {
                if seat.damage(*amount) {
                    eliminated.push(seat.name().to_owned());
                }
            }
        }
        for notice in &resolution.notices {
            if let Some(seat) = self.seats.get_mut(notice.seat.0) {
                seat.push_note(notice.text.clone());
            }
        }
        for event in &resolution.events {
            debug!(%phase, event, "event");
            self.events.push(format!("Round {round}, {phase}: {event}"));
        }
        for name in &eliminated {
            info!(seat = %name, "seat eliminated");
            self.events.push(format!("Round {round}: {name} is out"));
        }
        self.write(RecordEntry::Resolution {
            round,
            phase: phase.name().to_owned(),
            events: resolution.events.clone(),
            eliminated,
        });

        let phases = self.rules.phases();
        let next = match resolution.transition {
            Transition::Advance => self.phase_index + 1,
            Transition::To(target) => phases.iter().position(|p| *p == target).ok_or_else(|| {
                ConfigurationError::UnknownPhase {
                    phase: target.name().to_owned(),
                }
            })?,
        };
        let new_round = next <= self.phase_index || next >= phases.len();
        self.phase_index = if next >= phases.len() { 0 } else { next };

        if let Some(winner) = self.rules.is_terminal(&self.seats, &self.state) {
            self.finish(winner, StopReason::Completed);
            return Ok(());
        }
        if new_round {
            self.round += 1;
            if self.config.reflection {
                self.reflect();
            }
        }
        Ok(())
    }

    /// Advances until the match ends, more than `max_rounds` rounds were played,
    /// `max_duration` elapsed, or the proxy's cancel token fired.
    ///
    /// # Errors
    /// See [`advance`](Self::advance).
    #[instrument(skip_all, fields(match_id = %self.match_id))]
    pub fn run(
        &mut self,
        max_rounds: u32,
        max_duration: Duration,
    ) -> Result<MatchSummary, ConfigurationError> {
        while self.ended.is_none() {
            if self.proxy.cancel_token().is_cancelled() {
                self.force_stop(StopReason::Cancelled);
            } else if self.round > max_rounds {
                self.force_stop(StopReason::RoundLimit);
            } else if self.started.elapsed() >= max_duration {
                self.force_stop(StopReason::TimeLimit);
            } else {
                self.advance()?;
            }
        }
        Ok(self.summary())
    }

    /// Snapshot of the seats and, once ended, the outcome. An unfinished match reads as a draw
    /// stopped by cancellation.
    pub fn summary(&self) -> MatchSummary {
        let (winner, stop_reason) = self
            .ended
            .clone()
            .unwrap_or((Winner::Draw, StopReason::Cancelled));
        MatchSummary {
            match_id: self.match_id.clone(),
            winner,
            stop_reason,
            rounds: self.rounds_played,
            seats: self
                .seats
                .iter()
                .zip(&self.tallies)
                .map(|(s, t)| SeatSummary {
                    name: s.name().to_owned(),
                    model: s.model().id().to_owned(),
                    role: s.role().name.clone(),
                    faction: s.role().faction.clone(),
                    life: s.life(),
                    actions: t.actions,
                    fallbacks: t.fallbacks,
                })
                .collect(),
        }
    }

    /// Gives the record sink back, e.g. to append batch entries after the match.
    pub fn into_record(self) -> Box<dyn RecordSink> {
        self.record
    }

    fn actors(&self, phase: PhaseId) -> Vec<SeatId> {
        let mut seen = BTreeSet::new();
        self.rules
            .actors(phase, &self.seats, &self.state)
            .into_iter()
            .filter(|id| self.seats.get(id.0).is_some_and(Seat::is_alive) && seen.insert(*id))
            .collect()
    }

    fn to_action(&self, phase: PhaseId, request: Request<LegalSet>, answer: Answer<Move>) -> Action {
        let decision = match answer.decision {
            Decided::Genuine(m) if request.schema.admits(&m) => Decided::Genuine(m),
            Decided::Genuine(m) => {
                warn!(seat = %request.call.seat, decision = ?m, "answer outside legal set");
                Decided::Fallback(request.fallback)
            }
            fallback => fallback,
        };
        Action {
            seat: request.seat,
            phase: phase.name().to_owned(),
            round: self.round,
            provenance: decision.provenance(),
            decision: decision.into_value(),
            raw: answer.raw,
            attempts: answer.attempts,
        }
    }

    fn messages(&self, seat: &Seat, prompt: String) -> Vec<ChatMessage> {
        let mut context = String::new();
        let notes = seat.recent_notes(RECENT_NOTES);
        if !notes.is_empty() {
            context.push_str("PRIVATE INFO:\n");
            for note in notes {
                context.push_str(&format!("- {note}\n"));
            }
        }
        if !seat.opinions().is_empty() {
            context.push_str("Your impressions so far:\n");
            for (name, opinion) in seat.opinions() {
                context.push_str(&format!("- {name}: {opinion}\n"));
            }
        }
        let events = &self.events[self.events.len().saturating_sub(RECENT_EVENTS)..];
        if !events.is_empty() {
            context.push_str("Recent events:\n");
            for event in events {
                context.push_str(&format!("- {event}\n"));
            }
        }
        if !context.is_empty() {
            context.push('\n');
        }
        context.push_str(&prompt);

        vec![
            ChatMessage::system(self.rules.briefing(seat, &self.seats)),
            ChatMessage::user(context),
        ]
    }

    fn call(&self, seat: &Seat, phase: &str) -> CallContext {
        CallContext {
            match_id: self.match_id.clone(),
            seat: seat.name().to_owned(),
            model: seat.model().clone(),
            phase: phase.to_owned(),
        }
    }

    /// End-of-round opinion refresh. Failures keep the previous opinions.
    fn reflect(&mut self) {
        let requests = self
            .seats
            .iter()
            .filter(|s| s.is_alive())
            .filter_map(|seat| {
                let others = living_others(&self.seats, seat.id())
                    .into_iter()
                    .map(|s| s.name().to_owned())
                    .collect::<Vec<_>>();
                if others.is_empty() {
                    return None;
                }
                let prompt = format!(
                    "Round {} is over. Update your impression of each remaining player.",
                    self.round - 1
                );
                Some(Request {
                    seat: seat.id(),
                    messages: self.messages(seat, prompt),
                    call: self.call(seat, "reflection"),
                    schema: OpinionSchema::new(others),
                    fallback: seat.opinions().clone(),
                })
            })
            .collect::<Vec<_>>();

        let answers = ask_all(&self.proxy, &self.config.policy, &requests);
        for (request, answer) in requests.iter().zip(answers) {
            self.seats[request.seat.0].update_opinions(answer.decision.into_value());
        }
    }

    fn force_stop(&mut self, reason: StopReason) {
        let winner = self.rules.forced_winner(&self.seats, &self.state);
        self.finish(winner, reason);
    }

    fn finish(&mut self, winner: Winner, reason: StopReason) {
        info!(%winner, %reason, rounds = self.rounds_played, "match ended");
        self.write(RecordEntry::MatchEnded {
            winner: winner.clone(),
            stop_reason: reason,
            rounds: self.rounds_played,
        });
        self.ended = Some((winner, reason));
    }

    fn write(&mut self, entry: RecordEntry) {
        if let Err(e) = self.record.append(&entry) {
            warn!(match_id = %self.match_id, error = %e, "could not write record entry");
        }
    }
}

/// Sends every request at once and waits for all answers, in request order.
fn ask_all<S>(
    proxy: &AgentProxy,
    policy: &RetryPolicy,
    requests: &[Request<S>],
) -> Vec<Answer<S::Output>>
where
    S: ResponseSchema,
    S::Output: Sync,
{
    thread::scope(|scope| {
        let handles = requests
            .iter()
            .map(|r| {
                scope.spawn(move || {
                    proxy.request(&r.messages, &r.schema, &r.call, policy, r.fallback.clone())
                })
            })
            .collect::<Vec<_>>();

        handles
            .into_iter()
            .zip(requests)
            .map(|(handle, r)| {
                handle.join().unwrap_or_else(|_| {
                    warn!(seat = %r.call.seat, "agent call panicked, using fallback");
                    Answer {
                        decision: Decided::Fallback(r.fallback.clone()),
                        raw: None,
                        reasoning: None,
                        attempts: 0,
                    }
                })
            })
            .collect()
    })
}

/// Suffixes repeated display names with " (2)", " (3)"...
/// Labels rule sets offer next to seat names. A seat never takes one of them as its name.
const RESERVED_LABELS: [&str; 3] = ["abstain", "nobody", "pass"];

fn unique_names(roster: Vec<SeatSpec>) -> Vec<SeatSpec> {
    let mut taken = RESERVED_LABELS.map(str::to_owned).into_iter().collect::<BTreeSet<_>>();
    roster
        .into_iter()
        .map(|mut spec| {
            let base = spec.name.clone();
            let mut n = 1;
            while !taken.insert(spec.name.to_lowercase()) {
                n += 1;
                spec.name = format!("{base} ({n})");
            }
            spec
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::{
        error::TransportError,
        record::{MemoryStore, NullSink, RecordStore},
        rules::{mafia::MafiaRules, Choice, Resolution},
        seat::Role,
        transport::{Completion, ProviderRouter, Transport},
    };

    /// Two phases; everybody names someone in "point", "skip" jumps back to "point".
    struct Pointing {
        phases: Vec<PhaseId>,
    }

    const POINT: PhaseId = PhaseId("point");
    const SKIP: PhaseId = PhaseId("skip");

    impl RuleSet for Pointing {
        type State = u32;

        fn variant(&self) -> &'static str {
            "pointing"
        }

        fn seat_bounds(&self) -> std::ops::RangeInclusive<usize> {
            2..=4
        }

        fn phases(&self) -> &[PhaseId] {
            &self.phases
        }

        fn initial_lives(&self) -> u32 {
            3
        }

        fn setup(&self, seats: &[Seat], _rng: &mut SmallRng) -> Result<Setup<u32>, ConfigurationError> {
            Ok(Setup {
                roles: seats.iter().map(|s| Role::plain(s.name())).collect(),
                state: 0,
            })
        }

        fn actors(&self, _phase: PhaseId, seats: &[Seat], _state: &u32) -> Vec<SeatId> {
            // duplicates and dead seats are the engine's problem
            seats.iter().chain(seats).map(Seat::id).collect()
        }

        fn legal_actions(&self, _phase: PhaseId, seat: &Seat, seats: &[Seat], _state: &u32) -> LegalSet {
            LegalSet::seats(living_others(seats, seat.id()), Move::Target)
                .with_choice(Choice::new("nobody", Move::Pass))
        }

        fn briefing(&self, seat: &Seat, _seats: &[Seat]) -> String {
            format!("You are {}", seat.name())
        }

        fn prompt(&self, phase: PhaseId, _seat: &Seat, _seats: &[Seat], _state: &u32) -> String {
            format!("Phase {phase}")
        }

        fn fallback(&self, _phase: PhaseId, _seat: &Seat, _legal: &LegalSet) -> Option<Move> {
            Some(Move::Pass)
        }

        fn resolve(
            &self,
            phase: PhaseId,
            actions: &[Action],
            _seats: &[Seat],
            state: &mut u32,
            _rng: &mut SmallRng,
        ) -> Resolution {
            *state += 1;
            let resolution = actions.iter().fold(Resolution::advance(), |r, a| match a.decision {
                Move::Target(t) => r.damage(t, 1).notice(a.seat, "you pointed"),
                _ => r,
            });
            if phase == SKIP {
                resolution.then(Transition::To(POINT))
            } else {
                resolution
            }
        }

        fn is_terminal(&self, seats: &[Seat], _state: &u32) -> Option<Winner> {
            let mut alive = seats.iter().filter(|s| s.is_alive());
            match (alive.next(), alive.next()) {
                (Some(s), None) => Some(Winner::Seat(s.name().to_owned())),
                (None, _) => Some(Winner::Draw),
                _ => None,
            }
        }
    }

    fn pointing() -> Arc<Pointing> {
        Arc::new(Pointing {
            phases: vec![POINT, SKIP],
        })
    }

    fn proxy(transport: Arc<dyn Transport>) -> Arc<AgentProxy> {
        Arc::new(AgentProxy::new(Arc::new(ProviderRouter::single(transport))))
    }

    fn answering(text: &'static str) -> Arc<AgentProxy> {
        proxy(Arc::new(move |_: &str, _: &[ChatMessage]| -> Result<Completion, TransportError> {
            Ok(Completion::text(text))
        }))
    }

    fn config() -> EngineConfig {
        EngineConfig {
            policy: RetryPolicy {
                call_timeout: Duration::from_millis(500),
                max_attempts: 2,
                delay: Duration::ZERO,
                budget: Duration::from_secs(2),
            },
            reflection: false,
            seed: 7,
        }
    }

    fn roster(names: &[&str]) -> Vec<SeatSpec> {
        names.iter().map(|n| SeatSpec::new(*n, "llama3")).collect()
    }

    #[test]
    fn rejects_bad_rosters() {
        let err = GameEngine::start(
            "m",
            roster(&["A"]),
            pointing(),
            answering("nobody"),
            Box::new(NullSink),
            config(),
        )
        .err();
        assert!(matches!(err, Some(ConfigurationError::SeatCount { got: 1, .. })));

        let err = GameEngine::start(
            "m",
            roster(&["A", "B"]),
            Arc::new(Pointing { phases: vec![] }),
            answering("nobody"),
            Box::new(NullSink),
            config(),
        )
        .err();
        assert!(matches!(err, Some(ConfigurationError::EmptyPhaseCycle { .. })));
    }

    #[test]
    fn duplicate_names_are_suffixed() {
        let engine = GameEngine::start(
            "m",
            roster(&["Ann", "ann", "Ann"]),
            pointing(),
            answering("nobody"),
            Box::new(NullSink),
            config(),
        )
        .unwrap();
        let names = engine.seats().iter().map(Seat::name).collect::<Vec<_>>();
        assert_eq!(names, ["Ann", "ann (2)", "Ann (3)"]);
    }

    #[test]
    fn seat_names_never_shadow_meta_choices() {
        let engine = GameEngine::start(
            "m",
            roster(&["Nobody", "abstain", "Bob"]),
            pointing(),
            answering("nobody"),
            Box::new(NullSink),
            config(),
        )
        .unwrap();
        let names = engine.seats().iter().map(Seat::name).collect::<Vec<_>>();
        assert_eq!(names, ["Nobody (2)", "abstain (2)", "Bob"]);

        let legal = LegalSet::seats(engine.seats(), |id| Move::Vote(Some(id)))
            .with_choice(Choice::new("nobody", Move::Pass));
        assert_eq!(legal.parse("{\"choice\": \"nobody\"}"), Ok(Move::Pass));
        assert_eq!(
            legal.parse("{\"choice\": \"Nobody (2)\"}"),
            Ok(Move::Vote(Some(SeatId(0))))
        );
    }

    #[test]
    fn jump_back_starts_a_new_round() {
        let store = MemoryStore::new();
        let mut engine = GameEngine::start(
            "m",
            roster(&["A", "B"]),
            pointing(),
            answering("nobody"),
            store.open("m").unwrap(),
            config(),
        )
        .unwrap();
        assert_eq!((engine.round(), engine.phase()), (1, POINT));
        engine.advance().unwrap();
        assert_eq!((engine.round(), engine.phase()), (1, SKIP));
        engine.advance().unwrap();
        assert_eq!((engine.round(), engine.phase()), (2, POINT));
        assert_eq!(*engine.state(), 2);

        // each seat acted once per phase despite being listed twice
        let actions = store
            .entries("m")
            .into_iter()
            .filter(|e| matches!(e, RecordEntry::Action(_)))
            .count();
        assert_eq!(actions, 4);
    }

    #[test]
    fn damage_notices_and_termination() {
        let store = MemoryStore::new();
        let mut engine = GameEngine::start(
            "m",
            roster(&["A", "B"]),
            pointing(),
            answering("{\"choice\": \"A\"}"),
            store.open("m").unwrap(),
            config(),
        )
        .unwrap();
        // B targets A every phase (A's own answer is illegal for A and falls back to Pass)
        let summary = engine.run(10, Duration::from_secs(30)).unwrap();
        assert_eq!(summary.winner, Winner::Seat("B".into()));
        assert_eq!(summary.stop_reason, StopReason::Completed);
        assert_eq!(engine.seats()[0].life(), 0);
        assert_eq!(engine.seats()[1].notes().len(), 3);
        assert_eq!(summary.seats[0].fallbacks, summary.seats[0].actions);
        assert_eq!(summary.seats[1].fallbacks, 0);

        let before = store.entries("m").len();
        engine.advance().unwrap();
        assert_eq!(store.entries("m").len(), before);
        assert!(matches!(
            store.entries("m").last(),
            Some(RecordEntry::MatchEnded { .. })
        ));
    }

    #[test]
    fn round_limit_uses_forced_winner() {
        let mut engine = GameEngine::start(
            "m",
            roster(&["A", "B", "C"]),
            pointing(),
            answering("nobody"),
            Box::new(NullSink),
            config(),
        )
        .unwrap();
        let summary = engine.run(3, Duration::from_secs(30)).unwrap();
        assert_eq!(summary.stop_reason, StopReason::RoundLimit);
        assert_eq!(summary.rounds, 3);
        // every seat kept its 3 lives: a three-way tie
        assert_eq!(summary.winner, Winner::Draw);
    }

    #[test]
    fn cancellation_stops_before_any_phase() {
        let proxy = answering("nobody");
        proxy.cancel_token().cancel();
        let mut engine = GameEngine::start(
            "m",
            roster(&["A", "B"]),
            pointing(),
            proxy,
            Box::new(NullSink),
            config(),
        )
        .unwrap();
        let summary = engine.run(10, Duration::from_secs(30)).unwrap();
        assert_eq!(summary.stop_reason, StopReason::Cancelled);
        assert_eq!(summary.rounds, 0);
        assert_eq!(summary.participants().count(), 0);
    }

    #[test]
    fn reflection_updates_opinions() {
        let seen = Arc::new(Mutex::new(vec![]));
        let log = seen.clone();
        let transport = move |_: &str, m: &[ChatMessage]| -> Result<Completion, TransportError> {
            let prompt = m.last().map(|m| m.content.clone()).unwrap_or_default();
            log.lock().unwrap().push(prompt.clone());
            if prompt.contains("impression of each") {
                Ok(Completion::text("{\"A\": \"shifty\", \"B\": \"calm\"}"))
            } else {
                Ok(Completion::text("nobody"))
            }
        };
        let mut engine = GameEngine::start(
            "m",
            roster(&["A", "B"]),
            pointing(),
            proxy(Arc::new(transport)),
            Box::new(NullSink),
            EngineConfig {
                reflection: true,
                ..config()
            },
        )
        .unwrap();
        engine.advance().unwrap();
        engine.advance().unwrap();
        assert_eq!(engine.seats()[0].opinions()["B"], "calm");
        assert_eq!(engine.seats()[1].opinions()["A"], "shifty");
        assert!(!engine.seats()[0].opinions().contains_key("A"));

        engine.advance().unwrap();
        let prompts = seen.lock().unwrap();
        assert!(prompts.last().unwrap().contains("Your impressions so far:"));
    }

    #[test]
    fn records_actions_with_provenance() {
        let store = MemoryStore::new();
        let mut engine = GameEngine::start(
            "m",
            roster(&["A", "B", "C", "D", "E"]),
            Arc::new(MafiaRules::new()),
            answering("gibberish"),
            store.open("m").unwrap(),
            config(),
        )
        .unwrap();
        engine.advance().unwrap();
        let fallbacks = store
            .entries("m")
            .into_iter()
            .filter_map(|e| match e {
                RecordEntry::Action(a) => Some(a),
                _ => None,
            })
            .inspect(|a| assert_eq!(a.raw.as_deref(), Some("gibberish")))
            .filter(|a| a.provenance == Provenance::Fallback && a.attempts == 2)
            .count();
        assert!(fallbacks > 0);
    }
}
