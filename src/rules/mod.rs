//! Traits and types a game variant implements to be driven by the [`GameEngine`].
//!
//! A [`RuleSet`] is pure policy: it declares the phase cycle, who acts in each phase, what
//! they may answer, and how a batch of actions resolves. It never talks to agents and never
//! touches seat lives directly; it returns a [`Resolution`] that the engine applies.
//!
//! [`GameEngine`]: crate::engine::GameEngine

use std::{collections::BTreeMap, fmt::Display, ops::RangeInclusive};

use rand::rngs::SmallRng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::{ConfigurationError, ValidationError},
    retry::Provenance,
    schema::{extract_json, string_field, FreeText, ResponseSchema},
    seat::{Role, Seat},
};

pub mod bluff;
pub mod clones;
pub mod election;
pub mod mafia;

/// Index of a seat in its match, in roster order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SeatId(pub usize);

impl Display for SeatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Name of a phase. Rule sets declare them as constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PhaseId(pub &'static str);

impl PhaseId {
    /// The constant's name.
    pub fn name(self) -> &'static str {
        self.0
    }
}

impl Display for PhaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

/// A decision, in every shape the supported variants need.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Move {
    /// Cards put face down, claimed to match the table rank.
    PlayCards(Vec<String>),
    /// Whether to call the previous play a lie.
    Challenge(bool),
    /// Ja (true) or Nein (false) on a proposed government.
    Ballot(bool),
    /// Elimination vote; `None` abstains.
    Vote(Option<SeatId>),
    /// Accuse a seat of being a traitor.
    Accuse(SeatId),
    /// Propose a seat for an office.
    Nominate(SeatId),
    /// Night or executive ability target.
    Target(SeatId),
    /// Policy card to throw away.
    Discard(String),
    /// Cooperate (false) or sabotage (true) during a mission.
    Sabotage(bool),
    /// Table talk.
    Speak(String),
    /// Do nothing.
    Pass,
}

/// One admissible answer of a [`LegalSet::Choose`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Choice {
    /// What the agent writes to pick this choice, matched case-insensitively.
    pub label: String,
    /// Decision this label stands for.
    pub action: Move,
}

impl Choice {
    /// Choice answered as `label`.
    pub fn new(label: impl Into<String>, action: Move) -> Self {
        Self {
            label: label.into(),
            action,
        }
    }
}

/// Everything a seat may answer in one phase. Doubles as the response schema of the call, so
/// an illegal answer is a validation failure that consumes a retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LegalSet {
    /// Pick exactly one labelled choice: `{"choice": "<label>"}`.
    Choose(Vec<Choice>),
    /// Play between `min` and `max` cards out of `hand`: `{"played_cards": [...]}`.
    Cards {
        /// Cards the seat holds.
        hand: Vec<String>,
        /// Fewest cards to play.
        min: usize,
        /// Most cards to play.
        max: usize,
    },
    /// Say something: `{"statement": "..."}`. [`Move::Pass`] is also admitted.
    Speak,
}

impl LegalSet {
    /// Choice between `choices`.
    pub fn choose(choices: impl IntoIterator<Item = Choice>) -> Self {
        LegalSet::Choose(choices.into_iter().collect())
    }

    /// Yes/no choice labelled by `yes` and `no`.
    pub fn binary(yes: &str, no: &str, make: fn(bool) -> Move) -> Self {
        LegalSet::Choose(vec![Choice::new(yes, make(true)), Choice::new(no, make(false))])
    }

    /// Choice among `seats`, labelled by their display names.
    pub fn seats<'a>(seats: impl IntoIterator<Item = &'a Seat>, make: fn(SeatId) -> Move) -> Self {
        LegalSet::Choose(
            seats
                .into_iter()
                .map(|s| Choice::new(s.name(), make(s.id())))
                .collect(),
        )
    }

    /// Adds one choice to a [`LegalSet::Choose`]; no-op otherwise.
    pub fn with_choice(mut self, choice: Choice) -> Self {
        if let LegalSet::Choose(choices) = &mut self {
            choices.push(choice);
        }
        self
    }

    /// True when nothing can be answered.
    pub fn is_empty(&self) -> bool {
        match self {
            LegalSet::Choose(choices) => choices.is_empty(),
            LegalSet::Cards { hand, min, max } => {
                hand.is_empty() || max < min || *max == 0 || hand.len() < *min
            }
            LegalSet::Speak => false,
        }
    }

    /// First admissible decision, the default fallback.
    pub fn first(&self) -> Option<Move> {
        if self.is_empty() {
            return None;
        }
        match self {
            LegalSet::Choose(choices) => choices.first().map(|c| c.action.clone()),
            LegalSet::Cards { hand, min, .. } => {
                Some(Move::PlayCards(hand[..(*min).max(1)].to_vec()))
            }
            LegalSet::Speak => Some(Move::Pass),
        }
    }

    /// Whether `decision` belongs to this set.
    pub fn admits(&self, decision: &Move) -> bool {
        match (self, decision) {
            (LegalSet::Choose(choices), m) => choices.iter().any(|c| &c.action == m),
            (LegalSet::Cards { hand, min, max }, Move::PlayCards(cards)) => {
                (*min..=*max).contains(&cards.len()) && take_from_hand(hand, cards).is_some()
            }
            (LegalSet::Speak, Move::Speak(_) | Move::Pass) => true,
            _ => false,
        }
    }

    /// Labels of a [`LegalSet::Choose`], in order.
    pub fn labels(&self) -> Vec<&str> {
        match self {
            LegalSet::Choose(choices) => choices.iter().map(|c| c.label.as_str()).collect(),
            _ => vec![],
        }
    }

    fn pick(choices: &[Choice], answer: &str) -> Result<Move, ValidationError> {
        let answer = answer.trim().trim_matches(|c| c == '"' || c == '\'' || c == '.');
        choices
            .iter()
            .find(|c| c.label.eq_ignore_ascii_case(answer))
            .map(|c| c.action.clone())
            .ok_or_else(|| ValidationError::OutOfRange(format!("'{answer}' is not a legal choice")))
    }
}

/// Matches `cards` against `hand` as a multiset, case-insensitively. Returns the cards as
/// spelled in the hand.
fn take_from_hand(hand: &[String], cards: &[String]) -> Option<Vec<String>> {
    let mut left = hand.to_vec();
    cards
        .iter()
        .map(|card| {
            let pos = left.iter().position(|h| h.eq_ignore_ascii_case(card.trim()))?;
            Some(left.remove(pos))
        })
        .collect()
}

impl ResponseSchema for LegalSet {
    type Output = Move;

    fn describe(&self) -> String {
        match self {
            LegalSet::Choose(choices) => format!(
                "Answer with JSON only: {{\"choice\": \"<one of: {}>\"}}",
                choices
                    .iter()
                    .map(|c| c.label.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            LegalSet::Cards { hand, min, max } => format!(
                "Answer with JSON only: {{\"played_cards\": [...]}} with {min} to {max} cards taken \
                 from your hand: {}",
                hand.join(", ")
            ),
            LegalSet::Speak => FreeText.describe(),
        }
    }

    fn parse(&self, raw: &str) -> Result<Move, ValidationError> {
        match self {
            LegalSet::Choose(choices) => match extract_json(raw) {
                Ok(map) => {
                    let answer = string_field(&map, &["choice", "action", "vote", "target"])
                        .ok_or(ValidationError::MissingField("choice"))?;
                    Self::pick(choices, answer)
                }
                // a bare label is fine too
                Err(ValidationError::NoJson) => Self::pick(choices, raw),
                Err(e) => Err(e),
            },
            LegalSet::Cards { hand, min, max } => {
                let map = extract_json(raw)?;
                let cards = match map.get("played_cards") {
                    Some(Value::Array(items)) => items
                        .iter()
                        .map(|v| match v {
                            Value::String(s) => Ok(s.clone()),
                            other => Err(ValidationError::OutOfRange(format!(
                                "card must be a string, got {other}"
                            ))),
                        })
                        .collect::<Result<Vec<_>, _>>()?,
                    Some(Value::String(s)) => s.split(',').map(|c| c.trim().to_owned()).collect(),
                    Some(_) => {
                        return Err(ValidationError::Malformed(
                            "played_cards must be a list".to_owned(),
                        ))
                    }
                    None => return Err(ValidationError::MissingField("played_cards")),
                };
                if !(*min..=*max).contains(&cards.len()) {
                    return Err(ValidationError::OutOfRange(format!(
                        "played {} cards, expected {min} to {max}",
                        cards.len()
                    )));
                }
                take_from_hand(hand, &cards)
                    .map(Move::PlayCards)
                    .ok_or_else(|| ValidationError::OutOfRange("card not in hand".to_owned()))
            }
            LegalSet::Speak => FreeText.parse(raw).map(Move::Speak),
        }
    }
}

/// A validated decision applied by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    /// Seat that acted.
    pub seat: SeatId,
    /// Phase name.
    pub phase: String,
    /// Round of the phase.
    pub round: u32,
    /// Decision applied.
    pub decision: Move,
    /// What the model last answered, even when the fallback was used.
    pub raw: Option<String>,
    /// Whether the model's answer or a fallback was used.
    pub provenance: Provenance,
    /// Attempts issued to obtain this decision.
    pub attempts: u32,
}

/// Where the phase cycle goes after a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transition {
    /// Next phase of the cycle, wrapping to a new round after the last one.
    #[default]
    Advance,
    /// A specific phase. Going back to an earlier (or the same) phase starts a new round.
    To(PhaseId),
}

/// Private information for a single seat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    /// Recipient.
    pub seat: SeatId,
    /// Note delivered in the recipient's next prompt.
    pub text: String,
}

/// Outcome of one phase, as decided by the rule set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Public events, in order.
    pub events: Vec<String>,
    /// Lives to remove, per seat.
    pub damage: Vec<(SeatId, u32)>,
    /// Private notes to deliver.
    pub notices: Vec<Notice>,
    /// Where the cycle goes next.
    pub transition: Transition,
}

impl Resolution {
    /// Empty resolution moving to the next phase.
    pub fn advance() -> Self {
        Self::default()
    }

    /// Empty resolution jumping to `phase`.
    pub fn to(phase: PhaseId) -> Self {
        Self {
            transition: Transition::To(phase),
            ..Self::default()
        }
    }

    /// Adds a public event.
    pub fn event(mut self, event: impl Into<String>) -> Self {
        self.events.push(event.into());
        self
    }

    /// Takes `amount` lives from `seat`.
    pub fn damage(mut self, seat: SeatId, amount: u32) -> Self {
        self.damage.push((seat, amount));
        self
    }

    /// Adds a private note for `seat`.
    pub fn notice(mut self, seat: SeatId, text: impl Into<String>) -> Self {
        self.notices.push(Notice {
            seat,
            text: text.into(),
        });
        self
    }

    /// Sets the transition.
    pub fn then(mut self, transition: Transition) -> Self {
        self.transition = transition;
        self
    }
}

/// Who won a match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum Winner {
    /// A whole team.
    Faction(String),
    /// A single player, by display name.
    Seat(String),
    /// Nobody.
    Draw,
}

impl Display for Winner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Winner::Faction(name) => write!(f, "{name} win"),
            Winner::Seat(name) => write!(f, "{name} wins"),
            Winner::Draw => f.write_str("draw"),
        }
    }
}

/// Roles and initial variant state, produced once per match.
#[derive(Debug)]
pub struct Setup<S> {
    /// One role per seat, in roster order.
    pub roles: Vec<Role>,
    /// Initial variant state.
    pub state: S,
}

/// A game variant.
///
/// Implementations are shared read-only between all matches of a batch.
pub trait RuleSet: Send + Sync + 'static {
    /// Variant-specific state (decks, trackers, pending targets...).
    type State: Send + 'static;

    /// Short variant name used in records and errors.
    fn variant(&self) -> &'static str;

    /// Allowed number of seats.
    fn seat_bounds(&self) -> RangeInclusive<usize>;

    /// The phase cycle. The first phase is the entry phase.
    fn phases(&self) -> &[PhaseId];

    /// Lives each seat starts with.
    fn initial_lives(&self) -> u32 {
        1
    }

    /// Deals roles and builds the initial state. `seats` have no role yet.
    ///
    /// # Errors
    /// A [`ConfigurationError`] when the roster cannot be played.
    fn setup(&self, seats: &[Seat], rng: &mut SmallRng)
        -> Result<Setup<Self::State>, ConfigurationError>;

    /// Seats that must act in `phase`. Dead seats are filtered out by the engine.
    fn actors(&self, phase: PhaseId, seats: &[Seat], state: &Self::State) -> Vec<SeatId>;

    /// What `seat` may answer in `phase`. Must not be empty for an actor.
    fn legal_actions(
        &self,
        phase: PhaseId,
        seat: &Seat,
        seats: &[Seat],
        state: &Self::State,
    ) -> LegalSet;

    /// Rules and secret role, sent as the system message.
    fn briefing(&self, seat: &Seat, seats: &[Seat]) -> String;

    /// Situation description for `seat` in `phase`.
    fn prompt(&self, phase: PhaseId, seat: &Seat, seats: &[Seat], state: &Self::State) -> String;

    /// Decision used when the agent never produced a valid one. Must belong to `legal`.
    fn fallback(&self, _phase: PhaseId, _seat: &Seat, legal: &LegalSet) -> Option<Move> {
        legal.first()
    }

    /// Applies every action of a phase at once.
    fn resolve(
        &self,
        phase: PhaseId,
        actions: &[Action],
        seats: &[Seat],
        state: &mut Self::State,
        rng: &mut SmallRng,
    ) -> Resolution;

    /// `Some(winner)` once the game is over.
    fn is_terminal(&self, seats: &[Seat], state: &Self::State) -> Option<Winner>;

    /// Winner of a game stopped before its end (round or time limit).
    fn forced_winner(&self, seats: &[Seat], _state: &Self::State) -> Winner {
        most_life_faction(seats)
    }
}

/// Faction holding the most remaining lives; a tie is a draw.
pub fn most_life_faction(seats: &[Seat]) -> Winner {
    let mut life = BTreeMap::<&str, u32>::new();
    for seat in seats {
        *life.entry(seat.role().faction.as_str()).or_default() += seat.life();
    }
    let Some(best) = life.values().copied().max() else {
        return Winner::Draw;
    };
    let mut leaders = life.iter().filter(|(_, l)| **l == best);
    match (leaders.next(), leaders.next()) {
        (Some((faction, _)), None) => Winner::Faction((*faction).to_owned()),
        _ => Winner::Draw,
    }
}

/// Seat named `name` among `seats`, case-insensitive.
pub fn seat_by_name<'a>(seats: &'a [Seat], name: &str) -> Option<&'a Seat> {
    seats.iter().find(|s| s.name().eq_ignore_ascii_case(name))
}

/// Most voted seat; `None` when nobody got a vote or on a tie.
pub fn plurality(votes: impl IntoIterator<Item = SeatId>) -> Option<SeatId> {
    let mut tally = BTreeMap::<SeatId, u32>::new();
    for vote in votes {
        *tally.entry(vote).or_default() += 1;
    }
    let best = tally.values().copied().max()?;
    let mut leaders = tally.into_iter().filter(|(_, n)| *n == best);
    match (leaders.next(), leaders.next()) {
        (Some((seat, _)), None) => Some(seat),
        _ => None,
    }
}
