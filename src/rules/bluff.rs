//! Liar's-bar style bluffing card game with a revolver penalty.
//!
//! Every deal draws a target rank. On its turn a player lays 1 to 3 cards face down, claiming
//! they all match the target (jokers always do). The next living player either calls the lie
//! or lets it go. Whoever loses a showdown pulls the trigger of their own six-chamber revolver;
//! a showdown always ends with a re-deal. Last player alive wins.

use std::{iter, ops::RangeInclusive};

use rand::{rngs::SmallRng, seq::SliceRandom, Rng};

use crate::{
    error::ConfigurationError,
    rules::{Action, LegalSet, Move, PhaseId, Resolution, RuleSet, SeatId, Setup, Winner},
    seat::{Role, Seat},
};

/// Laying cards down.
pub const PLAY: PhaseId = PhaseId("play");
/// Calling the previous play, or not.
pub const CHALLENGE: PhaseId = PhaseId("challenge");

const RANKS: [&str; 3] = ["Q", "K", "A"];
const JOKER: &str = "Joker";
const CARDS_PER_RANK: usize = 6;
const JOKERS: usize = 2;
const HAND_SIZE: usize = 5;
const MAX_PLAYED: usize = 3;
const CHAMBERS: u8 = 6;

#[derive(Debug, Clone)]
struct Revolver {
    bullet: u8,
    position: u8,
}

impl Revolver {
    fn loaded(rng: &mut SmallRng) -> Self {
        Self {
            bullet: rng.random_range(0..CHAMBERS),
            position: 0,
        }
    }

    /// True when the shot is fatal.
    fn pull(&mut self) -> bool {
        let fired = self.position == self.bullet;
        self.position = (self.position + 1) % CHAMBERS;
        fired
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Play {
    seat: SeatId,
    cards: Vec<String>,
}

/// Table state of a bluff match.
#[derive(Debug, Clone)]
pub struct BluffState {
    target: &'static str,
    hands: Vec<Vec<String>>,
    turn: SeatId,
    last_play: Option<Play>,
    revolvers: Vec<Revolver>,
    deals: u32,
}

impl BluffState {
    /// Rank every card must claim to be in the current deal.
    pub fn target(&self) -> &str {
        self.target
    }

    /// Cards held by `seat`.
    pub fn hand(&self, seat: SeatId) -> &[String] {
        self.hands.get(seat.0).map_or(&[], Vec::as_slice)
    }

    /// Seat expected to lay cards next.
    pub fn turn(&self) -> SeatId {
        self.turn
    }

    /// Number of deals so far, the first one included.
    pub fn deals(&self) -> u32 {
        self.deals
    }

    /// Fresh shuffled deck and target; `dead` gets no cards even if its death is not applied yet.
    fn deal(&mut self, seats: &[Seat], dead: Option<SeatId>, rng: &mut SmallRng) {
        let mut deck = RANKS
            .iter()
            .flat_map(|rank| iter::repeat(*rank).take(CARDS_PER_RANK))
            .chain(iter::repeat(JOKER).take(JOKERS))
            .map(str::to_owned)
            .collect::<Vec<_>>();
        deck.shuffle(rng);

        self.target = RANKS[rng.random_range(0..RANKS.len())];
        for (seat, hand) in seats.iter().zip(self.hands.iter_mut()) {
            hand.clear();
            if seat.is_alive() && Some(seat.id()) != dead {
                hand.extend(deck.drain(..HAND_SIZE.min(deck.len())));
            }
        }
        self.last_play = None;
        self.deals += 1;
    }

    /// First living seat holding cards, starting at `from` and going around the table.
    fn next_with_cards(&self, seats: &[Seat], from: SeatId) -> Option<SeatId> {
        (0..seats.len())
            .map(|offset| SeatId((from.0 + offset) % seats.len()))
            .find(|id| seats[id.0].is_alive() && !self.hand(*id).is_empty())
    }
}

/// Next living seat after `seat`, skipping `dead`.
fn next_living(seats: &[Seat], seat: SeatId, dead: Option<SeatId>) -> Option<SeatId> {
    (1..seats.len())
        .map(|offset| SeatId((seat.0 + offset) % seats.len()))
        .find(|id| Some(*id) != dead && seats[id.0].is_alive())
}

/// The bluffing card game. Two to four players.
#[derive(Debug, Clone, Default)]
pub struct BluffRules;

impl BluffRules {
    /// Rules with the standard deck.
    pub fn new() -> Self {
        Self
    }

    fn challenger(seats: &[Seat], state: &BluffState) -> Option<SeatId> {
        let play = state.last_play.as_ref()?;
        next_living(seats, play.seat, None)
    }

    /// Resolves a called play: the liar, or the wrong accuser, pulls the trigger.
    fn showdown(
        &self,
        play: Play,
        challenger: SeatId,
        seats: &[Seat],
        state: &mut BluffState,
        rng: &mut SmallRng,
        mut resolution: Resolution,
    ) -> Resolution {
        let lied = play
            .cards
            .iter()
            .any(|c| c != state.target && c != JOKER);
        let loser = if lied { play.seat } else { challenger };
        resolution = resolution.event(format!(
            "{} reveals {}: {}",
            seats[play.seat.0].name(),
            play.cards.join(", "),
            if lied { "it was a lie" } else { "it was the truth" }
        ));

        let fatal = state.revolvers[loser.0].pull();
        let dead = if fatal {
            resolution = resolution
                .event(format!("{} pulls the trigger... BANG!", seats[loser.0].name()))
                .damage(loser, 1);
            Some(loser)
        } else {
            resolution =
                resolution.event(format!("{} pulls the trigger... click.", seats[loser.0].name()));
            None
        };

        state.deal(seats, dead, rng);
        state.turn = if fatal {
            next_living(seats, loser, dead).unwrap_or(loser)
        } else {
            loser
        };
        resolution.event(format!("New deal, the table rank is {}.", state.target))
    }
}

impl RuleSet for BluffRules {
    type State = BluffState;

    fn variant(&self) -> &'static str {
        "bluff"
    }

    fn seat_bounds(&self) -> RangeInclusive<usize> {
        2..=4
    }

    fn phases(&self) -> &[PhaseId] {
        &[PLAY, CHALLENGE]
    }

    fn setup(
        &self,
        seats: &[Seat],
        rng: &mut SmallRng,
    ) -> Result<Setup<BluffState>, ConfigurationError> {
        // everybody plays for themselves
        let roles = seats
            .iter()
            .map(|s| Role::new("Player", s.name()))
            .collect();
        let mut state = BluffState {
            target: RANKS[0],
            hands: vec![Vec::new(); seats.len()],
            turn: SeatId(0),
            last_play: None,
            revolvers: seats.iter().map(|_| Revolver::loaded(rng)).collect(),
            deals: 0,
        };
        state.deal(seats, None, rng);
        Ok(Setup { roles, state })
    }

    fn actors(&self, phase: PhaseId, seats: &[Seat], state: &BluffState) -> Vec<SeatId> {
        match phase {
            PLAY => state
                .next_with_cards(seats, state.turn)
                .into_iter()
                .collect(),
            CHALLENGE => Self::challenger(seats, state).into_iter().collect(),
            _ => vec![],
        }
    }

    fn legal_actions(
        &self,
        phase: PhaseId,
        seat: &Seat,
        _seats: &[Seat],
        state: &BluffState,
    ) -> LegalSet {
        match phase {
            PLAY => {
                let hand = state.hand(seat.id()).to_vec();
                let max = MAX_PLAYED.min(hand.len());
                LegalSet::Cards { hand, min: 1, max }
            }
            CHALLENGE => LegalSet::binary("challenge", "pass", Move::Challenge),
            _ => LegalSet::choose([]),
        }
    }

    fn briefing(&self, seat: &Seat, seats: &[Seat]) -> String {
        format!(
            "You are {} playing Liar's Bar against {}. Each deal names a table rank. On your \
             turn, lay 1 to 3 cards face down and claim they all match it; jokers match anything. \
             The next player may call your bluff. The loser of a call fires a revolver with one \
             bullet in six chambers. Last player alive wins.",
            seat.name(),
            seats
                .iter()
                .filter(|s| s.id() != seat.id())
                .map(Seat::name)
                .collect::<Vec<_>>()
                .join(", ")
        )
    }

    fn prompt(&self, phase: PhaseId, seat: &Seat, seats: &[Seat], state: &BluffState) -> String {
        let table = seats
            .iter()
            .filter(|s| s.is_alive())
            .map(|s| format!("{} ({} cards)", s.name(), state.hand(s.id()).len()))
            .collect::<Vec<_>>()
            .join(", ");
        let mut prompt = format!("Table rank: {}\nPlayers: {table}\n", state.target);
        match phase {
            PLAY => {
                prompt.push_str(&format!("Your hand: {}\n", state.hand(seat.id()).join(", ")));
                prompt.push_str("It is your turn to play.");
            }
            _ => {
                if let Some(play) = &state.last_play {
                    prompt.push_str(&format!(
                        "{} played {} card(s) claiming {}. Do you call the bluff?",
                        seats[play.seat.0].name(),
                        play.cards.len(),
                        state.target
                    ));
                }
            }
        }
        prompt
    }

    fn fallback(&self, phase: PhaseId, _seat: &Seat, legal: &LegalSet) -> Option<Move> {
        match phase {
            CHALLENGE => Some(Move::Challenge(false)),
            _ => legal.first(),
        }
    }

    fn resolve(
        &self,
        phase: PhaseId,
        actions: &[Action],
        seats: &[Seat],
        state: &mut BluffState,
        rng: &mut SmallRng,
    ) -> Resolution {
        match phase {
            PLAY => {
                let Some(Action {
                    seat,
                    decision: Move::PlayCards(cards),
                    ..
                }) = actions.first()
                else {
                    return Resolution::advance();
                };
                let hand = &mut state.hands[seat.0];
                for card in cards {
                    if let Some(pos) = hand.iter().position(|c| c == card) {
                        hand.remove(pos);
                    }
                }
                state.last_play = Some(Play {
                    seat: *seat,
                    cards: cards.clone(),
                });
                Resolution::advance().event(format!(
                    "{} plays {} card(s) as {}",
                    seats[seat.0].name(),
                    cards.len(),
                    state.target
                ))
            }
            CHALLENGE => {
                let (Some(play), Some(action)) = (state.last_play.take(), actions.first()) else {
                    return Resolution::advance();
                };
                let challenger = action.seat;
                let called = matches!(action.decision, Move::Challenge(true));
                if called {
                    let resolution = Resolution::advance().event(format!(
                        "{} calls {}'s bluff",
                        seats[challenger.0].name(),
                        seats[play.seat.0].name()
                    ));
                    return self.showdown(play, challenger, seats, state, rng, resolution);
                }

                match state.next_with_cards(seats, challenger) {
                    Some(next) => {
                        state.turn = next;
                        Resolution::advance()
                            .event(format!("{} lets it go", seats[challenger.0].name()))
                    }
                    None => {
                        // nobody can play anymore: the last play is called automatically
                        let resolution = Resolution::advance().event(format!(
                            "No cards left, {}'s play is revealed",
                            seats[play.seat.0].name()
                        ));
                        self.showdown(play, challenger, seats, state, rng, resolution)
                    }
                }
            }
            _ => Resolution::advance(),
        }
    }

    fn is_terminal(&self, seats: &[Seat], _state: &BluffState) -> Option<Winner> {
        let mut alive = seats.iter().filter(|s| s.is_alive());
        match (alive.next(), alive.next()) {
            (Some(last), None) => Some(Winner::Seat(last.name().to_owned())),
            (None, _) => Some(Winner::Draw),
            _ => None,
        }
    }

    fn forced_winner(&self, seats: &[Seat], state: &BluffState) -> Winner {
        // nobody is ahead while two players still stand
        self.is_terminal(seats, state).unwrap_or(Winner::Draw)
    }
}
