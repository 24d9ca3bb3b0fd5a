//! Mafia: an informed minority against an uninformed town.
//!
//! At night the Mafia picks a victim, the Doctor protects someone and the Detective learns
//! whether a player is Mafia. By day everybody talks, then votes somebody out.

use std::ops::RangeInclusive;

use rand::{rngs::SmallRng, seq::SliceRandom};

use crate::{
    error::ConfigurationError,
    rules::{
        plurality, Action, Choice, LegalSet, Move, PhaseId, Resolution, RuleSet, SeatId, Setup,
        Winner,
    },
    seat::{living_others, Role, Seat},
};

/// Night abilities.
pub const NIGHT: PhaseId = PhaseId("night");
/// Open discussion.
pub const DISCUSSION: PhaseId = PhaseId("discussion");
/// Elimination vote.
pub const VOTE: PhaseId = PhaseId("vote");

const MAFIA: &str = "Mafia";
const TOWN: &str = "Town";
const DOCTOR: &str = "Doctor";
const DETECTIVE: &str = "Detective";
const TOWNSPERSON: &str = "Townsperson";

/// Night log of a mafia match.
#[derive(Debug, Clone, Default)]
pub struct MafiaState {
    nights: u32,
    last_victim: Option<SeatId>,
}

impl MafiaState {
    /// Nights played so far.
    pub fn nights(&self) -> u32 {
        self.nights
    }

    /// Seat killed during the last night, if any.
    pub fn last_victim(&self) -> Option<SeatId> {
        self.last_victim
    }
}

/// Mafia rules, five to twelve players: one Mafia member per four players, one Doctor, one
/// Detective.
#[derive(Debug, Clone, Default)]
pub struct MafiaRules;

impl MafiaRules {
    /// The only setup there is.
    pub fn new() -> Self {
        Self
    }

    fn is_mafia(seat: &Seat) -> bool {
        seat.role().faction == MAFIA
    }

    fn targets(actions: &[Action], role: &str, seats: &[Seat]) -> Vec<SeatId> {
        actions
            .iter()
            .filter(|a| seats[a.seat.0].role().name == role)
            .filter_map(|a| match a.decision {
                Move::Target(id) => Some(id),
                _ => None,
            })
            .collect()
    }
}

impl RuleSet for MafiaRules {
    type State = MafiaState;

    fn variant(&self) -> &'static str {
        "mafia"
    }

    fn seat_bounds(&self) -> RangeInclusive<usize> {
        5..=12
    }

    fn phases(&self) -> &[PhaseId] {
        &[NIGHT, DISCUSSION, VOTE]
    }

    fn setup(
        &self,
        seats: &[Seat],
        rng: &mut SmallRng,
    ) -> Result<Setup<MafiaState>, ConfigurationError> {
        let mafia = (seats.len() / 4).max(1);
        let mut roles = vec![Role::plain(MAFIA); mafia];
        roles.push(Role::new(DOCTOR, TOWN));
        roles.push(Role::new(DETECTIVE, TOWN));
        roles.resize(seats.len(), Role::new(TOWNSPERSON, TOWN));
        roles.shuffle(rng);
        Ok(Setup {
            roles,
            state: MafiaState::default(),
        })
    }

    fn actors(&self, phase: PhaseId, seats: &[Seat], _state: &MafiaState) -> Vec<SeatId> {
        seats
            .iter()
            .filter(|s| s.is_alive())
            .filter(|s| phase != NIGHT || s.role().name != TOWNSPERSON)
            .map(Seat::id)
            .collect()
    }

    fn legal_actions(
        &self,
        phase: PhaseId,
        seat: &Seat,
        seats: &[Seat],
        _state: &MafiaState,
    ) -> LegalSet {
        match phase {
            NIGHT => match seat.role().name.as_str() {
                MAFIA => LegalSet::seats(
                    seats.iter().filter(|s| s.is_alive() && !Self::is_mafia(s)),
                    Move::Target,
                ),
                // the doctor may protect themselves
                DOCTOR => LegalSet::seats(seats.iter().filter(|s| s.is_alive()), Move::Target),
                DETECTIVE => LegalSet::seats(living_others(seats, seat.id()), Move::Target),
                _ => LegalSet::choose([]),
            },
            DISCUSSION => LegalSet::Speak,
            VOTE => LegalSet::seats(living_others(seats, seat.id()), |id| Move::Vote(Some(id)))
                .with_choice(Choice::new("abstain", Move::Vote(None))),
            _ => LegalSet::choose([]),
        }
    }

    fn briefing(&self, seat: &Seat, seats: &[Seat]) -> String {
        let mut briefing = format!(
            "You are {} playing Mafia with {}. Your secret role is {}. The town wins when every \
             Mafia member is gone; the Mafia wins once it equals the rest of the town.",
            seat.name(),
            seats
                .iter()
                .filter(|s| s.id() != seat.id())
                .map(Seat::name)
                .collect::<Vec<_>>()
                .join(", "),
            seat.role().name
        );
        if Self::is_mafia(seat) {
            let partners = seats
                .iter()
                .filter(|s| s.id() != seat.id() && Self::is_mafia(s))
                .map(Seat::name)
                .collect::<Vec<_>>();
            if !partners.is_empty() {
                briefing.push_str(&format!(" Your partners: {}.", partners.join(", ")));
            }
        }
        briefing
    }

    fn prompt(&self, phase: PhaseId, seat: &Seat, seats: &[Seat], state: &MafiaState) -> String {
        let alive = seats
            .iter()
            .filter(|s| s.is_alive())
            .map(Seat::name)
            .collect::<Vec<_>>()
            .join(", ");
        let task = match phase {
            NIGHT => match seat.role().name.as_str() {
                MAFIA => "Choose who the Mafia kills tonight.",
                DOCTOR => "Choose who you protect tonight.",
                _ => "Choose who you investigate tonight.",
            },
            DISCUSSION => "Share your thoughts, suspicions or questions with the town.",
            _ => "Vote for the player to eliminate, or abstain.",
        };
        let victim = state
            .last_victim
            .map(|id| format!("Last night {} was killed.\n", seats[id.0].name()))
            .unwrap_or_default();
        format!("Night {}. Alive: {alive}\n{victim}{task}", state.nights)
    }

    fn fallback(&self, phase: PhaseId, _seat: &Seat, legal: &LegalSet) -> Option<Move> {
        match phase {
            VOTE => Some(Move::Vote(None)),
            _ => legal.first(),
        }
    }

    fn resolve(
        &self,
        phase: PhaseId,
        actions: &[Action],
        seats: &[Seat],
        state: &mut MafiaState,
        _rng: &mut SmallRng,
    ) -> Resolution {
        match phase {
            NIGHT => {
                state.nights += 1;
                state.last_victim = None;
                let mut resolution = Resolution::advance();

                let votes = Self::targets(actions, MAFIA, seats);
                // on a split mafia vote, the first target named wins
                let victim = plurality(votes.iter().copied()).or(votes.first().copied());
                let saved = Self::targets(actions, DOCTOR, seats).first().copied();
                match victim {
                    Some(victim) if Some(victim) != saved => {
                        state.last_victim = Some(victim);
                        resolution = resolution
                            .event(format!("{} was killed during the night", seats[victim.0].name()))
                            .damage(victim, 1);
                    }
                    _ => resolution = resolution.event("Nobody died during the night"),
                }

                for action in actions.iter().filter(|a| seats[a.seat.0].role().name == DETECTIVE) {
                    if let Move::Target(target) = action.decision {
                        let verdict = if Self::is_mafia(&seats[target.0]) {
                            "MAFIA"
                        } else {
                            "NOT Mafia"
                        };
                        resolution = resolution.notice(
                            action.seat,
                            format!("Night investigation: {} is {verdict}.", seats[target.0].name()),
                        );
                    }
                }
                resolution
            }
            DISCUSSION => actions
                .iter()
                .filter_map(|a| match &a.decision {
                    Move::Speak(text) => Some(format!("{} says: {text}", seats[a.seat.0].name())),
                    _ => None,
                })
                .fold(Resolution::advance(), |r, line| r.event(line)),
            VOTE => {
                let votes = actions.iter().filter_map(|a| match a.decision {
                    Move::Vote(target) => target,
                    _ => None,
                });
                match plurality(votes) {
                    Some(out) => Resolution::advance()
                        .event(format!(
                            "{} is voted out. They were {}.",
                            seats[out.0].name(),
                            seats[out.0].role().name
                        ))
                        .damage(out, 1),
                    None => Resolution::advance().event("The town could not agree on anyone"),
                }
            }
            _ => Resolution::advance(),
        }
    }

    fn is_terminal(&self, seats: &[Seat], _state: &MafiaState) -> Option<Winner> {
        let (mafia, town): (Vec<&Seat>, Vec<&Seat>) = seats
            .iter()
            .filter(|s| s.is_alive())
            .partition(|s| Self::is_mafia(s));
        if mafia.is_empty() {
            Some(Winner::Faction(TOWN.to_owned()))
        } else if mafia.len() >= town.len() {
            Some(Winner::Faction(MAFIA.to_owned()))
        } else {
            None
        }
    }
}
