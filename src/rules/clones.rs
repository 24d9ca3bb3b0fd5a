//! Clone-respawn troubleshooter game.
//!
//! Every player owns a stack of clones. Missions fail when anybody sabotages them, and a failed
//! mission costs a random troubleshooter a clone. Accusations cost the accused a clone when
//! right, and every accuser a clone when wrong. A player is out once the last clone is gone.

use std::ops::RangeInclusive;

use rand::{rngs::SmallRng, seq::SliceRandom, Rng};

use crate::{
    error::ConfigurationError,
    rules::{
        plurality, Action, Choice, LegalSet, Move, PhaseId, Resolution, RuleSet, SeatId, Setup,
        Winner,
    },
    seat::{living_others, Role, Seat},
};

/// Everybody cooperates or sabotages.
pub const MISSION: PhaseId = PhaseId("mission");
/// Everybody may accuse someone of treason.
pub const ACCUSATION: PhaseId = PhaseId("accusation");

const LOYAL: &str = "Loyal";
const TRAITOR: &str = "Traitor";

/// Mission tally of a clone match.
#[derive(Debug, Clone, Default)]
pub struct CloneState {
    succeeded: u32,
    failed: u32,
}

impl CloneState {
    /// Missions completed so far.
    pub fn missions_succeeded(&self) -> u32 {
        self.succeeded
    }

    /// Missions sabotaged so far.
    pub fn missions_failed(&self) -> u32 {
        self.failed
    }
}

/// Clone rules, three to eight players. One traitor per three players.
#[derive(Debug, Clone)]
pub struct CloneRules {
    clones: u32,
    mission_goal: u32,
}

impl Default for CloneRules {
    fn default() -> Self {
        Self::new()
    }
}

impl CloneRules {
    /// Six clones per player, five missions to decide the game.
    pub fn new() -> Self {
        Self {
            clones: 6,
            mission_goal: 5,
        }
    }

    /// Sets the number of clones, at least one.
    pub fn with_clones(mut self, clones: u32) -> Self {
        self.clones = clones.max(1);
        self
    }

    /// Successful (or failed) missions needed for the loyal (or traitor) side to win.
    pub fn with_mission_goal(mut self, goal: u32) -> Self {
        self.mission_goal = goal;
        self
    }

    fn is_traitor(seat: &Seat) -> bool {
        seat.role().faction == TRAITOR
    }
}

impl RuleSet for CloneRules {
    type State = CloneState;

    fn variant(&self) -> &'static str {
        "clones"
    }

    fn seat_bounds(&self) -> RangeInclusive<usize> {
        3..=8
    }

    fn phases(&self) -> &[PhaseId] {
        &[MISSION, ACCUSATION]
    }

    fn initial_lives(&self) -> u32 {
        self.clones
    }

    fn setup(
        &self,
        seats: &[Seat],
        rng: &mut SmallRng,
    ) -> Result<Setup<CloneState>, ConfigurationError> {
        let traitors = (seats.len() / 3).max(1);
        let mut roles = vec![Role::new("Secret society member", TRAITOR); traitors];
        roles.resize(seats.len(), Role::new("Troubleshooter", LOYAL));
        roles.shuffle(rng);
        Ok(Setup {
            roles,
            state: CloneState::default(),
        })
    }

    fn actors(&self, _phase: PhaseId, seats: &[Seat], _state: &CloneState) -> Vec<SeatId> {
        seats.iter().filter(|s| s.is_alive()).map(Seat::id).collect()
    }

    fn legal_actions(
        &self,
        phase: PhaseId,
        seat: &Seat,
        seats: &[Seat],
        _state: &CloneState,
    ) -> LegalSet {
        match phase {
            MISSION => LegalSet::binary("sabotage", "cooperate", Move::Sabotage),
            ACCUSATION => LegalSet::seats(living_others(seats, seat.id()), Move::Accuse)
                .with_choice(Choice::new("nobody", Move::Pass)),
            _ => LegalSet::choose([]),
        }
    }

    fn briefing(&self, seat: &Seat, _seats: &[Seat]) -> String {
        let goal = if Self::is_traitor(seat) {
            "You secretly want missions to fail without being caught."
        } else {
            "Complete missions and expose the traitors."
        };
        format!(
            "You are {}, a troubleshooter serving the Computer with {} clones. Your secret \
             allegiance: {}. {goal} {} successful missions save the complex; {} failed ones doom \
             it.",
            seat.name(),
            self.clones,
            seat.role().name,
            self.mission_goal,
            self.mission_goal
        )
    }

    fn prompt(&self, phase: PhaseId, seat: &Seat, seats: &[Seat], state: &CloneState) -> String {
        let roster = seats
            .iter()
            .filter(|s| s.is_alive())
            .map(|s| format!("{} ({} clones)", s.name(), s.life()))
            .collect::<Vec<_>>()
            .join(", ");
        let task = match phase {
            MISSION => "A new mission starts. Do you cooperate or sabotage?",
            _ => "Accuse a traitor, or nobody. Wrong accusations are treason too.",
        };
        format!(
            "You have {} clones left. Troubleshooters: {roster}\nMissions: {} succeeded, {} \
             failed.\n{task}",
            seat.life(),
            state.succeeded,
            state.failed
        )
    }

    fn fallback(&self, phase: PhaseId, _seat: &Seat, legal: &LegalSet) -> Option<Move> {
        match phase {
            MISSION => Some(Move::Sabotage(false)),
            ACCUSATION => Some(Move::Pass),
            _ => legal.first(),
        }
    }

    fn resolve(
        &self,
        phase: PhaseId,
        actions: &[Action],
        seats: &[Seat],
        state: &mut CloneState,
        rng: &mut SmallRng,
    ) -> Resolution {
        match phase {
            MISSION => {
                let sabotages = actions
                    .iter()
                    .filter(|a| a.decision == Move::Sabotage(true))
                    .count();
                if sabotages == 0 {
                    state.succeeded += 1;
                    return Resolution::advance().event("The mission succeeds");
                }
                state.failed += 1;
                let resolution = Resolution::advance()
                    .event(format!("The mission fails: {sabotages} sabotage(s)"));
                let alive = seats.iter().filter(|s| s.is_alive()).collect::<Vec<_>>();
                if alive.is_empty() {
                    return resolution;
                }
                let blamed = alive[rng.random_range(0..alive.len())];
                resolution
                    .event(format!("The Computer blames {}", blamed.name()))
                    .damage(blamed.id(), 1)
            }
            ACCUSATION => {
                let accusations = actions.iter().filter_map(|a| match a.decision {
                    Move::Accuse(target) => Some((a.seat, target)),
                    _ => None,
                });
                let accusations = accusations.collect::<Vec<_>>();
                let Some(accused) = plurality(accusations.iter().map(|(_, t)| *t)) else {
                    return Resolution::advance().event("No accusation holds");
                };
                let name = seats[accused.0].name();
                if Self::is_traitor(&seats[accused.0]) {
                    Resolution::advance()
                        .event(format!("{name} is found GUILTY of treason"))
                        .damage(accused, 1)
                } else {
                    accusations
                        .iter()
                        .filter(|(_, target)| *target == accused)
                        .fold(
                            Resolution::advance()
                                .event(format!("{name} is INNOCENT; the accusers pay")),
                            |r, (accuser, _)| r.damage(*accuser, 1),
                        )
                }
            }
            _ => Resolution::advance(),
        }
    }

    fn is_terminal(&self, seats: &[Seat], state: &CloneState) -> Option<Winner> {
        let alive = seats.iter().filter(|s| s.is_alive());
        let (traitors, loyal): (Vec<&Seat>, Vec<&Seat>) = alive.partition(|s| Self::is_traitor(s));
        if traitors.is_empty() || state.succeeded >= self.mission_goal {
            Some(Winner::Faction(LOYAL.to_owned()))
        } else if loyal.is_empty() || state.failed >= self.mission_goal {
            Some(Winner::Faction(TRAITOR.to_owned()))
        } else {
            None
        }
    }
}
