//! Secret-government election game: Liberals against Fascists and their hidden leader.
//!
//! Each round a rotating president nominates a chancellor, the table votes on the pair, and an
//! elected government draws three policies: the president discards one, the chancellor
//! discards another and the last one is enacted. Three failed elections in a row enact the top
//! policy of the deck. The fourth and fifth fascist policies grant the president an execution.

use std::{fmt::Display, ops::RangeInclusive};

use rand::{rngs::SmallRng, seq::SliceRandom};

use crate::{
    error::ConfigurationError,
    rules::{
        Action, Choice, LegalSet, Move, PhaseId, Resolution, RuleSet, SeatId, Setup, Transition,
        Winner,
    },
    seat::{living_others, Role, Seat},
};

/// The president proposes a chancellor.
pub const NOMINATION: PhaseId = PhaseId("nomination");
/// Optional table talk about the proposed government.
pub const DISCUSSION: PhaseId = PhaseId("discussion");
/// Everybody votes ja or nein.
pub const ELECTION: PhaseId = PhaseId("election");
/// The president discards one of three policies.
pub const LEGISLATIVE: PhaseId = PhaseId("legislative");
/// The chancellor discards one of two policies and enacts the other.
pub const ENACTMENT: PhaseId = PhaseId("enactment");
/// The president executes a player.
pub const EXECUTIVE: PhaseId = PhaseId("executive");

const LIBERAL: &str = "Liberal";
const FASCIST: &str = "Fascist";
const HITLER: &str = "Hitler";

const LIBERAL_POLICIES: usize = 6;
const FASCIST_POLICIES: usize = 11;
const TRACKER_LIMIT: u32 = 3;
/// Fascist policy counts that unlock an execution.
const EXECUTION_POWERS: [u32; 2] = [4, 5];
/// Electing Hitler chancellor wins from this many fascist policies on.
const HITLER_ZONE: u32 = 3;

/// A policy card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// Liberal policy.
    Liberal,
    /// Fascist policy.
    Fascist,
}

impl Policy {
    fn parse(name: &str) -> Option<Self> {
        match name {
            LIBERAL => Some(Policy::Liberal),
            FASCIST => Some(Policy::Fascist),
            _ => None,
        }
    }
}

impl Display for Policy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Policy::Liberal => LIBERAL,
            Policy::Fascist => FASCIST,
        })
    }
}

/// Board of an election match.
#[derive(Debug, Clone)]
pub struct ElectionState {
    deck: Vec<Policy>,
    discard: Vec<Policy>,
    president: SeatId,
    nominee: Option<SeatId>,
    last_president: Option<SeatId>,
    last_chancellor: Option<SeatId>,
    hand: Vec<Policy>,
    liberal: u32,
    fascist: u32,
    tracker: u32,
    winner: Option<Winner>,
}

impl ElectionState {
    /// Liberal policies enacted.
    pub fn liberal_policies(&self) -> u32 {
        self.liberal
    }

    /// Fascist policies enacted.
    pub fn fascist_policies(&self) -> u32 {
        self.fascist
    }

    /// Failed elections in a row.
    pub fn election_tracker(&self) -> u32 {
        self.tracker
    }

    /// Seat holding the presidency this round.
    pub fn president(&self) -> SeatId {
        self.president
    }

    fn draw(&mut self, count: usize, rng: &mut SmallRng) -> Vec<Policy> {
        if self.deck.len() < count {
            self.deck.append(&mut self.discard);
            if self.deck.len() < count {
                // enacted policies never come back, start over with a full deck
                self.deck = full_deck();
            }
            self.deck.shuffle(rng);
        }
        self.deck.drain(..count).collect()
    }

    fn enact(&mut self, policy: Policy) {
        match policy {
            Policy::Liberal => self.liberal += 1,
            Policy::Fascist => self.fascist += 1,
        }
    }

    fn rotate(&mut self, seats: &[Seat], dead: Option<SeatId>) {
        let n = seats.len();
        if let Some(next) = (1..=n)
            .map(|offset| SeatId((self.president.0 + offset) % n))
            .find(|id| seats[id.0].is_alive() && Some(*id) != dead)
        {
            self.president = next;
        }
        self.nominee = None;
        self.hand.clear();
    }
}

fn full_deck() -> Vec<Policy> {
    let mut deck = vec![Policy::Liberal; LIBERAL_POLICIES];
    deck.extend(vec![Policy::Fascist; FASCIST_POLICIES]);
    deck
}

/// Liberal and Fascist counts by table size; there is always exactly one Hitler on top.
fn role_counts(seats: usize) -> Option<(usize, usize)> {
    match seats {
        5 => Some((3, 1)),
        6 => Some((4, 1)),
        7 => Some((4, 2)),
        8 => Some((5, 2)),
        9 => Some((5, 3)),
        10 => Some((6, 3)),
        _ => None,
    }
}

/// Election rules, five to ten players.
#[derive(Debug, Clone)]
pub struct ElectionRules {
    phases: Vec<PhaseId>,
    liberal_goal: u32,
    fascist_goal: u32,
}

impl Default for ElectionRules {
    fn default() -> Self {
        Self::new()
    }
}

impl ElectionRules {
    /// Official rules: five liberal or six fascist policies win, no table talk.
    pub fn new() -> Self {
        Self {
            phases: vec![NOMINATION, ELECTION, LEGISLATIVE, ENACTMENT, EXECUTIVE],
            liberal_goal: 5,
            fascist_goal: 6,
        }
    }

    /// Adds a discussion phase between nomination and election.
    pub fn with_table_talk(mut self, value: bool) -> Self {
        self.phases.retain(|p| *p != DISCUSSION);
        if value {
            self.phases.insert(1, DISCUSSION);
        }
        self
    }

    /// Number of enacted policies each side needs to win.
    pub fn with_win_thresholds(mut self, liberal: u32, fascist: u32) -> Self {
        self.liberal_goal = liberal;
        self.fascist_goal = fascist;
        self
    }

    fn eligible_chancellors<'a>(&self, seats: &'a [Seat], state: &ElectionState) -> Vec<&'a Seat> {
        let alive = seats.iter().filter(|s| s.is_alive()).count();
        let candidates = living_others(seats, state.president);
        let eligible = candidates
            .iter()
            .copied()
            .filter(|s| {
                Some(s.id()) != state.last_chancellor
                    && !(alive <= 6 && Some(s.id()) == state.last_president)
            })
            .collect::<Vec<_>>();
        if eligible.is_empty() {
            candidates
        } else {
            eligible
        }
    }

    fn check_policies(&self, state: &mut ElectionState) {
        if state.winner.is_some() {
            return;
        }
        if state.liberal >= self.liberal_goal {
            state.winner = Some(Winner::Faction(LIBERAL.to_owned()));
        } else if state.fascist >= self.fascist_goal {
            state.winner = Some(Winner::Faction(FASCIST.to_owned()));
        }
    }

    fn policy_choices(hand: &[Policy]) -> LegalSet {
        let mut choices: Vec<Choice> = vec![];
        for policy in hand {
            let label = policy.to_string();
            if !choices.iter().any(|c| c.label == label) {
                choices.push(Choice::new(label.clone(), Move::Discard(label)));
            }
        }
        LegalSet::Choose(choices)
    }

    fn discard(state: &mut ElectionState, actions: &[Action]) -> Option<Policy> {
        let wanted = actions.iter().find_map(|a| match &a.decision {
            Move::Discard(name) => Policy::parse(name),
            _ => None,
        });
        let pos = wanted
            .and_then(|p| state.hand.iter().position(|h| *h == p))
            .or((!state.hand.is_empty()).then_some(0))?;
        let policy = state.hand.remove(pos);
        state.discard.push(policy);
        Some(policy)
    }
}

impl RuleSet for ElectionRules {
    type State = ElectionState;

    fn variant(&self) -> &'static str {
        "election"
    }

    fn seat_bounds(&self) -> RangeInclusive<usize> {
        5..=10
    }

    fn phases(&self) -> &[PhaseId] {
        &self.phases
    }

    fn setup(
        &self,
        seats: &[Seat],
        rng: &mut SmallRng,
    ) -> Result<Setup<ElectionState>, ConfigurationError> {
        let (liberals, fascists) =
            role_counts(seats.len()).ok_or_else(|| ConfigurationError::SeatCount {
                variant: self.variant().to_owned(),
                got: seats.len(),
                min: *self.seat_bounds().start(),
                max: *self.seat_bounds().end(),
            })?;
        let mut roles = vec![Role::plain(LIBERAL); liberals];
        roles.extend(vec![Role::plain(FASCIST); fascists]);
        roles.push(Role::new(HITLER, FASCIST));
        roles.shuffle(rng);

        let mut deck = full_deck();
        deck.shuffle(rng);
        let state = ElectionState {
            deck,
            discard: vec![],
            president: SeatId(0),
            nominee: None,
            last_president: None,
            last_chancellor: None,
            hand: vec![],
            liberal: 0,
            fascist: 0,
            tracker: 0,
            winner: None,
        };
        Ok(Setup { roles, state })
    }

    fn actors(&self, phase: PhaseId, seats: &[Seat], state: &ElectionState) -> Vec<SeatId> {
        match phase {
            NOMINATION | LEGISLATIVE | EXECUTIVE => vec![state.president],
            ENACTMENT => state.nominee.into_iter().collect(),
            DISCUSSION | ELECTION => seats.iter().filter(|s| s.is_alive()).map(Seat::id).collect(),
            _ => vec![],
        }
    }

    fn legal_actions(
        &self,
        phase: PhaseId,
        seat: &Seat,
        seats: &[Seat],
        state: &ElectionState,
    ) -> LegalSet {
        match phase {
            NOMINATION => LegalSet::seats(self.eligible_chancellors(seats, state), Move::Nominate),
            DISCUSSION => LegalSet::Speak,
            ELECTION => LegalSet::binary("ja", "nein", Move::Ballot),
            LEGISLATIVE | ENACTMENT => Self::policy_choices(&state.hand),
            EXECUTIVE => LegalSet::seats(living_others(seats, seat.id()), Move::Target),
            _ => LegalSet::choose([]),
        }
    }

    fn briefing(&self, seat: &Seat, seats: &[Seat]) -> String {
        let role = seat.role();
        let mut briefing = format!(
            "You are {} in a game of Secret Hitler with {} players. Your secret role is {}. \
             Liberals win with {} liberal policies or by executing Hitler. Fascists win with {} \
             fascist policies or by electing Hitler chancellor after {HITLER_ZONE} fascist \
             policies.",
            seat.name(),
            seats.len(),
            role.name,
            self.liberal_goal,
            self.fascist_goal,
        );
        let knows_team = role.name == FASCIST || (role.name == HITLER && seats.len() <= 6);
        if knows_team {
            let allies = seats
                .iter()
                .filter(|s| s.id() != seat.id() && s.role().faction == FASCIST)
                .map(|s| format!("{} ({})", s.name(), s.role().name))
                .collect::<Vec<_>>();
            briefing.push_str(&format!(" Your fellow fascists: {}.", allies.join(", ")));
        }
        briefing
    }

    fn prompt(&self, phase: PhaseId, _seat: &Seat, seats: &[Seat], state: &ElectionState) -> String {
        let name = |id: Option<SeatId>| id.map_or("nobody", |id| seats[id.0].name());
        let mut prompt = format!(
            "Liberal policies: {}/{}, fascist policies: {}/{}, election tracker: {}/{TRACKER_LIMIT}.\n\
             Alive: {}\nPresident: {}. Last government: {} and {}.\n",
            state.liberal,
            self.liberal_goal,
            state.fascist,
            self.fascist_goal,
            state.tracker,
            seats
                .iter()
                .filter(|s| s.is_alive())
                .map(Seat::name)
                .collect::<Vec<_>>()
                .join(", "),
            seats[state.president.0].name(),
            name(state.last_president),
            name(state.last_chancellor),
        );
        match phase {
            NOMINATION => prompt.push_str("You are president: nominate a chancellor."),
            DISCUSSION | ELECTION => prompt.push_str(&format!(
                "Proposed government: {} as president, {} as chancellor. {}",
                seats[state.president.0].name(),
                name(state.nominee),
                if phase == ELECTION {
                    "Vote ja or nein."
                } else {
                    "Tell the table what you think."
                }
            )),
            LEGISLATIVE | ENACTMENT => prompt.push_str(&format!(
                "You drew: {}. Choose the policy to discard.",
                state
                    .hand
                    .iter()
                    .map(Policy::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
            EXECUTIVE => prompt.push_str("You must execute one player."),
            _ => {}
        }
        prompt
    }

    fn fallback(&self, phase: PhaseId, _seat: &Seat, legal: &LegalSet) -> Option<Move> {
        match phase {
            ELECTION => Some(Move::Ballot(false)),
            _ => legal.first(),
        }
    }

    fn resolve(
        &self,
        phase: PhaseId,
        actions: &[Action],
        seats: &[Seat],
        state: &mut ElectionState,
        rng: &mut SmallRng,
    ) -> Resolution {
        match phase {
            NOMINATION => {
                let nominee = actions.iter().find_map(|a| match a.decision {
                    Move::Nominate(id) => Some(id),
                    _ => None,
                });
                state.nominee = nominee;
                Resolution::advance().event(format!(
                    "{} nominates {}",
                    seats[state.president.0].name(),
                    nominee.map_or("nobody", |id| seats[id.0].name())
                ))
            }
            DISCUSSION => actions
                .iter()
                .filter_map(|a| match &a.decision {
                    Move::Speak(text) => Some(format!("{}: {text}", seats[a.seat.0].name())),
                    _ => None,
                })
                .fold(Resolution::advance(), |r, line| r.event(line)),
            ELECTION => {
                let alive = seats.iter().filter(|s| s.is_alive()).count();
                let ja = actions
                    .iter()
                    .filter(|a| a.decision == Move::Ballot(true))
                    .count();
                let mut resolution = actions.iter().fold(Resolution::advance(), |r, a| {
                    let vote = if a.decision == Move::Ballot(true) { "ja" } else { "nein" };
                    r.event(format!("{} votes {vote}", seats[a.seat.0].name()))
                });
                let Some(chancellor) = state.nominee.filter(|_| ja > alive / 2) else {
                    state.tracker += 1;
                    resolution = resolution.event(format!(
                        "The government fails. Election tracker: {}/{TRACKER_LIMIT}",
                        state.tracker
                    ));
                    if state.tracker >= TRACKER_LIMIT {
                        let top = state.draw(1, rng)[0];
                        state.enact(top);
                        state.tracker = 0;
                        state.last_president = None;
                        state.last_chancellor = None;
                        resolution = resolution.event(format!("Chaos: the top policy ({top}) is enacted"));
                        self.check_policies(state);
                    }
                    state.rotate(seats, None);
                    return resolution.then(Transition::To(NOMINATION));
                };

                state.tracker = 0;
                state.last_president = Some(state.president);
                state.last_chancellor = Some(chancellor);
                resolution = resolution.event(format!(
                    "The government passes: {} is chancellor",
                    seats[chancellor.0].name()
                ));
                if seats[chancellor.0].role().name == HITLER && state.fascist >= HITLER_ZONE {
                    state.winner = Some(Winner::Faction(FASCIST.to_owned()));
                    return resolution.event("Hitler has been elected chancellor");
                }
                state.hand = state.draw(3, rng);
                resolution
            }
            LEGISLATIVE => {
                Self::discard(state, actions);
                Resolution::advance().event(format!(
                    "{} passes two policies to the chancellor",
                    seats[state.president.0].name()
                ))
            }
            ENACTMENT => {
                Self::discard(state, actions);
                let Some(enacted) = state.hand.pop() else {
                    state.rotate(seats, None);
                    return Resolution::to(NOMINATION);
                };
                state.enact(enacted);
                self.check_policies(state);
                let resolution = Resolution::advance().event(format!("A {enacted} policy is enacted"));
                if enacted == Policy::Fascist
                    && EXECUTION_POWERS.contains(&state.fascist)
                    && state.winner.is_none()
                {
                    return resolution.then(Transition::To(EXECUTIVE));
                }
                state.rotate(seats, None);
                resolution.then(Transition::To(NOMINATION))
            }
            EXECUTIVE => {
                let target = actions.iter().find_map(|a| match a.decision {
                    Move::Target(id) => Some(id),
                    _ => None,
                });
                let mut resolution = Resolution::advance();
                if let Some(target) = target {
                    resolution = resolution
                        .event(format!(
                            "{} executes {}",
                            seats[state.president.0].name(),
                            seats[target.0].name()
                        ))
                        .damage(target, 1);
                    if seats[target.0].role().name == HITLER {
                        state.winner = Some(Winner::Faction(LIBERAL.to_owned()));
                        resolution = resolution.event("Hitler is dead");
                    }
                }
                state.rotate(seats, target);
                resolution
            }
            _ => Resolution::advance(),
        }
    }

    fn is_terminal(&self, _seats: &[Seat], state: &ElectionState) -> Option<Winner> {
        state.winner.clone()
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;
    use crate::{retry::Provenance, seat::SeatSpec};

    fn table(n: usize) -> (Vec<Seat>, ElectionState, SmallRng) {
        let mut rng = SmallRng::seed_from_u64(11);
        let mut seats = (0..n)
            .map(|i| Seat::new(SeatId(i), SeatSpec::new(format!("P{i}"), "m"), 1))
            .collect::<Vec<_>>();
        let setup = ElectionRules::new().setup(&seats, &mut rng).unwrap();
        for (seat, role) in seats.iter_mut().zip(setup.roles) {
            seat.assign_role(role);
        }
        (seats, setup.state, rng)
    }

    fn ballots(seats: &[Seat], ja: bool) -> Vec<Action> {
        seats
            .iter()
            .map(|s| Action {
                seat: s.id(),
                phase: ELECTION.name().to_owned(),
                round: 1,
                decision: Move::Ballot(ja),
                raw: None,
                provenance: Provenance::Genuine,
                attempts: 1,
            })
            .collect()
    }

    #[test]
    fn role_counts_follow_table_size() {
        for n in 5..=10 {
            let (seats, ..) = table(n);
            let hitlers = seats.iter().filter(|s| s.role().name == HITLER).count();
            let liberals = seats.iter().filter(|s| s.role().faction == LIBERAL).count();
            assert_eq!(hitlers, 1);
            assert_eq!(liberals, role_counts(n).unwrap().0);
        }
        assert!(role_counts(4).is_none());
    }

    #[test]
    fn term_limits() {
        let (seats, mut state, _) = table(5);
        state.president = SeatId(0);
        state.last_president = Some(SeatId(1));
        state.last_chancellor = Some(SeatId(2));
        let rules = ElectionRules::new();
        let names = rules
            .eligible_chancellors(&seats, &state)
            .iter()
            .map(|s| s.name().to_owned())
            .collect::<Vec<_>>();
        assert_eq!(names, ["P3", "P4"]);
    }

    #[test]
    fn three_failed_elections_enact_the_top_policy() {
        let (seats, mut state, mut rng) = table(5);
        let rules = ElectionRules::new();
        for round in 1..=3 {
            state.nominee = Some(SeatId(1));
            let r = rules.resolve(ELECTION, &ballots(&seats, false), &seats, &mut state, &mut rng);
            assert_eq!(r.transition, Transition::To(NOMINATION));
            assert_eq!(state.election_tracker(), round % 3);
        }
        assert_eq!(state.liberal_policies() + state.fascist_policies(), 1);
        assert_eq!(state.president(), SeatId(3));
    }

    #[test]
    fn elected_government_draws_three_policies() {
        let (seats, mut state, mut rng) = table(6);
        let rules = ElectionRules::new();
        state.nominee = Some(SeatId(2));
        let r = rules.resolve(ELECTION, &ballots(&seats, true), &seats, &mut state, &mut rng);
        assert_eq!(r.transition, Transition::Advance);
        assert_eq!(state.hand.len(), 3);
        assert_eq!(state.last_chancellor, Some(SeatId(2)));
    }

    #[test]
    fn fourth_fascist_policy_unlocks_an_execution() {
        let (seats, mut state, mut rng) = table(5);
        let rules = ElectionRules::new();
        state.fascist = 3;
        state.nominee = Some(SeatId(1));
        state.hand = vec![Policy::Fascist, Policy::Fascist];
        let r = rules.resolve(ENACTMENT, &[], &seats, &mut state, &mut rng);
        assert_eq!(state.fascist_policies(), 4);
        assert_eq!(r.transition, Transition::To(EXECUTIVE));
    }

    #[test]
    fn custom_thresholds() {
        let (_, mut state, _) = table(5);
        let rules = ElectionRules::new().with_win_thresholds(1, 1);
        state.enact(Policy::Liberal);
        rules.check_policies(&mut state);
        assert_eq!(state.winner, Some(Winner::Faction(LIBERAL.into())));
    }

    #[test]
    fn table_talk_phase_is_optional() {
        assert!(!ElectionRules::new().phases().contains(&DISCUSSION));
        let rules = ElectionRules::new().with_table_talk(true);
        assert_eq!(rules.phases()[1], DISCUSSION);
    }
}
