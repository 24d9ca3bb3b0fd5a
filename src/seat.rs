//! Seats of a match: who plays, with which model, in which role.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{model::Model, rules::SeatId};

/// Secret role dealt at setup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Role {
    /// Role name, e.g. `"Detective"` or `"Hitler"`.
    pub name: String,
    /// Team the role wins with.
    pub faction: String,
}

impl Role {
    /// Role `name` playing for `faction`.
    pub fn new(name: impl Into<String>, faction: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            faction: faction.into(),
        }
    }

    /// Role whose name is also its faction.
    pub fn plain(faction: impl Into<String>) -> Self {
        let faction = faction.into();
        Self {
            name: faction.clone(),
            faction,
        }
    }
}

/// What the caller provides for each seat of a new match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeatSpec {
    /// Display name shown to the other agents.
    pub name: String,
    /// Model playing the seat.
    pub model: Model,
}

impl SeatSpec {
    /// Seat `name` played by `model`.
    pub fn new(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: Model::new(model),
        }
    }
}

/// One player of a match. Owned by its engine.
///
/// The life counter can only go down: rule sets request damage, the engine applies it.
#[derive(Debug, Clone)]
pub struct Seat {
    id: SeatId,
    name: String,
    model: Model,
    role: Role,
    life: u32,
    opinions: BTreeMap<String, String>,
    notes: Vec<String>,
}

impl Seat {
    pub(crate) fn new(id: SeatId, spec: SeatSpec, life: u32) -> Self {
        Self {
            id,
            name: spec.name,
            model: spec.model,
            role: Role::default(),
            life,
            opinions: BTreeMap::new(),
            notes: Vec::new(),
        }
    }

    /// Position in the roster.
    pub fn id(&self) -> SeatId {
        self.id
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Model playing the seat.
    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Role dealt at setup.
    pub fn role(&self) -> &Role {
        &self.role
    }

    /// Remaining lives: 1 for games with permanent death, more for clone variants.
    pub fn life(&self) -> u32 {
        self.life
    }

    /// True while lives remain.
    pub fn is_alive(&self) -> bool {
        self.life > 0
    }

    /// Current impression of every other seat, refreshed by the reflection step.
    pub fn opinions(&self) -> &BTreeMap<String, String> {
        &self.opinions
    }

    /// Private information delivered to this seat only, oldest first.
    pub fn notes(&self) -> &[String] {
        &self.notes
    }

    /// The `n` most recent notes.
    pub fn recent_notes(&self, n: usize) -> &[String] {
        &self.notes[self.notes.len().saturating_sub(n)..]
    }

    pub(crate) fn assign_role(&mut self, role: Role) {
        self.role = role;
    }

    /// Returns true when this damage killed the seat.
    pub(crate) fn damage(&mut self, amount: u32) -> bool {
        let was_alive = self.is_alive();
        self.life = self.life.saturating_sub(amount);
        was_alive && !self.is_alive()
    }

    pub(crate) fn push_note(&mut self, note: String) {
        self.notes.push(note);
    }

    pub(crate) fn update_opinions(&mut self, opinions: BTreeMap<String, String>) {
        self.opinions.extend(opinions);
    }
}

/// Display names of the living seats other than `me`.
pub fn living_others(seats: &[Seat], me: SeatId) -> Vec<&Seat> {
    seats
        .iter()
        .filter(|s| s.is_alive() && s.id() != me)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seat(life: u32) -> Seat {
        Seat::new(SeatId(0), SeatSpec::new("Ann", "llama3"), life)
    }

    #[test]
    fn damage_saturates() {
        let mut s = seat(2);
        assert!(!s.damage(1));
        assert!(s.damage(5));
        assert_eq!(s.life(), 0);
        assert!(!s.damage(1));
        assert!(!s.is_alive());
    }

    #[test]
    fn recent_notes_are_the_last_ones() {
        let mut s = seat(1);
        for i in 0..7 {
            s.push_note(format!("n{i}"));
        }
        assert_eq!(s.recent_notes(5), ["n2", "n3", "n4", "n5", "n6"]);
        assert_eq!(s.recent_notes(50).len(), 7);
    }
}
