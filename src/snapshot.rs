//! Immutable per-round state.
//!
//! A [`RoundSnapshot`] records every participant's lives, the single swimmer (if any)
//! and whether the round was produced by a nuke. Snapshots are never edited in place:
//! the action rules in [`crate::action`] derive a successor from the snapshot at the
//! cursor.

use std::collections::BTreeMap;

use web_time::{SystemTime, UNIX_EPOCH};

use crate::telemetry::{InvariantChecker, InvariantViolation};
use crate::{ParticipantId, RoundNumber};

/// Full state of a game after one round.
///
/// A participant is *alive* if their lives are above zero, or they are exactly at zero
/// and hold the swimmer slot. Everyone else is dead.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RoundSnapshot {
    pub(crate) round: RoundNumber,
    pub(crate) lives: BTreeMap<ParticipantId, i32>,
    pub(crate) swimming: Option<ParticipantId>,
    pub(crate) nuke_detonator: Option<ParticipantId>,
    pub(crate) created_at_ms: u64,
}

/// Outcome of a finished game, sent along with the `Completed` status update.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct GameResult {
    /// The last participant alive.
    pub winner: ParticipantId,
    /// The swimmer in the deciding round, if any.
    pub swimming: Option<ParticipantId>,
    /// Whether the deciding round was a nuke.
    pub win_by_nuke: bool,
}

impl RoundSnapshot {
    /// Creates round 0: everyone at `starting_lives`, nobody swimming.
    #[must_use]
    pub fn initial<'a>(
        participants: impl IntoIterator<Item = &'a ParticipantId>,
        starting_lives: i32,
    ) -> Self {
        Self {
            round: RoundNumber::ZERO,
            lives: participants
                .into_iter()
                .map(|id| (id.clone(), starting_lives))
                .collect(),
            swimming: None,
            nuke_detonator: None,
            created_at_ms: now_ms(),
        }
    }

    /// Assembles a snapshot from persisted parts.
    ///
    /// No rule checking happens here; use [`InvariantChecker::check_invariants`] on the
    /// result when loading data from outside.
    #[must_use]
    pub fn from_parts(
        round: RoundNumber,
        lives: BTreeMap<ParticipantId, i32>,
        swimming: Option<ParticipantId>,
        nuke_detonator: Option<ParticipantId>,
        created_at_ms: u64,
    ) -> Self {
        Self {
            round,
            lives,
            swimming,
            nuke_detonator,
            created_at_ms,
        }
    }

    /// The round this snapshot belongs to.
    #[must_use]
    pub fn round(&self) -> RoundNumber {
        self.round
    }

    /// Lives of every participant.
    #[must_use]
    pub fn lives(&self) -> &BTreeMap<ParticipantId, i32> {
        &self.lives
    }

    /// Lives of one participant, or `None` if they are not in this game.
    #[must_use]
    pub fn lives_of(&self, participant: &ParticipantId) -> Option<i32> {
        self.lives.get(participant).copied()
    }

    /// The current swimmer.
    #[must_use]
    pub fn swimming(&self) -> Option<&ParticipantId> {
        self.swimming.as_ref()
    }

    /// Who detonated the nuke that produced this round.
    #[must_use]
    pub fn nuke_detonator(&self) -> Option<&ParticipantId> {
        self.nuke_detonator.as_ref()
    }

    /// Creation time in milliseconds since the unix epoch.
    #[must_use]
    pub fn created_at_ms(&self) -> u64 {
        self.created_at_ms
    }

    /// Returns `true` if the participant is part of this game.
    #[must_use]
    pub fn contains(&self, participant: &ParticipantId) -> bool {
        self.lives.contains_key(participant)
    }

    /// Returns `true` if the participant holds the swimmer slot.
    #[must_use]
    pub fn is_swimming(&self, participant: &ParticipantId) -> bool {
        self.swimming.as_ref() == Some(participant)
    }

    /// Returns `true` if the participant is still in the game.
    ///
    /// Unknown participants are never alive.
    #[must_use]
    pub fn is_alive(&self, participant: &ParticipantId) -> bool {
        match self.lives.get(participant) {
            Some(&lives) if lives > 0 => true,
            Some(&0) => self.is_swimming(participant),
            _ => false,
        }
    }

    /// Returns `true` if the participant is known and out of the game.
    #[must_use]
    pub fn is_dead(&self, participant: &ParticipantId) -> bool {
        self.contains(participant) && !self.is_alive(participant)
    }

    /// Iterates over every participant still in the game, in id order.
    pub fn alive_participants(&self) -> impl Iterator<Item = &ParticipantId> + '_ {
        self.lives.keys().filter(|id| self.is_alive(id))
    }

    /// The only participant still alive, if exactly one is.
    #[must_use]
    pub fn sole_survivor(&self) -> Option<&ParticipantId> {
        let mut alive = self.alive_participants();
        let first = alive.next()?;
        alive.next().is_none().then_some(first)
    }

    /// The game result this snapshot decides, if it leaves a single survivor.
    #[must_use]
    pub fn result(&self) -> Option<GameResult> {
        self.sole_survivor().map(|winner| GameResult {
            winner: winner.clone(),
            swimming: self.swimming.clone(),
            win_by_nuke: self.nuke_detonator.is_some(),
        })
    }

    /// A copy of this snapshot placed at `round`, with a fresh timestamp and no nuke tag.
    ///
    /// The action rules start every new round from this.
    pub(crate) fn successor(&self, round: RoundNumber) -> Self {
        Self {
            round,
            lives: self.lives.clone(),
            swimming: self.swimming.clone(),
            nuke_detonator: None,
            created_at_ms: now_ms(),
        }
    }

    /// Moves this snapshot to another position in the history.
    pub(crate) fn renumbered(mut self, round: RoundNumber) -> Self {
        self.round = round;
        self
    }
}

impl InvariantChecker for RoundSnapshot {
    /// # Invariants
    ///
    /// 1. The swimmer (if any) is a participant of this game.
    /// 2. The swimmer sits at exactly zero lives.
    /// 3. The nuke detonator (if any) is a participant of this game.
    fn check_invariants(&self) -> Result<(), InvariantViolation> {
        if let Some(swimmer) = &self.swimming {
            match self.lives.get(swimmer) {
                None => {
                    return Err(InvariantViolation::new(
                        "RoundSnapshot",
                        "swimmer is not a participant",
                    )
                    .with_details(format!("round={}, swimmer={}", self.round, swimmer)));
                },
                Some(&lives) if lives != 0 => {
                    return Err(InvariantViolation::new(
                        "RoundSnapshot",
                        "swimmer must have exactly zero lives",
                    )
                    .with_details(format!(
                        "round={}, swimmer={}, lives={}",
                        self.round, swimmer, lives
                    )));
                },
                Some(_) => {},
            }
        }
        if let Some(detonator) = &self.nuke_detonator {
            if !self.lives.contains_key(detonator) {
                return Err(InvariantViolation::new(
                    "RoundSnapshot",
                    "nuke detonator is not a participant",
                )
                .with_details(format!("round={}, detonator={}", self.round, detonator)));
            }
        }
        Ok(())
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<ParticipantId> {
        names.iter().map(|n| ParticipantId::new(*n)).collect()
    }

    fn snapshot(lives: &[(&str, i32)], swimming: Option<&str>) -> RoundSnapshot {
        RoundSnapshot::from_parts(
            RoundNumber::new(1),
            lives
                .iter()
                .map(|(id, l)| (ParticipantId::new(*id), *l))
                .collect(),
            swimming.map(ParticipantId::new),
            None,
            0,
        )
    }

    #[test]
    fn initial_round_has_full_lives() {
        let players = ids(&["a", "b", "c"]);
        let round = RoundSnapshot::initial(&players, 3);
        assert_eq!(round.round(), RoundNumber::ZERO);
        assert!(round.lives().values().all(|&l| l == 3));
        assert!(round.swimming().is_none());
        assert!(round.nuke_detonator().is_none());
    }

    #[test]
    fn swimmer_at_zero_is_alive() {
        let s = snapshot(&[("a", 0), ("b", 2)], Some("a"));
        assert!(s.is_alive(&ParticipantId::new("a")));
        assert!(!s.is_dead(&ParticipantId::new("a")));
    }

    #[test]
    fn zero_without_swimming_is_dead() {
        let s = snapshot(&[("a", 0), ("b", 2)], None);
        assert!(s.is_dead(&ParticipantId::new("a")));
    }

    #[test]
    fn negative_is_dead() {
        let s = snapshot(&[("a", -1), ("b", 2)], None);
        assert!(s.is_dead(&ParticipantId::new("a")));
    }

    #[test]
    fn unknown_participant_is_neither_alive_nor_dead() {
        let s = snapshot(&[("a", 1)], None);
        let ghost = ParticipantId::new("ghost");
        assert!(!s.is_alive(&ghost));
        assert!(!s.is_dead(&ghost));
    }

    #[test]
    fn sole_survivor_requires_exactly_one() {
        let two = snapshot(&[("a", 1), ("b", 0)], Some("b"));
        assert!(two.sole_survivor().is_none());

        let one = snapshot(&[("a", 1), ("b", -1), ("c", 0)], None);
        assert_eq!(one.sole_survivor(), Some(&ParticipantId::new("a")));

        let none = snapshot(&[("a", -1), ("b", -1)], None);
        assert!(none.sole_survivor().is_none());
    }

    #[test]
    fn result_reports_nuke_and_swimmer() {
        let mut s = snapshot(&[("a", 0), ("b", 0)], Some("a"));
        s.nuke_detonator = Some(ParticipantId::new("a"));
        let result = s.result().unwrap();
        assert_eq!(result.winner, ParticipantId::new("a"));
        assert_eq!(result.swimming, Some(ParticipantId::new("a")));
        assert!(result.win_by_nuke);
    }

    #[test]
    fn invariant_swimmer_must_be_at_zero() {
        let s = snapshot(&[("a", 1), ("b", 2)], Some("a"));
        assert!(s.check_invariants().is_err());
    }

    #[test]
    fn invariant_swimmer_must_be_known() {
        let s = snapshot(&[("a", 1)], Some("z"));
        assert!(s.check_invariants().is_err());
    }

    #[test]
    fn invariant_holds_for_valid_snapshot() {
        let s = snapshot(&[("a", 0), ("b", 2)], Some("a"));
        assert!(s.check_invariants().is_ok());
    }

    #[test]
    fn successor_clears_nuke_tag() {
        let mut s = snapshot(&[("a", 2), ("b", 2)], None);
        s.nuke_detonator = Some(ParticipantId::new("a"));
        let next = s.successor(RoundNumber::new(2));
        assert_eq!(next.round(), RoundNumber::new(2));
        assert!(next.nuke_detonator().is_none());
        assert_eq!(next.lives(), s.lives());
    }
}
