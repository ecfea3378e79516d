//! Action rules and the action-mode state machine.
//!
//! The rule functions ([`apply_subtract_life`], [`check_nuke_for_conflict`],
//! [`detonate_nuke`]) are pure: they read the snapshot at the cursor and return the
//! successor round without touching any history. [`ActionMachine`] layers the mode
//! preconditions on top of them.
//!
//! ```text
//!            select(SubtractLife)             select(DetonateNuke)
//!   ┌──────────────────────────┐  ┌───────────────────────────────┐
//!   │                          ▼  │                               ▼
//! SubtractLife ◄────────────── Idle ──────────────────────► DetonateNuke
//!   │     select(same) / commit ▲  ▲  select(same) / commit /     │
//!   └───────────────────────────┘  └──── conflict cancelled ──────┘
//! ```

use tracing::trace;

use crate::error::PreconditionKind;
use crate::snapshot::RoundSnapshot;
use crate::{ActionMode, CandidateVec, ParticipantId};

/// Tracks the active [`ActionMode`] and gates the rule functions on it.
///
/// Every precondition failure resets the mode to [`ActionMode::Idle`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ActionMachine {
    mode: ActionMode,
}

impl ActionMachine {
    /// Creates a machine in [`ActionMode::Idle`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The active mode.
    #[must_use]
    pub fn mode(&self) -> ActionMode {
        self.mode
    }

    /// Toggles a mode.
    ///
    /// From `Idle` the requested mode is entered; requesting the active mode again returns
    /// to `Idle`; requesting `Idle` always succeeds. Requesting one action mode while the
    /// other is active is rejected.
    pub fn select(&mut self, requested: ActionMode) -> Result<ActionMode, PreconditionKind> {
        let next = match (self.mode, requested) {
            (_, ActionMode::Idle) => ActionMode::Idle,
            (ActionMode::Idle, requested) => requested,
            (active, requested) if active == requested => ActionMode::Idle,
            (active, requested) => {
                self.mode = ActionMode::Idle;
                return Err(PreconditionKind::ModeConflict { active, requested });
            },
        };
        trace!(from = ?self.mode, to = ?next, "action mode selected");
        self.mode = next;
        Ok(next)
    }

    /// Returns to `Idle` and yields the mode that was active.
    pub fn reset(&mut self) -> ActionMode {
        std::mem::take(&mut self.mode)
    }

    fn require(&mut self, expected: ActionMode) -> Result<(), PreconditionKind> {
        if self.mode == expected {
            Ok(())
        } else {
            let actual = self.reset();
            Err(PreconditionKind::WrongMode { expected, actual })
        }
    }

    /// [`apply_subtract_life`] gated on [`ActionMode::SubtractLife`].
    ///
    /// On success the mode stays active until the round is committed.
    pub fn apply_subtract_life(
        &mut self,
        at: &RoundSnapshot,
        participant: &ParticipantId,
    ) -> Result<RoundSnapshot, PreconditionKind> {
        self.require(ActionMode::SubtractLife)?;
        apply_subtract_life(at, participant).inspect_err(|_| {
            self.reset();
        })
    }

    /// [`check_nuke_for_conflict`] gated on [`ActionMode::DetonateNuke`].
    pub fn check_nuke_for_conflict(
        &mut self,
        at: &RoundSnapshot,
        detonator: &ParticipantId,
    ) -> Result<CandidateVec, PreconditionKind> {
        self.require(ActionMode::DetonateNuke)?;
        check_nuke_for_conflict(at, detonator).inspect_err(|_| {
            self.reset();
        })
    }

    /// [`detonate_nuke`] gated on [`ActionMode::DetonateNuke`].
    pub fn detonate_nuke(
        &mut self,
        at: &RoundSnapshot,
        detonator: &ParticipantId,
        survivor: Option<&ParticipantId>,
    ) -> Result<RoundSnapshot, PreconditionKind> {
        self.require(ActionMode::DetonateNuke)?;
        detonate_nuke(at, detonator, survivor).inspect_err(|_| {
            self.reset();
        })
    }
}

fn require_alive(at: &RoundSnapshot, participant: &ParticipantId) -> Result<(), PreconditionKind> {
    if !at.contains(participant) {
        return Err(PreconditionKind::UnknownParticipant {
            participant: participant.clone(),
        });
    }
    if !at.is_alive(participant) {
        return Err(PreconditionKind::ParticipantDead {
            participant: participant.clone(),
        });
    }
    Ok(())
}

/// Takes one life from `participant` and returns the next round.
///
/// - Reaching zero with nobody else swimming makes the participant the swimmer.
/// - Reaching zero while someone else swims kills the participant.
/// - Hitting the swimmer kills them: the swimmer slot is cleared and their lives drop to -1.
pub fn apply_subtract_life(
    at: &RoundSnapshot,
    participant: &ParticipantId,
) -> Result<RoundSnapshot, PreconditionKind> {
    require_alive(at, participant)?;
    let mut next = at.successor(at.round().next());
    let was_swimming = at.is_swimming(participant);
    let lives = next
        .lives
        .get_mut(participant)
        .ok_or_else(|| PreconditionKind::UnknownParticipant {
            participant: participant.clone(),
        })?;
    *lives -= 1;
    let remaining = *lives;

    if was_swimming {
        next.swimming = None;
    } else if remaining == 0 && next.swimming.is_none() {
        next.swimming = Some(participant.clone());
    }
    trace!(
        round = %next.round(),
        %participant,
        remaining,
        swimming = ?next.swimming(),
        "subtracted life"
    );
    Ok(next)
}

/// Lists the participants a nuke by `detonator` would newly bring to exactly zero lives.
///
/// An empty result means the nuke creates no swimmer, one entry means that participant
/// will swim, and two or more is a conflict: exactly one of them has to be picked as the
/// survivor before [`detonate_nuke`] can run. Dead participants are not hit by a nuke and
/// never appear. If the detonator is the swimmer, the slot stays taken and the result is
/// empty.
pub fn check_nuke_for_conflict(
    at: &RoundSnapshot,
    detonator: &ParticipantId,
) -> Result<CandidateVec, PreconditionKind> {
    require_alive(at, detonator)?;
    if at.is_swimming(detonator) {
        return Ok(CandidateVec::new());
    }
    Ok(at
        .lives()
        .iter()
        .filter(|(id, &lives)| *id != detonator && lives == 1 && at.is_alive(id))
        .map(|(id, _)| id.clone())
        .collect())
}

/// Takes one life from every living participant except `detonator`.
///
/// The previous swimmer, if hit, dies. Of the participants newly reaching zero, the
/// chosen `survivor` (or the only candidate) swims and the others die. `survivor` must be
/// given when [`check_nuke_for_conflict`] reports two or more candidates and must be one
/// of them; it must be absent or match when there is at most one.
pub fn detonate_nuke(
    at: &RoundSnapshot,
    detonator: &ParticipantId,
    survivor: Option<&ParticipantId>,
) -> Result<RoundSnapshot, PreconditionKind> {
    let candidates = check_nuke_for_conflict(at, detonator)?;
    let chosen = match (candidates.as_slice(), survivor) {
        ([], None) => None,
        ([only], None) => Some(only.clone()),
        ([_, _, ..], None) => {
            return Err(PreconditionKind::SurvivorRequired {
                candidates: candidates.to_vec(),
            });
        },
        (_, Some(survivor)) => {
            if !candidates.contains(survivor) {
                return Err(PreconditionKind::InvalidSurvivor {
                    survivor: survivor.clone(),
                    candidates: candidates.to_vec(),
                });
            }
            Some(survivor.clone())
        },
    };

    let mut next = at.successor(at.round().next());
    for (id, lives) in next.lives.iter_mut() {
        if id != detonator && at.is_alive(id) {
            *lives -= 1;
        }
    }
    next.swimming = if at.is_swimming(detonator) {
        Some(detonator.clone())
    } else {
        chosen
    };
    next.nuke_detonator = Some(detonator.clone());
    trace!(
        round = %next.round(),
        %detonator,
        candidates = candidates.len(),
        swimming = ?next.swimming(),
        "nuke detonated"
    );
    Ok(next)
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
    use crate::RoundNumber;

    fn id(name: &str) -> ParticipantId {
        ParticipantId::new(name)
    }

    fn start(names: &[&str], lives: i32) -> RoundSnapshot {
        let ids: Vec<ParticipantId> = names.iter().map(|n| id(n)).collect();
        RoundSnapshot::initial(&ids, lives)
    }

    fn with_lives(lives: &[(&str, i32)], swimming: Option<&str>) -> RoundSnapshot {
        RoundSnapshot::from_parts(
            RoundNumber::new(5),
            lives.iter().map(|(n, l)| (id(n), *l)).collect(),
            swimming.map(id),
            None,
            0,
        )
    }

    // ==========================================
    // ActionMachine
    // ==========================================

    #[test]
    fn select_from_idle_enters_mode() {
        let mut machine = ActionMachine::new();
        assert_eq!(
            machine.select(ActionMode::SubtractLife),
            Ok(ActionMode::SubtractLife)
        );
        assert_eq!(machine.mode(), ActionMode::SubtractLife);
    }

    #[test]
    fn select_same_mode_toggles_back_to_idle() {
        let mut machine = ActionMachine::new();
        machine.select(ActionMode::DetonateNuke).unwrap();
        assert_eq!(machine.select(ActionMode::DetonateNuke), Ok(ActionMode::Idle));
    }

    #[test]
    fn select_other_mode_is_rejected_and_resets() {
        let mut machine = ActionMachine::new();
        machine.select(ActionMode::SubtractLife).unwrap();
        let err = machine.select(ActionMode::DetonateNuke).unwrap_err();
        assert_eq!(
            err,
            PreconditionKind::ModeConflict {
                active: ActionMode::SubtractLife,
                requested: ActionMode::DetonateNuke,
            }
        );
        assert_eq!(machine.mode(), ActionMode::Idle);
    }

    #[test]
    fn subtract_in_wrong_mode_is_rejected() {
        let mut machine = ActionMachine::new();
        machine.select(ActionMode::DetonateNuke).unwrap();
        let at = start(&["a", "b"], 3);
        let err = machine.apply_subtract_life(&at, &id("a")).unwrap_err();
        assert!(matches!(err, PreconditionKind::WrongMode { .. }));
        assert_eq!(machine.mode(), ActionMode::Idle);
    }

    #[test]
    fn failed_rule_resets_mode() {
        let mut machine = ActionMachine::new();
        machine.select(ActionMode::SubtractLife).unwrap();
        let at = start(&["a", "b"], 3);
        assert!(machine.apply_subtract_life(&at, &id("ghost")).is_err());
        assert_eq!(machine.mode(), ActionMode::Idle);
    }

    #[test]
    fn successful_rule_keeps_mode_until_commit() {
        let mut machine = ActionMachine::new();
        machine.select(ActionMode::SubtractLife).unwrap();
        let at = start(&["a", "b"], 3);
        machine.apply_subtract_life(&at, &id("a")).unwrap();
        assert_eq!(machine.mode(), ActionMode::SubtractLife);
    }

    // ==========================================
    // Subtract life
    // ==========================================

    #[test]
    fn repeated_hits_make_swimmer_then_kill() {
        let mut round = start(&["a", "b", "c", "d"], 3);
        let d = id("d");

        round = apply_subtract_life(&round, &d).unwrap();
        assert_eq!(round.lives_of(&d), Some(2));
        round = apply_subtract_life(&round, &d).unwrap();
        assert_eq!(round.lives_of(&d), Some(1));
        round = apply_subtract_life(&round, &d).unwrap();
        assert_eq!(round.lives_of(&d), Some(0));
        assert_eq!(round.swimming(), Some(&d));
        assert!(round.is_alive(&d));

        round = apply_subtract_life(&round, &d).unwrap();
        assert_eq!(round.lives_of(&d), Some(-1));
        assert_eq!(round.swimming(), None);
        assert!(round.is_dead(&d));
        assert_eq!(round.round(), RoundNumber::new(4));
    }

    #[test]
    fn reaching_zero_while_someone_swims_kills() {
        let round = with_lives(&[("a", 0), ("b", 1), ("c", 2)], Some("a"));
        let next = apply_subtract_life(&round, &id("b")).unwrap();
        assert_eq!(next.lives_of(&id("b")), Some(0));
        assert_eq!(next.swimming(), Some(&id("a")));
        assert!(next.is_dead(&id("b")));
    }

    #[test]
    fn dead_participant_cannot_be_hit() {
        let round = with_lives(&[("a", -1), ("b", 2)], None);
        assert_eq!(
            apply_subtract_life(&round, &id("a")).unwrap_err(),
            PreconditionKind::ParticipantDead {
                participant: id("a")
            }
        );
    }

    #[test]
    fn subtract_does_not_mutate_source() {
        let round = start(&["a", "b"], 3);
        let before = round.clone();
        let _ = apply_subtract_life(&round, &id("a")).unwrap();
        assert_eq!(round, before);
    }

    // ==========================================
    // Nuke
    // ==========================================

    #[test]
    fn conflict_check_lists_newly_zeroed() {
        let round = with_lives(&[("x", 2), ("y", 1), ("z", 1), ("w", 3)], None);
        let candidates = check_nuke_for_conflict(&round, &id("x")).unwrap();
        assert_eq!(candidates.as_slice(), &[id("y"), id("z")]);
    }

    #[test]
    fn conflict_check_ignores_detonator_and_dead() {
        let round = with_lives(&[("x", 1), ("y", 0), ("z", 1)], None);
        let candidates = check_nuke_for_conflict(&round, &id("x")).unwrap();
        assert_eq!(candidates.as_slice(), &[id("z")]);
    }

    #[test]
    fn swimming_detonator_blocks_new_swimmers() {
        let round = with_lives(&[("x", 0), ("y", 1), ("z", 1)], Some("x"));
        assert!(check_nuke_for_conflict(&round, &id("x")).unwrap().is_empty());

        let next = detonate_nuke(&round, &id("x"), None).unwrap();
        assert_eq!(next.swimming(), Some(&id("x")));
        assert!(next.is_dead(&id("y")));
        assert!(next.is_dead(&id("z")));
    }

    #[test]
    fn conflict_resolved_with_chosen_survivor() {
        let round = with_lives(&[("x", 2), ("y", 1), ("z", 1), ("w", 3)], None);
        let next = detonate_nuke(&round, &id("x"), Some(&id("z"))).unwrap();
        assert_eq!(next.swimming(), Some(&id("z")));
        assert_eq!(next.lives_of(&id("y")), Some(0));
        assert!(next.is_dead(&id("y")));
        assert_eq!(next.lives_of(&id("w")), Some(2));
        assert_eq!(next.lives_of(&id("x")), Some(2));
        assert_eq!(next.nuke_detonator(), Some(&id("x")));
    }

    #[test]
    fn conflict_without_survivor_is_rejected() {
        let round = with_lives(&[("x", 2), ("y", 1), ("z", 1)], None);
        let err = detonate_nuke(&round, &id("x"), None).unwrap_err();
        assert_eq!(
            err,
            PreconditionKind::SurvivorRequired {
                candidates: vec![id("y"), id("z")]
            }
        );
    }

    #[test]
    fn survivor_outside_candidates_is_rejected() {
        let round = with_lives(&[("x", 2), ("y", 1), ("z", 1), ("w", 3)], None);
        let err = detonate_nuke(&round, &id("x"), Some(&id("w"))).unwrap_err();
        assert!(matches!(err, PreconditionKind::InvalidSurvivor { .. }));
    }

    #[test]
    fn single_candidate_swims_without_choice() {
        let round = with_lives(&[("x", 2), ("y", 1), ("z", 3)], None);
        let next = detonate_nuke(&round, &id("x"), None).unwrap();
        assert_eq!(next.swimming(), Some(&id("y")));
    }

    #[test]
    fn survivor_given_without_conflict_must_match() {
        let round = with_lives(&[("x", 2), ("y", 3), ("z", 3)], None);
        let err = detonate_nuke(&round, &id("x"), Some(&id("y"))).unwrap_err();
        assert!(matches!(err, PreconditionKind::InvalidSurvivor { .. }));
    }

    #[test]
    fn nuke_kills_previous_swimmer() {
        let round = with_lives(&[("x", 2), ("s", 0), ("y", 1)], Some("s"));
        let next = detonate_nuke(&round, &id("x"), None).unwrap();
        assert_eq!(next.lives_of(&id("s")), Some(-1));
        assert!(next.is_dead(&id("s")));
        assert_eq!(next.swimming(), Some(&id("y")));
    }

    #[test]
    fn nuke_skips_dead_participants() {
        let round = with_lives(&[("x", 2), ("dead", -1), ("y", 3)], None);
        let next = detonate_nuke(&round, &id("x"), None).unwrap();
        assert_eq!(next.lives_of(&id("dead")), Some(-1));
        assert_eq!(next.lives_of(&id("y")), Some(2));
    }

    #[test]
    fn dead_detonator_is_rejected() {
        let round = with_lives(&[("x", -1), ("y", 3)], None);
        assert!(matches!(
            detonate_nuke(&round, &id("x"), None).unwrap_err(),
            PreconditionKind::ParticipantDead { .. }
        ));
    }
}
