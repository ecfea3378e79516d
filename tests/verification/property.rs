//! Property-based tests for the action rules and the round history.
//!
//! These tests use proptest to verify invariants hold under random action sequences,
//! leveraging the exposed __internal module for direct component testing.
//!
//! # Invariants Tested
//!
//! ## Rules
//! - A hit changes exactly one participant's lives, by exactly one
//! - A nuke leaves the detonator untouched and takes one life from every other living
//!   participant
//! - Of the conflict candidates only the chosen survivor stays alive
//! - The swimmer, if any, sits at exactly zero lives
//!
//! ## RoundHistory
//! - Round numbers stay dense from 0 in both histories
//! - The working history is never more than one round ahead of synced
//! - Rollback restores the synced history exactly

// Allow test-specific patterns that are appropriate for test code
#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use proptest::prelude::*;
use schwimmen_tracker::__internal::{evaluate_win, RoundHistory};
use schwimmen_tracker::telemetry::InvariantChecker;
use schwimmen_tracker::{
    apply_subtract_life, check_nuke_for_conflict, detonate_nuke, ParticipantId, RoundNumber,
    RoundSnapshot,
};

// ============================================================================
// Property Test Strategies
// ============================================================================

#[derive(Debug, Clone)]
enum Step {
    Hit(usize),
    Nuke { detonator: usize, pick: usize },
    Goto(u32),
    Commit,
    Rollback,
}

fn step_strategy(players: usize) -> impl Strategy<Value = Step> {
    prop_oneof![
        4 => (0..players).prop_map(Step::Hit),
        2 => (0..players, any::<usize>())
            .prop_map(|(detonator, pick)| Step::Nuke { detonator, pick }),
        1 => (0u32..12).prop_map(Step::Goto),
        3 => Just(Step::Commit),
        1 => Just(Step::Rollback),
    ]
}

/// Player count, starting lives, and a step sequence.
fn game_strategy() -> impl Strategy<Value = (usize, i32, Vec<Step>)> {
    (2usize..6, 1i32..4).prop_flat_map(|(players, lives)| {
        (
            Just(players),
            Just(lives),
            prop::collection::vec(step_strategy(players), 1..60),
        )
    })
}

fn participants(count: usize) -> Vec<ParticipantId> {
    (0..count).map(|i| ParticipantId::new(format!("p{i}"))).collect()
}

// ============================================================================
// Rule checks
// ============================================================================

fn check_hit(
    before: &RoundSnapshot,
    after: &RoundSnapshot,
    target: &ParticipantId,
) -> Result<(), TestCaseError> {
    for (id, &lives) in before.lives() {
        let now = after.lives_of(id).unwrap();
        if id == target {
            prop_assert_eq!(now, lives - 1, "target {} lost more than one life", id);
        } else {
            prop_assert_eq!(now, lives, "bystander {} changed", id);
        }
    }
    if before.is_swimming(target) {
        prop_assert!(after.is_dead(target), "hit swimmer {} survived", target);
    }
    Ok(())
}

fn check_nuke(
    before: &RoundSnapshot,
    after: &RoundSnapshot,
    detonator: &ParticipantId,
    candidates: &[ParticipantId],
) -> Result<(), TestCaseError> {
    for (id, &lives) in before.lives() {
        let now = after.lives_of(id).unwrap();
        if id == detonator || !before.is_alive(id) {
            prop_assert_eq!(now, lives, "{} should not be hit", id);
        } else {
            prop_assert_eq!(now, lives - 1, "{} should lose one life", id);
        }
    }
    let surviving = candidates.iter().filter(|id| after.is_alive(id)).count();
    if !before.is_swimming(detonator) {
        prop_assert_eq!(surviving, candidates.len().min(1));
    }
    prop_assert_eq!(after.nuke_detonator(), Some(detonator));
    Ok(())
}

// ============================================================================
// Model runner
// ============================================================================

fn run_steps(players: usize, lives: i32, steps: &[Step]) -> Result<RoundHistory, TestCaseError> {
    let ids = participants(players);
    let mut history = RoundHistory::new(RoundSnapshot::initial(&ids, lives));

    for step in steps {
        match step {
            Step::Hit(i) if !history.has_pending() => {
                let before = history.current().clone();
                if let Ok(next) = apply_subtract_life(&before, &ids[*i]) {
                    check_hit(&before, &next, &ids[*i])?;
                    history.add_round(next);
                }
            },
            Step::Nuke { detonator, pick } if !history.has_pending() => {
                let before = history.current().clone();
                let detonator = &ids[*detonator];
                if let Ok(candidates) = check_nuke_for_conflict(&before, detonator) {
                    let survivor = (candidates.len() >= 2)
                        .then(|| candidates[pick % candidates.len()].clone());
                    let next = detonate_nuke(&before, detonator, survivor.as_ref())
                        .expect("candidates came from the same snapshot");
                    check_nuke(&before, &next, detonator, &candidates)?;
                    history.add_round(next);
                }
            },
            Step::Goto(round) if !history.has_pending() => {
                let _ = history.set_current_round(RoundNumber::new(*round));
            },
            Step::Commit => history.commit(),
            Step::Rollback => history.rollback(),
            _ => {},
        }

        let checked = history.check_invariants();
        prop_assert!(
            checked.is_ok(),
            "history invariants failed after {:?}: {:?}",
            step,
            checked.err()
        );
        prop_assert!(history.divergence().pending() <= 1);
        prop_assert!(history.cursor() <= history.latest_round().round());
    }
    Ok(history)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Every reachable history satisfies the rule and history invariants.
    #[test]
    fn prop_random_games_keep_invariants((players, lives, steps) in game_strategy()) {
        run_steps(players, lives, &steps)?;
    }

    /// Rolling back an optimistic round restores the synced history exactly.
    #[test]
    fn prop_rollback_restores_synced(
        (players, lives, steps) in game_strategy(),
        target in 0usize..6,
    ) {
        let mut history = run_steps(players, lives, &steps)?;
        history.commit();
        let synced = history.synced().clone();

        let ids = participants(players);
        let target = &ids[target % players];
        if let Ok(next) = apply_subtract_life(history.current(), target) {
            history.add_round(next);
            prop_assert!(history.has_pending());
            history.rollback();
        }

        prop_assert!(!history.has_pending());
        prop_assert!(history.working().same_as(&synced));
        prop_assert_eq!(history.cursor(), synced.latest_round());
    }

    /// Round numbers stay dense and are reused after a truncation, never skipped.
    #[test]
    fn prop_round_numbers_dense((players, lives, steps) in game_strategy()) {
        let mut history = run_steps(players, lives, &steps)?;
        history.commit();
        for (index, snapshot) in history.working().iter().enumerate() {
            prop_assert_eq!(snapshot.round().as_index(), index);
        }
        prop_assert_eq!(history.working().len(), history.latest_round().round().as_index() + 1);
    }

    /// A win is only ever read off the committed tail.
    #[test]
    fn prop_win_follows_synced_tail((players, lives, steps) in game_strategy()) {
        let history = run_steps(players, lives, &steps)?;
        let expected = history.synced_latest().sole_survivor().cloned();
        prop_assert_eq!(evaluate_win(&history).map(|result| result.winner), expected);
    }
}
