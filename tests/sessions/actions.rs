//! Action rule integration tests.

// Allow test-specific patterns that are appropriate for test code
#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use crate::common::{id, Harness};
use schwimmen_tracker::{ActionMode, PreconditionKind, RoundNumber, TrackerError, TrackerEvent};

#[tokio::test]
async fn test_repeated_hits_make_swimmer_then_kill() {
    let h = Harness::new(&["a", "b", "c", "d"], 3).await;

    h.hit("d").await;
    assert_eq!(h.lives("d"), Some(2));
    h.hit("d").await;
    assert_eq!(h.lives("d"), Some(1));
    h.hit("d").await;
    assert_eq!(h.lives("d"), Some(0));
    assert_eq!(h.session.current_round().swimming(), Some(&id("d")));

    h.hit("d").await;
    let round = h.session.current_round();
    assert_eq!(round.lives_of(&id("d")), Some(-1));
    assert_eq!(round.swimming(), None);
    assert!(round.is_dead(&id("d")));

    assert_eq!(h.session.latest_round_number(), RoundNumber::new(4));
    assert_eq!(h.persisted(), vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn test_second_zero_dies_while_someone_swims() {
    let h = Harness::new(&["a", "b", "c"], 1).await;
    h.hit("a").await;
    h.hit("b").await;
    let round = h.session.current_round();
    assert_eq!(round.swimming(), Some(&id("a")));
    assert!(round.is_dead(&id("b")));
}

#[tokio::test]
async fn test_mode_returns_to_idle_after_commit() {
    let h = Harness::new(&["a", "b"], 3).await;
    h.hit("a").await;
    assert_eq!(h.session.mode(), ActionMode::Idle);
}

#[tokio::test]
async fn test_hit_without_mode_is_rejected() {
    let h = Harness::new(&["a", "b"], 3).await;
    let err = h.session.subtract_life(&id("a")).await.unwrap_err();
    assert_eq!(
        err,
        TrackerError::Precondition {
            kind: PreconditionKind::WrongMode {
                expected: ActionMode::SubtractLife,
                actual: ActionMode::Idle,
            },
        }
    );
    assert_eq!(h.persisted(), vec![0]);
}

#[tokio::test]
async fn test_hitting_dead_participant_resets_mode() {
    let h = Harness::new(&["a", "b", "c"], 1).await;
    h.hit("a").await;
    h.hit("b").await;

    h.session.select_mode(ActionMode::SubtractLife).unwrap();
    let err = h.session.subtract_life(&id("b")).await.unwrap_err();
    assert!(matches!(
        err,
        TrackerError::Precondition {
            kind: PreconditionKind::ParticipantDead { .. }
        }
    ));
    assert_eq!(h.session.mode(), ActionMode::Idle);
    assert_eq!(h.session.latest_round_number(), RoundNumber::new(2));
}

#[tokio::test]
async fn test_unknown_participant_is_rejected() {
    let h = Harness::new(&["a", "b"], 3).await;
    h.session.select_mode(ActionMode::SubtractLife).unwrap();
    let err = h.session.subtract_life(&id("nobody")).await.unwrap_err();
    assert!(err.is_precondition());
    assert_eq!(h.session.mode(), ActionMode::Idle);
}

#[tokio::test]
async fn test_switching_between_action_modes_is_rejected() {
    let h = Harness::new(&["a", "b"], 3).await;
    h.session.select_mode(ActionMode::SubtractLife).unwrap();
    let err = h.session.select_mode(ActionMode::DetonateNuke).unwrap_err();
    assert!(matches!(
        err,
        TrackerError::Precondition {
            kind: PreconditionKind::ModeConflict { .. }
        }
    ));
    assert_eq!(h.session.mode(), ActionMode::Idle);
}

#[tokio::test]
async fn test_selecting_active_mode_again_leaves_it() {
    let h = Harness::new(&["a", "b"], 3).await;
    assert_eq!(
        h.session.select_mode(ActionMode::DetonateNuke).unwrap(),
        ActionMode::DetonateNuke
    );
    assert_eq!(
        h.session.select_mode(ActionMode::DetonateNuke).unwrap(),
        ActionMode::Idle
    );
}

#[tokio::test]
async fn test_mode_changes_are_reported() {
    let h = Harness::new(&["a", "b"], 3).await;
    h.hit("a").await;
    let events: Vec<_> = h.session.events().collect();
    assert_eq!(
        events,
        vec![
            TrackerEvent::ModeChanged {
                from: ActionMode::Idle,
                to: ActionMode::SubtractLife,
            },
            TrackerEvent::ModeChanged {
                from: ActionMode::SubtractLife,
                to: ActionMode::Idle,
            },
            TrackerEvent::RoundCommitted {
                round: RoundNumber::new(1),
            },
        ]
    );
}

#[tokio::test]
async fn test_nuke_hits_everyone_but_detonator() {
    let h = Harness::new(&["a", "b", "c"], 3).await;
    h.session.select_mode(ActionMode::DetonateNuke).unwrap();
    let outcome = h.session.detonate_nuke_with(&id("a"), None).await.unwrap();
    assert_eq!(outcome.round, RoundNumber::new(1));

    let round = h.session.current_round();
    assert_eq!(round.lives_of(&id("a")), Some(3));
    assert_eq!(round.lives_of(&id("b")), Some(2));
    assert_eq!(round.lives_of(&id("c")), Some(2));
    assert_eq!(round.nuke_detonator(), Some(&id("a")));
}

#[tokio::test]
async fn test_nuke_single_candidate_swims() {
    let h = Harness::new(&["a", "b", "c"], 2).await;
    h.hit("b").await;
    h.session.select_mode(ActionMode::DetonateNuke).unwrap();
    h.session.detonate_nuke_with(&id("a"), None).await.unwrap();

    let round = h.session.current_round();
    assert_eq!(round.swimming(), Some(&id("b")));
    assert_eq!(round.lives_of(&id("c")), Some(1));
}

#[tokio::test]
async fn test_nuke_kills_previous_swimmer() {
    let h = Harness::new(&["a", "b", "c"], 2).await;
    h.hit("b").await;
    h.hit("b").await;
    h.session.select_mode(ActionMode::DetonateNuke).unwrap();
    h.session.detonate_nuke_with(&id("a"), None).await.unwrap();

    let round = h.session.current_round();
    assert!(round.is_dead(&id("b")));
    assert_eq!(round.swimming(), None);
}

#[tokio::test]
async fn test_swimmer_detonating_keeps_swimming() {
    let h = Harness::new(&["a", "b", "c"], 1).await;
    h.hit("a").await;
    h.session.select_mode(ActionMode::DetonateNuke).unwrap();
    let candidates = h.session.check_nuke_for_conflict(&id("a")).unwrap();
    assert!(candidates.is_empty());
    h.session.detonate_nuke_with(&id("a"), None).await.unwrap();

    let round = h.session.current_round();
    assert_eq!(round.swimming(), Some(&id("a")));
    assert!(round.is_dead(&id("b")));
    assert!(round.is_dead(&id("c")));
}

#[tokio::test]
async fn test_dead_detonator_is_rejected() {
    let h = Harness::new(&["a", "b", "c"], 1).await;
    h.hit("a").await;
    h.hit("b").await;
    h.session.select_mode(ActionMode::DetonateNuke).unwrap();
    let err = h.session.detonate_nuke_with(&id("b"), None).await.unwrap_err();
    assert!(err.is_precondition());
    assert_eq!(h.session.mode(), ActionMode::Idle);
}
