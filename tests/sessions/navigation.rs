//! Cursor navigation and branch truncation integration tests.

// Allow test-specific patterns that are appropriate for test code
#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use crate::common::{game, id, Harness};
use schwimmen_tracker::{
    ActionMode, PreconditionKind, RoundNumber, StoreCall, TrackerError, TrackerEvent,
};

#[tokio::test]
async fn test_undo_twice_then_commit_truncates_remotely() {
    let h = Harness::new(&["a", "b", "c"], 3).await;
    h.hit("a").await;
    h.hit("b").await;
    h.hit("c").await;
    h.hit("a").await;
    assert_eq!(h.persisted(), vec![0, 1, 2, 3, 4]);

    assert!(h.session.undo().unwrap());
    assert!(h.session.undo().unwrap());
    assert_eq!(h.session.current_round_number(), RoundNumber::new(2));
    // Navigation alone never touches the store.
    assert_eq!(h.persisted(), vec![0, 1, 2, 3, 4]);

    h.memory.clear_calls();
    let round = h.hit("b").await;
    assert_eq!(round, RoundNumber::new(3));

    assert_eq!(h.persisted(), vec![0, 1, 2, 3]);
    assert_eq!(h.session.latest_round_number(), RoundNumber::new(3));
    assert_eq!(h.session.synced_round_number(), RoundNumber::new(3));
    assert_eq!(h.lives("b"), Some(1));
    assert_eq!(h.lives("c"), Some(3));
    assert_eq!(
        h.memory.calls(),
        vec![
            StoreCall::DeleteRoundsFrom {
                game: game(),
                round: RoundNumber::new(3),
            },
            StoreCall::CreateRound {
                game: game(),
                round: RoundNumber::new(3),
            },
        ]
    );
    let persisted = h.memory.rounds(&game()).unwrap();
    assert_eq!(persisted[3].lives_of(&id("b")), Some(1));
}

#[tokio::test]
async fn test_redo_walks_forward_to_latest() {
    let h = Harness::new(&["a", "b"], 3).await;
    h.hit("a").await;
    h.hit("a").await;
    h.session.set_current_round(RoundNumber::ZERO).unwrap();

    assert!(!h.session.can_undo());
    assert!(h.session.can_redo());
    assert!(!h.session.undo().unwrap());

    assert!(h.session.redo().unwrap());
    assert!(h.session.redo().unwrap());
    assert!(!h.session.redo().unwrap());
    assert_eq!(h.session.current_round_number(), RoundNumber::new(2));
    assert_eq!(h.lives("a"), Some(1));
}

#[tokio::test]
async fn test_navigation_shows_historic_snapshot() {
    let h = Harness::new(&["a", "b"], 3).await;
    h.hit("a").await;
    h.hit("b").await;
    h.session.set_current_round(RoundNumber::new(1)).unwrap();

    assert_eq!(h.lives("a"), Some(2));
    assert_eq!(h.lives("b"), Some(3));
    assert_eq!(h.session.rounds().len(), 3);
    assert_eq!(
        h.session.round(RoundNumber::new(2)).unwrap().lives_of(&id("b")),
        Some(2)
    );
}

#[tokio::test]
async fn test_out_of_range_round_is_rejected() {
    let h = Harness::new(&["a", "b"], 3).await;
    h.hit("a").await;
    let err = h.session.set_current_round(RoundNumber::new(5)).unwrap_err();
    assert_eq!(
        err,
        TrackerError::Precondition {
            kind: PreconditionKind::RoundOutOfRange {
                requested: RoundNumber::new(5),
                latest: RoundNumber::new(1),
            },
        }
    );
    assert_eq!(h.session.current_round_number(), RoundNumber::new(1));
}

#[tokio::test]
async fn test_navigation_while_acting_resets_mode() {
    let h = Harness::new(&["a", "b"], 3).await;
    h.hit("a").await;
    h.session.select_mode(ActionMode::SubtractLife).unwrap();
    h.events();

    let err = h.session.undo().unwrap_err();
    assert_eq!(
        err,
        TrackerError::Precondition {
            kind: PreconditionKind::NavigationWhileActing {
                mode: ActionMode::SubtractLife,
            },
        }
    );
    assert_eq!(h.session.mode(), ActionMode::Idle);
    assert_eq!(h.session.current_round_number(), RoundNumber::new(1));
    let events: Vec<_> = h.session.events().collect();
    assert_eq!(
        events,
        vec![TrackerEvent::ModeChanged {
            from: ActionMode::SubtractLife,
            to: ActionMode::Idle,
        }]
    );
}

#[tokio::test]
async fn test_commit_at_latest_round_does_not_delete() {
    let h = Harness::new(&["a", "b"], 3).await;
    h.hit("a").await;
    h.memory.clear_calls();
    h.hit("b").await;
    assert!(h
        .memory
        .calls()
        .iter()
        .all(|call| !matches!(call, StoreCall::DeleteRoundsFrom { .. })));
}

#[tokio::test]
async fn test_action_from_round_zero_replaces_everything() {
    let h = Harness::new(&["a", "b"], 3).await;
    h.hit("a").await;
    h.hit("a").await;
    h.session.set_current_round(RoundNumber::ZERO).unwrap();

    h.hit("b").await;
    assert_eq!(h.persisted(), vec![0, 1]);
    assert_eq!(h.lives("a"), Some(3));
    assert_eq!(h.lives("b"), Some(2));
    assert!(!h.session.can_redo());
}
