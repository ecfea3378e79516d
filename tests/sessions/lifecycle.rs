//! Game lifecycle integration tests: win trigger, reset, cancel and resume.

// Allow test-specific patterns that are appropriate for test code
#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use crate::common::{game, id, Harness};
use schwimmen_tracker::{
    ActionMode, GameBuilder, GameStatus, Participant, PersistedGame, PreconditionKind,
    RemoteOperation, RoundNumber, RoundSnapshot, StoreCall, TrackerConfig, TrackerError,
    TrackerEvent,
};

/// Two participants with one life each: two hits on `b` decide the game.
async fn one_hit_from_winning() -> Harness {
    let h = Harness::new(&["a", "b"], 1).await;
    h.hit("b").await;
    h
}

#[tokio::test]
async fn test_game_completes_after_deciding_commit() {
    let h = one_hit_from_winning().await;
    assert_eq!(h.session.status(), GameStatus::Active);
    assert_eq!(h.session.check_win_condition(), None);

    h.session.select_mode(ActionMode::SubtractLife).unwrap();
    let outcome = h.session.subtract_life(&id("b")).await.unwrap();

    let result = outcome.result.expect("game decided");
    assert_eq!(result.winner, id("a"));
    assert!(!result.win_by_nuke);
    assert_eq!(h.session.status(), GameStatus::Completed);
    assert_eq!(h.session.result(), Some(result.clone()));
    assert_eq!(h.memory.status(&game()), Some(GameStatus::Completed));
    assert_eq!(h.memory.result(&game()), Some(result.clone()));
    assert!(h
        .events()
        .contains(&TrackerEvent::GameCompleted { result }));
}

#[tokio::test]
async fn test_win_fires_only_once() {
    let h = one_hit_from_winning().await;
    h.hit("b").await;
    h.memory.clear_calls();

    let err = h.session.complete_if_won().await.unwrap_err();
    assert!(matches!(
        err,
        TrackerError::Precondition {
            kind: PreconditionKind::GameNotActive {
                status: GameStatus::Completed,
            }
        }
    ));
    assert!(h.memory.calls().is_empty());
}

#[tokio::test]
async fn test_uncommitted_round_does_not_complete() {
    let h = one_hit_from_winning().await;
    h.chaos.fail_next(RemoteOperation::CreateRound, 1);
    h.session.select_mode(ActionMode::SubtractLife).unwrap();
    assert!(h.session.subtract_life(&id("b")).await.is_err());

    assert_eq!(h.session.status(), GameStatus::Active);
    assert_eq!(h.session.check_win_condition(), None);
    assert!(!h
        .memory
        .calls()
        .iter()
        .any(|call| matches!(call, StoreCall::UpdateStatus { .. })));
}

#[tokio::test]
async fn test_nuke_win_is_flagged() {
    let h = Harness::new(&["a", "b", "c"], 1).await;
    h.hit("b").await;
    h.hit("c").await;
    h.session.select_mode(ActionMode::DetonateNuke).unwrap();
    let outcome = h.session.detonate_nuke_with(&id("a"), None).await.unwrap();

    let result = outcome.result.expect("nuke decided the game");
    assert_eq!(result.winner, id("a"));
    assert!(result.win_by_nuke);
}

#[tokio::test]
async fn test_failed_completion_can_be_retried() {
    let h = one_hit_from_winning().await;
    h.events();
    h.chaos.fail_next(RemoteOperation::UpdateStatus, 1);

    h.session.select_mode(ActionMode::SubtractLife).unwrap();
    let outcome = h.session.subtract_life(&id("b")).await.unwrap();
    assert_eq!(outcome.round, RoundNumber::new(2));
    assert_eq!(outcome.result, None);
    assert_eq!(h.session.status(), GameStatus::Active);
    assert!(h
        .events()
        .iter()
        .any(|event| matches!(event, TrackerEvent::CompletionFailed { .. })));

    // The round itself stays committed.
    assert_eq!(h.session.synced_round_number(), RoundNumber::new(2));
    assert!(h.session.check_win_condition().is_some());

    let result = h.session.complete_if_won().await.unwrap();
    assert_eq!(result.winner, id("a"));
    assert_eq!(h.session.status(), GameStatus::Completed);
}

#[tokio::test]
async fn test_complete_without_winner_is_rejected() {
    let h = Harness::new(&["a", "b"], 3).await;
    let err = h.session.complete_if_won().await.unwrap_err();
    assert_eq!(
        err,
        TrackerError::Precondition {
            kind: PreconditionKind::NoWinner,
        }
    );
}

#[tokio::test]
async fn test_auto_complete_disabled() {
    let h = Harness::with_config(
        &["a", "b"],
        TrackerConfig {
            starting_lives: 1,
            auto_complete: false,
            ..TrackerConfig::lan()
        },
    )
    .await;
    h.hit("b").await;
    h.hit("b").await;
    assert_eq!(h.session.status(), GameStatus::Active);

    h.session.complete_if_won().await.unwrap();
    assert_eq!(h.session.status(), GameStatus::Completed);
}

#[tokio::test]
async fn test_completed_game_rejects_actions() {
    let h = one_hit_from_winning().await;
    h.hit("b").await;

    let err = h.session.select_mode(ActionMode::SubtractLife).unwrap_err();
    assert!(err.is_precondition());
    assert_eq!(h.session.mode(), ActionMode::Idle);
    // Browsing a finished game stays possible.
    h.session.set_current_round(RoundNumber::ZERO).unwrap();
}

#[tokio::test]
async fn test_reset_keeps_only_round_zero() {
    let h = Harness::new(&["a", "b"], 3).await;
    h.hit("a").await;
    h.hit("b").await;
    h.events();

    h.session.reset_rounds().await.unwrap();
    assert_eq!(h.persisted(), vec![0]);
    assert_eq!(h.session.latest_round_number(), RoundNumber::ZERO);
    assert_eq!(h.session.current_round_number(), RoundNumber::ZERO);
    assert_eq!(h.lives("a"), Some(3));
    assert_eq!(h.events(), vec![TrackerEvent::HistoryReset]);

    assert_eq!(h.hit("a").await, RoundNumber::new(1));
}

#[tokio::test]
async fn test_failed_reset_changes_nothing() {
    let h = Harness::new(&["a", "b"], 3).await;
    h.hit("a").await;
    h.chaos.fail_next(RemoteOperation::DeleteRounds, 1);

    assert!(h.session.reset_rounds().await.unwrap_err().is_remote());
    assert_eq!(h.session.latest_round_number(), RoundNumber::new(1));
    assert_eq!(h.persisted(), vec![0, 1]);
    assert_eq!(h.observer.len(), 1);
}

#[tokio::test]
async fn test_cancel_is_terminal() {
    let h = Harness::new(&["a", "b"], 3).await;
    h.session.cancel_game().await.unwrap();
    assert_eq!(h.session.status(), GameStatus::Cancelled);
    assert_eq!(h.memory.status(&game()), Some(GameStatus::Cancelled));
    assert!(h.events().contains(&TrackerEvent::GameCancelled));

    let err = h.session.cancel_game().await.unwrap_err();
    assert!(err.is_precondition());
    assert!(h.session.reset_rounds().await.is_err());
}

#[tokio::test]
async fn test_resume_continues_where_store_left_off() {
    let h = Harness::new(&["a", "b", "c"], 3).await;
    h.hit("a").await;
    h.hit("c").await;

    let resumed = GameBuilder::new(game())
        .add_participants([
            Participant::new("a", "A"),
            Participant::new("b", "B"),
            Participant::new("c", "C"),
        ])
        .unwrap()
        .resume_from_store(h.memory.clone())
        .await
        .unwrap();

    assert_eq!(resumed.status(), GameStatus::Active);
    assert_eq!(resumed.current_round_number(), RoundNumber::new(2));
    assert_eq!(resumed.synced_round_number(), RoundNumber::new(2));
    assert_eq!(resumed.current_round().lives_of(&id("c")), Some(2));

    resumed.select_mode(ActionMode::SubtractLife).unwrap();
    let outcome = resumed.subtract_life(&id("b")).await.unwrap();
    assert_eq!(outcome.round, RoundNumber::new(3));
}

#[tokio::test]
async fn test_resume_completed_game_from_persisted_data() {
    let memory = schwimmen_tracker::InMemoryRoundStore::new();
    let ids = [id("a"), id("b")];
    let zero = RoundSnapshot::initial(&ids, 1);
    let mut lives = zero.lives().clone();
    lives.insert(id("b"), -1);
    let decided = RoundSnapshot::from_parts(RoundNumber::new(1), lives, None, None, 0);

    memory.insert_persisted(
        game(),
        PersistedGame {
            status: GameStatus::Completed,
            rounds: vec![zero, decided.clone()],
            result: decided.result(),
        },
    );

    let resumed = GameBuilder::new(game())
        .add_participants([Participant::new("a", "A"), Participant::new("b", "B")])
        .unwrap()
        .resume_from_store(memory)
        .await
        .unwrap();

    assert_eq!(resumed.status(), GameStatus::Completed);
    assert_eq!(resumed.result().unwrap().winner, id("a"));
    assert!(resumed.select_mode(ActionMode::SubtractLife).is_err());
}

#[tokio::test]
async fn test_resume_rejects_participant_mismatch() {
    let h = Harness::new(&["a", "b"], 3).await;
    let err = GameBuilder::new(game())
        .add_participants([Participant::new("a", "A"), Participant::new("x", "X")])
        .unwrap()
        .resume_from_store(h.memory.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, TrackerError::InvalidHistory { .. }));
}
