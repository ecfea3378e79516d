//! Optimistic synchronization integration tests.
//!
//! Every test here injects a store fault (or holds a call open) and checks that the
//! session either commits fully or ends up exactly at its last synced state.

// Allow test-specific patterns that are appropriate for test code
#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use std::time::Duration;

use crate::common::{game, id, start_session, GatedStore, Harness, TEST_TIMEOUT};
use schwimmen_tracker::assert_violation;
use schwimmen_tracker::telemetry::{ViolationKind, ViolationSeverity};
use schwimmen_tracker::{
    ActionMode, ChaosConfig, ChaosStore, FailurePlan, GameBuilder, InMemoryRoundStore,
    Participant, RemoteOperation, RoundNumber, StoreCall, StoreError, TrackerConfig,
    TrackerError, TrackerEvent,
};

#[tokio::test]
async fn test_create_failure_rolls_back() {
    let h = Harness::new(&["a", "b"], 3).await;
    h.hit("a").await;
    h.events();

    h.chaos.fail_next(RemoteOperation::CreateRound, 1);
    h.session.select_mode(ActionMode::SubtractLife).unwrap();
    let err = h.session.subtract_life(&id("a")).await.unwrap_err();

    assert!(matches!(
        err,
        TrackerError::RemoteRejection {
            operation: RemoteOperation::CreateRound,
            source: StoreError::Unavailable { .. },
        }
    ));
    assert_eq!(h.session.latest_round_number(), RoundNumber::new(1));
    assert_eq!(h.session.current_round_number(), RoundNumber::new(1));
    assert_eq!(h.lives("a"), Some(2));
    assert_eq!(h.session.mode(), ActionMode::Idle);
    assert!(!h.session.is_pending());
    assert_eq!(h.persisted(), vec![0, 1]);
    assert_eq!(
        h.events(),
        vec![TrackerEvent::RolledBack {
            to_round: RoundNumber::new(1),
            operation: RemoteOperation::CreateRound,
        }]
    );

    let violations = h.observer.violations();
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].kind, ViolationKind::RemoteSync);
    assert_eq!(violations[0].severity, ViolationSeverity::Warning);
    assert_eq!(violations[0].round, Some(RoundNumber::new(1)));
}

#[tokio::test]
async fn test_session_recovers_after_failure() {
    let h = Harness::new(&["a", "b"], 3).await;
    h.chaos.fail_next(RemoteOperation::CreateRound, 1);
    h.session.select_mode(ActionMode::SubtractLife).unwrap();
    assert!(h.session.subtract_life(&id("b")).await.is_err());

    let round = h.hit("b").await;
    assert_eq!(round, RoundNumber::new(1));
    assert_eq!(h.lives("b"), Some(2));
    assert_eq!(h.persisted(), vec![0, 1]);
}

#[tokio::test]
async fn test_lost_reply_rolls_back_locally() {
    let h = Harness::new(&["a", "b"], 3).await;
    h.chaos.lose_reply_next(RemoteOperation::CreateRound, 1);
    h.session.select_mode(ActionMode::SubtractLife).unwrap();
    assert!(h.session.subtract_life(&id("b")).await.is_err());

    // The store applied the round even though the session never learned about it.
    assert_eq!(h.session.latest_round_number(), RoundNumber::ZERO);
    assert_eq!(h.persisted(), vec![0, 1]);
    assert_eq!(h.chaos.stats().lost_replies, 1);
}

#[tokio::test]
async fn test_lost_reply_does_not_block_later_commits() {
    let h = Harness::new(&["a", "b"], 3).await;
    h.chaos.lose_reply_next(RemoteOperation::CreateRound, 1);
    h.session.select_mode(ActionMode::SubtractLife).unwrap();
    assert!(h.session.subtract_life(&id("b")).await.is_err());
    assert_violation!(h.observer, ViolationKind::RemoteSync);
    assert_eq!(
        h.observer.violations()[0]
            .context
            .get("stale_remote_from")
            .map(String::as_str),
        Some("1")
    );
    h.memory.clear_calls();

    for expected in 1..=3 {
        assert_eq!(h.hit("b").await, RoundNumber::new(expected));
    }
    assert_eq!(h.persisted(), vec![0, 1, 2, 3]);
    assert_eq!(h.lives("b"), Some(0));
    assert_eq!(h.session.rounds(), h.memory.rounds(&game()).unwrap());
    // Only the first commit after the lost reply clears the stale tail.
    let deletes = h
        .memory
        .calls()
        .into_iter()
        .filter(|call| matches!(call, StoreCall::DeleteRoundsFrom { .. }))
        .count();
    assert_eq!(deletes, 1);
}

#[tokio::test]
async fn test_delete_failure_keeps_old_branch() {
    let h = Harness::new(&["a", "b", "c"], 3).await;
    h.hit("a").await;
    h.hit("b").await;
    h.hit("c").await;
    h.session.set_current_round(RoundNumber::new(1)).unwrap();
    h.events();

    h.chaos.fail_next(RemoteOperation::DeleteRounds, 1);
    h.session.select_mode(ActionMode::SubtractLife).unwrap();
    let err = h.session.subtract_life(&id("c")).await.unwrap_err();

    assert!(matches!(
        err,
        TrackerError::RemoteRejection {
            operation: RemoteOperation::DeleteRounds,
            ..
        }
    ));
    assert_eq!(h.session.latest_round_number(), RoundNumber::new(3));
    assert_eq!(h.session.current_round_number(), RoundNumber::new(3));
    assert_eq!(h.persisted(), vec![0, 1, 2, 3]);
    assert_eq!(
        h.events(),
        vec![TrackerEvent::RolledBack {
            to_round: RoundNumber::new(3),
            operation: RemoteOperation::DeleteRounds,
        }]
    );
}

#[tokio::test]
async fn test_create_failure_after_truncation_keeps_truncation() {
    let h = Harness::new(&["a", "b", "c"], 3).await;
    h.hit("a").await;
    h.hit("b").await;
    h.session.set_current_round(RoundNumber::new(1)).unwrap();

    h.chaos.fail_next(RemoteOperation::CreateRound, 1);
    h.session.select_mode(ActionMode::SubtractLife).unwrap();
    assert!(h.session.subtract_life(&id("c")).await.is_err());

    // Round 2 is gone remotely, so the synced history ends at round 1.
    assert_eq!(h.persisted(), vec![0, 1]);
    assert_eq!(h.session.latest_round_number(), RoundNumber::new(1));
    assert_eq!(h.session.synced_round_number(), RoundNumber::new(1));
    assert_eq!(h.lives("b"), Some(3));
}

fn short_timeout() -> TrackerConfig {
    TrackerConfig {
        remote_timeout: Some(Duration::from_millis(50)),
        ..TrackerConfig::default()
    }
}

#[tokio::test]
async fn test_remote_timeout_rolls_back() {
    let memory = InMemoryRoundStore::new();
    memory.insert_game(game());
    let store = GatedStore::new(memory.clone());
    let session = GameBuilder::new(game())
        .with_config(short_timeout())
        .add_participants([Participant::new("a", "A"), Participant::new("b", "B")])
        .unwrap()
        .start(&store)
        .await
        .unwrap();

    store.close();
    session.select_mode(ActionMode::SubtractLife).unwrap();
    let err = tokio::time::timeout(TEST_TIMEOUT, session.subtract_life(&id("a")))
        .await
        .expect("remote timeout fired before the test deadline")
        .unwrap_err();

    assert!(matches!(
        err,
        TrackerError::RemoteRejection {
            operation: RemoteOperation::CreateRound,
            source: StoreError::Timeout { after },
        } if after == Duration::from_millis(50)
    ));
    assert!(!session.is_pending());
    assert_eq!(session.latest_round_number(), RoundNumber::ZERO);
    assert_eq!(memory.round_numbers(&game()), vec![RoundNumber::ZERO]);

    store.open();
    session.select_mode(ActionMode::SubtractLife).unwrap();
    let outcome = session.subtract_life(&id("a")).await.unwrap();
    assert_eq!(outcome.round, RoundNumber::new(1));
    assert_eq!(memory.round_numbers(&game()).len(), 2);
}

#[tokio::test]
async fn test_start_on_slow_store_times_out() {
    let memory = InMemoryRoundStore::new();
    memory.insert_game(game());
    let slow = ChaosStore::new(memory.clone(), ChaosConfig::slow(Duration::from_secs(30)));
    let started = GameBuilder::new(game())
        .with_config(short_timeout())
        .add_participants([Participant::new("a", "A"), Participant::new("b", "B")])
        .unwrap()
        .start(slow);
    let err = tokio::time::timeout(TEST_TIMEOUT, started)
        .await
        .expect("remote timeout fired before the test deadline")
        .unwrap_err();

    assert!(err.is_remote());
    assert!(memory.round_numbers(&game()).is_empty());
}

#[tokio::test]
async fn test_failure_plan_sequence() {
    let h = Harness::new(&["a", "b"], 3).await;
    h.chaos
        .set_plan(RemoteOperation::CreateRound, FailurePlan::FailNext(2));

    for _ in 0..2 {
        h.session.select_mode(ActionMode::SubtractLife).unwrap();
        assert!(h.session.subtract_life(&id("a")).await.is_err());
    }
    h.hit("a").await;

    assert_eq!(h.chaos.stats().injected_failures, 2);
    assert_eq!(h.persisted(), vec![0, 1]);
    assert_eq!(h.observer.len(), 2);
}

#[tokio::test]
async fn test_second_operation_while_pending_is_rejected() {
    let memory = InMemoryRoundStore::new();
    memory.insert_game(game());
    let store = GatedStore::new(memory.clone());
    let session = start_session(&store, &["a", "b"], 3).await.unwrap();

    store.close();
    session.select_mode(ActionMode::SubtractLife).unwrap();
    let target = id("a");
    let first = session.subtract_life(&target);
    let second = async {
        store.arrived().await;
        assert!(session.is_pending());
        // The optimistic round is visible right away.
        assert_eq!(session.latest_round_number(), RoundNumber::new(1));
        assert_eq!(session.synced_round_number(), RoundNumber::ZERO);

        assert_eq!(
            session.select_mode(ActionMode::DetonateNuke).unwrap_err(),
            TrackerError::OperationPending
        );
        assert_eq!(
            session.subtract_life(&id("b")).await.unwrap_err(),
            TrackerError::OperationPending
        );
        assert_eq!(
            session.cancel_game().await.unwrap_err(),
            TrackerError::OperationPending
        );
        assert!(session.undo().is_err());
        store.release_one();
    };
    let (first, ()) = tokio::time::timeout(TEST_TIMEOUT, async { tokio::join!(first, second) })
        .await
        .expect("operation finished in time");

    assert_eq!(first.unwrap().round, RoundNumber::new(1));
    assert!(!session.is_pending());
    assert_eq!(session.synced_round_number(), RoundNumber::new(1));
    assert_eq!(memory.round_numbers(&game()).len(), 2);
}

#[tokio::test]
async fn test_dropped_operation_rolls_back() {
    let memory = InMemoryRoundStore::new();
    memory.insert_game(game());
    let store = GatedStore::new(memory.clone());
    let session = start_session(&store, &["a", "b"], 3).await.unwrap();

    store.close();
    session.select_mode(ActionMode::SubtractLife).unwrap();
    let target = id("a");
    {
        let commit = session.subtract_life(&target);
        tokio::select! {
            _ = commit => panic!("the gate is closed"),
            () = store.arrived() => {},
        }
    }
    store.open();

    assert!(!session.is_pending());
    assert_eq!(session.mode(), ActionMode::Idle);
    assert_eq!(session.latest_round_number(), RoundNumber::ZERO);
    assert!(session.events().any(|event| event
        == TrackerEvent::RolledBack {
            to_round: RoundNumber::ZERO,
            operation: RemoteOperation::CreateRound,
        }));
    assert_eq!(memory.round_numbers(&game()), vec![RoundNumber::ZERO]);

    session.select_mode(ActionMode::SubtractLife).unwrap();
    session.subtract_life(&id("a")).await.unwrap();
    assert_eq!(memory.round_numbers(&game()).len(), 2);
}

#[tokio::test]
async fn test_truncation_is_journaled_before_create() {
    let h = Harness::new(&["a", "b"], 3).await;
    h.hit("a").await;
    h.hit("a").await;
    h.session.undo().unwrap();
    h.memory.clear_calls();

    h.hit("b").await;
    assert_eq!(
        h.memory.calls(),
        vec![
            StoreCall::DeleteRoundsFrom {
                game: game(),
                round: RoundNumber::new(2),
            },
            StoreCall::CreateRound {
                game: game(),
                round: RoundNumber::new(2),
            },
        ]
    );
}
