//! Store consistency under injected faults.
//!
//! Drives a full [`GameSession`] against a [`ChaosStore`] with random actions, navigation
//! and refused calls. Whenever no operation is in flight, the session's rounds must be
//! exactly what the store holds.
//!
//! [`GameSession`]: schwimmen_tracker::GameSession

// Allow test-specific patterns that are appropriate for test code
#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

use std::sync::Arc;

use proptest::prelude::*;
use schwimmen_tracker::{
    ActionMode, ChaosConfig, ChaosStore, GameBuilder, GameId, GameSession, InMemoryRoundStore,
    Participant, ParticipantId, RemoteOperation, RoundStore, TrackerConfig,
};

#[derive(Debug, Clone)]
enum Action {
    Hit(usize),
    Nuke { detonator: usize, pick: usize },
    Undo,
    Redo,
    Reset,
}

#[derive(Debug, Clone)]
struct Turn {
    action: Action,
    refuse: Option<RemoteOperation>,
}

fn action_strategy(players: usize) -> impl Strategy<Value = Action> {
    prop_oneof![
        6 => (0..players).prop_map(Action::Hit),
        2 => (0..players, any::<usize>())
            .prop_map(|(detonator, pick)| Action::Nuke { detonator, pick }),
        2 => Just(Action::Undo),
        1 => Just(Action::Redo),
        1 => Just(Action::Reset),
    ]
}

fn refuse_strategy() -> impl Strategy<Value = Option<RemoteOperation>> {
    prop_oneof![
        6 => Just(None),
        1 => Just(Some(RemoteOperation::CreateRound)),
        1 => Just(Some(RemoteOperation::DeleteRounds)),
        1 => Just(Some(RemoteOperation::UpdateStatus)),
    ]
}

fn turns_strategy() -> impl Strategy<Value = (usize, Vec<Turn>)> {
    (2usize..5).prop_flat_map(|players| {
        let turn = (action_strategy(players), refuse_strategy())
            .prop_map(|(action, refuse)| Turn { action, refuse });
        (Just(players), prop::collection::vec(turn, 1..40))
    })
}

async fn play<S: RoundStore>(session: &GameSession<S>, ids: &[ParticipantId], action: &Action) {
    match action {
        Action::Hit(i) => {
            if session.select_mode(ActionMode::SubtractLife).is_ok() {
                let _ = session.subtract_life(&ids[*i]).await;
            }
        },
        Action::Nuke { detonator, pick } => {
            if session.select_mode(ActionMode::DetonateNuke).is_ok() {
                let chooser = |candidates: &[ParticipantId]| -> Option<ParticipantId> {
                    Some(candidates[pick % candidates.len()].clone())
                };
                let _ = session.detonate_nuke(&ids[*detonator], &chooser).await;
            }
        },
        Action::Undo => {
            let _ = session.undo();
        },
        Action::Redo => {
            let _ = session.redo();
        },
        Action::Reset => {
            let _ = session.reset_rounds().await;
        },
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// After every operation the synced history equals the store's contents.
    #[test]
    fn prop_session_mirrors_store((players, turns) in turns_strategy()) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();

        runtime.block_on(async move {
            let game = GameId::new("prop-game");
            let memory = InMemoryRoundStore::new();
            memory.insert_game(game.clone());
            let chaos = Arc::new(ChaosStore::new(memory.clone(), ChaosConfig::passthrough()));
            let ids: Vec<ParticipantId> =
                (0..players).map(|i| ParticipantId::new(format!("p{i}"))).collect();
            let session = GameBuilder::new(game.clone())
                .with_config(TrackerConfig { starting_lives: 2, ..TrackerConfig::offline() })
                .add_participants(ids.iter().map(|id| Participant::new(id.as_str(), id.as_str())))
                .unwrap()
                .start(Arc::clone(&chaos))
                .await
                .unwrap();

            for turn in &turns {
                if let Some(operation) = turn.refuse {
                    chaos.fail_always(operation);
                }
                play(&session, &ids, &turn.action).await;
                chaos.heal();

                prop_assert!(!session.is_pending());
                prop_assert_eq!(session.mode(), ActionMode::Idle);
                prop_assert_eq!(session.synced_round_number(), session.latest_round_number());
                prop_assert_eq!(
                    session.rounds(),
                    memory.rounds(&game).unwrap(),
                    "session and store disagree after {:?}",
                    turn
                );
                prop_assert_eq!(Some(session.status()), memory.status(&game));
            }
            Ok(())
        })?;
    }
}
