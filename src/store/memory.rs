//! An in-process [`RoundStore`].

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use super::{PersistedGame, RoundStore, StatusUpdate, StoreError};
use crate::snapshot::{GameResult, RoundSnapshot};
use crate::{GameId, GameStatus, RoundNumber};

/// One call received by an [`InMemoryRoundStore`], recorded whether or not it succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    /// `create_round(game, round, _)`
    CreateRound {
        /// The game.
        game: GameId,
        /// The round that was to be created.
        round: RoundNumber,
    },
    /// `delete_rounds_from(game, round)`
    DeleteRoundsFrom {
        /// The game.
        game: GameId,
        /// The first round to delete.
        round: RoundNumber,
    },
    /// `update_game_status(game, update)`
    UpdateStatus {
        /// The game.
        game: GameId,
        /// The requested status.
        status: GameStatus,
    },
    /// `fetch_game(game)`
    FetchGame {
        /// The game.
        game: GameId,
    },
}

#[derive(Debug, Default)]
struct StoredGame {
    status: GameStatus,
    rounds: Vec<RoundSnapshot>,
    result: Option<GameResult>,
}

/// Calls kept by [`InMemoryRoundStore::new`].
pub const DEFAULT_JOURNAL_CAPACITY: usize = 256;

#[derive(Debug)]
struct Inner {
    games: BTreeMap<GameId, StoredGame>,
    calls: VecDeque<StoreCall>,
    journal_capacity: usize,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            games: BTreeMap::new(),
            calls: VecDeque::new(),
            journal_capacity: DEFAULT_JOURNAL_CAPACITY,
        }
    }
}

/// A [`RoundStore`] that keeps everything in memory.
///
/// Clones share the same data, so a test can hand one clone to a session and inspect the
/// other. Games must be registered with [`insert_game`](Self::insert_game) before rounds
/// can be created for them.
///
/// Received calls are journaled for inspection. The journal keeps only the most recent
/// [`DEFAULT_JOURNAL_CAPACITY`] calls; see [`with_journal_capacity`](Self::with_journal_capacity).
#[derive(Debug, Clone, Default)]
pub struct InMemoryRoundStore {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryRoundStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store whose journal keeps at most `capacity` calls.
    ///
    /// A capacity of 0 disables the journal.
    #[must_use]
    pub fn with_journal_capacity(capacity: usize) -> Self {
        let store = Self::default();
        store.inner.lock().journal_capacity = capacity;
        store
    }

    /// Registers an active game without rounds. Existing data for `game` is replaced.
    pub fn insert_game(&self, game: GameId) {
        self.inner.lock().games.insert(game, StoredGame::default());
    }

    /// Registers a game with already persisted data. Existing data for `game` is replaced.
    pub fn insert_persisted(&self, game: GameId, persisted: PersistedGame) {
        self.inner.lock().games.insert(
            game,
            StoredGame {
                status: persisted.status,
                rounds: persisted.rounds,
                result: persisted.result,
            },
        );
    }

    /// The persisted rounds of `game`, or `None` for an unknown game.
    #[must_use]
    pub fn rounds(&self, game: &GameId) -> Option<Vec<RoundSnapshot>> {
        self.inner.lock().games.get(game).map(|g| g.rounds.clone())
    }

    /// The persisted round numbers of `game`. Empty for an unknown game.
    #[must_use]
    pub fn round_numbers(&self, game: &GameId) -> Vec<RoundNumber> {
        self.inner
            .lock()
            .games
            .get(game)
            .map(|g| g.rounds.iter().map(RoundSnapshot::round).collect())
            .unwrap_or_default()
    }

    /// The persisted status of `game`.
    #[must_use]
    pub fn status(&self, game: &GameId) -> Option<GameStatus> {
        self.inner.lock().games.get(game).map(|g| g.status)
    }

    /// The persisted result of `game`, once completed.
    #[must_use]
    pub fn result(&self, game: &GameId) -> Option<GameResult> {
        self.inner
            .lock()
            .games
            .get(game)
            .and_then(|g| g.result.clone())
    }

    /// The journaled calls, oldest first.
    #[must_use]
    pub fn calls(&self) -> Vec<StoreCall> {
        self.inner.lock().calls.iter().cloned().collect()
    }

    /// Forgets the recorded calls.
    pub fn clear_calls(&self) {
        self.inner.lock().calls.clear();
    }

    fn with_game<T>(
        &self,
        call: StoreCall,
        game: &GameId,
        f: impl FnOnce(&mut StoredGame) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut inner = self.inner.lock();
        trace!(?call, "store call");
        if inner.journal_capacity > 0 {
            if inner.calls.len() == inner.journal_capacity {
                inner.calls.pop_front();
            }
            inner.calls.push_back(call);
        }
        let stored = inner
            .games
            .get_mut(game)
            .ok_or_else(|| StoreError::rejected(format!("unknown game {}", game)))?;
        f(stored)
    }
}

impl RoundStore for InMemoryRoundStore {
    async fn create_round(
        &self,
        game: &GameId,
        round: RoundNumber,
        snapshot: &RoundSnapshot,
    ) -> Result<RoundSnapshot, StoreError> {
        let call = StoreCall::CreateRound {
            game: game.clone(),
            round,
        };
        self.with_game(call, game, |stored| {
            if stored.status != GameStatus::Active {
                return Err(StoreError::rejected(format!(
                    "game {} is {:?}",
                    game, stored.status
                )));
            }
            let expected = stored.rounds.len();
            if round.as_index() != expected {
                return Err(StoreError::rejected(format!(
                    "round {} cannot be created, next round is {}",
                    round, expected
                )));
            }
            let persisted = snapshot.clone().renumbered(round);
            stored.rounds.push(persisted.clone());
            Ok(persisted)
        })
    }

    async fn delete_rounds_from(&self, game: &GameId, round: RoundNumber) -> Result<(), StoreError> {
        let call = StoreCall::DeleteRoundsFrom {
            game: game.clone(),
            round,
        };
        self.with_game(call, game, |stored| {
            stored.rounds.retain(|r| r.round() < round);
            Ok(())
        })
    }

    async fn update_game_status(
        &self,
        game: &GameId,
        update: &StatusUpdate,
    ) -> Result<GameStatus, StoreError> {
        let call = StoreCall::UpdateStatus {
            game: game.clone(),
            status: update.status(),
        };
        self.with_game(call, game, |stored| {
            if stored.status.is_terminal() {
                return Err(StoreError::rejected(format!(
                    "game {} is already {:?}",
                    game, stored.status
                )));
            }
            stored.status = update.status();
            if let StatusUpdate::Completed(result) = update {
                stored.result = Some(result.clone());
            }
            Ok(stored.status)
        })
    }

    async fn fetch_game(&self, game: &GameId) -> Result<PersistedGame, StoreError> {
        let call = StoreCall::FetchGame { game: game.clone() };
        self.with_game(call, game, |stored| {
            Ok(PersistedGame {
                status: stored.status,
                rounds: stored.rounds.clone(),
                result: stored.result.clone(),
            })
        })
    }
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
    use crate::ParticipantId;

    fn game() -> GameId {
        GameId::new("g")
    }

    fn round_zero() -> RoundSnapshot {
        let ids = [ParticipantId::new("a"), ParticipantId::new("b")];
        RoundSnapshot::initial(&ids, 3)
    }

    async fn store_with_rounds(n: u32) -> InMemoryRoundStore {
        let store = InMemoryRoundStore::new();
        store.insert_game(game());
        for round in 0..n {
            store
                .create_round(&game(), RoundNumber::new(round), &round_zero())
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn create_requires_next_round() {
        let store = store_with_rounds(2).await;
        let err = store
            .create_round(&game(), RoundNumber::new(3), &round_zero())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected { .. }));
        assert_eq!(
            store.round_numbers(&game()),
            vec![RoundNumber::new(0), RoundNumber::new(1)]
        );
    }

    #[tokio::test]
    async fn create_renumbers_to_requested_round() {
        let store = store_with_rounds(1).await;
        let stored = store
            .create_round(&game(), RoundNumber::new(1), &round_zero())
            .await
            .unwrap();
        assert_eq!(stored.round(), RoundNumber::new(1));
    }

    #[tokio::test]
    async fn unknown_game_is_rejected() {
        let store = InMemoryRoundStore::new();
        assert!(store
            .create_round(&game(), RoundNumber::ZERO, &round_zero())
            .await
            .is_err());
        assert!(store.fetch_game(&game()).await.is_err());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = store_with_rounds(4).await;
        store
            .delete_rounds_from(&game(), RoundNumber::new(2))
            .await
            .unwrap();
        store
            .delete_rounds_from(&game(), RoundNumber::new(2))
            .await
            .unwrap();
        assert_eq!(store.round_numbers(&game()).len(), 2);
    }

    #[tokio::test]
    async fn terminal_status_is_final() {
        let store = store_with_rounds(1).await;
        store
            .update_game_status(&game(), &StatusUpdate::Cancelled)
            .await
            .unwrap();
        assert!(store
            .update_game_status(&game(), &StatusUpdate::Cancelled)
            .await
            .is_err());
        assert!(store
            .create_round(&game(), RoundNumber::new(1), &round_zero())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn completion_stores_result() {
        let store = store_with_rounds(1).await;
        let result = GameResult {
            winner: ParticipantId::new("a"),
            swimming: None,
            win_by_nuke: false,
        };
        store
            .update_game_status(&game(), &StatusUpdate::Completed(result.clone()))
            .await
            .unwrap();
        let persisted = store.fetch_game(&game()).await.unwrap();
        assert_eq!(persisted.status, GameStatus::Completed);
        assert_eq!(persisted.result, Some(result));
    }

    #[tokio::test]
    async fn calls_are_journaled_in_order() {
        let store = store_with_rounds(1).await;
        store.clear_calls();
        let _ = store.delete_rounds_from(&game(), RoundNumber::new(1)).await;
        let _ = store
            .create_round(&game(), RoundNumber::new(1), &round_zero())
            .await;
        assert_eq!(
            store.calls(),
            vec![
                StoreCall::DeleteRoundsFrom {
                    game: game(),
                    round: RoundNumber::new(1)
                },
                StoreCall::CreateRound {
                    game: game(),
                    round: RoundNumber::new(1)
                },
            ]
        );
    }

    #[tokio::test]
    async fn clones_share_data() {
        let store = store_with_rounds(1).await;
        let other = store.clone();
        other
            .create_round(&game(), RoundNumber::new(1), &round_zero())
            .await
            .unwrap();
        assert_eq!(store.round_numbers(&game()).len(), 2);
    }

    #[tokio::test]
    async fn journal_keeps_most_recent_calls() {
        let store = InMemoryRoundStore::with_journal_capacity(2);
        store.insert_game(game());
        for round in 0..3 {
            store
                .create_round(&game(), RoundNumber::new(round), &round_zero())
                .await
                .unwrap();
        }
        assert_eq!(
            store.calls(),
            vec![
                StoreCall::CreateRound {
                    game: game(),
                    round: RoundNumber::new(1)
                },
                StoreCall::CreateRound {
                    game: game(),
                    round: RoundNumber::new(2)
                },
            ]
        );
        assert_eq!(store.round_numbers(&game()).len(), 3);
    }

    #[tokio::test]
    async fn journal_can_be_disabled() {
        let store = InMemoryRoundStore::with_journal_capacity(0);
        store.insert_game(game());
        store
            .create_round(&game(), RoundNumber::ZERO, &round_zero())
            .await
            .unwrap();
        assert!(store.calls().is_empty());
    }
}
