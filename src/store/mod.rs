//! The remote round store a session synchronizes against.
//!
//! Implement [`RoundStore`] for your persistence layer. The crate ships two
//! implementations: [`memory::InMemoryRoundStore`], which enforces the contracts below in
//! process, and [`chaos::ChaosStore`], which wraps any store to inject failures and latency.
//!
//! # Contracts
//!
//! - `create_round` fails unless `round` is exactly one past the last persisted round and
//!   the game is `Active`.
//! - `delete_rounds_from` removes every round `>= round`. Deleting nothing is not an error,
//!   so a session may repeat it when an earlier create call ended without an answer.
//! - `update_game_status` fails if the game is already `Completed` or `Cancelled`.
//!
//! A session issues at most one call at a time per game and never pipelines them.

pub mod chaos;
pub mod memory;

use std::error::Error;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use web_time::Duration;

use crate::snapshot::{GameResult, RoundSnapshot};
use crate::{GameId, GameStatus, RoundNumber};

/// A status change requested from the store.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StatusUpdate {
    /// The game has a winner.
    Completed(GameResult),
    /// The game was abandoned.
    Cancelled,
}

impl StatusUpdate {
    /// The status this update moves the game to.
    #[must_use]
    pub fn status(&self) -> GameStatus {
        match self {
            StatusUpdate::Completed(_) => GameStatus::Completed,
            StatusUpdate::Cancelled => GameStatus::Cancelled,
        }
    }
}

/// A game as read back from the store.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PersistedGame {
    /// The stored status.
    pub status: GameStatus,
    /// Every persisted round, ordered by round number.
    pub rounds: Vec<RoundSnapshot>,
    /// The stored result, once completed.
    pub result: Option<GameResult>,
}

/// Errors a [`RoundStore`] reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store refused the request, usually because a contract was violated.
    Rejected {
        /// Why the request was refused.
        reason: String,
    },
    /// The store could not be reached.
    Unavailable {
        /// What went wrong.
        reason: String,
    },
    /// The call did not finish within the configured timeout.
    Timeout {
        /// The timeout that elapsed.
        after: Duration,
    },
}

impl StoreError {
    /// Shorthand for [`StoreError::Rejected`].
    pub fn rejected(reason: impl Into<String>) -> Self {
        StoreError::Rejected {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`StoreError::Unavailable`].
    pub fn unavailable(reason: impl Into<String>) -> Self {
        StoreError::Unavailable {
            reason: reason.into(),
        }
    }

    /// Returns `true` if the call may have been applied even though it reported failure.
    ///
    /// Only a rejection is a definite answer.
    #[must_use]
    pub fn is_indeterminate(&self) -> bool {
        !matches!(self, StoreError::Rejected { .. })
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Rejected { reason } => write!(f, "rejected by store: {}", reason),
            StoreError::Unavailable { reason } => write!(f, "store unavailable: {}", reason),
            StoreError::Timeout { after } => {
                write!(f, "store did not answer within {}ms", after.as_millis())
            },
        }
    }
}

impl Error for StoreError {}

/// Persistence collaborator for rounds and game status.
///
/// Futures are not required to be `Send`: a session drives them on whatever executor it
/// is polled on.
pub trait RoundStore {
    /// Persists `snapshot` as `round` of `game` and returns the stored round.
    fn create_round(
        &self,
        game: &GameId,
        round: RoundNumber,
        snapshot: &RoundSnapshot,
    ) -> impl Future<Output = Result<RoundSnapshot, StoreError>>;

    /// Deletes every persisted round of `game` with a number `>= round`.
    fn delete_rounds_from(
        &self,
        game: &GameId,
        round: RoundNumber,
    ) -> impl Future<Output = Result<(), StoreError>>;

    /// Moves `game` to a terminal status and returns the stored status.
    fn update_game_status(
        &self,
        game: &GameId,
        update: &StatusUpdate,
    ) -> impl Future<Output = Result<GameStatus, StoreError>>;

    /// Reads back the status and all rounds of `game`.
    fn fetch_game(&self, game: &GameId) -> impl Future<Output = Result<PersistedGame, StoreError>>;
}

impl<S: RoundStore + ?Sized> RoundStore for &S {
    fn create_round(
        &self,
        game: &GameId,
        round: RoundNumber,
        snapshot: &RoundSnapshot,
    ) -> impl Future<Output = Result<RoundSnapshot, StoreError>> {
        (**self).create_round(game, round, snapshot)
    }

    fn delete_rounds_from(
        &self,
        game: &GameId,
        round: RoundNumber,
    ) -> impl Future<Output = Result<(), StoreError>> {
        (**self).delete_rounds_from(game, round)
    }

    fn update_game_status(
        &self,
        game: &GameId,
        update: &StatusUpdate,
    ) -> impl Future<Output = Result<GameStatus, StoreError>> {
        (**self).update_game_status(game, update)
    }

    fn fetch_game(&self, game: &GameId) -> impl Future<Output = Result<PersistedGame, StoreError>> {
        (**self).fetch_game(game)
    }
}

impl<S: RoundStore + ?Sized> RoundStore for Arc<S> {
    fn create_round(
        &self,
        game: &GameId,
        round: RoundNumber,
        snapshot: &RoundSnapshot,
    ) -> impl Future<Output = Result<RoundSnapshot, StoreError>> {
        (**self).create_round(game, round, snapshot)
    }

    fn delete_rounds_from(
        &self,
        game: &GameId,
        round: RoundNumber,
    ) -> impl Future<Output = Result<(), StoreError>> {
        (**self).delete_rounds_from(game, round)
    }

    fn update_game_status(
        &self,
        game: &GameId,
        update: &StatusUpdate,
    ) -> impl Future<Output = Result<GameStatus, StoreError>> {
        (**self).update_game_status(game, update)
    }

    fn fetch_game(&self, game: &GameId) -> impl Future<Output = Result<PersistedGame, StoreError>> {
        (**self).fetch_game(game)
    }
}
