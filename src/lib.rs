//! # Schwimmen Tracker
//!
//! Round bookkeeping for the card game *Schwimmen*. A game is a sequence of immutable
//! [`RoundSnapshot`]s, one per recorded action, starting from round 0 where every
//! participant holds the configured number of lives.
//!
//! The crate covers the part of a tracker that actually has invariants:
//!
//! - the action rules (subtract a life, detonate a nuke, resolve a swimmer conflict),
//! - an undo/redo cursor over the recorded rounds with branch truncation,
//! - optimistic synchronization of the local history against a remote [`RoundStore`],
//!   rolling back to the last committed state whenever the store fails,
//! - the win trigger that completes the game once a single participant is left.
//!
//! Persistence, authentication and rendering are out of scope. The remote store is a
//! trait that the embedding application implements.
//!
//! ```
//! use schwimmen_tracker::prelude::*;
//!
//! # async fn demo() -> TrackerResult<()> {
//! let store = InMemoryRoundStore::new();
//! let game = GameId::new("game-1");
//! store.insert_game(game.clone());
//!
//! let session = GameBuilder::new(game)
//!     .add_participant(Participant::new("anna", "Anna"))?
//!     .add_participant(Participant::new("ben", "Ben"))?
//!     .start(store)
//!     .await?;
//!
//! session.select_mode(ActionMode::SubtractLife)?;
//! session.subtract_life(&ParticipantId::new("ben")).await?;
//! assert_eq!(session.current_round().lives_of(&ParticipantId::new("ben")), Some(2));
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

use smallvec::SmallVec;

pub use action::{apply_subtract_life, check_nuke_for_conflict, detonate_nuke, ActionMachine};
pub use conflict::{ChannelPrompt, ConflictRequest, SurvivorPrompt};
pub use error::{PreconditionKind, RemoteOperation, TrackerError, TrackerResult};
pub use sessions::builder::GameBuilder;
pub use sessions::config::TrackerConfig;
pub use sessions::event_drain::EventDrain;
pub use sessions::game_session::{CommitOutcome, GameSession, NukeOutcome};
pub use snapshot::{GameResult, RoundSnapshot};
pub use store::chaos::{ChaosConfig, ChaosStore, FailurePlan};
pub use store::memory::{InMemoryRoundStore, StoreCall};
pub use store::{PersistedGame, RoundStore, StatusUpdate, StoreError};

pub mod action;
pub mod conflict;
pub mod error;
pub mod prelude;
#[doc(hidden)]
pub mod round_history;
pub mod snapshot;
pub mod store;
pub mod telemetry;
#[doc(hidden)]
pub mod sessions {
    #[doc(hidden)]
    pub mod builder;
    pub mod config;
    #[doc(hidden)]
    pub mod event_drain;
    #[doc(hidden)]
    pub mod game_session;
    pub(crate) mod sync_controller;
    pub mod win_condition;
}

/// Internal module exposing implementation details for testing.
///
/// **This module is NOT part of the public API.** Nothing here is covered by semver.
/// It exists so integration and property tests can drive the history and rule
/// layers directly, without going through a [`GameSession`].
#[doc(hidden)]
pub mod __internal {
    pub use crate::round_history::{Divergence, RoundHistory, Rounds};
    pub use crate::sessions::win_condition::evaluate_win;
}

// #############
// #   TYPES   #
// #############

/// Position of a snapshot in a game's history.
///
/// Round numbers are dense: round 0 is the starting state and every accepted action
/// appends exactly one round with the next number. After a branch truncation the numbers
/// after the cursor are reused by the new branch, never skipped.
///
/// # Examples
///
/// ```
/// use schwimmen_tracker::RoundNumber;
///
/// let start = RoundNumber::ZERO;
/// assert_eq!(start.next(), RoundNumber::new(1));
/// assert_eq!(start.prev(), None);
/// ```
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(transparent)]
pub struct RoundNumber(u32);

impl RoundNumber {
    /// The starting round every game has.
    pub const ZERO: RoundNumber = RoundNumber(0);

    /// Creates a new `RoundNumber`.
    #[inline]
    #[must_use]
    pub const fn new(round: u32) -> Self {
        RoundNumber(round)
    }

    /// Returns the underlying value.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns the value as an index into a dense round sequence.
    #[inline]
    #[must_use]
    pub const fn as_index(self) -> usize {
        self.0 as usize
    }

    /// The round directly after this one.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        RoundNumber(self.0.saturating_add(1))
    }

    /// The round directly before this one, or `None` for round 0.
    #[inline]
    #[must_use]
    pub const fn prev(self) -> Option<Self> {
        match self.0.checked_sub(1) {
            Some(r) => Some(RoundNumber(r)),
            None => None,
        }
    }
}

impl std::fmt::Display for RoundNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for RoundNumber {
    #[inline]
    fn from(value: u32) -> Self {
        RoundNumber(value)
    }
}

impl From<RoundNumber> for u32 {
    #[inline]
    fn from(round: RoundNumber) -> Self {
        round.0
    }
}

impl PartialEq<u32> for RoundNumber {
    #[inline]
    fn eq(&self, other: &u32) -> bool {
        self.0 == *other
    }
}

/// Identifier of a participant, as assigned by the tracker that owns the player list.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Creates a new participant id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        ParticipantId(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(value: &str) -> Self {
        ParticipantId(value.to_owned())
    }
}

impl From<String> for ParticipantId {
    fn from(value: String) -> Self {
        ParticipantId(value)
    }
}

/// Identifier of a game in the remote store.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct GameId(String);

impl GameId {
    /// Creates a new game id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        GameId(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for GameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A player taking part in one game. Immutable while the game runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Participant {
    /// The participant's id.
    pub id: ParticipantId,
    /// Name shown in the tracker.
    pub display_name: String,
    /// Reference to a registered user account, if the player is linked to one.
    pub account: Option<String>,
}

impl Participant {
    /// Creates a participant without a linked account.
    #[must_use]
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: ParticipantId::new(id),
            display_name: display_name.into(),
            account: None,
        }
    }

    /// Links the participant to a user account.
    #[must_use]
    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }
}

/// Candidate list for swimmer conflicts.
///
/// Uses a [`SmallVec`] since a nuke rarely ties more than a handful of players.
pub type CandidateVec = SmallVec<[ParticipantId; 4]>;

// #############
// #   ENUMS   #
// #############

/// Lifecycle status of a game. `Completed` and `Cancelled` are final.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    /// Rounds are being recorded.
    #[default]
    Active,
    /// A single participant survived.
    Completed,
    /// The game was abandoned.
    Cancelled,
}

impl GameStatus {
    /// Returns `true` for `Completed` and `Cancelled`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, GameStatus::Completed | GameStatus::Cancelled)
    }
}

/// The action a click on a participant currently performs.
///
/// Exactly one mode is active at a time. Selecting a mode from `Idle` enters it,
/// selecting the active mode again leaves it, and completing an action returns to `Idle`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum ActionMode {
    /// Clicks only navigate.
    #[default]
    Idle,
    /// A click takes one life from the clicked participant.
    SubtractLife,
    /// A click makes the clicked participant detonate a nuke.
    DetonateNuke,
}

/// Notifications produced by a [`GameSession`]. Handling them is up to the user.
///
/// # Forward Compatibility
///
/// This enum is marked `#[non_exhaustive]`. Always include a wildcard arm when matching.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum TrackerEvent {
    /// The action mode changed.
    ModeChanged {
        /// The mode before the change.
        from: ActionMode,
        /// The mode after the change.
        to: ActionMode,
    },
    /// A round was durably committed and the synced watermark advanced.
    RoundCommitted {
        /// The committed round.
        round: RoundNumber,
    },
    /// A remote failure discarded the optimistic change.
    RolledBack {
        /// The latest synced round after the rollback.
        to_round: RoundNumber,
        /// The call that failed.
        operation: RemoteOperation,
    },
    /// Every round except round 0 was deleted.
    HistoryReset,
    /// A nuke would create several swimmers at once and a survivor must be picked.
    ConflictDetected {
        /// The tied participants.
        candidates: Vec<ParticipantId>,
    },
    /// The survivor prompt was abandoned; nothing was applied.
    ConflictCancelled,
    /// The game was completed with a winner.
    GameCompleted {
        /// The final result.
        result: GameResult,
    },
    /// The game was cancelled.
    GameCancelled,
    /// A winner was found but the status update failed. Retry with
    /// [`GameSession::complete_if_won`].
    CompletionFailed {
        /// The error the store returned.
        error: TrackerError,
    },
}
