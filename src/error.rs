//! Error types returned by sessions, the action rules and the round store.

use std::error::Error;
use std::fmt;
use std::fmt::Display;

use crate::store::StoreError;
use crate::{ActionMode, GameStatus, ParticipantId, RoundNumber};

/// The reason a request was rejected before anything was applied.
///
/// Every precondition failure is synchronous: no remote call has been made and the
/// session's [`ActionMode`] has been reset to [`ActionMode::Idle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreconditionKind {
    /// The action requires a different mode than the one currently active.
    WrongMode {
        /// The mode the action needs.
        expected: ActionMode,
        /// The mode that was active.
        actual: ActionMode,
    },
    /// A mode was selected while the other action mode was still active.
    ModeConflict {
        /// The mode that was active.
        active: ActionMode,
        /// The mode that was requested.
        requested: ActionMode,
    },
    /// The game is no longer accepting rounds.
    GameNotActive {
        /// The status the game is in.
        status: GameStatus,
    },
    /// The participant is not part of this game.
    UnknownParticipant {
        /// The id that was not found.
        participant: ParticipantId,
    },
    /// The participant is already dead and cannot be targeted or act.
    ParticipantDead {
        /// The dead participant.
        participant: ParticipantId,
    },
    /// A nuke conflict exists and no survivor was supplied.
    SurvivorRequired {
        /// The participants that tied for the swimmer slot.
        candidates: Vec<ParticipantId>,
    },
    /// The supplied survivor is not one of the conflict candidates.
    InvalidSurvivor {
        /// The survivor that was supplied.
        survivor: ParticipantId,
        /// The participants that were eligible.
        candidates: Vec<ParticipantId>,
    },
    /// The cursor was moved outside `[0, latest]`.
    RoundOutOfRange {
        /// The round that was requested.
        requested: RoundNumber,
        /// The latest round in the working history.
        latest: RoundNumber,
    },
    /// Navigation was attempted while an action mode was active.
    NavigationWhileActing {
        /// The mode that was active.
        mode: ActionMode,
    },
    /// A completion was requested but the committed history has no single survivor.
    NoWinner,
}

impl Display for PreconditionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreconditionKind::WrongMode { expected, actual } => {
                write!(f, "action requires mode {:?}, but mode is {:?}", expected, actual)
            },
            PreconditionKind::ModeConflict { active, requested } => {
                write!(
                    f,
                    "cannot enter mode {:?} while mode {:?} is active",
                    requested, active
                )
            },
            PreconditionKind::GameNotActive { status } => {
                write!(f, "game is {:?} and no longer accepts changes", status)
            },
            PreconditionKind::UnknownParticipant { participant } => {
                write!(f, "participant {} is not part of this game", participant)
            },
            PreconditionKind::ParticipantDead { participant } => {
                write!(f, "participant {} is already dead", participant)
            },
            PreconditionKind::SurvivorRequired { candidates } => {
                write!(
                    f,
                    "nuke would create {} simultaneous swimmers, a survivor must be chosen",
                    candidates.len()
                )
            },
            PreconditionKind::InvalidSurvivor {
                survivor,
                candidates,
            } => {
                write!(
                    f,
                    "survivor {} is not one of the conflict candidates {:?}",
                    survivor, candidates
                )
            },
            PreconditionKind::RoundOutOfRange { requested, latest } => {
                write!(
                    f,
                    "round {} is outside the recorded history [0, {}]",
                    requested, latest
                )
            },
            PreconditionKind::NavigationWhileActing { mode } => {
                write!(f, "cannot navigate rounds while mode {:?} is active", mode)
            },
            PreconditionKind::NoWinner => {
                write!(f, "committed history has no single surviving participant")
            },
        }
    }
}

/// The remote operation that failed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RemoteOperation {
    /// `createRound`
    CreateRound,
    /// `deleteRoundsFrom`
    DeleteRounds,
    /// `updateGameStatus`
    UpdateStatus,
    /// `fetchGame`
    FetchGame,
}

impl RemoteOperation {
    /// Returns a string representation suitable for logging/metrics labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::CreateRound => "create_round",
            Self::DeleteRounds => "delete_rounds",
            Self::UpdateStatus => "update_status",
            Self::FetchGame => "fetch_game",
        }
    }
}

impl Display for RemoteOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// This enum contains all errors this library can return. Most API functions return a [`TrackerResult`].
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerError {
    /// The request was rejected synchronously. No state changed and the mode is back to idle.
    Precondition {
        /// Further specifies why the request was rejected.
        kind: PreconditionKind,
    },
    /// Another mutating operation is still in flight for this game.
    OperationPending,
    /// The remote store rejected a call or did not answer in time.
    ///
    /// The working history has been rolled back to the last synced state.
    RemoteRejection {
        /// The call that failed.
        operation: RemoteOperation,
        /// The error reported by the store.
        source: StoreError,
    },
    /// A configuration value was out of range.
    InvalidConfig {
        /// What was wrong with the configuration.
        info: String,
    },
    /// A persisted history could not be loaded.
    InvalidHistory {
        /// What was wrong with the history.
        info: String,
    },
}

impl TrackerError {
    /// Returns `true` if this error was a synchronous precondition rejection.
    #[must_use]
    pub fn is_precondition(&self) -> bool {
        matches!(self, TrackerError::Precondition { .. })
    }

    /// Returns `true` if the remote store caused this error.
    #[must_use]
    pub fn is_remote(&self) -> bool {
        matches!(self, TrackerError::RemoteRejection { .. })
    }
}

impl From<PreconditionKind> for TrackerError {
    fn from(kind: PreconditionKind) -> Self {
        TrackerError::Precondition { kind }
    }
}

impl Display for TrackerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackerError::Precondition { kind } => write!(f, "Precondition failed: {}", kind),
            TrackerError::OperationPending => {
                write!(f, "Another operation is still pending for this game.")
            },
            TrackerError::RemoteRejection { operation, source } => {
                write!(f, "Remote {} failed: {}", operation, source)
            },
            TrackerError::InvalidConfig { info } => write!(f, "Invalid config: {}", info),
            TrackerError::InvalidHistory { info } => write!(f, "Invalid history: {}", info),
        }
    }
}

impl Error for TrackerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TrackerError::RemoteRejection { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type TrackerResult<T> = Result<T, TrackerError>;
