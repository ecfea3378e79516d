use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

use crate::error::{RemoteOperation, TrackerError, TrackerResult};
use crate::round_history::{RoundHistory, Rounds};
use crate::sessions::config::TrackerConfig;
use crate::sessions::game_session::GameSession;
use crate::sessions::sync_controller::{call_remote, SessionCore};
use crate::snapshot::{GameResult, RoundSnapshot};
use crate::store::RoundStore;
use crate::telemetry::{
    InvariantChecker, Violation, ViolationKind, ViolationObserver, ViolationSeverity,
};
use crate::{report_violation_to, GameId, GameStatus, Participant, RoundNumber};

/// Minimum number of participants a game needs.
const MIN_PARTICIPANTS: usize = 2;

/// The [`GameBuilder`] creates [`GameSession`]s.
///
/// Add every participant, optionally set a [`TrackerConfig`] and a violation observer,
/// then either [`start`](Self::start) a new game or [`resume`](Self::resume) one whose
/// rounds are already persisted.
///
/// # Example
///
/// ```
/// use schwimmen_tracker::{GameBuilder, GameId, InMemoryRoundStore, Participant, TrackerConfig};
///
/// # async fn demo() -> schwimmen_tracker::TrackerResult<()> {
/// let store = InMemoryRoundStore::new();
/// store.insert_game(GameId::new("g"));
///
/// let session = GameBuilder::new(GameId::new("g"))
///     .with_config(TrackerConfig { starting_lives: 4, ..TrackerConfig::offline() })
///     .add_participant(Participant::new("a", "Anna"))?
///     .add_participant(Participant::new("b", "Ben"))?
///     .start(store)
///     .await?;
/// assert_eq!(session.latest_round_number(), 0);
/// # Ok(())
/// # }
/// ```
#[must_use = "GameBuilder must be consumed by calling start(), resume() or resume_from_store()"]
pub struct GameBuilder {
    game: GameId,
    participants: Vec<Participant>,
    config: TrackerConfig,
    violation_observer: Option<Arc<dyn ViolationObserver>>,
}

impl std::fmt::Debug for GameBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Destructure to ensure all fields are included when new fields are added.
        let Self {
            game,
            participants,
            config,
            violation_observer,
        } = self;

        f.debug_struct("GameBuilder")
            .field("game", game)
            .field("participants", participants)
            .field("config", config)
            .field("has_violation_observer", &violation_observer.is_some())
            .finish()
    }
}

impl GameBuilder {
    /// Construct a new builder for `game` with the default configuration.
    pub fn new(game: GameId) -> Self {
        Self {
            game,
            participants: Vec::new(),
            config: TrackerConfig::default(),
            violation_observer: None,
        }
    }

    /// Adds a participant. Participants keep the order they were added in.
    ///
    /// # Errors
    /// - Returns [`InvalidConfig`] if a participant with the same id was added before.
    ///
    /// [`InvalidConfig`]: TrackerError::InvalidConfig
    pub fn add_participant(mut self, participant: Participant) -> TrackerResult<Self> {
        if self.participants.iter().any(|p| p.id == participant.id) {
            return Err(TrackerError::InvalidConfig {
                info: format!("participant {} was added twice", participant.id),
            });
        }
        self.participants.push(participant);
        Ok(self)
    }

    /// Adds several participants, see [`add_participant`](Self::add_participant).
    pub fn add_participants(
        self,
        participants: impl IntoIterator<Item = Participant>,
    ) -> TrackerResult<Self> {
        participants
            .into_iter()
            .try_fold(self, GameBuilder::add_participant)
    }

    /// Sets the configuration. Validated when the session is started.
    pub fn with_config(mut self, config: TrackerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the number of lives everyone starts with.
    ///
    /// # Errors
    /// - Returns [`InvalidConfig`] if `lives` is out of range.
    ///
    /// [`InvalidConfig`]: TrackerError::InvalidConfig
    pub fn with_starting_lives(mut self, lives: i32) -> TrackerResult<Self> {
        let config = TrackerConfig {
            starting_lives: lives,
            ..self.config
        };
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    /// Sets a custom observer for rollbacks and broken invariants.
    ///
    /// Without one, violations are logged through `tracing`.
    ///
    /// # Example
    ///
    /// ```
    /// use schwimmen_tracker::telemetry::CollectingObserver;
    /// use schwimmen_tracker::{GameBuilder, GameId};
    /// use std::sync::Arc;
    ///
    /// let observer = Arc::new(CollectingObserver::new());
    /// let builder = GameBuilder::new(GameId::new("g")).with_violation_observer(observer.clone());
    /// // After starting the session, inspect observer.violations() in tests
    /// ```
    pub fn with_violation_observer(mut self, observer: Arc<dyn ViolationObserver>) -> Self {
        self.violation_observer = Some(observer);
        self
    }

    /// Validates the configuration, reporting a rejection to the violation observer.
    fn validate(&self) -> TrackerResult<()> {
        self.check_config().inspect_err(|error| {
            let violation = Violation::new(
                ViolationSeverity::Error,
                ViolationKind::Configuration,
                "session configuration rejected",
                concat!(file!(), ":", line!()),
            )
            .with_context("game", self.game.as_str())
            .with_context("error", error.to_string());
            report_violation_to!(self.violation_observer, violation);
        })
    }

    fn check_config(&self) -> TrackerResult<()> {
        self.config.validate()?;
        if self.participants.len() < MIN_PARTICIPANTS {
            return Err(TrackerError::InvalidConfig {
                info: format!(
                    "a game needs at least {} participants, got {}",
                    MIN_PARTICIPANTS,
                    self.participants.len()
                ),
            });
        }
        Ok(())
    }

    /// Starts a new game: persists round 0 (full lives, nobody swimming) and returns an
    /// active session with the cursor on it.
    ///
    /// # Errors
    /// - Returns [`InvalidConfig`] for fewer than two participants or an invalid config.
    /// - Returns [`RemoteRejection`] if the store refuses round 0.
    ///
    /// [`InvalidConfig`]: TrackerError::InvalidConfig
    /// [`RemoteRejection`]: TrackerError::RemoteRejection
    pub async fn start<S: RoundStore>(self, store: S) -> TrackerResult<GameSession<S>> {
        self.validate()?;
        let initial = RoundSnapshot::initial(
            self.participants.iter().map(|p| &p.id),
            self.config.starting_lives,
        );
        let persisted = call_remote(
            RemoteOperation::CreateRound,
            self.config.remote_timeout,
            store.create_round(&self.game, RoundNumber::ZERO, &initial),
        )
        .await?;
        debug!(
            game = %self.game,
            participants = self.participants.len(),
            lives = self.config.starting_lives,
            "game started"
        );
        Ok(self.into_session(
            store,
            RoundHistory::new(persisted),
            GameStatus::Active,
            None,
        ))
    }

    /// Rebuilds a session from persisted rounds. The cursor is placed on the latest round.
    ///
    /// # Errors
    /// - Returns [`InvalidConfig`] for fewer than two participants or an invalid config.
    /// - Returns [`InvalidHistory`] if the rounds are not numbered densely from 0, do not
    ///   cover exactly the added participants, or break a snapshot invariant.
    ///
    /// [`InvalidConfig`]: TrackerError::InvalidConfig
    /// [`InvalidHistory`]: TrackerError::InvalidHistory
    pub fn resume<S: RoundStore>(
        self,
        store: S,
        status: GameStatus,
        rounds: Vec<RoundSnapshot>,
        result: Option<GameResult>,
    ) -> TrackerResult<GameSession<S>> {
        self.validate()?;
        let rounds =
            Rounds::from_snapshots(rounds).map_err(|violation| TrackerError::InvalidHistory {
                info: violation.to_string(),
            })?;

        let expected: BTreeSet<_> = self.participants.iter().map(|p| &p.id).collect();
        for snapshot in rounds.iter() {
            let found: BTreeSet<_> = snapshot.lives().keys().collect();
            if found != expected {
                return Err(TrackerError::InvalidHistory {
                    info: format!(
                        "round {} does not hold exactly the game's participants",
                        snapshot.round()
                    ),
                });
            }
        }

        let history = RoundHistory::from_rounds(rounds);
        history
            .check_invariants()
            .map_err(|violation| TrackerError::InvalidHistory {
                info: violation.to_string(),
            })?;
        debug!(
            game = %self.game,
            ?status,
            latest = %history.latest_round().round(),
            "game resumed"
        );
        Ok(self.into_session(store, history, status, result))
    }

    /// Reads the game back from the store and [`resume`](Self::resume)s it.
    ///
    /// # Errors
    /// - Returns [`RemoteRejection`] if the store cannot be read.
    /// - Everything [`resume`](Self::resume) returns.
    ///
    /// [`RemoteRejection`]: TrackerError::RemoteRejection
    pub async fn resume_from_store<S: RoundStore>(
        self,
        store: S,
    ) -> TrackerResult<GameSession<S>> {
        let persisted = call_remote(
            RemoteOperation::FetchGame,
            self.config.remote_timeout,
            store.fetch_game(&self.game),
        )
        .await?;
        self.resume(store, persisted.status, persisted.rounds, persisted.result)
    }

    fn into_session<S: RoundStore>(
        self,
        store: S,
        history: RoundHistory,
        status: GameStatus,
        result: Option<GameResult>,
    ) -> GameSession<S> {
        let core = SessionCore::new(history, status, result, self.config.event_queue_size);
        GameSession::new(
            self.game,
            self.participants,
            self.config,
            store,
            core,
            self.violation_observer,
        )
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
    use crate::store::memory::InMemoryRoundStore;
    use crate::store::StoreError;
    use crate::ParticipantId;

    fn game() -> GameId {
        GameId::new("g")
    }

    fn builder() -> GameBuilder {
        GameBuilder::new(game())
            .with_config(TrackerConfig::offline())
            .add_participant(Participant::new("a", "Anna"))
            .unwrap()
            .add_participant(Participant::new("b", "Ben"))
            .unwrap()
    }

    fn store() -> InMemoryRoundStore {
        let store = InMemoryRoundStore::new();
        store.insert_game(game());
        store
    }

    #[test]
    fn duplicate_participant_rejected() {
        let err = builder()
            .add_participant(Participant::new("a", "Other Anna"))
            .unwrap_err();
        assert!(matches!(err, TrackerError::InvalidConfig { .. }));
    }

    #[test]
    fn invalid_starting_lives_rejected() {
        assert!(builder().with_starting_lives(0).is_err());
        assert!(builder().with_starting_lives(5).is_ok());
    }

    #[test]
    fn add_participants_stops_at_duplicate() {
        let result = GameBuilder::new(game()).add_participants([
            Participant::new("a", "Anna"),
            Participant::new("a", "Anna again"),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn debug_hides_observer() {
        let text = format!("{:?}", builder());
        assert!(text.contains("has_violation_observer: false"));
    }

    #[tokio::test]
    async fn start_persists_round_zero() {
        let store = store();
        let session = builder().start(store.clone()).await.unwrap();
        assert_eq!(store.round_numbers(&game()), vec![RoundNumber::ZERO]);
        assert_eq!(session.status(), GameStatus::Active);
        let round = session.current_round();
        assert_eq!(round.lives_of(&ParticipantId::new("a")), Some(3));
        assert!(round.swimming().is_none());
    }

    #[tokio::test]
    async fn start_needs_two_participants() {
        let err = GameBuilder::new(game())
            .add_participant(Participant::new("a", "Anna"))
            .unwrap()
            .start(store())
            .await
            .unwrap_err();
        assert!(matches!(err, TrackerError::InvalidConfig { .. }));
    }

    #[tokio::test]
    async fn rejected_config_is_reported() {
        let observer = Arc::new(crate::telemetry::CollectingObserver::new());
        let err = builder()
            .with_config(TrackerConfig {
                event_queue_size: 0,
                ..TrackerConfig::offline()
            })
            .with_violation_observer(observer.clone())
            .start(store())
            .await
            .unwrap_err();
        assert!(matches!(err, TrackerError::InvalidConfig { .. }));
        crate::assert_violation!(observer, ViolationKind::Configuration);
        assert_eq!(observer.violations()[0].severity, ViolationSeverity::Error);
    }

    #[tokio::test]
    async fn start_surfaces_store_rejection() {
        let err = builder()
            .start(InMemoryRoundStore::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TrackerError::RemoteRejection {
                operation: RemoteOperation::CreateRound,
                source: StoreError::Rejected { .. },
            }
        ));
    }

    #[tokio::test]
    async fn resume_from_store_restores_latest_round() {
        let store = store();
        let session = builder().start(store.clone()).await.unwrap();
        session.select_mode(crate::ActionMode::SubtractLife).unwrap();
        session.subtract_life(&ParticipantId::new("a")).await.unwrap();
        drop(session);

        let resumed = builder().resume_from_store(store).await.unwrap();
        assert_eq!(resumed.latest_round_number(), RoundNumber::new(1));
        assert_eq!(resumed.current_round_number(), RoundNumber::new(1));
        assert_eq!(
            resumed.current_round().lives_of(&ParticipantId::new("a")),
            Some(2)
        );
    }

    #[test]
    fn resume_rejects_gaps() {
        let ids = [ParticipantId::new("a"), ParticipantId::new("b")];
        let zero = RoundSnapshot::initial(&ids, 3);
        let two = zero.clone().renumbered(RoundNumber::new(2));
        let err = builder()
            .resume(store(), GameStatus::Active, vec![zero, two], None)
            .unwrap_err();
        assert!(matches!(err, TrackerError::InvalidHistory { .. }));
    }

    #[test]
    fn resume_rejects_foreign_participants() {
        let ids = [ParticipantId::new("a"), ParticipantId::new("z")];
        let zero = RoundSnapshot::initial(&ids, 3);
        let err = builder()
            .resume(store(), GameStatus::Active, vec![zero], None)
            .unwrap_err();
        assert!(matches!(err, TrackerError::InvalidHistory { .. }));
    }

    #[test]
    fn resume_rejects_broken_swimmer() {
        let ids = [ParticipantId::new("a"), ParticipantId::new("b")];
        let zero = RoundSnapshot::initial(&ids, 3);
        let broken = RoundSnapshot::from_parts(
            RoundNumber::new(1),
            zero.lives().clone(),
            Some(ParticipantId::new("a")),
            None,
            0,
        );
        let err = builder()
            .resume(store(), GameStatus::Active, vec![zero, broken], None)
            .unwrap_err();
        assert!(err.to_string().contains("swimmer"));
    }
}
