//! Shared test utilities for integration tests.
//!
//! [`Harness`] starts a game on a [`ChaosStore`] wrapped around an
//! [`InMemoryRoundStore`], with a [`CollectingObserver`] attached, so a test can inject
//! store faults and then check the session, the persisted rounds and the reported
//! violations side by side.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use schwimmen_tracker::telemetry::CollectingObserver;
use schwimmen_tracker::{
    ActionMode, ChaosConfig, ChaosStore, GameBuilder, GameId, GameSession, InMemoryRoundStore,
    Participant, ParticipantId, RoundNumber, RoundStore, TrackerConfig, TrackerEvent,
    TrackerResult,
};

/// Upper bound for anything a test waits on.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// The store type every [`Harness`] session runs on.
pub type TestStore = Arc<ChaosStore<InMemoryRoundStore>>;

/// Installs a `tracing` subscriber that writes through the test harness.
///
/// Safe to call from every test; only the first call installs it.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn game() -> GameId {
    GameId::new("game-1")
}

pub fn id(name: &str) -> ParticipantId {
    ParticipantId::new(name)
}

/// Starts a game on `store` with one participant per name, all at `lives`.
pub async fn start_session<S: RoundStore>(
    store: S,
    names: &[&str],
    lives: i32,
) -> TrackerResult<GameSession<S>> {
    let config = TrackerConfig {
        starting_lives: lives,
        ..TrackerConfig::lan()
    };
    let participants = names.iter().map(|name| Participant::new(*name, name.to_uppercase()));
    GameBuilder::new(game())
        .with_config(config)
        .add_participants(participants)?
        .start(store)
        .await
}

/// A started session plus handles on everything around it.
pub struct Harness {
    pub memory: InMemoryRoundStore,
    pub chaos: TestStore,
    pub observer: Arc<CollectingObserver>,
    pub session: GameSession<TestStore>,
}

impl Harness {
    pub async fn new(names: &[&str], lives: i32) -> Self {
        Self::with_config(
            names,
            TrackerConfig {
                starting_lives: lives,
                ..TrackerConfig::lan()
            },
        )
        .await
    }

    pub async fn with_config(names: &[&str], config: TrackerConfig) -> Self {
        init_tracing();
        let memory = InMemoryRoundStore::new();
        memory.insert_game(game());
        let chaos = Arc::new(ChaosStore::new(memory.clone(), ChaosConfig::passthrough()));
        let observer = Arc::new(CollectingObserver::new());
        let participants = names.iter().map(|name| Participant::new(*name, name.to_uppercase()));
        let session = GameBuilder::new(game())
            .with_config(config)
            .with_violation_observer(observer.clone())
            .add_participants(participants)
            .expect("unique participants")
            .start(Arc::clone(&chaos))
            .await
            .expect("game starts");
        Self {
            memory,
            chaos,
            observer,
            session,
        }
    }

    /// Selects `SubtractLife` and hits `name`, panicking on failure.
    pub async fn hit(&self, name: &str) -> RoundNumber {
        self.session
            .select_mode(ActionMode::SubtractLife)
            .expect("mode selectable");
        self.session
            .subtract_life(&id(name))
            .await
            .expect("hit commits")
            .round
    }

    /// Lives of `name` at the cursor.
    pub fn lives(&self, name: &str) -> Option<i32> {
        self.session.current_round().lives_of(&id(name))
    }

    /// Round numbers the store holds.
    pub fn persisted(&self) -> Vec<u32> {
        self.memory
            .round_numbers(&game())
            .into_iter()
            .map(RoundNumber::as_u32)
            .collect()
    }

    /// Drains the session's events, leaving out mode changes.
    pub fn events(&self) -> Vec<TrackerEvent> {
        self.session
            .events()
            .filter(|event| !matches!(event, TrackerEvent::ModeChanged { .. }))
            .collect()
    }
}
