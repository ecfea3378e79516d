use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::conflict::SurvivorPrompt;
use crate::error::{PreconditionKind, TrackerError, TrackerResult};
use crate::sessions::config::TrackerConfig;
use crate::sessions::event_drain::EventDrain;
use crate::sessions::sync_controller::{InFlight, SessionCore, SyncController};
use crate::sessions::win_condition;
use crate::snapshot::{GameResult, RoundSnapshot};
use crate::store::{RoundStore, StatusUpdate};
use crate::telemetry::ViolationObserver;
use crate::{
    ActionMode, CandidateVec, GameId, GameStatus, Participant, ParticipantId, RoundNumber,
    TrackerEvent,
};

/// Result of a committed action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOutcome {
    /// The round that was committed.
    pub round: RoundNumber,
    /// The game result, if this round completed the game.
    pub result: Option<GameResult>,
}

/// Result of [`GameSession::detonate_nuke`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NukeOutcome {
    /// The nuke was recorded.
    Committed(CommitOutcome),
    /// The survivor prompt was abandoned. Nothing was recorded and the mode is idle.
    Cancelled,
}

/// A running game: the action rules, the round history and its synchronization with the
/// remote store, behind one `&self` API.
///
/// Create one with [`GameBuilder`](crate::GameBuilder). All mutating operations are async
/// and single-flight: while one is outstanding, others fail with
/// [`TrackerError::OperationPending`] instead of queueing. Read views never block on the
/// store.
///
/// Dropping the future of a mutating operation is safe: an unconfirmed round is rolled
/// back and the mode returns to idle.
pub struct GameSession<S> {
    game: GameId,
    participants: Vec<Participant>,
    config: TrackerConfig,
    store: S,
    core: Mutex<SessionCore>,
    in_flight: AtomicBool,
    violation_observer: Option<Arc<dyn ViolationObserver>>,
}

impl<S> std::fmt::Debug for GameSession<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Self {
            game,
            participants,
            config,
            store: _,
            core,
            in_flight,
            violation_observer,
        } = self;

        f.debug_struct("GameSession")
            .field("game", game)
            .field("participants", participants)
            .field("config", config)
            .field("core", &*core.lock())
            .field("in_flight", &in_flight.load(Ordering::Acquire))
            .field("has_violation_observer", &violation_observer.is_some())
            .finish_non_exhaustive()
    }
}

impl<S: RoundStore> GameSession<S> {
    pub(crate) fn new(
        game: GameId,
        participants: Vec<Participant>,
        config: TrackerConfig,
        store: S,
        core: SessionCore,
        violation_observer: Option<Arc<dyn ViolationObserver>>,
    ) -> Self {
        Self {
            game,
            participants,
            config,
            store,
            core: Mutex::new(core),
            in_flight: AtomicBool::new(false),
            violation_observer,
        }
    }

    fn controller(&self) -> SyncController<'_, S> {
        SyncController {
            game: &self.game,
            store: &self.store,
            core: &self.core,
            remote_timeout: self.config.remote_timeout,
            observer: self.violation_observer.as_ref(),
        }
    }

    fn begin(&self) -> TrackerResult<InFlight<'_>> {
        InFlight::acquire(
            &self.in_flight,
            &self.core,
            self.violation_observer.as_ref(),
        )
    }

    // ==========================================
    // Action mode
    // ==========================================

    /// Toggles the action mode and returns the mode now active.
    ///
    /// Entering an action mode requires an active game. Selecting one action mode while
    /// the other is active is rejected and leaves the session idle.
    pub fn select_mode(&self, mode: ActionMode) -> TrackerResult<ActionMode> {
        if self.is_pending() {
            return Err(TrackerError::OperationPending);
        }
        let mut core = self.core.lock();
        if mode != ActionMode::Idle {
            core.require_active()?;
        }
        let from = core.machine.mode();
        let selected = core.machine.select(mode);
        core.note_mode(from);
        selected.map_err(TrackerError::from)
    }

    /// Takes one life from `participant` at the cursor and commits the new round.
    ///
    /// Requires [`ActionMode::SubtractLife`]. If the cursor is not at the latest round, the
    /// later rounds are deleted first. On a remote failure the session rolls back to the
    /// last committed round.
    pub async fn subtract_life(&self, participant: &ParticipantId) -> TrackerResult<CommitOutcome> {
        let mut guard = self.begin()?;
        let next = {
            let mut core = self.core.lock();
            core.require_active()?;
            let core = &mut *core;
            let from = core.machine.mode();
            let next = core
                .machine
                .apply_subtract_life(core.history.current(), participant);
            core.note_mode(from);
            next?
        };
        let round = self.controller().commit_new_round(&mut guard, next).await?;
        Ok(self.after_commit(&mut guard, round).await)
    }

    /// Lists the participants a nuke by `detonator` would bring to exactly zero lives.
    ///
    /// Requires [`ActionMode::DetonateNuke`]. Two or more entries mean a survivor has to be
    /// chosen. Nothing is recorded. Rejected with [`TrackerError::OperationPending`] while
    /// another operation, such as an open survivor prompt, is outstanding.
    pub fn check_nuke_for_conflict(&self, detonator: &ParticipantId) -> TrackerResult<CandidateVec> {
        if self.is_pending() {
            return Err(TrackerError::OperationPending);
        }
        self.nuke_candidates(detonator)
    }

    fn nuke_candidates(&self, detonator: &ParticipantId) -> TrackerResult<CandidateVec> {
        let mut core = self.core.lock();
        core.require_active()?;
        let core = &mut *core;
        let from = core.machine.mode();
        let candidates = core
            .machine
            .check_nuke_for_conflict(core.history.current(), detonator);
        core.note_mode(from);
        candidates.map_err(TrackerError::from)
    }

    /// Detonates a nuke by `detonator` and commits the new round.
    ///
    /// Requires [`ActionMode::DetonateNuke`]. When two or more participants would start
    /// swimming at once, `prompt` is asked to pick the survivor and the session waits for
    /// the answer. If the prompt gives up, nothing is recorded and
    /// [`NukeOutcome::Cancelled`] is returned.
    pub async fn detonate_nuke<P: SurvivorPrompt>(
        &self,
        detonator: &ParticipantId,
        prompt: &P,
    ) -> TrackerResult<NukeOutcome> {
        let mut guard = self.begin()?;
        let candidates = self.nuke_candidates(detonator)?;

        let survivor = if candidates.len() >= 2 {
            debug!(%detonator, candidates = candidates.len(), "nuke conflict, asking for survivor");
            self.core.lock().events.push(TrackerEvent::ConflictDetected {
                candidates: candidates.to_vec(),
            });
            match prompt.choose_survivor(&candidates).await {
                Some(survivor) => Some(survivor),
                None => {
                    let mut core = self.core.lock();
                    core.set_idle();
                    core.events.push(TrackerEvent::ConflictCancelled);
                    debug!(%detonator, "nuke conflict cancelled");
                    return Ok(NukeOutcome::Cancelled);
                },
            }
        } else {
            None
        };

        let outcome = self
            .commit_nuke(&mut guard, detonator, survivor.as_ref())
            .await?;
        Ok(NukeOutcome::Committed(outcome))
    }

    /// Detonates a nuke with an already chosen survivor.
    ///
    /// `survivor` is required when [`check_nuke_for_conflict`](Self::check_nuke_for_conflict)
    /// reports two or more candidates and must be one of them.
    pub async fn detonate_nuke_with(
        &self,
        detonator: &ParticipantId,
        survivor: Option<&ParticipantId>,
    ) -> TrackerResult<CommitOutcome> {
        let mut guard = self.begin()?;
        self.commit_nuke(&mut guard, detonator, survivor).await
    }

    async fn commit_nuke(
        &self,
        guard: &mut InFlight<'_>,
        detonator: &ParticipantId,
        survivor: Option<&ParticipantId>,
    ) -> TrackerResult<CommitOutcome> {
        let next = {
            let mut core = self.core.lock();
            core.require_active()?;
            let core = &mut *core;
            let from = core.machine.mode();
            let next = core
                .machine
                .detonate_nuke(core.history.current(), detonator, survivor);
            core.note_mode(from);
            next?
        };
        let round = self.controller().commit_new_round(guard, next).await?;
        Ok(self.after_commit(guard, round).await)
    }

    async fn after_commit(&self, guard: &mut InFlight<'_>, round: RoundNumber) -> CommitOutcome {
        if !self.config.auto_complete {
            return CommitOutcome {
                round,
                result: None,
            };
        }
        let result = match win_condition::complete_if_won(&self.controller(), guard).await {
            Ok(result) => Some(result),
            Err(TrackerError::Precondition {
                kind: PreconditionKind::NoWinner,
            }) => None,
            Err(error) => {
                self.core
                    .lock()
                    .events
                    .push(TrackerEvent::CompletionFailed { error });
                None
            },
        };
        CommitOutcome { round, result }
    }

    // ==========================================
    // Navigation
    // ==========================================

    /// Moves the cursor to `round`. Only allowed while idle; never calls the store.
    pub fn set_current_round(&self, round: RoundNumber) -> TrackerResult<()> {
        if self.is_pending() {
            return Err(TrackerError::OperationPending);
        }
        let mut core = self.core.lock();
        let mode = core.machine.mode();
        if mode != ActionMode::Idle {
            core.set_idle();
            return Err(PreconditionKind::NavigationWhileActing { mode }.into());
        }
        core.history.set_current_round(round)?;
        Ok(())
    }

    /// Moves the cursor one round back. Returns `false` at round 0.
    pub fn undo(&self) -> TrackerResult<bool> {
        match self.current_round_number().prev() {
            Some(round) => self.set_current_round(round).map(|()| true),
            None => Ok(false),
        }
    }

    /// Moves the cursor one round forward. Returns `false` at the latest round.
    pub fn redo(&self) -> TrackerResult<bool> {
        if !self.can_redo() {
            return Ok(false);
        }
        self.set_current_round(self.current_round_number().next())
            .map(|()| true)
    }

    /// Returns `true` if the cursor can move back.
    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.current_round_number() > RoundNumber::ZERO
    }

    /// Returns `true` if the cursor can move forward.
    #[must_use]
    pub fn can_redo(&self) -> bool {
        let core = self.core.lock();
        core.history.cursor() < core.history.latest_round().round()
    }

    // ==========================================
    // History and status
    // ==========================================

    /// Deletes every round except round 0, remotely first.
    ///
    /// If the store fails, nothing changes locally.
    pub async fn reset_rounds(&self) -> TrackerResult<()> {
        let mut guard = self.begin()?;
        self.core.lock().require_active()?;
        self.controller().commit_reset(&mut guard).await
    }

    /// Cancels the game. Cancelled games accept no further rounds.
    pub async fn cancel_game(&self) -> TrackerResult<()> {
        let mut guard = self.begin()?;
        self.core.lock().require_active()?;
        self.controller()
            .commit_status_change(&mut guard, StatusUpdate::Cancelled)
            .await?;
        Ok(())
    }

    /// Completes the game if the committed history has a single survivor.
    ///
    /// Commits normally do this automatically; call this to retry after a
    /// [`TrackerEvent::CompletionFailed`], or when `auto_complete` is disabled.
    pub async fn complete_if_won(&self) -> TrackerResult<GameResult> {
        let mut guard = self.begin()?;
        win_condition::complete_if_won(&self.controller(), &mut guard).await
    }

    /// The result the committed history would complete the game with, if any.
    ///
    /// Does not change anything.
    #[must_use]
    pub fn check_win_condition(&self) -> Option<GameResult> {
        win_condition::evaluate_win(&self.core.lock().history)
    }

    // ==========================================
    // Read views
    // ==========================================

    /// Drains the queued events.
    pub fn events(&self) -> EventDrain {
        self.core.lock().events.drain()
    }

    /// The game this session records.
    #[must_use]
    pub fn game_id(&self) -> &GameId {
        &self.game
    }

    /// The participants, in the order they were added.
    #[must_use]
    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    /// The configuration this session was started with.
    #[must_use]
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// The snapshot at the cursor.
    #[must_use]
    pub fn current_round(&self) -> RoundSnapshot {
        self.core.lock().history.current().clone()
    }

    /// The working snapshot for `round`.
    #[must_use]
    pub fn round(&self, round: RoundNumber) -> Option<RoundSnapshot> {
        self.core.lock().history.get_round(round).cloned()
    }

    /// All working rounds, oldest first.
    #[must_use]
    pub fn rounds(&self) -> Vec<RoundSnapshot> {
        self.core.lock().history.working().iter().cloned().collect()
    }

    /// The round the cursor points at.
    #[must_use]
    pub fn current_round_number(&self) -> RoundNumber {
        self.core.lock().history.cursor()
    }

    /// The latest working round.
    #[must_use]
    pub fn latest_round_number(&self) -> RoundNumber {
        self.core.lock().history.latest_round().round()
    }

    /// The latest round the store has confirmed.
    #[must_use]
    pub fn synced_round_number(&self) -> RoundNumber {
        self.core.lock().history.synced_latest().round()
    }

    /// Returns `true` while a mutating operation (including a survivor prompt) is outstanding.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// The active action mode.
    #[must_use]
    pub fn mode(&self) -> ActionMode {
        self.core.lock().machine.mode()
    }

    /// The game status.
    #[must_use]
    pub fn status(&self) -> GameStatus {
        self.core.lock().status
    }

    /// The result, once the game is completed.
    #[must_use]
    pub fn result(&self) -> Option<GameResult> {
        self.core.lock().result.clone()
    }
}
