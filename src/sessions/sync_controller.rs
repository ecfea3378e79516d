//! Optimistic synchronization of the round history against a [`RoundStore`].
//!
//! Every mutating session operation holds an [`InFlight`] guard for its whole duration.
//! The guard makes operations single-flight and, if the operation's future is dropped
//! while an optimistic round is outstanding, rolls `working` back to `synced`.
//!
//! The session lock is never held across an `.await`: each step locks, updates the history,
//! and unlocks before the next remote call is issued.
//!
//! A create call that fails without a definite answer (a timeout, a lost reply, or a
//! dropped future) may still have been applied. The history then marks its remote tail as
//! uncertain, and the next commit deletes from one past the synced tail before creating.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};
use web_time::Duration;

use crate::action::ActionMachine;
use crate::error::{RemoteOperation, TrackerError, TrackerResult};
use crate::round_history::RoundHistory;
use crate::sessions::event_drain::EventQueue;
use crate::snapshot::{GameResult, RoundSnapshot};
use crate::store::{RoundStore, StatusUpdate, StoreError};
use crate::telemetry::{Violation, ViolationKind, ViolationObserver, ViolationSeverity};
use crate::{
    debug_check_invariants, report_violation_to, ActionMode, GameId, GameStatus, RoundNumber,
    TrackerEvent,
};

/// Mutable state of one game, guarded by the session mutex.
#[derive(Debug)]
pub(crate) struct SessionCore {
    pub(crate) history: RoundHistory,
    pub(crate) machine: ActionMachine,
    pub(crate) status: GameStatus,
    pub(crate) result: Option<GameResult>,
    pub(crate) events: EventQueue,
}

impl SessionCore {
    pub(crate) fn new(
        history: RoundHistory,
        status: GameStatus,
        result: Option<GameResult>,
        event_queue_size: usize,
    ) -> Self {
        Self {
            history,
            machine: ActionMachine::new(),
            status,
            result,
            events: EventQueue::new(event_queue_size),
        }
    }

    /// Records a mode change as an event if the mode actually changed.
    pub(crate) fn note_mode(&mut self, from: ActionMode) {
        let to = self.machine.mode();
        if from != to {
            self.events.push(TrackerEvent::ModeChanged { from, to });
        }
    }

    /// Returns to idle, emitting `ModeChanged` if an action mode was active.
    pub(crate) fn set_idle(&mut self) {
        let from = self.machine.reset();
        if from != ActionMode::Idle {
            self.events.push(TrackerEvent::ModeChanged {
                from,
                to: ActionMode::Idle,
            });
        }
    }

    pub(crate) fn require_active(&mut self) -> TrackerResult<()> {
        if self.status == GameStatus::Active {
            return Ok(());
        }
        self.set_idle();
        Err(crate::PreconditionKind::GameNotActive {
            status: self.status,
        }
        .into())
    }
}

/// Single-flight token for one mutating operation.
///
/// Dropping the guard rolls back an outstanding optimistic round, returns the mode to idle,
/// and lets the next operation in.
pub(crate) struct InFlight<'a> {
    flag: &'a AtomicBool,
    core: &'a Mutex<SessionCore>,
    observer: Option<&'a Arc<dyn ViolationObserver>>,
    armed: bool,
    operation: RemoteOperation,
}

impl<'a> InFlight<'a> {
    pub(crate) fn acquire(
        flag: &'a AtomicBool,
        core: &'a Mutex<SessionCore>,
        observer: Option<&'a Arc<dyn ViolationObserver>>,
    ) -> TrackerResult<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| TrackerError::OperationPending)?;
        Ok(Self {
            flag,
            core,
            observer,
            armed: false,
            operation: RemoteOperation::CreateRound,
        })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        {
            let mut core = self.core.lock();
            if self.armed {
                if self.operation == RemoteOperation::CreateRound {
                    core.history.mark_remote_tail_uncertain();
                }
                core.history.rollback();
                let to_round = core.history.synced_latest().round();
                debug!(%to_round, operation = %self.operation, "operation abandoned, rolled back");
                core.events.push(TrackerEvent::RolledBack {
                    to_round,
                    operation: self.operation,
                });
                let violation = Violation::new(
                    ViolationSeverity::Warning,
                    ViolationKind::RemoteSync,
                    "operation dropped while a round was unconfirmed, rolled back",
                    concat!(file!(), ":", line!()),
                )
                .with_round(to_round)
                .with_context("operation", self.operation.as_str());
                crate::telemetry::report_to_observer(self.observer, &violation);
            }
            core.set_idle();
        }
        self.flag.store(false, Ordering::Release);
    }
}

/// Runs a remote call, applying the configured timeout.
pub(crate) async fn call_remote<T>(
    operation: RemoteOperation,
    remote_timeout: Option<Duration>,
    call: impl Future<Output = Result<T, StoreError>>,
) -> TrackerResult<T> {
    trace!(%operation, "remote call issued");
    let outcome = match remote_timeout {
        Some(after) => match tokio::time::timeout(after, call).await {
            Ok(outcome) => outcome,
            Err(_) => Err(StoreError::Timeout { after }),
        },
        None => call.await,
    };
    outcome.map_err(|source| {
        debug!(%operation, error = %source, "remote call failed");
        TrackerError::RemoteRejection { operation, source }
    })
}

/// Reconciles the history of one game with the store.
pub(crate) struct SyncController<'a, S> {
    pub(crate) game: &'a GameId,
    pub(crate) store: &'a S,
    pub(crate) core: &'a Mutex<SessionCore>,
    pub(crate) remote_timeout: Option<Duration>,
    pub(crate) observer: Option<&'a Arc<dyn ViolationObserver>>,
}

impl<S: RoundStore> SyncController<'_, S> {
    /// Optimistically appends `snapshot` at the cursor and makes the store agree.
    ///
    /// Truncated rounds, and any round an unanswered create may have left behind, are
    /// deleted remotely before the new round is created. Any remote failure rolls `working`
    /// back to `synced` and returns to idle.
    pub(crate) async fn commit_new_round(
        &self,
        guard: &mut InFlight<'_>,
        snapshot: RoundSnapshot,
    ) -> TrackerResult<RoundNumber> {
        let (delete_from, round, persisted) = {
            let mut core = self.core.lock();
            let stale_from = core.history.stale_remote_from();
            let truncate_from = core.history.add_round(snapshot);
            guard.armed = true;
            let round = core.history.cursor();
            let delete_from = truncate_from.into_iter().chain(stale_from).min();
            (delete_from, round, core.history.latest_round().clone())
        };

        if let Some(from) = delete_from {
            guard.operation = RemoteOperation::DeleteRounds;
            let deleted = call_remote(
                RemoteOperation::DeleteRounds,
                self.remote_timeout,
                self.store.delete_rounds_from(self.game, from),
            )
            .await;
            if let Err(error) = deleted {
                return Err(self.roll_back(guard, error));
            }
            self.core.lock().history.confirm_truncation(from);
            debug!(game = %self.game, %from, "remote rounds truncated");
        }

        guard.operation = RemoteOperation::CreateRound;
        let created = call_remote(
            RemoteOperation::CreateRound,
            self.remote_timeout,
            self.store.create_round(self.game, round, &persisted),
        )
        .await;
        if let Err(error) = created {
            if matches!(
                &error,
                TrackerError::RemoteRejection { source, .. } if source.is_indeterminate()
            ) {
                self.core.lock().history.mark_remote_tail_uncertain();
                debug!(game = %self.game, %round, "create outcome unknown, remote tail uncertain");
            }
            return Err(self.roll_back(guard, error));
        }

        let mut core = self.core.lock();
        core.history.commit();
        guard.armed = false;
        core.set_idle();
        core.events.push(TrackerEvent::RoundCommitted { round });
        debug_check_invariants!(core.history, "after commit_new_round");
        debug!(game = %self.game, %round, "round committed");
        Ok(round)
    }

    /// Deletes every round after round 0 remotely, then locally.
    ///
    /// Not optimistic: nothing changes locally unless the store confirms.
    pub(crate) async fn commit_reset(&self, guard: &mut InFlight<'_>) -> TrackerResult<()> {
        guard.operation = RemoteOperation::DeleteRounds;
        call_remote(
            RemoteOperation::DeleteRounds,
            self.remote_timeout,
            self.store
                .delete_rounds_from(self.game, RoundNumber::ZERO.next()),
        )
        .await
        .inspect_err(|error| self.report_failure(RemoteOperation::DeleteRounds, error))?;

        let mut core = self.core.lock();
        core.history.reset_rounds();
        core.history.commit();
        core.set_idle();
        core.events.push(TrackerEvent::HistoryReset);
        debug_check_invariants!(core.history, "after commit_reset");
        debug!(game = %self.game, "history reset");
        Ok(())
    }

    /// Moves the game to a terminal status once the store accepted it.
    pub(crate) async fn commit_status_change(
        &self,
        guard: &mut InFlight<'_>,
        update: StatusUpdate,
    ) -> TrackerResult<GameStatus> {
        guard.operation = RemoteOperation::UpdateStatus;
        let status = call_remote(
            RemoteOperation::UpdateStatus,
            self.remote_timeout,
            self.store.update_game_status(self.game, &update),
        )
        .await
        .inspect_err(|error| match &update {
            StatusUpdate::Completed(result) => self.report_completion_failure(result, error),
            StatusUpdate::Cancelled => self.report_failure(RemoteOperation::UpdateStatus, error),
        })?;

        let mut core = self.core.lock();
        core.status = status;
        core.set_idle();
        match update {
            StatusUpdate::Completed(result) => {
                core.result = Some(result.clone());
                core.events.push(TrackerEvent::GameCompleted { result });
            },
            StatusUpdate::Cancelled => core.events.push(TrackerEvent::GameCancelled),
        }
        debug!(game = %self.game, ?status, "game status changed");
        Ok(status)
    }

    fn roll_back(&self, guard: &mut InFlight<'_>, error: TrackerError) -> TrackerError {
        let operation = guard.operation;
        let (to_round, stale_from) = {
            let mut core = self.core.lock();
            core.history.rollback();
            guard.armed = false;
            core.set_idle();
            let to_round = core.history.synced_latest().round();
            core.events.push(TrackerEvent::RolledBack {
                to_round,
                operation,
            });
            debug_check_invariants!(core.history, "after rollback");
            (to_round, core.history.stale_remote_from())
        };
        let mut violation = Violation::new(
            ViolationSeverity::Warning,
            ViolationKind::RemoteSync,
            format!("{} failed, rolled back to synced history", operation),
            concat!(file!(), ":", line!()),
        )
        .with_round(to_round)
        .with_context("game", self.game.as_str())
        .with_context("error", error.to_string());
        if let Some(from) = stale_from {
            violation = violation.with_context("stale_remote_from", from.to_string());
        }
        report_violation_to!(self.observer.cloned(), violation);
        error
    }

    fn report_completion_failure(&self, result: &GameResult, error: &TrackerError) {
        let violation = Violation::new(
            ViolationSeverity::Error,
            ViolationKind::WinCondition,
            "game is decided but could not be completed",
            concat!(file!(), ":", line!()),
        )
        .with_context("game", self.game.as_str())
        .with_context("winner", result.winner.as_str())
        .with_context("error", error.to_string());
        report_violation_to!(self.observer.cloned(), violation);
    }

    fn report_failure(&self, operation: RemoteOperation, error: &TrackerError) {
        let violation = Violation::new(
            ViolationSeverity::Warning,
            ViolationKind::RemoteSync,
            format!("{} failed, local state unchanged", operation),
            concat!(file!(), ":", line!()),
        )
        .with_context("game", self.game.as_str())
        .with_context("error", error.to_string());
        report_violation_to!(self.observer.cloned(), violation);
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
    use crate::action::apply_subtract_life;
    use crate::store::chaos::{ChaosConfig, ChaosStore};
    use crate::store::memory::{InMemoryRoundStore, StoreCall};
    use crate::telemetry::CollectingObserver;
    use crate::ParticipantId;

    struct Fixture {
        game: GameId,
        store: ChaosStore<InMemoryRoundStore>,
        core: Mutex<SessionCore>,
        flag: AtomicBool,
        observer: Arc<dyn ViolationObserver>,
        collecting: Arc<CollectingObserver>,
    }

    impl Fixture {
        async fn new() -> Self {
            let game = GameId::new("g");
            let memory = InMemoryRoundStore::new();
            memory.insert_game(game.clone());
            let ids = [ParticipantId::new("a"), ParticipantId::new("b")];
            let initial = RoundSnapshot::initial(&ids, 3);
            memory
                .create_round(&game, RoundNumber::ZERO, &initial)
                .await
                .unwrap();
            let collecting = Arc::new(CollectingObserver::new());
            Self {
                game,
                store: ChaosStore::new(memory, ChaosConfig::passthrough()),
                core: Mutex::new(SessionCore::new(
                    RoundHistory::new(initial),
                    GameStatus::Active,
                    None,
                    16,
                )),
                flag: AtomicBool::new(false),
                observer: collecting.clone(),
                collecting,
            }
        }

        fn controller(&self) -> SyncController<'_, ChaosStore<InMemoryRoundStore>> {
            SyncController {
                game: &self.game,
                store: &self.store,
                core: &self.core,
                remote_timeout: None,
                observer: Some(&self.observer),
            }
        }

        fn guard(&self) -> InFlight<'_> {
            InFlight::acquire(&self.flag, &self.core, Some(&self.observer)).unwrap()
        }

        fn next_round(&self, who: &str) -> RoundSnapshot {
            apply_subtract_life(self.core.lock().history.current(), &ParticipantId::new(who))
                .unwrap()
        }

        async fn commit(&self, who: &str) -> TrackerResult<RoundNumber> {
            let mut guard = self.guard();
            let next = self.next_round(who);
            self.controller().commit_new_round(&mut guard, next).await
        }
    }

    #[tokio::test]
    async fn commit_advances_synced() {
        let f = Fixture::new().await;
        assert_eq!(f.commit("a").await.unwrap(), RoundNumber::new(1));
        let core = f.core.lock();
        assert!(!core.history.has_pending());
        assert_eq!(core.history.synced_latest().round(), RoundNumber::new(1));
        assert_eq!(f.store.inner().round_numbers(&f.game).len(), 2);
    }

    #[tokio::test]
    async fn guard_is_single_flight() {
        let f = Fixture::new().await;
        let _held = f.guard();
        assert!(matches!(
            InFlight::acquire(&f.flag, &f.core, None),
            Err(TrackerError::OperationPending)
        ));
    }

    #[tokio::test]
    async fn guard_releases_on_drop() {
        let f = Fixture::new().await;
        drop(f.guard());
        assert!(InFlight::acquire(&f.flag, &f.core, None).is_ok());
    }

    #[tokio::test]
    async fn create_failure_rolls_back() {
        let f = Fixture::new().await;
        f.store.fail_next(RemoteOperation::CreateRound, 1);
        let err = f.commit("a").await.unwrap_err();
        assert!(err.is_remote());
        let mut core = f.core.lock();
        assert!(!core.history.has_pending());
        assert_eq!(core.history.latest_round().round(), RoundNumber::ZERO);
        let events: Vec<_> = core.events.drain().collect();
        assert!(events.contains(&TrackerEvent::RolledBack {
            to_round: RoundNumber::ZERO,
            operation: RemoteOperation::CreateRound,
        }));
        assert!(f.collecting.has_violation(ViolationKind::RemoteSync));
    }

    #[tokio::test]
    async fn truncation_happens_before_create() {
        let f = Fixture::new().await;
        f.commit("a").await.unwrap();
        f.commit("a").await.unwrap();
        f.core
            .lock()
            .history
            .set_current_round(RoundNumber::ZERO)
            .unwrap();
        f.store.inner().clear_calls();

        assert_eq!(f.commit("b").await.unwrap(), RoundNumber::new(1));
        assert_eq!(
            f.store.inner().calls(),
            vec![
                StoreCall::DeleteRoundsFrom {
                    game: f.game.clone(),
                    round: RoundNumber::new(1)
                },
                StoreCall::CreateRound {
                    game: f.game.clone(),
                    round: RoundNumber::new(1)
                },
            ]
        );
        assert_eq!(f.store.inner().round_numbers(&f.game).len(), 2);
    }

    #[tokio::test]
    async fn create_failure_after_truncation_rolls_back_to_truncated_synced() {
        let f = Fixture::new().await;
        f.commit("a").await.unwrap();
        f.commit("a").await.unwrap();
        f.core
            .lock()
            .history
            .set_current_round(RoundNumber::new(1))
            .unwrap();
        f.store.fail_next(RemoteOperation::CreateRound, 1);

        assert!(f.commit("b").await.is_err());
        let core = f.core.lock();
        assert!(core.history.divergence().is_clean());
        assert_eq!(core.history.latest_round().round(), RoundNumber::new(1));
        assert_eq!(f.store.inner().round_numbers(&f.game).len(), 2);
    }

    #[tokio::test]
    async fn reset_failure_changes_nothing() {
        let f = Fixture::new().await;
        f.commit("a").await.unwrap();
        f.store.fail_next(RemoteOperation::DeleteRounds, 1);
        let mut guard = f.guard();
        assert!(f.controller().commit_reset(&mut guard).await.is_err());
        drop(guard);
        assert_eq!(
            f.core.lock().history.latest_round().round(),
            RoundNumber::new(1)
        );
    }

    #[tokio::test]
    async fn dropped_commit_rolls_back() {
        let f = Fixture::new().await;
        let stalled = ChaosStore::new(
            f.store.inner().clone(),
            ChaosConfig::slow(Duration::from_secs(60)),
        );
        let controller = SyncController {
            game: &f.game,
            store: &stalled,
            core: &f.core,
            remote_timeout: None,
            observer: Some(&f.observer),
        };
        let mut guard = f.guard();
        let next = f.next_round("a");
        {
            // poll once so the optimistic round is added, then abandon the call
            let mut future = std::pin::pin!(controller.commit_new_round(&mut guard, next));
            let mut cx = std::task::Context::from_waker(std::task::Waker::noop());
            assert!(future.as_mut().poll(&mut cx).is_pending());
        }
        assert!(f.core.lock().history.has_pending());
        drop(guard);

        {
            let mut core = f.core.lock();
            assert!(!core.history.has_pending());
            assert_eq!(core.history.cursor(), RoundNumber::ZERO);
            assert_eq!(core.history.stale_remote_from(), Some(RoundNumber::new(1)));
            assert!(core
                .events
                .drain()
                .any(|e| matches!(e, TrackerEvent::RolledBack { .. })));
        }
        assert!(InFlight::acquire(&f.flag, &f.core, None).is_ok());
    }

    #[tokio::test]
    async fn timeout_counts_as_failure() {
        let f = Fixture::new().await;
        let slow = ChaosStore::new(f.store.inner().clone(), ChaosConfig::slow(Duration::from_millis(200)));
        let controller = SyncController {
            game: &f.game,
            store: &slow,
            core: &f.core,
            remote_timeout: Some(Duration::from_millis(10)),
            observer: None,
        };
        let mut guard = f.guard();
        let next = f.next_round("a");
        let err = controller.commit_new_round(&mut guard, next).await.unwrap_err();
        assert!(matches!(
            err,
            TrackerError::RemoteRejection {
                source: StoreError::Timeout { .. },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn lost_create_reply_is_cleared_before_next_create() {
        let f = Fixture::new().await;
        f.store.lose_reply_next(RemoteOperation::CreateRound, 1);
        assert!(f.commit("a").await.is_err());
        assert_eq!(
            f.core.lock().history.stale_remote_from(),
            Some(RoundNumber::new(1))
        );
        assert_eq!(f.store.inner().round_numbers(&f.game).len(), 2);
        f.store.inner().clear_calls();

        assert_eq!(f.commit("b").await.unwrap(), RoundNumber::new(1));
        assert_eq!(
            f.store.inner().calls(),
            vec![
                StoreCall::DeleteRoundsFrom {
                    game: f.game.clone(),
                    round: RoundNumber::new(1)
                },
                StoreCall::CreateRound {
                    game: f.game.clone(),
                    round: RoundNumber::new(1)
                },
            ]
        );
        assert_eq!(f.core.lock().history.stale_remote_from(), None);
        let stored = f.store.inner().rounds(&f.game).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[1].lives_of(&ParticipantId::new("b")), Some(2));
        assert_eq!(stored[1].lives_of(&ParticipantId::new("a")), Some(3));
    }

    #[tokio::test]
    async fn rejected_create_leaves_remote_tail_certain() {
        let f = Fixture::new().await;
        let refusing = ChaosStore::new(
            f.store.inner().clone(),
            ChaosConfig::builder()
                .fail_next(RemoteOperation::CreateRound, 1)
                .error(StoreError::rejected("round limit reached"))
                .build(),
        );
        let controller = SyncController {
            game: &f.game,
            store: &refusing,
            core: &f.core,
            remote_timeout: None,
            observer: None,
        };
        let mut guard = f.guard();
        let next = f.next_round("a");
        assert!(controller.commit_new_round(&mut guard, next).await.is_err());
        assert_eq!(f.core.lock().history.stale_remote_from(), None);
    }

    #[tokio::test]
    async fn failed_completion_is_reported_as_win_condition() {
        let f = Fixture::new().await;
        f.store.fail_next(RemoteOperation::UpdateStatus, 1);
        let result = GameResult {
            winner: ParticipantId::new("a"),
            swimming: None,
            win_by_nuke: false,
        };
        let mut guard = f.guard();
        assert!(f
            .controller()
            .commit_status_change(&mut guard, StatusUpdate::Completed(result))
            .await
            .is_err());
        let violations = f.collecting.violations();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].kind, ViolationKind::WinCondition);
        assert_eq!(violations[0].severity, ViolationSeverity::Error);
        assert_eq!(violations[0].context.get("winner").map(String::as_str), Some("a"));
    }
}
