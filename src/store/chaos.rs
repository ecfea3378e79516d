//! A store wrapper for fault injection testing.
//!
//! [`ChaosStore`] wraps any [`RoundStore`] and makes chosen operations fail, lose their
//! reply, or answer late. This is how the rollback paths of a session are exercised
//! without a real backend.
//!
//! # Example
//!
//! ```
//! use schwimmen_tracker::{ChaosConfig, ChaosStore, InMemoryRoundStore, RemoteOperation};
//! use std::time::Duration;
//!
//! let config = ChaosConfig::builder()
//!     .latency(Duration::from_millis(5))
//!     .fail_next(RemoteOperation::CreateRound, 1)
//!     .build();
//! let store = ChaosStore::new(InMemoryRoundStore::new(), config);
//! assert_eq!(store.stats().injected_failures, 0);
//! ```
//!
//! # Failure modes
//!
//! - **Fail**: the call is refused before it reaches the wrapped store.
//! - **Lose reply**: the wrapped store applies the call, but the caller gets an error, as
//!   with a response lost in transit.
//! - **Latency**: every call waits before it is forwarded.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::debug;
use web_time::Duration;

use super::{PersistedGame, RoundStore, StatusUpdate, StoreError};
use crate::error::RemoteOperation;
use crate::snapshot::RoundSnapshot;
use crate::{GameId, GameStatus, RoundNumber};

/// What happens to the next calls of one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePlan {
    /// Forward every call.
    #[default]
    Pass,
    /// Refuse the next `n` calls, then pass.
    FailNext(u32),
    /// Refuse every call.
    FailAlways,
    /// Forward the next `n` calls but report them as failed, then pass.
    LoseReplyNext(u32),
}

impl FailurePlan {
    /// Consumes one call from the plan and returns what to do with it.
    fn advance(&mut self) -> Verdict {
        match *self {
            FailurePlan::Pass => Verdict::Pass,
            FailurePlan::FailAlways => Verdict::Fail,
            FailurePlan::FailNext(n) => {
                *self = if n > 1 {
                    FailurePlan::FailNext(n - 1)
                } else {
                    FailurePlan::Pass
                };
                if n > 0 {
                    Verdict::Fail
                } else {
                    Verdict::Pass
                }
            },
            FailurePlan::LoseReplyNext(n) => {
                *self = if n > 1 {
                    FailurePlan::LoseReplyNext(n - 1)
                } else {
                    FailurePlan::Pass
                };
                if n > 0 {
                    Verdict::LoseReply
                } else {
                    Verdict::Pass
                }
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Pass,
    Fail,
    LoseReply,
}

/// Configuration for a [`ChaosStore`].
///
/// Use [`ChaosConfig::builder()`] for a fluent configuration API.
#[derive(Debug, Clone, PartialEq)]
pub struct ChaosConfig {
    /// Delay before every call is forwarded (default: none).
    pub latency: Duration,
    /// Initial plan per operation. Operations without an entry pass.
    pub plans: HashMap<RemoteOperation, FailurePlan>,
    /// The error returned for injected failures.
    pub error: StoreError,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            latency: Duration::ZERO,
            plans: HashMap::new(),
            error: StoreError::unavailable("injected failure"),
        }
    }
}

impl ChaosConfig {
    /// Creates a builder for fluent configuration.
    #[must_use]
    pub fn builder() -> ChaosConfigBuilder {
        ChaosConfigBuilder::new()
    }

    /// No faults at all.
    #[must_use]
    pub fn passthrough() -> Self {
        Self::default()
    }

    /// Every call is delayed by `latency`.
    #[must_use]
    pub fn slow(latency: Duration) -> Self {
        Self::builder().latency(latency).build()
    }

    /// Every call of `operation` is refused.
    #[must_use]
    pub fn broken(operation: RemoteOperation) -> Self {
        Self::builder().fail_always(operation).build()
    }
}

/// Builder for [`ChaosConfig`].
#[derive(Debug, Clone, Default)]
pub struct ChaosConfigBuilder {
    config: ChaosConfig,
}

impl ChaosConfigBuilder {
    /// Creates a builder starting from [`ChaosConfig::passthrough`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the delay before each call.
    #[must_use]
    pub fn latency(mut self, latency: Duration) -> Self {
        self.config.latency = latency;
        self
    }

    /// Refuses the next `n` calls of `operation`.
    #[must_use]
    pub fn fail_next(mut self, operation: RemoteOperation, n: u32) -> Self {
        self.config
            .plans
            .insert(operation, FailurePlan::FailNext(n));
        self
    }

    /// Refuses every call of `operation`.
    #[must_use]
    pub fn fail_always(mut self, operation: RemoteOperation) -> Self {
        self.config.plans.insert(operation, FailurePlan::FailAlways);
        self
    }

    /// Applies the next `n` calls of `operation` but reports them as failed.
    #[must_use]
    pub fn lose_reply_next(mut self, operation: RemoteOperation, n: u32) -> Self {
        self.config
            .plans
            .insert(operation, FailurePlan::LoseReplyNext(n));
        self
    }

    /// Sets the error injected failures report.
    #[must_use]
    pub fn error(mut self, error: StoreError) -> Self {
        self.config.error = error;
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> ChaosConfig {
        self.config
    }
}

/// Counters of what a [`ChaosStore`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChaosStats {
    /// Calls received.
    pub calls: u64,
    /// Calls refused before reaching the wrapped store.
    pub injected_failures: u64,
    /// Calls applied by the wrapped store but reported as failed.
    pub lost_replies: u64,
}

#[derive(Debug)]
struct ChaosState {
    plans: HashMap<RemoteOperation, FailurePlan>,
    stats: ChaosStats,
}

/// Wraps a [`RoundStore`] to simulate an unreliable backend.
#[derive(Debug)]
pub struct ChaosStore<S> {
    inner: S,
    latency: Duration,
    error: StoreError,
    state: Mutex<ChaosState>,
}

impl<S: RoundStore> ChaosStore<S> {
    /// Wraps `inner` with the given configuration.
    pub fn new(inner: S, config: ChaosConfig) -> Self {
        Self {
            inner,
            latency: config.latency,
            error: config.error,
            state: Mutex::new(ChaosState {
                plans: config.plans,
                stats: ChaosStats::default(),
            }),
        }
    }

    /// Returns a reference to the wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Consumes the wrapper and returns the wrapped store.
    pub fn into_inner(self) -> S {
        self.inner
    }

    /// Refuses the next `n` calls of `operation`.
    pub fn fail_next(&self, operation: RemoteOperation, n: u32) {
        self.set_plan(operation, FailurePlan::FailNext(n));
    }

    /// Refuses every call of `operation` until [`heal`](Self::heal) is called.
    pub fn fail_always(&self, operation: RemoteOperation) {
        self.set_plan(operation, FailurePlan::FailAlways);
    }

    /// Applies the next `n` calls of `operation` but reports them as failed.
    pub fn lose_reply_next(&self, operation: RemoteOperation, n: u32) {
        self.set_plan(operation, FailurePlan::LoseReplyNext(n));
    }

    /// Replaces the plan for `operation`.
    pub fn set_plan(&self, operation: RemoteOperation, plan: FailurePlan) {
        self.state.lock().plans.insert(operation, plan);
    }

    /// Lets every call through again.
    pub fn heal(&self) {
        self.state.lock().plans.clear();
    }

    /// Returns statistics about injected faults.
    pub fn stats(&self) -> ChaosStats {
        self.state.lock().stats.clone()
    }

    fn verdict(&self, operation: RemoteOperation) -> Verdict {
        let mut state = self.state.lock();
        state.stats.calls += 1;
        let verdict = state.plans.entry(operation).or_default().advance();
        match verdict {
            Verdict::Pass => {},
            Verdict::Fail => state.stats.injected_failures += 1,
            Verdict::LoseReply => state.stats.lost_replies += 1,
        }
        if verdict != Verdict::Pass {
            debug!(%operation, ?verdict, "injecting store fault");
        }
        verdict
    }

    async fn delay(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    async fn run<T>(
        &self,
        operation: RemoteOperation,
        call: impl std::future::Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        self.delay().await;
        match self.verdict(operation) {
            Verdict::Pass => call.await,
            Verdict::Fail => Err(self.error.clone()),
            Verdict::LoseReply => {
                let _ = call.await;
                Err(self.error.clone())
            },
        }
    }
}

impl<S: RoundStore> RoundStore for ChaosStore<S> {
    async fn create_round(
        &self,
        game: &GameId,
        round: RoundNumber,
        snapshot: &RoundSnapshot,
    ) -> Result<RoundSnapshot, StoreError> {
        self.run(
            RemoteOperation::CreateRound,
            self.inner.create_round(game, round, snapshot),
        )
        .await
    }

    async fn delete_rounds_from(&self, game: &GameId, round: RoundNumber) -> Result<(), StoreError> {
        self.run(
            RemoteOperation::DeleteRounds,
            self.inner.delete_rounds_from(game, round),
        )
        .await
    }

    async fn update_game_status(
        &self,
        game: &GameId,
        update: &StatusUpdate,
    ) -> Result<GameStatus, StoreError> {
        self.run(
            RemoteOperation::UpdateStatus,
            self.inner.update_game_status(game, update),
        )
        .await
    }

    async fn fetch_game(&self, game: &GameId) -> Result<PersistedGame, StoreError> {
        self.run(RemoteOperation::FetchGame, self.inner.fetch_game(game))
            .await
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
    use crate::ParticipantId;

    fn game() -> GameId {
        GameId::new("g")
    }

    fn snapshot() -> RoundSnapshot {
        let ids = [ParticipantId::new("a"), ParticipantId::new("b")];
        RoundSnapshot::initial(&ids, 3)
    }

    fn chaos(config: ChaosConfig) -> ChaosStore<InMemoryRoundStore> {
        let inner = InMemoryRoundStore::new();
        inner.insert_game(game());
        ChaosStore::new(inner, config)
    }

    #[test]
    fn fail_next_counts_down() {
        let mut plan = FailurePlan::FailNext(2);
        assert_eq!(plan.advance(), Verdict::Fail);
        assert_eq!(plan.advance(), Verdict::Fail);
        assert_eq!(plan.advance(), Verdict::Pass);
        assert_eq!(plan, FailurePlan::Pass);
    }

    #[test]
    fn fail_next_zero_passes() {
        let mut plan = FailurePlan::FailNext(0);
        assert_eq!(plan.advance(), Verdict::Pass);
    }

    #[tokio::test]
    async fn passthrough_forwards() {
        let store = chaos(ChaosConfig::passthrough());
        store
            .create_round(&game(), RoundNumber::ZERO, &snapshot())
            .await
            .unwrap();
        assert_eq!(store.inner().round_numbers(&game()).len(), 1);
        assert_eq!(store.stats().calls, 1);
    }

    #[tokio::test]
    async fn injected_failure_does_not_reach_inner() {
        let store = chaos(
            ChaosConfig::builder()
                .fail_next(RemoteOperation::CreateRound, 1)
                .build(),
        );
        let err = store
            .create_round(&game(), RoundNumber::ZERO, &snapshot())
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::unavailable("injected failure"));
        assert!(store.inner().round_numbers(&game()).is_empty());

        store
            .create_round(&game(), RoundNumber::ZERO, &snapshot())
            .await
            .unwrap();
        assert_eq!(store.stats().injected_failures, 1);
    }

    #[tokio::test]
    async fn lost_reply_is_applied_but_reported_failed() {
        let store = chaos(ChaosConfig::passthrough());
        store.lose_reply_next(RemoteOperation::CreateRound, 1);
        assert!(store
            .create_round(&game(), RoundNumber::ZERO, &snapshot())
            .await
            .is_err());
        assert_eq!(store.inner().round_numbers(&game()).len(), 1);
        assert_eq!(store.stats().lost_replies, 1);
    }

    #[tokio::test]
    async fn fail_always_until_healed() {
        let store = chaos(ChaosConfig::broken(RemoteOperation::DeleteRounds));
        for _ in 0..3 {
            assert!(store
                .delete_rounds_from(&game(), RoundNumber::new(1))
                .await
                .is_err());
        }
        store.heal();
        assert!(store
            .delete_rounds_from(&game(), RoundNumber::new(1))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn plans_are_per_operation() {
        let store = chaos(ChaosConfig::broken(RemoteOperation::UpdateStatus));
        assert!(store
            .create_round(&game(), RoundNumber::ZERO, &snapshot())
            .await
            .is_ok());
        assert!(store
            .update_game_status(&game(), &StatusUpdate::Cancelled)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn custom_error_is_reported() {
        let store = chaos(
            ChaosConfig::builder()
                .fail_always(RemoteOperation::FetchGame)
                .error(StoreError::rejected("maintenance"))
                .build(),
        );
        assert_eq!(
            store.fetch_game(&game()).await.unwrap_err(),
            StoreError::rejected("maintenance")
        );
    }

    #[tokio::test]
    async fn latency_delays_calls() {
        let store = chaos(ChaosConfig::slow(Duration::from_millis(20)));
        let started = web_time::Instant::now();
        store.fetch_game(&game()).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(20));
    }
}
