//! # Round History
//!
//! Two immutable [`Rounds`] sequences and a view cursor:
//!
//! - `synced` is the last history the remote store confirmed (the watermark),
//! - `working` is the local copy, at most one optimistic round ahead of `synced`,
//! - `cursor` points into `working` and moves with undo/redo.
//!
//! ```text
//!   synced:  [0]─[1]─[2]─[3]─[4]
//!                        │
//!   cursor ──────────────┘            add_round(x) from round 2
//!                        ▼
//!   working: [0]─[1]─[2]─[x]          rounds 3..=4 still need remote deletion
//! ```
//!
//! Nothing in here talks to the store. The sync controller decides when to
//! [`commit`](RoundHistory::commit) or [`rollback`](RoundHistory::rollback) based on the
//! remote result.
//!
//! The optimistic round is tracked explicitly rather than by comparing contents: two
//! rounds with equal lives and an equal timestamp are still different rounds. When a
//! create call ends without a definite answer, the store may hold a round past the synced
//! tail. [`mark_remote_tail_uncertain`](RoundHistory::mark_remote_tail_uncertain) records
//! that, and the next commit clears the stale tail before creating anything.

mod rounds;

pub use rounds::Rounds;

use tracing::trace;

use crate::error::PreconditionKind;
use crate::snapshot::RoundSnapshot;
use crate::telemetry::{InvariantChecker, InvariantViolation};
use crate::RoundNumber;

/// Difference between the synced and the working history.
///
/// Computed on demand; it never owns or mutates either sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Divergence {
    /// Number of leading rounds that are identical in both histories.
    pub common_prefix: usize,
    /// Length of the synced history.
    pub synced_len: usize,
    /// Length of the working history.
    pub working_len: usize,
}

impl Divergence {
    /// Compares two histories round by round.
    ///
    /// Content based. [`RoundHistory::divergence`] uses the tracked optimistic round
    /// instead.
    #[must_use]
    pub fn between(synced: &Rounds, working: &Rounds) -> Self {
        let common_prefix = if synced.same_as(working) {
            synced.len()
        } else {
            synced
                .iter()
                .zip(working.iter())
                .take_while(|(s, w)| s == w)
                .count()
        };
        Self {
            common_prefix,
            synced_len: synced.len(),
            working_len: working.len(),
        }
    }

    /// Returns `true` if the histories are identical.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.common_prefix == self.synced_len && self.common_prefix == self.working_len
    }

    /// The first round at which the histories differ.
    #[must_use]
    pub fn first_divergent_round(&self) -> Option<RoundNumber> {
        (!self.is_clean()).then(|| RoundNumber::new(self.common_prefix as u32))
    }

    /// Synced rounds that the working history has dropped or replaced.
    #[must_use]
    pub fn discarded(&self) -> usize {
        self.synced_len.saturating_sub(self.common_prefix)
    }

    /// Working rounds the store has not confirmed yet.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.working_len.saturating_sub(self.common_prefix)
    }
}

/// Synced and working round histories plus the view cursor.
#[derive(Debug, Clone)]
pub struct RoundHistory {
    synced: Rounds,
    working: Rounds,
    cursor: RoundNumber,
    /// The optimistic round in `working` the store has not confirmed.
    pending: Option<RoundNumber>,
    /// The store may hold rounds after the synced tail.
    remote_tail_uncertain: bool,
}

impl RoundHistory {
    /// A history holding only round 0, fully synced.
    #[must_use]
    pub fn new(initial: RoundSnapshot) -> Self {
        Self::from_rounds(Rounds::new(initial))
    }

    /// A fully synced history with the cursor at its latest round.
    #[must_use]
    pub fn from_rounds(rounds: Rounds) -> Self {
        Self {
            cursor: rounds.latest_round(),
            working: rounds.clone(),
            synced: rounds,
            pending: None,
            remote_tail_uncertain: false,
        }
    }

    /// The working snapshot for round `n`.
    #[must_use]
    pub fn get_round(&self, n: RoundNumber) -> Option<&RoundSnapshot> {
        self.working.get(n)
    }

    /// The working snapshot with the highest round number.
    #[must_use]
    pub fn latest_round(&self) -> &RoundSnapshot {
        self.working.latest()
    }

    /// The last round confirmed by the store.
    #[must_use]
    pub fn synced_latest(&self) -> &RoundSnapshot {
        self.synced.latest()
    }

    /// The synced history.
    #[must_use]
    pub fn synced(&self) -> &Rounds {
        &self.synced
    }

    /// The working history.
    #[must_use]
    pub fn working(&self) -> &Rounds {
        &self.working
    }

    /// The round the cursor points at.
    #[must_use]
    pub fn cursor(&self) -> RoundNumber {
        self.cursor
    }

    /// The snapshot at the cursor.
    #[must_use]
    pub fn current(&self) -> &RoundSnapshot {
        self.working
            .get(self.cursor)
            .unwrap_or_else(|| self.working.latest())
    }

    /// Returns `true` if `working` holds a round the store has not confirmed.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// The optimistic round awaiting confirmation, if any.
    #[must_use]
    pub fn pending_round(&self) -> Option<RoundNumber> {
        self.pending
    }

    /// Compares `synced` and `working`.
    ///
    /// Everything before the optimistic round is shared with `synced`; without one the
    /// histories are identical.
    #[must_use]
    pub fn divergence(&self) -> Divergence {
        let common_prefix = match self.pending {
            Some(round) => round.as_index(),
            None => self.synced.len(),
        };
        Divergence {
            common_prefix,
            synced_len: self.synced.len(),
            working_len: self.working.len(),
        }
    }

    /// Records that a create call may have reached the store without being confirmed.
    pub fn mark_remote_tail_uncertain(&mut self) {
        self.remote_tail_uncertain = true;
    }

    /// The first round the store may hold without the synced history knowing about it.
    ///
    /// Deleting from here is required before the next round can be created.
    #[must_use]
    pub fn stale_remote_from(&self) -> Option<RoundNumber> {
        self.remote_tail_uncertain
            .then(|| self.synced.latest_round().next())
    }

    /// Optimistically appends `snapshot` at `cursor + 1` and moves the cursor onto it.
    ///
    /// Working rounds after the cursor are dropped first. Returns the first dropped round
    /// number when that happened: the store must delete from there before the new round is
    /// created.
    pub fn add_round(&mut self, snapshot: RoundSnapshot) -> Option<RoundNumber> {
        let truncate_from =
            (self.cursor < self.working.latest_round()).then(|| self.cursor.next());
        self.working = self
            .working
            .truncated_after(self.cursor)
            .appended(snapshot);
        self.cursor = self.working.latest_round();
        self.pending = Some(self.cursor);
        trace!(
            round = %self.cursor,
            truncate_from = ?truncate_from,
            "optimistic round added"
        );
        truncate_from
    }

    /// Moves the cursor to `n`. Pure navigation.
    pub fn set_current_round(&mut self, n: RoundNumber) -> Result<(), PreconditionKind> {
        let latest = self.working.latest_round();
        if n > latest {
            return Err(PreconditionKind::RoundOutOfRange {
                requested: n,
                latest,
            });
        }
        self.cursor = n;
        Ok(())
    }

    /// Records that the store deleted every round from `from` onwards.
    ///
    /// Clears an uncertain remote tail when the deletion covered it.
    pub fn confirm_truncation(&mut self, from: RoundNumber) {
        if from <= self.synced.latest_round().next() {
            self.remote_tail_uncertain = false;
        }
        if let Some(keep) = from.prev() {
            self.synced = self.synced.truncated_after(keep);
        }
    }

    /// Advances the watermark: `synced := working`.
    pub fn commit(&mut self) {
        self.synced = self.working.clone();
        self.pending = None;
    }

    /// Discards the optimistic change: `working := synced`, cursor at the synced tail.
    pub fn rollback(&mut self) {
        self.working = self.synced.clone();
        self.cursor = self.synced.latest_round();
        self.pending = None;
    }

    /// Keeps only round 0 in both histories, after the store deleted everything else.
    pub fn reset_rounds(&mut self) {
        self.confirm_truncation(RoundNumber::ZERO.next());
        self.working = self.synced.clone();
        self.cursor = RoundNumber::ZERO;
        self.pending = None;
    }
}

impl InvariantChecker for RoundHistory {
    /// # Invariants
    ///
    /// 1. Both histories are numbered densely from 0.
    /// 2. The cursor lies within the working history.
    /// 3. Working is at most one round ahead of the common prefix.
    /// 4. Every round has the participants of round 0 and passes its own checks.
    fn check_invariants(&self) -> Result<(), InvariantViolation> {
        for (name, rounds) in [("synced", &self.synced), ("working", &self.working)] {
            if let Some((index, snapshot)) = rounds
                .iter()
                .enumerate()
                .find(|(index, snapshot)| snapshot.round().as_index() != *index)
            {
                return Err(InvariantViolation::new(
                    "RoundHistory",
                    "round numbers are not dense",
                )
                .with_details(format!(
                    "{}: position {} holds round {}",
                    name,
                    index,
                    snapshot.round()
                )));
            }
        }

        if self.cursor > self.working.latest_round() {
            return Err(InvariantViolation::new(
                "RoundHistory",
                "cursor is past the latest working round",
            )
            .with_details(format!(
                "cursor={}, latest={}",
                self.cursor,
                self.working.latest_round()
            )));
        }

        match self.pending {
            Some(round) => {
                if round != self.working.latest_round() {
                    return Err(InvariantViolation::new(
                        "RoundHistory",
                        "optimistic round is not the latest working round",
                    )
                    .with_details(format!(
                        "pending={}, latest={}",
                        round,
                        self.working.latest_round()
                    )));
                }
                let prefix_shared = self
                    .synced
                    .iter()
                    .zip(self.working.iter())
                    .take(round.as_index())
                    .all(|(s, w)| s == w);
                if round.as_index() > self.synced.len() || !prefix_shared {
                    return Err(InvariantViolation::new(
                        "RoundHistory",
                        "working history is more than one round ahead of synced",
                    )
                    .with_details(format!("{:?}", self.divergence())));
                }
            },
            None => {
                if !self.synced.same_as(&self.working) {
                    return Err(InvariantViolation::new(
                        "RoundHistory",
                        "working history differs from synced without an optimistic round",
                    )
                    .with_details(format!(
                        "{:?}",
                        Divergence::between(&self.synced, &self.working)
                    )));
                }
            },
        }

        let participants: Vec<_> = self.working.latest().lives().keys().collect();
        for snapshot in self.synced.iter().chain(self.working.iter()) {
            if !snapshot.lives().keys().eq(participants.iter().copied()) {
                return Err(InvariantViolation::new(
                    "RoundHistory",
                    "participants differ between rounds",
                )
                .with_details(format!("round={}", snapshot.round())));
            }
            snapshot.check_invariants()?;
        }
        Ok(())
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
    use crate::ParticipantId;

    fn id(name: &str) -> ParticipantId {
        ParticipantId::new(name)
    }

    fn history() -> RoundHistory {
        let ids = [id("a"), id("b"), id("c")];
        RoundHistory::new(RoundSnapshot::initial(&ids, 3))
    }

    fn hit(history: &RoundHistory, who: &str) -> RoundSnapshot {
        apply_subtract_life(history.current(), &id(who)).unwrap()
    }

    fn committed(rounds: usize) -> RoundHistory {
        let mut h = history();
        for _ in 0..rounds {
            let next = hit(&h, "a");
            h.add_round(next);
            h.commit();
        }
        h
    }

    #[test]
    fn add_from_latest_needs_no_truncation() {
        let mut h = history();
        let next = hit(&h, "a");
        assert_eq!(h.add_round(next), None);
        assert_eq!(h.cursor(), RoundNumber::new(1));
        assert!(h.has_pending());
        assert_eq!(h.divergence().pending(), 1);
        assert_eq!(h.synced_latest().round(), RoundNumber::ZERO);
    }

    #[test]
    fn add_from_earlier_cursor_truncates_working() {
        let mut h = committed(4);
        h.set_current_round(RoundNumber::new(2)).unwrap();
        let next = hit(&h, "b");
        assert_eq!(h.add_round(next), Some(RoundNumber::new(3)));
        assert_eq!(h.latest_round().round(), RoundNumber::new(3));
        assert_eq!(h.latest_round().lives_of(&id("b")), Some(2));
        assert_eq!(h.cursor(), RoundNumber::new(3));

        let divergence = h.divergence();
        assert_eq!(divergence.common_prefix, 3);
        assert_eq!(divergence.discarded(), 2);
        assert_eq!(divergence.first_divergent_round(), Some(RoundNumber::new(3)));
        assert!(h.check_invariants().is_ok());
    }

    #[test]
    fn rollback_restores_synced() {
        let mut h = committed(2);
        h.set_current_round(RoundNumber::new(1)).unwrap();
        let next = hit(&h, "c");
        h.add_round(next);
        h.rollback();
        assert!(!h.has_pending());
        assert!(h.divergence().is_clean());
        assert_eq!(h.cursor(), RoundNumber::new(2));
        assert_eq!(h.working(), h.synced());
    }

    #[test]
    fn confirmed_truncation_then_rollback_keeps_truncated_synced() {
        let mut h = committed(4);
        h.set_current_round(RoundNumber::new(1)).unwrap();
        let next = hit(&h, "c");
        let from = h.add_round(next).unwrap();
        h.confirm_truncation(from);
        assert_eq!(h.synced_latest().round(), RoundNumber::new(1));
        h.rollback();
        assert_eq!(h.latest_round().round(), RoundNumber::new(1));
        assert_eq!(h.cursor(), RoundNumber::new(1));
    }

    #[test]
    fn commit_advances_watermark() {
        let mut h = history();
        let next = hit(&h, "a");
        h.add_round(next);
        h.commit();
        assert!(!h.has_pending());
        assert_eq!(h.synced_latest().round(), RoundNumber::new(1));
    }

    #[test]
    fn cursor_out_of_range_is_rejected() {
        let mut h = committed(2);
        let err = h.set_current_round(RoundNumber::new(3)).unwrap_err();
        assert_eq!(
            err,
            PreconditionKind::RoundOutOfRange {
                requested: RoundNumber::new(3),
                latest: RoundNumber::new(2),
            }
        );
        assert_eq!(h.cursor(), RoundNumber::new(2));
    }

    #[test]
    fn navigation_does_not_touch_rounds() {
        let mut h = committed(3);
        let before = h.working().clone();
        h.set_current_round(RoundNumber::ZERO).unwrap();
        assert_eq!(h.current().round(), RoundNumber::ZERO);
        assert_eq!(h.working(), &before);
        assert!(!h.has_pending());
    }

    #[test]
    fn reset_keeps_round_zero() {
        let mut h = committed(3);
        h.reset_rounds();
        assert_eq!(h.latest_round().round(), RoundNumber::ZERO);
        assert_eq!(h.cursor(), RoundNumber::ZERO);
        assert_eq!(h.latest_round().lives_of(&id("a")), Some(3));
        h.commit();
        assert_eq!(h.synced().len(), 1);
    }

    #[test]
    fn get_round_reads_working() {
        let mut h = committed(1);
        let next = hit(&h, "b");
        h.add_round(next);
        assert!(h.get_round(RoundNumber::new(2)).is_some());
        assert!(h.synced().get(RoundNumber::new(2)).is_none());
    }

    #[test]
    fn invariants_hold_through_operations() {
        let mut h = committed(3);
        assert!(h.check_invariants().is_ok());
        h.set_current_round(RoundNumber::new(1)).unwrap();
        let next = hit(&h, "b");
        h.add_round(next);
        assert!(h.check_invariants().is_ok());
        h.rollback();
        assert!(h.check_invariants().is_ok());
    }

    #[test]
    fn replayed_identical_round_is_still_pending() {
        let mut h = committed(3);
        let replay = h.get_round(RoundNumber::new(2)).unwrap().clone();
        h.set_current_round(RoundNumber::new(1)).unwrap();
        assert_eq!(h.add_round(replay), Some(RoundNumber::new(2)));

        assert!(h.has_pending());
        assert_eq!(h.pending_round(), Some(RoundNumber::new(2)));
        assert_eq!(h.divergence().pending(), 1);
        assert!(h.check_invariants().is_ok());
        h.rollback();
        assert!(!h.has_pending());
        assert_eq!(h.latest_round().round(), RoundNumber::new(3));
    }

    #[test]
    fn uncertain_tail_points_past_synced() {
        let mut h = committed(2);
        assert_eq!(h.stale_remote_from(), None);
        h.mark_remote_tail_uncertain();
        assert_eq!(h.stale_remote_from(), Some(RoundNumber::new(3)));

        h.confirm_truncation(RoundNumber::new(4));
        assert_eq!(h.stale_remote_from(), Some(RoundNumber::new(3)));
        h.confirm_truncation(RoundNumber::new(3));
        assert_eq!(h.stale_remote_from(), None);
        assert_eq!(h.synced_latest().round(), RoundNumber::new(2));
    }

    #[test]
    fn reset_clears_uncertain_tail() {
        let mut h = committed(2);
        h.mark_remote_tail_uncertain();
        h.reset_rounds();
        assert_eq!(h.stale_remote_from(), None);
        assert_eq!(h.synced().len(), 1);
        assert!(!h.has_pending());
    }
}
