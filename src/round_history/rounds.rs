//! Immutable, dense round sequences.

use std::sync::Arc;

use crate::snapshot::RoundSnapshot;
use crate::telemetry::InvariantViolation;
use crate::RoundNumber;

/// A dense sequence of snapshots numbered `0..len`.
///
/// Cloning is cheap (two reference counts), so moving the synced watermark is a pointer copy.
/// Every builder returns a new sequence and leaves `self` untouched. A sequence always holds
/// round 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rounds {
    start: Arc<RoundSnapshot>,
    later: Arc<[RoundSnapshot]>,
}

impl Rounds {
    /// A sequence holding only `start`, renumbered to round 0.
    #[must_use]
    pub fn new(start: RoundSnapshot) -> Self {
        Self {
            start: Arc::new(start.renumbered(RoundNumber::ZERO)),
            later: Arc::from(Vec::new()),
        }
    }

    /// Builds a sequence from persisted snapshots.
    ///
    /// Fails unless the snapshots are numbered exactly `0, 1, 2, ...` in order.
    pub fn from_snapshots(snapshots: Vec<RoundSnapshot>) -> Result<Self, InvariantViolation> {
        let mut iter = snapshots.into_iter();
        let start = iter
            .next()
            .ok_or_else(|| InvariantViolation::new("Rounds", "history must contain round 0"))?;
        if start.round() != RoundNumber::ZERO {
            return Err(
                InvariantViolation::new("Rounds", "history must start at round 0")
                    .with_details(format!("found round {}", start.round())),
            );
        }
        let later: Vec<RoundSnapshot> = iter.collect();
        if let Some((index, snapshot)) = later
            .iter()
            .enumerate()
            .find(|(index, snapshot)| snapshot.round().as_index() != index + 1)
        {
            return Err(
                InvariantViolation::new("Rounds", "round numbers are not dense").with_details(
                    format!(
                        "round {} found where round {} was expected",
                        snapshot.round(),
                        index + 1
                    ),
                ),
            );
        }
        Ok(Self {
            start: Arc::new(start),
            later: Arc::from(later),
        })
    }

    /// Number of rounds, including round 0.
    #[must_use]
    pub fn len(&self) -> usize {
        self.later.len() + 1
    }

    /// Always `false`: round 0 is never removed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// The snapshot for `round`, if recorded.
    #[must_use]
    pub fn get(&self, round: RoundNumber) -> Option<&RoundSnapshot> {
        match round.prev() {
            None => Some(&self.start),
            Some(prev) => self.later.get(prev.as_index()),
        }
    }

    /// The snapshot with the highest round number.
    #[must_use]
    pub fn latest(&self) -> &RoundSnapshot {
        self.later.last().unwrap_or(&self.start)
    }

    /// The highest recorded round number.
    #[must_use]
    pub fn latest_round(&self) -> RoundNumber {
        RoundNumber::new(self.later.len() as u32)
    }

    /// Returns `true` if `round` is recorded.
    #[must_use]
    pub fn contains(&self, round: RoundNumber) -> bool {
        round <= self.latest_round()
    }

    /// Iterates over all rounds in order.
    pub fn iter(&self) -> impl Iterator<Item = &RoundSnapshot> + '_ {
        std::iter::once(self.start.as_ref()).chain(self.later.iter())
    }

    /// Returns `true` if both sequences share storage or hold equal rounds.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        (Arc::ptr_eq(&self.start, &other.start) && Arc::ptr_eq(&self.later, &other.later))
            || self == other
    }

    /// A new sequence with `snapshot` appended as the next round.
    #[must_use]
    pub fn appended(&self, snapshot: RoundSnapshot) -> Self {
        let next = self.latest_round().next();
        let mut later = Vec::with_capacity(self.later.len() + 1);
        later.extend(self.later.iter().cloned());
        later.push(snapshot.renumbered(next));
        Self {
            start: Arc::clone(&self.start),
            later: Arc::from(later),
        }
    }

    /// A new sequence holding only the rounds up to and including `keep`.
    #[must_use]
    pub fn truncated_after(&self, keep: RoundNumber) -> Self {
        if keep >= self.latest_round() {
            return self.clone();
        }
        Self {
            start: Arc::clone(&self.start),
            later: self.later.iter().take(keep.as_index()).cloned().collect(),
        }
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

    fn start() -> RoundSnapshot {
        let ids = [ParticipantId::new("a"), ParticipantId::new("b")];
        RoundSnapshot::initial(&ids, 3)
    }

    fn grow(rounds: &Rounds, times: usize) -> Rounds {
        let mut rounds = rounds.clone();
        for _ in 0..times {
            let next = apply_subtract_life(rounds.latest(), &ParticipantId::new("a")).unwrap();
            rounds = rounds.appended(next);
        }
        rounds
    }

    #[test]
    fn new_holds_round_zero() {
        let rounds = Rounds::new(start());
        assert_eq!(rounds.len(), 1);
        assert_eq!(rounds.latest_round(), RoundNumber::ZERO);
        assert!(rounds.get(RoundNumber::ZERO).is_some());
        assert!(rounds.get(RoundNumber::new(1)).is_none());
    }

    #[test]
    fn appended_numbers_densely() {
        let rounds = grow(&Rounds::new(start()), 3);
        let numbers: Vec<u32> = rounds.iter().map(|r| r.round().as_u32()).collect();
        assert_eq!(numbers, vec![0, 1, 2, 3]);
        assert_eq!(rounds.latest().round(), RoundNumber::new(3));
    }

    #[test]
    fn appended_leaves_original_untouched() {
        let base = grow(&Rounds::new(start()), 1);
        let longer = grow(&base, 1);
        assert_eq!(base.len(), 2);
        assert_eq!(longer.len(), 3);
    }

    #[test]
    fn truncated_after_keeps_prefix() {
        let rounds = grow(&Rounds::new(start()), 4);
        let cut = rounds.truncated_after(RoundNumber::new(1));
        assert_eq!(cut.latest_round(), RoundNumber::new(1));
        assert_eq!(cut.get(RoundNumber::new(1)), rounds.get(RoundNumber::new(1)));
        assert!(!cut.contains(RoundNumber::new(2)));
    }

    #[test]
    fn truncated_past_latest_is_identity() {
        let rounds = grow(&Rounds::new(start()), 2);
        let same = rounds.truncated_after(RoundNumber::new(9));
        assert!(same.same_as(&rounds));
    }

    #[test]
    fn from_snapshots_requires_dense_numbering() {
        let rounds = grow(&Rounds::new(start()), 2);
        let snapshots: Vec<RoundSnapshot> = rounds.iter().cloned().collect();
        assert_eq!(Rounds::from_snapshots(snapshots.clone()).unwrap(), rounds);

        let gap = vec![snapshots[0].clone(), snapshots[2].clone()];
        let err = Rounds::from_snapshots(gap).unwrap_err();
        assert_eq!(err.type_name, "Rounds");
        assert_eq!(err.invariant, "round numbers are not dense");
        assert_eq!(
            err.details.as_deref(),
            Some("round 2 found where round 1 was expected")
        );
        assert!(Rounds::from_snapshots(Vec::new()).is_err());
        assert_eq!(
            Rounds::from_snapshots(vec![snapshots[1].clone()])
                .unwrap_err()
                .invariant,
            "history must start at round 0"
        );
    }
}
