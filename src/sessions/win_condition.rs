//! Win detection over the committed history.
//!
//! Only the synced tail is ever evaluated. An optimistic round that the store may still
//! reject can never complete a game.

use tracing::debug;

use crate::error::{PreconditionKind, TrackerResult};
use crate::round_history::RoundHistory;
use crate::sessions::sync_controller::{InFlight, SyncController};
use crate::snapshot::GameResult;
use crate::store::{RoundStore, StatusUpdate};

/// Returns the result decided by the latest committed round, if exactly one participant
/// is left in it.
#[must_use]
pub fn evaluate_win(history: &RoundHistory) -> Option<GameResult> {
    history.synced_latest().result()
}

/// Completes the game if the committed history has a single survivor.
pub(crate) async fn complete_if_won<S: RoundStore>(
    controller: &SyncController<'_, S>,
    guard: &mut InFlight<'_>,
) -> TrackerResult<GameResult> {
    let result = {
        let mut core = controller.core.lock();
        core.require_active()?;
        match evaluate_win(&core.history) {
            Some(result) => result,
            None => return Err(PreconditionKind::NoWinner.into()),
        }
    };
    debug!(
        game = %controller.game,
        winner = %result.winner,
        win_by_nuke = result.win_by_nuke,
        "single survivor left, completing game"
    );
    controller
        .commit_status_change(guard, StatusUpdate::Completed(result.clone()))
        .await?;
    Ok(result)
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
    use crate::snapshot::RoundSnapshot;
    use crate::ParticipantId;

    fn id(name: &str) -> ParticipantId {
        ParticipantId::new(name)
    }

    fn two_player_history() -> RoundHistory {
        RoundHistory::new(RoundSnapshot::initial(&[id("a"), id("b")], 1))
    }

    #[test]
    fn no_win_at_start() {
        assert_eq!(evaluate_win(&two_player_history()), None);
    }

    #[test]
    fn optimistic_round_never_wins() {
        let mut history = two_player_history();
        let swims = apply_subtract_life(history.current(), &id("b")).unwrap();
        history.add_round(swims);
        history.commit();
        let dies = apply_subtract_life(history.current(), &id("b")).unwrap();
        history.add_round(dies);
        assert!(history.current().sole_survivor().is_some());
        assert_eq!(evaluate_win(&history), None);
    }

    #[test]
    fn committed_single_survivor_wins() {
        let mut history = two_player_history();
        for _ in 0..2 {
            let next = apply_subtract_life(history.current(), &id("b")).unwrap();
            history.add_round(next);
            history.commit();
        }
        let result = evaluate_win(&history).unwrap();
        assert_eq!(result.winner, id("a"));
        assert_eq!(result.swimming, None);
        assert!(!result.win_by_nuke);
    }

    #[test]
    fn swimmer_and_living_player_is_not_a_win() {
        let mut history = two_player_history();
        let next = apply_subtract_life(history.current(), &id("b")).unwrap();
        history.add_round(next);
        history.commit();
        assert_eq!(evaluate_win(&history), None);
    }
}
