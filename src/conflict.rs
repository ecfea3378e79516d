//! Survivor selection for nuke conflicts.
//!
//! When a nuke would bring two or more participants to zero lives at once, a human has
//! to pick the one who swims. [`GameSession::detonate_nuke`](crate::GameSession::detonate_nuke)
//! hands the candidates to a [`SurvivorPrompt`] and waits. Returning `None` cancels the
//! nuke: the mode goes back to idle and nothing is recorded.
//!
//! Two prompt flavors are provided:
//!
//! - any `Fn(&[ParticipantId]) -> Option<ParticipantId>` closure, for synchronous callers
//!   and tests;
//! - [`ChannelPrompt`], which forwards a [`ConflictRequest`] to another task (usually the
//!   UI) and waits for the answer on a oneshot channel.
//!
//! ```
//! use schwimmen_tracker::{ChannelPrompt, ParticipantId, SurvivorPrompt};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let (prompt, mut requests) = ChannelPrompt::channel();
//! let candidates = [ParticipantId::new("y"), ParticipantId::new("z")];
//!
//! let ui = async {
//!     let request = requests.recv().await.unwrap();
//!     let pick = request.candidates()[1].clone();
//!     request.choose(pick);
//! };
//! let (choice, ()) = tokio::join!(prompt.choose_survivor(&candidates), ui);
//! assert_eq!(choice, Some(ParticipantId::new("z")));
//! # }
//! ```

use std::future::Future;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::ParticipantId;

/// Asks someone to pick the survivor of a nuke conflict.
///
/// The future resolves to the chosen participant, or `None` if the choice was abandoned.
/// Dropping the future abandons the choice as well.
pub trait SurvivorPrompt {
    /// Picks exactly one of `candidates`, or returns `None` to cancel.
    fn choose_survivor(
        &self,
        candidates: &[ParticipantId],
    ) -> impl Future<Output = Option<ParticipantId>>;
}

impl<F> SurvivorPrompt for F
where
    F: Fn(&[ParticipantId]) -> Option<ParticipantId>,
{
    fn choose_survivor(
        &self,
        candidates: &[ParticipantId],
    ) -> impl Future<Output = Option<ParticipantId>> {
        std::future::ready(self(candidates))
    }
}

/// A pending survivor choice, delivered to whoever drives the prompt.
///
/// Answer with [`choose`](Self::choose) or [`cancel`](Self::cancel). Dropping the request
/// without answering counts as a cancel.
#[derive(Debug)]
pub struct ConflictRequest {
    candidates: Vec<ParticipantId>,
    reply: oneshot::Sender<ParticipantId>,
}

impl ConflictRequest {
    /// The tied participants, in id order.
    #[must_use]
    pub fn candidates(&self) -> &[ParticipantId] {
        &self.candidates
    }

    /// Answers the request.
    ///
    /// The choice is validated by the session; a participant that is not one of the
    /// candidates makes the nuke fail with `InvalidSurvivor`.
    pub fn choose(self, survivor: ParticipantId) {
        // the session may already have given up on this request
        let _ = self.reply.send(survivor);
    }

    /// Abandons the request. Equivalent to dropping it.
    pub fn cancel(self) {}

    /// Returns `true` once the waiting session has stopped listening.
    #[must_use]
    pub fn is_abandoned(&self) -> bool {
        self.reply.is_closed()
    }
}

/// A [`SurvivorPrompt`] that sends each conflict over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelPrompt {
    requests: mpsc::UnboundedSender<ConflictRequest>,
}

impl ChannelPrompt {
    /// Creates a prompt and the receiver its requests arrive on.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ConflictRequest>) {
        let (requests, receiver) = mpsc::unbounded_channel();
        (Self { requests }, receiver)
    }
}

impl SurvivorPrompt for ChannelPrompt {
    fn choose_survivor(
        &self,
        candidates: &[ParticipantId],
    ) -> impl Future<Output = Option<ParticipantId>> {
        let (reply, answer) = oneshot::channel();
        let sent = self
            .requests
            .send(ConflictRequest {
                candidates: candidates.to_vec(),
                reply,
            })
            .is_ok();
        async move {
            if !sent {
                debug!("survivor prompt receiver is gone, treating conflict as cancelled");
                return None;
            }
            answer.await.ok()
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

    fn candidates() -> Vec<ParticipantId> {
        vec![ParticipantId::new("y"), ParticipantId::new("z")]
    }

    #[tokio::test]
    async fn closure_prompt_answers_immediately() {
        let prompt = |c: &[ParticipantId]| c.last().cloned();
        let tied = candidates();
        assert_eq!(
            prompt.choose_survivor(&tied).await,
            Some(ParticipantId::new("z"))
        );
    }

    #[tokio::test]
    async fn closure_prompt_can_cancel() {
        let prompt = |_: &[ParticipantId]| -> Option<ParticipantId> { None };
        let tied = candidates();
        assert_eq!(prompt.choose_survivor(&tied).await, None);
    }

    #[tokio::test]
    async fn channel_prompt_delivers_choice() {
        let (prompt, mut requests) = ChannelPrompt::channel();
        let tied = candidates();
        let answer = prompt.choose_survivor(&tied);
        let request = requests.recv().await.unwrap();
        assert_eq!(request.candidates(), tied.as_slice());
        request.choose(ParticipantId::new("y"));
        assert_eq!(answer.await, Some(ParticipantId::new("y")));
    }

    #[tokio::test]
    async fn dropped_request_cancels() {
        let (prompt, mut requests) = ChannelPrompt::channel();
        let tied = candidates();
        let answer = prompt.choose_survivor(&tied);
        drop(requests.recv().await.unwrap());
        assert_eq!(answer.await, None);
    }

    #[tokio::test]
    async fn explicit_cancel() {
        let (prompt, mut requests) = ChannelPrompt::channel();
        let tied = candidates();
        let answer = prompt.choose_survivor(&tied);
        requests.recv().await.unwrap().cancel();
        assert_eq!(answer.await, None);
    }

    #[tokio::test]
    async fn closed_receiver_cancels() {
        let (prompt, requests) = ChannelPrompt::channel();
        drop(requests);
        let tied = candidates();
        assert_eq!(prompt.choose_survivor(&tied).await, None);
    }

    #[tokio::test]
    async fn request_notices_abandoned_session() {
        let (prompt, mut requests) = ChannelPrompt::channel();
        let tied = candidates();
        let answer = prompt.choose_survivor(&tied);
        drop(answer);
        let request = requests.recv().await.unwrap();
        assert!(request.is_abandoned());
    }
}
