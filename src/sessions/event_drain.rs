use std::collections::vec_deque::IntoIter;
use std::collections::VecDeque;
use std::iter::FusedIterator;

use crate::TrackerEvent;

/// An opaque iterator over the events drained from a session.
///
/// The events are taken out of the session when [`GameSession::events()`] is called, so
/// the session lock is not held while iterating. It implements [`Iterator`],
/// [`DoubleEndedIterator`], [`ExactSizeIterator`], and [`FusedIterator`].
///
/// # Examples
///
/// ```ignore
/// for event in session.events() {
///     match event {
///         TrackerEvent::ConflictDetected { candidates } => show_picker(candidates),
///         TrackerEvent::GameCompleted { result } => show_winner(result.winner),
///         _ => { /* handle other events */ }
///     }
/// }
/// ```
///
/// [`GameSession::events()`]: crate::GameSession::events
#[must_use = "iterators are lazy and do nothing unless consumed"]
pub struct EventDrain {
    inner: IntoIter<TrackerEvent>,
}

impl EventDrain {
    pub(crate) fn from_queue(queue: VecDeque<TrackerEvent>) -> Self {
        Self {
            inner: queue.into_iter(),
        }
    }
}

impl Iterator for EventDrain {
    type Item = TrackerEvent;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl DoubleEndedIterator for EventDrain {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back()
    }
}

impl ExactSizeIterator for EventDrain {
    fn len(&self) -> usize {
        self.inner.len()
    }
}

impl FusedIterator for EventDrain {}

impl std::fmt::Debug for EventDrain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDrain")
            .field("remaining", &self.len())
            .finish()
    }
}

/// Bounded event queue owned by a session. Drops the oldest event when full.
#[derive(Debug, Clone)]
pub(crate) struct EventQueue {
    events: VecDeque<TrackerEvent>,
    capacity: usize,
}

impl EventQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub(crate) fn push(&mut self, event: TrackerEvent) {
        while self.events.len() >= self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub(crate) fn drain(&mut self) -> EventDrain {
        EventDrain::from_queue(std::mem::take(&mut self.events))
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
    use crate::RoundNumber;

    fn committed(n: u32) -> TrackerEvent {
        TrackerEvent::RoundCommitted {
            round: RoundNumber::new(n),
        }
    }

    #[test]
    fn drain_yields_in_order() {
        let mut queue = EventQueue::new(10);
        queue.push(committed(1));
        queue.push(committed(2));
        let events: Vec<_> = queue.drain().collect();
        assert_eq!(events, vec![committed(1), committed(2)]);
    }

    #[test]
    fn drain_empties_queue() {
        let mut queue = EventQueue::new(10);
        queue.push(TrackerEvent::HistoryReset);
        assert_eq!(queue.drain().len(), 1);
        assert_eq!(queue.drain().len(), 0);
    }

    #[test]
    fn full_queue_drops_oldest() {
        let mut queue = EventQueue::new(2);
        queue.push(committed(1));
        queue.push(committed(2));
        queue.push(committed(3));
        let events: Vec<_> = queue.drain().collect();
        assert_eq!(events, vec![committed(2), committed(3)]);
    }

    #[test]
    fn drain_is_double_ended_and_fused() {
        let mut queue = EventQueue::new(4);
        queue.push(committed(1));
        queue.push(committed(2));
        let mut drain = queue.drain();
        assert_eq!(drain.next_back(), Some(committed(2)));
        assert_eq!(drain.next(), Some(committed(1)));
        assert_eq!(drain.next(), None);
        assert_eq!(drain.next(), None);
    }

    #[test]
    fn debug_shows_remaining() {
        let mut queue = EventQueue::new(4);
        queue.push(TrackerEvent::GameCancelled);
        let drain = queue.drain();
        assert_eq!(format!("{:?}", drain), "EventDrain { remaining: 1 }");
    }
}
