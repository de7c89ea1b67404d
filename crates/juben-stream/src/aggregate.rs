//! Owner of the live [`StreamSession`].

use tokio::sync::watch;

use crate::{
    event::StreamEvent,
    session::{StreamSession, Transition},
};

/// Folds events into the session and publishes it after each change.
///
/// The session lives inside the watch channel and is mutated in place, so a
/// frame costs no snapshot clone. Readers only ever see it through
/// [`subscribe`](Self::subscribe); the session itself is mutated exclusively
/// here.
#[derive(Debug)]
pub struct SessionAggregator {
    snapshots: watch::Sender<StreamSession>,
}

impl SessionAggregator {
    /// Create an aggregator for a fresh session.
    pub fn new(session_id: impl Into<String>) -> Self {
        let (snapshots, _) = watch::channel(StreamSession::new(session_id));
        Self { snapshots }
    }

    /// Create an aggregator publishing into an existing channel.
    pub fn with_sender(
        session_id: impl Into<String>,
        snapshots: watch::Sender<StreamSession>,
    ) -> Self {
        snapshots.send_replace(StreamSession::new(session_id));
        Self { snapshots }
    }

    /// Apply one event. Receivers are notified unless it was ignored.
    pub fn apply(&mut self, event: &StreamEvent) -> Transition {
        let mut transition = Transition::Ignored;
        self.snapshots.send_if_modified(|session| {
            transition = session.apply(event);
            transition != Transition::Ignored
        });
        transition
    }

    /// Mark the session as running.
    pub fn begin(&mut self) {
        self.snapshots.send_modify(StreamSession::begin);
    }

    /// Seal every message still receiving text. Returns how many were sealed.
    pub fn seal_open(&mut self) -> usize {
        let mut sealed = 0;
        self.snapshots.send_if_modified(|session| {
            sealed = session.seal_open();
            sealed > 0
        });
        sealed
    }

    /// Replace the session with a fresh idle one.
    pub fn reset(&mut self, session_id: impl Into<String>) {
        self.snapshots.send_replace(StreamSession::new(session_id));
    }

    /// Borrow the live session. Do not hold the guard across an await.
    pub fn session(&self) -> watch::Ref<'_, StreamSession> {
        self.snapshots.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<StreamSession> {
        self.snapshots.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        event::{ContentDelta, DoneSignal},
        session::SessionStatus,
    };

    #[test]
    fn publishes_snapshots() {
        let mut aggregator = SessionAggregator::new("s1");
        let rx = aggregator.subscribe();

        aggregator.apply(&StreamEvent::Content(ContentDelta::text("Hel")));
        aggregator.apply(&StreamEvent::Content(ContentDelta::text("lo")));
        assert_eq!(rx.borrow().messages[0].content, "Hello");
        assert_eq!(rx.borrow().status, SessionStatus::Running);

        aggregator.apply(&StreamEvent::Done(DoneSignal::stream()));
        assert_eq!(rx.borrow().status, SessionStatus::Completed);
    }

    #[test]
    fn reset_starts_over() {
        let mut aggregator = SessionAggregator::new("s1");
        aggregator.apply(&StreamEvent::Content(ContentDelta::text("x")));
        aggregator.reset("s2");

        let rx = aggregator.subscribe();
        assert_eq!(rx.borrow().session_id, "s2");
        assert!(rx.borrow().messages.is_empty());
        assert_eq!(aggregator.session().status, SessionStatus::Idle);
    }

    #[test]
    fn ignored_events_do_not_notify() {
        let mut aggregator = SessionAggregator::new("s1");
        let mut rx = aggregator.subscribe();
        aggregator.apply(&StreamEvent::Done(DoneSignal::stream()));
        drop(rx.borrow_and_update());

        let transition = aggregator.apply(&StreamEvent::Content(ContentDelta::text("late")));
        assert_eq!(transition, Transition::Ignored);
        assert!(!rx.has_changed().expect("sender alive"));
        assert!(rx.borrow().messages.is_empty());
    }

    #[test]
    fn sealing_splits_the_next_fragment() {
        let mut aggregator = SessionAggregator::new("s1");
        aggregator.apply(&StreamEvent::Content(ContentDelta::text("Hel")));
        assert_eq!(aggregator.seal_open(), 1);
        assert_eq!(aggregator.seal_open(), 0);

        aggregator.apply(&StreamEvent::Content(ContentDelta::text("Hello")));
        let session = aggregator.session();
        assert_eq!(session.messages.len(), 2);
        assert!(!session.messages[0].is_streaming);
        assert_eq!(session.messages[1].content, "Hello");
        assert_eq!(session.status, SessionStatus::Running);
    }
}
