//! A [`LinkHandler`] that records every callback.

use std::{
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use fabriclink::{
    InboundMessage,
    Link,
    LinkHandler,
    MessageHeader,
    Result,
    SentOutcome,
    SharedBuffer,
    TransportError,
};

/// One recorded callback.
#[derive(Debug)]
pub enum Event {
    /// A complete inbound frame.
    Received {
        /// Decoded header.
        header: MessageHeader,
        /// Body bytes.
        body: Vec<u8>,
    },
    /// A fatal error reported through `on_received`.
    Failed(TransportError),
    /// A queued frame completed or was dropped.
    Sent {
        /// Completion status.
        outcome: SentOutcome,
        /// Header of the frame.
        header: MessageHeader,
    },
    /// The link broke.
    Broken,
}

/// Records callbacks in arrival order and wakes waiters on each one.
#[derive(Debug, Default)]
pub struct RecordingHandler {
    events: Mutex<Vec<Event>>,
    changed: Condvar,
}

impl RecordingHandler {
    /// New handler, ready to pass to [`Link::new`].
    #[must_use]
    pub fn new() -> Arc<Self> { Arc::new(Self::default()) }

    fn events(&self) -> MutexGuard<'_, Vec<Event>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, event: Event) {
        self.events().push(event);
        self.changed.notify_all();
    }

    /// Block until `done` holds for the recorded events or `timeout` passes.
    /// Returns the final verdict of `done`.
    pub fn wait_for(&self, timeout: Duration, done: impl Fn(&[Event]) -> bool) -> bool {
        let guard = self.events();
        let (guard, _) = self
            .changed
            .wait_timeout_while(guard, timeout, |events| !done(events))
            .unwrap_or_else(PoisonError::into_inner);
        done(&guard)
    }

    /// Run `f` over the recorded events.
    pub fn with_events<R>(&self, f: impl FnOnce(&[Event]) -> R) -> R { f(&self.events()) }

    /// Frames received so far.
    #[must_use]
    pub fn received(&self) -> Vec<(MessageHeader, Vec<u8>)> {
        self.with_events(|events| {
            events
                .iter()
                .filter_map(|event| match event {
                    Event::Received { header, body } => Some((*header, body.clone())),
                    _ => None,
                })
                .collect()
        })
    }

    /// Completions reported so far.
    #[must_use]
    pub fn sent(&self) -> Vec<(SentOutcome, MessageHeader)> {
        self.with_events(|events| {
            events
                .iter()
                .filter_map(|event| match event {
                    Event::Sent { outcome, header } => Some((*outcome, *header)),
                    _ => None,
                })
                .collect()
        })
    }

    /// Number of `on_broken` calls.
    #[must_use]
    pub fn broken_count(&self) -> usize {
        self.with_events(|events| events.iter().filter(|e| matches!(e, Event::Broken)).count())
    }

    /// Number of errors reported through `on_received`.
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.with_events(|events| events.iter().filter(|e| matches!(e, Event::Failed(_))).count())
    }
}

impl LinkHandler for RecordingHandler {
    fn on_received(&self, _link: &Arc<Link>, message: Result<InboundMessage>) {
        self.push(match message {
            Ok(message) => Event::Received {
                header: message.header,
                body: message.body.as_slice().to_vec(),
            },
            Err(e) => Event::Failed(e),
        });
    }

    fn on_sent(
        &self,
        _link: &Arc<Link>,
        outcome: SentOutcome,
        header: &MessageHeader,
        _context: Option<SharedBuffer>,
    ) {
        self.push(Event::Sent {
            outcome,
            header: *header,
        });
    }

    fn on_broken(&self, _link: &Arc<Link>) { self.push(Event::Broken); }
}
