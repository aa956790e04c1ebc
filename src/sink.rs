//! The push-style response interface the proxy decorates.

use crate::error::ProtocolError;
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use std::io;
use std::sync::Arc;

/// Kinds of events a sink emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// The sink's buffer emptied after a write reported backpressure.
    Drain,
    /// The response was completely handed to the transport.
    Finish,
    /// The underlying connection closed.
    Close,
    /// The response failed.
    Error,
}

/// An event emitted by a sink.
#[derive(Debug, Clone)]
pub enum SinkEvent {
    /// See [`EventKind::Drain`].
    Drain,
    /// See [`EventKind::Finish`].
    Finish,
    /// See [`EventKind::Close`].
    Close,
    /// See [`EventKind::Error`].
    Error(Arc<io::Error>),
}

impl SinkEvent {
    /// Returns the kind of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            SinkEvent::Drain => EventKind::Drain,
            SinkEvent::Finish => EventKind::Finish,
            SinkEvent::Close => EventKind::Close,
            SinkEvent::Error(_) => EventKind::Error,
        }
    }
}

/// A callback subscribed to sink events.
pub type Listener = Box<dyn FnMut(&SinkEvent) + Send>;

/// The transport-facing side of one response.
///
/// Transports deliver events by calling [`emit`](ResponseSink::emit) on the
/// outermost sink they handed to the application, so decorators observe
/// every event before passing it on.
pub trait ResponseSink {
    /// Error returned by the transport for misuse or I/O failure.
    type Error: From<ProtocolError> + std::fmt::Debug;

    /// Response status.
    fn status(&self) -> StatusCode;

    /// Response headers.
    fn headers(&self) -> &HeaderMap;

    /// Mutable response headers; changes after `write_head` have no effect.
    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// Whether the status line and headers went out.
    fn headers_sent(&self) -> bool;

    /// Whether `end` was called.
    fn is_finished(&self) -> bool;

    /// Whether the sink was torn down, e.g. by a client disconnect.
    fn is_destroyed(&self) -> bool;

    /// Sends the status line and headers.
    fn write_head(&mut self) -> Result<(), Self::Error>;

    /// Writes a body chunk. `Ok(false)` asks the caller to wait for
    /// [`EventKind::Drain`] before writing more.
    fn write(&mut self, chunk: Bytes) -> Result<bool, Self::Error>;

    /// Finishes the response, optionally with a last chunk.
    fn end(&mut self, chunk: Option<Bytes>) -> Result<(), Self::Error>;

    /// Pushes out anything buffered.
    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Subscribes to an event.
    fn on(&mut self, kind: EventKind, listener: Listener);

    /// Delivers an event to this sink's subscribers.
    fn emit(&mut self, event: SinkEvent);
}

/// Subscriber lists for a sink.
#[derive(Default)]
pub struct Listeners {
    entries: Vec<(EventKind, Listener)>,
}

impl Listeners {
    /// Creates an empty subscriber list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a subscriber.
    pub fn add(&mut self, kind: EventKind, listener: Listener) {
        self.entries.push((kind, listener));
    }

    /// Calls every subscriber of the event's kind, in subscription order.
    pub fn emit(&mut self, event: &SinkEvent) {
        let kind = event.kind();
        for (_, listener) in self.entries.iter_mut().filter(|(k, _)| *k == kind) {
            listener(event);
        }
    }

    /// Number of subscribers of a kind.
    pub fn count(&self, kind: EventKind) -> usize {
        self.entries.iter().filter(|(k, _)| *k == kind).count()
    }
}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners")
            .field("len", &self.entries.len())
            .finish()
    }
}

/// Subscriptions made before the compression decision.
///
/// Flushed exactly once onto whichever emitter ends up producing the event.
#[derive(Default)]
pub(crate) struct ListenerBuffer {
    pending: Vec<(EventKind, Listener)>,
}

impl ListenerBuffer {
    pub(crate) fn push(&mut self, kind: EventKind, listener: Listener) {
        self.pending.push((kind, listener));
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    /// Hands every buffered subscription to `target`, in order.
    pub(crate) fn replay(&mut self, mut target: impl FnMut(EventKind, Listener)) {
        for (kind, listener) in self.pending.drain(..) {
            target(kind, listener);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter(hits: &Arc<AtomicUsize>) -> Listener {
        let hits = hits.clone();
        Box::new(move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_listeners_only_see_their_kind() {
        let drains = Arc::new(AtomicUsize::new(0));
        let finishes = Arc::new(AtomicUsize::new(0));

        let mut listeners = Listeners::new();
        listeners.add(EventKind::Drain, counter(&drains));
        listeners.add(EventKind::Finish, counter(&finishes));

        listeners.emit(&SinkEvent::Drain);
        listeners.emit(&SinkEvent::Drain);

        assert_eq!(drains.load(Ordering::SeqCst), 2);
        assert_eq!(finishes.load(Ordering::SeqCst), 0);
        assert_eq!(listeners.count(EventKind::Drain), 1);
    }

    #[test]
    fn test_listener_buffer_replays_in_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut buffer = ListenerBuffer::default();
        for i in 0..3 {
            let order = order.clone();
            buffer.push(
                EventKind::Drain,
                Box::new(move |_| order.lock().unwrap().push(i)),
            );
        }
        assert_eq!(buffer.len(), 3);

        let mut listeners = Listeners::new();
        buffer.replay(|kind, listener| listeners.add(kind, listener));
        assert_eq!(buffer.len(), 0);

        listeners.emit(&SinkEvent::Drain);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }
}
