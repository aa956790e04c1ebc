//! Moves compressed output into the sink while honoring its backpressure.

use crate::sink::{EventKind, Listener, Listeners, ResponseSink, SinkEvent};
use crate::transform::{Transform, TransformEvent};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Couples one transform to one sink for the rest of a response.
///
/// The coordinator is the only caller of the sink's `end` once compression
/// starts. Every public operation finishes by pumping the transform until
/// it has nothing more to yield.
pub(crate) struct Coordinator {
    transform: Box<dyn Transform>,
    /// Drain subscribers of the proxy, replayed onto the transform.
    listeners: Listeners,
    errored: bool,
    ended: bool,
    /// The response finished or disconnected; output has nowhere to go.
    closed: bool,
}

impl Coordinator {
    pub(crate) fn new(transform: Box<dyn Transform>) -> Self {
        Self {
            transform,
            listeners: Listeners::new(),
            errored: false,
            ended: false,
            closed: false,
        }
    }

    /// Subscribes to the transform's events.
    pub(crate) fn on(&mut self, kind: EventKind, listener: Listener) {
        self.listeners.add(kind, listener);
    }

    /// Whether the transform reached its end and the sink was ended.
    pub(crate) fn is_finished(&self) -> bool {
        self.ended
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.transform.is_paused()
    }

    /// Feeds application bytes; the result is the transform's own
    /// backpressure signal as it stands once its output was pumped.
    ///
    /// A `false` is always followed by a drain.
    pub(crate) fn write<S: ResponseSink>(&mut self, sink: &mut S, chunk: &[u8]) -> bool {
        if self.errored || self.ended {
            return false;
        }
        let writable = self.transform.write(chunk);
        let drained = self.pump(sink);
        writable || drained
    }

    pub(crate) fn end<S: ResponseSink>(&mut self, sink: &mut S, chunk: Option<&[u8]>) {
        if !self.errored {
            self.transform.end(chunk);
        }
        self.pump(sink);
    }

    pub(crate) fn flush<S: ResponseSink>(&mut self, sink: &mut S) {
        if !self.errored {
            self.transform.flush();
        }
        self.pump(sink);
    }

    /// The sink emptied its buffer.
    pub(crate) fn on_sink_drain<S: ResponseSink>(&mut self, sink: &mut S) {
        if self.transform.is_paused() {
            trace!("sink drained, resuming compression");
            self.transform.resume();
        }
        self.pump(sink);
    }

    /// The response finished or the client went away.
    ///
    /// No drain will follow, so a paused transform is resumed regardless;
    /// its remaining output is discarded and it can still reach its end.
    pub(crate) fn on_response_finished<S: ResponseSink>(&mut self, sink: &mut S) {
        self.closed = true;
        if self.transform.is_paused() {
            debug!("response finished while compression was paused, resuming");
            self.transform.resume();
        }
        self.pump(sink);
    }

    /// Returns whether a drain was delivered.
    fn pump<S: ResponseSink>(&mut self, sink: &mut S) -> bool {
        let mut drained = false;
        while !self.errored && !self.ended {
            let Some(event) = self.transform.poll_event() else {
                break;
            };
            match event {
                TransformEvent::Data(chunk) => {
                    if self.closed || sink.is_finished() || sink.is_destroyed() {
                        trace!(len = chunk.len(), "response closed, discarding compressed data");
                        continue;
                    }
                    match sink.write(chunk) {
                        Ok(true) => {}
                        Ok(false) => {
                            if !sink.is_finished() && !sink.is_destroyed() {
                                trace!("sink full, pausing compression");
                                self.transform.pause();
                            }
                        }
                        Err(err) => debug!(?err, "sink rejected compressed data"),
                    }
                }
                TransformEvent::Drain => {
                    drained = true;
                    self.listeners.emit(&SinkEvent::Drain);
                }
                TransformEvent::End => {
                    self.ended = true;
                    if let Err(err) = sink.end(None) {
                        debug!(?err, "failed to end response after compression");
                    }
                }
                TransformEvent::Error(err) => {
                    warn!(error = %err, "compression failed");
                    self.errored = true;
                    sink.emit(SinkEvent::Error(Arc::new(err)));
                }
            }
        }
        drained
    }
}
