//! The sink decorator that defers the compression decision.
//!
//! [`CompressionSink`] is handed to the application in place of the real
//! sink. Nothing reaches the wrapped sink until headers are about to go out;
//! at that point the decision runs once and the byte path is either left
//! alone or spliced through a transform.

use crate::config::CompressionConfig;
use crate::coordinator::Coordinator;
use crate::decision::{Decision, RequestHead, ResponseHead, add_vary_accept_encoding, decide};
use crate::error::ProtocolError;
use crate::sink::{EventKind, Listener, ListenerBuffer, ResponseSink, SinkEvent};
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, StatusCode, header};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// Where a response is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Nothing was written yet.
    Idle,
    /// Headers are being flushed and the decision is running.
    ///
    /// Transient: the decision runs synchronously inside the first header
    /// flush, so this is never seen between calls on the sink.
    DecisionPending,
    /// Bytes go to the wrapped sink unchanged.
    Bypassed,
    /// Bytes go through a compression transform.
    Compressing,
    /// The response was ended or closed underneath.
    Ended,
}

/// A [`ResponseSink`] that compresses the body when the response allows it.
pub struct CompressionSink<S> {
    inner: S,
    config: Arc<CompressionConfig>,
    request: RequestHead,
    state: State,
    decision: Option<Decision>,
    coordinator: Option<Coordinator>,
    length: Option<u64>,
    pending: ListenerBuffer,
}

impl<S: ResponseSink> CompressionSink<S> {
    /// Wraps `inner` for the response to `request`.
    pub fn new(inner: S, request: RequestHead, config: Arc<CompressionConfig>) -> Self {
        Self {
            inner,
            config,
            request,
            state: State::Idle,
            decision: None,
            coordinator: None,
            length: None,
            pending: ListenerBuffer::default(),
        }
    }

    /// Current state.
    pub fn state(&self) -> State {
        self.state
    }

    /// The decision, once made.
    pub fn decision(&self) -> Option<Decision> {
        self.decision
    }

    /// Records the expected body size for the threshold check.
    ///
    /// Ignored once the decision ran. A `Content-Length` header still wins.
    pub fn hint_length(&mut self, length: u64) {
        if self.state == State::Idle {
            self.length = Some(length);
        }
    }

    /// Returns a reference to the wrapped sink.
    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// Returns a mutable reference to the wrapped sink.
    ///
    /// Writing to it directly bypasses compression.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Consumes the proxy, returning the wrapped sink.
    pub fn into_inner(self) -> S {
        self.inner
    }

    /// Runs the decision if it has not run yet.
    fn resolve(&mut self) {
        if self.state != State::Idle {
            return;
        }
        self.state = State::DecisionPending;

        let response = ResponseHead {
            status: self.inner.status(),
            headers: self.inner.headers(),
        };
        let decision = decide(&self.request, &response, self.length, &self.config);

        if decision.varies() {
            add_vary_accept_encoding(self.inner.headers_mut());
        }

        match decision {
            Decision::Compress(codec) => {
                debug!(encoding = codec.content_encoding(), "compressing response");
                let headers = self.inner.headers_mut();
                headers.insert(
                    header::CONTENT_ENCODING,
                    HeaderValue::from_static(codec.content_encoding()),
                );
                headers.remove(header::CONTENT_LENGTH);

                let transform = self.config.factory.create(codec, &self.config.options);
                let mut coordinator = Coordinator::new(transform);
                self.pending
                    .replay(|kind, listener| coordinator.on(kind, listener));
                self.coordinator = Some(coordinator);
                self.state = State::Compressing;
            }
            Decision::Bypass(reason) => {
                debug!(%reason, "not compressing response");
                let inner = &mut self.inner;
                self.pending.replay(|kind, listener| inner.on(kind, listener));
                self.state = State::Bypassed;
            }
        }
        self.decision = Some(decision);
    }

    /// The implicit header flush done by the first `write` or `end`.
    fn flush_head(&mut self) -> Result<(), S::Error> {
        self.resolve();
        if !self.inner.headers_sent() {
            self.inner.write_head()?;
        }
        Ok(())
    }

    fn inner_closed(&self) -> bool {
        self.inner.is_finished() || self.inner.is_destroyed()
    }

    /// Whether calls must no longer be intercepted.
    ///
    /// Observing the wrapped sink closed out of band also ends the proxy.
    fn check_terminal(&mut self) -> bool {
        if self.state == State::Ended {
            return true;
        }
        if self.inner_closed() {
            self.close();
            return true;
        }
        false
    }

    /// Moves to `Ended` and lets a paused transform run to its end.
    fn close(&mut self) {
        if self.state != State::Ended {
            trace!(state = ?self.state, "response closed");
            self.state = State::Ended;
        }
        if let Some(coordinator) = self.coordinator.as_mut() {
            coordinator.on_response_finished(&mut self.inner);
        }
    }

    /// Only a compressed response can still be open underneath after the
    /// proxy ended; everything else gets the wrapped sink's own answer.
    fn forward_natively(&self) -> bool {
        self.coordinator.is_none() || self.inner_closed()
    }
}

impl<S: ResponseSink> ResponseSink for CompressionSink<S> {
    type Error = S::Error;

    fn status(&self) -> StatusCode {
        self.inner.status()
    }

    fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        self.inner.headers_mut()
    }

    fn headers_sent(&self) -> bool {
        self.inner.headers_sent()
    }

    fn is_finished(&self) -> bool {
        self.state == State::Ended || self.inner.is_finished()
    }

    fn is_destroyed(&self) -> bool {
        self.inner.is_destroyed()
    }

    fn write_head(&mut self) -> Result<(), S::Error> {
        self.resolve();
        self.inner.write_head()
    }

    fn write(&mut self, chunk: Bytes) -> Result<bool, S::Error> {
        if self.check_terminal() {
            if self.forward_natively() {
                return self.inner.write(chunk);
            }
            return Err(ProtocolError::WriteAfterEnd.into());
        }

        self.flush_head()?;
        match self.coordinator.as_mut() {
            Some(coordinator) => Ok(coordinator.write(&mut self.inner, &chunk)),
            None => self.inner.write(chunk),
        }
    }

    fn end(&mut self, chunk: Option<Bytes>) -> Result<(), S::Error> {
        if self.check_terminal() {
            if self.forward_natively() {
                return self.inner.end(chunk);
            }
            return Err(ProtocolError::AlreadyFinished.into());
        }

        if self.state == State::Idle && !self.inner.headers().contains_key(header::CONTENT_LENGTH) {
            self.length = Some(chunk.as_ref().map_or(0, |c| c.len() as u64));
        }

        self.flush_head()?;
        self.state = State::Ended;
        match self.coordinator.as_mut() {
            Some(coordinator) => {
                coordinator.end(&mut self.inner, chunk.as_deref());
                Ok(())
            }
            None => self.inner.end(chunk),
        }
    }

    fn flush(&mut self) -> Result<(), S::Error> {
        if let Some(coordinator) = self.coordinator.as_mut() {
            coordinator.flush(&mut self.inner);
        }
        Ok(())
    }

    fn on(&mut self, kind: EventKind, listener: Listener) {
        if kind != EventKind::Drain {
            self.inner.on(kind, listener);
            return;
        }
        match (self.state, self.coordinator.as_mut()) {
            (State::Idle | State::DecisionPending, _) => self.pending.push(kind, listener),
            (_, Some(coordinator)) => coordinator.on(kind, listener),
            (_, None) => self.inner.on(kind, listener),
        }
    }

    fn emit(&mut self, event: SinkEvent) {
        let kind = event.kind();
        self.inner.emit(event);
        match kind {
            EventKind::Drain => {
                if let Some(coordinator) = self.coordinator.as_mut() {
                    coordinator.on_sink_drain(&mut self.inner);
                }
            }
            EventKind::Finish | EventKind::Close => self.close(),
            EventKind::Error => {}
        }
    }
}

impl<S> fmt::Debug for CompressionSink<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompressionSink")
            .field("state", &self.state)
            .field("decision", &self.decision)
            .field("length", &self.length)
            .field("pending_listeners", &self.pending.len())
            .field(
                "paused",
                &self.coordinator.as_ref().is_some_and(Coordinator::is_paused),
            )
            .field(
                "draining",
                &self.coordinator.as_ref().is_some_and(|c| !c.is_finished()),
            )
            .finish_non_exhaustive()
    }
}
