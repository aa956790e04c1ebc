use crate::error::{ProtocolError, SinkError};
use crate::sink::{EventKind, Listener, Listeners, ResponseSink, SinkEvent};
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;

/// An in-memory response sink with a bounded write buffer.
///
/// Writes queue chunks until the transport takes them with
/// [`pop_chunk`](BufferedSink::pop_chunk). A write that leaves the buffer at
/// or above the high-water mark returns `Ok(false)`; the transport is then
/// expected to emit [`SinkEvent::Drain`] once it has taken everything.
///
/// The sink never emits events on its own. Whoever owns the transport side
/// delivers them through [`ResponseSink::emit`] on the outermost sink.
pub struct BufferedSink {
    status: StatusCode,
    headers: HeaderMap,
    headers_sent: bool,
    chunks: VecDeque<Bytes>,
    buffered: usize,
    high_water_mark: usize,
    need_drain: bool,
    ended: bool,
    destroyed: bool,
    listeners: Listeners,
    error: Option<Arc<io::Error>>,
}

impl BufferedSink {
    /// Creates a sink for a response with the given status and headers.
    pub fn new(status: StatusCode, headers: HeaderMap, high_water_mark: usize) -> Self {
        Self {
            status,
            headers,
            headers_sent: false,
            chunks: VecDeque::new(),
            buffered: 0,
            high_water_mark: high_water_mark.max(1),
            need_drain: false,
            ended: false,
            destroyed: false,
            listeners: Listeners::new(),
            error: None,
        }
    }

    /// Takes the oldest buffered chunk.
    ///
    /// The flag is true when this pop emptied a buffer that previously
    /// reported backpressure, i.e. when a drain event is due.
    pub fn pop_chunk(&mut self) -> Option<(Bytes, bool)> {
        let chunk = self.chunks.pop_front()?;
        self.buffered -= chunk.len();
        let drained = self.need_drain && self.chunks.is_empty();
        if drained {
            self.need_drain = false;
        }
        Some((chunk, drained))
    }

    /// Bytes written but not yet taken.
    pub fn buffered_len(&self) -> usize {
        self.buffered
    }

    /// Whether no chunk is waiting to be taken.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Tears the sink down, dropping anything still buffered.
    pub fn destroy(&mut self) {
        self.destroyed = true;
        self.chunks.clear();
        self.buffered = 0;
        self.need_drain = false;
    }

    /// Takes the first error delivered through [`SinkEvent::Error`].
    pub fn take_error(&mut self) -> Option<Arc<io::Error>> {
        self.error.take()
    }

    fn check_writable(&self) -> Result<(), SinkError> {
        if self.destroyed {
            Err(SinkError::Destroyed)
        } else if self.ended {
            Err(ProtocolError::WriteAfterEnd.into())
        } else {
            Ok(())
        }
    }

    fn push(&mut self, chunk: Bytes) {
        self.headers_sent = true;
        if !chunk.is_empty() {
            self.buffered += chunk.len();
            self.chunks.push_back(chunk);
        }
    }
}

impl ResponseSink for BufferedSink {
    type Error = SinkError;

    fn status(&self) -> StatusCode {
        self.status
    }

    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn headers_sent(&self) -> bool {
        self.headers_sent
    }

    fn is_finished(&self) -> bool {
        self.ended
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    fn write_head(&mut self) -> Result<(), SinkError> {
        if self.headers_sent {
            return Err(SinkError::HeadersSent);
        }
        self.headers_sent = true;
        Ok(())
    }

    fn write(&mut self, chunk: Bytes) -> Result<bool, SinkError> {
        self.check_writable()?;
        self.push(chunk);
        let writable = self.buffered < self.high_water_mark;
        if !writable {
            self.need_drain = true;
        }
        Ok(writable)
    }

    fn end(&mut self, chunk: Option<Bytes>) -> Result<(), SinkError> {
        if self.destroyed {
            return Err(SinkError::Destroyed);
        }
        if self.ended {
            return Err(ProtocolError::AlreadyFinished.into());
        }
        self.push(chunk.unwrap_or_default());
        self.ended = true;
        Ok(())
    }

    fn on(&mut self, kind: EventKind, listener: Listener) {
        self.listeners.add(kind, listener);
    }

    fn emit(&mut self, event: SinkEvent) {
        if let SinkEvent::Error(err) = &event {
            if self.error.is_none() {
                self.error = Some(err.clone());
            }
        }
        self.listeners.emit(&event);
    }
}

impl std::fmt::Debug for BufferedSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferedSink")
            .field("status", &self.status)
            .field("headers_sent", &self.headers_sent)
            .field("buffered", &self.buffered)
            .field("ended", &self.ended)
            .field("destroyed", &self.destroyed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sink(high_water_mark: usize) -> BufferedSink {
        BufferedSink::new(StatusCode::OK, HeaderMap::new(), high_water_mark)
    }

    #[test]
    fn test_write_reports_backpressure_at_high_water_mark() {
        let mut sink = sink(8);
        assert!(sink.write(Bytes::from_static(b"1234")).unwrap());
        assert!(!sink.write(Bytes::from_static(b"5678")).unwrap());
        assert_eq!(sink.buffered_len(), 8);

        let (first, drained) = sink.pop_chunk().unwrap();
        assert_eq!(first, "1234");
        assert!(!drained);

        let (second, drained) = sink.pop_chunk().unwrap();
        assert_eq!(second, "5678");
        assert!(drained);
        assert!(sink.pop_chunk().is_none());
    }

    #[test]
    fn test_write_sends_headers_implicitly() {
        let mut sink = sink(8);
        assert!(!sink.headers_sent());
        sink.write(Bytes::from_static(b"x")).unwrap();
        assert!(sink.headers_sent());
        assert_eq!(sink.write_head(), Err(SinkError::HeadersSent));
    }

    #[test]
    fn test_write_after_end() {
        let mut sink = sink(8);
        sink.end(Some(Bytes::from_static(b"last"))).unwrap();
        assert!(sink.is_finished());

        assert_eq!(
            sink.write(Bytes::from_static(b"late")),
            Err(SinkError::Protocol(ProtocolError::WriteAfterEnd))
        );
        assert_eq!(
            sink.end(None),
            Err(SinkError::Protocol(ProtocolError::AlreadyFinished))
        );
        assert_eq!(sink.pop_chunk().unwrap().0, "last");
    }

    #[test]
    fn test_destroy_drops_buffer_and_rejects_io() {
        let mut sink = sink(8);
        sink.write(Bytes::from_static(b"pending")).unwrap();
        sink.destroy();

        assert!(sink.is_destroyed());
        assert!(sink.is_empty());
        assert_eq!(sink.buffered_len(), 0);
        assert_eq!(sink.write(Bytes::from_static(b"x")), Err(SinkError::Destroyed));
        assert_eq!(sink.end(None), Err(SinkError::Destroyed));
    }

    #[test]
    fn test_emit_reaches_listeners_and_records_error() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut sink = sink(8);
        let counter = hits.clone();
        sink.on(
            EventKind::Error,
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        sink.emit(SinkEvent::Drain);
        sink.emit(SinkEvent::Error(Arc::new(io::Error::other("first"))));
        sink.emit(SinkEvent::Error(Arc::new(io::Error::other("second"))));

        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(sink.take_error().unwrap().to_string(), "first");
        assert!(sink.take_error().is_none());
    }
}
