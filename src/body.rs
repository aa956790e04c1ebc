use crate::buffer::BufferedSink;
use crate::decision::Decision;
use crate::proxy::CompressionSink;
use crate::sink::{ResponseSink, SinkEvent};
use bytes::{Buf, Bytes};
use http::HeaderMap;
use http_body::{Body, Frame};
use pin_project_lite::pin_project;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

pin_project! {
    /// A response body routed through a [`CompressionSink`].
    ///
    /// Frames from the inner body are written to the sink; whatever the sink
    /// buffered is handed out as data frames. The body plays the transport
    /// for the sink, so it also delivers its `drain` and `finish` events.
    pub struct CompressionBody<B> {
        #[pin]
        inner: B,
        sink: CompressionSink<BufferedSink>,
        always_flush: bool,
        state: BodyState,
        pending_trailers: Option<HeaderMap>,
    }
}

/// State machine for polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BodyState {
    /// Reading data from the inner body.
    Reading,
    /// The sink was ended; waiting for it to finish.
    Finishing,
    /// Emitting buffered trailers.
    Trailers,
    /// Everything was emitted.
    Done,
}

impl<B> CompressionBody<B> {
    pub(crate) fn new(inner: B, sink: CompressionSink<BufferedSink>, always_flush: bool) -> Self {
        Self {
            inner,
            sink,
            always_flush,
            state: BodyState::Reading,
            pending_trailers: None,
        }
    }

    /// The compression decision made for this response.
    pub fn decision(&self) -> Option<Decision> {
        self.sink.decision()
    }

    /// Whether the transform is flushed after every frame.
    pub fn always_flush(&self) -> bool {
        self.always_flush
    }

    fn is_compressed(&self) -> bool {
        matches!(self.sink.decision(), Some(Decision::Compress(_)))
    }
}

impl<B> Body for CompressionBody<B>
where
    B: Body,
    B::Data: Buf,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let mut this = self.project();

        loop {
            // Hand out whatever the sink holds before reading more
            if let Some((chunk, drained)) = this.sink.get_mut().pop_chunk() {
                if drained {
                    this.sink.emit(SinkEvent::Drain);
                }
                return Poll::Ready(Some(Ok(Frame::data(chunk))));
            }

            if let Some(err) = this.sink.get_mut().take_error() {
                *this.state = BodyState::Done;
                return Poll::Ready(Some(Err(io::Error::new(err.kind(), err.to_string()))));
            }

            match *this.state {
                BodyState::Done => return Poll::Ready(None),

                BodyState::Trailers => {
                    *this.state = BodyState::Done;
                    if let Some(trailers) = this.pending_trailers.take() {
                        return Poll::Ready(Some(Ok(Frame::trailers(trailers))));
                    }
                }

                BodyState::Finishing => {
                    if !this.sink.get_ref().is_finished() {
                        *this.state = BodyState::Done;
                        return Poll::Ready(Some(Err(io::Error::other(
                            "compression stopped before the response finished",
                        ))));
                    }
                    this.sink.emit(SinkEvent::Finish);
                    *this.state = BodyState::Trailers;
                }

                BodyState::Reading => match this.inner.as_mut().poll_frame(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(None) => {
                        this.sink.end(None).map_err(io::Error::other)?;
                        *this.state = BodyState::Finishing;
                    }
                    Poll::Ready(Some(Err(e))) => {
                        return Poll::Ready(Some(Err(io::Error::other(e.into()))));
                    }
                    Poll::Ready(Some(Ok(frame))) => match frame.into_data() {
                        Ok(mut data) => {
                            let chunk = data.copy_to_bytes(data.remaining());
                            this.sink.write(chunk).map_err(io::Error::other)?;
                            if *this.always_flush {
                                this.sink.flush().map_err(io::Error::other)?;
                            }
                        }
                        Err(frame) => {
                            if let Ok(trailers) = frame.into_trailers() {
                                // Hold trailers until the compressed body is out
                                *this.pending_trailers = Some(trailers);
                                this.sink.end(None).map_err(io::Error::other)?;
                                *this.state = BodyState::Finishing;
                            }
                        }
                    },
                },
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.state == BodyState::Done
    }

    fn size_hint(&self) -> http_body::SizeHint {
        if self.is_compressed() || self.state != BodyState::Reading {
            // Compressed size is unknown
            http_body::SizeHint::default()
        } else {
            self.inner.size_hint()
        }
    }
}

impl<B> std::fmt::Debug for CompressionBody<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompressionBody")
            .field("sink", &self.sink)
            .field("state", &self.state)
            .field("always_flush", &self.always_flush)
            .finish_non_exhaustive()
    }
}
