//! Compression transforms: bytes in, encoded bytes out.
//!
//! A transform encodes synchronously on `write` and queues its output. The
//! coordinator pulls that output as [`TransformEvent`]s, so a paused
//! transform simply stops yielding data until it is resumed.

use crate::codec::Codec;
use crate::config::EncoderOptions;
use bytes::{Bytes, BytesMut};
use compression_codecs::EncodeV2;
use compression_core::util::{PartialBuffer, WriteBuffer};
use std::collections::VecDeque;
use std::io;

const OUTPUT_BUFFER_SIZE: usize = 8 * 1024; // 8KB output buffer

/// Output of a transform, in the order it must be handled.
#[derive(Debug)]
pub enum TransformEvent {
    /// Encoded bytes ready for the sink.
    Data(Bytes),
    /// The output queue emptied after a write reported backpressure.
    Drain,
    /// All encoded bytes were handed out; nothing follows.
    End,
    /// Encoding failed; nothing follows.
    Error(io::Error),
}

/// A byte transform with flow control.
pub trait Transform: Send {
    /// Feeds raw bytes. Returns `false` once the output queue is at or above
    /// its high-water mark.
    fn write(&mut self, chunk: &[u8]) -> bool;

    /// Forces buffered input out as encoded bytes.
    fn flush(&mut self);

    /// Feeds an optional last chunk and finishes the encoding.
    fn end(&mut self, chunk: Option<&[u8]>);

    /// Stops yielding `Data`, `Drain` and `End`.
    fn pause(&mut self);

    /// Undoes [`pause`](Transform::pause).
    fn resume(&mut self);

    /// Whether the transform is paused.
    fn is_paused(&self) -> bool;

    /// Takes the next pending event. Errors are yielded even while paused.
    fn poll_event(&mut self) -> Option<TransformEvent>;
}

/// Builds the transform for a negotiated codec.
pub trait TransformFactory: Send + Sync {
    /// Creates a transform for one response.
    fn create(&self, codec: Codec, options: &EncoderOptions) -> Box<dyn Transform>;
}

/// The default factory, backed by `compression-codecs` encoders.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodecTransformFactory;

impl TransformFactory for CodecTransformFactory {
    fn create(&self, codec: Codec, options: &EncoderOptions) -> Box<dyn Transform> {
        Box::new(EncoderTransform::new(
            codec.encoder(options),
            options.high_water_mark,
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Accepting writes.
    Open,
    /// `end` was called; `End` follows once the queue is empty.
    Ending,
    /// `End` was yielded.
    Done,
    /// An error was recorded.
    Failed,
}

/// Queue of produced output plus the flow-control flags around it.
#[derive(Debug)]
pub(crate) struct Readable {
    chunks: VecDeque<Bytes>,
    len: usize,
    high_water_mark: usize,
    paused: bool,
    need_drain: bool,
    phase: Phase,
    error: Option<io::Error>,
}

impl Readable {
    pub(crate) fn new(high_water_mark: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            len: 0,
            high_water_mark: high_water_mark.max(1),
            paused: false,
            need_drain: false,
            phase: Phase::Open,
            error: None,
        }
    }

    fn is_open(&self) -> bool {
        self.phase == Phase::Open
    }

    fn push(&mut self, data: Bytes) {
        if !data.is_empty() {
            self.len += data.len();
            self.chunks.push_back(data);
        }
    }

    /// Backpressure signal for the write that just happened.
    fn writable(&mut self) -> bool {
        let writable = self.phase == Phase::Open && self.len < self.high_water_mark;
        if !writable {
            self.need_drain = true;
        }
        writable
    }

    fn finish(&mut self) {
        if self.phase == Phase::Open {
            self.phase = Phase::Ending;
        }
    }

    fn fail(&mut self, error: io::Error) {
        self.phase = Phase::Failed;
        self.chunks.clear();
        self.len = 0;
        self.error = Some(error);
    }

    fn next_event(&mut self) -> Option<TransformEvent> {
        if let Some(error) = self.error.take() {
            return Some(TransformEvent::Error(error));
        }
        if self.paused || matches!(self.phase, Phase::Done | Phase::Failed) {
            return None;
        }
        if let Some(chunk) = self.chunks.pop_front() {
            self.len -= chunk.len();
            return Some(TransformEvent::Data(chunk));
        }
        if self.need_drain {
            self.need_drain = false;
            if self.phase == Phase::Open {
                return Some(TransformEvent::Drain);
            }
        }
        if self.phase == Phase::Ending {
            self.phase = Phase::Done;
            return Some(TransformEvent::End);
        }
        None
    }
}

/// A transform driving a `compression-codecs` encoder.
pub struct EncoderTransform {
    encoder: Box<dyn EncodeV2 + Send>,
    output_buffer: Vec<u8>,
    readable: Readable,
}

impl EncoderTransform {
    /// Wraps an encoder; output beyond `high_water_mark` bytes signals
    /// backpressure.
    pub fn new(encoder: Box<dyn EncodeV2 + Send>, high_water_mark: usize) -> Self {
        Self {
            encoder,
            output_buffer: vec![0u8; OUTPUT_BUFFER_SIZE],
            readable: Readable::new(high_water_mark),
        }
    }

    /// Compresses a chunk of input data.
    fn encode(&mut self, input: &[u8]) -> io::Result<()> {
        let mut input_buf = PartialBuffer::new(input);
        let mut all_output = BytesMut::new();

        // Keep encoding until all input is consumed
        loop {
            let mut output = WriteBuffer::new_initialized(self.output_buffer.as_mut_slice());
            self.encoder
                .encode(&mut input_buf, &mut output)
                .map_err(io::Error::other)?;

            let written = output.written_len();
            if written > 0 {
                all_output.extend_from_slice(&self.output_buffer[..written]);
            }

            if input_buf.written_len() >= input.len() {
                break;
            }

            // Safety check to prevent infinite loop
            if written == 0 && input_buf.written_len() == 0 {
                break;
            }
        }

        self.readable.push(all_output.freeze());
        Ok(())
    }

    /// Drains the encoder with `flush` or `finish` until it reports done.
    fn drain_encoder(&mut self, finish: bool) -> io::Result<()> {
        let mut all_output = BytesMut::new();
        loop {
            let mut output = WriteBuffer::new_initialized(self.output_buffer.as_mut_slice());
            let result = if finish {
                self.encoder.finish(&mut output)
            } else {
                self.encoder.flush(&mut output)
            };
            let done = result.map_err(io::Error::other)?;

            let written = output.written_len();
            if written > 0 {
                all_output.extend_from_slice(&self.output_buffer[..written]);
            }
            if done {
                break;
            }
        }

        self.readable.push(all_output.freeze());
        Ok(())
    }
}

impl Transform for EncoderTransform {
    fn write(&mut self, chunk: &[u8]) -> bool {
        if !self.readable.is_open() {
            return false;
        }
        if let Err(error) = self.encode(chunk) {
            self.readable.fail(error);
            return false;
        }
        self.readable.writable()
    }

    fn flush(&mut self) {
        if !self.readable.is_open() {
            return;
        }
        if let Err(error) = self.drain_encoder(false) {
            self.readable.fail(error);
        }
    }

    fn end(&mut self, chunk: Option<&[u8]>) {
        if !self.readable.is_open() {
            return;
        }
        let result = match chunk {
            Some(chunk) => self.encode(chunk).and_then(|()| self.drain_encoder(true)),
            None => self.drain_encoder(true),
        };
        match result {
            Ok(()) => self.readable.finish(),
            Err(error) => self.readable.fail(error),
        }
    }

    fn pause(&mut self) {
        self.readable.paused = true;
    }

    fn resume(&mut self) {
        self.readable.paused = false;
    }

    fn is_paused(&self) -> bool {
        self.readable.paused
    }

    fn poll_event(&mut self) -> Option<TransformEvent> {
        self.readable.next_event()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn collect(transform: &mut dyn Transform) -> (Vec<u8>, bool) {
        let mut out = Vec::new();
        let mut ended = false;
        while let Some(event) = transform.poll_event() {
            match event {
                TransformEvent::Data(chunk) => out.extend_from_slice(&chunk),
                TransformEvent::End => ended = true,
                TransformEvent::Drain => {}
                TransformEvent::Error(e) => panic!("unexpected error: {e}"),
            }
        }
        (out, ended)
    }

    fn transform(codec: Codec) -> Box<dyn Transform> {
        CodecTransformFactory.create(codec, &EncoderOptions::default())
    }

    #[test]
    fn test_gzip_round_trip_across_writes() {
        let mut t = transform(Codec::Gzip);
        assert!(t.write(b"hello "));
        assert!(t.write(b"world"));
        t.end(Some(b"!".as_slice()));

        let (compressed, ended) = collect(t.as_mut());
        assert!(ended);
        assert_eq!(&compressed[..2], &[0x1f, 0x8b]);

        let mut decoded = String::new();
        flate2::read::GzDecoder::new(compressed.as_slice())
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, "hello world!");
    }

    #[test]
    fn test_deflate_is_zlib_wrapped() {
        let mut t = transform(Codec::Deflate);
        t.write(b"deflate me");
        t.end(None);

        let (compressed, ended) = collect(t.as_mut());
        assert!(ended);

        let mut decoded = String::new();
        flate2::read::ZlibDecoder::new(compressed.as_slice())
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, "deflate me");
    }

    #[test]
    fn test_brotli_round_trip() {
        let mut t = transform(Codec::Brotli);
        let input = "brotli ".repeat(200);
        t.write(input.as_bytes());
        t.end(None);

        let (compressed, ended) = collect(t.as_mut());
        assert!(ended);
        assert!(compressed.len() < input.len());

        let mut decoded = String::new();
        brotli::Decompressor::new(compressed.as_slice(), 4096)
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, input);
    }

    #[test]
    fn test_flush_emits_decodable_prefix() {
        let mut t = transform(Codec::Gzip);
        t.write(b"partial");
        t.flush();

        let (prefix, ended) = collect(t.as_mut());
        assert!(!ended);

        let mut decoded = Vec::new();
        // A sync-flushed gzip stream decodes up to the flush point
        let _ = flate2::read::GzDecoder::new(prefix.as_slice()).read_to_end(&mut decoded);
        assert_eq!(decoded, b"partial");
    }

    #[test]
    fn test_pause_holds_output_until_resume() {
        let mut t = transform(Codec::Gzip);
        t.pause();
        t.write(b"held back");
        t.end(None);
        assert!(t.is_paused());
        assert!(t.poll_event().is_none());

        t.resume();
        let (compressed, ended) = collect(t.as_mut());
        assert!(ended);
        assert!(!compressed.is_empty());
    }

    #[test]
    fn test_backpressure_then_drain() {
        let mut t = testing::Passthrough::new(4);
        t.pause();
        assert!(t.write(b"ab"));
        assert!(!t.write(b"cd"));

        t.resume();
        assert!(matches!(t.poll_event(), Some(TransformEvent::Data(d)) if d == "ab"));
        assert!(matches!(t.poll_event(), Some(TransformEvent::Data(d)) if d == "cd"));
        assert!(matches!(t.poll_event(), Some(TransformEvent::Drain)));
        assert!(t.poll_event().is_none());
    }

    #[test]
    fn test_end_is_yielded_once() {
        let mut t = testing::Passthrough::new(16);
        t.end(Some(b"x".as_slice()));
        assert!(matches!(t.poll_event(), Some(TransformEvent::Data(_))));
        assert!(matches!(t.poll_event(), Some(TransformEvent::End)));
        assert!(t.poll_event().is_none());
        assert!(!t.write(b"late"));
        assert!(t.poll_event().is_none());
    }

    #[test]
    fn test_error_is_yielded_while_paused() {
        let mut t = testing::PassthroughFactory { fail_writes: true }
            .create(Codec::Gzip, &EncoderOptions::default());
        t.pause();
        assert!(!t.write(b"boom"));
        assert!(matches!(t.poll_event(), Some(TransformEvent::Error(_))));
        assert!(t.poll_event().is_none());
    }
}
