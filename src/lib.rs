//! Deferred, backpressure-aware response compression.
//!
//! The core of this crate is [`CompressionSink`], a decorator over any
//! push-style [`ResponseSink`]. It holds back the compression decision until
//! the response headers are about to be sent, runs [`decide`] exactly once,
//! and then either passes bytes straight through or routes them through a
//! compression transform whose output is written to the real sink at the
//! pace the sink can take.
//!
//! A Tower layer built on the same machinery is included for `http` stacks.
//!
//! # Example
//!
//! ```ignore
//! use deferred_compression::{CompressionConfig, CompressionLayer};
//! use tower::ServiceBuilder;
//!
//! let config = CompressionConfig::new().threshold_str("1kb")?;
//! let service = ServiceBuilder::new()
//!     .layer(CompressionLayer::with_config(config))
//!     .service(my_service);
//! ```
//!
//! # Compression Rules
//!
//! The first matching rule wins. A response is **not** compressed when:
//! - the filter rejects it (by default: a `Content-Type` that does not
//!   compress well, or none at all)
//! - `Cache-Control` contains `no-transform`
//! - the declared or estimated size is below the threshold (default 1024 bytes)
//! - `Content-Encoding` is already set to something other than `identity`
//! - the request method is `HEAD`
//! - the client accepts none of `br`, `gzip` or `deflate`
//!
//! # Response Modifications
//!
//! - `Vary` includes `Accept-Encoding` whenever the outcome depended on it
//! - when compressing, `Content-Encoding` is set to the codec used and
//!   `Content-Length` is removed
//!
//! The Tower layer additionally flushes after each chunk when
//! `X-Accel-Buffering: no` is present or the `Content-Type` is
//! `text/event-stream` or `application/grpc-web`.

#![deny(missing_docs)]

mod body;
mod buffer;
mod codec;
mod compressible;
mod config;
mod coordinator;
mod decision;
mod error;
mod future;
mod layer;
mod proxy;
mod service;
mod sink;
mod transform;

pub use body::CompressionBody;
pub use buffer::BufferedSink;
pub use codec::{Codec, PREFERRED_ENCODINGS, SUPPORTED_ENCODINGS, negotiate};
pub use compressible::is_compressible;
pub use config::{
    CompressionConfig, DEFAULT_BROTLI_QUALITY, DEFAULT_HIGH_WATER_MARK, DEFAULT_THRESHOLD,
    EncoderOptions, Filter, parse_size,
};
pub use decision::{BypassReason, Decision, RequestHead, ResponseHead, decide, should_compress};
pub use error::{Error, ProtocolError, SinkError};
pub use future::ResponseFuture;
pub use layer::CompressionLayer;
pub use proxy::{CompressionSink, State};
pub use service::CompressionService;
pub use sink::{EventKind, Listener, Listeners, ResponseSink, SinkEvent};
pub use transform::{CodecTransformFactory, EncoderTransform, Transform, TransformEvent, TransformFactory};
