use thiserror::Error;

/// Errors raised while building a [`CompressionConfig`](crate::CompressionConfig).
#[derive(Debug, Error)]
pub enum Error {
    /// The threshold string could not be parsed as a byte size.
    #[error("invalid threshold {0:?}: expected a byte size such as \"1024\" or \"1kb\"")]
    InvalidThreshold(String),
}

/// Misuse of a sink that the proxy has already ended.
///
/// These are only produced while the wrapped sink is still open underneath
/// (the compressor is still draining). Once the wrapped sink is itself
/// finished or destroyed, its own errors are returned instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// `write` was called after `end`.
    #[error("write after end")]
    WriteAfterEnd,
    /// `end` was called a second time.
    #[error("stream already finished")]
    AlreadyFinished,
}

/// Errors returned by [`BufferedSink`](crate::BufferedSink).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    /// The sink was used after it finished.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// The sink was destroyed, e.g. because the client went away.
    #[error("cannot call write after a stream was destroyed")]
    Destroyed,
    /// Headers were already sent.
    #[error("cannot write headers after they are sent to the client")]
    HeadersSent,
}
