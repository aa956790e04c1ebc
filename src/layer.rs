use crate::config::CompressionConfig;
use crate::service::CompressionService;
use std::sync::Arc;
use tower::Layer;

/// A Tower layer that compresses HTTP response bodies.
///
/// This layer wraps services and compresses response bodies when the
/// response qualifies and the client's `Accept-Encoding` allows it.
#[derive(Debug, Clone)]
pub struct CompressionLayer {
    config: Arc<CompressionConfig>,
}

impl CompressionLayer {
    /// Creates a new compression layer with default settings.
    ///
    /// The default threshold for compression is 1024 bytes.
    pub fn new() -> Self {
        Self::with_config(CompressionConfig::new())
    }

    /// Creates a layer applying `config` to every response.
    pub fn with_config(config: CompressionConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Sets the minimum body size required for compression.
    ///
    /// Responses with a known size smaller than this value will not be
    /// compressed.
    pub fn threshold(mut self, bytes: u64) -> Self {
        Arc::make_mut(&mut self.config).threshold = bytes;
        self
    }

    /// Returns the configuration shared by the wrapped services.
    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }
}

impl Default for CompressionLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Layer<S> for CompressionLayer {
    type Service = CompressionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CompressionService::new(inner, self.config.clone())
    }
}
