use crate::decision::{RequestHead, ResponseHead};
use crate::error::Error;
use crate::transform::{CodecTransformFactory, TransformFactory};
use std::fmt;
use std::sync::Arc;

/// Default minimum body size for compression.
pub const DEFAULT_THRESHOLD: u64 = 1024;

/// Default brotli quality; a balance between speed and ratio.
pub const DEFAULT_BROTLI_QUALITY: u32 = 4;

/// Default high-water mark for transform and sink buffers.
pub const DEFAULT_HIGH_WATER_MARK: usize = 16 * 1024;

/// Predicate deciding whether a response may be compressed at all.
pub type Filter = Arc<dyn Fn(&RequestHead, &ResponseHead<'_>) -> bool + Send + Sync>;

/// Tuning passed through to the encoders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderOptions {
    /// Brotli quality (0-11).
    pub brotli_quality: u32,
    /// Brotli window size (lgwin), encoder default when `None`.
    pub brotli_window: Option<i32>,
    /// Gzip/deflate level, encoder default when `None`.
    pub level: Option<i32>,
    /// Bytes of compressed output a transform buffers before it reports
    /// backpressure.
    pub high_water_mark: usize,
}

impl Default for EncoderOptions {
    fn default() -> Self {
        Self {
            brotli_quality: DEFAULT_BROTLI_QUALITY,
            brotli_window: None,
            level: None,
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
        }
    }
}

/// Settings applied to every response.
///
/// Built once and shared between responses behind an [`Arc`].
#[derive(Clone)]
pub struct CompressionConfig {
    pub(crate) filter: Option<Filter>,
    pub(crate) threshold: u64,
    pub(crate) enforce_encoding: String,
    pub(crate) options: EncoderOptions,
    pub(crate) factory: Arc<dyn TransformFactory>,
}

impl CompressionConfig {
    /// Creates a configuration with default settings.
    pub fn new() -> Self {
        Self {
            filter: None,
            threshold: DEFAULT_THRESHOLD,
            enforce_encoding: "identity".to_owned(),
            options: EncoderOptions::default(),
            factory: Arc::new(CodecTransformFactory),
        }
    }

    /// Replaces the default filter.
    ///
    /// The default filter only admits compressible content types; use
    /// [`should_compress`](crate::should_compress) inside a custom filter to keep that check.
    pub fn filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&RequestHead, &ResponseHead<'_>) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Sets the minimum body size, in bytes, required for compression.
    pub fn threshold(mut self, bytes: u64) -> Self {
        self.threshold = bytes;
        self
    }

    /// Sets the threshold from a human readable size such as `"1kb"`.
    pub fn threshold_str(mut self, size: &str) -> Result<Self, Error> {
        self.threshold = parse_size(size)?;
        Ok(self)
    }

    /// Encoding used when the request carries no `Accept-Encoding` header.
    ///
    /// Tokens outside the supported set are ignored.
    pub fn enforce_encoding(mut self, token: impl Into<String>) -> Self {
        self.enforce_encoding = token.into();
        self
    }

    /// Sets the brotli quality.
    pub fn brotli_quality(mut self, quality: u32) -> Self {
        self.options.brotli_quality = quality;
        self
    }

    /// Sets the brotli window size.
    pub fn brotli_window(mut self, lgwin: i32) -> Self {
        self.options.brotli_window = Some(lgwin);
        self
    }

    /// Sets the gzip/deflate compression level.
    pub fn level(mut self, level: i32) -> Self {
        self.options.level = Some(level);
        self
    }

    /// Sets the buffer high-water mark.
    pub fn high_water_mark(mut self, bytes: usize) -> Self {
        self.options.high_water_mark = bytes.max(1);
        self
    }

    /// Replaces the factory used to build compression transforms.
    pub fn transform_factory(mut self, factory: impl TransformFactory + 'static) -> Self {
        self.factory = Arc::new(factory);
        self
    }

    /// Returns the configured threshold in bytes.
    pub fn threshold_bytes(&self) -> u64 {
        self.threshold
    }

    /// Returns the encoder options.
    pub fn options(&self) -> &EncoderOptions {
        &self.options
    }
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CompressionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompressionConfig")
            .field("custom_filter", &self.filter.is_some())
            .field("threshold", &self.threshold)
            .field("enforce_encoding", &self.enforce_encoding)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Parses a human readable byte size.
///
/// Accepts a bare integer (bytes) or a number with an optional fraction
/// followed by one of `b`, `kb`, `mb`, `gb`, `tb`, `pb` (case-insensitive,
/// powers of 1024). Fractional results are floored.
pub fn parse_size(input: &str) -> Result<u64, Error> {
    let invalid = || Error::InvalidThreshold(input.to_owned());
    let s = input.trim();
    let s = s.strip_prefix('+').unwrap_or(s);

    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    let unit = unit.trim_start();

    let multiplier: u64 = match unit.to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "kb" => 1 << 10,
        "mb" => 1 << 20,
        "gb" => 1 << 30,
        "tb" => 1 << 40,
        "pb" => 1 << 50,
        _ => return Err(invalid()),
    };

    let (whole, fraction) = match number.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (number, None),
    };
    if whole.is_empty() || fraction.is_some_and(|f| f.is_empty() || f.contains('.')) {
        return Err(invalid());
    }

    let whole: u64 = whole.parse().map_err(|_| invalid())?;
    let mut bytes = whole.checked_mul(multiplier).ok_or_else(invalid)?;
    if let Some(fraction) = fraction {
        let value: f64 = format!("0.{fraction}").parse().map_err(|_| invalid())?;
        bytes = bytes.saturating_add((value * multiplier as f64).floor() as u64);
    }
    Ok(bytes)
}
