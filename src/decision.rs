//! The per-response compression decision.
//!
//! [`decide`] is a pure function of request and response metadata. It runs
//! once, when the response headers are about to be sent.

use crate::codec::{Codec, PREFERRED_ENCODINGS, SUPPORTED_ENCODINGS, negotiate};
use crate::compressible::is_compressible;
use crate::config::CompressionConfig;
use http::{HeaderMap, HeaderValue, Method, Request, StatusCode, Uri, header};
use std::fmt;

/// The request metadata the decision looks at.
#[derive(Debug, Clone, Default)]
pub struct RequestHead {
    /// Request method.
    pub method: Method,
    /// Request target.
    pub uri: Uri,
    /// Request headers.
    pub headers: HeaderMap,
}

impl RequestHead {
    /// Creates a request head with no headers.
    pub fn new(method: Method) -> Self {
        Self {
            method,
            ..Self::default()
        }
    }

    /// Copies the head of an HTTP request.
    pub fn from_request<B>(request: &Request<B>) -> Self {
        Self {
            method: request.method().clone(),
            uri: request.uri().clone(),
            headers: request.headers().clone(),
        }
    }

    /// Adds a header, returning the head for chaining.
    pub fn with_header(mut self, name: header::HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Returns every `Accept-Encoding` value joined with `", "`, or `None`
    /// when the header is absent.
    pub fn accept_encoding(&self) -> Option<String> {
        let values: Vec<&str> = self
            .headers
            .get_all(header::ACCEPT_ENCODING)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        if values.is_empty() && !self.headers.contains_key(header::ACCEPT_ENCODING) {
            None
        } else {
            Some(values.join(", "))
        }
    }
}

/// The response metadata the decision looks at.
#[derive(Debug, Clone, Copy)]
pub struct ResponseHead<'a> {
    /// Response status.
    pub status: StatusCode,
    /// Response headers as they stand right before being sent.
    pub headers: &'a HeaderMap,
}

impl ResponseHead<'_> {
    /// Returns a header value as a string, if present and valid.
    pub fn header(&self, name: header::HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Why a response is sent uncompressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BypassReason {
    /// A custom filter rejected the response.
    Filtered,
    /// `Cache-Control: no-transform` forbids altering the body.
    NoTransform,
    /// The body is smaller than the configured threshold.
    BelowThreshold,
    /// The body already carries a content coding.
    AlreadyEncoded,
    /// HEAD responses carry no body.
    HeadRequest,
    /// The content type does not compress well.
    NotCompressible,
    /// The client accepts no supported coding.
    NotAcceptable,
}

impl BypassReason {
    /// Short description used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            BypassReason::Filtered => "filtered",
            BypassReason::NoTransform => "no transform",
            BypassReason::BelowThreshold => "size below threshold",
            BypassReason::AlreadyEncoded => "already encoded",
            BypassReason::HeadRequest => "HEAD request",
            BypassReason::NotCompressible => "not compressible",
            BypassReason::NotAcceptable => "not acceptable",
        }
    }
}

impl fmt::Display for BypassReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of [`decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Send the body unmodified.
    Bypass(BypassReason),
    /// Compress the body with the given codec.
    Compress(Codec),
}

impl Decision {
    /// Returns the chosen codec, if compressing.
    pub fn codec(&self) -> Option<Codec> {
        match self {
            Decision::Compress(codec) => Some(*codec),
            Decision::Bypass(_) => None,
        }
    }

    /// Whether the response must declare `Vary: Accept-Encoding`.
    ///
    /// True for every outcome reached after the filter and no-transform
    /// checks, since those depend on the request's encoding preferences.
    pub fn varies(&self) -> bool {
        !matches!(
            self,
            Decision::Bypass(
                BypassReason::Filtered | BypassReason::NoTransform | BypassReason::NotCompressible
            )
        )
    }
}

/// Decides whether and how to compress one response.
///
/// `length` is an estimate of the body size, used only when the response
/// declares no `Content-Length`.
pub fn decide(
    request: &RequestHead,
    response: &ResponseHead<'_>,
    length: Option<u64>,
    config: &CompressionConfig,
) -> Decision {
    match &config.filter {
        Some(filter) if !filter(request, response) => {
            return Decision::Bypass(BypassReason::Filtered);
        }
        None if !should_compress(request, response) => {
            return Decision::Bypass(BypassReason::NotCompressible);
        }
        _ => {}
    }

    if !should_transform(response.headers) {
        return Decision::Bypass(BypassReason::NoTransform);
    }

    if is_below_threshold(response.headers, length, config.threshold) {
        return Decision::Bypass(BypassReason::BelowThreshold);
    }

    if has_content_encoding(response.headers) {
        return Decision::Bypass(BypassReason::AlreadyEncoded);
    }

    if request.method == Method::HEAD {
        return Decision::Bypass(BypassReason::HeadRequest);
    }

    let accept_encoding = request.accept_encoding();
    let mut token = negotiate(
        accept_encoding.as_deref(),
        &SUPPORTED_ENCODINGS,
        &PREFERRED_ENCODINGS,
    );

    // No header at all: fall back to the enforced coding if we support it
    if accept_encoding.is_none() {
        if let Some(enforced) = SUPPORTED_ENCODINGS
            .iter()
            .find(|t| t.eq_ignore_ascii_case(&config.enforce_encoding))
        {
            token = Some(*enforced);
        }
    }

    match token.and_then(Codec::from_token) {
        Some(codec) => Decision::Compress(codec),
        None => Decision::Bypass(BypassReason::NotAcceptable),
    }
}

/// The default filter: admits responses with a compressible `Content-Type`.
pub fn should_compress(_request: &RequestHead, response: &ResponseHead<'_>) -> bool {
    is_compressible(response.header(header::CONTENT_TYPE))
}

/// Returns false when `Cache-Control` carries `no-transform`.
fn should_transform(headers: &HeaderMap) -> bool {
    !headers
        .get_all(header::CACHE_CONTROL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| {
            v.split(',')
                .any(|directive| directive.trim().eq_ignore_ascii_case("no-transform"))
        })
}

/// Checks if the declared or estimated length is below the threshold.
///
/// A declared `Content-Length` always wins over the estimate. A length that
/// cannot be parsed is never below.
fn is_below_threshold(headers: &HeaderMap, length: Option<u64>, threshold: u64) -> bool {
    match headers.get(header::CONTENT_LENGTH) {
        Some(value) => value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .is_some_and(|len| len < threshold),
        None => length.is_some_and(|len| len < threshold),
    }
}

/// Checks if a non-identity Content-Encoding is already present.
fn has_content_encoding(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_ENCODING)
        .is_some_and(|v| !v.to_str().is_ok_and(|v| v.trim().eq_ignore_ascii_case("identity")))
}

/// Adds Accept-Encoding to the Vary header if not already present.
pub(crate) fn add_vary_accept_encoding(headers: &mut HeaderMap) {
    // Check all Vary headers to see if Accept-Encoding is already present
    for vary in headers.get_all(header::VARY) {
        if let Ok(vary_str) = vary.to_str() {
            let covered = vary_str.split(',').any(|v| {
                let v = v.trim();
                v == "*" || v.eq_ignore_ascii_case("accept-encoding")
            });
            if covered {
                return;
            }
        }
    }

    headers.append(
        header::VARY,
        HeaderValue::from_static("Accept-Encoding"),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(accept_encoding: Option<&'static str>) -> RequestHead {
        let head = RequestHead::new(Method::GET);
        match accept_encoding {
            Some(value) => head.with_header(header::ACCEPT_ENCODING, HeaderValue::from_static(value)),
            None => head,
        }
    }

    fn headers<I>(pairs: I) -> HeaderMap
    where
        I: IntoIterator<Item = (&'static str, &'static str)>,
    {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.append(name, HeaderValue::from_static(value));
        }
        headers
    }

    fn run(request: &RequestHead, headers: &HeaderMap, length: Option<u64>) -> Decision {
        run_with(request, headers, length, &CompressionConfig::new())
    }

    fn run_with(
        request: &RequestHead,
        headers: &HeaderMap,
        length: Option<u64>,
        config: &CompressionConfig,
    ) -> Decision {
        let response = ResponseHead {
            status: StatusCode::OK,
            headers,
        };
        decide(request, &response, length, config)
    }

    #[test]
    fn test_compress_text_with_gzip() {
        let h = headers([("content-type", "text/plain")]);
        assert_eq!(
            run(&request(Some("gzip")), &h, None),
            Decision::Compress(Codec::Gzip)
        );
    }

    #[test]
    fn test_default_filter_rejects_uncompressible_type() {
        let h = headers([("content-type", "image/png")]);
        assert_eq!(
            run(&request(Some("gzip")), &h, None),
            Decision::Bypass(BypassReason::NotCompressible)
        );

        let h = HeaderMap::new();
        assert_eq!(
            run(&request(Some("gzip")), &h, None),
            Decision::Bypass(BypassReason::NotCompressible)
        );
    }

    #[test]
    fn test_custom_filter() {
        let config = CompressionConfig::new().filter(|req, _| req.uri.path() != "/raw");
        let h = headers([("content-type", "image/png")]);

        // A custom filter replaces the content-type check entirely
        let req = request(Some("gzip"));
        assert_eq!(
            run_with(&req, &h, None, &config),
            Decision::Compress(Codec::Gzip)
        );

        let mut req = request(Some("gzip"));
        req.uri = Uri::from_static("/raw");
        assert_eq!(
            run_with(&req, &h, None, &config),
            Decision::Bypass(BypassReason::Filtered)
        );
    }

    #[test]
    fn test_no_transform() {
        for value in [
            "no-transform",
            "public, no-transform",
            "no-transform, max-age=60",
            "private,no-transform ,max-age=0",
            "No-Transform",
        ] {
            let mut h = headers([("content-type", "text/plain"), ("content-length", "99999")]);
            h.insert(header::CACHE_CONTROL, HeaderValue::from_static(value));
            assert_eq!(
                run(&request(Some("gzip")), &h, None),
                Decision::Bypass(BypassReason::NoTransform),
                "{value}"
            );
        }
    }

    #[test]
    fn test_no_transform_requires_whole_directive() {
        let h = headers([
            ("content-type", "text/plain"),
            ("cache-control", "no-transformation"),
        ]);
        assert_eq!(
            run(&request(Some("gzip")), &h, None),
            Decision::Compress(Codec::Gzip)
        );
    }

    #[test]
    fn test_threshold_boundary() {
        let h = headers([("content-type", "text/plain"), ("content-length", "1024")]);
        assert_eq!(
            run(&request(Some("gzip")), &h, None),
            Decision::Compress(Codec::Gzip)
        );

        let h = headers([("content-type", "text/plain"), ("content-length", "1023")]);
        assert_eq!(
            run(&request(Some("gzip")), &h, None),
            Decision::Bypass(BypassReason::BelowThreshold)
        );
    }

    #[test]
    fn test_threshold_uses_estimate_without_header() {
        let h = headers([("content-type", "text/plain")]);
        assert_eq!(
            run(&request(Some("gzip")), &h, Some(10)),
            Decision::Bypass(BypassReason::BelowThreshold)
        );
        assert_eq!(
            run(&request(Some("gzip")), &h, Some(2048)),
            Decision::Compress(Codec::Gzip)
        );
    }

    #[test]
    fn test_threshold_header_wins_over_estimate() {
        let h = headers([("content-type", "text/plain"), ("content-length", "4096")]);
        assert_eq!(
            run(&request(Some("gzip")), &h, Some(10)),
            Decision::Compress(Codec::Gzip)
        );
    }

    #[test]
    fn test_unparseable_length_is_not_below() {
        let h = headers([("content-type", "text/plain"), ("content-length", "lots")]);
        assert_eq!(
            run(&request(Some("gzip")), &h, None),
            Decision::Compress(Codec::Gzip)
        );
    }

    #[test]
    fn test_configured_threshold() {
        let config = CompressionConfig::new().threshold(0);
        let h = headers([("content-type", "text/plain"), ("content-length", "1")]);
        assert_eq!(
            run_with(&request(Some("gzip")), &h, None, &config),
            Decision::Compress(Codec::Gzip)
        );
    }

    #[test]
    fn test_already_encoded() {
        let h = headers([("content-type", "text/plain"), ("content-encoding", "gzip")]);
        assert_eq!(
            run(&request(Some("gzip")), &h, None),
            Decision::Bypass(BypassReason::AlreadyEncoded)
        );

        let h = headers([("content-type", "text/plain"), ("content-encoding", "identity")]);
        assert_eq!(
            run(&request(Some("gzip")), &h, None),
            Decision::Compress(Codec::Gzip)
        );
    }

    #[test]
    fn test_head_request() {
        let h = headers([("content-type", "text/plain")]);
        let req = RequestHead::new(Method::HEAD)
            .with_header(header::ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
        assert_eq!(
            run(&req, &h, None),
            Decision::Bypass(BypassReason::HeadRequest)
        );
    }

    #[test]
    fn test_negotiation() {
        let h = headers([("content-type", "text/plain")]);
        assert_eq!(
            run(&request(Some("br;q=0.1, gzip;q=0.9")), &h, None),
            Decision::Compress(Codec::Gzip)
        );
        assert_eq!(
            run(&request(Some("*")), &h, None),
            Decision::Compress(Codec::Brotli)
        );
        assert_eq!(
            run(&request(Some("deflate")), &h, None),
            Decision::Compress(Codec::Deflate)
        );
        assert_eq!(
            run(&request(Some("identity")), &h, None),
            Decision::Bypass(BypassReason::NotAcceptable)
        );
        assert_eq!(
            run(&request(Some("bogus")), &h, None),
            Decision::Bypass(BypassReason::NotAcceptable)
        );
    }

    #[test]
    fn test_multiple_accept_encoding_headers_are_joined() {
        let h = headers([("content-type", "text/plain")]);
        let req = request(Some("deflate;q=0.5"))
            .with_header(header::ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
        assert_eq!(run(&req, &h, None), Decision::Compress(Codec::Gzip));
    }

    #[test]
    fn test_enforce_encoding_without_header() {
        let h = headers([("content-type", "text/plain")]);
        assert_eq!(
            run(&request(None), &h, None),
            Decision::Bypass(BypassReason::NotAcceptable)
        );

        let config = CompressionConfig::new().enforce_encoding("gzip");
        assert_eq!(
            run_with(&request(None), &h, None, &config),
            Decision::Compress(Codec::Gzip)
        );

        // Only applies when the header is missing entirely
        assert_eq!(
            run_with(&request(Some("identity")), &h, None, &config),
            Decision::Bypass(BypassReason::NotAcceptable)
        );

        // Unsupported tokens are ignored
        let config = CompressionConfig::new().enforce_encoding("zstd");
        assert_eq!(
            run_with(&request(None), &h, None, &config),
            Decision::Bypass(BypassReason::NotAcceptable)
        );
    }

    #[test]
    fn test_varies() {
        assert!(Decision::Compress(Codec::Gzip).varies());
        assert!(Decision::Bypass(BypassReason::BelowThreshold).varies());
        assert!(Decision::Bypass(BypassReason::NotAcceptable).varies());
        assert!(!Decision::Bypass(BypassReason::Filtered).varies());
        assert!(!Decision::Bypass(BypassReason::NoTransform).varies());
        assert!(!Decision::Bypass(BypassReason::NotCompressible).varies());
    }

    #[test]
    fn test_vary_header_added() {
        let mut h = HeaderMap::new();
        add_vary_accept_encoding(&mut h);
        assert_eq!(h.get(header::VARY).unwrap(), "Accept-Encoding");
    }

    #[test]
    fn test_vary_header_appended() {
        let mut h = headers([("vary", "origin")]);
        add_vary_accept_encoding(&mut h);

        let vary_values: Vec<_> = h
            .get_all(header::VARY)
            .iter()
            .map(|v| v.to_str().unwrap())
            .collect();
        assert_eq!(vary_values, vec!["origin", "Accept-Encoding"]);
    }

    #[test]
    fn test_vary_header_not_duplicated() {
        let mut h = headers([("vary", "Origin, accept-encoding")]);
        add_vary_accept_encoding(&mut h);
        assert_eq!(h.get_all(header::VARY).iter().count(), 1);

        let mut h = headers([("vary", "*")]);
        add_vary_accept_encoding(&mut h);
        assert_eq!(h.get(header::VARY).unwrap(), "*");
    }

    #[test]
    fn test_bypass_reason_display() {
        assert_eq!(BypassReason::BelowThreshold.to_string(), "size below threshold");
        assert_eq!(BypassReason::HeadRequest.to_string(), "HEAD request");
    }
}
