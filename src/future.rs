use crate::body::CompressionBody;
use crate::buffer::BufferedSink;
use crate::config::CompressionConfig;
use crate::decision::RequestHead;
use crate::proxy::CompressionSink;
use crate::sink::ResponseSink;
use http::{Response, header};
use http_body::Body;
use pin_project_lite::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::debug;

pin_project! {
    /// Future for compression service responses.
    pub struct ResponseFuture<F> {
        #[pin]
        inner: F,
        request: Option<RequestHead>,
        config: Arc<CompressionConfig>,
    }
}

impl<F> ResponseFuture<F> {
    pub(crate) fn new(inner: F, request: RequestHead, config: Arc<CompressionConfig>) -> Self {
        Self {
            inner,
            request: Some(request),
            config,
        }
    }
}

impl<F, B, E> Future for ResponseFuture<F>
where
    F: Future<Output = Result<Response<B>, E>>,
    B: Body,
{
    type Output = Result<Response<CompressionBody<B>>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        match this.inner.poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Ready(Ok(response)) => {
                let request = this.request.take().unwrap_or_default();
                let response = wrap_response(response, request, this.config.clone());
                Poll::Ready(Ok(response))
            }
        }
    }
}

/// Routes the response body through a [`CompressionSink`].
///
/// The decision runs here, before the head leaves, so the returned headers
/// already carry any `Content-Encoding` and `Vary` changes.
fn wrap_response<B: Body>(
    response: Response<B>,
    request: RequestHead,
    config: Arc<CompressionConfig>,
) -> Response<CompressionBody<B>> {
    let (mut parts, body) = response.into_parts();

    let always_flush = parts
        .headers
        .get("x-accel-buffering")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("no"))
        || is_streaming_content_type(&parts.headers);

    let headers = std::mem::take(&mut parts.headers);
    let sink = BufferedSink::new(parts.status, headers, config.options().high_water_mark);
    let mut sink = CompressionSink::new(sink, request, config);
    if let Some(length) = body.size_hint().exact() {
        sink.hint_length(length);
    }
    if let Err(err) = sink.write_head() {
        debug!(?err, "failed to send response head");
    }

    parts.headers = sink.headers().clone();
    Response::from_parts(parts, CompressionBody::new(body, sink, always_flush))
}

/// Checks if the content type requires always flushing (e.g., streaming).
fn is_streaming_content_type(headers: &header::HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| {
            ct.starts_with("text/event-stream") || ct.starts_with("application/grpc-web")
        })
}
