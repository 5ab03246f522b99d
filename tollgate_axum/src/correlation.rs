//! Correlation ids tying a request to its logs and response

use http::{HeaderName, HeaderValue, Request};
use tower_http::{
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::{HttpMakeClassifier, MakeSpan, TraceLayer},
};
use uuid::Uuid;

/// Header carrying the correlation id
pub const CORRELATION_ID: HeaderName = HeaderName::from_static("x-correlation-id");

/// Header consulted when no correlation id is supplied
pub const REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Assigns a correlation id to requests that arrive without one
///
/// An `x-request-id` header is reused when present; otherwise a random
/// UUID is generated.
#[derive(Clone, Copy, Debug, Default)]
pub struct MakeCorrelationId;

impl MakeRequestId for MakeCorrelationId {
    fn make_request_id<B>(&mut self, request: &Request<B>) -> Option<RequestId> {
        let id = match request.headers().get(REQUEST_ID) {
            Some(value) if !value.is_empty() => value.clone(),
            _ => HeaderValue::try_from(Uuid::new_v4().to_string()).ok()?,
        };

        Some(RequestId::new(id))
    }
}

/// Opens a span per request that records its correlation id
#[derive(Clone, Copy, Debug, Default)]
pub struct CorrelatedSpan;

impl<B> MakeSpan<B> for CorrelatedSpan {
    fn make_span(&mut self, request: &Request<B>) -> tracing::Span {
        let correlation_id = request
            .headers()
            .get(CORRELATION_ID)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();

        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            correlation_id
        )
    }
}

/// Sets the correlation id on requests that lack one
pub fn set_layer() -> SetRequestIdLayer<MakeCorrelationId> {
    SetRequestIdLayer::new(CORRELATION_ID, MakeCorrelationId)
}

/// Copies the correlation id from the request onto the response
pub fn propagate_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::new(CORRELATION_ID)
}

/// Traces each request inside a span carrying its correlation id
pub fn trace_layer() -> TraceLayer<HttpMakeClassifier, CorrelatedSpan> {
    TraceLayer::new_for_http().make_span_with(CorrelatedSpan)
}
