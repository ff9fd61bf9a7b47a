//! Outgoing JSON responses.
//!
//! Every response this crate writes is JSON. Handlers never build one
//! directly: they return a value or an error and the router serializes it.
//! The helpers here are public for not-found overrides, which own the raw
//! response.

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use http::StatusCode;
use http_body_util::Full;
use serde::Serialize;
use tracing::error;

/// The response type produced by [`Router::handle`](crate::Router::handle).
pub type HttpResponse = http::Response<Full<Bytes>>;

pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Serializes `value` into a JSON response with the given status.
///
/// A value that fails to serialize yields a bare `500` with the generic
/// error envelope.
pub fn json<T: Serialize + ?Sized>(status: StatusCode, value: &T) -> HttpResponse {
    match serde_json::to_vec(value) {
        Ok(body) => from_parts(status, body, HeaderMap::new()),
        Err(e) => {
            error!("failed to serialize response body: {e}");
            from_parts(
                StatusCode::INTERNAL_SERVER_ERROR,
                br#"{"error":{"code":"unknown_error","message":"an unknown error occurred"}}"#.to_vec(),
                HeaderMap::new(),
            )
        }
    }
}

/// Assembles the final response. Headers set by the handler win over the
/// default JSON content type.
pub(crate) fn from_parts(status: StatusCode, body: Vec<u8>, headers: HeaderMap) -> HttpResponse {
    let mut response = http::Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    if !response.headers().contains_key(CONTENT_TYPE) {
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
    }
    response
}
