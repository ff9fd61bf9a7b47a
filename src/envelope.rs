//! Error translation.
//!
//! Every failure, returned or caught, leaves through [`translate`]. The
//! resolution order is fixed:
//!
//! 1. a custom body supplied by the error, verbatim
//! 2. a status-coded error, as `{"error":{"code","message"}}`
//! 3. anything else, as the generic 500 `unknown_error` envelope
//!
//! Step 3 never leaks the error text unless the router was built with
//! [`dump_internal_errors`](crate::RouterBuilder::dump_internal_errors).

use http::StatusCode;
use serde::Serialize;
use tracing::{debug, error};

use crate::error::{Error, Kind, UNKNOWN_CODE, UNKNOWN_MESSAGE};

/// Status and serialized body of a translated error.
#[derive(Debug)]
pub(crate) struct Translated {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

#[derive(Serialize)]
struct Envelope<'a> {
    error: ErrorBody<'a>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "no_details")]
    details: &'a [String],
}

fn no_details(details: &&[String]) -> bool {
    details.is_empty()
}

pub(crate) fn translate(err: &Error, dump_internal: bool) -> Translated {
    if let Kind::Response(caps) = err.kind() {
        if let Some(body) = caps.custom_body() {
            let status = caps.status_code().unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            debug!(status = status.as_u16(), error = %err, "custom error body");
            return Translated { status, body: to_bytes(&body) };
        }
        if let Some(status) = caps.status_code() {
            debug!(status = status.as_u16(), error = %err, "application error");
            let code = caps.error_code();
            let message = caps.message();
            let envelope = Envelope {
                error: ErrorBody { code: &code, message: &message, details: caps.details() },
            };
            return Translated { status, body: to_bytes(&envelope) };
        }
    }

    error!(error = %err, panic = err.is_panic(), "unhandled error");
    let details = if dump_internal { dump_lines(err) } else { Vec::new() };
    let envelope = Envelope {
        error: ErrorBody { code: UNKNOWN_CODE, message: UNKNOWN_MESSAGE, details: &details },
    };
    Translated { status: StatusCode::INTERNAL_SERVER_ERROR, body: to_bytes(&envelope) }
}

/// Formats the error for local debugging: tabs become two spaces, one entry
/// per line.
fn dump_lines(err: &Error) -> Vec<String> {
    err.dump().replace('\t', "  ").split('\n').map(str::to_owned).collect()
}

fn to_bytes<T: Serialize>(value: &T) -> Vec<u8> {
    serde_json::to_vec(value).unwrap_or_else(|e| {
        error!("failed to serialize error body: {e}");
        FALLBACK_BODY.to_vec()
    })
}

const FALLBACK_BODY: &[u8] =
    br#"{"error":{"code":"unknown_error","message":"an unknown error occurred"}}"#;
