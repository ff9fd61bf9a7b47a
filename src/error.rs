//! Error types.
//!
//! Handlers return [`Error`]. Anything implementing [`std::error::Error`]
//! converts into it with `?`, and is treated as an internal failure: the
//! client sees the generic `unknown_error` envelope, never the error text.
//!
//! To control what the client sees, return an [`ApiError`] or any type that
//! implements [`ResponseError`] and wrap it with [`Error::new`].

use std::any::Any;
use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt;
use std::net::AddrParseError;

use http::StatusCode;

/// Boxed, thread-safe `std` error.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

// ── Capability trait ──────────────────────────────────────────────────────────

/// Optional response capabilities an error can expose to the translator.
///
/// Every method has a default, so an implementation opts into exactly the
/// capabilities it needs:
///
/// - [`custom_body`](ResponseError::custom_body) replaces the envelope with a
///   caller-defined JSON body.
/// - [`status_code`](ResponseError::status_code) makes the error
///   client-visible as `{"error":{"code","message"}}` with that status.
///
/// An error with neither is rendered as the generic 500 `unknown_error`.
pub trait ResponseError: fmt::Debug + fmt::Display + Send + Sync + 'static {
    fn status_code(&self) -> Option<StatusCode> {
        None
    }

    /// Machine-readable code. Defaults to the snake-cased canonical reason of
    /// the status (`404` → `not_found`).
    fn error_code(&self) -> Cow<'_, str> {
        match self.status_code().and_then(|s| s.canonical_reason()) {
            Some(reason) => Cow::Owned(snake_case(reason)),
            None => Cow::Borrowed(UNKNOWN_CODE),
        }
    }

    /// Human-readable message. Defaults to the `Display` output.
    fn message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn details(&self) -> &[String] {
        &[]
    }

    fn custom_body(&self) -> Option<serde_json::Value> {
        None
    }
}

pub(crate) const UNKNOWN_CODE: &str = "unknown_error";
pub(crate) const UNKNOWN_MESSAGE: &str = "an unknown error occurred";

fn snake_case(reason: &str) -> String {
    reason
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}

// ── ApiError ──────────────────────────────────────────────────────────────────

/// An application-declared error, rendered to the client as-is.
///
/// ```rust
/// use http::StatusCode;
/// use jsonrest::ApiError;
///
/// let err = ApiError::new(StatusCode::NOT_FOUND, "customer_not_found", "customer not found");
/// assert_eq!(err.to_string(), "customer_not_found: customer not found");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    status: StatusCode,
    code: Cow<'static, str>,
    message: String,
    details: Vec<String>,
}

impl ApiError {
    pub fn new(
        status: StatusCode,
        code: impl Into<Cow<'static, str>>,
        message: impl Into<String>,
    ) -> Self {
        Self { status, code: code.into(), message: message.into(), details: Vec::new() }
    }

    /// `400 Bad Request`, code `bad_request`.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    /// `401 Unauthorized`, code `unauthorized`.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
    }

    /// `404 Not Found`, code `not_found`.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    /// `422 Unprocessable Entity`, code `unprocessable_entity`.
    pub fn unprocessable_entity(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, "unprocessable_entity", message)
    }

    /// Attaches a `details` list to the envelope.
    pub fn with_details<I, S>(mut self, details: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.details = details.into_iter().map(Into::into).collect();
        self
    }

    pub fn status(&self) -> StatusCode { self.status }
    pub fn code(&self) -> &str { &self.code }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> Option<StatusCode> {
        Some(self.status)
    }

    fn error_code(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.code)
    }

    fn message(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.message)
    }

    fn details(&self) -> &[String] {
        &self.details
    }
}

// ── Error ─────────────────────────────────────────────────────────────────────

/// The error half of an endpoint's result.
///
/// Deliberately not a `std::error::Error` itself, so that the blanket
/// `From<E: std::error::Error>` conversion can coexist with
/// `From<ApiError>`.
pub struct Error {
    kind: Kind,
}

pub(crate) enum Kind {
    /// Exposes response capabilities.
    Response(Box<dyn ResponseError>),
    /// Any foreign error; always an internal failure.
    Opaque(BoxError),
    /// A panic caught by the guarded invocation frame.
    Panic(String),
}

impl Error {
    /// Wraps an error that exposes [`ResponseError`] capabilities.
    pub fn new(err: impl ResponseError) -> Self {
        Self { kind: Kind::Response(Box::new(err)) }
    }

    /// An internal error carrying only a message.
    pub fn msg(message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self { kind: Kind::Opaque(BoxError::from(message)) }
    }

    pub fn from_boxed(err: BoxError) -> Self {
        Self { kind: Kind::Opaque(err) }
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_owned()
        };
        Self { kind: Kind::Panic(message) }
    }

    pub(crate) fn kind(&self) -> &Kind {
        &self.kind
    }

    /// The response capabilities, if this error carries any.
    pub fn as_response_error(&self) -> Option<&dyn ResponseError> {
        match &self.kind {
            Kind::Response(err) => Some(err.as_ref()),
            Kind::Opaque(_) | Kind::Panic(_) => None,
        }
    }

    /// Downcasts a foreign error converted through `?`.
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        match &self.kind {
            Kind::Opaque(err) => err.downcast_ref::<E>(),
            Kind::Response(_) | Kind::Panic(_) => None,
        }
    }

    pub fn is_panic(&self) -> bool {
        matches!(self.kind, Kind::Panic(_))
    }

    /// Full text including the `source()` chain, one cause per line.
    pub(crate) fn dump(&self) -> String {
        let mut text = self.to_string();
        if let Kind::Opaque(err) = &self.kind {
            let mut source = err.source();
            while let Some(cause) = source {
                text.push_str("\ncaused by:\t");
                text.push_str(&cause.to_string());
                source = cause.source();
            }
        }
        text
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            Kind::Response(err) => fmt::Display::fmt(err, f),
            Kind::Opaque(err) => fmt::Display::fmt(err, f),
            Kind::Panic(message) => write!(f, "handler panicked: {message}"),
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            Kind::Response(err) => f.debug_tuple("Response").field(err).finish(),
            Kind::Opaque(err) => f.debug_tuple("Opaque").field(err).finish(),
            Kind::Panic(message) => f.debug_tuple("Panic").field(message).finish(),
        }
    }
}

impl<E> From<E> for Error
where
    E: StdError + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        Self { kind: Kind::Opaque(Box::new(err)) }
    }
}

impl From<ApiError> for Error {
    fn from(err: ApiError) -> Self {
        Self::new(err)
    }
}

// ── ServeError ────────────────────────────────────────────────────────────────

/// Infrastructure failures surfaced by [`Server::serve`](crate::Server::serve).
#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("invalid socket address `{addr}`: {source}")]
    Addr {
        addr: String,
        #[source]
        source: AddrParseError,
    },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
