//! Per-request context handed to middleware and handlers.
//!
//! A [`Request`] is built by the router for exactly one inbound call and
//! dropped once the response is written. Nothing in it is shared with other
//! requests, so none of its accessors lock anything except the response
//! header set, which the router reads back after the endpoint returns.

use std::any::Any;
use std::collections::HashMap;
use std::mem;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::{Bytes, BytesMut};
use futures_util::stream::{self, BoxStream, StreamExt};
use http::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use http::request::Parts;
use http::Uri;
use http_body_util::BodyExt;
use http_body_util::combinators::UnsyncBoxBody;
use multer::Multipart;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::{ApiError, BoxError, Error};
use crate::json;
use crate::method::Method;

/// Type-erased request body as received from the transport.
pub type RawBody = UnsyncBoxBody<Bytes, BoxError>;

/// An inbound call that matched a route.
pub struct Request {
    method: Method,
    route: Arc<str>,
    params: Vec<(String, String)>,
    query: Vec<(String, String)>,
    uri: Uri,
    headers: HeaderMap,
    body: BodyState,
    values: HashMap<String, Box<dyn Any + Send + Sync>>,
    files: Option<Vec<FormFile>>,
    response_headers: ResponseHeaders,
}

enum BodyState {
    Pending(RawBody),
    Buffered(Bytes),
    /// Handed to the multipart parser without buffering.
    Streamed,
    Failed(String),
}

impl Request {
    pub(crate) fn new(
        method: Method,
        route: Arc<str>,
        params: Vec<(String, String)>,
        parts: Parts,
        body: RawBody,
        response_headers: ResponseHeaders,
    ) -> Self {
        let query = parts
            .uri
            .query()
            .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default();
        Self {
            method,
            route,
            params,
            query,
            uri: parts.uri,
            headers: parts.headers,
            body: BodyState::Pending(body),
            values: HashMap::new(),
            files: None,
            response_headers,
        }
    }

    pub fn method(&self) -> Method { self.method }

    /// The registered pattern that matched, e.g. `/users/:id`.
    pub fn route(&self) -> &str { &self.route }

    pub fn uri(&self) -> &Uri { &self.uri }
    pub fn headers(&self) -> &HeaderMap { &self.headers }

    /// Matched path parameters in pattern order.
    pub fn params(&self) -> &[(String, String)] { &self.params }

    /// Returns a named path parameter, or `""` if the route has none by that name.
    ///
    /// For a route `/users/:id`, `req.param("id")` on `/users/42` returns `"42"`.
    pub fn param(&self, name: &str) -> &str {
        lookup(&self.params, name)
    }

    /// Returns the first value of a query parameter, or `""` if absent.
    pub fn query(&self, name: &str) -> &str {
        lookup(&self.query, name)
    }

    /// Inbound header value. Case-insensitive; `None` for missing or non-UTF-8 values.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }

    /// Sets a header on the eventual response, replacing any previous value.
    pub fn set_response_header(&self, name: &str, value: &str) -> Result<(), Error> {
        let name = HeaderName::from_bytes(name.as_bytes())?;
        let value = HeaderValue::from_str(value)?;
        self.response_headers.insert(name, value);
        Ok(())
    }

    /// Stores a value for later middleware or the handler.
    pub fn set<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.values.insert(key.into(), Box::new(value));
    }

    /// Reads a value stored with [`set`](Request::set). `None` when the key is
    /// missing or holds a different type.
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.values.get(key)?.downcast_ref()
    }

    /// The full request body. The transport stream is read on the first call
    /// and buffered; later calls return the same bytes. Not available once
    /// [`form_file`](Request::form_file) has streamed the body.
    pub async fn body(&mut self) -> Result<Bytes, Error> {
        let state = mem::replace(&mut self.body, BodyState::Buffered(Bytes::new()));
        self.body = match state {
            BodyState::Pending(raw) => match raw.collect().await {
                Ok(collected) => BodyState::Buffered(collected.to_bytes()),
                Err(e) => BodyState::Failed(e.to_string()),
            },
            done => done,
        };
        match &self.body {
            BodyState::Buffered(bytes) => Ok(bytes.clone()),
            BodyState::Failed(reason) => {
                Err(client_error(format!("failed to read request body: {reason}")))
            }
            BodyState::Streamed => Err(Error::msg("request body was consumed by multipart parsing")),
            BodyState::Pending(_) => Err(Error::msg("request body was not buffered")),
        }
    }

    /// Decodes the JSON body into `T`.
    ///
    /// Malformed or empty input fails with a `400 bad_request` whose message
    /// names the byte offset and the parse failure.
    pub async fn bind_body<T: DeserializeOwned>(&mut self) -> Result<T, Error> {
        let body = self.body().await?;
        json::decode(&body).map_err(|e| {
            warn!(route = %self.route, error = %e, "rejected json body");
            Error::from(e)
        })
    }

    /// Returns the file part named `name` from a `multipart/form-data` body.
    ///
    /// The whole form is parsed on the first call, straight from the
    /// transport stream. Up to `max_memory` bytes of file content stay in
    /// memory; any part that would go past that is written to a temporary
    /// file instead. Later calls look up the already parsed form.
    ///
    /// Fails with `400 bad_request` when the body is not valid multipart or
    /// carries no file part with that name.
    pub async fn form_file(&mut self, name: &str, max_memory: u64) -> Result<FormFile, Error> {
        if self.files.is_none() {
            self.files = Some(self.parse_multipart(max_memory).await?);
        }
        self.files
            .iter()
            .flatten()
            .find(|file| file.field_name == name)
            .cloned()
            .ok_or_else(|| client_error(format!("no such file in multipart form: {name}")))
    }

    async fn parse_multipart(&mut self, max_memory: u64) -> Result<Vec<FormFile>, Error> {
        let content_type = self.header(CONTENT_TYPE.as_str()).unwrap_or_default();
        let boundary = multer::parse_boundary(content_type).map_err(invalid_form)?;

        let stream: BoxStream<'static, Result<Bytes, BoxError>> =
            match mem::replace(&mut self.body, BodyState::Streamed) {
                BodyState::Pending(raw) => raw.into_data_stream().boxed(),
                BodyState::Buffered(bytes) => {
                    self.body = BodyState::Buffered(bytes.clone());
                    stream::once(async move { Ok(bytes) }).boxed()
                }
                BodyState::Failed(reason) => {
                    let err = client_error(format!("failed to read request body: {reason}"));
                    self.body = BodyState::Failed(reason);
                    return Err(err);
                }
                BodyState::Streamed => {
                    return Err(client_error("request body was already consumed".to_owned()));
                }
            };

        let mut multipart = Multipart::new(stream, boundary);
        let mut budget = max_memory;
        let mut files = Vec::new();

        while let Some(mut field) = multipart.next_field().await.map_err(invalid_form)? {
            let (Some(field_name), Some(file_name)) =
                (field.name().map(str::to_owned), field.file_name().map(str::to_owned))
            else {
                continue;
            };
            let content_type = field.content_type().map(ToString::to_string);

            let mut buffer = BytesMut::new();
            let mut spill: Option<(NamedTempFile, tokio::fs::File)> = None;
            let mut size = 0u64;

            while let Some(chunk) = field.chunk().await.map_err(invalid_form)? {
                size += chunk.len() as u64;
                if spill.is_none() && size > budget {
                    let temp = NamedTempFile::new()?;
                    let mut out = tokio::fs::File::from_std(temp.as_file().try_clone()?);
                    out.write_all(&buffer).await?;
                    buffer.clear();
                    spill = Some((temp, out));
                }
                match spill.as_mut() {
                    Some((_, out)) => out.write_all(&chunk).await?,
                    None => buffer.extend_from_slice(&chunk),
                }
            }

            let data = match spill {
                Some((temp, mut out)) => {
                    out.flush().await?;
                    debug!(
                        field = %field_name,
                        size,
                        path = %temp.path().display(),
                        "multipart file spilled to disk"
                    );
                    FileData::Disk(Arc::new(temp))
                }
                None => {
                    budget -= size;
                    FileData::Memory(buffer.freeze())
                }
            };
            files.push(FormFile { field_name, file_name, content_type, size, data });
        }

        Ok(files)
    }
}

fn lookup<'a>(pairs: &'a [(String, String)], name: &str) -> &'a str {
    pairs
        .iter()
        .find(|(k, _)| k == name)
        .map_or("", |(_, v)| v.as_str())
}

fn invalid_form(e: multer::Error) -> Error {
    client_error(format!("invalid multipart form: {e}"))
}

fn client_error(message: String) -> Error {
    warn!(error = %message, "rejected request input");
    ApiError::bad_request(message).into()
}

// ── FormFile ──────────────────────────────────────────────────────────────────

/// A file part extracted by [`Request::form_file`].
///
/// Small parts are held in memory. Parts that did not fit the memory budget
/// live in a temporary file, removed once the last clone is dropped.
#[derive(Debug, Clone)]
pub struct FormFile {
    field_name: String,
    file_name: String,
    content_type: Option<String>,
    size: u64,
    data: FileData,
}

#[derive(Debug, Clone)]
enum FileData {
    Memory(Bytes),
    Disk(Arc<NamedTempFile>),
}

impl FormFile {
    pub fn field_name(&self) -> &str { &self.field_name }

    /// The client-supplied file name.
    pub fn file_name(&self) -> &str { &self.file_name }

    pub fn content_type(&self) -> Option<&str> { self.content_type.as_deref() }
    pub fn size(&self) -> u64 { self.size }

    pub fn is_in_memory(&self) -> bool {
        matches!(self.data, FileData::Memory(_))
    }

    /// Location of the temporary file backing a spilled part.
    pub fn path(&self) -> Option<&Path> {
        match &self.data {
            FileData::Memory(_) => None,
            FileData::Disk(temp) => Some(temp.path()),
        }
    }

    /// The file content, read back from disk for spilled parts.
    pub async fn bytes(&self) -> Result<Bytes, Error> {
        match &self.data {
            FileData::Memory(bytes) => Ok(bytes.clone()),
            FileData::Disk(temp) => Ok(Bytes::from(tokio::fs::read(temp.path()).await?)),
        }
    }
}

// ── Response headers ──────────────────────────────────────────────────────────

/// Headers set by the endpoint, read back by the router after it returns.
#[derive(Clone, Default)]
pub(crate) struct ResponseHeaders(Arc<Mutex<HeaderMap>>);

impl ResponseHeaders {
    fn insert(&self, name: HeaderName, value: HeaderValue) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).insert(name, value);
    }

    pub(crate) fn take(&self) -> HeaderMap {
        mem::take(&mut *self.0.lock().unwrap_or_else(PoisonError::into_inner))
    }
}
