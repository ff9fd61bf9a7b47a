//! Router facade: registration scopes and the dispatch entrypoint.
//!
//! Setup happens through `&mut Router`; serving only needs `&Router`. Once
//! the router is shared (behind an `Arc` in [`Server`](crate::Server), or
//! any other shared reference) nothing can register routes or middleware
//! any more, so the route table and every composed chain are read-only
//! while traffic flows.

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::body::Body;
use tracing::debug;

use crate::envelope;
use crate::error::{ApiError, BoxError, Error};
use crate::handler::{BoxFuture, Endpoint, Handler, invoke};
use crate::method::Method;
use crate::middleware::Chain;
use crate::request::{RawBody, Request, ResponseHeaders};
use crate::response::{self, HttpResponse};
use crate::tree::RouteTable;

/// Override for unmatched requests; owns the raw response.
pub type NotFoundHandler =
    Arc<dyn Fn(http::Request<RawBody>) -> BoxFuture<HttpResponse> + Send + Sync + 'static>;

/// The application router.
///
/// ```rust
/// use jsonrest::{ApiError, Error, Request, Router};
/// use serde_json::{Value, json};
///
/// let mut router = Router::new();
/// router
///     .get("/users/:id", get_user)
///     .group(|admin| {
///         admin.wrap(jsonrest::middleware::trace());
///         admin.delete("/users/:id", delete_user);
///     });
///
/// async fn get_user(req: Request) -> Result<Value, Error> {
///     Ok(json!({ "id": req.param("id") }))
/// }
///
/// async fn delete_user(_req: Request) -> Result<(), Error> {
///     Err(ApiError::unauthorized("admins only").into())
/// }
/// ```
pub struct Router {
    table: RouteTable,
    chain: Chain,
    not_found: Option<NotFoundHandler>,
    dump_internal_errors: bool,
}

/// Construction-time settings for a [`Router`].
#[derive(Default)]
pub struct RouterBuilder {
    not_found: Option<NotFoundHandler>,
    dump_internal_errors: bool,
}

impl RouterBuilder {
    /// Replaces the default `404 not_found` envelope for unmatched requests.
    pub fn not_found<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(http::Request<RawBody>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HttpResponse> + Send + 'static,
    {
        self.not_found = Some(Arc::new(
            move |req: http::Request<RawBody>| -> BoxFuture<HttpResponse> { Box::pin(handler(req)) },
        ));
        self
    }

    /// Adds the formatted text of unknown errors to the 500 envelope as
    /// `details`. For local debugging only; off by default.
    pub fn dump_internal_errors(mut self, enabled: bool) -> Self {
        self.dump_internal_errors = enabled;
        self
    }

    pub fn build(self) -> Router {
        Router {
            table: RouteTable::default(),
            chain: Chain::default(),
            not_found: self.not_found,
            dump_internal_errors: self.dump_internal_errors,
        }
    }
}

impl Router {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> RouterBuilder {
        RouterBuilder::default()
    }

    fn scope(&mut self) -> Group<'_> {
        Group { table: &mut self.table, chain: &mut self.chain }
    }

    /// Appends a middleware to the root scope. It applies to routes and
    /// groups registered after this call.
    pub fn wrap<M>(&mut self, middleware: M) -> &mut Self
    where
        M: Fn(Endpoint) -> Endpoint + Send + Sync + 'static,
    {
        self.scope().wrap(middleware);
        self
    }

    /// Opens a child scope with a snapshot of the current middleware stack.
    pub fn group(&mut self, f: impl FnOnce(&mut Group<'_>)) -> &mut Self {
        self.scope().group(f);
        self
    }

    pub fn on(&mut self, method: Method, pattern: &str, handler: impl Handler) -> &mut Self {
        self.scope().on(method, pattern, handler);
        self
    }

    pub fn get(&mut self, pattern: &str, handler: impl Handler) -> &mut Self {
        self.on(Method::Get, pattern, handler)
    }

    pub fn head(&mut self, pattern: &str, handler: impl Handler) -> &mut Self {
        self.on(Method::Head, pattern, handler)
    }

    pub fn post(&mut self, pattern: &str, handler: impl Handler) -> &mut Self {
        self.on(Method::Post, pattern, handler)
    }

    pub fn put(&mut self, pattern: &str, handler: impl Handler) -> &mut Self {
        self.on(Method::Put, pattern, handler)
    }

    pub fn patch(&mut self, pattern: &str, handler: impl Handler) -> &mut Self {
        self.on(Method::Patch, pattern, handler)
    }

    pub fn delete(&mut self, pattern: &str, handler: impl Handler) -> &mut Self {
        self.on(Method::Delete, pattern, handler)
    }

    /// Bulk registration from `"METHOD /path"` keys. See [`Group::routes`].
    pub fn routes<I, K, H>(&mut self, map: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, H)>,
        K: AsRef<str>,
        H: Handler,
    {
        self.scope().routes(map);
        self
    }

    /// Dispatches one request: route lookup, guarded endpoint invocation and
    /// JSON serialization of the value or the translated error.
    pub async fn handle<B>(&self, req: http::Request<B>) -> HttpResponse
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let req = req.map(|body| body.map_err(|e| -> BoxError { e.into() }).boxed_unsync());

        let hit = Method::try_from(req.method())
            .ok()
            .and_then(|method| Some((method, self.table.at(method, req.uri().path())?)));
        let Some((method, hit)) = hit else {
            return self.not_found(req).await;
        };

        let (parts, body) = req.into_parts();
        let response_headers = ResponseHeaders::default();
        let request = Request::new(
            method,
            Arc::clone(&hit.route.pattern),
            hit.params,
            parts,
            body,
            response_headers.clone(),
        );

        let (status, body) = match invoke(&hit.route.endpoint, request).await {
            Ok(value) => match serde_json::to_vec(&value) {
                Ok(body) => (http::StatusCode::OK, body),
                Err(e) => self.translate(&Error::from(e)),
            },
            Err(err) => self.translate(&err),
        };
        response::from_parts(status, body, response_headers.take())
    }

    fn translate(&self, err: &Error) -> (http::StatusCode, Vec<u8>) {
        let translated = envelope::translate(err, self.dump_internal_errors);
        (translated.status, translated.body)
    }

    async fn not_found(&self, req: http::Request<RawBody>) -> HttpResponse {
        debug!(method = %req.method(), path = req.uri().path(), "no route matched");
        match &self.not_found {
            Some(handler) => handler(req).await,
            None => {
                let (status, body) = self.translate(&ApiError::not_found("url not found").into());
                response::from_parts(status, body, http::HeaderMap::new())
            }
        }
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}

// ── Group ─────────────────────────────────────────────────────────────────────

/// A registration scope.
///
/// Shares the router's route table but owns its middleware stack, which
/// starts as a snapshot of the parent's at the moment the group is opened.
/// Middleware added inside the group never reaches the parent or sibling
/// groups.
pub struct Group<'r> {
    table: &'r mut RouteTable,
    chain: &'r mut Chain,
}

impl Group<'_> {
    pub fn wrap<M>(&mut self, middleware: M) -> &mut Self
    where
        M: Fn(Endpoint) -> Endpoint + Send + Sync + 'static,
    {
        self.chain.push(Arc::new(middleware));
        self
    }

    /// Opens a nested scope with a snapshot of this group's middleware stack.
    pub fn group(&mut self, f: impl FnOnce(&mut Group<'_>)) -> &mut Self {
        let mut chain = self.chain.clone();
        f(&mut Group { table: &mut *self.table, chain: &mut chain });
        self
    }

    /// Registers `handler` behind this scope's middleware stack.
    ///
    /// # Panics
    ///
    /// Panics if the pattern is malformed or conflicts with an existing route
    /// for the same method.
    pub fn on(&mut self, method: Method, pattern: &str, handler: impl Handler) -> &mut Self {
        let endpoint = self.chain.compose(handler.into_endpoint());
        if let Err(e) = self.table.insert(method, pattern, endpoint) {
            panic!("invalid route `{method} {pattern}`: {e}");
        }
        debug!(%method, pattern, layers = self.chain.len(), "route registered");
        self
    }

    pub fn get(&mut self, pattern: &str, handler: impl Handler) -> &mut Self {
        self.on(Method::Get, pattern, handler)
    }

    pub fn head(&mut self, pattern: &str, handler: impl Handler) -> &mut Self {
        self.on(Method::Head, pattern, handler)
    }

    pub fn post(&mut self, pattern: &str, handler: impl Handler) -> &mut Self {
        self.on(Method::Post, pattern, handler)
    }

    pub fn put(&mut self, pattern: &str, handler: impl Handler) -> &mut Self {
        self.on(Method::Put, pattern, handler)
    }

    pub fn patch(&mut self, pattern: &str, handler: impl Handler) -> &mut Self {
        self.on(Method::Patch, pattern, handler)
    }

    pub fn delete(&mut self, pattern: &str, handler: impl Handler) -> &mut Self {
        self.on(Method::Delete, pattern, handler)
    }

    /// Registers every `("METHOD /path", handler)` entry.
    ///
    /// Handlers of different types can share one map once erased with
    /// [`Endpoint::new`](crate::Endpoint::new).
    ///
    /// # Panics
    ///
    /// Panics on a key that is not exactly a known method and an absolute
    /// path separated by whitespace, as well as on any error [`on`](Group::on)
    /// would panic for.
    pub fn routes<I, K, H>(&mut self, map: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, H)>,
        K: AsRef<str>,
        H: Handler,
    {
        for (key, handler) in map {
            let key = key.as_ref();
            match parse_route_key(key) {
                Ok((method, pattern)) => self.on(method, pattern, handler),
                Err(reason) => panic!("invalid route key `{key}`: {reason}"),
            };
        }
        self
    }
}

fn parse_route_key(key: &str) -> Result<(Method, &str), String> {
    let mut parts = key.split_whitespace();
    let (Some(method), Some(pattern), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err("expected `METHOD /path`".to_owned());
    };
    let method = method.parse::<Method>().map_err(|e| e.to_string())?;
    if !pattern.starts_with('/') {
        return Err(format!("path `{pattern}` must start with `/`"));
    }
    Ok((method, pattern))
}
