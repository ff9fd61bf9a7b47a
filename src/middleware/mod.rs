//! Middleware layer.
//!
//! A middleware is an endpoint-to-endpoint transform: it receives the next
//! [`Endpoint`] and returns one that wraps it. Each scope (the router itself
//! or a [`Group`](crate::Group)) keeps an ordered stack of them; when a route
//! is registered the stack is folded around its handler once, and the
//! result is what the route table stores.
//!
//! The first middleware registered in a scope's lineage is the outermost: it
//! sees the request first and the outcome last.
//!
//! ```rust
//! use jsonrest::{Endpoint, Request, Router, middleware};
//!
//! let mut router = Router::new();
//! router.wrap(middleware::trace());
//! router.wrap(middleware::from_fn(|mut req: Request, next: Endpoint| async move {
//!     let tenant = req.header("x-tenant").unwrap_or("public").to_owned();
//!     req.set("tenant", tenant);
//!     next.call(req).await
//! }));
//! ```

use std::future::Future;
use std::sync::Arc;

use crate::handler::{Endpoint, Outcome};
use crate::request::Request;

mod trace;

pub use trace::trace;

/// A stored middleware transform.
pub type Middleware = Arc<dyn Fn(Endpoint) -> Endpoint + Send + Sync + 'static>;

/// The middleware stack of one registration scope.
///
/// Cloning takes a snapshot: pushes onto the clone never reach the original.
#[derive(Clone, Default)]
pub(crate) struct Chain {
    layers: Vec<Middleware>,
}

impl Chain {
    pub(crate) fn push(&mut self, middleware: Middleware) {
        self.layers.push(middleware);
    }

    pub(crate) fn len(&self) -> usize {
        self.layers.len()
    }

    /// Folds the stack around `handler`, last-registered innermost.
    pub(crate) fn compose(&self, handler: Endpoint) -> Endpoint {
        self.layers.iter().rev().fold(handler, |inner, layer| layer(inner))
    }
}

/// Adapts an async `(req, next)` function into a middleware.
///
/// `next` is the rest of the chain; call it to continue, or return without
/// calling it to short-circuit.
pub fn from_fn<F, Fut>(f: F) -> impl Fn(Endpoint) -> Endpoint + Send + Sync + 'static
where
    F: Fn(Request, Endpoint) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Outcome> + Send + 'static,
{
    let f = Arc::new(f);
    move |next: Endpoint| {
        let f = Arc::clone(&f);
        Endpoint::from_fn(move |req| f(req, next.clone()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn tag(log: &Arc<Mutex<Vec<String>>>, name: &'static str) -> Middleware {
        let log = Arc::clone(log);
        Arc::new(from_fn(move |req: Request, next: Endpoint| {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push(format!("{name} in"));
                let outcome = next.call(req).await;
                log.lock().unwrap().push(format!("{name} out"));
                outcome
            }
        }))
    }

    fn request() -> Request {
        use http_body_util::{BodyExt, Full};

        let (parts, body) = http::Request::new(Full::new(bytes::Bytes::new())).into_parts();
        Request::new(
            crate::Method::Get,
            Arc::from("/"),
            Vec::new(),
            parts,
            body.map_err(|e| -> crate::BoxError { match e {} }).boxed_unsync(),
            crate::request::ResponseHeaders::default(),
        )
    }

    async fn run(chain: &Chain, log: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
        let handler = {
            let log = Arc::clone(log);
            Endpoint::from_fn(move |_req| {
                log.lock().unwrap().push("handler".to_owned());
                async { Ok(serde_json::Value::Null) }
            })
        };
        chain.compose(handler).call(request()).await.unwrap();
        std::mem::take(&mut *log.lock().unwrap())
    }

    #[tokio::test]
    async fn snapshot_is_independent() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut parent = Chain::default();
        parent.push(tag(&log, "a"));

        let mut child = parent.clone();
        child.push(tag(&log, "b"));
        parent.push(tag(&log, "c"));

        assert_eq!(
            run(&parent, &log).await,
            ["a in", "c in", "handler", "c out", "a out"]
        );
        assert_eq!(
            run(&child, &log).await,
            ["a in", "b in", "handler", "b out", "a out"]
        );
    }

    #[tokio::test]
    async fn empty_chain_calls_handler_directly() {
        let log = Arc::new(Mutex::new(Vec::new()));
        assert_eq!(run(&Chain::default(), &log).await, ["handler"]);
    }
}
