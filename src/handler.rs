//! Handler trait, type-erased endpoints, and guarded invocation.
//!
//! # How async handlers are stored
//!
//! The route table holds handlers of *different* types, so every handler is
//! hidden behind one trait object (`dyn ErasedHandler`) and stored as an
//! [`Endpoint`]. Middleware wraps endpoints in endpoints; the router only
//! ever sees the outermost one.
//!
//! ```text
//! async fn get_user(req: Request) -> Result<User, Error>   ← user writes this
//!        ↓ router.get("/users/:id", get_user)
//! get_user.into_endpoint()                                 ← Handler blanket impl
//!        ↓
//! Endpoint(Arc::new(FnHandler(get_user)))                  ← value serialized to JSON
//!        ↓ chain.compose(endpoint)                         ← once, at registration
//! invoke(&endpoint, req)  at request time                  ← panic guard
//! ```

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::FutureExt;
use serde::Serialize;

use crate::error::Error;
use crate::request::Request;

/// A heap-allocated, type-erased `Send` future.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// What an endpoint produces: a JSON value for the body, or an error.
pub type Outcome = Result<serde_json::Value, Error>;

/// Internal dispatch interface.
#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, req: Request) -> BoxFuture<Outcome>;
}

/// A fully type-erased, cheaply clonable endpoint.
///
/// This is the unit middleware transforms: a middleware takes the next
/// `Endpoint` and returns a new one that wraps it.
#[derive(Clone)]
pub struct Endpoint(Arc<dyn ErasedHandler + Send + Sync + 'static>);

impl Endpoint {
    /// Erases any [`Handler`].
    pub fn new(handler: impl Handler) -> Self {
        handler.into_endpoint()
    }

    /// Builds an endpoint from a closure that already yields an [`Outcome`].
    /// This is the building block for middleware.
    pub fn from_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Outcome> + Send + 'static,
    {
        Self(Arc::new(RawFn(f)))
    }

    pub fn call(&self, req: Request) -> BoxFuture<Outcome> {
        self.0.call(req)
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Endpoint")
    }
}

// ── Public Handler trait ──────────────────────────────────────────────────────

/// Implemented for every valid route handler.
///
/// Satisfied automatically by any `async fn` (or closure) with the shape
///
/// ```text
/// async fn name(req: Request) -> Result<impl Serialize, Error>
/// ```
///
/// and by [`Endpoint`] itself. Returning `Ok(None::<T>)` or `Ok(())` writes a
/// literal JSON `null`.
///
/// The trait is **sealed**: only the impls in this module can satisfy it.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_endpoint(self) -> Endpoint;
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut, T> private::Sealed for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, Error>> + Send + 'static,
    T: Serialize + Send + 'static,
{
}

impl<F, Fut, T> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, Error>> + Send + 'static,
    T: Serialize + Send + 'static,
{
    fn into_endpoint(self) -> Endpoint {
        Endpoint(Arc::new(FnHandler(self)))
    }
}

impl private::Sealed for Endpoint {}

impl Handler for Endpoint {
    fn into_endpoint(self) -> Endpoint {
        self
    }
}

// ── Concrete wrappers ─────────────────────────────────────────────────────────

/// Typed handler: serializes the success value into JSON.
struct FnHandler<F>(F);

impl<F, Fut, T> ErasedHandler for FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, Error>> + Send + 'static,
    T: Serialize + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture<Outcome> {
        let fut = (self.0)(req);
        Box::pin(async move {
            let value = fut.await?;
            Ok(serde_json::to_value(value)?)
        })
    }
}

/// Outcome-level handler used by middleware.
struct RawFn<F>(F);

impl<F, Fut> ErasedHandler for RawFn<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = Outcome> + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture<Outcome> {
        Box::pin((self.0)(req))
    }
}

// ── Guarded invocation ────────────────────────────────────────────────────────

/// Runs `endpoint` inside a panic guard.
///
/// The endpoint is first called inside the guarded future, so a panic while
/// building the future (in middleware glue, say) is caught the same as one
/// raised while polling it. Either way the panic becomes an ordinary
/// [`Error`] and follows the normal error path.
pub(crate) async fn invoke(endpoint: &Endpoint, req: Request) -> Outcome {
    let endpoint = endpoint.clone();
    AssertUnwindSafe(async move { endpoint.call(req).await })
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| Err(Error::from_panic(payload)))
}
