//! Per-request tracing middleware.

use std::time::Instant;

use tracing::{info, warn};

use super::from_fn;
use crate::handler::Endpoint;
use crate::request::Request;

/// Logs one event per request with method, route pattern, outcome and
/// latency. Register it first so its latency covers every other layer.
pub fn trace() -> impl Fn(Endpoint) -> Endpoint + Send + Sync + 'static {
    from_fn(|req: Request, next: Endpoint| async move {
        let method = req.method();
        let route = req.route().to_owned();
        let started = Instant::now();

        let outcome = next.call(req).await;

        let latency_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
        match &outcome {
            Ok(_) => info!(%method, %route, latency_us, "request handled"),
            Err(e) => warn!(%method, %route, latency_us, error = %e, "request failed"),
        }
        outcome
    })
}
