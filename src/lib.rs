//! # jsonrest
//!
//! Request dispatch and error normalization for JSON APIs.
//!
//! Handlers are plain async functions from a [`Request`] to
//! `Result<impl Serialize, Error>`. jsonrest owns everything around them:
//!
//! - **Routing** — `:name` parameters and `*name` catch-alls, literal
//!   segments always win over parameters, via [`matchit`]
//! - **Middleware** — endpoint-to-endpoint transforms, composed once per
//!   route at registration, scoped by [`Group`]
//! - **Request context** — params, query, headers, a typed value bag,
//!   buffered JSON and multipart body access
//! - **Errors** — returned errors and panics alike become one canonical
//!   envelope: `{"error":{"code","message","details"?}}`
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use jsonrest::{ApiError, Error, Request, Router, Server};
//! use serde::Deserialize;
//! use serde_json::{Value, json};
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut app = Router::builder().dump_internal_errors(false).build();
//!     app.wrap(jsonrest::middleware::trace());
//!     app.get("/users/:id", get_user).post("/users", create_user);
//!
//!     Server::bind("0.0.0.0:3000").serve(app).await.unwrap();
//! }
//!
//! async fn get_user(req: Request) -> Result<Value, Error> {
//!     match req.param("id") {
//!         "42" => Ok(json!({ "id": 42, "name": "alice" })),
//!         _ => Err(ApiError::not_found("user not found").into()),
//!     }
//! }
//!
//! #[derive(Deserialize)]
//! struct NewUser {
//!     name: String,
//! }
//!
//! async fn create_user(mut req: Request) -> Result<Value, Error> {
//!     let user: NewUser = req.bind_body().await?;
//!     req.set_response_header("location", "/users/99")?;
//!     Ok(json!({ "id": 99, "name": user.name }))
//! }
//! ```

mod envelope;
mod error;
mod handler;
mod json;
mod method;
mod request;
mod router;
mod server;
mod tree;

pub mod middleware;
pub mod response;

pub use error::{ApiError, BoxError, Error, ResponseError, ServeError};
pub use handler::{BoxFuture, Endpoint, Handler, Outcome};
pub use method::{Method, ParseMethodError};
pub use request::{FormFile, RawBody, Request};
pub use router::{Group, NotFoundHandler, Router, RouterBuilder};
pub use server::Server;
