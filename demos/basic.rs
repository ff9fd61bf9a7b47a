//! Minimal jsonrest example — JSON endpoints, a middleware group and errors.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl http://localhost:3000/users/42
//!   curl http://localhost:3000/users/7
//!   curl -X POST http://localhost:3000/users \
//!        -H 'content-type: application/json' \
//!        -d '{"name":"alice"}'
//!   curl -X POST http://localhost:3000/users -d '{"name": |1}'
//!   curl -X DELETE http://localhost:3000/admin/users/42
//!   curl -X DELETE http://localhost:3000/admin/users/42 -H 'x-admin: yes'

use jsonrest::{ApiError, Endpoint, Error, Request, Router, Server, middleware};
use serde::Deserialize;
use serde_json::{Value, json};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let mut app = Router::builder().dump_internal_errors(true).build();
    app.wrap(middleware::trace());

    app.routes([
        ("GET /users/:id", Endpoint::new(get_user)),
        ("POST /users", Endpoint::new(create_user)),
    ]);

    app.group(|admin| {
        admin.wrap(middleware::from_fn(require_admin));
        admin.delete("/admin/users/:id", delete_user);
    });

    Server::bind("0.0.0.0:3000")
        .serve(app)
        .await
        .expect("server error");
}

async fn require_admin(req: Request, next: Endpoint) -> jsonrest::Outcome {
    if req.header("x-admin") != Some("yes") {
        return Err(ApiError::unauthorized("admin header required").into());
    }
    next.call(req).await
}

// GET /users/:id
async fn get_user(req: Request) -> Result<Value, Error> {
    match req.param("id") {
        "42" => Ok(json!({ "id": "42", "name": "alice" })),
        id => Err(ApiError::not_found(format!("user {id} not found")).into()),
    }
}

#[derive(Deserialize)]
struct NewUser {
    name: String,
}

// POST /users
async fn create_user(mut req: Request) -> Result<Value, Error> {
    let user: NewUser = req.bind_body().await?;
    req.set_response_header("location", "/users/99")?;
    Ok(json!({ "id": "99", "name": user.name }))
}

// DELETE /admin/users/:id → null body
async fn delete_user(_req: Request) -> Result<(), Error> {
    Ok(())
}
