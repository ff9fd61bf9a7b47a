use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use http_body_util::{BodyExt, Full};
use jsonrest::{
    ApiError, Endpoint, Error, Method, Outcome, Request, ResponseError, Router, middleware,
    response,
};
use serde::Deserialize;
use serde_json::{Value, json};

struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: Value,
}

async fn send(router: &Router, method: &str, uri: &str, body: &str, content_type: &str) -> Reply {
    let req = http::Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", content_type)
        .body(Full::new(Bytes::from(body.to_owned())))
        .unwrap();
    let res = router.handle(req).await;
    let status = res.status();
    let headers = res.headers().clone();
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    Reply { status, headers, body }
}

async fn get(router: &Router, uri: &str) -> Reply {
    send(router, "GET", uri, "", "application/json").await
}

fn flag_middleware(flag: &Arc<AtomicBool>) -> impl Fn(Endpoint) -> Endpoint + Send + Sync + 'static {
    let flag = Arc::clone(flag);
    middleware::from_fn(move |req: Request, next: Endpoint| {
        flag.store(true, Ordering::SeqCst);
        next.call(req)
    })
}

async fn empty(_req: Request) -> Result<(), Error> {
    Ok(())
}

#[tokio::test]
async fn simple_get() {
    let mut r = Router::new();
    r.get("/hello", |_req: Request| async { Ok::<_, Error>(json!({ "message": "Hello World" })) });

    let reply = get(&r, "/hello").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, json!({ "message": "Hello World" }));
    assert_eq!(reply.headers["content-type"], "application/json; charset=utf-8");
}

#[tokio::test]
async fn absent_value_is_json_null() {
    let mut r = Router::new();
    r.get("/nothing", |_req: Request| async { Ok::<Option<String>, Error>(None) });

    let req = http::Request::get("/nothing").body(Full::new(Bytes::new())).unwrap();
    let res = r.handle(req).await;
    assert_eq!(res.status(), StatusCode::OK);
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"null");
}

#[derive(Deserialize)]
struct CreateUser {
    id: i64,
}

fn users_router() -> Router {
    let mut r = Router::new();
    r.post("/users", |mut req: Request| async move {
        let params: CreateUser = req.bind_body().await?;
        Ok::<_, Error>(json!({ "id": params.id }))
    });
    r
}

#[tokio::test]
async fn request_body_good_json() {
    let reply = send(&users_router(), "POST", "/users", r#"{"id": 1}"#, "application/json").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, json!({ "id": 1 }));
}

#[tokio::test]
async fn request_body_bad_json() {
    let reply = send(&users_router(), "POST", "/users", r#"{"id": |1}"#, "application/json").await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        reply.body,
        json!({"error": {
            "code": "bad_request",
            "message": "malformed or unexpected json: offset 8: invalid character '|' looking for beginning of value",
        }})
    );
}

fn upload_router() -> Router {
    const DEFAULT_MAX_MEMORY: u64 = 32 << 20;
    let mut r = Router::new();
    r.post("/file_upload", |mut req: Request| async move {
        let file = req.form_file("file", DEFAULT_MAX_MEMORY).await?;
        Ok::<_, Error>(json!({ "fileName": file.file_name() }))
    });
    r
}

#[tokio::test]
async fn form_file_good_file() {
    let body = "--BOUNDARY\r\n\
Content-Disposition: form-data; name=\"file\"; filename=\"test\"\r\n\
Content-Type: application/octet-stream\r\n\r\n\
test\r\n\
--BOUNDARY--\r\n";
    let reply = send(
        &upload_router(),
        "POST",
        "/file_upload",
        body,
        "multipart/form-data; boundary=BOUNDARY",
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, json!({ "fileName": "test" }));
}

#[tokio::test]
async fn form_file_empty_form() {
    let reply = send(
        &upload_router(),
        "POST",
        "/file_upload",
        "--BOUNDARY--\r\n",
        "multipart/form-data; boundary=BOUNDARY",
    )
    .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn form_file_larger_than_max_memory_is_kept() {
    let mut r = Router::new();
    r.post("/file_upload", |mut req: Request| async move {
        let file = req.form_file("file", 64).await?;
        let data = file.bytes().await?;
        Ok::<_, Error>(json!({
            "fileName": file.file_name(),
            "size": file.size(),
            "inMemory": file.is_in_memory(),
            "allX": data.iter().all(|b| *b == b'x'),
        }))
    });

    let body = format!(
        "--BOUNDARY\r\n\
Content-Disposition: form-data; name=\"file\"; filename=\"big\"\r\n\
Content-Type: application/octet-stream\r\n\r\n\
{}\r\n\
--BOUNDARY--\r\n",
        "x".repeat(200)
    );
    let reply =
        send(&r, "POST", "/file_upload", &body, "multipart/form-data; boundary=BOUNDARY").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(
        reply.body,
        json!({ "fileName": "big", "size": 200, "inMemory": false, "allX": true })
    );
}

#[tokio::test]
async fn empty_segments_do_not_match_parameters() {
    let mut r = Router::new();
    r.get("/users/:id/x", empty).get("/static/*path", empty);

    assert_eq!(get(&r, "/users//x").await.status, StatusCode::NOT_FOUND);
    assert_eq!(get(&r, "/static/").await.status, StatusCode::NOT_FOUND);
    assert_eq!(get(&r, "/users/7/x").await.status, StatusCode::OK);
    assert_eq!(get(&r, "/static/app.js").await.status, StatusCode::OK);
}

#[tokio::test]
async fn url_params() {
    let mut r = Router::new();
    r.get("/users/:id", |req: Request| async move {
        let id = req.param("id");
        if id.is_empty() {
            return Err(Error::msg("missing id"));
        }
        Ok(json!({ "id": id, "route": req.route(), "sort": req.query("sort") }))
    });

    let reply = get(&r, "/users/123?sort=desc&sort=asc").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, json!({ "id": "123", "route": "/users/:id", "sort": "desc" }));
}

#[tokio::test]
async fn not_found_default() {
    let r = Router::new();
    let reply = get(&r, "/invalid_path").await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(
        reply.body,
        json!({"error": {"code": "not_found", "message": "url not found"}})
    );
}

#[tokio::test]
async fn not_found_override() {
    let r = Router::builder()
        .not_found(|_req| async { response::json(StatusCode::OK, &json!({ "proxy": true })) })
        .build();
    let reply = get(&r, "/invalid_path").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, json!({ "proxy": true }));
}

#[tokio::test]
async fn other_method_is_not_found() {
    let mut r = Router::new();
    r.post("/users", empty);
    assert_eq!(get(&r, "/users").await.status, StatusCode::NOT_FOUND);
    assert_eq!(send(&r, "PURGE", "/users", "", "").await.status, StatusCode::NOT_FOUND);
}

fn failure(case: u8) -> Error {
    match case {
        0 => Error::msg("missing id"),
        1 => ApiError::new(StatusCode::NOT_FOUND, "customer_not_found", "customer not found").into(),
        _ => std::io::Error::other("disk full").into(),
    }
}

#[tokio::test]
async fn errors_are_translated() {
    let unknown = json!({"error": {"code": "unknown_error", "message": "an unknown error occurred"}});
    let cases = [
        (0, StatusCode::INTERNAL_SERVER_ERROR, unknown.clone()),
        (
            1,
            StatusCode::NOT_FOUND,
            json!({"error": {"code": "customer_not_found", "message": "customer not found"}}),
        ),
        (2, StatusCode::INTERNAL_SERVER_ERROR, unknown),
    ];

    for (case, want_status, want_body) in cases {
        let mut r = Router::new();
        r.get("/fail", move |_req: Request| async move { Err::<(), _>(failure(case)) });

        let reply = get(&r, "/fail").await;
        assert_eq!(reply.status, want_status, "case {case}");
        assert_eq!(reply.body, want_body, "case {case}");
    }
}

#[tokio::test]
async fn application_error_body_is_exact() {
    let mut r = Router::new();
    r.get("/customer", |_req: Request| async {
        Err::<(), Error>(
            ApiError::new(StatusCode::NOT_FOUND, "customer_not_found", "customer not found").into(),
        )
    });

    let req = http::Request::get("/customer").body(Full::new(Bytes::new())).unwrap();
    let res = r.handle(req).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(
        &bytes[..],
        br#"{"error":{"code":"customer_not_found","message":"customer not found"}}"#
    );
}

#[derive(Debug)]
struct Throttled;

impl std::fmt::Display for Throttled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("slow down")
    }
}

impl ResponseError for Throttled {
    fn status_code(&self) -> Option<StatusCode> {
        Some(StatusCode::TOO_MANY_REQUESTS)
    }

    fn custom_body(&self) -> Option<Value> {
        Some(json!({ "retry_after": 30 }))
    }
}

#[tokio::test]
async fn custom_error_body_is_used_verbatim() {
    let mut r = Router::new();
    r.get("/busy", |_req: Request| async { Err::<(), _>(Error::new(Throttled)) });

    let reply = get(&r, "/busy").await;
    assert_eq!(reply.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(reply.body, json!({ "retry_after": 30 }));
}

#[tokio::test]
async fn dump_internal_error() {
    let mut r = Router::builder().dump_internal_errors(true).build();
    r.get("/", |_req: Request| async { Err::<(), _>(Error::msg("foo error occurred")) });

    let reply = get(&r, "/").await;
    assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        reply.body,
        json!({"error": {
            "code": "unknown_error",
            "message": "an unknown error occurred",
            "details": ["foo error occurred"],
        }})
    );
}

#[tokio::test]
async fn panics_become_unknown_errors() {
    let hits = Arc::new(AtomicUsize::new(0));
    let mut r = Router::new();
    r.get("/boom", |_req: Request| async {
        if true {
            panic!("handler exploded");
        }
        Ok::<(), Error>(())
    });
    let counter = Arc::clone(&hits);
    r.get("/ok", move |_req: Request| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Error>(json!("fine"))
        }
    });

    let reply = get(&r, "/boom").await;
    assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        reply.body,
        json!({"error": {"code": "unknown_error", "message": "an unknown error occurred"}})
    );

    // the same router keeps serving
    let reply = get(&r, "/ok").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn panics_in_middleware_are_caught() {
    let mut r = Router::builder().dump_internal_errors(true).build();
    r.wrap(|_next: Endpoint| {
        Endpoint::from_fn(|_req: Request| -> std::future::Ready<Outcome> {
            panic!("middleware glue failed")
        })
    });
    r.get("/", empty);

    let reply = get(&r, "/").await;
    assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        reply.body["error"]["details"],
        json!(["handler panicked: middleware glue failed"])
    );
}

#[tokio::test]
async fn top_level_middleware() {
    let called = Arc::new(AtomicBool::new(false));
    let mut r = Router::new();
    r.wrap(flag_middleware(&called));
    r.get("/test", empty);

    let reply = get(&r, "/test").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert!(called.load(Ordering::SeqCst));
}

#[tokio::test]
async fn group_middleware_stays_in_group() {
    let called = Arc::new(AtomicBool::new(false));
    let mut r = Router::new();
    r.get("/before", empty);
    r.group(|with| {
        with.wrap(flag_middleware(&called));
        with.get("/withmiddleware", empty);
    });
    r.group(|without| {
        without.get("/withoutmiddleware", empty);
    });

    let reply = get(&r, "/withmiddleware").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert!(called.load(Ordering::SeqCst));

    for path in ["/withoutmiddleware", "/before"] {
        called.store(false, Ordering::SeqCst);
        let reply = get(&r, path).await;
        assert_eq!(reply.status, StatusCode::OK);
        assert!(!called.load(Ordering::SeqCst), "{path} ran group middleware");
    }
}

#[tokio::test]
async fn middleware_order_and_snapshots() {
    let log = Arc::new(Mutex::new(Vec::<String>::new()));
    let tag = |name: &'static str| {
        let log = Arc::clone(&log);
        middleware::from_fn(move |req: Request, next: Endpoint| {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push(format!("{name} in"));
                let outcome = next.call(req).await;
                log.lock().unwrap().push(format!("{name} out"));
                outcome
            }
        })
    };

    let mut r = Router::new();
    r.wrap(tag("a"));
    r.group(|g| {
        g.wrap(tag("b"));
        g.group(|inner| {
            inner.get("/inner", empty);
        });
        g.wrap(tag("c"));
        g.get("/outer", empty);
    });
    r.wrap(tag("late"));
    r.get("/root", empty);

    assert_eq!(trail(&r, &log, "/inner").await, ["a in", "b in", "b out", "a out"]);
    assert_eq!(
        trail(&r, &log, "/outer").await,
        ["a in", "b in", "c in", "c out", "b out", "a out"]
    );
    assert_eq!(trail(&r, &log, "/root").await, ["a in", "late in", "late out", "a out"]);
}

async fn trail(r: &Router, log: &Mutex<Vec<String>>, path: &str) -> Vec<String> {
    log.lock().unwrap().clear();
    assert_eq!(get(r, path).await.status, StatusCode::OK);
    log.lock().unwrap().clone()
}

#[tokio::test]
async fn middleware_shares_values_with_handler() {
    let mut r = Router::new();
    r.wrap(middleware::from_fn(|mut req: Request, next: Endpoint| async move {
        let user = req.header("x-user").unwrap_or("anonymous").to_owned();
        req.set("user", user);
        next.call(req).await
    }));
    r.get("/whoami", |req: Request| async move {
        let user = req.get::<String>("user").cloned().unwrap_or_default();
        Ok::<_, Error>(json!({ "user": user, "method": req.method().as_str() }))
    });

    let req = http::Request::get("/whoami")
        .header("x-user", "alice")
        .body(Full::new(Bytes::new()))
        .unwrap();
    let res = r.handle(req).await;
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body, json!({ "user": "alice", "method": "GET" }));
}

#[tokio::test]
async fn middleware_can_short_circuit() {
    let mut r = Router::new();
    r.group(|admin| {
        admin.wrap(middleware::from_fn(|req: Request, next: Endpoint| async move {
            if req.header("x-admin") != Some("yes") {
                return Err(ApiError::unauthorized("admin only").into());
            }
            next.call(req).await
        }));
        admin.get("/admin", empty);
    });

    let reply = get(&r, "/admin").await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.body, json!({"error": {"code": "unauthorized", "message": "admin only"}}));
}

#[tokio::test]
async fn response_headers_are_applied() {
    let mut r = Router::new();
    r.post("/items", |req: Request| async move {
        req.set_response_header("location", "/items/7")?;
        req.set_response_header("content-type", "application/vnd.items+json")?;
        Ok::<_, Error>(json!({ "id": 7 }))
    });
    r.get("/fail", |req: Request| async move {
        req.set_response_header("x-trace", "abc")?;
        Err::<(), Error>(ApiError::bad_request("nope").into())
    });

    let reply = send(&r, "POST", "/items", "", "").await;
    assert_eq!(reply.headers["location"], "/items/7");
    assert_eq!(reply.headers["content-type"], "application/vnd.items+json");

    let reply = get(&r, "/fail").await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.headers["x-trace"], "abc");
    assert_eq!(reply.headers["content-type"], "application/json; charset=utf-8");
}

#[tokio::test]
async fn similar_endpoint() {
    let mut r = Router::new();
    r.get("/api/orders/:id", |req: Request| async move {
        Ok::<_, Error>(json!({ "message": "Endpoint with id", "param": req.param("id") }))
    });
    r.get("/api/orders/xyz", |_req: Request| async {
        Ok::<_, Error>(json!({ "message": "Endpoint without id" }))
    });

    let reply = get(&r, "/api/orders/id-3214-45").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, json!({ "message": "Endpoint with id", "param": "id-3214-45" }));

    let reply = get(&r, "/api/orders/xyz").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, json!({ "message": "Endpoint without id" }));

    assert_eq!(get(&r, "/api/order/xyz").await.status, StatusCode::NOT_FOUND);
    assert_eq!(get(&r, "/api/orders/xyz/").await.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn bulk_routes() {
    async fn list(_req: Request) -> Result<Value, Error> {
        Ok(json!(["a", "b"]))
    }
    async fn remove(req: Request) -> Result<Value, Error> {
        Ok(json!({ "deleted": req.param("id") }))
    }

    let mut r = Router::new();
    r.routes([
        ("GET /things", Endpoint::new(list)),
        ("DELETE   /things/:id", Endpoint::new(remove)),
    ]);

    assert_eq!(get(&r, "/things").await.body, json!(["a", "b"]));
    let reply = send(&r, "DELETE", "/things/9", "", "").await;
    assert_eq!(reply.body, json!({ "deleted": "9" }));
}

#[tokio::test]
async fn head_routes_are_separate() {
    let mut r = Router::new();
    r.head("/ping", empty);
    assert_eq!(send(&r, "HEAD", "/ping", "", "").await.status, StatusCode::OK);
    assert_eq!(get(&r, "/ping").await.status, StatusCode::NOT_FOUND);
}

#[test]
#[should_panic(expected = "invalid route key `FETCH /things`")]
fn malformed_route_key_is_fatal() {
    let mut r = Router::new();
    r.routes([("FETCH /things", Endpoint::new(empty))]);
}

#[test]
#[should_panic(expected = "invalid route key `GET`")]
fn route_key_without_path_is_fatal() {
    let mut r = Router::new();
    r.routes([("GET", Endpoint::new(empty))]);
}

#[test]
#[should_panic(expected = "invalid route `GET /users/:id`")]
fn duplicate_route_is_fatal() {
    let mut r = Router::new();
    r.get("/users/:id", empty).get("/users/:id", empty);
}

#[test]
fn method_parsing_matches_registration() {
    assert_eq!("PUT".parse::<Method>().unwrap(), Method::Put);
}

#[tokio::test]
async fn trace_middleware_passes_outcomes_through() {
    let mut r = Router::new();
    r.wrap(middleware::trace());
    r.get("/ok", |_req: Request| async { Ok::<_, Error>(json!({ "ok": true })) });
    r.get("/gone", |_req: Request| async {
        Err::<(), Error>(ApiError::new(StatusCode::GONE, "gone", "resource removed").into())
    });

    let reply = get(&r, "/ok").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, json!({ "ok": true }));

    let reply = get(&r, "/gone").await;
    assert_eq!(reply.status, StatusCode::GONE);
    assert_eq!(reply.body, json!({"error": {"code": "gone", "message": "resource removed"}}));
}
