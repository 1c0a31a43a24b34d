//! Pipeline semantics: ordering, short-circuiting, recovery and the
//! response-writer invariants, driven through `App::handle_request`.

use std::sync::{Arc, Mutex};

use arbor::middleware::recovery::recovery;
use arbor::{App, Context, Handler, HandlerResult, Middleware};
use async_trait::async_trait;
use hyper::{Body, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};

type Log = Arc<Mutex<Vec<String>>>;

// Records its name around the rest of the chain, the way an ordering probe
// would.
struct Tracer {
    name: &'static str,
    log: Log,
}

impl Tracer {
    fn new(name: &'static str, log: &Log) -> Middleware {
        Arc::new(Tracer {
            name,
            log: log.clone(),
        })
    }
}

#[async_trait]
impl Handler for Tracer {
    async fn handle(&self, ctx: &mut Context) -> HandlerResult {
        self.log.lock().unwrap().push(self.name.to_string());
        let result = ctx.next().await;
        self.log.lock().unwrap().push(format!("{}:out", self.name));
        result
    }
}

struct Terminal {
    log: Log,
}

#[async_trait]
impl Handler for Terminal {
    async fn handle(&self, ctx: &mut Context) -> HandlerResult {
        self.log.lock().unwrap().push("H".to_string());
        ctx.string(StatusCode::OK, "done")
    }
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_string(response: Response<Body>) -> (StatusCode, String) {
    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

#[tokio::test]
async fn nested_group_middleware_runs_root_to_leaf_and_returns_in_reverse() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));

    let app = App::new();
    app.use_middleware(Tracer::new("A", &log));

    let v1 = app.group("/v1");
    v1.use_middleware(Tracer::new("B", &log));

    let users = v1.group("/users");
    users.use_middleware(Tracer::new("C", &log));

    users
        .handle_chain(
            hyper::Method::GET,
            "/:id",
            vec![
                Tracer::new("D", &log),
                Arc::new(Terminal { log: log.clone() }),
            ],
        )
        .unwrap();

    let (status, body) = body_string(app.handle_request(get("/v1/users/7")).await).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "done");

    let recorded = log.lock().unwrap().clone();
    assert_eq!(
        recorded,
        vec!["A", "B", "C", "D", "H", "D:out", "C:out", "B:out", "A:out"]
    );
}

#[tokio::test]
async fn middleware_shared_between_groups_runs_once() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let shared = Tracer::new("S", &log);

    let app = App::new();
    app.use_middleware(shared.clone());
    let v1 = app.group("/v1");
    v1.use_middleware(shared);

    async fn ok(ctx: &mut Context) -> HandlerResult {
        ctx.string(StatusCode::OK, "ok")
    }
    v1.get("/ping", ok).unwrap();

    app.handle_request(get("/v1/ping")).await;
    let recorded = log.lock().unwrap().clone();
    assert_eq!(recorded, vec!["S", "S:out"]);
}

#[tokio::test]
async fn group_middleware_runs_for_not_found_paths() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));

    let app = App::new();
    app.use_middleware(Tracer::new("A", &log));

    let response = app.handle_request(get("/nope")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(*log.lock().unwrap(), vec!["A", "A:out"]);
}

#[tokio::test]
async fn dynamic_prefix_groups_match_per_segment() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));

    let app = App::new();
    let tenant = app.group("/:tenant/admin");
    tenant.use_middleware(Tracer::new("T", &log));

    async fn ok(ctx: &mut Context) -> HandlerResult {
        ctx.string(StatusCode::OK, "ok")
    }
    app.get("/acme/admin/panel", ok).unwrap();
    app.get("/plain", ok).unwrap();

    app.handle_request(get("/acme/admin/panel")).await;
    assert_eq!(*log.lock().unwrap(), vec!["T", "T:out"]);

    log.lock().unwrap().clear();
    app.handle_request(get("/plain")).await;
    assert!(log.lock().unwrap().is_empty());
}

struct ShortCircuit;

#[async_trait]
impl Handler for ShortCircuit {
    async fn handle(&self, ctx: &mut Context) -> HandlerResult {
        // Never calls next(): everything after this is skipped.
        ctx.string(StatusCode::UNAUTHORIZED, "halt")
    }
}

#[tokio::test]
async fn a_handler_that_skips_next_short_circuits_but_still_flushes() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));

    let app = App::new();
    app.use_middleware(Arc::new(ShortCircuit));
    app.handle(
        hyper::Method::GET,
        "/never",
        Terminal { log: log.clone() },
    )
    .unwrap();

    let (status, body) = body_string(app.handle_request(get("/never")).await).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, "halt");
    assert!(log.lock().unwrap().is_empty());
}

struct DoubleNext;

#[async_trait]
impl Handler for DoubleNext {
    async fn handle(&self, ctx: &mut Context) -> HandlerResult {
        ctx.next().await?;
        // A programmer error; the pipeline must fail loudly.
        ctx.next().await
    }
}

#[tokio::test]
async fn calling_next_twice_fails_loudly_as_a_500() {
    let app = App::new();
    app.use_middleware(Arc::new(DoubleNext));

    async fn ok(ctx: &mut Context) -> HandlerResult {
        ctx.set_status(StatusCode::OK);
        Ok(())
    }
    app.get("/twice", ok).unwrap();

    let response = app.handle_request(get("/twice")).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

async fn panics(_ctx: &mut Context) -> HandlerResult {
    panic!("boom");
}

#[tokio::test]
async fn panics_surface_as_500() {
    let app = App::new();
    app.get("/panic", panics).unwrap();

    let response = app.handle_request(get("/panic")).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    // The request id survives the panic path.
    assert!(response.headers().get("x-request-id").is_some());
}

#[tokio::test]
async fn panic_responses_echo_an_external_request_id() {
    let app = App::new();
    app.get("/panic", panics).unwrap();

    let req = Request::builder()
        .uri("/panic")
        .header("x-request-id", "panic-7")
        .body(Body::empty())
        .unwrap();
    let response = app.handle_request(req).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.headers().get("x-request-id").unwrap(), "panic-7");
}

#[tokio::test]
async fn recovery_middleware_converts_panics_into_error_pages() {
    let app = App::new();
    app.use_middleware(recovery());
    app.get("/panic", panics).unwrap();

    let req = Request::builder()
        .uri("/panic")
        .header("accept", "application/json")
        .body(Body::empty())
        .unwrap();
    let (status, body) = body_string(app.handle_request(req).await).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    let decoded: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(decoded["code"], 500);
}

struct LateStatus;

#[async_trait]
impl Handler for LateStatus {
    async fn handle(&self, ctx: &mut Context) -> HandlerResult {
        ctx.string(StatusCode::OK, "body")?;
        // Already committed; this must be ignored.
        ctx.set_status(StatusCode::IM_A_TEAPOT);
        Ok(())
    }
}

#[tokio::test]
async fn status_changes_after_first_write_are_ignored() {
    let app = App::new();
    app.handle(hyper::Method::GET, "/late", LateStatus).unwrap();

    let (status, body) = body_string(app.handle_request(get("/late")).await).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "body");
}

#[tokio::test]
async fn success_and_fail_envelopes_have_the_documented_shape() {
    #[derive(Serialize)]
    struct Payload {
        value: i32,
    }

    async fn ok(ctx: &mut Context) -> HandlerResult {
        ctx.success(&Payload { value: 7 })
    }
    async fn bad(ctx: &mut Context) -> HandlerResult {
        ctx.fail(41000, "invalid input")
    }

    let app = App::new();
    app.get("/ok", ok).unwrap();
    app.get("/bad", bad).unwrap();

    let (status, body) = body_string(app.handle_request(get("/ok")).await).await;
    assert_eq!(status, StatusCode::OK);
    let decoded: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(decoded["code"], 200);
    assert_eq!(decoded["message"], "success");
    assert_eq!(decoded["result"]["value"], 7);

    let (status, body) = body_string(app.handle_request(get("/bad")).await).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let decoded: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(decoded["code"], 41000);
    assert_eq!(decoded["message"], "invalid input");
    assert!(decoded.get("result").is_none());
}

#[tokio::test]
async fn request_ids_are_echoed() {
    async fn ok(ctx: &mut Context) -> HandlerResult {
        ctx.string(StatusCode::OK, "ok")
    }

    let app = App::new();
    app.get("/id", ok).unwrap();

    let req = Request::builder()
        .uri("/id")
        .header("x-request-id", "abc-123")
        .body(Body::empty())
        .unwrap();
    let response = app.handle_request(req).await;
    assert_eq!(response.headers().get("x-request-id").unwrap(), "abc-123");

    let response = app.handle_request(get("/id")).await;
    let generated = response
        .headers()
        .get("x-request-id")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(generated.contains('/'));
}

#[tokio::test]
async fn json_bind_round_trips() {
    #[derive(Serialize, Deserialize)]
    struct Payload {
        name: String,
        count: u32,
    }

    async fn echo(ctx: &mut Context) -> HandlerResult {
        let payload: Payload = ctx.bind_json().await?;
        ctx.json(StatusCode::OK, &payload)
    }

    let app = App::new();
    app.post("/echo", echo).unwrap();

    let original = serde_json::json!({ "name": "arbor", "count": 3 });
    let req = Request::builder()
        .method("POST")
        .uri("/echo")
        .header("content-type", "application/json")
        .body(Body::from(original.to_string()))
        .unwrap();

    let (status, body) = body_string(app.handle_request(req).await).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(serde_json::from_str::<serde_json::Value>(&body).unwrap(), original);
}

#[tokio::test]
async fn content_type_mismatch_is_a_typed_error() {
    #[derive(Deserialize)]
    struct Payload {
        _name: Option<String>,
    }

    async fn echo(ctx: &mut Context) -> HandlerResult {
        let _payload: Payload = ctx.bind_json().await?;
        ctx.string(StatusCode::OK, "ok")
    }

    let app = App::new();
    app.post("/echo", echo).unwrap();

    let req = Request::builder()
        .method("POST")
        .uri("/echo")
        .header("content-type", "text/csv")
        .body(Body::from("a,b"))
        .unwrap();
    let response = app.handle_request(req).await;
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn oversized_bodies_are_rejected() {
    async fn echo(ctx: &mut Context) -> HandlerResult {
        let body = ctx.body().await?;
        ctx.string(StatusCode::OK, format!("{}", body.len()))
    }

    let mut config = arbor::ServerConfig::default();
    config.body_limit = 8;
    let app = App::with_config(config);
    app.post("/echo", echo).unwrap();

    let req = Request::builder()
        .method("POST")
        .uri("/echo")
        .body(Body::from("only a few bytes, but more than eight"))
        .unwrap();
    let response = app.handle_request(req).await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn components_materialize_once_per_request() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter {
        born: usize,
    }

    static BUILDS: AtomicUsize = AtomicUsize::new(0);

    async fn uses_component(ctx: &mut Context) -> HandlerResult {
        let first = ctx.component::<Counter>()?.born;
        let second = ctx.component::<Counter>()?.born;
        assert_eq!(first, second);
        ctx.string(StatusCode::OK, format!("{}", second))
    }

    let app = App::new();
    app.provide(|_app| Counter {
        born: BUILDS.fetch_add(1, Ordering::SeqCst),
    });
    app.get("/c", uses_component).unwrap();

    let (_, body) = body_string(app.handle_request(get("/c")).await).await;
    assert_eq!(body, "0");
    // A second request materializes its own instance.
    let (_, body) = body_string(app.handle_request(get("/c")).await).await;
    assert_eq!(body, "1");
}

#[tokio::test]
async fn missing_components_surface_as_500() {
    struct Absent;

    async fn uses_component(ctx: &mut Context) -> HandlerResult {
        let _ = ctx.component::<Absent>()?;
        ctx.string(StatusCode::OK, "unreachable")
    }

    let app = App::new();
    app.get("/c", uses_component).unwrap();

    let response = app.handle_request(get("/c")).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}
