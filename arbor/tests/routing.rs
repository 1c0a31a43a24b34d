//! End-to-end routing behavior, driven through `App::handle_request`.

use arbor::{App, Context, HandlerResult};
use hyper::{Body, Request, Response, StatusCode};

async fn body_string(response: Response<Body>) -> (StatusCode, String) {
    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn ping(ctx: &mut Context) -> HandlerResult {
    ctx.string(StatusCode::OK, "pong")
}

#[tokio::test]
async fn static_get_matches_and_other_methods_do_not() {
    let app = App::new();
    app.get("/ping", ping).unwrap();

    let (status, body) = body_string(app.handle_request(get("/ping")).await).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "pong");

    let (status, _) = body_string(app.handle_request(post("/ping")).await).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn named_params_are_captured() {
    async fn show(ctx: &mut Context) -> HandlerResult {
        let id = ctx.param("id").unwrap_or("").to_string();
        ctx.string(StatusCode::OK, id)
    }

    let app = App::new();
    app.get("/users/:id", show).unwrap();

    let (status, body) = body_string(app.handle_request(get("/users/42")).await).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "42");
}

#[tokio::test]
async fn braced_params_behave_like_named_and_both_may_coexist() {
    async fn named(ctx: &mut Context) -> HandlerResult {
        let id = format!("named:{}", ctx.param("id").unwrap_or(""));
        ctx.string(StatusCode::OK, id)
    }
    async fn braced(ctx: &mut Context) -> HandlerResult {
        let id = format!("braced:{}", ctx.param("id").unwrap_or(""));
        ctx.string(StatusCode::OK, id)
    }

    let app = App::new();
    app.get("/users/:id", named).unwrap();
    // Tokenizes differently, so this is not a conflict.
    app.get("/users/{id}", braced).unwrap();

    // The earlier registration wins the tie.
    let (_, body) = body_string(app.handle_request(get("/users/42")).await).await;
    assert_eq!(body, "named:42");
}

#[tokio::test]
async fn wildcard_captures_the_joined_tail() {
    async fn show(ctx: &mut Context) -> HandlerResult {
        let rest = ctx.param("rest").unwrap_or("").to_string();
        ctx.string(StatusCode::OK, rest)
    }

    let app = App::new();
    app.get("/files/*rest", show).unwrap();

    let (status, body) = body_string(app.handle_request(get("/files/a/b/c.txt")).await).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "a/b/c.txt");
}

#[tokio::test]
async fn duplicate_registration_is_refused() {
    let app = App::new();
    app.get("/ping", ping).unwrap();
    assert!(app.get("/ping", ping).is_err());
    assert!(app.get("//ping/", ping).is_err());
    // A different method is its own key.
    app.post("/ping", ping).unwrap();
}

#[tokio::test]
async fn malformed_patterns_are_refused() {
    let app = App::new();
    assert!(app.get("/files/*rest/tail", ping).is_err());
    assert!(app.get("/users/:", ping).is_err());
}

#[tokio::test]
async fn not_found_handler_is_replaceable() {
    async fn teapot(ctx: &mut Context) -> HandlerResult {
        ctx.string(StatusCode::IM_A_TEAPOT, "lost")
    }

    let app = App::new();
    app.not_found(teapot);

    let (status, body) = body_string(app.handle_request(get("/missing")).await).await;
    assert_eq!(status, StatusCode::IM_A_TEAPOT);
    assert_eq!(body, "lost");
}

#[tokio::test]
async fn default_not_found_is_plain_404() {
    let app = App::new();
    let response = app.handle_request(get("/missing")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/plain"));
}

#[tokio::test]
async fn any_registers_every_method() {
    let app = App::new();
    app.any("/echo", ping).unwrap();

    for method in &["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"] {
        let req = Request::builder()
            .method(*method)
            .uri("/echo")
            .body(Body::empty())
            .unwrap();
        let response = app.handle_request(req).await;
        assert_eq!(response.status(), StatusCode::OK, "{}", method);
    }
}

#[tokio::test]
async fn group_prefixes_compose() {
    let app = App::new();
    let v1 = app.group("/v1");
    let users = v1.group("/users");
    users.get("/:id", ping).unwrap();

    assert_eq!(users.prefix(), "/v1/users");

    let (status, _) = body_string(app.handle_request(get("/v1/users/9")).await).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = body_string(app.handle_request(get("/users/9")).await).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn matched_pattern_is_visible_to_handlers() {
    async fn show(ctx: &mut Context) -> HandlerResult {
        let pattern = ctx.matched_pattern().unwrap_or("").to_string();
        ctx.string(StatusCode::OK, pattern)
    }

    let app = App::new();
    app.get("/users/:id/files/*rest", show).unwrap();

    let (_, body) = body_string(app.handle_request(get("/users/1/files/a/b")).await).await;
    assert_eq!(body, "/users/:id/files/*rest");
}

#[tokio::test]
async fn query_helpers_read_the_uri() {
    async fn show(ctx: &mut Context) -> HandlerResult {
        let name = ctx.query("name").unwrap_or_default();
        ctx.string(StatusCode::OK, name)
    }

    let app = App::new();
    app.get("/hello", show).unwrap();

    let (_, body) = body_string(app.handle_request(get("/hello?name=world&x=1")).await).await;
    assert_eq!(body, "world");
}
