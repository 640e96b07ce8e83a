mod common;

use std::sync::Arc;

use http::header::{CONTENT_TYPE, LOCATION};
use http::{Method, StatusCode};
use kindle::middleware::{Middleware, Next};
use kindle::{App, BoxFuture, Config, Context};
use parking_lot::Mutex;

use common::{body, get, request};

/// Records its name on the way in and on the way out.
struct Mark {
    name: &'static str,
    trail: Arc<Mutex<Vec<String>>>,
}

impl Middleware for Mark {
    fn name(&self) -> &str {
        self.name
    }

    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a> {
        Box::pin(async move {
            self.trail.lock().push(format!("{} in", self.name));
            next.run(ctx).await;
            self.trail.lock().push(format!("{} out", self.name));
        })
    }
}

async fn hello(ctx: &mut Context) {
    ctx.text("hello");
}

#[tokio::test]
async fn middleware_runs_in_order_and_unwinds_in_reverse() {
    let trail = Arc::new(Mutex::new(Vec::new()));
    let mut app = App::new(Config::new());
    for name in ["h1", "h2", "h3"] {
        app.add_middleware(Mark { name, trail: Arc::clone(&trail) }).unwrap();
    }
    app.add_route("/", hello, &[]).unwrap();
    let app = app.finish().unwrap();

    let res = App::handle(&app, get("/")).await;

    assert_eq!(body(&res), "hello");
    assert_eq!(*trail.lock(), ["h1 in", "h2 in", "h3 in", "h3 out", "h2 out", "h1 out"]);
}

#[tokio::test]
async fn short_circuit_skips_the_rest_of_the_chain() {
    async fn deny(ctx: &mut Context, _next: Next<'_>) {
        ctx.forbidden();
    }

    let trail = Arc::new(Mutex::new(Vec::new()));
    let mut app = App::new(Config::new());
    app.add_middleware(Mark { name: "h1", trail: Arc::clone(&trail) }).unwrap();
    app.add_middleware_fn("h2", deny).unwrap();
    app.add_middleware(Mark { name: "h3", trail: Arc::clone(&trail) }).unwrap();
    app.add_route("/", hello, &[]).unwrap();
    let app = app.finish().unwrap();

    let res = App::handle(&app, get("/")).await;

    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert!(body(&res).contains("403 Forbidden"));
    assert_eq!(*trail.lock(), ["h1 in", "h1 out"]);
}

#[tokio::test]
async fn post_processing_sees_the_handler_output() {
    async fn no_store(ctx: &mut Context, next: Next<'_>) {
        next.run(ctx).await;
        ctx.response_mut()
            .insert_header(http::header::CACHE_CONTROL, http::HeaderValue::from_static("no-store"));
    }

    let mut app = App::new(Config::new());
    app.add_middleware_fn("no-store", no_store).unwrap();
    app.add_route("/", hello, &[]).unwrap();
    let app = app.finish().unwrap();

    let res = App::handle(&app, get("/")).await;
    assert_eq!(res.headers()[http::header::CACHE_CONTROL], "no-store");
    assert_eq!(body(&res), "hello");
}

fn precedence_app() -> Arc<App> {
    async fn exact(ctx: &mut Context) {
        ctx.text("exact");
    }
    async fn exact_any(ctx: &mut Context) {
        ctx.text("exact-any");
    }
    async fn prefix(ctx: &mut Context) {
        ctx.text("prefix");
    }
    async fn prefix_post(ctx: &mut Context) {
        ctx.text("prefix-post");
    }
    async fn user(ctx: &mut Context) {
        let id = ctx.vars.get("id").cloned().unwrap_or_default();
        ctx.text(format!("user {id}"));
    }

    let mut app = App::new(Config::new());
    app.add_route("/a", exact, &["GET"]).unwrap();
    app.add_route("/a...", prefix, &[]).unwrap();
    app.add_route("/a/post...", prefix_post, &["POST"]).unwrap();
    app.add_route("/b", exact_any, &[]).unwrap();
    app.add_route("/users/{id}", user, &["get"]).unwrap();
    app.finish().unwrap()
}

#[tokio::test]
async fn exact_routes_beat_prefix_routes() {
    let app = precedence_app();

    let res = App::handle(&app, get("/a")).await;
    assert_eq!(body(&res), "exact");

    let res = App::handle(&app, get("/a/b")).await;
    assert_eq!(body(&res), "prefix");

    let res = App::handle(&app, request(Method::DELETE, "/a")).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert!(body(&res).contains("404 Not Found"));
}

#[tokio::test]
async fn method_specific_routes_beat_any_method_routes() {
    let app = precedence_app();

    let res = App::handle(&app, request(Method::POST, "/a/post/1")).await;
    assert_eq!(body(&res), "prefix-post");

    // A method-specific prefix that does not apply falls through to the
    // any-method prefix registered earlier.
    let res = App::handle(&app, get("/a/post/1")).await;
    assert_eq!(body(&res), "prefix");

    let res = App::handle(&app, request(Method::PATCH, "/b")).await;
    assert_eq!(body(&res), "exact-any");
}

#[tokio::test]
async fn variable_routes_fill_vars() {
    let app = precedence_app();

    let res = App::handle(&app, get("/users/42")).await;
    assert_eq!(body(&res), "user 42");

    let res = App::handle(&app, request(Method::POST, "/users/42")).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unclean_paths_redirect_permanently() {
    let app = precedence_app();

    let res = App::handle(&app, get("/a//b/../c")).await;
    assert_eq!(res.status(), StatusCode::MOVED_PERMANENTLY);
    assert_eq!(res.headers()[LOCATION], "/a/c");
    assert_ne!(body(&res), "prefix");

    let res = App::handle(&app, get("/users/./7?tab=posts")).await;
    assert_eq!(res.status(), StatusCode::MOVED_PERMANENTLY);
    assert_eq!(res.headers()[LOCATION], "/users/7?tab=posts");
}

#[tokio::test]
async fn later_registration_replaces_earlier() {
    async fn first(ctx: &mut Context) {
        ctx.text("first");
    }
    async fn second(ctx: &mut Context) {
        ctx.text("second");
    }

    let mut app = App::new(Config::new());
    app.add_route("/dup", first, &["GET"]).unwrap();
    app.add_route("/dup", second, &["GET"]).unwrap();
    let app = app.finish().unwrap();

    let res = App::handle(&app, get("/dup")).await;
    assert_eq!(body(&res), "second");
}

#[tokio::test]
async fn restricted_routes_consult_the_guard() {
    async fn open_door(ctx: &mut Context, next: Next<'_>) {
        let admin = ctx.request().header("x-admin") == Some("yes");
        ctx.booleans.insert("UserSuperUser".into(), admin);
        next.run(ctx).await;
    }
    async fn dashboard(ctx: &mut Context) {
        ctx.html("<h1>admin</h1>");
    }

    let mut app = App::new(Config::new());
    app.add_middleware_fn("door", open_door).unwrap();
    app.add_route("/admin/...", dashboard, &[]).unwrap();
    app.add_route("/public", hello, &[]).unwrap();
    app.restrict_route("/admin/", |ctx| ctx.booleans.get("UserSuperUser").copied().unwrap_or(false));
    let app = app.finish().unwrap();

    let res = App::handle(&app, get("/admin/users")).await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let mut headers = http::HeaderMap::new();
    headers.insert("x-admin", http::HeaderValue::from_static("yes"));
    let req = kindle::Request::new(Method::GET, "/admin/users".parse().unwrap(), headers, bytes::Bytes::new());
    let res = App::handle(&app, req).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()[CONTENT_TYPE], "text/html; charset=utf-8");

    let res = App::handle(&app, get("/public")).await;
    assert_eq!(body(&res), "hello");
}

#[tokio::test]
async fn services_reach_handlers_through_the_context() {
    struct Greeting(&'static str);

    async fn greet(ctx: &mut Context) {
        let greeting = ctx.app().service::<Greeting>("greeting").map(|g| g.0).unwrap_or("?");
        ctx.text(greeting);
    }

    let mut app = App::new(Config::new());
    app.register_service("greeting", Greeting("hi there")).unwrap();
    app.add_route("/", greet, &[]).unwrap();
    let app = app.finish().unwrap();

    let res = App::handle(&app, get("/")).await;
    assert_eq!(body(&res), "hi there");
}
