//! Minimal kindle example: sessions, a login flow, and a guarded area.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl -c jar -b jar http://localhost:3000/visits
//!   curl -c jar -b jar -X POST http://localhost:3000/login -d 'user=1'
//!   curl -c jar -b jar http://localhost:3000/admin/stats
//!   curl -c jar -b jar http://localhost:3000/users/1
//!   curl -c jar -b jar -X POST http://localhost:3000/logout

use async_trait::async_trait;
use kindle::middleware::{Identity, IdentityMiddleware, IdentityResolver, Trace, log_in, log_out};
use kindle::{App, Config, Context};
use serde::Serialize;

#[derive(Clone, Serialize)]
struct User {
    id: u32,
    name: &'static str,
    admin: bool,
}

const USERS: [User; 2] = [
    User { id: 1, name: "ada", admin: true },
    User { id: 2, name: "grace", admin: false },
];

struct Directory;

#[async_trait]
impl IdentityResolver for Directory {
    type User = User;

    async fn resolve(&self, user_id: &str) -> Option<Identity<User>> {
        let user = USERS.iter().find(|u| u.id.to_string() == user_id)?.clone();
        Some(Identity { display_name: user.name.to_owned(), superuser: user.admin, user })
    }
}

#[tokio::main]
async fn main() -> Result<(), kindle::Error> {
    tracing_subscriber::fmt::init();

    let mut app = App::new(Config::new().with("server_port", "3000"));
    app.add_middleware(Trace)?;
    app.enable_sessions().await?;
    app.add_middleware(IdentityMiddleware::new(Directory))?;

    app.add_route("/visits", visits, &["GET"])?;
    app.add_route("/login", login, &["POST"])?;
    app.add_route("/logout", logout, &["POST"])?;
    app.add_route("/users/{id}", show_user, &["GET"])?;
    app.add_route("/admin/...", admin, &[])?;
    app.restrict_route("/admin/", |ctx| ctx.booleans.get("UserSuperUser").copied().unwrap_or(false));

    app.run().await
}

// GET /visits: a per-session counter.
async fn visits(ctx: &mut Context) {
    let Some(session) = ctx.session.as_deref() else { return ctx.bad_request() };
    let seen: u64 = session.get("visits").await.parse().unwrap_or(0) + 1;
    if let Err(e) = session.set("visits", &seen.to_string()).await {
        tracing::warn!("could not count visit: {e}");
    }
    ctx.text(format!("visit #{seen}\n"));
}

// POST /login with `user=<id>`. No passwords: this is a demo.
async fn login(ctx: &mut Context) {
    let Ok(form) = ctx.request().form() else { return ctx.bad_request() };
    let Some(id) = form.get("user").filter(|id| USERS.iter().any(|u| u.id.to_string() == **id)) else {
        return ctx.forbidden();
    };
    let Some(session) = ctx.session.as_deref() else { return ctx.bad_request() };
    if log_in(session, id).await.is_err() {
        return ctx.bad_request();
    }
    ctx.redirect("/visits");
}

async fn logout(ctx: &mut Context) {
    if let Some(session) = ctx.session.as_deref() {
        let _ = log_out(session).await;
    }
    ctx.redirect("/visits");
}

async fn show_user(ctx: &mut Context) {
    let id = ctx.vars.get("id").cloned().unwrap_or_default();
    match USERS.iter().find(|u| u.id.to_string() == id) {
        Some(user) => ctx.json_value(user),
        None => ctx.not_found(),
    }
}

// Everything under /admin/ requires a superuser.
async fn admin(ctx: &mut Context) {
    let who = ctx.strings.get("UserDisplayName").cloned().unwrap_or_default();
    ctx.text(format!("hello {who}, you are looking at {}\n", ctx.request().path()));
}
