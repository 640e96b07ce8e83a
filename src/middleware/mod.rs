//! Middleware chain.
//!
//! Middleware intercepts every request on its way to the route handler and is
//! the place for cross-cutting concerns: tracing, sessions, identity. Each
//! middleware receives the request [`Context`] and a [`Next`] continuation and
//! chooses one of four shapes:
//!
//! ```rust,ignore
//! async fn pass_through(ctx: &mut Context, next: Next<'_>) {
//!     next.run(ctx).await;
//! }
//!
//! async fn pre(ctx: &mut Context, next: Next<'_>) {
//!     ctx.strings.insert("Theme".into(), "dark".into());
//!     next.run(ctx).await;
//! }
//!
//! async fn post(ctx: &mut Context, next: Next<'_>) {
//!     next.run(ctx).await;
//!     ctx.response_mut().insert_header(CACHE_CONTROL, HeaderValue::from_static("no-store"));
//! }
//!
//! async fn short_circuit(ctx: &mut Context, _next: Next<'_>) {
//!     ctx.forbidden();
//! }
//! ```
//!
//! Middleware runs in registration order on the way in; work done after
//! `next.run` happens in reverse order on the way out. The chain does not
//! catch anything: a middleware that fails writes its own error response.
//!
//! # Layout
//!
//! The chain is a flat array of links. Each link holds one middleware and the
//! index of its successor. The array always ends with a no-op sentinel, so
//! every real link can call `next` unconditionally. Adding a middleware
//! rebuilds the whole array from the registration list.

mod identity;
mod session;
mod trace;

use std::future::Future;
use std::sync::Arc;

use crate::context::Context;
use crate::error::Error;
pub use crate::handler::BoxFuture;

pub use identity::{Identity, IdentityMiddleware, IdentityResolver, SESSION_USER_KEY, USER_CACHE_KEY, log_in, log_out};
pub use session::{SESSION_COOKIE, SessionMiddleware};
pub use trace::Trace;

/// A request interceptor.
///
/// Implement this for middleware that carries state; plain `async fn`s can be
/// registered through [`MiddlewareFn`] instead.
pub trait Middleware: Send + Sync + 'static {
    /// Unique within one app.
    fn name(&self) -> &str;

    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a>;
}

/// The rest of the chain after the current middleware.
pub struct Next<'a> {
    links: &'a [Link],
    index: usize,
}

impl Next<'_> {
    /// Runs the next link. Not calling this short-circuits the chain.
    pub async fn run(self, ctx: &mut Context) {
        let link = &self.links[self.index];
        let next = Next { links: self.links, index: link.next };
        link.middleware.handle(ctx, next).await;
    }
}

// ── Function middleware ───────────────────────────────────────────────────────

/// Implemented for every `async fn(&mut Context, Next<'_>)`. You never name it.
#[doc(hidden)]
pub trait NextFn<'a>: Send + Sync + 'static {
    type Future: Future<Output = ()> + Send + 'a;

    fn call(&self, ctx: &'a mut Context, next: Next<'a>) -> Self::Future;
}

impl<'a, F, Fut> NextFn<'a> for F
where
    F: Fn(&'a mut Context, Next<'a>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'a,
{
    type Future = Fut;

    fn call(&self, ctx: &'a mut Context, next: Next<'a>) -> Fut {
        self(ctx, next)
    }
}

/// A named `async fn` middleware.
pub struct MiddlewareFn<F> {
    name: String,
    func: F,
}

impl<F> MiddlewareFn<F>
where
    F: for<'a> NextFn<'a>,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self { name: name.into(), func }
    }
}

impl<F> Middleware for MiddlewareFn<F>
where
    F: for<'a> NextFn<'a>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a> {
        Box::pin(NextFn::call(&self.func, ctx, next))
    }
}

// ── Chain ─────────────────────────────────────────────────────────────────────

struct Link {
    middleware: Arc<dyn Middleware>,
    next: usize,
}

/// The end of every chain. Never calls `next`.
struct Sentinel;

impl Middleware for Sentinel {
    fn name(&self) -> &str {
        "sentinel"
    }

    fn handle<'a>(&'a self, _ctx: &'a mut Context, _next: Next<'a>) -> BoxFuture<'a> {
        Box::pin(async {})
    }
}

/// An ordered middleware chain.
pub struct Chain {
    handlers: Vec<Arc<dyn Middleware>>,
    links: Vec<Link>,
}

impl Chain {
    pub fn new() -> Self {
        Self { handlers: Vec::new(), links: build(&[], 0) }
    }

    /// Appends a middleware and rebuilds the chain.
    ///
    /// The first middleware added is the outermost: it runs first on the way
    /// in and last on the way out.
    pub fn add(&mut self, middleware: Arc<dyn Middleware>) -> Result<(), Error> {
        if self.contains(middleware.name()) {
            return Err(Error::DuplicateMiddleware(middleware.name().to_owned()));
        }
        self.handlers.push(middleware);
        self.links = build(&self.handlers, 0);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.iter().any(|m| m.name() == name)
    }

    /// Registered names, outermost first. The sentinel is not listed.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.iter().map(|m| m.name())
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Runs `ctx` through the chain from the outermost link.
    pub async fn run(&self, ctx: &mut Context) {
        Next { links: &self.links, index: 0 }.run(ctx).await;
    }
}

impl Default for Chain {
    fn default() -> Self {
        Self::new()
    }
}

/// `build([])` is the sentinel alone; `build([h, rest..])` is a link to `h`
/// pointing at the first link of `build(rest)`.
fn build(handlers: &[Arc<dyn Middleware>], at: usize) -> Vec<Link> {
    match handlers.split_first() {
        None => vec![Link { middleware: Arc::new(Sentinel), next: at }],
        Some((first, rest)) => {
            let mut links = vec![Link { middleware: Arc::clone(first), next: at + 1 }];
            links.extend(build(rest, at + 1));
            links
        }
    }
}
