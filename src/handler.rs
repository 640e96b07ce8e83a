//! Route handler trait and type erasure.
//!
//! # What a handler looks like
//!
//! ```rust,ignore
//! async fn show_user(ctx: &mut Context) {
//!     let id = ctx.vars.get("id").cloned().unwrap_or_default();
//!     ctx.text(format!("user {id}"));
//! }
//! ```
//!
//! A handler borrows the request's [`Context`] for the duration of its future
//! and writes its output through it. Nothing is returned.
//!
//! # How they are stored
//!
//! The dispatch table holds handlers of many concrete types, so each one is
//! wrapped and stored behind a trait object:
//!
//! ```text
//! async fn show_user(ctx: &mut Context)        ← user writes this
//!        ↓ app.add_route("/users/{id}", show_user, &["GET"])
//! show_user.into_boxed_handler()               ← Handler blanket impl
//!        ↓
//! Arc::new(FnHandler(show_user))               ← stored as BoxedHandler
//!        ↓
//! handler.call(&mut ctx)  at request time      ← one vtable dispatch + one box
//! ```
//!
//! The [`RouteFn`] helper trait exists because the future returned by an
//! `async fn(&mut Context)` borrows the context, and a plain `Fn` bound has no
//! way to name a return type that depends on the argument's lifetime.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;

/// A heap-allocated, type-erased future that borrows the request context.
pub type BoxFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

// ── Lifetime plumbing ─────────────────────────────────────────────────────────

/// Implemented for every `async fn(&mut Context)`. You never name it.
#[doc(hidden)]
pub trait RouteFn<'a>: Send + Sync + 'static {
    type Future: Future<Output = ()> + Send + 'a;

    fn call(&self, ctx: &'a mut Context) -> Self::Future;
}

impl<'a, F, Fut> RouteFn<'a> for F
where
    F: Fn(&'a mut Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'a,
{
    type Future = Fut;

    fn call(&self, ctx: &'a mut Context) -> Fut {
        self(ctx)
    }
}

// ── Internal types ────────────────────────────────────────────────────────────

/// Internal dispatch interface.
///
/// `#[doc(hidden)] pub` because it appears in the return type of the public
/// `Handler` trait's `into_boxed_handler` method.
#[doc(hidden)]
pub trait ErasedHandler: Send + Sync + 'static {
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a>;
}

/// A type-erased handler shared by every request that resolves to it.
#[doc(hidden)]
pub type BoxedHandler = Arc<dyn ErasedHandler>;

// ── Public Handler trait ──────────────────────────────────────────────────────

/// Implemented for every valid route handler.
///
/// Automatically satisfied by any `async fn name(ctx: &mut Context)`. The
/// trait is sealed: only the blanket impl below can satisfy it.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

impl<F> private::Sealed for F where F: for<'a> RouteFn<'a> {}

impl<F> Handler for F
where
    F: for<'a> RouteFn<'a>,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

// ── Concrete wrapper ──────────────────────────────────────────────────────────

struct FnHandler<F>(F);

impl<F> ErasedHandler for FnHandler<F>
where
    F: for<'a> RouteFn<'a>,
{
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a> {
        Box::pin(RouteFn::call(&self.0, ctx))
    }
}
