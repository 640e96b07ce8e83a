//! # kindle
//!
//! A small HTTP application framework: one [`Context`] per request, an
//! ordered middleware chain, a route dispatch table, and server-side
//! sessions with interchangeable backends.
//!
//! ## The pipeline
//!
//! ```text
//! request ─▶ Context ─▶ middleware 1 ─▶ … ─▶ middleware N ─▶ router ─▶ handler
//!                           ◀──────────── unwinds in reverse ◀─────────┘
//! ```
//!
//! Every request gets a fresh [`Context`]. Middleware runs in registration
//! order, may stop the request by not calling `next`, and may do more work
//! after `next` returns. The router is always the last link.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use kindle::middleware::Trace;
//! use kindle::{App, Config, Context};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), kindle::Error> {
//!     let mut app = App::new(Config::new().with("server_port", "3000"));
//!     app.add_middleware(Trace)?;
//!     app.enable_sessions().await?;
//!     app.add_route("/hello/{name}", hello, &["GET"])?;
//!     app.add_route("/static/...", assets, &[])?;
//!     app.run().await
//! }
//!
//! async fn hello(ctx: &mut Context) {
//!     let name = ctx.vars.get("name").cloned().unwrap_or_default();
//!     ctx.text(format!("hello, {name}"));
//! }
//!
//! async fn assets(ctx: &mut Context) {
//!     ctx.not_found();
//! }
//! ```

mod app;
mod config;
mod context;
mod error;
mod handler;
mod method;
mod request;
mod response;
mod router;
mod server;
mod template;

pub mod middleware;
pub mod session;

pub use app::{App, Plugin};
pub use config::Config;
pub use context::Context;
pub use error::Error;
pub use handler::{BoxFuture, Handler};
pub use method::Method;
pub use request::Request;
pub use response::{ContentType, Response};
pub use router::{Guard, PREFIX_MARKER, Router, clean_path};
pub use server::Server;
pub use template::{DefaultTemplates, TemplateError, Templates};
