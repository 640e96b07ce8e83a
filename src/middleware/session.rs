//! Session bootstrap middleware.

use std::sync::Arc;
use std::time::SystemTime;

use http::header::{HeaderValue, SET_COOKIE};
use http::StatusCode;
use tracing::{error, warn};

use super::{BoxFuture, Middleware, Next};
use crate::context::Context;
use crate::session::{SessionStore, is_valid_session_id, new_session_id, unix_timestamp};

/// Name of the cookie carrying the session ID.
pub const SESSION_COOKIE: &str = "kindleSession";

/// Attaches a [`Session`](crate::session::Session) to every request.
///
/// A request presenting a well-formed `kindleSession` cookie reuses that ID.
/// Anything else gets a freshly minted ID, a single `Set-Cookie` header, and
/// an `init` value holding the creation time in UNIX seconds. The store's
/// expiry sweep is given a chance to run before the request continues.
pub struct SessionMiddleware {
    store: Arc<dyn SessionStore>,
}

impl SessionMiddleware {
    pub fn new(store: impl SessionStore) -> Self {
        Self { store: Arc::new(store) }
    }

    pub fn from_shared(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    async fn attach(&self, ctx: &mut Context) -> bool {
        let presented = ctx.request().cookie(SESSION_COOKIE).filter(|id| is_valid_session_id(id));
        let (id, existing) = match presented {
            Some(id) => (id.to_owned(), true),
            None => (new_session_id(), false),
        };

        let session = match self.store.open(&id).await {
            Ok(session) => session,
            Err(e) => {
                error!(store = self.store.name(), "could not open session: {e}");
                ctx.response_mut().set_status(StatusCode::INTERNAL_SERVER_ERROR);
                ctx.text("session store unavailable");
                return false;
            }
        };

        if !existing {
            if let Ok(cookie) = HeaderValue::try_from(format!("{SESSION_COOKIE}={id}; Path=/")) {
                ctx.response_mut().append_header(SET_COOKIE, cookie);
            }
            if let Err(e) = session.set("init", &unix_timestamp(SystemTime::now())).await {
                warn!(session = %id, "could not record session init time: {e}");
            }
        }
        if let Err(e) = session.touch().await {
            warn!(session = %id, "could not refresh session expiry: {e}");
        }

        ctx.session = Some(session);
        true
    }
}

impl Middleware for SessionMiddleware {
    fn name(&self) -> &str {
        "session"
    }

    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a> {
        Box::pin(async move {
            if !self.attach(ctx).await {
                return;
            }
            if let Err(e) = self.store.purge(SystemTime::now()).await {
                warn!(store = self.store.name(), "session purge failed: {e}");
            }
            next.run(ctx).await;
        })
    }
}
