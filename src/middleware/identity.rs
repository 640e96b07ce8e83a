//! Attaches the logged-in user to the request.
//!
//! kindle has no opinion on how users authenticate. Once a login handler has
//! verified someone it calls [`log_in`], which stores the user ID in the
//! session. On every later request [`IdentityMiddleware`] reads the ID back,
//! asks an [`IdentityResolver`] for the user, and publishes the result on the
//! context:
//!
//! | Context entry | Logged out | Logged in |
//! |---|---|---|
//! | `strings["UserID"]` | `"0"` | the user ID |
//! | `strings["UserDisplayName"]` | `""` | resolver's display name |
//! | `booleans["UserLoggedIn"]` | `false` | `true` |
//! | `booleans["UserSuperUser"]` | `false` | resolver's flag |
//! | cache [`USER_CACHE_KEY`] | absent | the resolved user record |

use async_trait::async_trait;
use http::StatusCode;
use tracing::{error, warn};

use super::{BoxFuture, Middleware, Next};
use crate::context::Context;
use crate::session::{Session, SessionError};

/// Session key holding the logged-in user's ID.
pub const SESSION_USER_KEY: &str = "UserApp_LoggedInUserID";

/// Context cache key of the resolved user record.
pub const USER_CACHE_KEY: &str = "User";

/// A resolved user.
pub struct Identity<U> {
    pub display_name: String,
    pub superuser: bool,
    pub user: U,
}

/// Looks users up by the ID stored in their session.
#[async_trait]
pub trait IdentityResolver: Send + Sync + 'static {
    type User: Send + Sync + 'static;

    /// `None` when the user no longer exists; the stale ID is then dropped
    /// from the session.
    async fn resolve(&self, user_id: &str) -> Option<Identity<Self::User>>;
}

/// Marks the session as belonging to `user_id`.
pub async fn log_in(session: &dyn Session, user_id: &str) -> Result<(), SessionError> {
    session.set(SESSION_USER_KEY, user_id).await
}

/// Ends the session entirely.
pub async fn log_out(session: &dyn Session) -> Result<(), SessionError> {
    session.destroy().await
}

/// Publishes the session's user on the context. Must run after
/// [`SessionMiddleware`](super::SessionMiddleware).
pub struct IdentityMiddleware<R> {
    resolver: R,
}

impl<R: IdentityResolver> IdentityMiddleware<R> {
    pub fn new(resolver: R) -> Self {
        Self { resolver }
    }
}

fn mark_logged_out(ctx: &mut Context) {
    ctx.strings.insert("UserID".into(), "0".into());
    ctx.strings.insert("UserDisplayName".into(), String::new());
    ctx.booleans.insert("UserLoggedIn".into(), false);
    ctx.booleans.insert("UserSuperUser".into(), false);
}

impl<R: IdentityResolver> Middleware for IdentityMiddleware<R> {
    fn name(&self) -> &str {
        "identity"
    }

    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a> {
        Box::pin(async move {
            let user_id = match ctx.require_session("identity middleware") {
                Ok(session) => session.get(SESSION_USER_KEY).await,
                Err(e) => {
                    error!("{e}");
                    ctx.response_mut().set_status(StatusCode::INTERNAL_SERVER_ERROR);
                    ctx.text(e.to_string());
                    return;
                }
            };

            if user_id.is_empty() {
                mark_logged_out(ctx);
            } else if let Some(identity) = self.resolver.resolve(&user_id).await {
                ctx.strings.insert("UserID".into(), user_id);
                ctx.strings.insert("UserDisplayName".into(), identity.display_name);
                ctx.booleans.insert("UserLoggedIn".into(), true);
                ctx.booleans.insert("UserSuperUser".into(), identity.superuser);
                ctx.cache_insert(USER_CACHE_KEY, identity.user);
            } else {
                if let Some(session) = ctx.session.as_deref() {
                    if let Err(e) = session.delete(SESSION_USER_KEY).await {
                        warn!(session = session.id(), "could not drop stale user id: {e}");
                    }
                }
                mark_logged_out(ctx);
            }

            next.run(ctx).await;
        })
    }
}
