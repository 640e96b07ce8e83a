//! Per-request state.
//!
//! One [`Context`] is created for every inbound request, handed down the
//! middleware chain by `&mut`, and turned into the HTTP response once the
//! chain returns. Middleware leaves data in the scratch maps; handlers and
//! templates read it back.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{HeaderValue, LOCATION};
use http::StatusCode;
use serde::Serialize;
use tracing::{error, warn};

use crate::app::App;
use crate::error::Error;
use crate::request::Request;
use crate::response::{ContentType, Response};
use crate::session::Session;

/// Everything one request's middleware and handler share.
///
/// The scratch maps are always allocated, so code can write into them
/// without checking. Output helpers each set exactly one `Content-Type` and
/// replace the body; calling several of them leaves the last one's output.
pub struct Context {
    /// Set by [`SessionMiddleware`](crate::middleware::SessionMiddleware).
    pub session: Option<Box<dyn Session>>,
    /// Values captured from `{name}` path segments.
    pub vars: HashMap<String, String>,
    pub strings: HashMap<String, String>,
    pub integers: HashMap<String, i64>,
    pub booleans: HashMap<String, bool>,
    cache: HashMap<String, Box<dyn Any + Send + Sync>>,
    app: Arc<App>,
    request: Request,
    response: Response,
}

impl Context {
    pub fn new(app: Arc<App>, request: Request) -> Self {
        Self {
            session: None,
            vars: HashMap::new(),
            strings: HashMap::new(),
            integers: HashMap::new(),
            booleans: HashMap::new(),
            cache: HashMap::new(),
            app,
            request,
            response: Response::new(),
        }
    }

    pub fn app(&self) -> &Arc<App> { &self.app }
    pub fn request(&self) -> &Request { &self.request }
    pub fn response(&self) -> &Response { &self.response }
    pub fn response_mut(&mut self) -> &mut Response { &mut self.response }

    pub fn into_response(self) -> Response {
        self.response
    }

    /// The attached session, or [`Error::MissingSession`] naming `consumer`.
    pub fn require_session(&self, consumer: &'static str) -> Result<&dyn Session, Error> {
        self.session.as_deref().ok_or(Error::MissingSession(consumer))
    }

    // ── Object cache ─────────────────────────────────────────────────────────

    /// Caches an arbitrary value for the rest of the request, replacing any
    /// value under the same name.
    pub fn cache_insert<T: Any + Send + Sync>(&mut self, name: &str, value: T) {
        self.cache.insert(name.to_owned(), Box::new(value));
    }

    /// The cached value under `name`, if there is one of type `T`.
    pub fn cached<T: Any + Send + Sync>(&self, name: &str) -> Option<&T> {
        self.cache.get(name).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn cache_remove(&mut self, name: &str) -> bool {
        self.cache.remove(name).is_some()
    }

    // ── Output helpers ───────────────────────────────────────────────────────

    pub fn text(&mut self, body: impl Into<String>) {
        self.response.set_body(ContentType::Text, body.into());
    }

    pub fn html(&mut self, body: impl Into<String>) {
        self.response.set_body(ContentType::Html, body.into());
    }

    /// Writes already-serialised JSON bytes.
    pub fn json(&mut self, body: impl Into<Bytes>) {
        self.response.set_body(ContentType::Json, body);
    }

    /// Serialises `value` and writes it as JSON. Serialisation failure
    /// becomes a `500` text response.
    pub fn json_value<T: Serialize + ?Sized>(&mut self, value: &T) {
        match serde_json::to_vec(value) {
            Ok(body) => self.json(body),
            Err(e) => {
                error!("json response: {e}");
                self.response.set_status(StatusCode::INTERNAL_SERVER_ERROR);
                self.text(e.to_string());
            }
        }
    }

    /// Renders the named page through the app's templates. A render failure
    /// is written as a text response carrying the error.
    pub fn template(&mut self, name: &str) {
        let app = Arc::clone(&self.app);
        match app.templates().render(name, self) {
            Ok(html) => self.html(html),
            Err(e) => {
                warn!(template = name, "render failed: {e}");
                self.text(e.to_string());
            }
        }
    }

    /// `302 Found` to `location`.
    pub fn redirect(&mut self, location: &str) {
        self.redirect_with(location, StatusCode::FOUND);
    }

    pub fn redirect_with(&mut self, location: &str, status: StatusCode) {
        let Ok(value) = HeaderValue::try_from(location) else {
            error!(location, "redirect target is not a valid header value");
            self.response.set_status(StatusCode::INTERNAL_SERVER_ERROR);
            self.text("invalid redirect location");
            return;
        };
        self.response.set_status(status);
        self.response.insert_header(LOCATION, value);
        let reason = status.canonical_reason().unwrap_or("Redirect");
        self.html(format!("<a href=\"{}\">{reason}</a>.\n", escape_attr(location)));
    }

    pub fn bad_request(&mut self) {
        self.response.set_status(StatusCode::BAD_REQUEST);
        self.template("badrequest");
    }

    pub fn forbidden(&mut self) {
        self.response.set_status(StatusCode::FORBIDDEN);
        self.template("forbidden");
    }

    pub fn not_found(&mut self) {
        self.response.set_status(StatusCode::NOT_FOUND);
        self.template("notfound");
    }

    /// `200 OK` with an empty text body.
    pub fn empty_ok(&mut self) {
        self.response.set_status(StatusCode::OK);
        self.text("");
    }
}

fn escape_attr(s: &str) -> String {
    s.replace('&', "&amp;").replace('"', "&quot;").replace('<', "&lt;").replace('>', "&gt;")
}
