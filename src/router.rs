//! Route dispatch table.
//!
//! Routes are registered per method (or for every method) and resolved with a
//! fixed precedence, first match wins:
//!
//! 1. exact path, request method
//! 2. exact path, any method
//! 3. prefix route (`/static/...`), request method
//! 4. prefix route, any method
//! 5. variable route (`/users/{id}`) via a [`matchit`] radix tree, request
//!    method first, then any method; captured segments land in
//!    [`Context::vars`]
//! 6. `404`
//!
//! Exact paths are hashed. Prefix routes cannot be, so they are scanned in
//! registration order. A prefix route matches only paths that continue past
//! its prefix: `/a...` answers `/a/b` and `/ab`, not `/a`. Registering the
//! same method and path twice replaces the first handler and logs a warning.
//!
//! Before any matching the dispatch stage cleans the path (`.`, `..`,
//! repeated slashes). If cleaning changes it, the client is sent a `301` to
//! the cleaned path instead.

use std::collections::HashMap;
use std::sync::Arc;

use http::StatusCode;
use matchit::Router as MatchitRouter;
use tracing::warn;

use crate::context::Context;
use crate::error::Error;
use crate::handler::{BoxFuture, BoxedHandler, Handler};
use crate::method::Method;
use crate::middleware::{Middleware, Next};

/// Suffix marking a prefix route.
pub const PREFIX_MARKER: &str = "...";

/// Which requests a route answers.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
enum MethodKey {
    Any,
    Only(Method),
}

struct PrefixRoute {
    key: MethodKey,
    prefix: String,
    handler: BoxedHandler,
}

struct PatternRoute {
    handlers: HashMap<MethodKey, BoxedHandler>,
}

/// Decides whether a request may reach a restricted route.
pub type Guard = Arc<dyn Fn(&Context) -> bool + Send + Sync>;

struct Restriction {
    prefix: String,
    guard: Guard,
}

/// The outcome of resolving a request.
pub(crate) struct Resolved<'r> {
    pub(crate) handler: &'r BoxedHandler,
    pub(crate) vars: Vec<(String, String)>,
}

/// Handlers keyed by method and path.
///
/// Built once at startup through [`App::add_route`](crate::App::add_route)
/// and read-only afterwards.
pub struct Router {
    exact: HashMap<MethodKey, HashMap<String, BoxedHandler>>,
    prefixes: Vec<PrefixRoute>,
    patterns: Vec<PatternRoute>,
    pattern_index: HashMap<String, usize>,
    tree: MatchitRouter<usize>,
    restricted: Vec<Restriction>,
}

impl Router {
    pub fn new() -> Self {
        Self {
            exact: HashMap::new(),
            prefixes: Vec::new(),
            patterns: Vec::new(),
            pattern_index: HashMap::new(),
            tree: MatchitRouter::new(),
            restricted: Vec::new(),
        }
    }

    /// Registers `handler` for `path` and each of `methods`, or for every
    /// method when `methods` is empty. Method names are case-insensitive.
    ///
    /// A path ending in `...` is a prefix route. Path segments written as
    /// `{name}` (or a trailing `{*name}`) are captured into [`Context::vars`].
    pub fn add(&mut self, path: &str, handler: impl Handler, methods: &[&str]) -> Result<(), Error> {
        if !path.starts_with('/') {
            return Err(Error::InvalidRoute {
                path: path.to_owned(),
                reason: "path must start with `/`".to_owned(),
            });
        }
        let keys = method_keys(methods)?;
        let handler = handler.into_boxed_handler();

        if let Some(prefix) = path.strip_suffix(PREFIX_MARKER) {
            for key in keys {
                self.add_prefix(key, prefix, Arc::clone(&handler));
            }
        } else if path.contains('{') {
            self.add_pattern(path, &keys, &handler)?;
        } else {
            for key in keys {
                let replaced = self
                    .exact
                    .entry(key)
                    .or_default()
                    .insert(path.to_owned(), Arc::clone(&handler));
                if replaced.is_some() {
                    warn!(path, method = ?key, "route registered twice, keeping the later handler");
                }
            }
        }
        Ok(())
    }

    fn add_prefix(&mut self, key: MethodKey, prefix: &str, handler: BoxedHandler) {
        match self.prefixes.iter_mut().find(|r| r.key == key && r.prefix == prefix) {
            Some(existing) => {
                warn!(prefix, method = ?key, "prefix route registered twice, keeping the later handler");
                existing.handler = handler;
            }
            None => self.prefixes.push(PrefixRoute { key, prefix: prefix.to_owned(), handler }),
        }
    }

    fn add_pattern(&mut self, path: &str, keys: &[MethodKey], handler: &BoxedHandler) -> Result<(), Error> {
        let index = match self.pattern_index.get(path) {
            Some(&index) => index,
            None => {
                let index = self.patterns.len();
                self.tree.insert(path, index).map_err(|e| Error::InvalidRoute {
                    path: path.to_owned(),
                    reason: e.to_string(),
                })?;
                self.patterns.push(PatternRoute { handlers: HashMap::new() });
                self.pattern_index.insert(path.to_owned(), index);
                index
            }
        };

        let route = &mut self.patterns[index];
        for &key in keys {
            if route.handlers.insert(key, Arc::clone(handler)).is_some() {
                warn!(path, method = ?key, "route registered twice, keeping the later handler");
            }
        }
        Ok(())
    }

    /// Guards every route under `prefix`: a request that resolves to one of
    /// them gets `403` unless `guard` approves its context.
    pub fn restrict(&mut self, prefix: &str, guard: impl Fn(&Context) -> bool + Send + Sync + 'static) {
        self.restricted.push(Restriction { prefix: prefix.to_owned(), guard: Arc::new(guard) });
    }

    pub(crate) fn resolve(&self, method: &http::Method, path: &str) -> Option<Resolved<'_>> {
        let own = Method::from_http(method).map(MethodKey::Only);
        let keys = own.into_iter().chain([MethodKey::Any]);

        for key in keys.clone() {
            if let Some(handler) = self.exact.get(&key).and_then(|paths| paths.get(path)) {
                return Some(Resolved { handler, vars: Vec::new() });
            }
        }

        for key in keys.clone() {
            let found = self.prefixes.iter().find(|r| r.key == key && extends(path, &r.prefix));
            if let Some(route) = found {
                return Some(Resolved { handler: &route.handler, vars: Vec::new() });
            }
        }

        let matched = self.tree.at(path).ok()?;
        let route = &self.patterns[*matched.value];
        let handler = keys.into_iter().find_map(|key| route.handlers.get(&key))?;
        let vars = matched.params.iter().map(|(k, v)| (k.to_owned(), v.to_owned())).collect();
        Some(Resolved { handler, vars })
    }

    fn allows(&self, path: &str, ctx: &Context) -> bool {
        match self.restricted.iter().find(|r| path.starts_with(&r.prefix)) {
            Some(restriction) => (restriction.guard)(ctx),
            None => true,
        }
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}

/// True when `path` continues past `prefix`. A prefix route never answers
/// its bare prefix.
fn extends(path: &str, prefix: &str) -> bool {
    path.len() > prefix.len() && path.starts_with(prefix)
}

fn method_keys(methods: &[&str]) -> Result<Vec<MethodKey>, Error> {
    if methods.is_empty() {
        return Ok(vec![MethodKey::Any]);
    }
    methods.iter().map(|m| m.parse().map(MethodKey::Only)).collect()
}

/// Returns the canonical form of `path`: rooted, no `.` or `..` segments, no
/// repeated slashes. A trailing slash survives cleaning.
pub fn clean_path(path: &str) -> String {
    if path.is_empty() {
        return "/".to_owned();
    }

    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }

    let mut cleaned = String::with_capacity(path.len() + 1);
    for segment in &segments {
        cleaned.push('/');
        cleaned.push_str(segment);
    }
    if cleaned.is_empty() || path.ends_with('/') {
        cleaned.push('/');
    }
    cleaned
}

// ── Dispatch stage ────────────────────────────────────────────────────────────

/// The last middleware of every finished app: cleans the path, resolves the
/// route, and runs its handler.
pub(crate) struct Dispatch;

impl Middleware for Dispatch {
    fn name(&self) -> &str {
        "router"
    }

    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a> {
        Box::pin(async move {
            let path = ctx.request().path().to_owned();
            let cleaned = clean_path(&path);
            if cleaned != path {
                let location = match ctx.request().query() {
                    Some(query) => format!("{cleaned}?{query}"),
                    None => cleaned,
                };
                ctx.redirect_with(&location, StatusCode::MOVED_PERMANENTLY);
                return;
            }

            let app = Arc::clone(ctx.app());
            let router = app.router();
            match router.resolve(ctx.request().method(), &path) {
                None => ctx.not_found(),
                Some(_) if !router.allows(&path, ctx) => ctx.forbidden(),
                Some(Resolved { handler, vars }) => {
                    ctx.vars.extend(vars);
                    handler.call(ctx).await;
                }
            }

            next.run(ctx).await;
        })
    }
}
