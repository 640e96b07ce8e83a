//! The application host.
//!
//! An [`App`] is assembled mutably at startup (config, services, plugins,
//! middleware, routes), then frozen with [`App::finish`] into an `Arc<App>`
//! that every request's [`Context`] shares read-only.
//!
//! ```rust,ignore
//! let mut app = App::new(Config::from_toml_file(Path::new("kindle.toml"))?);
//! app.add_middleware(Trace)?;
//! app.enable_sessions().await?;
//! app.add_route("/", index, &["GET"])?;
//! app.run().await?;
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::context::Context;
use crate::error::Error;
use crate::handler::Handler;
use crate::middleware::{Chain, Middleware, MiddlewareFn, NextFn, SessionMiddleware};
use crate::request::Request;
use crate::response::Response;
use crate::router::{Dispatch, Router};
use crate::server::{DEFAULT_MAX_BODY, Server};
use crate::session;
use crate::template::{DefaultTemplates, Templates};

/// A self-contained feature installed into an [`App`] at startup.
pub trait Plugin {
    /// Unique within one app.
    fn name(&self) -> &str;

    /// Registers the plugin's routes, middleware, and services.
    fn initialize(&self, app: &mut App) -> Result<(), Error>;
}

pub struct App {
    config: Config,
    services: HashMap<String, Arc<dyn Any + Send + Sync>>,
    apps: Vec<String>,
    router: Router,
    chain: Chain,
    templates: Arc<dyn Templates>,
}

impl App {
    /// Creates an app whose config is `config` over the built-in defaults.
    pub fn new(config: Config) -> Self {
        let config = Config::new()
            .with("server_port", "8000")
            .with("server_max_body", DEFAULT_MAX_BODY.to_string())
            .merge(&config);
        Self {
            config,
            services: HashMap::new(),
            apps: Vec::new(),
            router: Router::new(),
            chain: Chain::new(),
            templates: Arc::new(DefaultTemplates::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Adds keys to the config. Keys already set keep their value, so a
    /// plugin can publish its defaults without clobbering the operator's.
    pub fn append_config(&mut self, defaults: &Config) {
        self.config = defaults.clone().merge(&self.config);
    }

    // ── Services ─────────────────────────────────────────────────────────────

    /// Shares `service` under `name` with every handler via
    /// [`Context::app`].
    pub fn register_service<T: Any + Send + Sync>(&mut self, name: &str, service: T) -> Result<(), Error> {
        if self.services.contains_key(name) {
            return Err(Error::DuplicateService(name.to_owned()));
        }
        self.services.insert(name.to_owned(), Arc::new(service));
        Ok(())
    }

    /// The service registered under `name`, if it has type `T`.
    pub fn service<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        let service = Arc::clone(self.services.get(name)?);
        service.downcast::<T>().ok()
    }

    // ── Plugins ──────────────────────────────────────────────────────────────

    /// Runs the plugin's `initialize` and records it as installed. A plugin
    /// whose `initialize` fails is not recorded; anything it registered before
    /// failing stays registered.
    pub fn add_app(&mut self, plugin: impl Plugin) -> Result<(), Error> {
        let name = plugin.name().to_owned();
        if self.app_installed(&name) {
            return Err(Error::DuplicateApp(name));
        }
        plugin.initialize(self)?;
        self.apps.push(name);
        Ok(())
    }

    pub fn app_installed(&self, name: &str) -> bool {
        self.apps.iter().any(|a| a == name)
    }

    // ── Templates ────────────────────────────────────────────────────────────

    pub fn templates(&self) -> &dyn Templates {
        self.templates.as_ref()
    }

    pub fn set_templates(&mut self, templates: impl Templates) {
        self.templates = Arc::new(templates);
    }

    // ── Routes ───────────────────────────────────────────────────────────────

    /// See [`Router::add`].
    pub fn add_route(&mut self, path: &str, handler: impl Handler, methods: &[&str]) -> Result<(), Error> {
        self.router.add(path, handler, methods)
    }

    /// See [`Router::restrict`].
    pub fn restrict_route(&mut self, prefix: &str, guard: impl Fn(&Context) -> bool + Send + Sync + 'static) {
        self.router.restrict(prefix, guard);
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    // ── Middleware ───────────────────────────────────────────────────────────

    /// Appends `middleware` to the chain. Registration order is execution
    /// order on the way in.
    pub fn add_middleware(&mut self, middleware: impl Middleware) -> Result<(), Error> {
        self.chain.add(Arc::new(middleware))
    }

    pub fn add_middleware_fn<F>(&mut self, name: &str, func: F) -> Result<(), Error>
    where
        F: for<'a> NextFn<'a>,
    {
        self.add_middleware(MiddlewareFn::new(name, func))
    }

    pub fn middleware_names(&self) -> impl Iterator<Item = &str> {
        self.chain.names()
    }

    /// Builds the store selected by `session_store` and registers a
    /// [`SessionMiddleware`] over it.
    pub async fn enable_sessions(&mut self) -> Result<(), Error> {
        let store = session::store_from_config(&self.config).await?;
        info!(store = store.name(), "sessions enabled");
        self.add_middleware(SessionMiddleware::from_shared(store))
    }

    // ── Running ──────────────────────────────────────────────────────────────

    /// Appends the route dispatch stage and freezes the app.
    pub fn finish(mut self) -> Result<Arc<App>, Error> {
        self.chain.add(Arc::new(Dispatch))?;
        Ok(Arc::new(self))
    }

    /// Runs one request through the chain and returns what it produced.
    pub async fn handle(app: &Arc<App>, request: Request) -> Response {
        let mut ctx = Context::new(Arc::clone(app), request);
        app.chain.run(&mut ctx).await;
        ctx.into_response()
    }

    /// Finishes the app and serves it on `0.0.0.0:<server_port>` until
    /// SIGTERM or Ctrl-C.
    pub async fn run(self) -> Result<(), Error> {
        let port: u16 = self.config.parse("server_port", 8000)?;
        let app = self.finish()?;
        Server::bind(&format!("0.0.0.0:{port}"))?.serve(app).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Blog;

    impl Plugin for Blog {
        fn name(&self) -> &str {
            "blog"
        }

        fn initialize(&self, app: &mut App) -> Result<(), Error> {
            app.append_config(&Config::new().with("blog_title", "Notes").with("server_port", "1"));
            app.register_service("blog.posts", vec!["hello".to_owned()])
        }
    }

    #[test]
    fn defaults_yield_to_supplied_config() {
        let app = App::new(Config::new().with("server_port", "9000"));
        assert_eq!(app.config().get("server_port"), Some("9000"));
        assert_eq!(App::new(Config::new()).config().get("server_port"), Some("8000"));
    }

    #[test]
    fn services_are_typed_and_unique() {
        let mut app = App::new(Config::new());
        app.register_service("db", 42_u32).unwrap();

        assert_eq!(app.service::<u32>("db").as_deref(), Some(&42));
        assert!(app.service::<String>("db").is_none());
        assert!(app.service::<u32>("cache").is_none());
        assert!(matches!(app.register_service("db", 1_u32), Err(Error::DuplicateService(n)) if n == "db"));
    }

    #[test]
    fn plugins_install_once() {
        let mut app = App::new(Config::new());
        app.add_app(Blog).unwrap();

        assert!(app.app_installed("blog"));
        assert_eq!(app.config().get("blog_title"), Some("Notes"));
        assert_eq!(app.config().get("server_port"), Some("8000"));
        assert!(app.service::<Vec<String>>("blog.posts").is_some());
        assert!(matches!(app.add_app(Blog), Err(Error::DuplicateApp(n)) if n == "blog"));
    }

    #[test]
    fn failed_plugins_are_not_installed() {
        struct Broken;

        impl Plugin for Broken {
            fn name(&self) -> &str {
                "broken"
            }

            fn initialize(&self, app: &mut App) -> Result<(), Error> {
                app.register_service("db", 1_u32)
            }
        }

        let mut app = App::new(Config::new());
        app.register_service("db", 0_u32).unwrap();

        assert!(matches!(app.add_app(Broken), Err(Error::DuplicateService(_))));
        assert!(!app.app_installed("broken"));
    }

    #[test]
    fn finish_appends_the_router() {
        let mut app = App::new(Config::new());
        app.add_middleware(crate::middleware::Trace).unwrap();
        let app = app.finish().unwrap();
        assert_eq!(app.middleware_names().collect::<Vec<_>>(), vec!["trace", "router"]);
    }

    #[test]
    fn router_name_is_reserved() {
        async fn noop(ctx: &mut Context, next: crate::middleware::Next<'_>) {
            next.run(ctx).await;
        }
        let mut app = App::new(Config::new());
        app.add_middleware_fn("router", noop).unwrap();
        assert!(matches!(app.finish(), Err(Error::DuplicateMiddleware(_))));
    }
}
