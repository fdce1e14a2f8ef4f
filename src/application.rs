//! Full-stack style applications.
//!
//! Routes point at `controller#action` targets, and middleware is set up by
//! [`Initializer`]s that run once when the application boots.
//!
//! ```rust
//! use waggle::{Application, Request};
//!
//! async fn show(req: Request) -> String {
//!     format!("Hello {}", req.param("name").unwrap_or("world"))
//! }
//!
//! let app = Application::builder()
//!     .get("/hello/:name", "hello#show", show)
//!     .boot();
//! ```

use std::fmt;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use tracing::debug;

use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler, Handler};
use crate::method::Method;
use crate::middleware::{Layer, Stack};
use crate::request::Request;
use crate::router::Router;

/// A booted application, ready to serve.
pub struct Application {
    layers: Vec<&'static str>,
    handler: BoxedHandler,
}

impl Application {
    pub fn builder() -> ApplicationBuilder {
        ApplicationBuilder::new()
    }

    /// Names of the application's layers, outermost first.
    pub fn layers(&self) -> &[&'static str] {
        &self.layers
    }

    pub fn into_handler(self) -> BoxedHandler {
        self.handler
    }
}

impl ErasedHandler for Application {
    fn call(&self, req: Request) -> BoxFuture {
        self.handler.call(req)
    }
}

impl From<Application> for BoxedHandler {
    fn from(app: Application) -> Self {
        app.into_handler()
    }
}

impl fmt::Debug for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Application").field("layers", &self.layers).finish()
    }
}

/// Collects routes, layers and initializers for an [`Application`].
#[derive(Default)]
pub struct ApplicationBuilder {
    router: Router,
    stack: Stack,
    initializers: Vec<Arc<dyn Initializer>>,
}

impl ApplicationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes `method path` to `handler`, reporting `target` as the
    /// `controller` and `action` parameters.
    ///
    /// # Panics
    ///
    /// Panics if `target` is not `controller#action`, or if the path is
    /// malformed or conflicts with an existing route.
    pub fn route(mut self, method: Method, path: &str, target: &str, handler: impl Handler) -> Self {
        let (controller, action) = parse_target(target)
            .unwrap_or_else(|| panic!("invalid route target `{target}`: expected `controller#action`"));
        let defaults = vec![
            ("controller".to_owned(), controller.to_owned()),
            ("action".to_owned(), action.to_owned()),
        ];
        self.router = self.router.insert(method, path, defaults, handler.into_boxed_handler());
        self
    }

    pub fn get(self, path: &str, target: &str, handler: impl Handler) -> Self {
        self.route(Method::Get, path, target, handler)
    }

    pub fn post(self, path: &str, target: &str, handler: impl Handler) -> Self {
        self.route(Method::Post, path, target, handler)
    }

    pub fn put(self, path: &str, target: &str, handler: impl Handler) -> Self {
        self.route(Method::Put, path, target, handler)
    }

    pub fn patch(self, path: &str, target: &str, handler: impl Handler) -> Self {
        self.route(Method::Patch, path, target, handler)
    }

    pub fn delete(self, path: &str, target: &str, handler: impl Handler) -> Self {
        self.route(Method::Delete, path, target, handler)
    }

    pub fn layer(mut self, layer: impl Layer) -> Self {
        self.stack.push(layer);
        self
    }

    /// Adds an initializer that runs after the process-wide ones.
    pub fn initializer(mut self, initializer: impl Initializer) -> Self {
        self.initializers.push(Arc::new(initializer));
        self
    }

    /// Boots with the process-wide initializers.
    pub fn boot(self) -> Application {
        self.boot_with(Initializers::global())
    }

    /// Runs `initializers`, then the application's own, each exactly once.
    pub fn boot_with(mut self, initializers: &Initializers) -> Application {
        let mut all = initializers.snapshot();
        all.append(&mut self.initializers);

        let mut cx = BootContext { stack: &mut self.stack };
        for initializer in &all {
            debug!(initializer = initializer.name(), "running initializer");
            initializer.initialize(&mut cx);
        }

        Application {
            layers: self.stack.names(),
            handler: self.stack.wrap(self.router.into_handler()),
        }
    }
}

fn parse_target(target: &str) -> Option<(&str, &str)> {
    let (controller, action) = target.split_once('#')?;
    let valid = |s: &str| !s.is_empty() && !s.contains('#');
    (valid(controller) && valid(action)).then_some((controller, action))
}

// ── Initializers ──────────────────────────────────────────────────────────────

/// What an initializer may change while the application boots.
pub struct BootContext<'a> {
    stack: &'a mut Stack,
}

impl BootContext<'_> {
    /// The application's middleware stack.
    pub fn middleware(&mut self) -> &mut Stack {
        &mut *self.stack
    }
}

/// Boot-time setup step.
pub trait Initializer: Send + Sync + 'static {
    /// Identifies the initializer in a registry; a name is registered at
    /// most once.
    fn name(&self) -> &'static str;

    fn initialize(&self, cx: &mut BootContext<'_>);
}

/// A registry of initializers. Clones share the registry.
#[derive(Clone, Default)]
pub struct Initializers {
    initializers: Arc<RwLock<Vec<Arc<dyn Initializer>>>>,
}

impl Initializers {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry [`ApplicationBuilder::boot`] uses.
    pub fn global() -> &'static Initializers {
        static GLOBAL: OnceLock<Initializers> = OnceLock::new();
        GLOBAL.get_or_init(Initializers::new)
    }

    /// Adds `initializer` unless one with the same name is already
    /// registered. Returns whether it was added.
    pub fn register(&self, initializer: impl Initializer) -> bool {
        let mut initializers = self.initializers.write();
        if initializers.iter().any(|i| i.name() == initializer.name()) {
            return false;
        }
        initializers.push(Arc::new(initializer));
        true
    }

    pub fn len(&self) -> usize {
        self.initializers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.initializers.read().is_empty()
    }

    fn snapshot(&self) -> Vec<Arc<dyn Initializer>> {
        self.initializers.read().clone()
    }
}

impl fmt::Debug for Initializers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Initializers").field("len", &self.len()).finish()
    }
}
