//! Micro-framework style applications.
//!
//! An [`App`] is a router, a middleware [`Stack`] and any number of mounted
//! child apps. Building one runs the registered construction [`Hooks`] for
//! the app and then for each mounted child, which is where auto-installed
//! middleware gets its chance to join the stack.
//!
//! ```rust
//! use waggle::{App, Request};
//!
//! async fn hello(req: Request) -> String {
//!     format!("Hello {}", req.param("name").unwrap_or("world"))
//! }
//!
//! let admin = App::builder().get("/stats", hello);
//! let app = App::builder()
//!     .get("/hello/:name", hello)
//!     .mount("/admin", admin)
//!     .build();
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use tracing::debug;

use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler, Handler};
use crate::method::Method;
use crate::middleware::{Layer, Stack};
use crate::request::Request;
use crate::router::Router;

/// Identity of a top-level application.
///
/// Mounted children report their root's id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AppId(u64);

impl AppId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "app#{}", self.0)
    }
}

/// A built application, ready to serve.
pub struct App {
    id: AppId,
    layers: Vec<&'static str>,
    handler: BoxedHandler,
}

impl App {
    pub fn builder() -> AppBuilder {
        AppBuilder::new()
    }

    pub fn id(&self) -> AppId {
        self.id
    }

    /// Names of the app's own layers, outermost first.
    pub fn layers(&self) -> &[&'static str] {
        &self.layers
    }

    pub fn into_handler(self) -> BoxedHandler {
        self.handler
    }
}

impl ErasedHandler for App {
    fn call(&self, req: Request) -> BoxFuture {
        self.handler.call(req)
    }
}

impl From<App> for BoxedHandler {
    fn from(app: App) -> Self {
        app.into_handler()
    }
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App").field("id", &self.id).field("layers", &self.layers).finish()
    }
}

/// Collects routes, layers and mounts for an [`App`].
#[derive(Default)]
pub struct AppBuilder {
    router: Router,
    stack: Stack,
    mounts: Vec<(String, AppBuilder)>,
}

impl AppBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// # Panics
    ///
    /// Panics if the path is malformed or conflicts with an existing route.
    pub fn on(mut self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.router = self.router.on(method, path, handler);
        self
    }

    pub fn get(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::Get, path, handler)
    }

    pub fn post(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::Post, path, handler)
    }

    pub fn put(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::Put, path, handler)
    }

    pub fn patch(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::Patch, path, handler)
    }

    pub fn delete(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::Delete, path, handler)
    }

    /// Adds a layer inside the ones added before it.
    pub fn layer(mut self, layer: impl Layer) -> Self {
        self.stack.push(layer);
        self
    }

    /// Serves `child` under `prefix`. The child is built together with this
    /// app and shares its identity.
    pub fn mount(mut self, prefix: &str, child: AppBuilder) -> Self {
        self.mounts.push((prefix.to_owned(), child));
        self
    }

    /// Builds the app, running the process-wide construction hooks.
    pub fn build(self) -> App {
        self.build_with(Hooks::global())
    }

    /// Builds the app, running `hooks`.
    pub fn build_with(self, hooks: &Hooks) -> App {
        let cx = ConstructContext { app: AppId::next(), nested: false };
        self.construct(hooks, cx)
    }

    fn construct(mut self, hooks: &Hooks, cx: ConstructContext) -> App {
        hooks.fire(cx, &mut self.stack);

        let mut router = self.router;
        for (prefix, child) in self.mounts {
            let child = child.construct(hooks, ConstructContext { nested: true, ..cx });
            router = router.mount(&prefix, child.into_handler());
        }

        debug!(app = %cx.app, nested = cx.nested, layers = ?self.stack, "app built");
        App {
            id: cx.app,
            layers: self.stack.names(),
            handler: self.stack.wrap(router.into_handler()),
        }
    }
}

// ── Construction hooks ────────────────────────────────────────────────────────

/// What a hook learns about the app being constructed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConstructContext {
    /// The top-level application.
    pub app: AppId,
    /// `true` for apps mounted inside another one.
    pub nested: bool,
}

/// Runs every time an app is constructed, before its stack is wrapped.
pub trait ConstructHook: Send + Sync + 'static {
    /// Identifies the hook in a registry; a name is registered at most once.
    fn name(&self) -> &'static str;

    fn on_construct(&self, cx: ConstructContext, stack: &mut Stack);
}

/// A registry of construction hooks.
///
/// Clones share the registry.
#[derive(Clone, Default)]
pub struct Hooks {
    hooks: Arc<RwLock<Vec<Arc<dyn ConstructHook>>>>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry [`AppBuilder::build`] uses.
    pub fn global() -> &'static Hooks {
        static GLOBAL: OnceLock<Hooks> = OnceLock::new();
        GLOBAL.get_or_init(Hooks::new)
    }

    /// Adds `hook` unless a hook with the same name is already registered.
    /// Returns whether it was added.
    pub fn register(&self, hook: impl ConstructHook) -> bool {
        let mut hooks = self.hooks.write();
        if hooks.iter().any(|h| h.name() == hook.name()) {
            return false;
        }
        hooks.push(Arc::new(hook));
        true
    }

    pub fn len(&self) -> usize {
        self.hooks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.read().is_empty()
    }

    fn fire(&self, cx: ConstructContext, stack: &mut Stack) {
        // Snapshot so a hook may register further hooks.
        let hooks = self.hooks.read().clone();
        for hook in hooks {
            hook.on_construct(cx, stack);
        }
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use parking_lot::Mutex;

    async fn hello(req: Request) -> String {
        format!("Hello {}", req.param("name").unwrap_or("world"))
    }

    fn get(uri: &str) -> Request {
        Request::from_http(http::Request::get(uri).body(Bytes::new()).unwrap(), None).unwrap()
    }

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<ConstructContext>>>);

    impl ConstructHook for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        fn on_construct(&self, cx: ConstructContext, _stack: &mut Stack) {
            self.0.lock().push(cx);
        }
    }

    #[test]
    fn hooks_fire_for_root_then_children_with_root_identity() {
        let hooks = Hooks::new();
        let recorder = Recorder::default();
        hooks.register(recorder.clone());

        let app = App::builder()
            .get("/", hello)
            .mount("/admin", App::builder().get("/", hello))
            .build_with(&hooks);

        let seen = recorder.0.lock().clone();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], ConstructContext { app: app.id(), nested: false });
        assert_eq!(seen[1], ConstructContext { app: app.id(), nested: true });
    }

    #[test]
    fn hooks_register_once_per_name() {
        let hooks = Hooks::new();
        assert!(hooks.register(Recorder::default()));
        assert!(!hooks.register(Recorder::default()));
        assert_eq!(hooks.len(), 1);
    }

    #[test]
    fn independent_apps_get_distinct_ids() {
        let hooks = Hooks::new();
        let a = App::builder().build_with(&hooks);
        let b = App::builder().build_with(&hooks);
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn mounted_apps_serve_under_their_prefix() {
        let app = App::builder()
            .get("/hello/:name", hello)
            .mount("/admin", App::builder().get("/hello/:name", hello))
            .build_with(&Hooks::new());

        let res = app.call(get("/admin/hello/bee")).await.unwrap();
        assert_eq!(res.body(), b"Hello bee");
        let res = app.call(get("/hello/wasp")).await.unwrap();
        assert_eq!(res.body(), b"Hello wasp");
    }
}
