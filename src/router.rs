//! Radix-tree request router.
//!
//! One tree per HTTP method, O(path-length) lookup. On a match the router
//! fills in the request's path parameters and, when the request carries a
//! [`RouteSlot`], records which declared route matched. That record is how
//! instrumentation reports `GET /hello/:name` instead of `/hello/Honeycomb`.

use std::collections::HashMap;
use std::sync::Arc;

use http::StatusCode;
use matchit::Router as MatchitRouter;
use parking_lot::Mutex;

use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler, Handler};
use crate::method::Method;
use crate::request::Request;
use crate::response::Response;

// ── Route records ─────────────────────────────────────────────────────────────

/// The route a request was dispatched to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteMatch {
    method: Method,
    pattern: String,
    params: Vec<(String, String)>,
}

impl RouteMatch {
    pub fn new(method: Method, pattern: impl Into<String>, params: Vec<(String, String)>) -> Self {
        Self { method, pattern: pattern.into(), params }
    }

    pub fn method(&self) -> Method { self.method }

    /// The pattern as declared, e.g. `/hello/:name`.
    pub fn pattern(&self) -> &str { &self.pattern }

    /// Matched path parameters followed by the route's declared defaults.
    pub fn params(&self) -> &[(String, String)] { &self.params }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }
}

/// Request-scoped slot the router writes its match into.
///
/// Attached by whoever wants to know the route after the request has been
/// handled. The last router to match wins, so a mounted child app reports
/// its own, more specific route, with the mount prefixes in front of it:
/// `/hello/:name` in an app mounted at `/api` is recorded as
/// `/api/hello/:name`.
#[derive(Clone, Debug, Default)]
pub struct RouteSlot(Arc<Mutex<Option<RouteMatch>>>);

impl RouteSlot {
    /// Attaches a fresh slot to `req` and returns a handle to it.
    pub fn attach(req: &mut Request) -> Self {
        let slot = Self::default();
        req.extensions_mut().insert(slot.clone());
        slot
    }

    pub fn get(&self) -> Option<RouteMatch> {
        self.0.lock().clone()
    }

    pub(crate) fn record(&self, matched: RouteMatch) {
        *self.0.lock() = Some(matched);
    }
}

// ── Router ────────────────────────────────────────────────────────────────────

#[derive(Clone)]
struct Endpoint {
    handler: BoxedHandler,
    pattern: Arc<str>,
    defaults: Arc<[(String, String)]>,
}

/// The request router.
///
/// Build it once at startup. Each registration returns `self` so calls chain.
/// Paths accept both `:name` / `*rest` and `{name}` / `{*rest}` parameter
/// syntax; the declared spelling is what gets reported.
pub struct Router {
    routes: HashMap<Method, MatchitRouter<Endpoint>>,
    // Prefix → handler, tried in order when no route matches.
    mounts: Vec<(String, BoxedHandler)>,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: HashMap::new(), mounts: Vec::new() }
    }

    /// Register a handler for a method + path pair.
    ///
    /// # Panics
    ///
    /// Panics if the path is malformed or conflicts with an existing route.
    pub fn on(self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.insert(method, path, Vec::new(), handler.into_boxed_handler())
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

    /// Registers an already-boxed handler with default parameters that are
    /// reported alongside the matched ones (e.g. `controller`, `action`).
    pub(crate) fn insert(
        mut self,
        method: Method,
        path: &str,
        defaults: Vec<(String, String)>,
        handler: BoxedHandler,
    ) -> Self {
        let endpoint = Endpoint {
            handler,
            pattern: Arc::from(path),
            defaults: Arc::from(defaults),
        };
        self.routes
            .entry(method)
            .or_default()
            .insert(matchit_path(path), endpoint)
            .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
        self
    }

    /// Hands every request under `prefix` to `handler`, with the prefix
    /// removed from the path it routes on.
    ///
    /// # Panics
    ///
    /// Panics if `prefix` does not start with `/` or is the root itself.
    pub(crate) fn mount(mut self, prefix: &str, handler: BoxedHandler) -> Self {
        let prefix = prefix.trim_end_matches('/');
        assert!(
            prefix.starts_with('/'),
            "invalid mount prefix `{prefix}`: must start with `/` and not be `/`"
        );
        self.mounts.push((prefix.to_owned(), handler));
        self
    }

    fn mounted(&self, path: &str) -> Option<(&str, BoxedHandler, String)> {
        self.mounts.iter().find_map(|(prefix, handler)| {
            let rest = path.strip_prefix(prefix.as_str())?;
            let rest = match rest {
                "" => "/".to_owned(),
                _ if rest.starts_with('/') => rest.to_owned(),
                _ => return None,
            };
            Some((prefix.as_str(), Arc::clone(handler), rest))
        })
    }

    pub(crate) fn lookup(&self, method: Method, path: &str) -> Option<(BoxedHandler, RouteMatch)> {
        let tree = self.routes.get(&method)?;
        let matched = tree.at(path).ok()?;
        let endpoint = matched.value;
        let mut params: Vec<(String, String)> = matched.params.iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        params.extend(endpoint.defaults.iter().cloned());
        let route = RouteMatch::new(method, endpoint.pattern.as_ref(), params);
        Some((Arc::clone(&endpoint.handler), route))
    }

    /// Turns the routing table into a handler answering `404 Not Found` for
    /// unmatched requests.
    pub fn into_handler(self) -> BoxedHandler {
        Arc::new(self)
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}

impl From<Router> for BoxedHandler {
    fn from(router: Router) -> Self {
        router.into_handler()
    }
}

impl ErasedHandler for Router {
    fn call(&self, mut req: Request) -> BoxFuture {
        let Some((handler, mut route)) = self.lookup(req.method, &req.route_path) else {
            if let Some((prefix, child, rest)) = self.mounted(&req.route_path) {
                req.mount_prefix.push_str(prefix);
                req.route_path = rest;
                return child.call(req);
            }
            return Box::pin(async { Ok(Response::status(StatusCode::NOT_FOUND)) });
        };
        if !req.mount_prefix.is_empty() {
            route.pattern = match route.pattern.as_str() {
                "/" => req.mount_prefix.clone(),
                pattern => format!("{}{pattern}", req.mount_prefix),
            };
        }
        for (k, v) in route.params() {
            req.params.insert(k.clone(), v.clone());
        }
        if let Some(slot) = req.extensions().get::<RouteSlot>() {
            slot.record(route);
        }
        handler.call(req)
    }
}

/// Rewrites `:name` and `*rest` segments into matchit's `{name}` / `{*rest}`.
fn matchit_path(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if let Some(name) = segment.strip_prefix(':') {
                format!("{{{name}}}")
            } else if let Some(name) = segment.strip_prefix('*') {
                format!("{{*{name}}}")
            } else {
                segment.to_owned()
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}
