//! Per-request telemetry events.
//!
//! [`Instrument`] wraps the next handler and sends exactly one event for each
//! request it sees, whether the handler returns a response, returns an error
//! or panics.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use waggle::middleware::{Instrument, Routing};
//! use waggle::telemetry::MemoryClient;
//! use waggle::{App, Request};
//!
//! async fn hello(req: Request) -> String {
//!     format!("Hello {}", req.param("name").unwrap_or("world"))
//! }
//!
//! let client = MemoryClient::new();
//! let app = App::builder()
//!     .layer(Instrument::builder().client(Arc::new(client)).routing(Routing::Pattern).build())
//!     .get("/hello/:name", hello)
//!     .build();
//! ```

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tracing::Instrument as _;

use super::{Layer, route};
use crate::fields::{APP_PREFIX, FieldBuffer};
use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler, HandlerResult};
use crate::logger::Logger;
use crate::request::Request;
use crate::router::RouteSlot;
use crate::telemetry::{self, Builder, Client, Event, LogClient, Options};
use crate::trace::{self, TraceContext, Tracer};

/// How route information is turned into event fields.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Routing {
    /// Keep the literal `"<METHOD> <PATH>"` name.
    #[default]
    Literal,
    /// Report the declared route pattern.
    Pattern,
    /// Report the pattern plus parameters and the `controller#action` target.
    Controller,
}

struct Shared {
    builder: Builder,
    routing: Routing,
    service_name: String,
    tracer: Option<Arc<dyn Tracer>>,
    logger: Option<Logger>,
}

/// The instrumentation layer.
///
/// Cheap to clone; clones share one base-field template and client.
#[derive(Clone)]
pub struct Instrument {
    shared: Arc<Shared>,
}

impl Instrument {
    /// Instrumentation sending to `client`, with default settings otherwise.
    pub fn new(client: Arc<dyn Client>) -> Self {
        Self::builder().client(client).build()
    }

    pub fn builder() -> InstrumentBuilder {
        InstrumentBuilder::default()
    }

    pub fn routing(&self) -> Routing {
        self.shared.routing
    }

    pub fn service_name(&self) -> &str {
        &self.shared.service_name
    }

    /// Wraps `inner` directly, outside of any [`Stack`](super::Stack).
    pub fn wrap(&self, inner: BoxedHandler) -> InstrumentedHandler {
        InstrumentedHandler { inner, shared: Arc::clone(&self.shared) }
    }
}

impl Layer for Instrument {
    fn name(&self) -> &'static str {
        "instrument"
    }

    fn layer(&self, inner: BoxedHandler) -> BoxedHandler {
        Arc::new(self.wrap(inner))
    }
}

/// Configures an [`Instrument`].
#[derive(Default)]
pub struct InstrumentBuilder {
    client: Option<Arc<dyn Client>>,
    options: Option<Options>,
    package: Option<(String, String)>,
    service_name: Option<String>,
    routing: Routing,
    tracer: Option<Arc<dyn Tracer>>,
    logger: Option<Logger>,
}

impl InstrumentBuilder {
    /// Sends events to `client` instead of the process-wide one.
    pub fn client(mut self, client: Arc<dyn Client>) -> Self {
        self.client = Some(client);
        self
    }

    /// Transport options for the client created when none is given or
    /// registered globally.
    pub fn options(mut self, options: Options) -> Self {
        self.options = Some(options);
        self
    }

    /// The `meta.package` / `meta.package_version` labels.
    pub fn package(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.package = Some((name.into(), version.into()));
        self
    }

    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    pub fn routing(mut self, routing: Routing) -> Self {
        self.routing = routing;
        self
    }

    pub fn tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    /// Sends diagnostics to `logger` instead of the global subscriber.
    pub fn logger(mut self, logger: Logger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn build(self) -> Instrument {
        let options = self.options.unwrap_or_default();
        let client: Arc<dyn Client> = match self.client.or_else(telemetry::global_client) {
            Some(client) => client,
            None => Arc::new(LogClient::new(options.clone())),
        };
        let (package, version) = self.package.unwrap_or_else(|| {
            (env!("CARGO_PKG_NAME").to_owned(), env!("CARGO_PKG_VERSION").to_owned())
        });

        let mut builder = Builder::new(client);
        builder.add_field("type", "http_server");
        builder.add_field("meta.package", package);
        builder.add_field("meta.package_version", version);
        builder.add_field("meta.local_hostname", gethostname::gethostname().to_string_lossy().into_owned());

        let shared = Shared {
            builder,
            routing: self.routing,
            service_name: self.service_name.unwrap_or(options.service_name),
            tracer: self.tracer,
            logger: self.logger,
        };
        Instrument { shared: Arc::new(shared) }
    }
}

/// A handler wrapped by [`Instrument`].
pub struct InstrumentedHandler {
    inner: BoxedHandler,
    shared: Arc<Shared>,
}

impl ErasedHandler for InstrumentedHandler {
    fn call(&self, req: Request) -> BoxFuture {
        let inner = Arc::clone(&self.inner);
        let shared = Arc::clone(&self.shared);
        Box::pin(async move { instrumented(inner, shared, req).await })
    }
}

async fn instrumented(inner: BoxedHandler, shared: Arc<Shared>, mut req: Request) -> HandlerResult {
    let mut event = shared.builder.event();
    add_request_fields(&mut event, &req);

    let buffer = FieldBuffer::attach(&mut req);
    let route = RouteSlot::attach(&mut req);
    let started = Instant::now();

    let tracer = shared.tracer.clone().or_else(trace::global_tracer);
    let outcome = match tracer {
        Some(tracer) => {
            let cx = start_trace(tracer.as_ref(), &req);
            event.add_field("trace.trace_id", cx.trace_id.as_str());
            event.add_field("trace.span_id", cx.span_id.as_str());
            if let Some(parent) = &cx.parent_id {
                event.add_field("trace.parent_id", parent.as_str());
            }
            event.add_field("service_name", shared.service_name.as_str());

            let span = tracing::info_span!(
                "request",
                method = %req.method(),
                path = %req.path(),
                trace_id = %cx.trace_id,
                span_id = %cx.span_id,
            );
            // The inner call is made inside the scope so a nested
            // instrumented handler sees this one as its parent.
            let call = trace::scope(cx, async move { inner.call(req).await }).instrument(span);
            AssertUnwindSafe(call).catch_unwind().await
        }
        None => AssertUnwindSafe(inner.call(req)).catch_unwind().await,
    };
    let elapsed = started.elapsed();

    match &outcome {
        Ok(Ok(res)) => event.add_field("response.status_code", res.status_code()),
        Ok(Err(err)) => {
            event.add_field("request.error", err.type_name());
            event.add_field("request.error_detail", err.message());
        }
        Err(payload) => {
            event.add_field("request.error", "panic");
            event.add_field("request.error_detail", panic_message(payload.as_ref()));
        }
    }

    route::record(&mut event, shared.routing, route.get(), shared.logger.as_ref());

    for (name, value) in buffer.drain() {
        event.add_field(format!("{APP_PREFIX}{name}"), value);
    }

    event.add_field("duration_ms", elapsed.as_secs_f64() * 1000.0);
    shared.builder.send(event);

    match outcome {
        Ok(result) => result,
        Err(payload) => std::panic::resume_unwind(payload),
    }
}

fn add_request_fields(event: &mut Event, req: &Request) {
    let method = req.method();
    let path = req.path();
    event.add_field("name", format!("{method} {path}"));
    event.add_field("request.method", method.as_str());
    event.add_field("request.path", path);
    event.add_field("request.protocol", req.scheme());
    event.add_field("request.http_version", req.http_version());
    if let Some(host) = req.host() {
        event.add_field("request.host", host);
    }
    if let Some(addr) = req.remote_addr() {
        event.add_field("request.remote_addr", addr.ip().to_string());
    }
    if let Some(agent) = req.user_agent() {
        event.add_field("request.header.user_agent", agent);
    }
    if let Some(query) = req.query() {
        event.add_field("request.query_string", query);
    }
}

/// Joins an enclosing trace scope, or asks the tracer where this request's
/// trace comes from.
fn start_trace(tracer: &dyn Tracer, req: &Request) -> TraceContext {
    if let Some(outer) = trace::current() {
        return TraceContext {
            trace_id: outer.trace_id,
            span_id: tracer.span_id(),
            parent_id: Some(outer.span_id),
        };
    }
    let incoming = tracer.incoming(req);
    match incoming.parent_id {
        None => TraceContext::root(incoming.trace_id),
        Some(parent) => TraceContext {
            trace_id: incoming.trace_id,
            span_id: tracer.span_id(),
            parent_id: Some(parent),
        },
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Box<dyn Any>".to_owned()
    }
}
