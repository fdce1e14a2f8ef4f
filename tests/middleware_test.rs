mod common;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use waggle::fields::FieldBuffer;
use waggle::handler::{BoxedHandler, ErasedHandler, boxed};
use waggle::middleware::{Instrument, Layer, Routing};
use waggle::telemetry::{Event, MemoryClient, Value};
use waggle::trace::W3cTracer;
use waggle::{AddField, App, Application, Hooks, Initializers, Request, Response, StatusCode};

use common::{Captured, get};

#[derive(Debug, thiserror::Error)]
#[error("out of {0}")]
struct OutOfStock(&'static str);

async fn hello(req: Request) -> String {
    format!("Hello {}", req.param("name").unwrap_or("world"))
}

async fn eels(req: Request) -> Response {
    req.add_field("hovercraft_contents", "eels");
    req.add_field("empty", "");
    Response::text("my hovercraft is full")
}

async fn sold_out(req: Request) -> Result<Response, OutOfStock> {
    req.add_field("attempted", true);
    Err(OutOfStock("honey"))
}

async fn explode(_req: Request) -> &'static str {
    panic!("hive collapse")
}

fn instrument(client: &MemoryClient) -> Instrument {
    Instrument::builder()
        .client(Arc::new(client.clone()))
        .package("hive", "0.9.0")
        .build()
}

fn wrapped(client: &MemoryClient, handler: BoxedHandler) -> BoxedHandler {
    instrument(client).layer(handler)
}

fn str_field<'a>(event: &'a Event, name: &str) -> Option<&'a str> {
    event.get(name).and_then(Value::as_str)
}

#[tokio::test]
async fn normal_completion_sends_one_event() {
    let client = MemoryClient::new();
    let handler = wrapped(&client, boxed(eels));

    let res = handler.call(get("/hovercraft")).await.unwrap();
    assert_eq!(res.status_code(), StatusCode::OK);

    let events = client.events();
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.get("response.status_code"), Some(&Value::Int(200)));
    assert!(event.get("duration_ms").and_then(Value::as_f64).unwrap() >= 0.0);
    assert_eq!(str_field(event, "name"), Some("GET /hovercraft"));
    assert_eq!(str_field(event, "request.host"), Some("bees.example"));
    assert_eq!(str_field(event, "request.remote_addr"), Some("192.0.2.10"));
    assert_eq!(str_field(event, "request.header.user_agent"), Some("waggle-test"));
    assert!(!event.contains("request.error"));
}

#[tokio::test]
async fn application_fields_are_namespaced() {
    let client = MemoryClient::new();
    wrapped(&client, boxed(eels)).call(get("/")).await.unwrap();

    let event = &client.events()[0];
    assert_eq!(str_field(event, "app.hovercraft_contents"), Some("eels"));
    assert!(!event.contains("app.empty"));
    assert!(!event.contains("hovercraft_contents"));
}

#[tokio::test]
async fn field_buffer_is_drained_when_the_request_ends() {
    let client = MemoryClient::new();
    let kept: Arc<std::sync::Mutex<Option<FieldBuffer>>> = Arc::default();
    let slot = Arc::clone(&kept);
    let handler = wrapped(&client, boxed(move |req: Request| {
        *slot.lock().unwrap() = FieldBuffer::of(&req).cloned();
        req.add_field("step", 1);
        async { "done" }
    }));

    handler.call(get("/")).await.unwrap();

    let buffer = kept.lock().unwrap().take().unwrap();
    assert!(buffer.is_empty());
    assert_eq!(client.events()[0].get("app.step"), Some(&Value::from(1)));
}

#[tokio::test]
async fn query_string_only_when_present() {
    let client = MemoryClient::new();
    let handler = wrapped(&client, boxed(hello));

    handler.call(get("/?q=bees&password=secret")).await.unwrap();
    handler.call(get("/")).await.unwrap();
    handler.call(get("/?")).await.unwrap();

    let events = client.events();
    assert_eq!(str_field(&events[0], "request.query_string"), Some("q=bees&password=secret"));
    assert_eq!(str_field(&events[0], "request.path"), Some("/"));
    assert!(!events[1].contains("request.query_string"));
    assert!(!events[2].contains("request.query_string"));
}

#[tokio::test]
async fn handler_error_is_recorded_and_returned_unchanged() {
    let client = MemoryClient::new();
    let handler = wrapped(&client, boxed(sold_out));

    let err = handler.call(get("/buy")).await.unwrap_err();
    assert_eq!(err.downcast_ref::<OutOfStock>().map(|e| e.0), Some("honey"));

    let events = client.events();
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert!(str_field(event, "request.error").unwrap().ends_with("OutOfStock"));
    assert_eq!(str_field(event, "request.error_detail"), Some("out of honey"));
    assert_eq!(event.get("app.attempted"), Some(&Value::Bool(true)));
    assert!(!event.contains("response.status_code"));
    assert!(event.contains("duration_ms"));
}

#[tokio::test]
async fn panics_are_recorded_then_resumed() {
    let client = MemoryClient::new();
    let handler = wrapped(&client, boxed(explode));

    let outcome = AssertUnwindSafe(handler.call(get("/"))).catch_unwind().await;
    let payload = outcome.err().expect("panic should propagate");
    assert_eq!(payload.downcast_ref::<&str>(), Some(&"hive collapse"));

    let events = client.events();
    assert_eq!(events.len(), 1);
    assert_eq!(str_field(&events[0], "request.error"), Some("panic"));
    assert_eq!(str_field(&events[0], "request.error_detail"), Some("hive collapse"));
}

#[tokio::test]
async fn static_metadata_is_constant() {
    let client = MemoryClient::new();
    let handler = wrapped(&client, boxed(hello));
    for _ in 0..3 {
        handler.call(get("/")).await.unwrap();
    }

    let events = client.events();
    assert_eq!(events.len(), 3);
    for event in &events {
        assert_eq!(str_field(event, "type"), Some("http_server"));
        assert_eq!(str_field(event, "meta.package"), Some("hive"));
        assert_eq!(str_field(event, "meta.package_version"), Some("0.9.0"));
        assert_eq!(event.get("meta.local_hostname"), events[0].get("meta.local_hostname"));
    }
}

#[tokio::test]
async fn pattern_routing_reports_declared_route() {
    let client = MemoryClient::new();
    let app = App::builder()
        .layer(
            Instrument::builder()
                .client(Arc::new(client.clone()))
                .routing(Routing::Pattern)
                .build(),
        )
        .get("/hello/:name", hello)
        .build_with(&Hooks::new());

    let res = app.call(get("/hello/Honeycomb")).await.unwrap();
    assert_eq!(res.body(), b"Hello Honeycomb");

    let event = &client.events()[0];
    assert_eq!(str_field(event, "name"), Some("GET /hello/:name"));
    assert_eq!(str_field(event, "request.route"), Some("GET /hello/:name"));
    assert_eq!(str_field(event, "request.path"), Some("/hello/Honeycomb"));
    assert!(!event.contains("request.params.name"));
}

#[tokio::test]
async fn controller_routing_reports_target_on_both_paths() {
    let client = MemoryClient::new();
    let app = Application::builder()
        .layer(
            Instrument::builder()
                .client(Arc::new(client.clone()))
                .routing(Routing::Controller)
                .build(),
        )
        .get("/hello/:name", "hello#show", hello)
        .post("/hello/:name", "hello#buy", sold_out)
        .boot_with(&Initializers::new());

    app.call(get("/hello/Honeycomb")).await.unwrap();
    app.call(common::request(http::Request::post("/hello/Honeycomb")))
        .await
        .unwrap_err();

    let events = client.events();
    assert_eq!(events.len(), 2);

    let shown = &events[0];
    assert_eq!(str_field(shown, "name"), Some("hello#show"));
    assert_eq!(str_field(shown, "request.route"), Some("GET /hello/:name"));
    assert_eq!(str_field(shown, "request.params.name"), Some("Honeycomb"));
    assert_eq!(str_field(shown, "request.controller"), Some("hello"));
    assert_eq!(str_field(shown, "request.action"), Some("show"));

    let failed = &events[1];
    assert_eq!(str_field(failed, "name"), Some("hello#buy"));
    assert_eq!(str_field(failed, "request.action"), Some("buy"));
    assert!(failed.contains("request.error"));
}

#[tokio::test]
async fn unmatched_routes_log_a_diagnostic() {
    let client = MemoryClient::new();
    let captured = Captured::default();
    let app = App::builder()
        .layer(
            Instrument::builder()
                .client(Arc::new(client.clone()))
                .routing(Routing::Pattern)
                .logger(captured.dispatch())
                .build(),
        )
        .get("/hello/:name", hello)
        .build_with(&Hooks::new());

    let res = app.call(get("/nowhere")).await.unwrap();
    assert_eq!(res.status_code(), StatusCode::NOT_FOUND);

    let event = &client.events()[0];
    assert_eq!(str_field(event, "name"), Some("GET /nowhere"));
    assert_eq!(event.get("response.status_code"), Some(&Value::Int(404)));
    assert!(captured.text().contains("no route matched"));
}

#[tokio::test]
async fn traced_requests_carry_correlation_ids() {
    let client = MemoryClient::new();
    let handler = Instrument::builder()
        .client(Arc::new(client.clone()))
        .tracer(Arc::new(W3cTracer))
        .service_name("hive")
        .build()
        .layer(boxed(hello));

    handler.call(get("/")).await.unwrap();
    handler
        .call(common::request(http::Request::get("/").header(
            "traceparent",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
        )))
        .await
        .unwrap();

    let events = client.events();
    let root = &events[0];
    assert_eq!(root.get("trace.trace_id"), root.get("trace.span_id"));
    assert_eq!(str_field(root, "service_name"), Some("hive"));
    assert!(!root.contains("trace.parent_id"));

    let continued = &events[1];
    assert_eq!(str_field(continued, "trace.trace_id"), Some("4bf92f3577b34da6a3ce929d0e0e4736"));
    assert_eq!(str_field(continued, "trace.parent_id"), Some("00f067aa0ba902b7"));
    assert_ne!(continued.get("trace.span_id"), continued.get("trace.trace_id"));
}

#[tokio::test]
async fn nested_instrumentation_joins_the_outer_trace() {
    let outer_client = MemoryClient::new();
    let inner_client = MemoryClient::new();
    let traced = |client: &MemoryClient| {
        Instrument::builder()
            .client(Arc::new(client.clone()))
            .tracer(Arc::new(W3cTracer))
            .build()
    };

    let inner = traced(&inner_client).layer(boxed(hello));
    let handler = traced(&outer_client).layer(inner);
    handler.call(get("/")).await.unwrap();

    let outer = &outer_client.events()[0];
    let inner = &inner_client.events()[0];
    assert_eq!(inner.get("trace.trace_id"), outer.get("trace.trace_id"));
    assert_eq!(inner.get("trace.parent_id"), outer.get("trace.span_id"));
    assert_ne!(inner.get("trace.span_id"), outer.get("trace.span_id"));
}

#[tokio::test]
async fn without_a_tracer_no_trace_fields_are_added() {
    let client = MemoryClient::new();
    wrapped(&client, boxed(hello)).call(get("/")).await.unwrap();

    let event = &client.events()[0];
    assert!(!event.contains("trace.trace_id"));
    assert!(!event.contains("service_name"));
}
