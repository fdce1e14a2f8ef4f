//! Distributed-trace correlation.
//!
//! Tracing is a capability, not a dependency: the instrumentation looks for a
//! [`Tracer`] (its own, or the process-wide one from [`set_global_tracer`])
//! and, when there is none, calls the next handler directly.
//!
//! With a tracer, each request runs inside a [`TraceContext`] scope. Code
//! further down the chain can read it with [`current`], and a nested
//! instrumented handler joins the trace as a child span instead of starting
//! a new one.

use std::future::Future;
use std::sync::{Arc, OnceLock};

use uuid::Uuid;

use crate::request::Request;

/// Where a request's trace comes from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Incoming {
    pub trace_id: String,
    /// The upstream span this request continues, if any.
    pub parent_id: Option<String>,
}

/// Supplies trace identity for requests entering the service.
pub trait Tracer: Send + Sync + 'static {
    fn incoming(&self, req: &Request) -> Incoming;

    fn span_id(&self) -> String {
        new_span_id()
    }
}

/// The trace scope a request is executing in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: String,
    pub span_id: String,
    pub parent_id: Option<String>,
}

impl TraceContext {
    /// A root span: the span id is the trace id.
    pub fn root(trace_id: String) -> Self {
        Self { span_id: trace_id.clone(), trace_id, parent_id: None }
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

tokio::task_local! {
    static CURRENT: TraceContext;
}

/// The trace scope of the running task, if any.
pub fn current() -> Option<TraceContext> {
    CURRENT.try_with(TraceContext::clone).ok()
}

/// Runs `fut` inside `cx`.
pub async fn scope<F: Future>(cx: TraceContext, fut: F) -> F::Output {
    CURRENT.scope(cx, fut).await
}

static GLOBAL: OnceLock<Arc<dyn Tracer>> = OnceLock::new();

/// Registers the process-wide tracer. Only the first call wins.
pub fn set_global_tracer(tracer: Arc<dyn Tracer>) -> Result<(), Arc<dyn Tracer>> {
    GLOBAL.set(tracer)
}

pub fn global_tracer() -> Option<Arc<dyn Tracer>> {
    GLOBAL.get().cloned()
}

// ── W3C trace context ─────────────────────────────────────────────────────────

/// Continues a valid `traceparent` header, otherwise starts a new trace.
#[derive(Clone, Copy, Debug, Default)]
pub struct W3cTracer;

impl Tracer for W3cTracer {
    fn incoming(&self, req: &Request) -> Incoming {
        match req.header("traceparent").and_then(parse_traceparent) {
            Some((trace_id, parent_id)) => Incoming { trace_id, parent_id: Some(parent_id) },
            None => Incoming { trace_id: new_trace_id(), parent_id: None },
        }
    }
}

/// 32 lowercase hex digits.
pub fn new_trace_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// 16 lowercase hex digits.
pub fn new_span_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(16);
    id
}

/// `version-traceid-parentid-flags`, e.g.
/// `00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01`.
fn parse_traceparent(header: &str) -> Option<(String, String)> {
    let mut parts = header.trim().split('-');
    let version = parts.next()?;
    let trace_id = parts.next()?;
    let parent_id = parts.next()?;
    let flags = parts.next()?;

    let valid = is_hex(version, 2)
        && version != "ff"
        && is_hex(trace_id, 32)
        && is_hex(parent_id, 16)
        && is_hex(flags, 2)
        && trace_id.bytes().any(|b| b != b'0')
        && parent_id.bytes().any(|b| b != b'0');
    // Version 00 has exactly four fields; later versions may append more.
    let trailing_ok = version != "00" || parts.next().is_none();

    (valid && trailing_ok).then(|| (trace_id.to_owned(), parent_id.to_owned()))
}

fn is_hex(s: &str, len: usize) -> bool {
    s.len() == len && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn request(traceparent: Option<&str>) -> Request {
        let mut req = http::Request::get("/");
        if let Some(tp) = traceparent {
            req = req.header("traceparent", tp);
        }
        Request::from_http(req.body(Bytes::new()).unwrap(), None).unwrap()
    }

    #[test]
    fn continues_valid_traceparent() {
        let req = request(Some("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01"));
        let incoming = W3cTracer.incoming(&req);
        assert_eq!(incoming.trace_id, "4bf92f3577b34da6a3ce929d0e0e4736");
        assert_eq!(incoming.parent_id.as_deref(), Some("00f067aa0ba902b7"));
    }

    #[test]
    fn rejects_malformed_traceparent() {
        for bad in [
            "garbage",
            "00-00000000000000000000000000000000-00f067aa0ba902b7-01",
            "00-4BF92F3577B34DA6A3CE929D0E0E4736-00f067aa0ba902b7-01",
            "ff-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01-extra",
        ] {
            let incoming = W3cTracer.incoming(&request(Some(bad)));
            assert!(incoming.parent_id.is_none(), "accepted {bad}");
            assert_eq!(incoming.trace_id.len(), 32);
        }
    }

    #[test]
    fn root_span_reuses_trace_id() {
        let cx = TraceContext::root(new_trace_id());
        assert_eq!(cx.trace_id, cx.span_id);
        assert!(cx.is_root());
        assert_eq!(new_span_id().len(), 16);
    }

    #[tokio::test]
    async fn scope_is_visible_inside_only() {
        assert!(current().is_none());
        let cx = TraceContext::root("abc".into());
        let seen = scope(cx.clone(), async { current() }).await;
        assert_eq!(seen, Some(cx));
        assert!(current().is_none());
    }
}
