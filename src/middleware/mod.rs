//! Middleware layer.
//!
//! A [`Layer`] wraps the next handler in the chain and returns a handler with
//! the same contract, so layers compose in any order. A [`Stack`] is the
//! ordered list an application assembles; the first layer is the outermost
//! and sees every request first.
//!
//! Built-in middleware:
//! - [`instrument`]: one telemetry event per request with method, path,
//!   status, latency, errors, route and application fields.

pub mod instrument;
mod route;

use std::fmt;
use std::sync::Arc;

use crate::handler::BoxedHandler;

pub use instrument::{Instrument, InstrumentBuilder, InstrumentedHandler, Routing};

/// Wraps a handler with cross-cutting behaviour.
pub trait Layer: Send + Sync + 'static {
    /// Short name used in logs and when listing a stack.
    fn name(&self) -> &'static str;

    fn layer(&self, inner: BoxedHandler) -> BoxedHandler;
}

/// An ordered middleware chain, outermost first.
#[derive(Clone, Default)]
pub struct Stack {
    layers: Vec<Arc<dyn Layer>>,
}

impl Stack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a layer inside the ones already present.
    pub fn push(&mut self, layer: impl Layer) {
        self.layers.push(Arc::new(layer));
    }

    /// Inserts a layer in front of every other one, making it the outermost.
    pub fn push_front(&mut self, layer: impl Layer) {
        self.layers.insert(0, Arc::new(layer));
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Layer names, outermost first.
    pub fn names(&self) -> Vec<&'static str> {
        self.layers.iter().map(|l| l.name()).collect()
    }

    /// Wraps `endpoint` so that the first layer runs first.
    pub fn wrap(&self, endpoint: BoxedHandler) -> BoxedHandler {
        self.layers
            .iter()
            .rev()
            .fold(endpoint, |inner, layer| layer.layer(inner))
    }
}

impl fmt::Debug for Stack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
