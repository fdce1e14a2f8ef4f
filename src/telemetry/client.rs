use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{Event, Fields, Options, Value};

/// The telemetry transport boundary.
///
/// Anything that can hand out events and accept them back for delivery.
/// `send` is fire-and-forget: the caller never learns whether delivery
/// succeeded, and failures stay inside the client.
pub trait Client: Send + Sync + 'static {
    /// A new event, pre-populated with the client's own base fields.
    fn event(&self) -> Event {
        Event::new()
    }

    fn send(&self, event: Event);
}

static GLOBAL: OnceLock<Arc<dyn Client>> = OnceLock::new();

/// Registers the process-wide default client.
///
/// Only the first call wins; later calls get their client handed back.
pub fn set_global_client(client: Arc<dyn Client>) -> Result<(), Arc<dyn Client>> {
    GLOBAL.set(client)
}

/// The process-wide default client, if one was registered.
pub fn global_client() -> Option<Arc<dyn Client>> {
    GLOBAL.get().cloned()
}

// ── MemoryClient ──────────────────────────────────────────────────────────────

/// Records every sent event in memory.
///
/// Clones share the same record, so a test can keep one handle and give the
/// other to the middleware.
#[derive(Clone, Default)]
pub struct MemoryClient {
    events: Arc<Mutex<Vec<Event>>>,
    fields: Fields,
}

impl MemoryClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a base field to every event this client creates.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Snapshot of the events sent so far, oldest first.
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn reset(&self) {
        self.events.lock().clear();
    }
}

impl Client for MemoryClient {
    fn event(&self) -> Event {
        let mut event = Event::new();
        event.add(&self.fields);
        event
    }

    fn send(&self, event: Event) {
        self.events.lock().push(event);
    }
}

// ── LogClient ─────────────────────────────────────────────────────────────────

const USER_AGENT: &str = concat!("waggle/", env!("CARGO_PKG_VERSION"));

/// Writes each event as one JSON line through `tracing`.
///
/// Events go to target `waggle::events` at `INFO`, tagged with the dataset,
/// so whatever subscriber the process installs decides where they land.
pub struct LogClient {
    options: Options,
}

impl LogClient {
    pub fn new(options: Options) -> Self {
        debug!(
            dataset = %options.dataset,
            api_host = %options.api_host,
            has_write_key = options.write_key.is_some(),
            user_agent = USER_AGENT,
            "telemetry client created"
        );
        Self { options }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }
}

impl Client for LogClient {
    fn send(&self, event: Event) {
        match serde_json::to_string(&event) {
            Ok(line) => info!(target: "waggle::events", dataset = %self.options.dataset, "{line}"),
            Err(e) => warn!(error = %e, "failed to serialise telemetry event"),
        }
    }
}
