//! Automatic installation of the instrumentation.
//!
//! [`AutoInstall`] looks for the host frameworks in an [`Inventory`] and
//! registers itself with each one it can use:
//!
//! - [`App`](crate::App): a construction hook puts [`Instrument`] in front of
//!   the top-level app's stack the first time the app is constructed. Apps
//!   mounted inside it are constructed again under the same identity, which
//!   cannot be instrumented reliably, so that path only warns, and only once.
//! - [`Application`](crate::Application): a boot initializer appends
//!   [`Instrument`] to the stack.
//!
//! ```rust
//! use std::sync::Arc;
//! use waggle::attach::{AutoInstall, Inventory};
//! use waggle::telemetry::MemoryClient;
//!
//! let auto = AutoInstall::new(Arc::new(MemoryClient::new()));
//! if auto.available(&Inventory::builtin()) {
//!     auto.install_global();
//! }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::app::{AppId, ConstructContext, ConstructHook, Hooks};
use crate::application::{BootContext, Initializer, Initializers};
use crate::fields::{self, FieldValue};
use crate::logger::{Logger, with_logger};
use crate::middleware::{Instrument, Routing, Stack};
use crate::request::Request;
use crate::telemetry::Client;

// ── Detection ─────────────────────────────────────────────────────────────────

/// A host framework the instrumentation can attach to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Framework {
    /// Micro-framework apps built with [`AppBuilder`](crate::AppBuilder).
    App,
    /// Full-stack applications booted with
    /// [`ApplicationBuilder`](crate::ApplicationBuilder).
    Application,
}

impl Framework {
    pub const ALL: [Framework; 2] = [Framework::App, Framework::Application];

    /// The component name the framework is listed under.
    pub fn component(self) -> &'static str {
        match self {
            Self::App => "app",
            Self::Application => "application",
        }
    }
}

impl fmt::Display for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.component())
    }
}

/// A named, versioned component.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Component {
    pub name: String,
    pub version: String,
}

/// The components available to the process.
#[derive(Clone, Debug, Default)]
pub struct Inventory {
    components: Vec<Component>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) a component.
    pub fn with(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        let name = name.into();
        self.components.retain(|c| c.name != name);
        self.components.push(Component { name, version: version.into() });
        self
    }

    /// The frameworks compiled into this crate.
    pub fn builtin() -> Self {
        Framework::ALL
            .into_iter()
            .fold(Self::new(), |inv, fw| inv.with(fw.component(), env!("CARGO_PKG_VERSION")))
    }

    pub fn find(&self, name: &str) -> Option<&Component> {
        self.components.iter().find(|c| c.name == name)
    }
}

/// Result of probing for a framework.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Presence {
    Absent,
    /// Present, but at a version the instrumentation was not built against.
    Incompatible { version: String },
    Usable { version: String },
}

impl Presence {
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Usable { .. })
    }
}

/// Looks `framework` up in `inventory`.
///
/// A version is usable when it is semver-compatible with this crate's:
/// same major version, or same minor version while the major is `0`.
pub fn probe(inventory: &Inventory, framework: Framework) -> Presence {
    let Some(component) = inventory.find(framework.component()) else {
        return Presence::Absent;
    };
    let version = component.version.clone();
    match (major_minor(&version), major_minor(env!("CARGO_PKG_VERSION"))) {
        (Some(found), Some(ours)) if compatible(found, ours) => Presence::Usable { version },
        _ => Presence::Incompatible { version },
    }
}

fn major_minor(version: &str) -> Option<(u64, u64)> {
    let mut parts = version.trim().split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().map_or(Some(0), |m| m.parse().ok())?;
    Some((major, minor))
}

fn compatible(found: (u64, u64), ours: (u64, u64)) -> bool {
    match ours {
        (0, minor) => found == (0, minor),
        (major, _) => found.0 == major,
    }
}

// ── Installation state ────────────────────────────────────────────────────────

/// Where an application is in the installation lifecycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InstallState {
    #[default]
    NotInstalled,
    Installed,
    /// Constructed again after installation and warned about it. Terminal.
    WarnedOnce,
}

/// Installation state per top-level application. Clones share the state.
#[derive(Clone, Debug, Default)]
pub struct Installations {
    states: Arc<Mutex<HashMap<AppId, InstallState>>>,
}

impl Installations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, app: AppId) -> InstallState {
        self.states.lock().get(&app).copied().unwrap_or_default()
    }

    /// Records one more construction of `app` and returns the state it was
    /// in before.
    fn advance(&self, app: AppId) -> InstallState {
        let mut states = self.states.lock();
        let state = states.entry(app).or_default();
        let before = *state;
        *state = match before {
            InstallState::NotInstalled => InstallState::Installed,
            InstallState::Installed | InstallState::WarnedOnce => InstallState::WarnedOnce,
        };
        before
    }
}

// ── AutoInstall ───────────────────────────────────────────────────────────────

/// Installs the instrumentation into every usable framework.
pub struct AutoInstall {
    client: Arc<dyn Client>,
    logger: Option<Logger>,
    installations: Installations,
}

impl AutoInstall {
    pub fn new(client: Arc<dyn Client>) -> Self {
        Self { client, logger: None, installations: Installations::new() }
    }

    /// Sends detection and installation diagnostics to `logger`.
    pub fn logger(mut self, logger: Logger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn installations(&self) -> &Installations {
        &self.installations
    }

    /// Whether any supported framework is usable.
    pub fn available(&self, inventory: &Inventory) -> bool {
        let mut any = false;
        for framework in Framework::ALL {
            let presence = probe(inventory, framework);
            with_logger(self.logger.as_ref(), || match &presence {
                Presence::Absent => debug!(%framework, "framework not detected"),
                Presence::Incompatible { version } => {
                    debug!(%framework, %version, "framework detected at an unsupported version")
                }
                Presence::Usable { version } => debug!(%framework, %version, "framework detected"),
            });
            any |= presence.is_usable();
        }
        if !any {
            with_logger(self.logger.as_ref(), || {
                debug!("couldn't detect a web framework, not installing instrumentation")
            });
        }
        any
    }

    /// Registers with every usable framework in `inventory` and returns the
    /// frameworks it newly registered with.
    ///
    /// Registration is keyed by name, so installing again into the same
    /// registries adds nothing and every app still gets one instrumentation
    /// layer.
    pub fn install(
        &self,
        inventory: &Inventory,
        hooks: &Hooks,
        initializers: &Initializers,
    ) -> Vec<Framework> {
        let mut installed = Vec::new();
        for framework in Framework::ALL {
            let Presence::Usable { version } = probe(inventory, framework) else {
                continue;
            };
            let added = match framework {
                Framework::App => hooks.register(AppHook {
                    client: Arc::clone(&self.client),
                    logger: self.logger.clone(),
                    version,
                    installations: self.installations.clone(),
                }),
                Framework::Application => initializers.register(ApplicationInit {
                    client: Arc::clone(&self.client),
                    logger: self.logger.clone(),
                    version,
                }),
            };
            if !added {
                with_logger(self.logger.as_ref(), || debug!(%framework, "auto-install already registered"));
                continue;
            }
            with_logger(self.logger.as_ref(), || debug!(%framework, "auto-install registered"));
            installed.push(framework);
        }
        installed
    }

    /// [`install`](Self::install) with the builtin inventory and the
    /// process-wide registries.
    pub fn install_global(&self) -> Vec<Framework> {
        self.install(&Inventory::builtin(), Hooks::global(), Initializers::global())
    }
}

impl fmt::Debug for AutoInstall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutoInstall")
            .field("installations", &self.installations)
            .finish_non_exhaustive()
    }
}

fn instrument(
    client: &Arc<dyn Client>,
    logger: Option<&Logger>,
    framework: Framework,
    version: &str,
    routing: Routing,
) -> Instrument {
    let mut builder = Instrument::builder()
        .client(Arc::clone(client))
        .package(framework.component(), version)
        .routing(routing);
    if let Some(logger) = logger {
        builder = builder.logger(logger.clone());
    }
    builder.build()
}

struct AppHook {
    client: Arc<dyn Client>,
    logger: Option<Logger>,
    version: String,
    installations: Installations,
}

const HOOK_NAME: &str = "waggle.instrument";

impl ConstructHook for AppHook {
    fn name(&self) -> &'static str {
        HOOK_NAME
    }

    fn on_construct(&self, cx: ConstructContext, stack: &mut Stack) {
        match self.installations.advance(cx.app) {
            InstallState::NotInstalled => {
                with_logger(self.logger.as_ref(), || {
                    debug!(app = %cx.app, "adding instrumentation to app");
                });
                stack.push_front(instrument(
                    &self.client,
                    self.logger.as_ref(),
                    Framework::App,
                    &self.version,
                    Routing::Pattern,
                ));
            }
            InstallState::Installed => with_logger(self.logger.as_ref(), || {
                warn!(
                    app = %cx.app,
                    nested = cx.nested,
                    "auto-instrumentation of composed apps will probably not work, try manual installation"
                );
            }),
            InstallState::WarnedOnce => {}
        }
    }
}

struct ApplicationInit {
    client: Arc<dyn Client>,
    logger: Option<Logger>,
    version: String,
}

impl Initializer for ApplicationInit {
    fn name(&self) -> &'static str {
        HOOK_NAME
    }

    fn initialize(&self, cx: &mut BootContext<'_>) {
        cx.middleware().push(instrument(
            &self.client,
            self.logger.as_ref(),
            Framework::Application,
            &self.version,
            Routing::Controller,
        ));
        with_logger(self.logger.as_ref(), || debug!("added instrumentation to application"));
    }
}

// ── Request extension ─────────────────────────────────────────────────────────

/// `req.add_field(..)` for handlers of instrumented apps.
pub trait AddField {
    /// See [`fields::add_field`].
    fn add_field(&self, name: impl Into<String>, value: impl FieldValue) -> bool;
}

impl AddField for Request {
    fn add_field(&self, name: impl Into<String>, value: impl FieldValue) -> bool {
        fields::add_field(self, name, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::App;
    use crate::telemetry::MemoryClient;

    #[test]
    fn probe_reports_three_states() {
        let inventory = Inventory::new()
            .with("app", env!("CARGO_PKG_VERSION"))
            .with("application", "99.0.0");
        assert!(probe(&inventory, Framework::App).is_usable());
        assert_eq!(
            probe(&inventory, Framework::Application),
            Presence::Incompatible { version: "99.0.0".into() }
        );
        assert_eq!(probe(&Inventory::new(), Framework::App), Presence::Absent);
    }

    #[test]
    fn unparsable_versions_are_incompatible() {
        let inventory = Inventory::new().with("app", "latest");
        assert!(matches!(probe(&inventory, Framework::App), Presence::Incompatible { .. }));
    }

    #[test]
    fn builtin_inventory_is_usable() {
        let inventory = Inventory::builtin();
        for framework in Framework::ALL {
            assert!(probe(&inventory, framework).is_usable(), "{framework}");
        }
    }

    #[test]
    fn version_compatibility() {
        assert!(compatible((0, 3), (0, 3)));
        assert!(!compatible((0, 4), (0, 3)));
        assert!(compatible((1, 9), (1, 2)));
        assert!(!compatible((2, 0), (1, 2)));
        assert_eq!(major_minor("1"), Some((1, 0)));
        assert_eq!(major_minor("1.x"), None);
    }

    #[test]
    fn state_machine_installs_then_warns_once() {
        let installations = Installations::new();
        let hooks = Hooks::new();
        let app = App::builder().build_with(&hooks);
        let id = app.id();

        assert_eq!(installations.state(id), InstallState::NotInstalled);
        assert_eq!(installations.advance(id), InstallState::NotInstalled);
        assert_eq!(installations.state(id), InstallState::Installed);
        assert_eq!(installations.advance(id), InstallState::Installed);
        assert_eq!(installations.advance(id), InstallState::WarnedOnce);
        assert_eq!(installations.state(id), InstallState::WarnedOnce);
    }

    #[test]
    fn install_registers_with_usable_frameworks_only() {
        let auto = AutoInstall::new(Arc::new(MemoryClient::new()));
        let hooks = Hooks::new();
        let initializers = Initializers::new();
        let inventory = Inventory::new().with("app", env!("CARGO_PKG_VERSION"));

        assert!(auto.available(&inventory));
        assert_eq!(auto.install(&inventory, &hooks, &initializers), vec![Framework::App]);
        assert_eq!(hooks.len(), 1);
        assert!(initializers.is_empty());

        assert!(!auto.available(&Inventory::new()));
    }

    #[test]
    fn second_install_registers_nothing() {
        let auto = AutoInstall::new(Arc::new(MemoryClient::new()));
        let hooks = Hooks::new();
        let initializers = Initializers::new();
        let inventory = Inventory::builtin();

        assert_eq!(auto.install(&inventory, &hooks, &initializers).len(), 2);
        assert!(auto.install(&inventory, &hooks, &initializers).is_empty());
        assert_eq!(hooks.len(), 1);
        assert_eq!(initializers.len(), 1);
    }
}
