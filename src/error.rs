//! Unified error types.

use std::any::type_name;
use std::fmt;

/// The error type returned by waggle's fallible infrastructure operations.
///
/// Application-level failures never show up here. A handler that fails
/// returns a [`HandlerError`], which the instrumentation records and hands
/// back to the caller untouched.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Binding to a port or accepting a connection failed.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// The address passed to [`Server::bind`](crate::Server::bind) is not a
    /// valid `host:port` pair.
    #[error("invalid socket address `{addr}`")]
    Address {
        addr: String,
        #[source]
        source: std::net::AddrParseError,
    },

    /// Telemetry options could not be loaded.
    #[error("configuration error")]
    Config(#[from] config::ConfigError),
}

/// A failed handler invocation.
///
/// Wraps any error type and remembers the concrete type's name, which is what
/// the instrumentation reports as `request.error`. `HandlerError` does not
/// implement [`std::error::Error`] itself; that is what lets `?` convert every
/// error into it.
pub struct HandlerError {
    type_name: &'static str,
    inner: Box<dyn std::error::Error + Send + Sync + 'static>,
}

impl HandlerError {
    pub fn new<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self { type_name: type_name::<E>(), inner: Box::new(error) }
    }

    /// Fully-qualified name of the wrapped error's type.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// The wrapped error's message.
    pub fn message(&self) -> String {
        self.inner.to_string()
    }

    pub fn get_ref(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        &*self.inner
    }

    /// Returns the wrapped error if it is an `E`.
    pub fn downcast_ref<E: std::error::Error + 'static>(&self) -> Option<&E> {
        self.inner.downcast_ref::<E>()
    }

    pub fn into_inner(self) -> Box<dyn std::error::Error + Send + Sync + 'static> {
        self.inner
    }
}

impl<E> From<E> for HandlerError
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(error: E) -> Self {
        Self::new(error)
    }
}

impl fmt::Debug for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerError")
            .field("type", &self.type_name)
            .field("inner", &self.inner)
            .finish()
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}
