//! Diagnostic logger override.
//!
//! Components that take an optional [`Logger`] emit their diagnostics through
//! it instead of the global subscriber. Diagnostics never influence events.

use tracing::Dispatch;

/// A `tracing` dispatcher used for diagnostics.
pub type Logger = Dispatch;

/// Runs `f` with `logger` as the default subscriber, or the ambient one when
/// no logger is given.
pub(crate) fn with_logger<R>(logger: Option<&Logger>, f: impl FnOnce() -> R) -> R {
    match logger {
        Some(dispatch) => tracing::dispatcher::with_default(dispatch, f),
        None => f(),
    }
}
