//! Application-attached fields.
//!
//! Handler code calls [`add_field`] to stage a field on the in-flight
//! request. The instrumentation attaches a [`FieldBuffer`] when the request
//! enters and drains it when the request leaves, publishing every staged
//! field under `app.`:
//!
//! ```rust
//! use waggle::{Request, Response, fields};
//!
//! async fn checkout(req: Request) -> Response {
//!     fields::add_field(&req, "cart_size", 3);
//!     fields::add_field(&req, "coupon", ""); // empty: skipped
//!     Response::text("ok")
//! }
//! ```

use std::sync::Arc;

use parking_lot::Mutex;

use crate::request::Request;
use crate::telemetry::Value;

/// Prefix under which staged fields appear on the event.
pub const APP_PREFIX: &str = "app.";

/// A value that may be "not set".
///
/// Empty strings and `None` are not set and are skipped entirely, so staging
/// them neither emits a field nor blanks out an earlier one.
pub trait FieldValue {
    fn into_field_value(self) -> Option<Value>;
}

impl FieldValue for &str {
    fn into_field_value(self) -> Option<Value> {
        (!self.is_empty()).then(|| Value::from(self))
    }
}

impl FieldValue for String {
    fn into_field_value(self) -> Option<Value> {
        (!self.is_empty()).then(|| Value::from(self))
    }
}

impl FieldValue for &String {
    fn into_field_value(self) -> Option<Value> {
        self.as_str().into_field_value()
    }
}

impl FieldValue for Value {
    fn into_field_value(self) -> Option<Value> {
        match self {
            Value::Str(s) => s.into_field_value(),
            other => Some(other),
        }
    }
}

impl<T: FieldValue> FieldValue for Option<T> {
    fn into_field_value(self) -> Option<Value> {
        self.and_then(FieldValue::into_field_value)
    }
}

macro_rules! scalar_field_values {
    ($($ty:ty),*) => {
        $(
            impl FieldValue for $ty {
                fn into_field_value(self) -> Option<Value> {
                    Some(Value::from(self))
                }
            }
        )*
    };
}

scalar_field_values!(bool, f32, f64, i8, i16, i32, i64, u8, u16, u32, u64, usize);

/// Request-scoped accumulator for application fields.
///
/// Clones share storage. Names are kept in staging order; staging a name
/// twice keeps the later value.
#[derive(Clone, Debug, Default)]
pub struct FieldBuffer(Arc<Mutex<Vec<(String, Value)>>>);

impl FieldBuffer {
    /// Attaches a fresh buffer to `req`, replacing any earlier one.
    pub fn attach(req: &mut Request) -> Self {
        let buffer = Self::default();
        req.extensions_mut().insert(buffer.clone());
        buffer
    }

    /// The buffer attached to `req`, if the request is instrumented.
    pub fn of(req: &Request) -> Option<&Self> {
        req.extensions().get::<Self>()
    }

    pub fn stage(&self, name: impl Into<String>, value: impl FieldValue) -> bool {
        let Some(value) = value.into_field_value() else {
            return false;
        };
        let name = name.into();
        let mut fields = self.0.lock();
        match fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = value,
            None => fields.push((name, value)),
        }
        true
    }

    /// Removes and returns everything staged so far. A second drain finds
    /// nothing.
    pub fn drain(&self) -> Vec<(String, Value)> {
        std::mem::take(&mut *self.0.lock())
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }
}

/// Stages `name = value` on the in-flight request.
///
/// Returns `false` when nothing was staged: the value was empty, or the
/// request is not instrumented.
pub fn add_field(req: &Request, name: impl Into<String>, value: impl FieldValue) -> bool {
    match FieldBuffer::of(req) {
        Some(buffer) => buffer.stage(name, value),
        None => false,
    }
}
