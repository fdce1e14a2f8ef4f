//! Telemetry events and the client boundary.
//!
//! An [`Event`] is a flat map of field names to scalar [`Value`]s. A
//! [`Client`] creates events and sends them; batching, delivery and retry
//! are the client's business. A [`Builder`] is the per-middleware template
//! holding the base fields every event starts with.

mod client;
mod options;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use http::StatusCode;
use serde::Serialize;

pub use client::{Client, LogClient, MemoryClient, global_client, set_global_client};
pub use options::Options;

/// A single field value.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view of integers and floats.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self { Self::Str(s.to_owned()) }
}

impl From<String> for Value {
    fn from(s: String) -> Self { Self::Str(s) }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self { Self::Str(s.clone()) }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self { Self::Bool(b) }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self { Self::Float(f) }
}

impl From<f32> for Value {
    fn from(f: f32) -> Self { Self::Float(f64::from(f)) }
}

macro_rules! int_values {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(i: $ty) -> Self { Self::Int(i64::from(i)) }
            }
        )*
    };
}

int_values!(i8, i16, i32, i64, u8, u16, u32);

// u64 and usize may not fit; keep their magnitude rather than wrapping.
impl From<u64> for Value {
    fn from(i: u64) -> Self {
        i64::try_from(i).map(Self::Int).unwrap_or(Self::Float(i as f64))
    }
}

impl From<usize> for Value {
    fn from(i: usize) -> Self {
        Self::from(i as u64)
    }
}

impl From<StatusCode> for Value {
    fn from(status: StatusCode) -> Self { Self::Int(i64::from(status.as_u16())) }
}

/// Field name → value.
pub type Fields = BTreeMap<String, Value>;

/// One telemetry record.
#[derive(Clone, Debug, Serialize)]
pub struct Event {
    #[serde(rename = "time")]
    timestamp: DateTime<Utc>,
    #[serde(rename = "data")]
    fields: Fields,
}

impl Event {
    pub fn new() -> Self {
        Self { timestamp: Utc::now(), fields: Fields::new() }
    }

    /// Sets `name`, replacing any earlier value.
    pub fn add_field(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Copies every field of `fields` onto the event.
    pub fn add(&mut self, fields: &Fields) {
        self.fields.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl Default for Event {
    fn default() -> Self { Self::new() }
}

/// Template for events sharing a set of base fields.
///
/// Built once (e.g. when a middleware is constructed) so that per-request
/// work is a copy, not a lookup.
#[derive(Clone)]
pub struct Builder {
    client: Arc<dyn Client>,
    fields: Fields,
}

impl Builder {
    pub fn new(client: Arc<dyn Client>) -> Self {
        Self { client, fields: Fields::new() }
    }

    pub fn add_field(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    /// A new event carrying the client's base fields, then this template's.
    pub fn event(&self) -> Event {
        let mut event = self.client.event();
        event.add(&self.fields);
        event
    }

    pub fn send(&self, event: Event) {
        self.client.send(event);
    }
}

impl fmt::Debug for Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder").field("fields", &self.fields).finish_non_exhaustive()
    }
}
