use std::fmt;

use config::{Config, Environment};
use serde::Deserialize;

use crate::error::Error;

/// Transport options forwarded to a freshly created client.
///
/// Loaded from `WAGGLE_*` environment variables by [`Options::from_env`].
#[derive(Clone, Deserialize)]
pub struct Options {
    #[serde(default)]
    pub write_key: Option<String>,
    #[serde(default = "default_dataset")]
    pub dataset: String,
    #[serde(default = "default_api_host")]
    pub api_host: String,
    /// Label reported as `service_name` on traced events.
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Options {
    /// Reads `WAGGLE_WRITE_KEY`, `WAGGLE_DATASET`, `WAGGLE_API_HOST` and
    /// `WAGGLE_SERVICE_NAME` from the process environment.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_source(None)
    }

    /// Like [`from_env`](Self::from_env), reading from `vars` instead of the
    /// process environment when given.
    pub fn from_source(vars: Option<config::Map<String, String>>) -> Result<Self, Error> {
        let options = Config::builder()
            .add_source(Environment::with_prefix("WAGGLE").source(vars))
            .build()?
            .try_deserialize()?;
        Ok(options)
    }
}

impl Default for Options {
    fn default() -> Self {
        Self {
            write_key: None,
            dataset: default_dataset(),
            api_host: default_api_host(),
            service_name: default_service_name(),
        }
    }
}

// The write key is a credential.
impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("write_key", &self.write_key.as_ref().map(|_| "<redacted>"))
            .field("dataset", &self.dataset)
            .field("api_host", &self.api_host)
            .field("service_name", &self.service_name)
            .finish()
    }
}

fn default_dataset() -> String {
    "waggle".to_string()
}

fn default_api_host() -> String {
    "https://api.honeycomb.io".to_string()
}

fn default_service_name() -> String {
    "waggle".to_string()
}
