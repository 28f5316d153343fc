//! Server configuration: a JSON file plus command line overrides.
//!
//! ```json
//! {
//!   "notify": {
//!     "allow_filter_in_subscriptions": true,
//!     "publish_deletes": ["v1.1"],
//!     "changed_queue": { "workers": 4, "queue_size": 1000 },
//!     "broker_client": "mqtt",
//!     "broker": { "url": "tcp://broker:1883", "client_id": "sta-node-1" },
//!     "bus": { "kind": "mqtt", "broker": { "url": "tcp://broker:1883" } }
//!   }
//! }
//! ```
//!
//! Every key is optional; missing keys keep their defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use sta_notify::NotifyConfig;

use crate::error::{Result, ServerError};

/// Top-level configuration file
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub notify: NotifyConfig,
}

impl ServerConfig {
    /// Load a configuration file
    ///
    /// # Arguments
    /// * `path` - JSON file to read
    ///
    /// # Returns
    /// The parsed configuration, with the queue keys quoted in log lines set
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ServerError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: ServerConfig =
            serde_json::from_str(&text).map_err(|source| ServerError::ConfigParse {
                path: path.to_path_buf(),
                source,
            })?;
        config.notify = config.notify.with_default_keys();

        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load `path` if given, otherwise use the defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Apply command line overrides on top of the file
    pub fn apply(mut self, overrides: &Overrides) -> Self {
        let notify = &mut self.notify;
        if overrides.disable_notifications {
            notify.enabled = false;
        }
        if overrides.allow_filter {
            notify.allow_filter_in_subscriptions = true;
        }
        if let Some(kind) = &overrides.broker_client {
            notify.broker_client = kind.clone();
        }
        if let Some(url) = &overrides.broker_url {
            notify.broker.url = url.clone();
        }
        if let Some(kind) = &overrides.bus {
            notify.bus.kind = kind.clone();
        }
        if let Some(secs) = overrides.status_interval_secs {
            notify.status_log_interval = Duration::from_secs(secs);
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.notify.validate()?;
        Ok(())
    }
}

/// Settings that can be given on the command line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub config_path: Option<PathBuf>,
    pub disable_notifications: bool,
    pub allow_filter: bool,
    pub broker_client: Option<String>,
    pub broker_url: Option<String>,
    pub bus: Option<String>,
    pub status_interval_secs: Option<u64>,
}
