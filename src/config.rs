//! Configuration types.
//!
//! A run is described by a JSON document (lists plus run-wide defaults).
//! Transport and quota credentials come from the environment, see
//! [`crate::transport::smtp::SmtpConfig`] and [`crate::transport::quota::from_env`].

use std::io::Read;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::list::ListSpec;
use crate::transport::quota::QuotaOptions;

/// Rate ceiling used when the quota provider does not report one.
pub const DEFAULT_MAX_SEND_RATE: usize = 50;

/// Pacing interval used when neither the list nor the run sets one.
pub const DEFAULT_BATCH_INTERVAL_MS: u64 = 1000;

/// Per-list pacing settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSettings {
    /// Minimum time between two batch starts, in milliseconds.
    #[serde(default = "default_interval_ms", alias = "interval")]
    pub interval_ms: u64,
}

fn default_interval_ms() -> u64 {
    DEFAULT_BATCH_INTERVAL_MS
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_BATCH_INTERVAL_MS,
        }
    }
}

impl BatchSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Defaults applied to lists lacking their own settings.
#[derive(Debug, Clone)]
pub struct DispatchDefaults {
    /// Rate ceiling when the quota carries no usable rate.
    pub max_send_rate: usize,
    /// Pacing for lists without a `batch` section.
    pub batch: BatchSettings,
    /// Per-send timeout. `None` waits on the transport indefinitely.
    pub send_timeout: Option<Duration>,
}

impl Default for DispatchDefaults {
    fn default() -> Self {
        Self {
            max_send_rate: DEFAULT_MAX_SEND_RATE,
            batch: BatchSettings::default(),
            send_timeout: None,
        }
    }
}

/// A complete run description, as read from the command line or a file.
#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    /// Lists to deliver, in order.
    pub lists: Vec<ListSpec>,
    /// Pacing applied to lists without their own `batch` section.
    #[serde(default)]
    pub batch: Option<BatchSettings>,
    /// Fallback rate ceiling.
    #[serde(default)]
    pub max_send_rate: Option<usize>,
    /// Opt-in per-send timeout in milliseconds.
    #[serde(default)]
    pub send_timeout_ms: Option<u64>,
    /// Options forwarded verbatim to the quota provider.
    #[serde(default)]
    pub quota: QuotaOptions,
}

impl RunConfig {
    /// Parse a JSON run description.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read a JSON run description from a file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Resolve the command-line argument: inline JSON, `@path`, or stdin when absent.
    pub fn load(arg: Option<String>) -> Result<Self, ConfigError> {
        match arg {
            Some(arg) => match arg.strip_prefix('@') {
                Some(path) => Self::from_path(path),
                None => Self::from_json(&arg),
            },
            None => {
                let mut raw = String::new();
                std::io::stdin().read_to_string(&mut raw)?;
                Self::from_json(&raw)
            }
        }
    }

    /// Run-wide defaults, validated.
    pub fn defaults(&self) -> Result<DispatchDefaults, ConfigError> {
        let max_send_rate = match self.max_send_rate {
            Some(0) => {
                return Err(ConfigError::InvalidValue {
                    key: "max_send_rate".into(),
                    message: "must be at least 1".into(),
                });
            }
            Some(rate) => rate,
            None => DEFAULT_MAX_SEND_RATE,
        };

        let send_timeout = match self.send_timeout_ms {
            Some(0) => {
                return Err(ConfigError::InvalidValue {
                    key: "send_timeout_ms".into(),
                    message: "must be greater than zero".into(),
                });
            }
            other => other.map(Duration::from_millis),
        };

        Ok(DispatchDefaults {
            max_send_rate,
            batch: self.batch.unwrap_or_default(),
            send_timeout,
        })
    }
}
