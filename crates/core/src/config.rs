//! Watcher configuration
//!
//! Recognized keys:
//!
//! ```toml
//! latency = 250      # milliseconds; 0 or absent falls back to 250
//! hash = "blake3"    # optional content hashing for the polling backend
//! ```

use crate::error::{Result, WatchError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Latency used when none (or zero) is configured
pub const DEFAULT_LATENCY: Duration = Duration::from_millis(250);

/// Content hash comparator for the polling backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Blake3,
}

/// Options shared by every backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Poll interval for the polling backend, stream latency for FSEvents
    #[serde(with = "millis")]
    pub latency: Duration,

    /// When set, the polling backend also compares file contents
    pub hash: Option<HashAlgorithm>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            latency: DEFAULT_LATENCY,
            hash: None,
        }
    }
}

impl Config {
    /// Parse configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| WatchError::Config(e.to_string()))
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| WatchError::path(path, e))?;
        Self::from_toml_str(&text)
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_hash(mut self, hash: HashAlgorithm) -> Self {
        self.hash = Some(hash);
        self
    }

    /// Latency with the zero value replaced by the default
    pub fn effective_latency(&self) -> Duration {
        if self.latency.is_zero() {
            DEFAULT_LATENCY
        } else {
            self.latency
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
