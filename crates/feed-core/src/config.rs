//! Service configuration
//!
//! Every field has a default, so an empty file is a valid configuration.

use crate::error::ConfigError;
use crate::rate::RolloutPolicy;
use feed_cache::ContentCache;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Session registry
    pub session: SessionConfig,
    /// Publish fan-out
    pub publish: PublishConfig,
    /// Pull reconciliation
    pub pull: PullConfig,
    /// Content cache
    pub cache: CacheConfig,
    /// In-process signal bus
    pub bus: BusConfig,
    /// Logging
    pub log: LogConfig,
}

impl FeedConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate TOML text
    ///
    /// # Errors
    /// Returns [`ConfigError::Parse`] or [`ConfigError::Invalid`]
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    ///
    /// # Errors
    /// Returns [`ConfigError::Io`] when the file cannot be read, otherwise as
    /// [`FeedConfig::from_toml_str`]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Reject values the services cannot run with
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] naming the offending key
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            (self.session.default_ttl_secs == 0, "session.default_ttl_secs"),
            (self.session.channel_capacity == 0, "session.channel_capacity"),
            (self.session.sweep_interval_secs == 0, "session.sweep_interval_secs"),
            (self.publish.delivery_timeout_ms == 0, "publish.delivery_timeout_ms"),
            (self.pull.deadline_ms == 0, "pull.deadline_ms"),
            (self.cache.max_bytes == 0, "cache.max_bytes"),
            (self.bus.capacity == 0, "bus.capacity"),
        ];
        match checks.iter().find(|(bad, _)| *bad) {
            Some((_, key)) => Err(ConfigError::Invalid(format!("{key} must be greater than 0"))),
            None => Ok(()),
        }
    }
}

/// Session registry settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Liveness timeout when the agent supplies none
    pub default_ttl_secs: u64,
    /// Minimum time between durable persists of the same session
    pub persist_interval_secs: u64,
    /// Period of the background expiry sweep
    pub sweep_interval_secs: u64,
    /// Capacity of each session's outbound channel
    pub channel_capacity: usize,
}

impl SessionConfig {
    /// Default TTL
    #[inline]
    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    /// Persist interval
    #[inline]
    #[must_use]
    pub fn persist_interval(&self) -> Duration {
        Duration::from_secs(self.persist_interval_secs)
    }

    /// Sweep interval
    #[inline]
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 60,
            persist_interval_secs: 300,
            sweep_interval_secs: 30,
            channel_capacity: 16,
        }
    }
}

/// Publish fan-out settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    /// Bounded wait for each enqueue
    pub delivery_timeout_ms: u64,
    /// Wave size; 0 delivers everything in one wave
    pub step_size: usize,
    /// Pause between waves
    pub wave_interval_ms: u64,
}

impl PublishConfig {
    /// Delivery timeout
    #[inline]
    #[must_use]
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }

    /// Wave interval
    #[inline]
    #[must_use]
    pub fn wave_interval(&self) -> Duration {
        Duration::from_millis(self.wave_interval_ms)
    }

    /// Rollout policy derived from `step_size`
    #[must_use]
    pub fn rollout(&self) -> RolloutPolicy {
        match self.step_size {
            0 => RolloutPolicy::Unstaged,
            step_size => RolloutPolicy::Staged { step_size },
        }
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            delivery_timeout_ms: 500,
            step_size: 0,
            wave_interval_ms: 0,
        }
    }
}

/// Pull reconciliation settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PullConfig {
    /// Deadline for the storage lookups of one pull
    pub deadline_ms: u64,
}

impl PullConfig {
    /// Deadline
    #[inline]
    #[must_use]
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

impl Default for PullConfig {
    fn default() -> Self {
        Self { deadline_ms: 3000 }
    }
}

/// Content cache settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Total bytes of content kept
    pub max_bytes: u64,
    /// Time to live; 0 disables expiry
    pub ttl_secs: u64,
}

impl CacheConfig {
    /// Build the content cache these settings describe
    #[must_use]
    pub fn build(&self) -> ContentCache {
        match self.ttl_secs {
            0 => ContentCache::new(self.max_bytes),
            ttl => ContentCache::with_ttl(self.max_bytes, Duration::from_secs(ttl)),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_bytes: 256 * 1024 * 1024,
            ttl_secs: 0,
        }
    }
}

/// In-process signal bus settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Buffered signals before publishers wait
    pub capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive, overridden by `RUST_LOG`
    pub filter: String,
    /// Emit JSON lines instead of human readable output
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}
