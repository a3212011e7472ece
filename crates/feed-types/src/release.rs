//! Releases and their content references

use crate::ids::{AppId, BizId, CfgId, MultiReleaseId, ReleaseId};
use crate::strategy::Strategy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Lifecycle state of a release
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseState {
    /// Committed but never published
    Created,
    /// Published to its strategy's targets
    Published,
    /// Re-activated by a rollback
    Rollbacked,
}

impl ReleaseState {
    /// Whether agents may pull or reload this release
    #[inline]
    #[must_use]
    pub const fn is_effective(self) -> bool {
        matches!(self, Self::Published | Self::Rollbacked)
    }
}

impl fmt::Display for ReleaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Published => "published",
            Self::Rollbacked => "rollbacked",
        };
        f.write_str(s)
    }
}

/// Reference to immutable rendered content
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentRef {
    /// Lowercase hex SHA-256 of the content bytes
    pub content_id: String,
    /// Content length in bytes
    pub byte_size: u64,
}

impl ContentRef {
    /// Compute the reference for a content blob
    #[must_use]
    pub fn compute(content: &[u8]) -> Self {
        Self {
            content_id: hex::encode(Sha256::digest(content)),
            byte_size: content.len() as u64,
        }
    }
}

/// One configuration item inside a release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseConfig {
    /// Config item id
    pub cfg_id: CfgId,
    /// File name
    pub name: String,
    /// Install path on the agent
    pub path: String,
    /// Rendered content
    pub content: ContentRef,
}

/// A committed, versioned configuration set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    /// Release id
    pub id: ReleaseId,
    /// Owning business
    pub biz_id: BizId,
    /// Owning application
    pub app_id: AppId,
    /// Human readable name
    pub name: String,
    /// Lifecycle state
    pub state: ReleaseState,
    /// Targets of this release
    pub strategy: Strategy,
    /// Config items
    pub configs: Vec<ReleaseConfig>,
    /// Monotonic publish serial, bumped on every publish/rollback
    #[serde(default)]
    pub serial_no: u64,
    /// Commit time
    pub created_at: DateTime<Utc>,
    /// Last time the release became effective (publish or rollback)
    #[serde(default)]
    pub effective_at: Option<DateTime<Utc>>,
}

impl Release {
    /// Create a release in [`ReleaseState::Created`]
    #[must_use]
    pub fn new(id: ReleaseId, biz_id: BizId, app_id: AppId, name: impl Into<String>) -> Self {
        Self {
            id,
            biz_id,
            app_id,
            name: name.into(),
            state: ReleaseState::Created,
            strategy: Strategy::unrestricted(app_id),
            configs: Vec::new(),
            serial_no: 0,
            created_at: Utc::now(),
            effective_at: None,
        }
    }

    /// With strategy
    #[inline]
    #[must_use]
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// With an additional config item
    #[inline]
    #[must_use]
    pub fn with_config(mut self, config: ReleaseConfig) -> Self {
        self.configs.push(config);
        self
    }

    /// Config item by id
    #[must_use]
    pub fn config(&self, cfg_id: CfgId) -> Option<&ReleaseConfig> {
        self.configs.iter().find(|c| c.cfg_id == cfg_id)
    }

    /// Whether agents may pull or reload this release
    #[inline]
    #[must_use]
    pub fn is_effective(&self) -> bool {
        self.state.is_effective()
    }
}

/// Several releases published atomically
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiRelease {
    /// Multi-release id
    pub id: MultiReleaseId,
    /// Owning business
    pub biz_id: BizId,
    /// Owning application
    pub app_id: AppId,
    /// Member releases
    pub release_ids: Vec<ReleaseId>,
    /// Lifecycle state of the set
    pub state: ReleaseState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_states() {
        assert!(!ReleaseState::Created.is_effective());
        assert!(ReleaseState::Published.is_effective());
        assert!(ReleaseState::Rollbacked.is_effective());
    }

    #[test]
    fn content_ref_is_sha256() {
        let r = ContentRef::compute(b"hello");
        assert_eq!(
            r.content_id,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(r.byte_size, 5);
    }

    #[test]
    fn release_config_lookup() {
        let release = Release::new(ReleaseId(1), BizId(1), AppId(1), "r1").with_config(
            ReleaseConfig {
                cfg_id: CfgId(9),
                name: "app.yaml".into(),
                path: "/etc".into(),
                content: ContentRef::compute(b"a: 1"),
            },
        );
        assert!(release.config(CfgId(9)).is_some());
        assert!(release.config(CfgId(8)).is_none());
        assert!(!release.is_effective());
        assert!(release.strategy.is_empty());
    }
}
