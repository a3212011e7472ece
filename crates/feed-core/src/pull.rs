//! Pull reconciliation
//!
//! Answers "what should I be running now" straight from the release store.
//! The current release for a caller is the effective release carrying the
//! requested config item with the highest serial whose strategy selects the
//! caller. An explicitly requested release id bypasses strategy selection
//! but not the state or config item checks.
//!
//! An agent already on the current release gets `need_effect = false` and no
//! payload. Otherwise content is served through the [`ContentCache`].

use crate::error::FeedError;
use crate::store::ReleaseStore;
use crate::telemetry::duration_ms;
use feed_cache::{Blob, ContentCache};
use feed_strategy::{Instance, StrategyEngine};
use feed_types::{AppId, BizId, CfgId, ContentRef, Labels, Release, ReleaseId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Agent pull request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    /// Business
    pub biz_id: BizId,
    /// Application
    pub app_id: AppId,
    /// Cluster of the caller
    #[serde(default)]
    pub cluster_id: String,
    /// Zone of the caller
    #[serde(default)]
    pub zone_id: String,
    /// Datacenter of the caller
    #[serde(default)]
    pub dc: String,
    /// Caller IP
    pub ip: String,
    /// Caller labels
    #[serde(default)]
    pub labels: Labels,
    /// Config item to reconcile
    pub cfg_id: CfgId,
    /// Release the caller currently runs
    #[serde(default)]
    pub local_release_id: Option<ReleaseId>,
    /// Pin a specific release instead of resolving the current one
    #[serde(default)]
    pub release_id: Option<ReleaseId>,
}

impl PullRequest {
    /// Create request for `cfg_id` from the caller at `ip`
    #[must_use]
    pub fn new(biz_id: BizId, app_id: AppId, cfg_id: CfgId, ip: impl Into<String>) -> Self {
        Self {
            biz_id,
            app_id,
            cluster_id: String::new(),
            zone_id: String::new(),
            dc: String::new(),
            ip: ip.into(),
            labels: Labels::default(),
            cfg_id,
            local_release_id: None,
            release_id: None,
        }
    }

    /// With cluster
    #[inline]
    #[must_use]
    pub fn with_cluster(mut self, cluster_id: impl Into<String>) -> Self {
        self.cluster_id = cluster_id.into();
        self
    }

    /// With labels
    #[inline]
    #[must_use]
    pub fn with_labels(mut self, labels: impl Into<Labels>) -> Self {
        self.labels = labels.into();
        self
    }

    /// With the release the caller currently runs
    #[inline]
    #[must_use]
    pub fn with_local_release(mut self, release_id: ReleaseId) -> Self {
        self.local_release_id = Some(release_id);
        self
    }

    /// Pinned to a specific release
    #[inline]
    #[must_use]
    pub fn pinned(mut self, release_id: ReleaseId) -> Self {
        self.release_id = Some(release_id);
        self
    }

    /// Strategy view of the caller
    #[must_use]
    pub fn instance(&self) -> Instance<'_> {
        Instance {
            app_id: self.app_id,
            cluster_id: &self.cluster_id,
            zone_id: &self.zone_id,
            dc: &self.dc,
            ip: &self.ip,
            labels: &self.labels,
        }
    }

    /// Reject requests missing a required coordinate
    ///
    /// # Errors
    /// [`FeedError::InvalidArgument`] naming the missing field
    pub fn validate(&self) -> Result<(), FeedError> {
        let missing = if self.biz_id.is_unset() {
            Some("biz_id")
        } else if self.app_id.is_unset() {
            Some("app_id")
        } else if self.cfg_id.is_unset() {
            Some("cfg_id")
        } else if self.ip.trim().is_empty() {
            Some("ip")
        } else {
            None
        };
        match missing {
            Some(field) => Err(FeedError::InvalidArgument(format!("{field} is required"))),
            None => Ok(()),
        }
    }
}

/// Result of a pull
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullResponse {
    /// Whether the caller must apply a different release
    pub need_effect: bool,
    /// Release the caller should be running
    pub release_id: ReleaseId,
    /// Full release, only when `need_effect`
    pub release: Option<Release>,
    /// Content reference of the requested config item, only when `need_effect`
    pub content_ref: Option<ContentRef>,
    /// Content bytes, only when `need_effect`
    pub raw_content: Option<Blob>,
}

impl PullResponse {
    fn current(release_id: ReleaseId) -> Self {
        Self {
            need_effect: false,
            release_id,
            release: None,
            content_ref: None,
            raw_content: None,
        }
    }
}

/// Serves pulls from the release store and the content cache
#[derive(Debug, Clone)]
pub struct PullReconciler {
    store: Arc<dyn ReleaseStore>,
    cache: ContentCache,
    default_deadline: Duration,
}

impl PullReconciler {
    /// Create reconciler with a 3s default deadline
    #[must_use]
    pub fn new(store: Arc<dyn ReleaseStore>, cache: ContentCache) -> Self {
        Self {
            store,
            cache,
            default_deadline: Duration::from_secs(3),
        }
    }

    /// With default deadline
    #[inline]
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.default_deadline = deadline;
        self
    }

    /// Content cache in use
    #[inline]
    #[must_use]
    pub fn cache(&self) -> &ContentCache {
        &self.cache
    }

    /// Pull under the default deadline
    ///
    /// # Errors
    /// See [`PullReconciler::pull_with_deadline`]
    pub async fn pull(&self, request: &PullRequest) -> Result<PullResponse, FeedError> {
        self.pull_with_deadline(request, self.default_deadline).await
    }

    /// Pull, abandoning the storage lookups once `deadline` elapses
    ///
    /// # Errors
    /// - [`FeedError::InvalidArgument`] for incomplete requests
    /// - [`FeedError::NotFound`] when no effective release carrying the
    ///   config item applies, or a pinned release lacks it
    /// - [`FeedError::InvalidState`] when a pinned release is not effective
    /// - [`FeedError::Store`] and [`FeedError::Timeout`] for infrastructure
    ///   failures the agent should retry on its own schedule
    pub async fn pull_with_deadline(
        &self,
        request: &PullRequest,
        deadline: Duration,
    ) -> Result<PullResponse, FeedError> {
        request.validate()?;
        match tokio::time::timeout(deadline, self.reconcile(request)).await {
            Ok(result) => result,
            Err(_) => {
                let after_ms = duration_ms(deadline);
                tracing::warn!(
                    biz_id = %request.biz_id,
                    app_id = %request.app_id,
                    ip = %request.ip,
                    deadline_ms = after_ms,
                    "pull deadline elapsed"
                );
                Err(FeedError::Timeout {
                    operation: "pull",
                    after_ms,
                })
            }
        }
    }

    async fn reconcile(&self, request: &PullRequest) -> Result<PullResponse, FeedError> {
        let release = self.resolve(request).await?;

        if request.local_release_id == Some(release.id) {
            tracing::debug!(
                app_id = %request.app_id,
                ip = %request.ip,
                release_id = %release.id,
                "agent already current"
            );
            return Ok(PullResponse::current(release.id));
        }

        let shard = self.store.shard_for(request.biz_id);
        let content_ref = self
            .store
            .query_release_config(shard, request.biz_id, release.id, request.cfg_id)
            .await?;
        let raw_content = self
            .cache
            .get_or_try_fetch(&content_ref.content_id, || {
                self.store
                    .fetch_content(shard, request.biz_id, &content_ref.content_id)
            })
            .await?;

        tracing::debug!(
            app_id = %request.app_id,
            ip = %request.ip,
            release_id = %release.id,
            local_release_id = ?request.local_release_id,
            "agent must apply release"
        );
        Ok(PullResponse {
            need_effect: true,
            release_id: release.id,
            release: Some(release),
            content_ref: Some(content_ref),
            raw_content: Some(raw_content),
        })
    }

    async fn resolve(&self, request: &PullRequest) -> Result<Release, FeedError> {
        let shard = self.store.shard_for(request.biz_id);

        if let Some(release_id) = request.release_id {
            let release = self
                .store
                .query_release(shard, request.biz_id, release_id)
                .await?;
            if release.app_id != request.app_id {
                return Err(FeedError::NotFound {
                    kind: "release",
                    id: format!("{release_id} in app {}", request.app_id),
                });
            }
            if !release.is_effective() {
                return Err(FeedError::InvalidState {
                    target: format!("release {release_id}"),
                    state: release.state,
                });
            }
            if release.config(request.cfg_id).is_none() {
                return Err(FeedError::NotFound {
                    kind: "config",
                    id: format!("{} in release {release_id}", request.cfg_id),
                });
            }
            return Ok(release);
        }

        let instance = request.instance();
        self.store
            .list_releases(shard, request.biz_id, request.app_id)
            .await?
            .into_iter()
            .filter(|release| {
                release.is_effective()
                    && release.config(request.cfg_id).is_some()
                    && StrategyEngine::matches(&release.strategy, &instance)
            })
            .max_by_key(|release| release.serial_no)
            .ok_or_else(|| FeedError::NotFound {
                kind: "release",
                id: format!(
                    "effective release of app {} with config {}",
                    request.app_id, request.cfg_id
                ),
            })
    }
}
