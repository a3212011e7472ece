//! Release reload
//!
//! Re-announces an already effective release (or every member of an
//! effective multi-release) as `Reload` signals on the bus. Every release
//! involved is validated before the first signal is emitted.

use crate::bus::{release_signals, SignalPublisher};
use crate::error::FeedError;
use crate::store::ReleaseStore;
use feed_types::{BizId, MultiReleaseId, Release, ReleaseId, ReloadSpec, SignalKind, Signalling};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// What to reload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReloadTarget {
    /// A single release
    Release(ReleaseId),
    /// Every member of a multi-release
    MultiRelease(MultiReleaseId),
}

impl fmt::Display for ReloadTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Release(id) => write!(f, "release {id}"),
            Self::MultiRelease(id) => write!(f, "multi-release {id}"),
        }
    }
}

/// Reload RPC request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReloadRequest {
    /// Business
    pub biz_id: BizId,
    /// Release or multi-release
    pub target: ReloadTarget,
    /// Reload options
    #[serde(default)]
    pub spec: ReloadSpec,
}

impl ReloadRequest {
    /// Reload every config item of a release
    #[must_use]
    pub fn release(biz_id: BizId, release_id: ReleaseId) -> Self {
        Self {
            biz_id,
            target: ReloadTarget::Release(release_id),
            spec: ReloadSpec::default(),
        }
    }

    /// Reload every member of a multi-release
    #[must_use]
    pub fn multi_release(biz_id: BizId, multi_release_id: MultiReleaseId) -> Self {
        Self {
            biz_id,
            target: ReloadTarget::MultiRelease(multi_release_id),
            spec: ReloadSpec::default(),
        }
    }

    /// With reload options
    #[inline]
    #[must_use]
    pub fn with_spec(mut self, spec: ReloadSpec) -> Self {
        self.spec = spec;
        self
    }

    fn validate(&self) -> Result<(), FeedError> {
        if self.biz_id.is_unset() {
            return Err(FeedError::InvalidArgument("biz_id is required".into()));
        }
        let unset = match self.target {
            ReloadTarget::Release(id) => id.is_unset(),
            ReloadTarget::MultiRelease(id) => id.is_unset(),
        };
        if unset {
            return Err(FeedError::InvalidArgument("release id is required".into()));
        }
        Ok(())
    }
}

/// Validates reload requests and republishes them as signals
#[derive(Debug, Clone)]
pub struct ReloadService {
    store: Arc<dyn ReleaseStore>,
    publisher: Arc<dyn SignalPublisher>,
}

impl ReloadService {
    /// Create reload service
    #[must_use]
    pub fn new(store: Arc<dyn ReleaseStore>, publisher: Arc<dyn SignalPublisher>) -> Self {
        Self { store, publisher }
    }

    /// Validate and emit `Reload` signals; returns how many were emitted
    ///
    /// # Errors
    /// - [`FeedError::InvalidArgument`] for incomplete requests or a spec
    ///   selecting no config item
    /// - [`FeedError::NotFound`] for unknown releases
    /// - [`FeedError::InvalidState`] when any release involved is not
    ///   published or rollbacked; nothing is emitted then
    /// - [`FeedError::Store`] / [`FeedError::Bus`] for infrastructure failures
    pub async fn reload(&self, request: &ReloadRequest) -> Result<usize, FeedError> {
        request.validate()?;
        let releases = self.resolve(request).await?;

        let signals: Vec<Signalling> = releases
            .iter()
            .flat_map(|release| release_signals(release, SignalKind::Reload, Some(&request.spec)))
            .collect();
        if signals.is_empty() {
            return Err(FeedError::InvalidArgument(format!(
                "reload of {} selects no config item",
                request.target
            )));
        }

        for signal in &signals {
            self.publisher.publish(signal).await?;
        }
        tracing::info!(
            biz_id = %request.biz_id,
            target = %request.target,
            signals = signals.len(),
            reason = %request.spec.reason,
            "reload emitted"
        );
        Ok(signals.len())
    }

    async fn resolve(&self, request: &ReloadRequest) -> Result<Vec<Release>, FeedError> {
        let shard = self.store.shard_for(request.biz_id);
        match request.target {
            ReloadTarget::Release(release_id) => {
                let release = self
                    .store
                    .query_release(shard, request.biz_id, release_id)
                    .await?;
                ensure_effective(&release)?;
                Ok(vec![release])
            }
            ReloadTarget::MultiRelease(multi_id) => {
                let multi = self
                    .store
                    .query_multi_release(shard, request.biz_id, multi_id)
                    .await?;
                if !multi.state.is_effective() {
                    return Err(FeedError::InvalidState {
                        target: format!("multi-release {multi_id}"),
                        state: multi.state,
                    });
                }
                let mut releases = Vec::with_capacity(multi.release_ids.len());
                for release_id in &multi.release_ids {
                    let release = self
                        .store
                        .query_release(shard, request.biz_id, *release_id)
                        .await?;
                    ensure_effective(&release)?;
                    releases.push(release);
                }
                Ok(releases)
            }
        }
    }
}

fn ensure_effective(release: &Release) -> Result<(), FeedError> {
    if release.is_effective() {
        Ok(())
    } else {
        Err(FeedError::InvalidState {
            target: format!("release {}", release.id),
            state: release.state,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{ChannelBus, ChannelSubscription, SignalSubscriber};
    use crate::store::MemoryReleaseStore;
    use feed_types::{AppId, CfgId, MultiRelease, ReleaseConfig, ReleaseState};

    const BIZ: BizId = BizId(3);

    fn release(store: &MemoryReleaseStore, id: u32, cfgs: &[u32]) -> Release {
        cfgs.iter().fold(
            Release::new(ReleaseId(id), BIZ, AppId(30), format!("r{id}")),
            |release, cfg| {
                release.with_config(ReleaseConfig {
                    cfg_id: CfgId(*cfg),
                    name: format!("cfg{cfg}.yaml"),
                    path: "/etc".into(),
                    content: store.put_content(BIZ, format!("cfg {cfg}").as_bytes()),
                })
            },
        )
    }

    fn setup() -> (Arc<MemoryReleaseStore>, ReloadService, ChannelSubscription) {
        let store = Arc::new(MemoryReleaseStore::new(2));
        let (bus, subscription) = ChannelBus::new(16);
        let service = ReloadService::new(store.clone(), Arc::new(bus));
        (store, service, subscription)
    }

    #[tokio::test]
    async fn reload_published_release() {
        let (store, service, mut subscription) = setup();
        store.insert_release(release(&store, 1, &[10, 11]));
        store.publish_release(BIZ, ReleaseId(1)).unwrap();

        let emitted = service
            .reload(&ReloadRequest::release(BIZ, ReleaseId(1)))
            .await
            .unwrap();
        assert_eq!(emitted, 2);

        let signal = subscription.next().await.unwrap();
        assert_eq!(signal.kind, SignalKind::Reload);
        assert_eq!(signal.publishing.release_id, ReleaseId(1));
        assert!(signal.publishing.reload_spec.is_some());
    }

    #[tokio::test]
    async fn reload_spec_narrows_configs() {
        let (store, service, mut subscription) = setup();
        store.insert_release(release(&store, 1, &[10, 11]));
        store.publish_release(BIZ, ReleaseId(1)).unwrap();

        let request = ReloadRequest::release(BIZ, ReleaseId(1)).with_spec(ReloadSpec {
            cfg_ids: vec![CfgId(11)],
            reason: "cert rotation".into(),
        });
        assert_eq!(service.reload(&request).await.unwrap(), 1);
        assert_eq!(subscription.next().await.unwrap().publishing.cfg_id, CfgId(11));

        let request = ReloadRequest::release(BIZ, ReleaseId(1)).with_spec(ReloadSpec {
            cfg_ids: vec![CfgId(99)],
            reason: String::new(),
        });
        assert!(matches!(
            service.reload(&request).await,
            Err(FeedError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn created_release_is_rejected() {
        let (store, service, _subscription) = setup();
        store.insert_release(release(&store, 1, &[10]));

        let err = service
            .reload(&ReloadRequest::release(BIZ, ReleaseId(1)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FeedError::InvalidState { state: ReleaseState::Created, .. }
        ));
    }

    #[tokio::test]
    async fn unknown_release_is_not_found() {
        let (_store, service, _subscription) = setup();
        let err = service
            .reload(&ReloadRequest::release(BIZ, ReleaseId(5)))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn multi_release_reloads_every_member() {
        let (store, service, mut subscription) = setup();
        store.insert_release(release(&store, 1, &[10]));
        store.insert_release(release(&store, 2, &[20, 21]));
        store.publish_release(BIZ, ReleaseId(1)).unwrap();
        store.publish_release(BIZ, ReleaseId(2)).unwrap();
        store.insert_multi_release(MultiRelease {
            id: MultiReleaseId(7),
            biz_id: BIZ,
            app_id: AppId(30),
            release_ids: vec![ReleaseId(1), ReleaseId(2)],
            state: ReleaseState::Published,
        });

        let emitted = service
            .reload(&ReloadRequest::multi_release(BIZ, MultiReleaseId(7)))
            .await
            .unwrap();
        assert_eq!(emitted, 3);

        let mut releases = Vec::new();
        for _ in 0..3 {
            releases.push(subscription.next().await.unwrap().publishing.release_id);
        }
        assert_eq!(releases, vec![ReleaseId(1), ReleaseId(2), ReleaseId(2)]);
    }

    #[tokio::test]
    async fn multi_release_with_created_member_emits_nothing() {
        let (store, service, mut subscription) = setup();
        store.insert_release(release(&store, 1, &[10]));
        store.insert_release(release(&store, 2, &[20]));
        store.publish_release(BIZ, ReleaseId(1)).unwrap();
        store.insert_multi_release(MultiRelease {
            id: MultiReleaseId(8),
            biz_id: BIZ,
            app_id: AppId(30),
            release_ids: vec![ReleaseId(1), ReleaseId(2)],
            state: ReleaseState::Published,
        });

        let err = service
            .reload(&ReloadRequest::multi_release(BIZ, MultiReleaseId(8)))
            .await
            .unwrap_err();
        assert!(matches!(err, FeedError::InvalidState { .. }));
        drop(service);
        assert!(subscription.next().await.is_none());
    }

    #[tokio::test]
    async fn missing_ids_are_invalid() {
        let (_store, service, _subscription) = setup();
        let err = service
            .reload(&ReloadRequest::release(BizId(0), ReleaseId(1)))
            .await
            .unwrap_err();
        assert!(err.is_validation());
        let err = service
            .reload(&ReloadRequest::release(BIZ, ReleaseId(0)))
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }
}
