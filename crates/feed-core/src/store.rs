//! Release storage collaborator
//!
//! The durable store is sharded by business; every call carries the
//! [`ShardId`] the caller resolved from the [`BizId`]. [`MemoryReleaseStore`]
//! is the in-process implementation used by the binary and by tests.

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use feed_types::{
    AppId, BizId, CfgId, ContentRef, MultiRelease, MultiReleaseId, Release, ReleaseId,
    ReleaseState,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Shard of the release store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShardId(pub u32);

impl ShardId {
    /// Resolve the shard owning a business
    #[inline]
    #[must_use]
    pub fn for_biz(biz_id: BizId, shard_count: u32) -> Self {
        Self(biz_id.0 % shard_count.max(1))
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Read interface to committed releases and content
#[async_trait]
pub trait ReleaseStore: Send + Sync + fmt::Debug {
    /// Shard owning `biz_id`
    fn shard_for(&self, biz_id: BizId) -> ShardId;

    /// One release by id
    async fn query_release(
        &self,
        shard: ShardId,
        biz_id: BizId,
        release_id: ReleaseId,
    ) -> Result<Release, StoreError>;

    /// Every release of an application, in any state
    async fn list_releases(
        &self,
        shard: ShardId,
        biz_id: BizId,
        app_id: AppId,
    ) -> Result<Vec<Release>, StoreError>;

    /// One multi-release by id
    async fn query_multi_release(
        &self,
        shard: ShardId,
        biz_id: BizId,
        multi_release_id: MultiReleaseId,
    ) -> Result<MultiRelease, StoreError>;

    /// Content reference of one config item in a release
    async fn query_release_config(
        &self,
        shard: ShardId,
        biz_id: BizId,
        release_id: ReleaseId,
        cfg_id: CfgId,
    ) -> Result<ContentRef, StoreError>;

    /// Raw content bytes
    async fn fetch_content(
        &self,
        shard: ShardId,
        biz_id: BizId,
        content_id: &str,
    ) -> Result<Vec<u8>, StoreError>;
}

#[derive(Debug, Default)]
struct Shard {
    releases: DashMap<(BizId, ReleaseId), Release>,
    multi_releases: DashMap<(BizId, MultiReleaseId), MultiRelease>,
    content: DashMap<(BizId, String), Arc<[u8]>>,
    unavailable: AtomicBool,
}

/// Sharded in-memory release store
#[derive(Debug)]
pub struct MemoryReleaseStore {
    shards: Vec<Shard>,
    serial: AtomicU64,
    content_fetches: AtomicU64,
}

impl MemoryReleaseStore {
    /// Create store with `shard_count` shards (at least one)
    #[must_use]
    pub fn new(shard_count: u32) -> Self {
        Self {
            shards: (0..shard_count.max(1)).map(|_| Shard::default()).collect(),
            serial: AtomicU64::new(0),
            content_fetches: AtomicU64::new(0),
        }
    }

    fn shard(&self, shard: ShardId) -> Result<&Shard, StoreError> {
        let found = self
            .shards
            .get(shard.0 as usize)
            .ok_or_else(|| StoreError::Unavailable {
                shard,
                reason: "no such shard".to_string(),
            })?;
        if found.unavailable.load(Ordering::Acquire) {
            return Err(StoreError::Unavailable {
                shard,
                reason: "shard marked unavailable".to_string(),
            });
        }
        Ok(found)
    }

    fn owning_shard(&self, biz_id: BizId) -> &Shard {
        let index = ShardId::for_biz(biz_id, self.shard_count()).0 as usize;
        &self.shards[index]
    }

    /// Number of shards
    #[must_use]
    pub fn shard_count(&self) -> u32 {
        u32::try_from(self.shards.len()).unwrap_or(u32::MAX)
    }

    /// Simulate a shard outage (or recovery) for `biz_id`
    pub fn set_available(&self, biz_id: BizId, available: bool) {
        self.owning_shard(biz_id)
            .unavailable
            .store(!available, Ordering::Release);
    }

    /// Number of content reads served so far
    #[must_use]
    pub fn content_fetches(&self) -> u64 {
        self.content_fetches.load(Ordering::Relaxed)
    }

    /// Store content bytes, returning their reference
    pub fn put_content(&self, biz_id: BizId, content: &[u8]) -> ContentRef {
        let content_ref = ContentRef::compute(content);
        self.owning_shard(biz_id)
            .content
            .insert((biz_id, content_ref.content_id.clone()), Arc::from(content));
        content_ref
    }

    /// Commit a release (its state is taken as given)
    pub fn insert_release(&self, release: Release) {
        self.owning_shard(release.biz_id)
            .releases
            .insert((release.biz_id, release.id), release);
    }

    /// Commit a multi-release
    pub fn insert_multi_release(&self, multi: MultiRelease) {
        self.owning_shard(multi.biz_id)
            .multi_releases
            .insert((multi.biz_id, multi.id), multi);
    }

    /// Mark a release published, bumping its serial
    ///
    /// # Errors
    /// [`StoreError::NotFound`] for unknown releases
    pub fn publish_release(
        &self,
        biz_id: BizId,
        release_id: ReleaseId,
    ) -> Result<Release, StoreError> {
        self.transition(biz_id, release_id, ReleaseState::Published)
    }

    /// Mark a release rolled back to, bumping its serial
    ///
    /// # Errors
    /// [`StoreError::NotFound`] for unknown releases
    pub fn rollback_release(
        &self,
        biz_id: BizId,
        release_id: ReleaseId,
    ) -> Result<Release, StoreError> {
        self.transition(biz_id, release_id, ReleaseState::Rollbacked)
    }

    fn transition(
        &self,
        biz_id: BizId,
        release_id: ReleaseId,
        state: ReleaseState,
    ) -> Result<Release, StoreError> {
        let mut entry = self
            .owning_shard(biz_id)
            .releases
            .get_mut(&(biz_id, release_id))
            .ok_or_else(|| not_found("release", release_id))?;
        entry.state = state;
        entry.serial_no = self.serial.fetch_add(1, Ordering::AcqRel) + 1;
        entry.effective_at = Some(Utc::now());
        Ok(entry.clone())
    }
}

impl Default for MemoryReleaseStore {
    fn default() -> Self {
        Self::new(1)
    }
}

fn not_found(kind: &'static str, id: impl fmt::Display) -> StoreError {
    StoreError::NotFound {
        kind,
        id: id.to_string(),
    }
}

#[async_trait]
impl ReleaseStore for MemoryReleaseStore {
    fn shard_for(&self, biz_id: BizId) -> ShardId {
        ShardId::for_biz(biz_id, self.shard_count())
    }

    async fn query_release(
        &self,
        shard: ShardId,
        biz_id: BizId,
        release_id: ReleaseId,
    ) -> Result<Release, StoreError> {
        self.shard(shard)?
            .releases
            .get(&(biz_id, release_id))
            .map(|r| r.clone())
            .ok_or_else(|| not_found("release", release_id))
    }

    async fn list_releases(
        &self,
        shard: ShardId,
        biz_id: BizId,
        app_id: AppId,
    ) -> Result<Vec<Release>, StoreError> {
        Ok(self
            .shard(shard)?
            .releases
            .iter()
            .filter(|r| r.biz_id == biz_id && r.app_id == app_id)
            .map(|r| r.clone())
            .collect())
    }

    async fn query_multi_release(
        &self,
        shard: ShardId,
        biz_id: BizId,
        multi_release_id: MultiReleaseId,
    ) -> Result<MultiRelease, StoreError> {
        self.shard(shard)?
            .multi_releases
            .get(&(biz_id, multi_release_id))
            .map(|m| m.clone())
            .ok_or_else(|| not_found("multi-release", multi_release_id))
    }

    async fn query_release_config(
        &self,
        shard: ShardId,
        biz_id: BizId,
        release_id: ReleaseId,
        cfg_id: CfgId,
    ) -> Result<ContentRef, StoreError> {
        let release = self
            .shard(shard)?
            .releases
            .get(&(biz_id, release_id))
            .map(|r| r.clone())
            .ok_or_else(|| not_found("release", release_id))?;
        release
            .config(cfg_id)
            .map(|c| c.content.clone())
            .ok_or_else(|| not_found("config", format!("{cfg_id} in release {release_id}")))
    }

    async fn fetch_content(
        &self,
        shard: ShardId,
        biz_id: BizId,
        content_id: &str,
    ) -> Result<Vec<u8>, StoreError> {
        self.content_fetches.fetch_add(1, Ordering::Relaxed);
        self.shard(shard)?
            .content
            .get(&(biz_id, content_id.to_string()))
            .map(|c| c.to_vec())
            .ok_or_else(|| not_found("content", content_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BIZ: BizId = BizId(5);

    fn store_with_release() -> MemoryReleaseStore {
        let store = MemoryReleaseStore::new(4);
        store.insert_release(Release::new(ReleaseId(1), BIZ, AppId(2), "r1"));
        store
    }

    #[test]
    fn shard_resolution() {
        assert_eq!(ShardId::for_biz(BizId(9), 4), ShardId(1));
        assert_eq!(ShardId::for_biz(BizId(9), 0), ShardId(0));
    }

    #[tokio::test]
    async fn publish_bumps_serial() {
        let store = store_with_release();
        store.insert_release(Release::new(ReleaseId(2), BIZ, AppId(2), "r2"));

        let first = store.publish_release(BIZ, ReleaseId(1)).unwrap();
        let second = store.publish_release(BIZ, ReleaseId(2)).unwrap();
        assert!(second.serial_no > first.serial_no);
        assert!(first.effective_at.is_some());

        let shard = store.shard_for(BIZ);
        let r = store.query_release(shard, BIZ, ReleaseId(1)).await.unwrap();
        assert_eq!(r.state, ReleaseState::Published);
    }

    #[tokio::test]
    async fn list_is_scoped_to_app() {
        let store = store_with_release();
        store.insert_release(Release::new(ReleaseId(3), BIZ, AppId(99), "other"));
        let shard = store.shard_for(BIZ);
        let releases = store.list_releases(shard, BIZ, AppId(2)).await.unwrap();
        assert_eq!(releases.len(), 1);
    }

    #[tokio::test]
    async fn unavailable_shard_errors() {
        let store = store_with_release();
        store.set_available(BIZ, false);
        let shard = store.shard_for(BIZ);
        let err = store.query_release(shard, BIZ, ReleaseId(1)).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable { .. }));

        store.set_available(BIZ, true);
        assert!(store.query_release(shard, BIZ, ReleaseId(1)).await.is_ok());
    }

    #[tokio::test]
    async fn content_roundtrip_and_fetch_count() {
        let store = MemoryReleaseStore::new(2);
        let content_ref = store.put_content(BIZ, b"key: value");
        let shard = store.shard_for(BIZ);

        let bytes = store
            .fetch_content(shard, BIZ, &content_ref.content_id)
            .await
            .unwrap();
        assert_eq!(bytes, b"key: value");
        assert_eq!(store.content_fetches(), 1);

        let missing = store.fetch_content(shard, BIZ, "nope").await.unwrap_err();
        assert!(matches!(missing, StoreError::NotFound { kind: "content", .. }));
    }

    #[tokio::test]
    async fn unknown_config_is_not_found() {
        let store = store_with_release();
        let shard = store.shard_for(BIZ);
        let err = store
            .query_release_config(shard, BIZ, ReleaseId(1), CfgId(4))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { kind: "config", .. }));
    }
}
