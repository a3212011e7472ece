//! Testing utilities for the Feed workspace
//!
//! Shared fixtures: identities, seeded release stores, signal helpers and a
//! recording session persister.

#![allow(missing_docs)]

use async_trait::async_trait;
use feed_core::{
    release_signals, FeedConfig, MemoryReleaseStore, SessionPersister, ShardId, StoreError,
};
use feed_types::{
    AgentIdentity, AppId, BizId, CfgId, Labels, Notification, Release, ReleaseConfig, ReleaseId,
    SessionKey, SignalKind, Signalling, Strategy, Whitelist,
};
use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

pub const BIZ: BizId = BizId(1);
pub const APP: AppId = AppId(100);
pub const CFG: CfgId = CfgId(1000);

pub fn identity(ip: &str, cluster: &str) -> AgentIdentity {
    AgentIdentity::new(BIZ, APP, "0", ip, "/data/app").with_cluster(cluster)
}

pub fn labelled_identity<'a>(
    ip: &str,
    labels: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> AgentIdentity {
    AgentIdentity::new(BIZ, APP, "0", ip, "/data/app").with_labels(Labels::from_pairs(labels))
}

pub fn cluster_strategy(clusters: &[&str]) -> Strategy {
    Strategy::whitelist(
        APP,
        Whitelist {
            cluster_ids: clusters.iter().map(|c| (*c).to_string()).collect(),
            ..Whitelist::default()
        },
    )
}

/// Small timeouts so tests never wait long on a full channel
pub fn test_config() -> FeedConfig {
    let mut config = FeedConfig::default();
    config.publish.delivery_timeout_ms = 50;
    config.pull.deadline_ms = 1000;
    config.session.channel_capacity = 8;
    config
}

/// Insert a `Created` release of [`APP`] with one [`CFG`] item holding `content`
pub fn seed_release(
    store: &MemoryReleaseStore,
    id: u32,
    strategy: Option<Strategy>,
    content: &[u8],
) -> Release {
    let mut release = Release::new(ReleaseId(id), BIZ, APP, format!("release-{id}")).with_config(
        ReleaseConfig {
            cfg_id: CFG,
            name: "app.yaml".into(),
            path: "/etc/app".into(),
            content: store.put_content(BIZ, content),
        },
    );
    if let Some(strategy) = strategy {
        release = release.with_strategy(strategy);
    }
    store.insert_release(release.clone());
    release
}

/// Publish a seeded release and return the signals a writer would emit
pub fn publish(store: &MemoryReleaseStore, id: u32) -> Vec<Signalling> {
    let release = store.publish_release(BIZ, ReleaseId(id)).unwrap();
    release_signals(&release, SignalKind::Publish, None)
}

/// Everything currently buffered on a delivery channel
pub fn drain(rx: &mut mpsc::Receiver<Notification>) -> Vec<Notification> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

/// Persister that records every session key it is asked to persist
#[derive(Debug, Default)]
pub struct RecordingPersister {
    persisted: Mutex<Vec<SessionKey>>,
    fail: bool,
}

impl RecordingPersister {
    pub fn failing() -> Self {
        Self {
            persisted: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn persisted(&self) -> Vec<SessionKey> {
        self.persisted.lock().clone()
    }
}

#[async_trait]
impl SessionPersister for RecordingPersister {
    async fn persist(&self, identity: &AgentIdentity) -> Result<(), StoreError> {
        self.persisted.lock().push(identity.session_key());
        if self.fail {
            return Err(StoreError::Unavailable {
                shard: ShardId(0),
                reason: "persist disabled".into(),
            });
        }
        Ok(())
    }
}

/// Yield until spawned fire-and-forget work has had a chance to run
pub async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(1)).await;
}
