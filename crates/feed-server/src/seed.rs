//! Release seed files
//!
//! `serve --seed` loads releases into the in-memory store before the
//! coordinator starts:
//!
//! ```toml
//! [[release]]
//! id = 1
//! biz_id = 1
//! app_id = 100
//! name = "baseline"
//! state = "published"
//!
//! [release.strategy]
//! clusterids = ["c1"]
//!
//! [[release.config]]
//! cfg_id = 1000
//! name = "app.yaml"
//! path = "/etc/app"
//! content = "replicas: 3\n"
//! ```

use anyhow::Context;
use feed_core::MemoryReleaseStore;
use feed_types::{
    AppId, BizId, CfgId, RawStrategy, Release, ReleaseConfig, ReleaseId, ReleaseState, Strategy,
};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
pub(crate) struct SeedFile {
    #[serde(default, rename = "release")]
    releases: Vec<SeedRelease>,
}

#[derive(Debug, Deserialize)]
struct SeedRelease {
    id: ReleaseId,
    biz_id: BizId,
    app_id: AppId,
    name: String,
    #[serde(default = "published")]
    state: ReleaseState,
    #[serde(default)]
    strategy: RawStrategy,
    #[serde(default, rename = "config")]
    configs: Vec<SeedConfig>,
}

#[derive(Debug, Deserialize)]
struct SeedConfig {
    cfg_id: CfgId,
    name: String,
    path: String,
    content: String,
}

fn published() -> ReleaseState {
    ReleaseState::Published
}

impl SeedFile {
    pub(crate) fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading seed file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing seed file {}", path.display()))
    }

    pub(crate) fn parse(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Commit every release; effective ones are published or rolled back in
    /// file order so serials follow the file
    pub(crate) fn apply(&self, store: &MemoryReleaseStore) -> anyhow::Result<Vec<Release>> {
        let mut effective = Vec::new();
        for seed in &self.releases {
            let strategy = Strategy::from_raw(seed.app_id, seed.strategy.clone())
                .with_context(|| format!("strategy of release {}", seed.id))?;
            let mut release = Release::new(seed.id, seed.biz_id, seed.app_id, seed.name.clone())
                .with_strategy(strategy);
            for config in &seed.configs {
                release = release.with_config(ReleaseConfig {
                    cfg_id: config.cfg_id,
                    name: config.name.clone(),
                    path: config.path.clone(),
                    content: store.put_content(seed.biz_id, config.content.as_bytes()),
                });
            }
            store.insert_release(release);

            let committed = match seed.state {
                ReleaseState::Created => continue,
                ReleaseState::Published => store.publish_release(seed.biz_id, seed.id)?,
                ReleaseState::Rollbacked => store.rollback_release(seed.biz_id, seed.id)?,
            };
            effective.push(committed);
        }
        Ok(effective)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feed_core::ReleaseStore;
    use std::io::Write;

    const SEED: &str = r#"
        [[release]]
        id = 1
        biz_id = 1
        app_id = 100
        name = "baseline"

        [[release.config]]
        cfg_id = 1000
        name = "app.yaml"
        path = "/etc/app"
        content = "replicas: 3"

        [[release]]
        id = 2
        biz_id = 1
        app_id = 100
        name = "canary"
        state = "created"

        [release.strategy]
        clusterids = ["c1"]
    "#;

    #[tokio::test]
    async fn seed_commits_and_publishes() {
        let store = MemoryReleaseStore::new(2);
        let seed = SeedFile::parse(SEED).unwrap();
        let effective = seed.apply(&store).unwrap();

        assert_eq!(effective.len(), 1);
        assert_eq!(effective[0].id, ReleaseId(1));

        let shard = store.shard_for(BizId(1));
        let canary = store.query_release(shard, BizId(1), ReleaseId(2)).await.unwrap();
        assert_eq!(canary.state, ReleaseState::Created);
        assert!(!canary.strategy.is_empty());
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SEED.as_bytes()).unwrap();
        let seed = SeedFile::load(file.path()).unwrap();
        assert_eq!(seed.releases.len(), 2);
    }

    #[test]
    fn mixed_strategy_is_rejected() {
        let text = r#"
            [[release]]
            id = 1
            biz_id = 1
            app_id = 100
            name = "bad"
            [release.strategy]
            clusterids = ["c1"]
            labels_or = [{ env = "eq|prod" }]
        "#;
        let store = MemoryReleaseStore::new(1);
        assert!(SeedFile::parse(text).unwrap().apply(&store).is_err());
    }
}
