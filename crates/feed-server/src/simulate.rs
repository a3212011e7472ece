//! In-process fleet simulation
//!
//! Spins up simulated agents spread across clusters, publishes a baseline
//! release every agent pulls on startup, then a release targeted at the
//! first cluster. Each agent keeps its last-known-good release and pulls on
//! every notification; a failed pull keeps the previous release.
//!
//! The run passes when exactly the targeted cluster converged to the new
//! release and every other agent stayed on the baseline.

use anyhow::Context;
use feed_core::{
    release_signals, ChannelBus, FeedConfig, FeedService, MemoryReleaseStore, PublishReport,
    PullRequest,
};
use feed_types::{
    AgentIdentity, AppId, BizId, CfgId, ContentRef, Notification, Release, ReleaseConfig,
    ReleaseId, SignalKind, Strategy, Whitelist,
};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

const BIZ: BizId = BizId(1);
const APP: AppId = AppId(1);
const CFG: CfgId = CfgId(1);
const BASELINE: ReleaseId = ReleaseId(1);
const CANARY: ReleaseId = ReleaseId(2);

/// Simulation parameters
#[derive(Debug, Clone)]
pub(crate) struct SimulatorConfig {
    pub(crate) agents: usize,
    pub(crate) clusters: usize,
    pub(crate) step_size: usize,
    pub(crate) settle_timeout: Duration,
}

/// Outcome of one agent
#[derive(Debug, Clone)]
struct AgentResult {
    cluster: String,
    release: Option<ReleaseId>,
    notifications: usize,
    failed_pulls: usize,
}

/// Final report
#[derive(Debug, Clone)]
pub(crate) struct SimulatorReport {
    config: SimulatorConfig,
    publish: PublishReport,
    /// cluster -> (agents, agents on canary)
    clusters: BTreeMap<String, (usize, usize)>,
    notifications: usize,
    failed_pulls: usize,
    elapsed: Duration,
    violations: Vec<String>,
}

impl SimulatorReport {
    pub(crate) fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    pub(crate) fn generate_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "=== Feed Simulation Report ===\n");
        let _ = writeln!(out, "Agents: {}", self.config.agents);
        let _ = writeln!(out, "Clusters: {}", self.config.clusters);
        let _ = writeln!(out, "Step Size: {}", self.config.step_size);
        let _ = writeln!(out, "Matched: {}", self.publish.matched);
        let _ = writeln!(out, "Waves: {:?}", self.publish.waves);
        let _ = writeln!(out, "Delivered: {}", self.publish.delivered);
        let _ = writeln!(out, "Timed Out: {}", self.publish.timed_out);
        let _ = writeln!(out, "Session Gone: {}", self.publish.gone);
        let _ = writeln!(out, "Notifications Seen: {}", self.notifications);
        let _ = writeln!(out, "Failed Pulls: {}", self.failed_pulls);
        let _ = writeln!(out, "Elapsed: {}ms\n", self.elapsed.as_millis());
        for (cluster, (agents, canary)) in &self.clusters {
            let _ = writeln!(out, "  {cluster}: {canary}/{agents} on release {CANARY}");
        }
        let _ = writeln!(out);
        if self.passed() {
            let _ = writeln!(out, "Status: PASSED");
        } else {
            let _ = writeln!(out, "Status: FAILED");
            for violation in &self.violations {
                let _ = writeln!(out, "  - {violation}");
            }
        }
        out
    }
}

fn release(store: &MemoryReleaseStore, id: ReleaseId, body: &str) -> Release {
    let content: ContentRef = store.put_content(BIZ, body.as_bytes());
    Release::new(id, BIZ, APP, format!("release-{id}")).with_config(ReleaseConfig {
        cfg_id: CFG,
        name: "app.yaml".into(),
        path: "/etc/app".into(),
        content,
    })
}

fn cluster_name(index: usize) -> String {
    format!("c{index}")
}

/// Run the simulation
///
/// # Errors
/// Fails when the service cannot be wired or an agent task panics
pub(crate) async fn run(
    config: SimulatorConfig,
    base: FeedConfig,
) -> anyhow::Result<SimulatorReport> {
    let started = Instant::now();
    let clusters = config.clusters.max(1);

    let mut feed_config = base;
    feed_config.publish.step_size = config.step_size;
    let store = Arc::new(MemoryReleaseStore::new(4));
    let (bus, _subscription) = ChannelBus::new(feed_config.bus.capacity);
    let service = FeedService::new(feed_config, store.clone(), Arc::new(bus), None);

    store.insert_release(release(&store, BASELINE, "replicas: 3\n"));
    store.publish_release(BIZ, BASELINE)?;

    let (applied_tx, mut applied_rx) = mpsc::unbounded_channel();
    let mut identities = Vec::with_capacity(config.agents);
    let mut agents = Vec::with_capacity(config.agents);
    for index in 0..config.agents {
        let cluster = cluster_name(index % clusters);
        let identity = AgentIdentity::new(
            BIZ,
            APP,
            "0",
            format!("10.{}.{}.{}", index / 65536, (index / 256) % 256, index % 256),
            "/srv/app",
        )
        .with_cluster(cluster);
        let (_session, rx) = service
            .connect(identity.clone(), None)
            .with_context(|| format!("connecting agent {index}"))?;
        identities.push(identity.clone());
        agents.push(tokio::spawn(agent(
            service.clone(),
            identity,
            rx,
            applied_tx.clone(),
        )));
    }
    drop(applied_tx);

    // every agent converges on the baseline before the canary goes out
    wait_for(&mut applied_rx, config.agents, config.settle_timeout).await;

    let canary = release(&store, CANARY, "replicas: 4\n").with_strategy(Strategy::whitelist(
        APP,
        Whitelist {
            cluster_ids: vec![cluster_name(0)],
            ..Whitelist::default()
        },
    ));
    store.insert_release(canary);
    let published = store.publish_release(BIZ, CANARY)?;

    let mut publish = None;
    for signal in release_signals(&published, SignalKind::Publish, None) {
        publish = Some(service.coordinator().process(&signal).await);
    }
    let publish = publish.context("canary release has no config item")?;
    wait_for(&mut applied_rx, publish.delivered, config.settle_timeout).await;

    for identity in &identities {
        service.disconnect(identity);
    }
    let mut results = Vec::with_capacity(agents.len());
    for handle in agents {
        results.push(handle.await.context("agent task failed")?);
    }

    let expected = match config.step_size {
        0 => usize::from(publish.matched > 0),
        step_size => publish.matched.div_ceil(step_size),
    };
    Ok(summarize(config, publish, results, expected, started.elapsed()))
}

fn summarize(
    config: SimulatorConfig,
    publish: PublishReport,
    results: Vec<AgentResult>,
    expected_waves: usize,
    elapsed: Duration,
) -> SimulatorReport {
    let targeted = cluster_name(0);
    let mut clusters: BTreeMap<String, (usize, usize)> = BTreeMap::new();
    let mut violations = Vec::new();
    let mut notifications = 0;
    let mut failed_pulls = 0;

    for result in &results {
        let entry = clusters.entry(result.cluster.clone()).or_default();
        entry.0 += 1;
        if result.release == Some(CANARY) {
            entry.1 += 1;
        }
        notifications += result.notifications;
        failed_pulls += result.failed_pulls;

        let expected = if result.cluster == targeted { CANARY } else { BASELINE };
        if result.release != Some(expected) {
            violations.push(format!(
                "agent in {} runs {:?}, expected release {expected}",
                result.cluster, result.release
            ));
        }
    }
    if publish.waves.len() != expected_waves {
        violations.push(format!(
            "{} waves, expected {expected_waves}",
            publish.waves.len()
        ));
    }

    SimulatorReport {
        config,
        publish,
        clusters,
        notifications,
        failed_pulls,
        elapsed,
        violations,
    }
}

async fn wait_for(applied: &mut mpsc::UnboundedReceiver<()>, count: usize, timeout: Duration) {
    let waited = tokio::time::timeout(timeout, async {
        for _ in 0..count {
            if applied.recv().await.is_none() {
                break;
            }
        }
    })
    .await;
    if waited.is_err() {
        tracing::warn!(
            count,
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "agents did not settle in time"
        );
    }
}

/// One simulated agent: pull on start, then pull on every notification
async fn agent(
    service: FeedService,
    identity: AgentIdentity,
    mut rx: mpsc::Receiver<Notification>,
    applied: mpsc::UnboundedSender<()>,
) -> AgentResult {
    let mut result = AgentResult {
        cluster: identity.cluster_id.clone(),
        release: None,
        notifications: 0,
        failed_pulls: 0,
    };

    reconcile(&service, &identity, &mut result, &applied).await;
    while let Some(notification) = rx.recv().await {
        result.notifications += 1;
        tracing::debug!(
            ip = %identity.ip,
            kind = notification.kind().as_str(),
            release_id = %notification.release_id(),
            "agent notified"
        );
        reconcile(&service, &identity, &mut result, &applied).await;
    }
    result
}

async fn reconcile(
    service: &FeedService,
    identity: &AgentIdentity,
    result: &mut AgentResult,
    applied: &mpsc::UnboundedSender<()>,
) {
    let mut request = PullRequest::new(identity.biz_id, identity.app_id, CFG, identity.ip.clone())
        .with_cluster(identity.cluster_id.clone())
        .with_labels(identity.labels.clone());
    request.local_release_id = result.release;

    match service.pull(&request).await {
        Ok(response) => {
            if response.need_effect {
                result.release = Some(response.release_id);
            }
        }
        Err(err) => {
            result.failed_pulls += 1;
            tracing::warn!(
                ip = %identity.ip,
                error = %err,
                keeping = ?result.release,
                "pull failed, keeping last-known-good release"
            );
        }
    }
    let _ = applied.send(());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(agents: usize, clusters: usize, step_size: usize) -> SimulatorConfig {
        SimulatorConfig {
            agents,
            clusters,
            step_size,
            settle_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn unstaged_simulation_passes() {
        let report = run(config(12, 3, 0), FeedConfig::default()).await.unwrap();
        assert!(report.passed(), "{}", report.generate_text());
        assert_eq!(report.publish.matched, 4);
        assert_eq!(report.publish.waves, vec![4]);
    }

    #[tokio::test]
    async fn staged_simulation_passes() {
        let report = run(config(30, 2, 4), FeedConfig::default()).await.unwrap();
        assert!(report.passed(), "{}", report.generate_text());
        assert_eq!(report.publish.waves, vec![4, 4, 4, 3]);
        assert_eq!(report.clusters.get("c1"), Some(&(15, 0)));
    }
}
