//! RPC-facing facade
//!
//! [`FeedService`] wires the registry, coordinator, reconciler and reload
//! service from one [`FeedConfig`] and exposes the agent and operator RPCs.
//! Every RPC records its latency under [`RPC_LATENCY`](crate::telemetry::RPC_LATENCY).

use crate::bus::SignalPublisher;
use crate::config::FeedConfig;
use crate::error::FeedError;
use crate::publish::PublishCoordinator;
use crate::pull::{PullReconciler, PullRequest, PullResponse};
use crate::registry::SessionRegistry;
use crate::reload::{ReloadRequest, ReloadService};
use crate::session::{Session, SessionPersister};
use crate::store::ReleaseStore;
use crate::telemetry::record_rpc;
use feed_cache::ContentCache;
use feed_types::{AgentIdentity, Notification};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// The control plane behind the agent and operator RPCs
#[derive(Debug, Clone)]
pub struct FeedService {
    config: Arc<FeedConfig>,
    registry: Arc<SessionRegistry>,
    coordinator: Arc<PublishCoordinator>,
    reconciler: PullReconciler,
    reloader: ReloadService,
}

impl FeedService {
    /// Wire every subsystem from `config`
    ///
    /// Sessions are persisted through `persister`, when given, at most once
    /// per `session.persist_interval_secs`.
    #[must_use]
    pub fn new(
        config: FeedConfig,
        store: Arc<dyn ReleaseStore>,
        publisher: Arc<dyn SignalPublisher>,
        persister: Option<Arc<dyn SessionPersister>>,
    ) -> Self {
        let registry = Arc::new(match persister {
            Some(persister) => {
                SessionRegistry::with_persister(persister, config.session.persist_interval())
            }
            None => SessionRegistry::new(),
        });
        let coordinator = Arc::new(PublishCoordinator::from_config(
            Arc::clone(&registry),
            &config.publish,
        ));
        let reconciler = PullReconciler::new(Arc::clone(&store), config.cache.build())
            .with_deadline(config.pull.deadline());
        let reloader = ReloadService::new(store, publisher);

        Self {
            config: Arc::new(config),
            registry,
            coordinator,
            reconciler,
            reloader,
        }
    }

    /// Effective configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    /// Session registry
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Publish coordinator, ready for [`PublishCoordinator::run`]
    #[inline]
    #[must_use]
    pub fn coordinator(&self) -> Arc<PublishCoordinator> {
        Arc::clone(&self.coordinator)
    }

    /// Content cache behind pulls
    #[inline]
    #[must_use]
    pub fn cache(&self) -> &ContentCache {
        self.reconciler.cache()
    }

    /// Open a session with a fresh delivery channel
    ///
    /// `ttl` defaults to `session.default_ttl_secs`. A zero channel capacity
    /// is treated as 1.
    ///
    /// # Errors
    /// See [`SessionRegistry::flush`]
    pub fn connect(
        &self,
        identity: AgentIdentity,
        ttl: Option<Duration>,
    ) -> Result<(Session, mpsc::Receiver<Notification>), FeedError> {
        let (tx, rx) = mpsc::channel(self.config.session.channel_capacity.max(1));
        let session = self.flush(identity, tx, ttl)?;
        Ok((session, rx))
    }

    /// Agent flush RPC: upsert the session and refresh its TTL
    ///
    /// # Errors
    /// See [`SessionRegistry::flush`]
    pub fn flush(
        &self,
        identity: AgentIdentity,
        sender: mpsc::Sender<Notification>,
        ttl: Option<Duration>,
    ) -> Result<Session, FeedError> {
        let started = Instant::now();
        let ttl = ttl.unwrap_or_else(|| self.config.session.default_ttl());
        let result = self.registry.flush(identity, sender, ttl);
        record_rpc("flush", started);
        result
    }

    /// Agent disconnect; returns whether a session existed
    pub fn disconnect(&self, identity: &AgentIdentity) -> bool {
        let started = Instant::now();
        let removed = self.registry.delete(identity);
        record_rpc("disconnect", started);
        removed
    }

    /// Agent pull RPC
    ///
    /// # Errors
    /// See [`PullReconciler::pull_with_deadline`]
    pub async fn pull(&self, request: &PullRequest) -> Result<PullResponse, FeedError> {
        let started = Instant::now();
        let result = self.reconciler.pull(request).await;
        if let Err(err) = &result {
            tracing::debug!(
                app_id = %request.app_id,
                ip = %request.ip,
                error = %err,
                retryable = err.is_retryable(),
                "pull failed"
            );
        }
        record_rpc("pull", started);
        result
    }

    /// Release reload RPC; returns the number of signals emitted
    ///
    /// # Errors
    /// See [`ReloadService::reload`]
    pub async fn reload(&self, request: &ReloadRequest) -> Result<usize, FeedError> {
        let started = Instant::now();
        let result = self.reloader.reload(request).await;
        if let Err(err) = &result {
            tracing::warn!(biz_id = %request.biz_id, target = %request.target, error = %err, "reload rejected");
        }
        record_rpc("reload", started);
        result
    }

    /// Background sweep of expired sessions every `session.sweep_interval_secs`
    ///
    /// See [`SessionRegistry::spawn_sweeper`] for how a zero interval is handled.
    #[must_use]
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        Arc::clone(&self.registry).spawn_sweeper(self.config.session.sweep_interval())
    }
}
