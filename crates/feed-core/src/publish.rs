//! Publish fan-out
//!
//! [`PublishCoordinator::process`] turns one [`Signalling`] into deliveries:
//!
//! 1. resolve the live sessions of the signal's application
//! 2. keep those selected by the attached strategy (all, when none)
//! 3. hand them to a fresh [`RateController`](crate::rate::RateController)
//!    and deliver wave by wave; deliveries inside a wave run concurrently,
//!    the next wave starts only once every attempt of the previous one
//!    finished
//!
//! Delivery is best-effort and at-most-once. Timeouts and departed sessions
//! are counted in the [`PublishReport`], never returned as errors.

use crate::bus::SignalSubscriber;
use crate::config::PublishConfig;
use crate::rate::RolloutPolicy;
use crate::registry::SessionRegistry;
use crate::session::DeliveryOutcome;
use crate::telemetry::{self, InFlightGuard};
use feed_strategy::StrategyEngine;
use feed_types::{AppId, Notification, ReleaseId, SignalKind, Signalling};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

/// Summary of one processed signal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReport {
    /// Kind of the signal
    pub kind: SignalKind,
    /// Target application
    pub app_id: AppId,
    /// Release announced
    pub release_id: ReleaseId,
    /// Sessions selected by the strategy
    pub matched: usize,
    /// Size of every wave, in delivery order
    pub waves: Vec<usize>,
    /// Notifications enqueued
    pub delivered: usize,
    /// Attempts abandoned after the bounded wait
    pub timed_out: usize,
    /// Targets whose session was gone
    pub gone: usize,
}

impl PublishReport {
    fn new(signal: &Signalling) -> Self {
        Self {
            kind: signal.kind,
            app_id: signal.publishing.app_id,
            release_id: signal.publishing.release_id,
            matched: 0,
            waves: Vec::new(),
            delivered: 0,
            timed_out: 0,
            gone: 0,
        }
    }

    /// Whether no session was targeted
    #[inline]
    #[must_use]
    pub fn is_no_target(&self) -> bool {
        self.matched == 0
    }

    /// Total delivery attempts
    #[inline]
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.delivered + self.timed_out + self.gone
    }

    fn record(&mut self, outcome: DeliveryOutcome) {
        match outcome {
            DeliveryOutcome::Delivered => self.delivered += 1,
            DeliveryOutcome::TimedOut => self.timed_out += 1,
            DeliveryOutcome::SessionGone => self.gone += 1,
        }
    }
}

/// Consumes release-change signals and pushes notifications to sessions
#[derive(Debug)]
pub struct PublishCoordinator {
    registry: Arc<SessionRegistry>,
    rollout: RolloutPolicy,
    delivery_timeout: Duration,
    wave_interval: Duration,
}

impl PublishCoordinator {
    /// Create coordinator with a single unstaged wave and a 500ms bounded wait
    #[must_use]
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            registry,
            rollout: RolloutPolicy::Unstaged,
            delivery_timeout: Duration::from_millis(500),
            wave_interval: Duration::ZERO,
        }
    }

    /// Create coordinator from the `[publish]` section
    #[must_use]
    pub fn from_config(registry: Arc<SessionRegistry>, config: &PublishConfig) -> Self {
        Self::new(registry)
            .with_rollout(config.rollout())
            .with_delivery_timeout(config.delivery_timeout())
            .with_wave_interval(config.wave_interval())
    }

    /// With rollout policy
    #[inline]
    #[must_use]
    pub fn with_rollout(mut self, rollout: RolloutPolicy) -> Self {
        self.rollout = rollout;
        self
    }

    /// With per-delivery bounded wait
    #[inline]
    #[must_use]
    pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    /// With pause between consecutive waves
    #[inline]
    #[must_use]
    pub fn with_wave_interval(mut self, interval: Duration) -> Self {
        self.wave_interval = interval;
        self
    }

    /// Registry targets are resolved from
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Fan one signal out to its target sessions
    pub async fn process(&self, signal: &Signalling) -> PublishReport {
        let _in_flight = InFlightGuard::enter();
        let publishing = &signal.publishing;
        let mut report = PublishReport::new(signal);

        let sessions = self.registry.get(publishing.app_id);
        let targets = StrategyEngine::filter(publishing.strategy.as_ref(), sessions);
        report.matched = targets.len();
        if targets.is_empty() {
            metrics::counter!(telemetry::PUBLISH_NO_TARGET, "kind" => signal.kind.as_str())
                .increment(1);
            tracing::info!(
                kind = signal.kind.as_str(),
                app_id = %publishing.app_id,
                release_id = %publishing.release_id,
                "no target session, agents will reconcile on pull"
            );
            return report;
        }

        let notification = Notification::from_signal(signal);
        let mut controller = self.rollout.controller();
        controller.arrange(targets);

        while let Some(wave) = controller.next() {
            if !report.waves.is_empty() && !self.wave_interval.is_zero() {
                tokio::time::sleep(self.wave_interval).await;
            }
            report.waves.push(wave.len());

            let attempts = wave
                .iter()
                .map(|session| session.deliver(notification.clone(), self.delivery_timeout));
            let outcomes = join_all(attempts).await;

            for (session, outcome) in wave.iter().zip(outcomes) {
                metrics::counter!(telemetry::PUBLISH_DELIVERIES, "outcome" => outcome.as_str())
                    .increment(1);
                match outcome {
                    DeliveryOutcome::Delivered => {}
                    DeliveryOutcome::TimedOut => tracing::warn!(
                        app_id = %publishing.app_id,
                        session = %session.key(),
                        release_id = %publishing.release_id,
                        timeout_ms = telemetry::duration_ms(self.delivery_timeout),
                        "delivery timed out"
                    ),
                    DeliveryOutcome::SessionGone => tracing::debug!(
                        app_id = %publishing.app_id,
                        session = %session.key(),
                        "session gone before delivery"
                    ),
                }
                report.record(outcome);
            }
        }

        tracing::info!(
            kind = signal.kind.as_str(),
            app_id = %publishing.app_id,
            release_id = %publishing.release_id,
            matched = report.matched,
            waves = report.waves.len(),
            delivered = report.delivered,
            timed_out = report.timed_out,
            gone = report.gone,
            "signal fanned out"
        );
        report
    }

    /// Consume `subscriber` until it closes, one task per signal
    ///
    /// Signals are processed concurrently and in no particular order relative
    /// to each other. Returns the number of signals processed.
    pub async fn run<S>(self: Arc<Self>, mut subscriber: S) -> usize
    where
        S: SignalSubscriber + 'static,
    {
        let mut tasks = JoinSet::new();
        let mut processed = 0;
        while let Some(signal) = subscriber.next().await {
            let coordinator = Arc::clone(&self);
            tasks.spawn(async move { coordinator.process(&signal).await });
            processed += 1;
            while let Some(finished) = tasks.try_join_next() {
                log_task_failure(finished);
            }
        }
        while let Some(finished) = tasks.join_next().await {
            log_task_failure(finished);
        }
        tracing::info!(processed, "signal subscription closed");
        processed
    }
}

fn log_task_failure(result: Result<PublishReport, tokio::task::JoinError>) {
    if let Err(err) = result {
        tracing::error!(error = %err, "publish task failed");
    }
}
