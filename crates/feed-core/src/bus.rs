//! Signal bus plumbing
//!
//! The durable bus is an external collaborator; this module defines the two
//! seams the control plane needs from it and an in-process implementation
//! over a bounded `tokio::sync::mpsc` channel. Payloads travel JSON-encoded,
//! the same as on the real topic, so decoding failures are exercised too.

use crate::error::BusError;
use async_trait::async_trait;
use feed_types::{Publishing, Release, ReloadSpec, SignalKind, Signalling};
use std::fmt;
use tokio::sync::mpsc;

/// Producer side of the signal topic
#[async_trait]
pub trait SignalPublisher: Send + Sync + fmt::Debug {
    /// Emit one signal
    async fn publish(&self, signal: &Signalling) -> Result<(), BusError>;
}

/// Consumer side of the signal topic (at-least-once)
#[async_trait]
pub trait SignalSubscriber: Send {
    /// Next decodable signal, `None` once the topic is closed
    async fn next(&mut self) -> Option<Signalling>;
}

/// In-process bus carrying encoded signals
#[derive(Debug, Clone)]
pub struct ChannelBus {
    tx: mpsc::Sender<Vec<u8>>,
}

impl ChannelBus {
    /// Create a bus and its single subscription
    #[must_use]
    pub fn new(capacity: usize) -> (Self, ChannelSubscription) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, ChannelSubscription { rx })
    }

    /// Emit an already encoded payload
    ///
    /// # Errors
    /// [`BusError::Closed`] when the subscription was dropped
    pub async fn publish_raw(&self, payload: Vec<u8>) -> Result<(), BusError> {
        self.tx.send(payload).await.map_err(|_| BusError::Closed)
    }
}

#[async_trait]
impl SignalPublisher for ChannelBus {
    async fn publish(&self, signal: &Signalling) -> Result<(), BusError> {
        let payload = signal.encode()?;
        self.publish_raw(payload).await?;
        tracing::debug!(
            kind = signal.kind.as_str(),
            app_id = %signal.publishing.app_id,
            release_id = %signal.publishing.release_id,
            "signal emitted"
        );
        Ok(())
    }
}

/// Receiving end of a [`ChannelBus`]
#[derive(Debug)]
pub struct ChannelSubscription {
    rx: mpsc::Receiver<Vec<u8>>,
}

#[async_trait]
impl SignalSubscriber for ChannelSubscription {
    async fn next(&mut self) -> Option<Signalling> {
        loop {
            let payload = self.rx.recv().await?;
            match Signalling::decode(&payload) {
                Ok(signal) => return Some(signal),
                Err(err) => {
                    tracing::warn!(error = %err, bytes = payload.len(), "skipping undecodable signal");
                }
            }
        }
    }
}

/// One signal per config item of `release`
///
/// A reload restricted to specific config ids only yields those items.
#[must_use]
pub fn release_signals(
    release: &Release,
    kind: SignalKind,
    reload_spec: Option<&ReloadSpec>,
) -> Vec<Signalling> {
    let strategy = (!release.strategy.is_empty()).then(|| release.strategy.clone());
    release
        .configs
        .iter()
        .filter(|config| {
            reload_spec.map_or(true, |spec| {
                spec.cfg_ids.is_empty() || spec.cfg_ids.contains(&config.cfg_id)
            })
        })
        .map(|config| {
            Signalling::new(
                kind,
                Publishing {
                    biz_id: release.biz_id,
                    app_id: release.app_id,
                    cfg_id: config.cfg_id,
                    cfg_name: config.name.clone(),
                    cfg_path: config.path.clone(),
                    serial_no: release.serial_no,
                    release_id: release.id,
                    strategy: strategy.clone(),
                    reload_spec: reload_spec.cloned(),
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use feed_types::{AppId, BizId, CfgId, ContentRef, ReleaseConfig, ReleaseId};

    fn release() -> Release {
        let config = |id: u32| ReleaseConfig {
            cfg_id: CfgId(id),
            name: format!("cfg{id}.yaml"),
            path: "/etc".into(),
            content: ContentRef::compute(b"x"),
        };
        Release::new(ReleaseId(3), BizId(1), AppId(2), "r3")
            .with_config(config(1))
            .with_config(config(2))
    }

    #[tokio::test]
    async fn publish_and_receive() {
        let (bus, mut sub) = ChannelBus::new(4);
        let signal = release_signals(&release(), SignalKind::Publish, None).remove(0);

        bus.publish(&signal).await.unwrap();
        assert_eq!(sub.next().await, Some(signal));
    }

    #[tokio::test]
    async fn undecodable_payloads_are_skipped() {
        let (bus, mut sub) = ChannelBus::new(4);
        let signal = release_signals(&release(), SignalKind::Rollback, None).remove(0);

        bus.publish_raw(b"{broken".to_vec()).await.unwrap();
        bus.publish(&signal).await.unwrap();
        drop(bus);

        assert_eq!(sub.next().await, Some(signal));
        assert_eq!(sub.next().await, None);
    }

    #[tokio::test]
    async fn closed_subscription_is_an_error() {
        let (bus, sub) = ChannelBus::new(1);
        drop(sub);
        let signal = release_signals(&release(), SignalKind::Publish, None).remove(0);
        assert!(matches!(bus.publish(&signal).await, Err(BusError::Closed)));
    }

    #[test]
    fn one_signal_per_config() {
        let signals = release_signals(&release(), SignalKind::Publish, None);
        assert_eq!(signals.len(), 2);
        assert!(signals.iter().all(|s| s.publishing.strategy.is_none()));
    }

    #[test]
    fn reload_spec_filters_configs() {
        let spec = ReloadSpec {
            cfg_ids: vec![CfgId(2)],
            reason: String::new(),
        };
        let signals = release_signals(&release(), SignalKind::Reload, Some(&spec));
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].publishing.cfg_id, CfgId(2));
        assert_eq!(signals[0].publishing.reload_spec.as_ref(), Some(&spec));
    }
}
