//! Live agent sessions
//!
//! A [`Session`] is the registry's record of one connected agent: the identity
//! it last flushed with and the bounded channel notifications are pushed on.
//! Sessions carry an explicit lifecycle so that a send to a departed agent is
//! a typed [`DeliveryOutcome::SessionGone`] rather than a fault.

use crate::error::StoreError;
use async_trait::async_trait;
use feed_strategy::{AsInstance, Instance};
use feed_types::{AgentIdentity, Notification, SessionKey};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SessionState {
    /// Accepting notifications
    Open = 0,
    /// Being removed; no new deliveries
    Closing = 1,
    /// Removed or superseded
    Closed = 2,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Open,
            1 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// Result of one delivery attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryOutcome {
    /// Notification enqueued
    Delivered,
    /// Channel stayed full for the whole bounded wait
    TimedOut,
    /// Session closed or the agent dropped its receiver
    SessionGone,
}

impl DeliveryOutcome {
    /// Metric label
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::TimedOut => "timed_out",
            Self::SessionGone => "session_gone",
        }
    }
}

struct SessionInner {
    key: SessionKey,
    identity: AgentIdentity,
    sender: mpsc::Sender<Notification>,
    state: AtomicU8,
}

/// Handle to a live session; clones share state
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Create an open session delivering to `sender`
    #[must_use]
    pub fn new(identity: AgentIdentity, sender: mpsc::Sender<Notification>) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                key: identity.session_key(),
                identity,
                sender,
                state: AtomicU8::new(SessionState::Open as u8),
            }),
        }
    }

    /// Key within the application bucket
    #[inline]
    #[must_use]
    pub fn key(&self) -> &SessionKey {
        &self.inner.key
    }

    /// Identity as of the last flush
    #[inline]
    #[must_use]
    pub fn identity(&self) -> &AgentIdentity {
        &self.inner.identity
    }

    /// Current lifecycle state
    #[inline]
    #[must_use]
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// Whether deliveries are accepted
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        self.inner.state.store(state as u8, Ordering::Release);
    }

    /// Whether both handles deliver to the same channel
    #[must_use]
    pub fn same_channel(&self, sender: &mpsc::Sender<Notification>) -> bool {
        self.inner.sender.same_channel(sender)
    }

    /// Enqueue a notification, waiting at most `timeout` for channel space
    ///
    /// Never retried: a timeout is reported and the caller moves on.
    pub async fn deliver(&self, notification: Notification, timeout: Duration) -> DeliveryOutcome {
        if !self.is_open() {
            return DeliveryOutcome::SessionGone;
        }
        match tokio::time::timeout(timeout, self.inner.sender.send(notification)).await {
            Ok(Ok(())) => DeliveryOutcome::Delivered,
            Ok(Err(_)) => {
                self.set_state(SessionState::Closed);
                DeliveryOutcome::SessionGone
            }
            Err(_) => DeliveryOutcome::TimedOut,
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("app_id", &self.inner.identity.app_id)
            .field("key", &self.inner.key)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl AsInstance for Session {
    fn as_instance(&self) -> Instance<'_> {
        Instance::from(&self.inner.identity)
    }
}

/// Durable record of who is connected
///
/// Invoked fire-and-forget from flush, at most once per persist interval for
/// any given session key.
#[async_trait]
pub trait SessionPersister: Send + Sync + fmt::Debug {
    /// Persist the latest identity of a session
    async fn persist(&self, identity: &AgentIdentity) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use feed_types::{AppId, BizId, CfgId, ReleaseChange, ReleaseId};

    fn identity() -> AgentIdentity {
        AgentIdentity::new(BizId(1), AppId(2), "0", "10.0.0.1", "/app")
    }

    fn notification() -> Notification {
        Notification::Publish(ReleaseChange {
            biz_id: BizId(1),
            app_id: AppId(2),
            cfg_id: CfgId(3),
            cfg_name: "a.yaml".into(),
            cfg_path: "/etc".into(),
            serial_no: 1,
            release_id: ReleaseId(4),
        })
    }

    #[tokio::test]
    async fn deliver_to_open_session() {
        let (tx, mut rx) = mpsc::channel(1);
        let session = Session::new(identity(), tx);

        let outcome = session.deliver(notification(), Duration::from_millis(10)).await;
        assert_eq!(outcome, DeliveryOutcome::Delivered);
        assert_eq!(rx.recv().await.map(|n| n.release_id()), Some(ReleaseId(4)));
    }

    #[tokio::test(start_paused = true)]
    async fn full_channel_times_out() {
        let (tx, _rx) = mpsc::channel(1);
        let session = Session::new(identity(), tx);
        let timeout = Duration::from_millis(50);

        assert_eq!(session.deliver(notification(), timeout).await, DeliveryOutcome::Delivered);
        assert_eq!(session.deliver(notification(), timeout).await, DeliveryOutcome::TimedOut);
        assert!(session.is_open());
    }

    #[tokio::test]
    async fn dropped_receiver_is_session_gone() {
        let (tx, rx) = mpsc::channel(1);
        let session = Session::new(identity(), tx);
        drop(rx);

        let outcome = session.deliver(notification(), Duration::from_millis(10)).await;
        assert_eq!(outcome, DeliveryOutcome::SessionGone);
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn closing_session_rejects_delivery() {
        let (tx, mut rx) = mpsc::channel(1);
        let session = Session::new(identity(), tx);
        session.set_state(SessionState::Closing);

        let outcome = session.deliver(notification(), Duration::from_millis(10)).await;
        assert_eq!(outcome, DeliveryOutcome::SessionGone);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn session_key_comes_from_identity() {
        let (tx, _rx) = mpsc::channel(1);
        let session = Session::new(identity(), tx);
        assert_eq!(session.key(), &identity().session_key());
        assert_eq!(session.as_instance().ip, "10.0.0.1");
    }
}
