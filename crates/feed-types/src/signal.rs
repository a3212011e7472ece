//! Release-change signalling and the notifications agents receive

use crate::ids::{AppId, BizId, CfgId, ReleaseId};
use crate::strategy::Strategy;
use serde::{Deserialize, Serialize};

/// Kind of release change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    /// A release was published
    Publish,
    /// A previous release was re-activated
    Rollback,
    /// Agents should reload an already effective release
    Reload,
}

impl SignalKind {
    /// Label used in logs and metrics
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Publish => "publish",
            Self::Rollback => "rollback",
            Self::Reload => "reload",
        }
    }
}

/// Reload options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReloadSpec {
    /// Restrict the reload to these config items; empty reloads all
    #[serde(default)]
    pub cfg_ids: Vec<CfgId>,
    /// Operator supplied reason
    #[serde(default)]
    pub reason: String,
}

/// What changed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publishing {
    /// Business
    pub biz_id: BizId,
    /// Application
    pub app_id: AppId,
    /// Config item
    pub cfg_id: CfgId,
    /// Config file name
    pub cfg_name: String,
    /// Config install path
    pub cfg_path: String,
    /// Publish serial
    pub serial_no: u64,
    /// Release that became effective
    pub release_id: ReleaseId,
    /// Strategy of the release; `None` targets every session of the app
    #[serde(default)]
    pub strategy: Option<Strategy>,
    /// Reload options, only meaningful for [`SignalKind::Reload`]
    #[serde(default)]
    pub reload_spec: Option<ReloadSpec>,
}

/// Event consumed from the signal bus
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signalling {
    /// Kind of change
    #[serde(rename = "type")]
    pub kind: SignalKind,
    /// Payload
    pub publishing: Publishing,
}

impl Signalling {
    /// Create a signal
    #[inline]
    #[must_use]
    pub fn new(kind: SignalKind, publishing: Publishing) -> Self {
        Self { kind, publishing }
    }

    /// Serialise for the bus
    ///
    /// # Errors
    /// Returns the JSON error if serialisation fails
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialise a bus payload
    ///
    /// # Errors
    /// Returns the JSON error for malformed payloads
    pub fn decode(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}

/// Notification fields shared by every kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseChange {
    /// Business
    pub biz_id: BizId,
    /// Application
    pub app_id: AppId,
    /// Config item
    pub cfg_id: CfgId,
    /// Config file name
    pub cfg_name: String,
    /// Config install path
    pub cfg_path: String,
    /// Publish serial
    pub serial_no: u64,
    /// Release to apply
    pub release_id: ReleaseId,
}

impl From<&Publishing> for ReleaseChange {
    fn from(p: &Publishing) -> Self {
        Self {
            biz_id: p.biz_id,
            app_id: p.app_id,
            cfg_id: p.cfg_id,
            cfg_name: p.cfg_name.clone(),
            cfg_path: p.cfg_path.clone(),
            serial_no: p.serial_no,
            release_id: p.release_id,
        }
    }
}

/// Typed message pushed onto a session's delivery channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// A new release is effective
    Publish(ReleaseChange),
    /// A previous release is effective again
    Rollback(ReleaseChange),
    /// Reload the current release
    Reload {
        /// Release to reload
        #[serde(flatten)]
        change: ReleaseChange,
        /// Reload options
        spec: ReloadSpec,
    },
}

impl Notification {
    /// Build the notification matching a signal's kind
    #[must_use]
    pub fn from_signal(signal: &Signalling) -> Self {
        let change = ReleaseChange::from(&signal.publishing);
        match signal.kind {
            SignalKind::Publish => Self::Publish(change),
            SignalKind::Rollback => Self::Rollback(change),
            SignalKind::Reload => Self::Reload {
                change,
                spec: signal.publishing.reload_spec.clone().unwrap_or_default(),
            },
        }
    }

    /// Kind of the originating signal
    #[must_use]
    pub fn kind(&self) -> SignalKind {
        match self {
            Self::Publish(_) => SignalKind::Publish,
            Self::Rollback(_) => SignalKind::Rollback,
            Self::Reload { .. } => SignalKind::Reload,
        }
    }

    /// Shared change fields
    #[must_use]
    pub fn change(&self) -> &ReleaseChange {
        match self {
            Self::Publish(change) | Self::Rollback(change) | Self::Reload { change, .. } => change,
        }
    }

    /// Release the agent should converge to
    #[inline]
    #[must_use]
    pub fn release_id(&self) -> ReleaseId {
        self.change().release_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn publishing() -> Publishing {
        Publishing {
            biz_id: BizId(1),
            app_id: AppId(2),
            cfg_id: CfgId(3),
            cfg_name: "app.yaml".into(),
            cfg_path: "/etc/app".into(),
            serial_no: 7,
            release_id: ReleaseId(11),
            strategy: None,
            reload_spec: None,
        }
    }

    #[test]
    fn notification_matches_signal_kind() {
        for kind in [SignalKind::Publish, SignalKind::Rollback, SignalKind::Reload] {
            let n = Notification::from_signal(&Signalling::new(kind, publishing()));
            assert_eq!(n.kind(), kind);
            assert_eq!(n.release_id(), ReleaseId(11));
        }
    }

    #[test]
    fn reload_carries_spec() {
        let mut p = publishing();
        p.reload_spec = Some(ReloadSpec {
            cfg_ids: vec![CfgId(3)],
            reason: "hotfix".into(),
        });
        match Notification::from_signal(&Signalling::new(SignalKind::Reload, p)) {
            Notification::Reload { spec, .. } => assert_eq!(spec.reason, "hotfix"),
            other => panic!("expected reload, got {other:?}"),
        }
    }

    #[test]
    fn signalling_wire_uses_type_tag() {
        let signal = Signalling::new(SignalKind::Rollback, publishing());
        let bytes = signal.encode().unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.starts_with(r#"{"type":"rollback""#));
        assert_eq!(Signalling::decode(&bytes).unwrap(), signal);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(Signalling::decode(b"not json").is_err());
    }
}
