//! Borrowed view of the fields a strategy can select on

use feed_types::{AgentIdentity, AppId, Labels};

/// What the engine sees of an agent
#[derive(Debug, Clone, Copy)]
pub struct Instance<'a> {
    /// Application
    pub app_id: AppId,
    /// Cluster
    pub cluster_id: &'a str,
    /// Zone
    pub zone_id: &'a str,
    /// Datacenter
    pub dc: &'a str,
    /// IP
    pub ip: &'a str,
    /// Label blob, parsed on demand
    pub labels: &'a Labels,
}

impl<'a> From<&'a AgentIdentity> for Instance<'a> {
    fn from(identity: &'a AgentIdentity) -> Self {
        Self {
            app_id: identity.app_id,
            cluster_id: &identity.cluster_id,
            zone_id: &identity.zone_id,
            dc: &identity.dc,
            ip: &identity.ip,
            labels: &identity.labels,
        }
    }
}

/// Anything that can be presented to the engine
pub trait AsInstance {
    /// Borrow as an [`Instance`]
    fn as_instance(&self) -> Instance<'_>;
}

impl AsInstance for AgentIdentity {
    fn as_instance(&self) -> Instance<'_> {
        Instance::from(self)
    }
}

impl AsInstance for Instance<'_> {
    fn as_instance(&self) -> Instance<'_> {
        *self
    }
}
