//! Feed Core - session, publish and pull subsystem
//!
//! The control plane keeps a registry of live agent sessions and converges
//! them onto the current release through two independent paths:
//!
//! - **push**: [`PublishCoordinator`] consumes [`Signalling`] events, selects
//!   targets through the strategy engine, staggers them with a
//!   [`RateController`] and enqueues typed notifications with a bounded wait.
//!   Delivery is best-effort and at-most-once.
//! - **pull**: [`PullReconciler`] answers "what should I be running now"
//!   straight from the release store, serving content through the
//!   [`ContentCache`]. It never depends on a push having happened.
//!
//! # Example
//!
//! ```rust,ignore
//! use feed_core::{FeedConfig, FeedService, MemoryReleaseStore, ChannelBus};
//! use std::sync::Arc;
//!
//! let config = FeedConfig::default();
//! let store = Arc::new(MemoryReleaseStore::new(4));
//! let (bus, subscription) = ChannelBus::new(config.bus.capacity);
//! let service = FeedService::new(config, store, Arc::new(bus), None);
//! tokio::spawn(service.coordinator().run(subscription));
//! ```
//!
//! [`Signalling`]: feed_types::Signalling
//! [`ContentCache`]: feed_cache::ContentCache

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod bus;
pub mod config;
pub mod error;
pub mod telemetry;
pub mod publish;
pub mod pull;
pub mod rate;
pub mod registry;
pub mod reload;
pub mod service;
pub mod session;
pub mod store;

pub use bus::{release_signals, ChannelBus, ChannelSubscription, SignalPublisher, SignalSubscriber};
pub use config::{
    BusConfig, CacheConfig, FeedConfig, LogConfig, PublishConfig, PullConfig, SessionConfig,
};
pub use error::{BusError, ConfigError, FeedError, StoreError};
pub use publish::{PublishCoordinator, PublishReport};
pub use pull::{PullReconciler, PullRequest, PullResponse};
pub use rate::{RateController, RolloutPolicy, SimpleRateController, StagedRateController};
pub use registry::SessionRegistry;
pub use reload::{ReloadRequest, ReloadService, ReloadTarget};
pub use service::FeedService;
pub use session::{DeliveryOutcome, Session, SessionPersister, SessionState};
pub use store::{MemoryReleaseStore, ReleaseStore, ShardId};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with Feed Core
    pub use crate::{
        FeedConfig, FeedError, FeedService, MemoryReleaseStore, PublishCoordinator,
        PullReconciler, PullRequest, ReleaseStore, SessionRegistry,
    };
    pub use feed_types::{AgentIdentity, AppId, BizId, CfgId, Notification, ReleaseId, Strategy};
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
