//! Feed data model
//!
//! Strongly-typed values shared by every part of the control plane:
//!
//! - [`AgentIdentity`] and [`SessionKey`]: who is connected and how sessions are keyed
//! - [`Labels`]: the opaque label blob an agent supplies, parsed lazily
//! - [`Strategy`]: validated target-selection rule (whitelist or indexed predicates)
//! - [`Signalling`] and [`Notification`]: release-change events and what agents receive
//! - [`Release`], [`MultiRelease`], [`ContentRef`]: the committed configuration model
//!
//! # Example
//!
//! ```rust
//! use feed_types::{AppId, RawStrategy, Strategy};
//!
//! let raw = RawStrategy {
//!     clusterids: vec!["c1".into()],
//!     ..RawStrategy::default()
//! };
//! let strategy = Strategy::from_raw(AppId(7), raw).unwrap();
//! assert!(!strategy.is_empty());
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

mod error;
mod identity;
mod ids;
mod release;
mod signal;
mod strategy;

pub use error::TypeError;
pub use identity::{normalize_path, AgentIdentity, LabelMap, Labels, SessionKey};
pub use ids::{AppId, BizId, CfgId, MultiReleaseId, ReleaseId};
pub use release::{ContentRef, MultiRelease, Release, ReleaseConfig, ReleaseState};
pub use signal::{Notification, Publishing, ReleaseChange, ReloadSpec, SignalKind, Signalling};
pub use strategy::{
    IndexedPredicates, LabelExpr, LabelOp, LabelPredicate, RawStrategy, Strategy, StrategyRule,
    Whitelist,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
