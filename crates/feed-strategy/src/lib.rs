//! Feed Strategy Engine
//!
//! Decides whether an agent instance is targeted by a release strategy.
//! Matching is pure and total: no I/O, no errors. Anything that cannot be
//! evaluated (for example an unparseable label payload) simply does not match.
//!
//! # Example
//!
//! ```rust
//! use feed_strategy::{Instance, StrategyEngine};
//! use feed_types::{AgentIdentity, AppId, BizId, Strategy, Whitelist};
//!
//! let agent = AgentIdentity::new(BizId(1), AppId(7), "0", "10.0.0.1", "/app")
//!     .with_cluster("c1");
//! let strategy = Strategy::whitelist(
//!     AppId(7),
//!     Whitelist { cluster_ids: vec!["c1".into()], ..Whitelist::default() },
//! );
//! assert!(StrategyEngine::matches(&strategy, &Instance::from(&agent)));
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

mod engine;
mod instance;

pub use engine::StrategyEngine;
pub use instance::{AsInstance, Instance};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
