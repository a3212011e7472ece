//! Metric names and recording helpers
//!
//! Recorded through the `metrics` facade; nothing is exported unless the
//! embedding binary installs a recorder.

use std::time::{Duration, Instant};

/// Gauge: sessions held by the registry across all applications
///
/// Expired sessions are included until the sweeper removes them.
pub const SESSIONS_LIVE: &str = "feed_sessions_live";
/// Gauge: publish signals currently being fanned out
pub const PUBLISH_IN_FLIGHT: &str = "feed_publish_in_flight";
/// Counter: delivery attempts, labelled by `outcome`
pub const PUBLISH_DELIVERIES: &str = "feed_publish_deliveries_total";
/// Counter: signals that found no target session
pub const PUBLISH_NO_TARGET: &str = "feed_publish_no_target_total";
/// Histogram: RPC latency in seconds, labelled by `rpc`
pub const RPC_LATENCY: &str = "feed_rpc_latency_seconds";

/// Decrements the in-flight gauge when dropped
#[derive(Debug)]
pub(crate) struct InFlightGuard;

impl InFlightGuard {
    pub(crate) fn enter() -> Self {
        metrics::gauge!(PUBLISH_IN_FLIGHT).increment(1.0);
        Self
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        metrics::gauge!(PUBLISH_IN_FLIGHT).decrement(1.0);
    }
}

/// Record RPC latency since `started`
pub(crate) fn record_rpc(rpc: &'static str, started: Instant) {
    metrics::histogram!(RPC_LATENCY, "rpc" => rpc).record(started.elapsed().as_secs_f64());
}

/// Whole milliseconds of `duration` for log fields, saturating at `u64::MAX`
pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Publish the stored session count
pub(crate) fn record_sessions(stored: usize) {
    metrics::gauge!(SESSIONS_LIVE).set(stored as f64);
}
